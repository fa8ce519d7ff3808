//! The local conversation loop: capture or read input, run the turn, repeat until farewell.

use crate::coordinator::{ReplySink, TurnCoordinator, TurnOutcome};
use crate::error::RecapResult;
use crate::mode::{Modality, SessionState};
use crate::picker::{run_picker, LanguagePicker, PromptIo};
use crate::session::ConversationSession;
use recap_voice::{Heard, Listener, VoiceTable};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const TEXT_PROMPT: &str = "[TEXT] > ";

/// Why the loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Farewell,
    /// Input reached end of file.
    InputClosed,
}

/// A console is both where prompts are asked and where replies are written.
pub trait Console: PromptIo + ReplySink {}

impl<T: PromptIo + ReplySink> Console for T {}

pub struct ConversationLoop {
    coordinator: Arc<TurnCoordinator>,
    table: Arc<VoiceTable>,
}

impl ConversationLoop {
    pub fn new(coordinator: Arc<TurnCoordinator>, table: Arc<VoiceTable>) -> Self {
        Self { coordinator, table }
    }

    /// Language tag used for typed input. The default locale matches the default language, so
    /// typed turns need neither a directive nor a variant prompt.
    fn typed_language(&self) -> String {
        self.table.default_locale.clone()
    }

    pub async fn run<C: Console>(
        &self,
        session: &mut ConversationSession,
        state: &mut SessionState,
        console: &mut C,
        mut listener: Option<&mut dyn Listener>,
    ) -> RecapResult<LoopExit> {
        loop {
            if session.is_closed() {
                return Ok(LoopExit::Farewell);
            }

            let applied = state.begin_turn();
            if !applied.is_empty() {
                debug!(?applied, "control events applied");
            }

            if state.picker_pending() {
                self.pick_language(state, console).await;
                continue;
            }

            let (text, language) = match (state.modality(), listener.as_deref_mut()) {
                (Modality::Voice, Some(listener)) => {
                    // A picker request may have landed since the boundary; never claim the mic then.
                    if state.picker_pending() {
                        continue;
                    }
                    console.show("🎤 Listening...");
                    match listener.listen(state.abort_signal()).await {
                        Ok(Heard::Speech(transcript)) => {
                            console.show(&format!("You ({}): {}", transcript.language, transcript.text));
                            (transcript.text, transcript.language)
                        }
                        Ok(Heard::Nothing) => {
                            console.show("I didn't catch that. Please try again.");
                            continue;
                        }
                        Ok(Heard::Aborted) => continue,
                        Err(e) if e.is_device_unavailable() => {
                            warn!(error = %e, "microphone unavailable, switching to text input");
                            console.show("[Warning] No microphone available; switching to text input.");
                            state.mark_mic_unavailable();
                            continue;
                        }
                        Err(e) => {
                            warn!(error = %e, "voice input failed, falling back to text for this turn");
                            console.show("[Warning] Voice input failed; please type your message.");
                            match console.ask(TEXT_PROMPT).await {
                                Some(line) => (line, self.typed_language()),
                                None => return Ok(LoopExit::InputClosed),
                            }
                        }
                    }
                }
                _ => match console.ask(TEXT_PROMPT).await {
                    Some(line) => (line, self.typed_language()),
                    None => return Ok(LoopExit::InputClosed),
                },
            };

            if text.trim().is_empty() {
                continue;
            }

            let outcome = self
                .coordinator
                .handle_user_input(session, state, &text, &language, console)
                .await?;
            if let TurnOutcome::Farewell(_) = outcome {
                info!("session ended by farewell");
                return Ok(LoopExit::Farewell);
            }
        }
    }

    async fn pick_language<C: Console>(&self, state: &mut SessionState, console: &mut C) {
        state.enter_picker();
        let picker = LanguagePicker::new(&self.table);
        match run_picker(picker, console, state.choices_mut()).await {
            Some(locale) => info!(%locale, "language variant confirmed"),
            None => console.show("Language unchanged."),
        }
        state.exit_picker();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatBackend, FragmentStream, Turn};
    use crate::error::RecapError;
    use crate::mode::ModeController;
    use crate::session::FarewellLexicon;
    use async_trait::async_trait;
    use recap_voice::{AbortSignal, Transcript, VoiceError, VoiceResult};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct EchoChat {
        calls: Mutex<Vec<Vec<Turn>>>,
    }

    #[async_trait]
    impl ChatBackend for EchoChat {
        async fn chat(&self, _model: &str, messages: &[Turn]) -> RecapResult<String> {
            self.calls.lock().unwrap().push(messages.to_vec());
            Ok("Bye!".to_string())
        }

        async fn chat_stream(&self, _model: &str, messages: &[Turn]) -> RecapResult<FragmentStream> {
            self.calls.lock().unwrap().push(messages.to_vec());
            let items: Vec<RecapResult<String>> = vec![Ok("ok".to_string())];
            Ok(Box::pin(futures_util::stream::iter(items)))
        }
    }

    type EventLog = Arc<Mutex<Vec<String>>>;

    #[derive(Default)]
    struct ScriptedConsole {
        lines: VecDeque<&'static str>,
        shown: Vec<String>,
        replies: String,
        log: Option<EventLog>,
    }

    #[async_trait]
    impl PromptIo for ScriptedConsole {
        async fn ask(&mut self, _prompt: &str) -> Option<String> {
            if let Some(ref log) = self.log {
                log.lock().unwrap().push("ask".to_string());
            }
            self.lines.pop_front().map(str::to_string)
        }
        fn show(&mut self, text: &str) {
            self.shown.push(text.to_string());
        }
    }

    #[async_trait]
    impl ReplySink for ScriptedConsole {
        async fn fragment(&mut self, text: &str) -> RecapResult<()> {
            self.replies.push_str(text);
            Ok(())
        }
    }

    struct ScriptedListener {
        results: VecDeque<VoiceResult<Heard>>,
    }

    #[async_trait]
    impl Listener for ScriptedListener {
        async fn listen(&mut self, _abort: AbortSignal) -> VoiceResult<Heard> {
            self.results
                .pop_front()
                .unwrap_or_else(|| Ok(Heard::Speech(Transcript { text: "goodbye".into(), language: "en".into() })))
        }
    }

    /// Raises a picker request while the first capture is running, as `/lang` would.
    struct InterruptedListener {
        controller: Option<ModeController>,
        log: EventLog,
    }

    #[async_trait]
    impl Listener for InterruptedListener {
        async fn listen(&mut self, abort: AbortSignal) -> VoiceResult<Heard> {
            if let Some(ctl) = self.controller.take() {
                ctl.request_language_picker();
                self.log.lock().unwrap().push(format!("listen aborted={}", abort()));
                return Ok(Heard::Aborted);
            }
            self.log.lock().unwrap().push(format!("listen aborted={}", abort()));
            Ok(Heard::Speech(Transcript { text: "goodbye".into(), language: "en".into() }))
        }
    }

    fn fixture() -> (ConversationLoop, Arc<EchoChat>, ConversationSession) {
        let chat = Arc::new(EchoChat { calls: Mutex::new(Vec::new()) });
        let coordinator = Arc::new(TurnCoordinator::new(chat.clone(), "m"));
        let lp = ConversationLoop::new(coordinator, Arc::new(VoiceTable::builtin()));
        let session = ConversationSession::new("sys", FarewellLexicon::from_lines("goodbye"));
        (lp, chat, session)
    }

    #[tokio::test]
    async fn text_session_runs_until_farewell() {
        let (lp, chat, mut session) = fixture();
        let (mut state, _ctl) = SessionState::new(false, true, false, None);
        let mut console = ScriptedConsole { lines: VecDeque::from(vec!["hello", "", "goodbye"]), ..Default::default() };

        let exit = lp.run(&mut session, &mut state, &mut console, None).await.unwrap();
        assert_eq!(exit, LoopExit::Farewell);
        assert_eq!(chat.calls.lock().unwrap().len(), 2);
        assert_eq!(console.replies, "okBye!");
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn closed_input_ends_loop() {
        let (lp, _chat, mut session) = fixture();
        let (mut state, _ctl) = SessionState::new(false, true, false, None);
        let mut console = ScriptedConsole::default();
        assert_eq!(
            lp.run(&mut session, &mut state, &mut console, None).await.unwrap(),
            LoopExit::InputClosed
        );
    }

    #[tokio::test]
    async fn missing_microphone_degrades_to_text() {
        let (lp, _chat, mut session) = fixture();
        let (mut state, _ctl) = SessionState::new(true, true, true, None);
        let mut listener = ScriptedListener {
            results: VecDeque::from(vec![Err(VoiceError::NoInputDevice("none".into()))]),
        };
        let mut console = ScriptedConsole { lines: VecDeque::from(vec!["goodbye"]), ..Default::default() };

        let exit = lp
            .run(&mut session, &mut state, &mut console, Some(&mut listener))
            .await
            .unwrap();
        assert_eq!(exit, LoopExit::Farewell);
        assert_eq!(state.modality(), Modality::Text);
        assert!(!state.mic_available());
    }

    #[tokio::test]
    async fn transcription_failure_prompts_once_for_text() {
        let (lp, _chat, mut session) = fixture();
        let (mut state, _ctl) = SessionState::new(true, true, true, None);
        let mut listener = ScriptedListener {
            results: VecDeque::from(vec![Err(VoiceError::Stt("timeout".into())), Ok(Heard::Nothing)]),
        };
        let mut console = ScriptedConsole { lines: VecDeque::from(vec!["what is a heap?"]), ..Default::default() };

        let exit = lp
            .run(&mut session, &mut state, &mut console, Some(&mut listener))
            .await
            .unwrap();
        assert_eq!(exit, LoopExit::Farewell);
        // still in voice mode after the one-off fallback
        assert_eq!(state.modality(), Modality::Voice);
        assert_eq!(session.turns()[1], Turn::user("what is a heap?"));
        assert!(console.shown.iter().any(|s| s.contains("didn't catch")));
    }

    #[tokio::test]
    async fn picker_request_runs_before_next_capture() {
        let (lp, _chat, mut session) = fixture();
        let (mut state, ctl) = SessionState::new(true, true, true, None);
        ctl.request_language_picker();
        let mut listener = ScriptedListener { results: VecDeque::new() };
        let mut console = ScriptedConsole { lines: VecDeque::from(vec!["c"]), ..Default::default() };

        lp.run(&mut session, &mut state, &mut console, Some(&mut listener))
            .await
            .unwrap();
        assert!(console.shown.iter().any(|s| s == "Language unchanged."));
        assert!(!state.picker_pending());
    }

    #[tokio::test]
    async fn picker_request_during_capture_preempts_the_next_listen() {
        let (lp, chat, mut session) = fixture();
        let (mut state, ctl) = SessionState::new(true, true, true, None);
        let log: EventLog = Arc::default();
        let mut listener = InterruptedListener { controller: Some(ctl), log: log.clone() };
        let mut console = ScriptedConsole {
            lines: VecDeque::from(vec!["c"]),
            log: Some(log.clone()),
            ..Default::default()
        };

        let exit = lp
            .run(&mut session, &mut state, &mut console, Some(&mut listener))
            .await
            .unwrap();

        assert_eq!(exit, LoopExit::Farewell);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["listen aborted=true", "ask", "listen aborted=false"]
        );
        assert!(console.shown.iter().any(|s| s == "Language unchanged."));
        // the aborted capture never reached the model
        assert_eq!(chat.calls.lock().unwrap().len(), 1);
        assert_eq!(session.turns()[1], Turn::user("goodbye"));
    }

    #[tokio::test]
    async fn chat_errors_end_the_loop() {
        struct Broken;
        #[async_trait]
        impl ChatBackend for Broken {
            async fn chat(&self, _m: &str, _t: &[Turn]) -> RecapResult<String> {
                Err(RecapError::Chat("down".into()))
            }
            async fn chat_stream(&self, _m: &str, _t: &[Turn]) -> RecapResult<FragmentStream> {
                Err(RecapError::Chat("down".into()))
            }
        }
        let lp = ConversationLoop::new(
            Arc::new(TurnCoordinator::new(Arc::new(Broken), "m")),
            Arc::new(VoiceTable::builtin()),
        );
        let mut session = ConversationSession::new("sys", FarewellLexicon::default());
        let (mut state, _ctl) = SessionState::new(false, true, false, None);
        let mut console = ScriptedConsole { lines: VecDeque::from(vec!["hi"]), ..Default::default() };
        assert!(lp.run(&mut session, &mut state, &mut console, None).await.is_err());
    }
}
