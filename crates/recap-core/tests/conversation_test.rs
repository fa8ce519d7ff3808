//! Integration test: a full conversation through the coordinator with scripted backends.
//!
//! ## Scenarios
//! 1. "hello" produces [system, user, assistant] and one synthesis of the full reply.
//! 2. "goodbye" sends only [system, farewell instruction] and closes the session.
//! 3. Spanish input gets a "respond in" directive and a Spanish voice.
//! 4. A stop request during a turn suppresses playback but keeps the reply.
//! 5. A failing synthesizer never fails the turn.

use async_trait::async_trait;
use recap_core::{
    ChatBackend, ConversationSession, FarewellLexicon, FragmentStream, RecapResult, ReplySink,
    Role, SessionState, SpeechOutput, Turn, TurnCoordinator, TurnOutcome,
};
use recap_voice::{
    AudioPlayer, EngineCatalog, ResolvedVoice, TtsBackend, VoiceError, VoiceResult, VoiceTable,
};
use std::sync::{Arc, Mutex};

// ---------------------------------------------------------------------------
// Scripted backends
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ScriptedChat {
    calls: Mutex<Vec<Vec<Turn>>>,
}

#[async_trait]
impl ChatBackend for ScriptedChat {
    async fn chat(&self, _model: &str, messages: &[Turn]) -> RecapResult<String> {
        self.calls.lock().unwrap().push(messages.to_vec());
        Ok("Goodbye, good luck with your studies!".to_string())
    }

    async fn chat_stream(&self, _model: &str, messages: &[Turn]) -> RecapResult<FragmentStream> {
        self.calls.lock().unwrap().push(messages.to_vec());
        let items: Vec<RecapResult<String>> = ["Hi! ", "How can ", "I help?"]
            .iter()
            .map(|s| Ok(s.to_string()))
            .collect();
        Ok(Box::pin(futures_util::stream::iter(items)))
    }
}

#[derive(Default)]
struct RecordingTts {
    calls: Mutex<Vec<(String, ResolvedVoice)>>,
    fail: bool,
}

#[async_trait]
impl TtsBackend for RecordingTts {
    async fn synthesize(&self, text: &str, voice: &ResolvedVoice, _engine: &str) -> VoiceResult<Vec<u8>> {
        self.calls.lock().unwrap().push((text.to_string(), voice.clone()));
        if self.fail {
            return Err(VoiceError::Tts("service unavailable".into()));
        }
        Ok(vec![0u8; 320])
    }
}

#[derive(Default)]
struct RecordingPlayer {
    plays: Mutex<usize>,
}

impl AudioPlayer for RecordingPlayer {
    fn play(&self, _samples: &[i16], _sample_rate: u32, _cancelled: &dyn Fn() -> bool) -> VoiceResult<()> {
        *self.plays.lock().unwrap() += 1;
        Ok(())
    }
    fn stop(&self) {}
    fn is_playing(&self) -> bool {
        false
    }
}

#[derive(Default)]
struct Transcript {
    text: String,
}

#[async_trait]
impl ReplySink for Transcript {
    async fn fragment(&mut self, text: &str) -> RecapResult<()> {
        self.text.push_str(text);
        Ok(())
    }
}

struct Harness {
    chat: Arc<ScriptedChat>,
    tts: Arc<RecordingTts>,
    player: Arc<RecordingPlayer>,
    coordinator: TurnCoordinator,
    session: ConversationSession,
}

fn harness(tts_fails: bool) -> Harness {
    let chat = Arc::new(ScriptedChat::default());
    let tts = Arc::new(RecordingTts { fail: tts_fails, ..Default::default() });
    let player = Arc::new(RecordingPlayer::default());
    let speech = SpeechOutput::new(
        tts.clone(),
        Arc::new(VoiceTable::builtin()),
        EngineCatalog::default(),
        Some(player.clone()),
    );
    let coordinator = TurnCoordinator::new(chat.clone(), "gemma3:4b")
        .with_speech(Arc::new(speech))
        .with_farewell_instruction("The user is done. Respond with one concise, friendly farewell.");
    let session = ConversationSession::new(
        "You are RECAP.",
        FarewellLexicon::from_lines(include_str!("../../../resources/farewells.txt")),
    );
    Harness { chat, tts, player, coordinator, session }
}

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn hello_round_trip() {
    init_logging();
    let mut h = harness(false);
    let (mut state, _ctl) = SessionState::new(false, true, false, None);
    let mut out = Transcript::default();

    let outcome = tokio_test::assert_ok!(
        h.coordinator
            .handle_user_input(&mut h.session, &mut state, "hello", "en-US", &mut out)
            .await
    );

    assert_eq!(outcome, TurnOutcome::Replied("Hi! How can I help?".into()));
    let roles: Vec<Role> = h.session.turns().iter().map(|t| t.role).collect();
    assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);

    let calls = h.tts.calls.lock().unwrap();
    assert_eq!(calls.len(), 1, "one synthesis per reply");
    assert_eq!(calls[0].0, "Hi! How can I help?");
    assert_eq!(calls[0].1.voice_id, "Danielle");
    assert_eq!(*h.player.plays.lock().unwrap(), 1);
}

#[tokio::test]
async fn goodbye_closes_with_minimal_context() {
    let mut h = harness(false);
    let (mut state, _ctl) = SessionState::new(false, true, false, None);
    let mut out = Transcript::default();

    h.coordinator
        .handle_user_input(&mut h.session, &mut state, "hello", "en-US", &mut out)
        .await
        .unwrap();
    let outcome = h
        .coordinator
        .handle_user_input(&mut h.session, &mut state, "goodbye", "en-US", &mut out)
        .await
        .unwrap();

    assert!(matches!(outcome, TurnOutcome::Farewell(_)));
    assert!(h.session.is_closed());
    let calls = h.chat.calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    assert_eq!(
        calls[1],
        vec![
            Turn::system("You are RECAP."),
            Turn::user("The user is done. Respond with one concise, friendly farewell."),
        ]
    );
    assert_eq!(h.tts.calls.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn spanish_turn_gets_directive_and_voice() {
    let mut h = harness(false);
    let (mut state, _ctl) = SessionState::new(false, true, false, None);
    let mut out = Transcript::default();

    h.coordinator
        .handle_user_input(&mut h.session, &mut state, "hola, qué es un árbol?", "es-MX", &mut out)
        .await
        .unwrap();

    let calls = h.chat.calls.lock().unwrap();
    assert_eq!(calls[0][1], Turn::system("Please respond in es-MX."));
    assert_eq!(h.tts.calls.lock().unwrap()[0].1.locale, "es-MX");
    assert_eq!(h.session.len(), 3);
}

#[tokio::test]
async fn stop_during_turn_suppresses_playback() {
    let mut h = harness(false);
    let (mut state, ctl) = SessionState::new(false, true, false, None);
    let mut out = Transcript::default();
    state.begin_turn();
    ctl.request_stop();

    let outcome = h
        .coordinator
        .handle_user_input(&mut h.session, &mut state, "explain big-O", "en-US", &mut out)
        .await
        .unwrap();

    assert!(matches!(outcome, TurnOutcome::Replied(_)));
    assert_eq!(*h.player.plays.lock().unwrap(), 0);
    assert_eq!(h.session.len(), 3);
}

#[tokio::test]
async fn synthesis_failure_is_not_fatal() {
    let mut h = harness(true);
    let (mut state, _ctl) = SessionState::new(false, true, false, None);
    let mut out = Transcript::default();

    let outcome = h
        .coordinator
        .handle_user_input(&mut h.session, &mut state, "hello", "en-US", &mut out)
        .await
        .unwrap();
    assert!(matches!(outcome, TurnOutcome::Replied(_)));
    assert_eq!(out.text, "Hi! How can I help?");
    assert_eq!(*h.player.plays.lock().unwrap(), 0);
}
