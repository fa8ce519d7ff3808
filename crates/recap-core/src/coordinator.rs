//! Turn coordination: one user input in, one reply out (text to the sink, then speech).
//!
//! The user turn is appended before the model is called and the assistant turn is appended
//! after the reply is complete, so a successful exchange always grows the history by two.
//! A farewell sends only the preamble plus the farewell instruction and closes the session;
//! the farewell reply is shown and spoken but not recorded.

use crate::chat::{ChatBackend, Turn};
use crate::error::{RecapError, RecapResult};
use crate::mode::SessionState;
use crate::picker::PromptIo;
use crate::session::ConversationSession;
use crate::speech::SpeechOutput;
use async_trait::async_trait;
use futures_util::StreamExt;
use std::sync::Arc;
use tracing::{debug, info};

/// Where reply text goes as it arrives.
#[async_trait]
pub trait ReplySink: Send {
    /// A reply is about to start.
    async fn begin(&mut self) -> RecapResult<()> {
        Ok(())
    }

    async fn fragment(&mut self, text: &str) -> RecapResult<()>;

    /// The reply is complete.
    async fn finish(&mut self) -> RecapResult<()> {
        Ok(())
    }

    /// Interactive prompt for voice disambiguation, if this sink has a user behind it.
    fn prompt_io(&mut self) -> Option<&mut dyn PromptIo> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Blank input; nothing happened.
    Ignored,
    Replied(String),
    /// The session is now closed.
    Farewell(String),
}

pub struct TurnCoordinator {
    chat: Arc<dyn ChatBackend>,
    model: String,
    streaming: bool,
    speech: Option<Arc<SpeechOutput>>,
    farewell_instruction: String,
}

impl TurnCoordinator {
    pub fn new(chat: Arc<dyn ChatBackend>, model: impl Into<String>) -> Self {
        Self {
            chat,
            model: model.into(),
            streaming: true,
            speech: None,
            farewell_instruction: "The user is done. Respond with one concise, friendly farewell."
                .to_string(),
        }
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn with_speech(mut self, speech: Arc<SpeechOutput>) -> Self {
        self.speech = Some(speech);
        self
    }

    pub fn with_farewell_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.farewell_instruction = instruction.into();
        self
    }

    pub fn speech(&self) -> Option<&Arc<SpeechOutput>> {
        self.speech.as_ref()
    }

    /// Run one exchange. Chat and sink errors propagate; speech errors never do.
    pub async fn handle_user_input(
        &self,
        session: &mut ConversationSession,
        state: &mut SessionState,
        text: &str,
        language: &str,
        sink: &mut dyn ReplySink,
    ) -> RecapResult<TurnOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(TurnOutcome::Ignored);
        }
        if session.is_closed() {
            return Err(RecapError::SessionClosed);
        }

        session.append(Turn::user(text))?;

        if session.is_farewell(text) {
            info!("farewell detected, closing session");
            let messages = session.farewell_messages(&self.farewell_instruction);
            let reply = self.chat.chat(&self.model, &messages).await?;
            let reply = reply.trim().to_string();
            sink.begin().await?;
            sink.fragment(&reply).await?;
            sink.finish().await?;
            session.close();
            self.speak(&reply, language, state, sink).await;
            return Ok(TurnOutcome::Farewell(reply));
        }

        let messages = session.model_messages(language);
        debug!(messages = messages.len(), %language, streaming = self.streaming, "calling chat backend");

        sink.begin().await?;
        let reply = if self.streaming {
            let mut stream = self.chat.chat_stream(&self.model, &messages).await?;
            let mut full = String::new();
            while let Some(fragment) = stream.next().await {
                let fragment = fragment?;
                if fragment.is_empty() {
                    continue;
                }
                sink.fragment(&fragment).await?;
                full.push_str(&fragment);
            }
            full
        } else {
            let reply = self.chat.chat(&self.model, &messages).await?;
            sink.fragment(&reply).await?;
            reply
        };
        sink.finish().await?;

        let reply = reply.trim().to_string();
        session.append(Turn::assistant(reply.clone()))?;
        self.speak(&reply, language, state, sink).await;
        Ok(TurnOutcome::Replied(reply))
    }

    /// Show and speak a fixed line (the greeting). Not recorded in history.
    pub async fn announce(
        &self,
        text: &str,
        language: &str,
        state: &mut SessionState,
        sink: &mut dyn ReplySink,
    ) -> RecapResult<()> {
        sink.begin().await?;
        sink.fragment(text).await?;
        sink.finish().await?;
        self.speak(text, language, state, sink).await;
        Ok(())
    }

    /// One throwaway chat call plus one discarded synthesis. Any failure aborts startup.
    pub async fn warm_up(&self, prompt: &str) -> RecapResult<()> {
        info!(model = %self.model, "warming up chat model");
        let messages = [Turn::user(prompt)];
        let reply = self
            .chat
            .chat(&self.model, &messages)
            .await
            .map_err(|e| RecapError::Warmup(format!("chat model: {}", e)))?;
        debug!(reply = %reply.trim(), "chat warm-up reply");
        if let Some(ref speech) = self.speech {
            speech.warm_up().await?;
        }
        info!("warm-up complete");
        Ok(())
    }

    async fn speak(&self, text: &str, language: &str, state: &mut SessionState, sink: &mut dyn ReplySink) {
        if let Some(ref speech) = self.speech {
            let outcome = speech.speak(text, language, state, sink.prompt_io()).await;
            debug!(?outcome, "speech output");
        }
    }
}
