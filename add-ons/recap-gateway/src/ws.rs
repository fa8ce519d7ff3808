//! WebSocket duplex channel for the served variant.
//!
//! `GET /ws/chat` upgrades to a socket that carries one conversation.
//!
//! ## Protocol
//!
//! | Direction | Type | Content |
//! |---|---|---|
//! | Client → Server | Text | `{"type":"text","content":"<utterance>"}` |
//! | Client → Server | Binary | one complete recorded utterance (WebM/Opus from `MediaRecorder`) |
//! | Server → Client | Text | reply fragments, in order, as they stream from the model |
//!
//! Text frames that fail to parse or carry another `type` are dropped. There is no explicit
//! end-of-reply marker; a reply ends when the server stops sending.
//!
//! ## Lifecycle
//!
//! 1. The upgrade creates a [`ConnectionSession`]: a fresh history and mode state that are
//!    never shared with another connection.
//! 2. An egress task drains the reply channel into the socket.
//! 3. The ingest loop handles one frame at a time; a turn completes before the next frame
//!    is read.
//! 4. A farewell, a chat failure, or the client closing ends the loop.

use crate::AppState;
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use recap_core::{
    ConversationSession, RecapError, RecapResult, ReplySink, SessionState, TurnCoordinator,
    TurnOutcome,
};
use recap_voice::{transcribe_bytes, SttBackend, TranscribeOptions};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Sent when an audio blob could not be transcribed; the client answers with a text frame.
pub const TRANSCRIPTION_FAILED: &str =
    "Sorry, I couldn't process that audio. Please type your message instead.";

/// Browser recordings arrive as WebM containers.
const AUDIO_SUFFIX: &str = ".webm";

/// One decoded client frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    Audio(Vec<u8>),
}

#[derive(Debug, Deserialize)]
struct TextFrame {
    #[serde(rename = "type")]
    kind: String,
    content: String,
}

/// Decode a text frame. `None` means drop it.
pub fn parse_text_frame(raw: &str) -> Option<String> {
    match serde_json::from_str::<TextFrame>(raw) {
        Ok(frame) if frame.kind == "text" => Some(frame.content),
        Ok(frame) => {
            debug!(kind = %frame.kind, "dropping text frame with unknown type");
            None
        }
        Err(e) => {
            debug!(error = %e, "dropping malformed text frame");
            None
        }
    }
}

/// Reply fragments go to the egress task over a channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ReplySink for ChannelSink {
    async fn fragment(&mut self, text: &str) -> RecapResult<()> {
        self.tx
            .send(text.to_string())
            .map_err(|_| RecapError::SessionClosed)
    }
}

/// Per-connection conversation: its own history and mode state.
pub struct ConnectionSession {
    id: Uuid,
    session: ConversationSession,
    state: SessionState,
    coordinator: Arc<TurnCoordinator>,
    stt: Arc<dyn SttBackend>,
    opts: TranscribeOptions,
    typed_language: String,
}

impl ConnectionSession {
    pub fn new(
        session: ConversationSession,
        state: SessionState,
        coordinator: Arc<TurnCoordinator>,
        stt: Arc<dyn SttBackend>,
        opts: TranscribeOptions,
        typed_language: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session,
            state,
            coordinator,
            stt,
            opts,
            typed_language: typed_language.into(),
        }
    }

    pub fn from_app(app: &AppState) -> Self {
        let session = app.resources.new_session(&app.config.session.default_language);
        // No microphone on this side; speech only when the server plays it locally.
        let tts_enabled = app.config.session.tts_enabled && app.config.session.server_playback;
        let (state, _controller) = SessionState::new(false, tts_enabled, false, app.player.clone());
        Self::new(
            session,
            state,
            app.coordinator.clone(),
            app.stt.clone(),
            app.config.transcribe_options(),
            app.resources.voices.default_locale.clone(),
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.session.is_closed()
    }

    pub fn session(&self) -> &ConversationSession {
        &self.session
    }

    /// Handle one frame to completion.
    pub async fn handle(&mut self, inbound: Inbound, sink: &mut dyn ReplySink) -> RecapResult<TurnOutcome> {
        if self.session.is_closed() {
            return Err(RecapError::SessionClosed);
        }
        self.state.begin_turn();

        let (text, language) = match inbound {
            Inbound::Text(text) => (text, self.typed_language.clone()),
            Inbound::Audio(bytes) => {
                match transcribe_bytes(self.stt.as_ref(), &bytes, AUDIO_SUFFIX, &self.opts).await {
                    Ok(transcript) if transcript.is_empty() => {
                        debug!(session = %self.id, bytes = bytes.len(), "no speech in audio frame, dropped");
                        return Ok(TurnOutcome::Ignored);
                    }
                    Ok(transcript) => {
                        info!(session = %self.id, language = %transcript.language, "audio frame transcribed");
                        (transcript.text, transcript.language)
                    }
                    Err(e) => {
                        warn!(target: "recap::voice", session = %self.id, error = %e, "transcription failed");
                        sink.fragment(TRANSCRIPTION_FAILED).await?;
                        return Ok(TurnOutcome::Ignored);
                    }
                }
            }
        };

        self.coordinator
            .handle_user_input(&mut self.session, &mut self.state, &text, &language, sink)
            .await
    }
}

/// `GET /ws/chat`
pub async fn chat_ws(ws: WebSocketUpgrade, State(app): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_chat_ws(socket, app))
}

async fn handle_chat_ws(socket: WebSocket, app: AppState) {
    let mut conn = ConnectionSession::from_app(&app);
    let id = conn.id();
    info!(session = %id, "client connected");

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let egress = tokio::spawn(async move {
        while let Some(fragment) = rx.recv().await {
            if ws_sender.send(Message::Text(fragment)).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    let mut sink = ChannelSink::new(tx);
    while let Some(msg) = ws_receiver.next().await {
        let inbound = match msg {
            Ok(Message::Text(raw)) => match parse_text_frame(&raw) {
                Some(content) => Inbound::Text(content),
                None => continue,
            },
            Ok(Message::Binary(data)) => Inbound::Audio(data),
            Ok(Message::Close(_)) | Err(_) => break,
            // ping/pong
            Ok(_) => continue,
        };

        match conn.handle(inbound, &mut sink).await {
            Ok(TurnOutcome::Farewell(_)) => {
                info!(session = %id, "farewell, closing connection");
                break;
            }
            Ok(_) => {}
            Err(RecapError::SessionClosed) => break,
            Err(e) => {
                error!(session = %id, error = %e, "session ended with error");
                break;
            }
        }
    }

    // Dropping the sink ends the egress task once pending fragments are flushed.
    drop(sink);
    if let Err(e) = egress.await {
        warn!(session = %id, error = %e, "egress task failed");
    }
    info!(session = %id, turns = conn.session().len(), "client disconnected");
}
