//! # RECAP Core - the conversation engine
//!
//! Owns the dialogue: session history, turn coordination, mode state and the language
//! picker. Audio devices and speech services come from `recap-voice`; front-ends (terminal,
//! WebSocket gateway) supply a [`ReplySink`] and drive [`TurnCoordinator`].
//!
//! ```text
//!   input (mic / keyboard / socket)
//!        │
//!        ▼
//!  ConversationSession ──► ChatBackend ──► ReplySink (fragments)
//!        ▲                                     │
//!        │                                     ▼
//!   SessionState ◄── ModeController      SpeechOutput ──► AudioPlayer
//! ```

pub mod bootstrap;
pub mod chat;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod interactive;
pub mod mode;
pub mod picker;
pub mod session;
pub mod speech;

pub use bootstrap::{build_coordinator, build_stt, build_tts, warm_up, Resources};
pub use chat::{build_chat_backend, ChatBackend, FragmentStream, Role, Turn};
pub use config::{env_bool, env_opt_string, InputSource, RecapConfig};
pub use coordinator::{ReplySink, TurnCoordinator, TurnOutcome};
pub use error::{RecapError, RecapResult};
pub use interactive::{Console, ConversationLoop, LoopExit, TEXT_PROMPT};
pub use mode::{ControlEvent, Modality, ModeController, Phase, SessionState};
pub use picker::{run_picker, LanguagePicker, PickerStep, PromptIo};
pub use session::{build_system_preamble, read_resource, ConversationSession, FarewellLexicon};
pub use speech::{SkipReason, SpeechOutcome, SpeechOutput};
