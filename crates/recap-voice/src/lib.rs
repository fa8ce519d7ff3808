//! # RECAP Voice - capture, recognition, synthesis and playback
//!
//! The audio half of the RECAP conversation engine. Everything that touches a device or a
//! speech service lives here; turn-taking and dialogue state live in `recap-core`.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                         Listener                               │
//! │  ┌──────────────┐  ┌────────────────┐  ┌──────────────────┐    │
//! │  │   Audio In   │→ │ VoiceRecorder  │→ │   SttBackend     │    │
//! │  │    (cpal)    │  │ (amplitude +   │  │ (temp file →     │    │
//! │  │              │  │  2.5s silence) │  │  transcript)     │    │
//! │  └──────────────┘  └────────────────┘  └──────────────────┘    │
//! │                                                                │
//! │  ┌──────────────┐  ┌────────────────┐  ┌──────────────────┐    │
//! │  │  Audio Out   │← │  TtsBackend    │← │   VoiceTable     │    │
//! │  │   (rodio)    │  │  (pcm bytes)   │  │ locale → voice   │    │
//! │  └──────────────┘  └────────────────┘  └──────────────────┘    │
//! └────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod error;
pub mod listener;
pub mod playback;
pub mod recorder;
pub mod stt;
pub mod tts;
pub mod voices;

pub use audio::{AudioCapture, AudioConfig, FrameSource, MicrophoneSource};
pub use error::{VoiceError, VoiceResult};
pub use listener::{AbortSignal, Heard, Listener, MicrophoneListener};
pub use playback::{AudioPlayer, DevicePlayer};
pub use recorder::{CaptureEnd, RecorderConfig, Utterance, VoiceRecorder};
pub use stt::{
    transcribe_bytes, transcribe_utterance, OpenAiCompatStt, PlaceholderStt, SttBackend,
    TranscribeOptions, Transcript,
};
pub use tts::{OpenAiCompatTts, PlaceholderTts, TtsBackend};
pub use voices::{
    base_language, EngineCatalog, LanguageGroup, Resolution, ResolvedVoice, VariantChoices,
    VoiceDescription, VoiceTable,
};
