//! Capture-then-transcribe for one turn.
//!
//! The device is opened inside the blocking task and dropped when the utterance is finalized,
//! so nothing holds the microphone between turns.

use crate::audio::{AudioConfig, MicrophoneSource};
use crate::error::{VoiceError, VoiceResult};
use crate::recorder::VoiceRecorder;
use crate::stt::{transcribe_utterance, SttBackend, TranscribeOptions, Transcript};
use async_trait::async_trait;
use std::sync::Arc;

/// Polled once per frame; returning true ends the capture early.
pub type AbortSignal = Arc<dyn Fn() -> bool + Send + Sync>;

/// What one listening attempt produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Heard {
    Speech(Transcript),
    /// Nothing intelligible; the caller re-prompts.
    Nothing,
    /// The abort signal fired before the utterance finished.
    Aborted,
}

/// Produces one transcribed utterance per call.
#[async_trait]
pub trait Listener: Send {
    async fn listen(&mut self, abort: AbortSignal) -> VoiceResult<Heard>;
}

/// Microphone + recorder + STT backend.
pub struct MicrophoneListener {
    audio: AudioConfig,
    recorder: VoiceRecorder,
    stt: Arc<dyn SttBackend>,
    opts: TranscribeOptions,
}

impl MicrophoneListener {
    pub fn new(
        audio: AudioConfig,
        recorder: VoiceRecorder,
        stt: Arc<dyn SttBackend>,
        opts: TranscribeOptions,
    ) -> Self {
        Self {
            audio,
            recorder,
            stt,
            opts,
        }
    }
}

#[async_trait]
impl Listener for MicrophoneListener {
    async fn listen(&mut self, abort: AbortSignal) -> VoiceResult<Heard> {
        let audio = self.audio.clone();
        let recorder = self.recorder.clone();
        let utterance = tokio::task::spawn_blocking(move || {
            let mut source = MicrophoneSource::open(&audio)?;
            recorder.capture(&mut source, &|| abort())
        })
        .await
        .map_err(|e| VoiceError::AudioStream(format!("capture task failed: {}", e)))??;

        if utterance.is_aborted() {
            return Ok(Heard::Aborted);
        }

        let transcript = transcribe_utterance(self.stt.as_ref(), &utterance, &self.opts).await?;
        if transcript.is_empty() {
            Ok(Heard::Nothing)
        } else {
            Ok(Heard::Speech(transcript))
        }
    }
}
