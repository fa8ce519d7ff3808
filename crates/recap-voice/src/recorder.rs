//! Voice activity recorder: reads frames until the speaker goes quiet or the timeout hits.
//!
//! A frame is loud when its mean absolute amplitude exceeds the threshold. Once speech has
//! started, a run of quiet frames at least `silence` long ends the utterance. Elapsed time is
//! measured in captured audio, so a real-time device tracks the wall clock and a scripted
//! source stays deterministic.

use crate::audio::{mean_abs_amplitude, pcm_i16_to_wav, FrameSource};
use crate::error::VoiceResult;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info};

/// Recorder configuration
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Hard upper bound on one utterance (default: 255s)
    pub timeout: Duration,

    /// Trailing silence that ends an utterance once speech started (default: 2.5s)
    pub silence: Duration,

    /// Sample rate in Hz (default: 16000)
    pub sample_rate: u32,

    /// Frame length in milliseconds (default: 30)
    pub frame_ms: u32,

    /// Mean absolute amplitude above which a frame counts as speech (default: 500)
    pub amplitude_threshold: f64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(255),
            silence: Duration::from_millis(2500),
            sample_rate: 16000,
            frame_ms: 30,
            amplitude_threshold: 500.0,
        }
    }
}

impl RecorderConfig {
    /// Number of consecutive quiet frames that ends an utterance.
    pub fn max_silent_frames(&self) -> u32 {
        if self.frame_ms == 0 {
            return 0;
        }
        (self.silence.as_millis() / self.frame_ms as u128) as u32
    }

    fn frame_duration(&self) -> Duration {
        Duration::from_millis(self.frame_ms as u64)
    }
}

/// Why a capture finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureEnd {
    /// Speech was followed by enough trailing silence.
    Silence,
    /// The timeout elapsed.
    Timeout,
    /// The source stopped delivering frames.
    Stalled,
    /// The abort predicate fired (e.g. the language picker was requested).
    Aborted,
}

/// Recorder state while frames are being read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    /// No loud frame yet.
    Waiting,
    /// Last frame was loud.
    Speaking,
    /// Speech started, now counting quiet frames.
    TrailingSilence { silent_frames: u32 },
}

/// One captured utterance, consumed once by transcription.
#[derive(Debug, Clone)]
pub struct Utterance {
    /// 16-bit mono PCM
    pub samples: Vec<i16>,

    /// Sample rate of `samples`
    pub sample_rate: u32,

    /// Captured audio duration
    pub elapsed: Duration,

    /// Whether any frame crossed the amplitude threshold
    pub speech_detected: bool,

    pub ended_by: CaptureEnd,

    pub captured_at: DateTime<Utc>,
}

impl Utterance {
    /// WAV encoding for upload to a transcription service.
    pub fn to_wav(&self) -> Vec<u8> {
        pcm_i16_to_wav(&self.samples, self.sample_rate)
    }

    pub fn is_aborted(&self) -> bool {
        self.ended_by == CaptureEnd::Aborted
    }
}

/// Frame-by-frame voice activity recorder.
#[derive(Debug, Clone, Default)]
pub struct VoiceRecorder {
    config: RecorderConfig,
}

impl VoiceRecorder {
    pub fn new(config: RecorderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Capture one utterance. `should_abort` is polled before every frame.
    pub fn capture<S>(&self, source: &mut S, should_abort: &dyn Fn() -> bool) -> VoiceResult<Utterance>
    where
        S: FrameSource + ?Sized,
    {
        let cfg = &self.config;
        let frame_duration = cfg.frame_duration();
        let max_silent = cfg.max_silent_frames();
        let mut state = RecorderState::Waiting;
        let mut samples: Vec<i16> = Vec::new();
        let mut speech_detected = false;
        let mut elapsed = Duration::ZERO;

        debug!(
            timeout_secs = cfg.timeout.as_secs_f32(),
            silence_secs = cfg.silence.as_secs_f32(),
            max_silent_frames = max_silent,
            "recorder listening"
        );

        let ended_by = loop {
            if should_abort() {
                break CaptureEnd::Aborted;
            }
            if elapsed >= cfg.timeout {
                break CaptureEnd::Timeout;
            }

            let wait = cfg.timeout.saturating_sub(elapsed) + frame_duration;
            let frame = match source.next_frame(wait)? {
                Some(frame) => frame,
                None => break CaptureEnd::Stalled,
            };

            samples.extend_from_slice(&frame);
            elapsed = samples_to_duration(samples.len(), cfg.sample_rate);

            let loud = mean_abs_amplitude(&frame) > cfg.amplitude_threshold;
            state = match (state, loud) {
                (_, true) => {
                    speech_detected = true;
                    RecorderState::Speaking
                }
                (RecorderState::Waiting, false) => RecorderState::Waiting,
                (RecorderState::Speaking, false) => RecorderState::TrailingSilence { silent_frames: 1 },
                (RecorderState::TrailingSilence { silent_frames }, false) => {
                    RecorderState::TrailingSilence { silent_frames: silent_frames + 1 }
                }
            };

            if let RecorderState::TrailingSilence { silent_frames } = state {
                if silent_frames >= max_silent {
                    break CaptureEnd::Silence;
                }
            }
        };

        info!(
            target: "recap::voice",
            elapsed_secs = elapsed.as_secs_f32(),
            speech_detected,
            ended_by = ?ended_by,
            "🎙️ utterance captured"
        );

        Ok(Utterance {
            samples,
            sample_rate: cfg.sample_rate,
            elapsed,
            speech_detected,
            ended_by,
            captured_at: Utc::now(),
        })
    }
}

fn samples_to_duration(samples: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_micros(samples as u64 * 1_000_000 / sample_rate as u64)
}
