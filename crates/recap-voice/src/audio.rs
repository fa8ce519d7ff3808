//! Audio capture using CPAL, plus the PCM helpers shared by the recorder and backends.
//!
//! Capture is frame-oriented: a [`FrameSource`] hands out fixed-size 16-bit mono frames.
//! [`MicrophoneSource`] is the device-backed source; tests feed scripted sources instead.

use crate::error::{VoiceError, VoiceResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use std::sync::mpsc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Audio configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Sample rate in Hz (default: 16000)
    pub sample_rate: u32,

    /// Number of channels (default: 1 for mono)
    pub channels: u16,

    /// Frame length in milliseconds (default: 30)
    pub frame_ms: u32,

    /// Input device name. `None` uses the host default.
    pub input_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            frame_ms: 30,
            input_device: None,
        }
    }
}

impl AudioConfig {
    /// Samples per frame (480 for 30ms at 16kHz).
    pub fn frame_len(&self) -> usize {
        (self.sample_rate as usize * self.frame_ms as usize) / 1000
    }
}

/// Source of fixed-size PCM frames.
pub trait FrameSource {
    /// Return the next frame, waiting at most `wait`. `Ok(None)` means the source ended or stalled.
    fn next_frame(&mut self, wait: Duration) -> VoiceResult<Option<Vec<i16>>>;
}

/// Mean absolute amplitude of a frame, in 16-bit sample units.
pub fn mean_abs_amplitude(frame: &[i16]) -> f64 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum: f64 = frame.iter().map(|&s| (s as f64).abs()).sum();
    sum / frame.len() as f64
}

fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0).round() as i16
}

/// Encode 16-bit mono PCM to WAV bytes for API upload.
pub fn pcm_i16_to_wav(samples: &[i16], sample_rate: u32) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let mut buf = Vec::with_capacity(44 + data_len as usize);
    // RIFF header
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&(36 + data_len).to_le_bytes());
    buf.extend_from_slice(b"WAVE");
    // fmt subchunk
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
    buf.extend_from_slice(&1u16.to_le_bytes()); // mono
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&(sample_rate * 2).to_le_bytes()); // byte rate
    buf.extend_from_slice(&2u16.to_le_bytes()); // block align
    buf.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
    // data subchunk
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_len.to_le_bytes());
    for &s in samples {
        buf.extend_from_slice(&s.to_le_bytes());
    }
    buf
}

/// Decode little-endian 16-bit PCM bytes (as returned by the speech endpoint) into samples.
/// A trailing odd byte is ignored.
pub fn pcm_bytes_to_i16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Device discovery helpers.
pub struct AudioCapture;

impl AudioCapture {
    /// Whether any input device can be opened with the given selection policy.
    pub fn has_input_device(config: &AudioConfig) -> bool {
        match Self::select_device(config) {
            Ok(_) => true,
            Err(e) => {
                debug!("microphone probe failed: {}", e);
                false
            }
        }
    }

    fn select_device(config: &AudioConfig) -> VoiceResult<Device> {
        let host = cpal::default_host();
        match config.input_device.as_deref() {
            Some(wanted) => {
                let devices = host.input_devices()?;
                for device in devices {
                    if device.name().map(|n| n == wanted).unwrap_or(false) {
                        return Ok(device);
                    }
                }
                Err(VoiceError::NoInputDevice(format!("input device '{}' not found", wanted)))
            }
            None => host
                .default_input_device()
                .ok_or_else(|| VoiceError::NoInputDevice("no default input device".to_string())),
        }
    }
}

/// Microphone-backed frame source. The device is claimed on `open` and released on drop.
pub struct MicrophoneSource {
    _stream: Stream,
    frame_rx: mpsc::Receiver<Vec<i16>>,
}

impl MicrophoneSource {
    /// Open the selected input device and start streaming frames.
    pub fn open(config: &AudioConfig) -> VoiceResult<Self> {
        let device = AudioCapture::select_device(config)?;
        info!(
            target: "recap::voice",
            device = %device.name().unwrap_or_else(|_| "Unknown".to_string()),
            sample_rate = config.sample_rate,
            "🎤 Opening input device"
        );

        let stream_config = StreamConfig {
            channels: config.channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let frame_len = config.frame_len().max(1);
        let mut pending: Vec<i16> = Vec::with_capacity(frame_len);
        let (frame_tx, frame_rx) = mpsc::channel();

        let stream = device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for &sample in data {
                    pending.push(f32_to_i16(sample));
                    if pending.len() >= frame_len {
                        let frame = std::mem::replace(&mut pending, Vec::with_capacity(frame_len));
                        // Receiver gone means the capture finished; remaining samples are dropped.
                        let _ = frame_tx.send(frame);
                    }
                }
            },
            move |err| {
                warn!("Audio stream error: {}", err);
            },
            None,
        )?;

        stream.play()?;

        Ok(Self {
            _stream: stream,
            frame_rx,
        })
    }
}

impl FrameSource for MicrophoneSource {
    fn next_frame(&mut self, wait: Duration) -> VoiceResult<Option<Vec<i16>>> {
        match self.frame_rx.recv_timeout(wait) {
            Ok(frame) => Ok(Some(frame)),
            Err(mpsc::RecvTimeoutError::Timeout) => Ok(None),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(VoiceError::ChannelReceive(
                "input stream closed".to_string(),
            )),
        }
    }
}
