//! **Playback**: blocking, stoppable PCM playback on the default output device.
//!
//! The rodio `OutputStream` is not `Send`, so it lives on a dedicated thread for the lifetime
//! of the player. Each `play` call gets a fresh `Sink`; `stop` from any thread halts it.

use crate::error::{VoiceError, VoiceResult};
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamHandle, Sink};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Something that can play PCM and be told to stop.
pub trait AudioPlayer: Send + Sync {
    /// Play mono 16-bit PCM, blocking until it finishes or `stop` is called.
    ///
    /// `cancelled` is consulted after the playback becomes stoppable and before any audio is
    /// queued, so a stop raised while `play` was being entered still suppresses it.
    fn play(&self, samples: &[i16], sample_rate: u32, cancelled: &dyn Fn() -> bool) -> VoiceResult<()>;

    /// Halt current playback immediately. No-op when idle.
    fn stop(&self);

    fn is_playing(&self) -> bool;
}

/// Player bound to the default output device.
pub struct DevicePlayer {
    handle: OutputStreamHandle,
    current: Mutex<Option<Arc<Sink>>>,
    _shutdown: mpsc::Sender<()>,
}

impl DevicePlayer {
    /// Open the default output device on a dedicated playback thread.
    pub fn open() -> VoiceResult<Self> {
        info!("🔊 Initializing audio playback");
        let (ready_tx, ready_rx) = mpsc::channel::<VoiceResult<OutputStreamHandle>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        std::thread::Builder::new()
            .name("recap-playback".to_string())
            .spawn(move || {
                let (stream, handle) = match OutputStream::try_default() {
                    Ok(pair) => pair,
                    Err(e) => {
                        let _ = ready_tx.send(Err(VoiceError::Playback(e.to_string())));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(handle));
                // Returns once the player (the only sender) is dropped.
                let _ = shutdown_rx.recv();
                drop(stream);
                debug!("playback thread exiting");
            })?;

        let handle = ready_rx
            .recv()
            .map_err(|e| VoiceError::Playback(format!("playback thread died: {}", e)))??;

        info!("✅ Audio playback initialized");
        Ok(Self {
            handle,
            current: Mutex::new(None),
            _shutdown: shutdown_tx,
        })
    }

    fn current_sink(&self) -> Option<Arc<Sink>> {
        self.current.lock().ok().and_then(|guard| guard.clone())
    }

    fn release(&self, sink: &Arc<Sink>) {
        if let Ok(mut guard) = self.current.lock() {
            if guard.as_ref().map(|s| Arc::ptr_eq(s, sink)).unwrap_or(false) {
                *guard = None;
            }
        }
    }
}

impl AudioPlayer for DevicePlayer {
    fn play(&self, samples: &[i16], sample_rate: u32, cancelled: &dyn Fn() -> bool) -> VoiceResult<()> {
        if samples.is_empty() {
            return Ok(());
        }
        let sink = Arc::new(Sink::try_new(&self.handle).map_err(|e| VoiceError::Playback(e.to_string()))?);
        if let Ok(mut guard) = self.current.lock() {
            *guard = Some(sink.clone());
        }

        // Registered first: a stop from here on halts the sink, one from before is seen here.
        if cancelled() {
            debug!("playback cancelled before start");
            self.release(&sink);
            return Ok(());
        }

        sink.append(SamplesBuffer::new(1, sample_rate, samples.to_vec()));
        sink.sleep_until_end();
        self.release(&sink);
        Ok(())
    }

    fn stop(&self) {
        if let Some(sink) = self.current_sink() {
            sink.stop();
            info!("⏹️ Audio playback stopped");
        }
    }

    fn is_playing(&self) -> bool {
        self.current_sink().map(|s| !s.empty()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore] // Requires an output device
    fn plays_and_stops_a_tone() {
        let player = Arc::new(DevicePlayer::open().expect("output device"));
        let tone: Vec<i16> = (0..16000 * 2)
            .map(|i| ((i as f32 * 440.0 * 2.0 * std::f32::consts::PI / 16000.0).sin() * 8000.0) as i16)
            .collect();

        let stopper = player.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(200));
            stopper.stop();
        });
        let started = std::time::Instant::now();
        player.play(&tone, 16000, &|| false).unwrap();
        handle.join().unwrap();

        assert!(started.elapsed() < std::time::Duration::from_secs(2));
        assert!(!player.is_playing());
    }
}
