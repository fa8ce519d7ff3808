//! Mode & session state, and the control channel that mutates it.
//!
//! A [`ModeController`] is handed to whatever listens for control input (a stdin thread, a
//! hotkey listener). Every toggle is an edge-triggered [`ControlEvent`] sent over an unbounded
//! channel; the conversation loop drains the channel once per turn boundary with
//! [`SessionState::begin_turn`], so each event is applied exactly once and takes effect on the
//! next turn. Stop and picker requests additionally act immediately: they halt playback and
//! raise flags the loop checks before each blocking audio operation.

use recap_voice::{AudioPlayer, VariantChoices};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modality {
    Voice,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    ToggleModality,
    ToggleTts,
    /// Halt playback.
    Stop,
    /// Open the language picker before the next capture.
    OpenLanguagePicker,
}

/// Loop phase. The picker is entered and left explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Normal,
    PickingLanguage,
}

#[derive(Debug, Default)]
struct Flags {
    stop_requested: AtomicBool,
    picker_requested: AtomicBool,
}

/// Cloneable handle used by control-input sources.
#[derive(Clone)]
pub struct ModeController {
    tx: mpsc::UnboundedSender<ControlEvent>,
    flags: Arc<Flags>,
    player: Option<Arc<dyn AudioPlayer>>,
}

impl ModeController {
    pub fn toggle_modality(&self) {
        self.send(ControlEvent::ToggleModality);
    }

    pub fn toggle_tts(&self) {
        self.send(ControlEvent::ToggleTts);
    }

    /// Halt playback now; anything that would start playing this turn is suppressed.
    pub fn request_stop(&self) {
        self.flags.stop_requested.store(true, Ordering::SeqCst);
        self.halt_playback();
        self.send(ControlEvent::Stop);
    }

    /// Halt playback now and have the loop open the picker before its next capture.
    pub fn request_language_picker(&self) {
        self.halt_playback();
        self.flags.picker_requested.store(true, Ordering::SeqCst);
        self.send(ControlEvent::OpenLanguagePicker);
    }

    /// Dispatch an event through the operation that owns it.
    pub fn dispatch(&self, event: ControlEvent) {
        match event {
            ControlEvent::ToggleModality => self.toggle_modality(),
            ControlEvent::ToggleTts => self.toggle_tts(),
            ControlEvent::Stop => self.request_stop(),
            ControlEvent::OpenLanguagePicker => self.request_language_picker(),
        }
    }

    fn halt_playback(&self) {
        if let Some(ref player) = self.player {
            player.stop();
        }
    }

    fn send(&self, event: ControlEvent) {
        if self.tx.send(event).is_err() {
            debug!(?event, "control event dropped: session ended");
        }
    }
}

/// Per-session mode state, owned by the conversation loop.
pub struct SessionState {
    modality: Modality,
    tts_enabled: bool,
    mic_available: bool,
    phase: Phase,
    choices: VariantChoices,
    rx: mpsc::UnboundedReceiver<ControlEvent>,
    flags: Arc<Flags>,
}

impl SessionState {
    /// New state plus its controller. Voice modality is only used when a microphone exists.
    pub fn new(
        prefer_voice: bool,
        tts_enabled: bool,
        mic_available: bool,
        player: Option<Arc<dyn AudioPlayer>>,
    ) -> (Self, ModeController) {
        let (tx, rx) = mpsc::unbounded_channel();
        let flags = Arc::new(Flags::default());
        let modality = if prefer_voice && mic_available {
            Modality::Voice
        } else {
            Modality::Text
        };
        let state = Self {
            modality,
            tts_enabled,
            mic_available,
            phase: Phase::Normal,
            choices: VariantChoices::new(),
            rx,
            flags: flags.clone(),
        };
        let controller = ModeController { tx, flags, player };
        (state, controller)
    }

    /// Turn boundary: clear the per-turn stop flag and apply every pending event in order.
    /// Returns the events applied.
    pub fn begin_turn(&mut self) -> Vec<ControlEvent> {
        self.flags.stop_requested.store(false, Ordering::SeqCst);
        let mut applied = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            self.apply(event);
            applied.push(event);
        }
        applied
    }

    fn apply(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::ToggleModality => match self.modality {
                Modality::Voice => {
                    self.modality = Modality::Text;
                    info!("⌨️  input mode: text");
                }
                Modality::Text if self.mic_available => {
                    self.modality = Modality::Voice;
                    info!("🎤 input mode: voice");
                }
                Modality::Text => warn!("no microphone available, staying in text mode"),
            },
            ControlEvent::ToggleTts => {
                self.tts_enabled = !self.tts_enabled;
                info!(tts_enabled = self.tts_enabled, "🔈 speech output toggled");
            }
            ControlEvent::Stop => {}
            ControlEvent::OpenLanguagePicker => {
                self.phase = Phase::PickingLanguage;
            }
        }
    }

    /// Same-iteration check used right before claiming the microphone.
    pub fn picker_pending(&self) -> bool {
        self.phase == Phase::PickingLanguage || self.flags.picker_requested.load(Ordering::SeqCst)
    }

    /// Enter the picker phase (also when requested mid-turn, before the event is drained).
    pub fn enter_picker(&mut self) {
        self.phase = Phase::PickingLanguage;
    }

    /// Leave the picker phase, whether a choice was confirmed or not.
    pub fn exit_picker(&mut self) {
        self.phase = Phase::Normal;
        self.flags.picker_requested.store(false, Ordering::SeqCst);
        // The event that raised the flag may still be queued; it must not reopen the picker.
        let mut requeue = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            if event != ControlEvent::OpenLanguagePicker {
                requeue.push(event);
            }
        }
        for event in requeue {
            self.apply(event);
        }
    }

    /// Whether a stop was requested since this turn began.
    pub fn stop_requested(&self) -> bool {
        self.flags.stop_requested.load(Ordering::SeqCst)
    }

    /// Handed to the player so a stop that races the start of playback is still honored.
    pub fn stop_signal(&self) -> recap_voice::AbortSignal {
        let flags = self.flags.clone();
        Arc::new(move || flags.stop_requested.load(Ordering::SeqCst))
    }

    /// Polled by the recorder so a picker request aborts an in-progress capture.
    pub fn abort_signal(&self) -> recap_voice::AbortSignal {
        let flags = self.flags.clone();
        Arc::new(move || flags.picker_requested.load(Ordering::SeqCst))
    }

    pub fn modality(&self) -> Modality {
        self.modality
    }

    pub fn tts_enabled(&self) -> bool {
        self.tts_enabled
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn mic_available(&self) -> bool {
        self.mic_available
    }

    /// The microphone failed for good; drop to text for the rest of the session.
    pub fn mark_mic_unavailable(&mut self) {
        self.mic_available = false;
        self.modality = Modality::Text;
    }

    pub fn choices(&self) -> &VariantChoices {
        &self.choices
    }

    pub fn choices_mut(&mut self) -> &mut VariantChoices {
        &mut self.choices
    }
}
