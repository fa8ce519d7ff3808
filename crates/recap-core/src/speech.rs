//! Speech output: language → voice → engine → PCM → playback.
//!
//! Every failure on this path is non-fatal. A synthesis error or an empty result is logged and
//! the turn carries on without audio.

use crate::error::{RecapError, RecapResult};
use crate::mode::SessionState;
use crate::picker::{run_picker, LanguagePicker, PromptIo};
use recap_voice::audio::pcm_bytes_to_i16;
use recap_voice::{AudioPlayer, EngineCatalog, Resolution, ResolvedVoice, TtsBackend, VoiceTable};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Why nothing was played.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    NoPlayer,
    BlankText,
    SynthesisFailed,
    EmptyAudio,
    Stopped,
    PlaybackFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechOutcome {
    Played { voice: ResolvedVoice, engine: String },
    Skipped(SkipReason),
}

pub struct SpeechOutput {
    tts: Arc<dyn TtsBackend>,
    table: Arc<VoiceTable>,
    engines: EngineCatalog,
    player: Option<Arc<dyn AudioPlayer>>,
}

impl SpeechOutput {
    pub fn new(
        tts: Arc<dyn TtsBackend>,
        table: Arc<VoiceTable>,
        engines: EngineCatalog,
        player: Option<Arc<dyn AudioPlayer>>,
    ) -> Self {
        Self { tts, table, engines, player }
    }

    /// Fetch engine capabilities once and build the output. A failed listing is fatal at startup.
    pub async fn load(
        tts: Arc<dyn TtsBackend>,
        table: Arc<VoiceTable>,
        player: Option<Arc<dyn AudioPlayer>>,
    ) -> RecapResult<Self> {
        let descriptions = tts.describe_voices().await?;
        let engines = EngineCatalog::from_descriptions(descriptions);
        info!(voices_with_engines = engines.len(), "speech output ready");
        Ok(Self::new(tts, table, engines, player))
    }

    pub fn table(&self) -> &Arc<VoiceTable> {
        &self.table
    }

    pub fn player(&self) -> Option<&Arc<dyn AudioPlayer>> {
        self.player.as_ref()
    }

    /// Resolve a voice, asking the user to pick a variant when the code is ambiguous and an
    /// interactive prompt is available.
    pub async fn resolve_voice(
        &self,
        language: &str,
        state: &mut SessionState,
        io: Option<&mut dyn PromptIo>,
    ) -> ResolvedVoice {
        match self.table.resolve(language, state.choices()) {
            Resolution::Voice(voice) => voice,
            Resolution::Ambiguous { base, candidates } => {
                let io = match io {
                    Some(io) => io,
                    None => return self.table.resolve_unattended(language, state.choices()),
                };
                io.show(&format!("Multiple '{}' voices available.", base));
                let picker = LanguagePicker::for_candidates(&self.table, &base, candidates);
                match run_picker(picker, io, state.choices_mut()).await {
                    Some(locale) => self
                        .table
                        .voice_for(&locale)
                        .map(|voice_id| ResolvedVoice {
                            locale: locale.clone(),
                            voice_id: voice_id.to_string(),
                        })
                        .unwrap_or_else(|| self.table.default_voice()),
                    None => self.table.resolve_unattended(language, state.choices()),
                }
            }
        }
    }

    /// Synthesize the full text once and play it, unless disabled or stopped.
    pub async fn speak(
        &self,
        text: &str,
        language: &str,
        state: &mut SessionState,
        io: Option<&mut dyn PromptIo>,
    ) -> SpeechOutcome {
        if !state.tts_enabled() {
            return SpeechOutcome::Skipped(SkipReason::Disabled);
        }
        let player = match self.player {
            Some(ref player) => player.clone(),
            None => return SpeechOutcome::Skipped(SkipReason::NoPlayer),
        };
        if text.trim().is_empty() {
            return SpeechOutcome::Skipped(SkipReason::BlankText);
        }

        let voice = self.resolve_voice(language, state, io).await;
        let engine = self.engines.select_engine(&voice.voice_id);

        let pcm = match self.tts.synthesize(text, &voice, &engine).await {
            Ok(pcm) => pcm,
            Err(e) => {
                warn!(target: "recap::voice", voice = %voice.voice_id, error = %e, "synthesis failed");
                return SpeechOutcome::Skipped(SkipReason::SynthesisFailed);
            }
        };
        if pcm.is_empty() {
            warn!(target: "recap::voice", voice = %voice.voice_id, "synthesis returned no audio");
            return SpeechOutcome::Skipped(SkipReason::EmptyAudio);
        }

        // Checked immediately before the blocking call so a stop that raced synthesis wins.
        if state.stop_requested() {
            debug!("stop requested before playback");
            return SpeechOutcome::Skipped(SkipReason::Stopped);
        }

        let samples = pcm_bytes_to_i16(&pcm);
        let sample_rate = self.tts.sample_rate();
        let stop = state.stop_signal();
        let played =
            tokio::task::spawn_blocking(move || player.play(&samples, sample_rate, &|| stop())).await;
        match played {
            Ok(Ok(())) if state.stop_requested() => {
                debug!("playback stopped");
                SpeechOutcome::Skipped(SkipReason::Stopped)
            }
            Ok(Ok(())) => SpeechOutcome::Played { voice, engine },
            Ok(Err(e)) => {
                warn!(target: "recap::voice", error = %e, "playback failed");
                SpeechOutcome::Skipped(SkipReason::PlaybackFailed)
            }
            Err(e) => {
                warn!(target: "recap::voice", error = %e, "playback task failed");
                SpeechOutcome::Skipped(SkipReason::PlaybackFailed)
            }
        }
    }

    /// One synthesis with the default voice, discarded. Failure aborts startup.
    pub async fn warm_up(&self) -> RecapResult<()> {
        let voice = self.table.default_voice();
        let engine = self.engines.select_engine(&voice.voice_id);
        self.tts
            .synthesize("TTS warmup", &voice, &engine)
            .await
            .map(|_| ())
            .map_err(|e| RecapError::Warmup(format!("speech synthesis: {}", e)))
    }
}
