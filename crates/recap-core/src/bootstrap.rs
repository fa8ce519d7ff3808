//! Startup wiring shared by the terminal and the gateway.
//!
//! Every missing resource here is fatal: the process must not start a session without its
//! system prompt or farewell lexicon.

use crate::chat::build_chat_backend;
use crate::config::{BackendKind, RecapConfig};
use crate::coordinator::TurnCoordinator;
use crate::error::{RecapError, RecapResult};
use crate::session::{build_system_preamble, read_resource, ConversationSession, FarewellLexicon};
use crate::speech::SpeechOutput;
use recap_voice::{AudioPlayer, OpenAiCompatStt, OpenAiCompatTts, PlaceholderStt, PlaceholderTts, SttBackend, TtsBackend, VoiceTable};
use std::sync::Arc;
use tracing::{info, warn};

/// Everything loaded once per process and shared by every session.
pub struct Resources {
    pub preamble: String,
    pub farewells: FarewellLexicon,
    pub voices: Arc<VoiceTable>,
}

impl Resources {
    pub fn load(cfg: &RecapConfig) -> RecapResult<Self> {
        let base_prompt = read_resource(&cfg.resources.system_prompt)?;
        let material = match cfg.resources.material {
            Some(ref path) => Some(read_resource(path)?),
            None => None,
        };
        let preamble = build_system_preamble(&base_prompt, material.as_deref());
        let farewells = FarewellLexicon::load(&cfg.resources.farewells)?;
        let voices = match cfg.resources.voices {
            Some(ref path) => VoiceTable::load(path)?,
            None => VoiceTable::builtin(),
        };
        info!(
            preamble_chars = preamble.len(),
            with_material = material.is_some(),
            voices = voices.voice_ids().len(),
            "resources loaded"
        );
        Ok(Self { preamble, farewells, voices: Arc::new(voices) })
    }

    /// A fresh session over the shared preamble and lexicon.
    pub fn new_session(&self, default_language: &str) -> ConversationSession {
        ConversationSession::new(self.preamble.clone(), self.farewells.clone())
            .with_default_language(default_language)
    }
}

pub fn build_stt(cfg: &RecapConfig) -> RecapResult<Arc<dyn SttBackend>> {
    match cfg.stt.backend {
        BackendKind::Placeholder => {
            warn!("speech recognition uses the placeholder backend");
            Ok(Arc::new(PlaceholderStt::new()))
        }
        BackendKind::Http => {
            let stt = OpenAiCompatStt::new(
                cfg.stt.base_url.clone(),
                cfg.stt.resolved_api_key(&cfg.chat),
                cfg.stt.model.clone(),
            )?;
            info!(base_url = %stt.base_url, model = %stt.model, "speech recognition ready");
            Ok(Arc::new(stt))
        }
    }
}

pub fn build_tts(cfg: &RecapConfig) -> RecapResult<Arc<dyn TtsBackend>> {
    match cfg.tts.backend {
        BackendKind::Placeholder => {
            warn!("speech synthesis uses the placeholder backend");
            Ok(Arc::new(PlaceholderTts))
        }
        BackendKind::Http => {
            let mut tts = OpenAiCompatTts::new(
                cfg.tts.base_url.clone(),
                cfg.tts.resolved_api_key(&cfg.chat),
                cfg.tts.model_neural.clone(),
                cfg.tts.model_standard.clone(),
                cfg.tts.sample_rate,
            )?;
            if let Some(ref url) = cfg.tts.voices_url {
                tts = tts.with_voices_url(url.clone());
            }
            Ok(Arc::new(tts))
        }
    }
}

/// Chat backend, speech output and coordinator, in that order.
pub async fn build_coordinator(
    cfg: &RecapConfig,
    resources: &Resources,
    player: Option<Arc<dyn AudioPlayer>>,
) -> RecapResult<TurnCoordinator> {
    let chat = build_chat_backend(&cfg.chat)?;
    let speech = SpeechOutput::load(build_tts(cfg)?, resources.voices.clone(), player).await?;
    Ok(TurnCoordinator::new(chat, cfg.chat.model.clone())
        .with_streaming(cfg.chat.streaming)
        .with_speech(Arc::new(speech))
        .with_farewell_instruction(cfg.session.farewell_instruction.clone()))
}

/// Warm-up wrapper that logs before failing startup.
pub async fn warm_up(cfg: &RecapConfig, coordinator: &TurnCoordinator) -> RecapResult<()> {
    coordinator.warm_up(&cfg.chat.warmup_prompt).await.map_err(|e| {
        tracing::error!(error = %e, "warm-up failed, refusing to start");
        match e {
            RecapError::Warmup(_) => e,
            other => RecapError::Warmup(other.to_string()),
        }
    })
}
