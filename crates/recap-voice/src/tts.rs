//! **Text-to-Speech (TTS)** backends.
//!
//! A backend turns text into raw 16-bit mono PCM at its advertised sample rate. An empty result
//! is a valid outcome: the caller logs it and skips playback.

use crate::error::{VoiceError, VoiceResult};
use crate::voices::{ResolvedVoice, VoiceDescription};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

/// Backend that turns text into PCM bytes (s16le, mono).
#[async_trait]
pub trait TtsBackend: Send + Sync {
    /// Synthesize `text` with the given voice and engine tier. Return empty bytes to skip playback.
    async fn synthesize(&self, text: &str, voice: &ResolvedVoice, engine: &str) -> VoiceResult<Vec<u8>>;

    /// Per-voice engine capabilities. Backends without a listing return nothing.
    async fn describe_voices(&self) -> VoiceResult<Vec<VoiceDescription>> {
        Ok(Vec::new())
    }

    /// Sample rate of the PCM returned by `synthesize`.
    fn sample_rate(&self) -> u32 {
        16000
    }
}

/// Placeholder TTS: returns empty audio so nothing plays.
#[derive(Debug, Default)]
pub struct PlaceholderTts;

#[async_trait]
impl TtsBackend for PlaceholderTts {
    async fn synthesize(&self, _text: &str, _voice: &ResolvedVoice, _engine: &str) -> VoiceResult<Vec<u8>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum VoiceListing {
    Wrapped {
        #[serde(rename = "Voices", alias = "voices")]
        voices: Vec<VoiceDescription>,
    },
    Bare(Vec<VoiceDescription>),
}

impl VoiceListing {
    fn into_voices(self) -> Vec<VoiceDescription> {
        match self {
            VoiceListing::Wrapped { voices } => voices,
            VoiceListing::Bare(voices) => voices,
        }
    }
}

/// Production TTS backend: OpenAI-compatible `/audio/speech` endpoint returning raw PCM.
/// The engine tier picks the model (`model_neural` for "neural", `model_standard` otherwise) and
/// is also forwarded as `engine` for servers that understand it.
#[derive(Debug, Clone)]
pub struct OpenAiCompatTts {
    /// Base URL without trailing slash (e.g. https://api.openai.com/v1).
    pub base_url: String,
    /// Bearer API key. Empty for keyless local servers.
    pub api_key: String,
    /// Model for the "neural" tier (e.g. tts-1-hd).
    pub model_neural: String,
    /// Model for every other tier (e.g. tts-1).
    pub model_standard: String,
    /// Optional voice listing endpoint (Polly `DescribeVoices` shape).
    pub voices_url: Option<String>,
    /// Requested PCM sample rate.
    pub sample_rate: u32,
    client: reqwest::Client,
}

impl OpenAiCompatTts {
    /// Create with explicit config.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model_neural: impl Into<String>,
        model_standard: impl Into<String>,
        sample_rate: u32,
    ) -> VoiceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| VoiceError::Tts(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model_neural: model_neural.into(),
            model_standard: model_standard.into(),
            voices_url: None,
            sample_rate,
            client,
        })
    }

    /// Set the voice listing endpoint.
    pub fn with_voices_url(mut self, url: impl Into<String>) -> Self {
        self.voices_url = Some(url.into());
        self
    }

    fn model_for(&self, engine: &str) -> &str {
        if engine.eq_ignore_ascii_case("neural") {
            &self.model_neural
        } else {
            &self.model_standard
        }
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            request
        } else {
            request.bearer_auth(&self.api_key)
        }
    }
}

#[async_trait]
impl TtsBackend for OpenAiCompatTts {
    async fn synthesize(&self, text: &str, voice: &ResolvedVoice, engine: &str) -> VoiceResult<Vec<u8>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/audio/speech", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model_for(engine),
            "input": text,
            "voice": voice.voice_id,
            "engine": engine,
            "language_code": voice.locale,
            "response_format": "pcm",
            "sample_rate": self.sample_rate,
        });
        debug!(voice = %voice.voice_id, engine, chars = text.len(), "requesting speech");
        let res = self
            .authorized(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| VoiceError::Tts(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::Tts(format!("TTS API error {}: {}", status, body)));
        }
        let bytes = res.bytes().await.map_err(|e| VoiceError::Tts(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn describe_voices(&self) -> VoiceResult<Vec<VoiceDescription>> {
        let url = match self.voices_url {
            Some(ref url) => url,
            None => return Ok(Vec::new()),
        };
        let res = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(|e| VoiceError::Tts(e.to_string()))?;
        if !res.status().is_success() {
            return Err(VoiceError::Tts(format!("voice listing failed: {}", res.status())));
        }
        let listing: VoiceListing = res
            .json()
            .await
            .map_err(|e| VoiceError::Tts(format!("bad voice listing: {}", e)))?;
        let voices = listing.into_voices();
        info!(target: "recap::voice", voices = voices.len(), "voice capabilities fetched");
        Ok(voices)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
