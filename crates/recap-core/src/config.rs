//! Process configuration.
//!
//! Precedence: environment (`RECAP__SECTION__KEY`) > TOML file (`RECAP_CONFIG`, default
//! `config/recap.toml`) > built-in defaults. Credentials come from plain environment
//! variables so they never need to live in the file.

use crate::error::{RecapError, RecapResult};
use recap_voice::{AudioConfig, RecorderConfig, TranscribeOptions};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Read a boolean flag ("true"/"false", case-insensitive).
pub fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => {
            let v = v.trim();
            if v.is_empty() {
                default
            } else {
                v.eq_ignore_ascii_case("true") || v == "1"
            }
        }
        Err(_) => default,
    }
}

/// Read a non-empty, trimmed environment variable.
pub fn env_opt_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatProvider {
    /// Ollama `/api/chat` (NDJSON stream)
    Ollama,
    /// OpenAI-compatible `/chat/completions` (SSE stream)
    #[serde(alias = "openrouter")]
    OpenAi,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub provider: ChatProvider,
    pub base_url: String,
    pub model: String,
    /// Stream replies fragment by fragment; otherwise one batch call per turn.
    pub streaming: bool,
    pub warmup_prompt: String,
    pub api_key: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            provider: ChatProvider::Ollama,
            base_url: "http://localhost:11434".to_string(),
            model: "gemma3:4b".to_string(),
            streaming: true,
            warmup_prompt: "Just answer: Who designed you?".to_string(),
            api_key: None,
        }
    }
}

impl ChatConfig {
    /// Configured key, else `RECAP_LLM_API_KEY`, else `OPENAI_API_KEY`.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| env_opt_string("RECAP_LLM_API_KEY"))
            .or_else(|| env_opt_string("OPENAI_API_KEY"))
    }
}

/// Files loaded once at startup. Missing required files abort the process.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    pub system_prompt: PathBuf,
    /// Reference material appended to the system prompt.
    pub material: Option<PathBuf>,
    pub farewells: PathBuf,
    /// TOML voice table; the built-in table is used when unset.
    pub voices: Option<PathBuf>,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            system_prompt: PathBuf::from("resources/system_prompt.txt"),
            material: None,
            farewells: PathBuf::from("resources/farewells.txt"),
            voices: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecorderSettings {
    pub timeout_secs: f64,
    pub silence_secs: f64,
    pub sample_rate: u32,
    pub frame_ms: u32,
    pub amplitude_threshold: f64,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 255.0,
            silence_secs: 2.5,
            sample_rate: 16000,
            frame_ms: 30,
            amplitude_threshold: 500.0,
        }
    }
}

impl RecorderSettings {
    pub fn recorder_config(&self) -> RecorderConfig {
        RecorderConfig {
            timeout: Duration::from_secs_f64(self.timeout_secs.max(0.0)),
            silence: Duration::from_secs_f64(self.silence_secs.max(0.0)),
            sample_rate: self.sample_rate,
            frame_ms: self.frame_ms,
            amplitude_threshold: self.amplitude_threshold,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Input device name; unset selects the host default.
    pub input_device: Option<String>,
}

/// Where the interactive loop takes its input from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputSource {
    /// Microphone when available, keyboard otherwise.
    Microphone,
    Keyboard,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub input_source: InputSource,
    pub tts_enabled: bool,
    pub default_language: String,
    /// Served sessions play synthesized speech on the server's output device, when it has one.
    pub server_playback: bool,
    pub greeting: String,
    pub farewell_instruction: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            input_source: InputSource::Microphone,
            tts_enabled: true,
            default_language: "en".to_string(),
            server_playback: true,
            greeting: "Hello! I'm RECAP, your AI assistant. How can I help you today?".to_string(),
            farewell_instruction: "The user is done. Respond with one concise, friendly farewell."
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[serde(alias = "openai")]
    Http,
    Placeholder,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SttSettings {
    pub backend: BackendKind,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
}

impl Default for SttSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Http,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "whisper-1".to_string(),
            api_key: None,
        }
    }
}

impl SttSettings {
    /// Configured key, else `STT_API_KEY`, else the chat key chain.
    pub fn resolved_api_key(&self, chat: &ChatConfig) -> String {
        self.api_key
            .clone()
            .or_else(|| env_opt_string("STT_API_KEY"))
            .or_else(|| chat.resolved_api_key())
            .unwrap_or_default()
    }
}

/// The `http` backend sends the voice table's voice ids (Polly names such as `Danielle`), so it
/// needs a server that accepts them; `sample_rate` must match the PCM that server returns.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TtsSettings {
    pub backend: BackendKind,
    pub base_url: String,
    pub model_neural: String,
    pub model_standard: String,
    pub voices_url: Option<String>,
    pub sample_rate: u32,
    pub api_key: Option<String>,
}

impl Default for TtsSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Placeholder,
            base_url: "https://api.openai.com/v1".to_string(),
            model_neural: "tts-1-hd".to_string(),
            model_standard: "tts-1".to_string(),
            voices_url: None,
            sample_rate: 16000,
            api_key: None,
        }
    }
}

impl TtsSettings {
    /// Configured key, else `TTS_API_KEY`, else the chat key chain.
    pub fn resolved_api_key(&self, chat: &ChatConfig) -> String {
        self.api_key
            .clone()
            .or_else(|| env_opt_string("TTS_API_KEY"))
            .or_else(|| chat.resolved_api_key())
            .unwrap_or_default()
    }
}

/// Full process configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RecapConfig {
    pub app_name: String,
    pub bind_addr: String,
    pub port: u16,
    /// Browser client served by the gateway.
    pub static_dir: PathBuf,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub resources: ResourceConfig,
    #[serde(default)]
    pub recorder: RecorderSettings,
    #[serde(default)]
    pub audio: AudioSettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub stt: SttSettings,
    #[serde(default)]
    pub tts: TtsSettings,
}

impl RecapConfig {
    /// Load config from file and environment. Precedence: env > `RECAP_CONFIG` path (or `config/recap`) > defaults.
    pub fn load() -> RecapResult<Self> {
        let config_path = std::env::var("RECAP_CONFIG").unwrap_or_else(|_| "config/recap".to_string());
        Self::load_from(&config_path)
    }

    /// Load with an explicit file stem or path. The file is optional.
    pub fn load_from(config_path: &str) -> RecapResult<Self> {
        debug!(config_path, "loading configuration");
        let built = config::Config::builder()
            .set_default("app_name", "RECAP")?
            .set_default("bind_addr", "127.0.0.1")?
            .set_default("port", 8000_i64)?
            .set_default("static_dir", "static")?
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(
                config::Environment::with_prefix("RECAP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: Self = built.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Values the recorder divides by; zero would leave capture without a time bound.
    fn validate(&self) -> RecapResult<()> {
        if self.recorder.sample_rate == 0 || self.recorder.frame_ms == 0 {
            return Err(RecapError::Config(config::ConfigError::Message(format!(
                "recorder.sample_rate and recorder.frame_ms must be positive (got {} Hz, {} ms)",
                self.recorder.sample_rate, self.recorder.frame_ms
            ))));
        }
        Ok(())
    }

    pub fn audio_config(&self) -> AudioConfig {
        AudioConfig {
            sample_rate: self.recorder.sample_rate,
            channels: 1,
            frame_ms: self.recorder.frame_ms,
            input_device: self.audio.input_device.clone(),
        }
    }

    pub fn transcribe_options(&self) -> TranscribeOptions {
        TranscribeOptions {
            language_hint: None,
            fallback_language: self.session.default_language.clone(),
        }
    }
}
