//! **Speech-to-Text (STT)**: turn a recorded or uploaded audio file into text plus a language code.
//!
//! Implement `SttBackend` for a remote OpenAI-compatible service or a local model. Audio always
//! reaches the backend through a transient file that is deleted once transcription finishes.

use crate::error::{VoiceError, VoiceResult};
use crate::recorder::Utterance;
use async_trait::async_trait;
use serde::Deserialize;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Language code used when the backend does not report one.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Result of one transcription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    pub text: String,
    /// ISO-639 code, e.g. "en"
    pub language: String,
}

impl Transcript {
    pub fn empty(language: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            language: language.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Per-request transcription options.
#[derive(Debug, Clone)]
pub struct TranscribeOptions {
    /// Force a language instead of auto-detecting.
    pub language_hint: Option<String>,
    /// Reported when detection is unavailable.
    pub fallback_language: String,
}

impl Default for TranscribeOptions {
    fn default() -> Self {
        Self {
            language_hint: None,
            fallback_language: DEFAULT_LANGUAGE.to_string(),
        }
    }
}

/// Backend for converting an audio file (WAV, WebM, ...) to text.
#[async_trait]
pub trait SttBackend: Send + Sync {
    /// Transcribe one file. Return an empty transcript if nothing was said.
    async fn transcribe_file(&self, path: &Path, opts: &TranscribeOptions) -> VoiceResult<Transcript>;
}

/// Write `bytes` to a transient file with the given suffix and transcribe it.
/// The file is removed when this returns, whatever the outcome.
pub async fn transcribe_bytes(
    stt: &dyn SttBackend,
    bytes: &[u8],
    suffix: &str,
    opts: &TranscribeOptions,
) -> VoiceResult<Transcript> {
    let mut file = tempfile::Builder::new()
        .prefix("recap-audio-")
        .suffix(suffix)
        .tempfile()?;
    file.write_all(bytes)?;
    file.flush()?;
    debug!(path = %file.path().display(), bytes = bytes.len(), "audio buffered for transcription");
    stt.transcribe_file(file.path(), opts).await
}

/// Transcribe a captured utterance. An utterance with no detected speech yields an empty transcript.
pub async fn transcribe_utterance(
    stt: &dyn SttBackend,
    utterance: &Utterance,
    opts: &TranscribeOptions,
) -> VoiceResult<Transcript> {
    if !utterance.speech_detected || utterance.samples.is_empty() {
        return Ok(Transcript::empty(opts.fallback_language.clone()));
    }
    transcribe_bytes(stt, &utterance.to_wav(), ".wav", opts).await
}

/// Map a detected language (code or English name) to a lowercase ISO code.
pub fn normalize_language(detected: Option<&str>, fallback: &str) -> String {
    let raw = match detected.map(str::trim) {
        Some(s) if !s.is_empty() => s.to_ascii_lowercase(),
        _ => return fallback.to_string(),
    };
    if raw.len() <= 3 && raw.chars().all(|c| c.is_ascii_alphabetic()) {
        return raw;
    }
    let code = match raw.as_str() {
        "arabic" => "ar",
        "catalan" => "ca",
        "chinese" | "mandarin" => "zh",
        "cantonese" => "yue",
        "czech" => "cs",
        "danish" => "da",
        "dutch" => "nl",
        "english" => "en",
        "finnish" => "fi",
        "french" => "fr",
        "german" => "de",
        "hindi" => "hi",
        "icelandic" => "is",
        "italian" => "it",
        "japanese" => "ja",
        "korean" => "ko",
        "norwegian" | "bokmal" => "nb",
        "polish" => "pl",
        "portuguese" => "pt",
        "romanian" => "ro",
        "russian" => "ru",
        "spanish" => "es",
        "swedish" => "sv",
        "turkish" => "tr",
        "welsh" => "cy",
        _ => return fallback.to_string(),
    };
    code.to_string()
}

fn mime_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()) {
        Some(ext) if ext == "wav" => "audio/wav",
        Some(ext) if ext == "webm" => "audio/webm",
        Some(ext) if ext == "ogg" => "audio/ogg",
        Some(ext) if ext == "mp3" => "audio/mpeg",
        _ => "application/octet-stream",
    }
}

/// Placeholder STT: returns a fixed transcript. Use for exercising the loop without a service.
#[derive(Debug, Default)]
pub struct PlaceholderStt {
    /// If set, return this instead of an empty transcript.
    pub response: Option<String>,
}

impl PlaceholderStt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(s: impl Into<String>) -> Self {
        Self { response: Some(s.into()) }
    }
}

#[async_trait]
impl SttBackend for PlaceholderStt {
    async fn transcribe_file(&self, _path: &Path, opts: &TranscribeOptions) -> VoiceResult<Transcript> {
        let language = opts
            .language_hint
            .clone()
            .unwrap_or_else(|| opts.fallback_language.clone());
        Ok(Transcript {
            text: self.response.clone().unwrap_or_default(),
            language,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
    #[serde(default)]
    language: Option<String>,
}

/// Production STT backend: OpenAI-compatible transcription API (OpenAI Whisper, local whisper servers, etc.).
#[derive(Debug, Clone)]
pub struct OpenAiCompatStt {
    /// Base URL without trailing slash (e.g. https://api.openai.com/v1).
    pub base_url: String,
    /// Bearer API key. Empty for keyless local servers.
    pub api_key: String,
    /// Model: whisper-1 or gpt-4o-transcribe, etc.
    pub model: String,
    client: reqwest::Client,
}

impl OpenAiCompatStt {
    /// Create with explicit config.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> VoiceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            client,
        })
    }
}

#[async_trait]
impl SttBackend for OpenAiCompatStt {
    async fn transcribe_file(&self, path: &Path, opts: &TranscribeOptions) -> VoiceResult<Transcript> {
        let bytes = tokio::fs::read(path).await?;
        if bytes.is_empty() {
            return Ok(Transcript::empty(opts.fallback_language.clone()));
        }
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio.wav")
            .to_string();
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime_for(path))
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        let mut form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .text("response_format", "verbose_json")
            .part("file", part);
        if let Some(ref lang) = opts.language_hint {
            form = form.text("language", lang.clone());
        }

        let url = format!("{}/audio/transcriptions", self.base_url.trim_end_matches('/'));
        let mut request = self.client.post(&url).multipart(form);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }
        let res = request
            .send()
            .await
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::Stt(format!("STT API error {}: {}", status, body)));
        }
        let parsed: TranscriptionResponse = res
            .json()
            .await
            .map_err(|e| VoiceError::Stt(format!("bad STT response: {}", e)))?;

        let language = normalize_language(parsed.language.as_deref(), &opts.fallback_language);
        let text = parsed.text.trim().to_string();
        info!(target: "recap::voice", language = %language, chars = text.len(), "📝 transcribed");
        Ok(Transcript { text, language })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::CaptureEnd;
    use std::sync::Mutex;

    /// Records what it was handed so tests can check the transient file lifecycle.
    #[derive(Default)]
    struct RecordingStt {
        seen: Mutex<Vec<(std::path::PathBuf, Vec<u8>)>>,
        fail: bool,
    }

    #[async_trait]
    impl SttBackend for RecordingStt {
        async fn transcribe_file(&self, path: &Path, opts: &TranscribeOptions) -> VoiceResult<Transcript> {
            let bytes = std::fs::read(path)?;
            self.seen.lock().unwrap().push((path.to_path_buf(), bytes));
            if self.fail {
                return Err(VoiceError::Stt("boom".into()));
            }
            Ok(Transcript { text: "hi".into(), language: opts.fallback_language.clone() })
        }
    }

    #[test]
    fn normalize_language_accepts_codes_and_names() {
        assert_eq!(normalize_language(Some("EN"), "en"), "en");
        assert_eq!(normalize_language(Some("spanish"), "en"), "es");
        assert_eq!(normalize_language(Some("Klingon"), "en"), "en");
        assert_eq!(normalize_language(None, "fr"), "fr");
        assert_eq!(normalize_language(Some("  "), "de"), "de");
    }

    #[test]
    fn mime_follows_extension() {
        assert_eq!(mime_for(Path::new("a.wav")), "audio/wav");
        assert_eq!(mime_for(Path::new("a.WEBM")), "audio/webm");
        assert_eq!(mime_for(Path::new("a")), "application/octet-stream");
    }

    #[tokio::test]
    async fn transient_file_is_removed_after_success_and_failure() {
        for fail in [false, true] {
            let stt = RecordingStt { fail, ..Default::default() };
            let result = transcribe_bytes(&stt, b"blob", ".webm", &TranscribeOptions::default()).await;
            assert_eq!(result.is_ok(), !fail);

            let seen = stt.seen.lock().unwrap();
            assert_eq!(seen.len(), 1);
            assert_eq!(seen[0].1, b"blob");
            assert!(!seen[0].0.exists(), "transient file should be deleted");
        }
    }

    #[tokio::test]
    async fn silent_utterance_skips_backend() {
        let stt = RecordingStt::default();
        let utterance = Utterance {
            samples: vec![0; 480],
            sample_rate: 16000,
            elapsed: Duration::from_millis(30),
            speech_detected: false,
            ended_by: CaptureEnd::Timeout,
            captured_at: chrono::Utc::now(),
        };
        let transcript = transcribe_utterance(&stt, &utterance, &TranscribeOptions::default())
            .await
            .unwrap();
        assert!(transcript.is_empty());
        assert!(stt.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn placeholder_reports_hint_language() {
        let stt = PlaceholderStt::with_response("bonjour");
        let opts = TranscribeOptions {
            language_hint: Some("fr".into()),
            ..Default::default()
        };
        let t = stt.transcribe_file(Path::new("unused.wav"), &opts).await.unwrap();
        assert_eq!(t.text, "bonjour");
        assert_eq!(t.language, "fr");
    }
}
