//! Chat backends: role-tagged turns in, reply text (or a stream of fragments) out.
//!
//! Two wire formats are supported. Ollama streams newline-delimited JSON objects; the
//! OpenAI-compatible API streams server-sent events (`data: {...}` lines ending in `[DONE]`).
//! Both share one line-buffering stream so fragments split across network chunks survive.

use crate::config::{ChatConfig, ChatProvider};
use crate::error::{RecapError, RecapResult};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged message. Immutable once appended to a history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Incremental reply fragments. Ends when the backend signals completion.
pub type FragmentStream = Pin<Box<dyn Stream<Item = RecapResult<String>> + Send>>;

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// One complete reply.
    async fn chat(&self, model: &str, messages: &[Turn]) -> RecapResult<String>;

    /// Reply as a stream of text fragments.
    async fn chat_stream(&self, model: &str, messages: &[Turn]) -> RecapResult<FragmentStream>;
}

/// Build the backend named by the config.
pub fn build_chat_backend(cfg: &ChatConfig) -> RecapResult<Arc<dyn ChatBackend>> {
    let backend: Arc<dyn ChatBackend> = match cfg.provider {
        ChatProvider::Ollama => Arc::new(OllamaChat::new(&cfg.base_url)?),
        ChatProvider::OpenAi => Arc::new(OpenAiCompatChat::new(
            &cfg.base_url,
            cfg.resolved_api_key().unwrap_or_default(),
        )?),
    };
    info!(provider = ?cfg.provider, model = %cfg.model, base_url = %cfg.base_url, "chat backend ready");
    Ok(backend)
}

fn http_client() -> RecapResult<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()?)
}

async fn ensure_success(res: reqwest::Response) -> RecapResult<reqwest::Response> {
    if res.status().is_success() {
        return Ok(res);
    }
    let status = res.status();
    let body = res.text().await.unwrap_or_default();
    Err(RecapError::Chat(format!("API error {}: {}", status, body)))
}

/// What one streamed line contributed.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LineEvent {
    Fragment(String),
    Done,
    Skip,
}

/// Splits a byte stream into lines, carrying partial lines across chunks.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..line.len() - 1]);
            lines.push(text.trim_end_matches('\r').to_string());
        }
        lines
    }

    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string())
    }
}

/// Turn a byte stream into a fragment stream using a per-line parser.
fn fragment_stream<S, B, E>(body: S, parse: fn(&str) -> RecapResult<LineEvent>) -> FragmentStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<RecapError> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut body = Box::pin(body);
        let mut lines = LineBuffer::default();
        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(e.into());
                    return;
                }
            };
            for line in lines.push(chunk.as_ref()) {
                match parse(&line) {
                    Ok(LineEvent::Fragment(text)) => yield Ok(text),
                    Ok(LineEvent::Done) => return,
                    Ok(LineEvent::Skip) => {}
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        }
        if let Some(line) = lines.finish() {
            match parse(&line) {
                Ok(LineEvent::Fragment(text)) => yield Ok(text),
                Ok(_) => {}
                Err(e) => yield Err(e),
            }
        }
    };
    Box::pin(stream)
}

// ── Ollama ────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: &'a [Turn],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaChunk {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

fn parse_ollama_line(line: &str) -> RecapResult<LineEvent> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(LineEvent::Skip);
    }
    let chunk: OllamaChunk = serde_json::from_str(line)?;
    if let Some(err) = chunk.error {
        return Err(RecapError::Chat(err));
    }
    let text = chunk.message.map(|m| m.content).unwrap_or_default();
    if !text.is_empty() {
        // Ollama may attach the last fragment to the done chunk.
        return Ok(LineEvent::Fragment(text));
    }
    if chunk.done {
        Ok(LineEvent::Done)
    } else {
        Ok(LineEvent::Skip)
    }
}

/// Local Ollama server (`/api/chat`).
#[derive(Debug, Clone)]
pub struct OllamaChat {
    base_url: String,
    client: reqwest::Client,
}

impl OllamaChat {
    pub fn new(base_url: &str) -> RecapResult<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: http_client()?,
        })
    }

    async fn post(&self, model: &str, messages: &[Turn], stream: bool) -> RecapResult<reqwest::Response> {
        let url = format!("{}/api/chat", self.base_url);
        debug!(model, messages = messages.len(), stream, "ollama chat request");
        let res = self
            .client
            .post(&url)
            .json(&OllamaRequest { model, messages, stream })
            .send()
            .await?;
        ensure_success(res).await
    }
}

#[async_trait]
impl ChatBackend for OllamaChat {
    async fn chat(&self, model: &str, messages: &[Turn]) -> RecapResult<String> {
        let res = self.post(model, messages, false).await?;
        let chunk: OllamaChunk = res.json().await?;
        if let Some(err) = chunk.error {
            return Err(RecapError::Chat(err));
        }
        Ok(chunk.message.map(|m| m.content).unwrap_or_default())
    }

    async fn chat_stream(&self, model: &str, messages: &[Turn]) -> RecapResult<FragmentStream> {
        let res = self.post(model, messages, true).await?;
        Ok(fragment_stream(res.bytes_stream(), parse_ollama_line))
    }
}

// ── OpenAI-compatible ─────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Turn],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

fn parse_sse_line(line: &str) -> RecapResult<LineEvent> {
    let data = match line.trim().strip_prefix("data:") {
        Some(data) => data.trim(),
        None => return Ok(LineEvent::Skip),
    };
    if data == "[DONE]" {
        return Ok(LineEvent::Done);
    }
    if data.is_empty() {
        return Ok(LineEvent::Skip);
    }
    let json: serde_json::Value = serde_json::from_str(data)?;
    if let Some(err) = json.get("error") {
        return Err(RecapError::Chat(err.to_string()));
    }
    match json["choices"][0]["delta"]["content"].as_str() {
        Some(text) if !text.is_empty() => Ok(LineEvent::Fragment(text.to_string())),
        _ => Ok(LineEvent::Skip),
    }
}

/// OpenAI-compatible `/chat/completions` (OpenAI, OpenRouter, vLLM, ...).
#[derive(Debug, Clone)]
pub struct OpenAiCompatChat {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatChat {
    pub fn new(base_url: &str, api_key: impl Into<String>) -> RecapResult<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: http_client()?,
        })
    }

    async fn post(&self, model: &str, messages: &[Turn], stream: bool) -> RecapResult<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(model, messages = messages.len(), stream, "chat completion request");
        let mut request = self
            .client
            .post(&url)
            .json(&CompletionRequest { model, messages, stream });
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }
        ensure_success(request.send().await?).await
    }
}

#[async_trait]
impl ChatBackend for OpenAiCompatChat {
    async fn chat(&self, model: &str, messages: &[Turn]) -> RecapResult<String> {
        let res = self.post(model, messages, false).await?;
        let body: CompletionResponse = res.json().await?;
        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content.unwrap_or_default())
            .ok_or_else(|| RecapError::Chat("no choices in response".to_string()))
    }

    async fn chat_stream(&self, model: &str, messages: &[Turn]) -> RecapResult<FragmentStream> {
        let res = self.post(model, messages, true).await?;
        Ok(fragment_stream(res.bytes_stream(), parse_sse_line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    async fn collect(stream: FragmentStream) -> Vec<RecapResult<String>> {
        stream.collect().await
    }

    fn chunks(parts: &[&str]) -> impl Stream<Item = Result<Vec<u8>, RecapError>> + Send + 'static {
        let owned: Vec<Result<Vec<u8>, RecapError>> =
            parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        stream::iter(owned)
    }

    #[test]
    fn turns_serialize_with_lowercase_roles() {
        let json = serde_json::to_string(&Turn::assistant("hi")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
    }

    #[test]
    fn line_buffer_joins_split_lines() {
        let mut buf = LineBuffer::default();
        assert!(buf.push(b"{\"a\":").is_empty());
        assert_eq!(buf.push(b"1}\r\n{\"b\""), vec!["{\"a\":1}".to_string()]);
        assert_eq!(buf.finish(), Some("{\"b\"".to_string()));
        assert_eq!(buf.finish(), None);
    }

    #[test]
    fn ollama_lines_parse() {
        assert_eq!(
            parse_ollama_line(r#"{"message":{"role":"assistant","content":"Hi"},"done":false}"#).unwrap(),
            LineEvent::Fragment("Hi".into())
        );
        assert_eq!(
            parse_ollama_line(r#"{"message":{"role":"assistant","content":""},"done":true}"#).unwrap(),
            LineEvent::Done
        );
        assert!(parse_ollama_line(r#"{"error":"model not found"}"#).is_err());
        assert_eq!(parse_ollama_line("  ").unwrap(), LineEvent::Skip);
    }

    #[test]
    fn sse_lines_parse() {
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#).unwrap(),
            LineEvent::Fragment("Hel".into())
        );
        assert_eq!(parse_sse_line("data: [DONE]").unwrap(), LineEvent::Done);
        assert_eq!(parse_sse_line(": keepalive").unwrap(), LineEvent::Skip);
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(),
            LineEvent::Skip
        );
    }

    #[tokio::test]
    async fn ollama_stream_survives_chunk_boundaries() {
        let body = chunks(&[
            "{\"message\":{\"content\":\"Hel\"},\"done\":false}\n{\"message\":{\"con",
            "tent\":\"lo\"},\"done\":false}\n",
            "{\"message\":{\"content\":\"\"},\"done\":true}\n",
        ]);
        let out: Vec<String> = collect(fragment_stream(body, parse_ollama_line))
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(out, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn sse_stream_stops_at_done() {
        let body = chunks(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n",
            "data: [DONE]\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n",
        ]);
        let out: Vec<String> = collect(fragment_stream(body, parse_sse_line))
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(out, vec!["a"]);
    }

    #[tokio::test]
    async fn stream_error_ends_the_stream() {
        let body = chunks(&["{\"message\":{\"content\":\"x\"}}\n", "{\"error\":\"oom\"}\n", "{\"message\":{\"content\":\"y\"}}\n"]);
        let out = collect(fragment_stream(body, parse_ollama_line)).await;
        assert_eq!(out.len(), 2);
        assert!(out[0].is_ok());
        assert!(matches!(out[1], Err(RecapError::Chat(_))));
    }
}
