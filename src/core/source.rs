//! Completion sources
//!
//! - `OpenAiBackend`: OpenAI-compatible chat completions (SSE when streaming)
//! - `OllamaBackend`: local `/api/generate` (NDJSON when streaming)
//! - `ScriptedSource` / `EchoSource`: in-memory, deterministic
//! - `FailoverRouter`: tries backends in priority order

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use serde_json::Value;

use crate::config::GasketConfig;
use crate::error::{GasketError, GasketResult};

/// Fragments of one completion, in order
pub type FragmentStream = BoxStream<'static, GasketResult<String>>;

/// A text-generation backend
#[async_trait]
pub trait CompletionSource: Send + Sync {
    /// Short label for logs
    fn name(&self) -> &str;

    /// One full completion
    async fn generate(&self, prompt: &str, system: &str) -> GasketResult<String>;

    /// Open a fragment stream. Errors here mean the stream never started.
    async fn stream(&self, prompt: &str, system: &str) -> GasketResult<FragmentStream>;
}

// =============================================================================
// WIRE HELPERS
// =============================================================================

/// Split a byte stream into lines (without the terminator)
fn line_stream(bytes: BoxStream<'static, GasketResult<Vec<u8>>>) -> FragmentStream {
    stream::unfold(
        (bytes, Vec::<u8>::new(), false),
        |(mut bytes, mut buf, mut eof)| async move {
            loop {
                if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=pos).collect();
                    let text = String::from_utf8_lossy(&line)
                        .trim_end_matches(&['\r', '\n'][..])
                        .to_string();
                    return Some((Ok(text), (bytes, buf, eof)));
                }
                if eof {
                    if buf.is_empty() {
                        return None;
                    }
                    let text = String::from_utf8_lossy(&buf).to_string();
                    buf.clear();
                    return Some((Ok(text), (bytes, buf, eof)));
                }
                match bytes.next().await {
                    Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        buf.clear();
                        return Some((Err(e), (bytes, buf, true)));
                    }
                    None => eof = true,
                }
            }
        },
    )
    .boxed()
}

fn body_stream(response: reqwest::Response) -> BoxStream<'static, GasketResult<Vec<u8>>> {
    response
        .bytes_stream()
        .map(|chunk| chunk.map(|b| b.to_vec()).map_err(GasketError::from))
        .boxed()
}

/// `data: {...}` → delta content; `None` for keep-alives and empty deltas
fn parse_sse_line(line: &str) -> GasketResult<Option<String>> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return Ok(None);
    }
    let value: Value = serde_json::from_str(data)?;
    Ok(value["choices"][0]["delta"]["content"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string))
}

/// `{"response": "...", "done": false}` → response text
fn parse_ndjson_line(line: &str) -> GasketResult<Option<String>> {
    if line.trim().is_empty() {
        return Ok(None);
    }
    let value: Value = serde_json::from_str(line)?;
    if let Some(err) = value["error"].as_str() {
        return Err(GasketError::Backend(err.to_string()));
    }
    Ok(value["response"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string))
}

async fn check_status(response: reqwest::Response, who: &str) -> GasketResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(GasketError::Backend(format!("{who} returned {status}: {body}")))
}

// =============================================================================
// OPENAI-COMPATIBLE
// =============================================================================

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    stream: bool,
}

/// OpenAI chat completions
#[derive(Clone)]
pub struct OpenAiBackend {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: String,
    timeout: Duration,
}

impl std::fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field("url", &self.url)
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAiBackend {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(
        url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> GasketResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Self::DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| GasketError::Config(format!("openai client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            model: model.into(),
            api_key: api_key.into(),
            timeout: Self::DEFAULT_TIMEOUT,
        })
    }

    fn request<'a>(&'a self, prompt: &'a str, system: &'a str, stream: bool) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: prompt },
            ],
            temperature: 0.7,
            stream,
        }
    }
}

#[async_trait]
impl CompletionSource for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, prompt: &str, system: &str) -> GasketResult<String> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&self.request(prompt, system, false))
            .send()
            .await?;
        let value: Value = check_status(response, "openai").await?.json().await?;
        value["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| GasketError::Backend("openai response missing content".to_string()))
    }

    async fn stream(&self, prompt: &str, system: &str) -> GasketResult<FragmentStream> {
        let send = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&self.request(prompt, system, true))
            .send();
        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| GasketError::Timeout {
                operation: "openai stream open".to_string(),
                millis: self.timeout.as_millis() as u64,
            })??;
        let response = check_status(response, "openai").await?;

        Ok(line_stream(body_stream(response))
            .take_while(|line| {
                let done = matches!(line, Ok(l) if l.trim() == "data: [DONE]");
                futures_util::future::ready(!done)
            })
            .filter_map(|line| {
                futures_util::future::ready(match line {
                    Ok(l) => parse_sse_line(&l).transpose(),
                    Err(e) => Some(Err(e)),
                })
            })
            .boxed())
    }
}

// =============================================================================
// OLLAMA
// =============================================================================

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
}

/// Local Ollama `/api/generate`
#[derive(Debug, Clone)]
pub struct OllamaBackend {
    client: reqwest::Client,
    url: String,
    model: String,
    timeout: Duration,
}

impl OllamaBackend {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(url: impl Into<String>, model: impl Into<String>) -> GasketResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Self::DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| GasketError::Config(format!("ollama client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            model: model.into(),
            timeout: Self::DEFAULT_TIMEOUT,
        })
    }

    fn request(&self, prompt: &str, system: &str, stream: bool) -> GenerateRequest<'_> {
        GenerateRequest {
            model: &self.model,
            prompt: format!("{system}\n\nUser: {prompt}\nAssistant:"),
            stream,
        }
    }
}

#[async_trait]
impl CompletionSource for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, prompt: &str, system: &str) -> GasketResult<String> {
        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&self.request(prompt, system, false))
            .send()
            .await?;
        let value: Value = check_status(response, "ollama").await?.json().await?;
        value["response"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| GasketError::Backend("ollama response missing text".to_string()))
    }

    async fn stream(&self, prompt: &str, system: &str) -> GasketResult<FragmentStream> {
        let send = self
            .client
            .post(&self.url)
            .json(&self.request(prompt, system, true))
            .send();
        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| GasketError::Timeout {
                operation: "ollama stream open".to_string(),
                millis: self.timeout.as_millis() as u64,
            })??;
        let response = check_status(response, "ollama").await?;

        Ok(line_stream(body_stream(response))
            .filter_map(|line| {
                futures_util::future::ready(match line {
                    Ok(l) => parse_ndjson_line(&l).transpose(),
                    Err(e) => Some(Err(e)),
                })
            })
            .boxed())
    }
}

// =============================================================================
// IN-MEMORY
// =============================================================================

/// Longest fragment prefix that `text` ends with, then the next `lookahead`
/// fragments.
fn continue_script(fragments: &[String], text: &str, lookahead: usize) -> String {
    let mut consumed = 0;
    let mut prefix = String::new();
    for (i, fragment) in fragments.iter().enumerate() {
        prefix.push_str(fragment);
        if text.ends_with(&prefix) {
            consumed = i + 1;
        }
    }
    fragments
        .iter()
        .skip(consumed)
        .take(lookahead)
        .map(String::as_str)
        .collect()
}

/// Whitespace-preserving word split
fn split_words(text: &str) -> Vec<String> {
    text.split_inclusive(char::is_whitespace)
        .map(str::to_string)
        .collect()
}

/// Replays a fixed fragment list.
///
/// `generate` continues the script from wherever the prompt leaves off, so
/// alternates agree exactly with the streamed text.
#[derive(Debug, Clone)]
pub struct ScriptedSource {
    fragments: Vec<String>,
    lookahead: usize,
}

impl ScriptedSource {
    pub fn new<S: Into<String>>(fragments: impl IntoIterator<Item = S>) -> Self {
        Self {
            fragments: fragments.into_iter().map(Into::into).collect(),
            lookahead: crate::BUFFER_SIZE,
        }
    }

    /// Fragments returned per `generate` call
    pub fn with_lookahead(mut self, lookahead: usize) -> Self {
        self.lookahead = lookahead;
        self
    }
}

#[async_trait]
impl CompletionSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &str, _system: &str) -> GasketResult<String> {
        Ok(continue_script(&self.fragments, prompt, self.lookahead))
    }

    async fn stream(&self, _prompt: &str, _system: &str) -> GasketResult<FragmentStream> {
        Ok(stream::iter(self.fragments.clone().into_iter().map(Ok)).boxed())
    }
}

/// Streams the prompt back word by word (offline demo)
#[derive(Debug, Clone)]
pub struct EchoSource {
    lookahead: usize,
}

impl EchoSource {
    pub fn new(lookahead: usize) -> Self {
        Self { lookahead }
    }
}

impl Default for EchoSource {
    fn default() -> Self {
        Self::new(crate::BUFFER_SIZE)
    }
}

#[async_trait]
impl CompletionSource for EchoSource {
    fn name(&self) -> &str {
        "echo"
    }

    /// `text` is `prompt + released`, where `released` is a word prefix of
    /// `prompt`. Find the longest such split and continue from it.
    async fn generate(&self, text: &str, _system: &str) -> GasketResult<String> {
        let len = text.len();
        for released_len in (0..=len / 2).rev() {
            let split = len - released_len;
            if !text.is_char_boundary(split) {
                continue;
            }
            let (prompt, released) = text.split_at(split);
            if !prompt.starts_with(released) {
                continue;
            }
            let words = split_words(prompt);
            let mut acc = String::new();
            for (i, word) in std::iter::once("").chain(words.iter().map(String::as_str)).enumerate() {
                acc.push_str(word);
                if acc == released {
                    return Ok(words.iter().skip(i).take(self.lookahead).map(String::as_str).collect());
                }
                if acc.len() >= released.len() {
                    break;
                }
            }
        }
        Ok(String::new())
    }

    async fn stream(&self, prompt: &str, _system: &str) -> GasketResult<FragmentStream> {
        Ok(stream::iter(split_words(prompt).into_iter().map(Ok)).boxed())
    }
}

// =============================================================================
// FAILOVER
// =============================================================================

/// Priority-ordered backends.
///
/// `generate` falls back on any error. `stream` falls back only when a
/// stream cannot be opened; a stream that fails midway is not restarted on
/// another backend.
#[derive(Clone)]
pub struct FailoverRouter {
    backends: Vec<Arc<dyn CompletionSource>>,
}

impl FailoverRouter {
    pub fn new(backends: Vec<Arc<dyn CompletionSource>>) -> Self {
        Self { backends }
    }

    /// OpenAI first when a key is configured, local model second
    pub fn from_config(config: &GasketConfig) -> GasketResult<Self> {
        let mut backends: Vec<Arc<dyn CompletionSource>> = Vec::new();
        if let Some(key) = &config.openai_key {
            backends.push(Arc::new(OpenAiBackend::new(
                &config.openai_url,
                &config.openai_model,
                key,
            )?));
        }
        backends.push(Arc::new(OllamaBackend::new(&config.local_url, &config.local_model)?));
        Ok(Self::new(backends))
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

#[async_trait]
impl CompletionSource for FailoverRouter {
    fn name(&self) -> &str {
        "failover"
    }

    async fn generate(&self, prompt: &str, system: &str) -> GasketResult<String> {
        let mut failures = Vec::new();
        for backend in &self.backends {
            match backend.generate(prompt, system).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    tracing::warn!(backend = backend.name(), error = %e, "generate failed, failing over");
                    failures.push(format!("{}: {e}", backend.name()));
                }
            }
        }
        tracing::error!("all completion backends failed");
        Err(GasketError::Backend(format!(
            "all backends failed [{}]",
            failures.join("; ")
        )))
    }

    async fn stream(&self, prompt: &str, system: &str) -> GasketResult<FragmentStream> {
        let mut failures = Vec::new();
        for backend in &self.backends {
            match backend.stream(prompt, system).await {
                Ok(stream) => {
                    tracing::debug!(backend = backend.name(), "stream opened");
                    return Ok(stream);
                }
                Err(e) => {
                    tracing::warn!(backend = backend.name(), error = %e, "stream open failed, failing over");
                    failures.push(format!("{}: {e}", backend.name()));
                }
            }
        }
        tracing::error!("all completion backends failed to stream");
        Err(GasketError::Backend(format!(
            "all backends failed [{}]",
            failures.join("; ")
        )))
    }
}
