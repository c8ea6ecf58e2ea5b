//! Ollama `/api/generate` client.
//!
//! Non-streaming requests return one JSON object `{response, done}`.
//! Streaming requests return newline-delimited JSON objects, each carrying a
//! `response` fragment, ending with one where `done` is true.

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::OllamaConfig;
use crate::error::BackendError;

/// One object from the generate endpoint.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GenerateChunk {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<String>,
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<GenerateChunk, BackendError>> + Send>>;

pub struct OllamaClient {
    client: Client,
    url: String,
    model: String,
    temperature: f32,
    stream: bool,
    request_timeout: Duration,
}

impl OllamaClient {
    pub fn new(config: &OllamaConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            url: format!("{}/api/generate", config.endpoint()),
            model: config.model.clone(),
            temperature: config.temperature,
            stream: config.stream,
            request_timeout: Duration::from_secs(config.request_timeout),
        })
    }

    pub fn is_streaming(&self) -> bool {
        self.stream
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn post(&self, prompt: &str, stream: bool) -> Result<Response, BackendError> {
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": stream,
            "options": {
                "temperature": self.temperature
            }
        });

        let mut request = self.client.post(&self.url).json(&body);
        if !stream {
            request = request.timeout(self.request_timeout);
        }

        let resp = request.send().await.map_err(|e| self.classify(e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BackendError::Status(status.as_u16(), body.trim().to_string()));
        }
        Ok(resp)
    }

    fn classify(&self, e: reqwest::Error) -> BackendError {
        if e.is_connect() {
            BackendError::Connect(self.url.clone())
        } else if e.is_timeout() {
            BackendError::Timeout
        } else {
            BackendError::Http(e)
        }
    }

    /// Single-shot request; returns the full response text.
    pub async fn generate(&self, prompt: &str) -> Result<String, BackendError> {
        debug!("Sending prompt to '{}' ({} chars, single-shot)", self.model, prompt.len());
        let resp = self.post(prompt, false).await?;
        let body = resp.text().await.map_err(|e| self.classify(e))?;
        let chunk = parse_line(body.trim().as_bytes())?;
        debug!("Backend response: {chunk:?}");
        Ok(chunk.response)
    }

    /// Streaming request; yields decoded objects as they arrive.
    ///
    /// Every read from the body is bounded by the request timeout.
    pub async fn generate_stream(&self, prompt: &str) -> Result<ChunkStream, BackendError> {
        debug!("Sending prompt to '{}' ({} chars, streaming)", self.model, prompt.len());
        let resp = self.post(prompt, true).await?;
        Ok(chunk_stream(resp.bytes_stream(), self.request_timeout))
    }
}

/// Splits a byte stream into JSON lines.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buf: Vec<u8>,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns one result per completed non-empty line.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Result<GenerateChunk, BackendError>> {
        self.buf.extend_from_slice(bytes);

        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = line.trim_ascii();
            if !line.is_empty() {
                out.push(parse_line(line));
            }
        }
        out
    }

    /// End of body: parse an unterminated final line, if any.
    pub fn finish(&mut self) -> Option<Result<GenerateChunk, BackendError>> {
        let rest = std::mem::take(&mut self.buf);
        let rest = rest.trim_ascii();
        if rest.is_empty() {
            None
        } else {
            Some(parse_line(rest))
        }
    }
}

fn parse_line(line: &[u8]) -> Result<GenerateChunk, BackendError> {
    let chunk: GenerateChunk = serde_json::from_slice(line).map_err(|e| {
        BackendError::Malformed(format!("{e}: {}", String::from_utf8_lossy(line)))
    })?;
    match chunk.error {
        Some(message) => Err(BackendError::Api(message)),
        None => Ok(chunk),
    }
}

struct StreamState<S> {
    bytes: Pin<Box<S>>,
    decoder: NdjsonDecoder,
    pending: VecDeque<Result<GenerateChunk, BackendError>>,
    read_timeout: Duration,
    finished: bool,
}

fn chunk_stream<S, B>(bytes: S, read_timeout: Duration) -> ChunkStream
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = StreamState {
        bytes: Box::pin(bytes),
        decoder: NdjsonDecoder::new(),
        pending: VecDeque::new(),
        read_timeout,
        finished: false,
    };

    Box::pin(futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match tokio::time::timeout(state.read_timeout, state.bytes.next()).await {
                Err(_) => {
                    state.finished = true;
                    return Some((Err(BackendError::Timeout), state));
                }
                Ok(Some(Ok(bytes))) => {
                    let decoded = state.decoder.push(bytes.as_ref());
                    state.pending.extend(decoded);
                }
                Ok(Some(Err(e))) => {
                    state.finished = true;
                    let err = if e.is_timeout() {
                        BackendError::Timeout
                    } else {
                        BackendError::Http(e)
                    };
                    return Some((Err(err), state));
                }
                Ok(None) => {
                    state.finished = true;
                    if let Some(item) = state.decoder.finish() {
                        state.pending.push_back(item);
                    }
                }
            }
        }
    }))
}
