//! Speech-to-text for captured utterances.
//!
//! Two engines: a local whisper.cpp model loaded once at startup, and an
//! OpenAI-compatible transcription endpoint that receives the audio as WAV.
//! Both return lowercased, trimmed text.

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::error::ListenError;

/// Whisper expects 16 kHz mono input.
pub const WHISPER_SAMPLE_RATE: u32 = 16_000;

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Turn mono f32 samples into lowercased text.
    async fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String, ListenError>;

    fn name(&self) -> &'static str;
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Local whisper.cpp model.
#[derive(Clone)]
pub struct WhisperTranscriber {
    ctx: Arc<WhisperContext>,
}

impl WhisperTranscriber {
    /// Load a GGML model by name (`tiny`, `base.en`, ...) or path.
    pub fn load(model: &str) -> Result<Self, ListenError> {
        let model_path = find_model(model)?;
        let path_str = model_path.to_str().ok_or_else(|| {
            ListenError::Transcription(format!("model path is not UTF-8: {}", model_path.display()))
        })?;

        info!("Loading Whisper model from {}", model_path.display());
        let t0 = Instant::now();

        let ctx = WhisperContext::new_with_params(path_str, WhisperContextParameters::default())
            .map_err(|e| ListenError::Transcription(format!("failed to load Whisper model: {e}")))?;

        info!("Whisper model loaded in {}ms", t0.elapsed().as_millis());
        Ok(Self { ctx: Arc::new(ctx) })
    }

    fn run(&self, samples: &[f32]) -> Result<String, ListenError> {
        let mut state = self
            .ctx
            .create_state()
            .map_err(|e| ListenError::Transcription(format!("failed to create whisper state: {e}")))?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_language(Some("en"));
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_single_segment(true);
        params.set_token_timestamps(false);

        state
            .full(params, samples)
            .map_err(|e| ListenError::Transcription(format!("whisper inference failed: {e}")))?;

        let mut text = String::new();
        for i in 0..state.full_n_segments() {
            if let Some(segment) = state.get_segment(i) {
                if let Ok(segment_text) = segment.to_str_lossy() {
                    let trimmed = segment_text.trim();
                    if !trimmed.is_empty() {
                        if !text.is_empty() {
                            text.push(' ');
                        }
                        text.push_str(trimmed);
                    }
                }
            }
        }
        Ok(text)
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String, ListenError> {
        if sample_rate != WHISPER_SAMPLE_RATE {
            return Err(ListenError::Transcription(format!(
                "whisper needs {WHISPER_SAMPLE_RATE} Hz audio, got {sample_rate} Hz"
            )));
        }

        let t0 = Instant::now();
        let this = self.clone();
        let audio = samples.to_vec();
        let text = tokio::task::spawn_blocking(move || this.run(&audio))
            .await
            .map_err(|e| ListenError::Transcription(format!("transcription task failed: {e}")))??;

        let audio_secs = samples.len() as f64 / sample_rate as f64;
        debug!(
            "Transcribed {:.1}s audio in {}ms",
            audio_secs,
            t0.elapsed().as_millis()
        );
        Ok(normalize(&text))
    }

    fn name(&self) -> &'static str {
        "whisper"
    }
}

/// Find the GGML model file for `model`.
///
/// Accepts a direct path, otherwise looks for `ggml-<model>.bin` in the
/// working directory, `./models`, `~/.cache/whisper` and
/// `~/.local/share/lvchat/models`.
fn find_model(model: &str) -> Result<PathBuf, ListenError> {
    let direct = PathBuf::from(model);
    if direct.is_file() {
        return Ok(direct);
    }

    let filename = format!("ggml-{}.bin", model.replace('/', "-"));
    let search_dirs: Vec<PathBuf> = [
        std::env::current_dir().ok(),
        std::env::current_dir().ok().map(|d| d.join("models")),
        dirs::home_dir().map(|h| h.join(".cache/whisper")),
        dirs::data_dir().map(|d| d.join("lvchat/models")),
    ]
    .into_iter()
    .flatten()
    .collect();

    search_dirs
        .iter()
        .map(|dir| dir.join(&filename))
        .find(|path| path.is_file())
        .ok_or_else(|| {
            ListenError::Transcription(format!(
                "Whisper model {filename} not found. Download with:\n  \
                 wget https://huggingface.co/ggerganov/whisper.cpp/resolve/main/{filename}\n\
                 Searched in: {search_dirs:?}"
            ))
        })
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// OpenAI-compatible `/v1/audio/transcriptions` endpoint.
pub struct CloudTranscriber {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: String,
}

impl CloudTranscriber {
    pub fn new(url: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl Transcriber for CloudTranscriber {
    async fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String, ListenError> {
        let wav = encode_wav(samples, sample_rate)?;
        debug!(audio_bytes = wav.len(), "Uploading audio for transcription");

        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| ListenError::Transcription(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ListenError::Transcription(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ListenError::Transcription(format!(
                "transcription API error {status}: {}",
                body.trim()
            )));
        }

        let result: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| ListenError::Transcription(format!("bad transcription response: {e}")))?;
        Ok(normalize(&result.text))
    }

    fn name(&self) -> &'static str {
        "cloud"
    }
}

/// 16-bit PCM mono WAV, in memory.
fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, ListenError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let wav_err = |e: hound::Error| ListenError::Transcription(format!("WAV encoding failed: {e}"));

    let mut bytes = Vec::new();
    {
        let mut writer = hound::WavWriter::new(Cursor::new(&mut bytes), spec).map_err(wav_err)?;
        for &s in samples {
            let pcm = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer.write_sample(pcm).map_err(wav_err)?;
        }
        writer.finalize().map_err(wav_err)?;
    }
    Ok(bytes)
}
