//! Capturing and recognizing one user utterance.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::error::ListenError;
use crate::recorder::AudioRecorder;
use crate::transcriber::Transcriber;

/// Source of user speech.
///
/// Not `Send`: the microphone stream is bound to the thread that opened it.
#[async_trait(?Send)]
pub trait SpeechInput {
    /// Record one utterance, waiting at most `timeout` for it to start.
    async fn capture(&mut self, timeout: Duration) -> Result<Vec<f32>, ListenError>;

    /// Recognize captured audio. Empty results are [`ListenError::Unrecognized`].
    async fn recognize(&mut self, audio: &[f32]) -> Result<String, ListenError>;

    fn sample_rate(&self) -> u32;

    async fn listen(&mut self, timeout: Duration) -> Result<String, ListenError> {
        let audio = self.capture(timeout).await?;
        self.recognize(&audio).await
    }
}

/// Logs a listening failure at the level it deserves. None of them end the
/// session.
pub fn log_listen_error(e: &ListenError) {
    match e {
        ListenError::Timeout(secs) => {
            warn!("Listening timed out after {secs:.1}s while waiting for speech to start")
        }
        ListenError::Unrecognized => warn!("Could not understand audio"),
        ListenError::Device(_) | ListenError::Transcription(_) => error!("{e}"),
    }
}

/// Default microphone plus a speech-to-text engine.
pub struct MicrophoneInput {
    recorder: AudioRecorder,
    transcriber: Box<dyn Transcriber>,
    pause_threshold: Duration,
}

impl MicrophoneInput {
    pub fn new(recorder: AudioRecorder, transcriber: Box<dyn Transcriber>, pause_threshold: Duration) -> Self {
        Self {
            recorder,
            transcriber,
            pause_threshold,
        }
    }
}

#[async_trait(?Send)]
impl SpeechInput for MicrophoneInput {
    async fn capture(&mut self, timeout: Duration) -> Result<Vec<f32>, ListenError> {
        debug!("Listening for speech (timeout {:.1}s)", timeout.as_secs_f64());
        self.recorder.listen(timeout, self.pause_threshold).await
    }

    async fn recognize(&mut self, audio: &[f32]) -> Result<String, ListenError> {
        if AudioRecorder::is_silent(audio, self.recorder.silence_threshold()) {
            return Err(ListenError::Unrecognized);
        }

        let text = self
            .transcriber
            .transcribe(audio, self.recorder.sample_rate())
            .await?;
        debug!("{} transcript: \"{text}\"", self.transcriber.name());

        if text.trim().is_empty() {
            Err(ListenError::Unrecognized)
        } else {
            Ok(text)
        }
    }

    fn sample_rate(&self) -> u32 {
        self.recorder.sample_rate()
    }
}
