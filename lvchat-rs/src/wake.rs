//! Wake-word detection for keyword mode.
//!
//! The default detector transcribes a short utterance and looks for the
//! keyword phrase in it. With the `wake-word` feature and a rustpotter model
//! configured, a dedicated spotter scans the captured audio instead.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::WakeConfig;
use crate::listener::{log_listen_error, SpeechInput};

#[async_trait(?Send)]
pub trait WakeWordDetector {
    /// Listen once for up to `timeout`; true if the wake word was heard.
    async fn detect(&mut self, input: &mut dyn SpeechInput, timeout: Duration) -> bool;
}

/// Matches the keyword as a substring of the lowercased transcript.
pub struct PhraseWakeWord {
    keyword: String,
}

impl PhraseWakeWord {
    pub fn new(keyword: &str) -> Self {
        Self {
            keyword: keyword.trim().to_lowercase(),
        }
    }

    pub fn matches(&self, transcript: &str) -> bool {
        !self.keyword.is_empty() && transcript.to_lowercase().contains(&self.keyword)
    }
}

#[async_trait(?Send)]
impl WakeWordDetector for PhraseWakeWord {
    async fn detect(&mut self, input: &mut dyn SpeechInput, timeout: Duration) -> bool {
        debug!("Waiting for keyword \"{}\"", self.keyword);
        match input.listen(timeout).await {
            Ok(text) => {
                let heard = self.matches(&text);
                if !heard {
                    debug!("Heard \"{text}\" without the keyword");
                }
                heard
            }
            Err(e) => {
                log_listen_error(&e);
                false
            }
        }
    }
}

#[cfg(feature = "wake-word")]
mod engine {
    use super::*;
    use crate::error::ListenError;
    use rustpotter::{Rustpotter, RustpotterConfig, SampleFormat};
    use std::path::Path;

    /// Rustpotter spotter over captured audio.
    pub struct EngineWakeWord {
        detector: Rustpotter,
    }

    impl EngineWakeWord {
        pub fn new(model_path: &Path, sample_rate: u32) -> Result<Self, ListenError> {
            let mut config = RustpotterConfig::default();
            config.fmt.sample_rate = sample_rate as usize;
            config.fmt.channels = 1;
            config.fmt.sample_format = SampleFormat::F32;
            config.detector.threshold = 0.4;

            let mut detector = Rustpotter::new(&config)
                .map_err(|e| ListenError::Device(format!("failed to create wake-word detector: {e}")))?;
            let path = model_path.to_string_lossy();
            detector
                .add_wakeword_from_file("wake", &path)
                .map_err(|e| ListenError::Device(format!("failed to load wake-word model: {e}")))?;

            info!("Wake-word model loaded from {path}");
            Ok(Self { detector })
        }
    }

    #[async_trait(?Send)]
    impl WakeWordDetector for EngineWakeWord {
        async fn detect(&mut self, input: &mut dyn SpeechInput, timeout: Duration) -> bool {
            let audio = match input.capture(timeout).await {
                Ok(audio) => audio,
                Err(e) => {
                    log_listen_error(&e);
                    return false;
                }
            };

            let frame = self.detector.get_samples_per_frame();
            audio
                .chunks_exact(frame)
                .any(|chunk| self.detector.process_samples(chunk.to_vec()).is_some())
        }
    }
}

#[cfg(feature = "wake-word")]
pub use engine::EngineWakeWord;

/// Pick the detector for this configuration. The dedicated engine is used
/// only when it is compiled in and its model loads; otherwise phrase matching.
pub fn build_detector(config: &WakeConfig, sample_rate: u32) -> Box<dyn WakeWordDetector> {
    if let Some(model_path) = &config.model_path {
        #[cfg(feature = "wake-word")]
        {
            match EngineWakeWord::new(model_path, sample_rate) {
                Ok(engine) => return Box::new(engine),
                Err(e) => warn!("{e}; falling back to keyword phrase matching"),
            }
        }

        #[cfg(not(feature = "wake-word"))]
        {
            let _ = sample_rate;
            warn!(
                "Wake-word model {} ignored: built without the 'wake-word' feature",
                model_path.display()
            );
        }
    }

    info!("Wake phrase: \"{}\"", config.keyword);
    Box::new(PhraseWakeWord::new(&config.keyword))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ListenError;
    use crate::test_utils::ScriptedInput;

    #[test]
    fn phrase_match_is_case_insensitive_substring() {
        let wake = PhraseWakeWord::new(" Hey Assistant ");
        assert!(wake.matches("hey assistant what time is it"));
        assert!(wake.matches("oh HEY ASSISTANT"));
        assert!(!wake.matches("hey there"));
        assert!(!PhraseWakeWord::new("  ").matches("anything"));
    }

    #[tokio::test]
    async fn detect_uses_one_utterance() {
        let mut input = ScriptedInput::new([
            Ok("hello hey assistant".to_string()),
            Ok("hey assistant".to_string()),
        ]);
        let mut wake = PhraseWakeWord::new("hey assistant");

        assert!(wake.detect(&mut input, Duration::from_secs(1)).await);
        assert_eq!(input.remaining(), 1);
    }

    #[tokio::test]
    async fn listen_errors_are_not_detections() {
        let mut input = ScriptedInput::new([
            Err(ListenError::Timeout(1.0)),
            Err(ListenError::Unrecognized),
            Ok("goodbye".to_string()),
        ]);
        let mut wake = PhraseWakeWord::new("hey assistant");
        for _ in 0..3 {
            assert!(!wake.detect(&mut input, Duration::from_secs(1)).await);
        }
    }

    #[test]
    fn builder_without_model_uses_phrase() {
        // Smoke test: must not panic and must not need audio hardware.
        let _ = build_detector(&WakeConfig::default(), 16_000);
    }
}
