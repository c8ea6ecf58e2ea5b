//! Speech output through the platform synthesizer.
//!
//! Uses `say` on macOS and `espeak-ng` / `espeak` elsewhere, unless a command
//! is configured explicitly. Each call blocks until the utterance has been
//! spoken; overlapping speech is never queued.

use std::io::ErrorKind;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::TtsConfig;
use crate::error::SpeechError;

#[async_trait]
pub trait SpeechOutput: Send {
    /// Speak `text` and return once playback has finished.
    async fn speak(&mut self, text: &str) -> Result<(), SpeechError>;
}

#[cfg(target_os = "macos")]
const DEFAULT_SYNTHESIZERS: &[&str] = &["say"];

#[cfg(not(target_os = "macos"))]
const DEFAULT_SYNTHESIZERS: &[&str] = &["espeak-ng", "espeak"];

/// Speaks through an external synthesizer process.
pub struct SystemVoice {
    candidates: Vec<String>,
    voice: Option<String>,
    /// Index into `candidates` of the synthesizer that last worked.
    resolved: Option<usize>,
}

impl SystemVoice {
    pub fn new(config: &TtsConfig) -> Self {
        let candidates = match &config.command {
            Some(command) if !command.trim().is_empty() => vec![command.trim().to_string()],
            _ => DEFAULT_SYNTHESIZERS.iter().map(|s| s.to_string()).collect(),
        };

        Self {
            candidates,
            voice: config.voice.clone().filter(|v| !v.trim().is_empty()),
            resolved: None,
        }
    }

    fn command_for(&self, program: &str, text: &str) -> Command {
        let mut cmd = Command::new(program);
        if let Some(voice) = &self.voice {
            cmd.arg("-v").arg(voice);
        }
        cmd.arg(text);
        cmd.kill_on_drop(true);
        cmd
    }

    async fn run(&self, program: &str, text: &str) -> Result<(), SpeechError> {
        let status = self.command_for(program, text).status().await?;
        if status.success() {
            Ok(())
        } else {
            Err(SpeechError::Failed(format!("{program}: {status}")))
        }
    }
}

#[async_trait]
impl SpeechOutput for SystemVoice {
    async fn speak(&mut self, text: &str) -> Result<(), SpeechError> {
        if text.trim().is_empty() {
            return Ok(());
        }

        if let Some(index) = self.resolved {
            let program = &self.candidates[index];
            debug!("Speaking via {program}: \"{text}\"");
            return self.run(program, text).await;
        }

        for (index, program) in self.candidates.iter().enumerate() {
            match self.run(program, text).await {
                Ok(()) => {
                    info!("Speech output via {program}");
                    self.resolved = Some(index);
                    return Ok(());
                }
                Err(SpeechError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                    debug!("{program} not found, trying next synthesizer");
                }
                Err(e) => {
                    warn!("{program} failed: {e}");
                    self.resolved = Some(index);
                    return Err(e);
                }
            }
        }

        Err(SpeechError::NoSynthesizer(self.candidates.join(", ")))
    }
}
