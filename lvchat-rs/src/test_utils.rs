//! Scripted stand-ins for the audio and terminal collaborators, so the
//! conversation loop can be driven without a microphone, speakers or a TTY.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ListenError, SpeechError};
use crate::interrupt::InterruptPoller;
use crate::listener::SpeechInput;
use crate::speech::SpeechOutput;
use crate::wake::WakeWordDetector;

/// Records everything it is asked to say. Clones share the record.
#[derive(Debug, Clone, Default)]
pub struct RecordingVoice {
    spoken: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

impl RecordingVoice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records, then reports a synthesizer failure.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl SpeechOutput for RecordingVoice {
    async fn speak(&mut self, text: &str) -> Result<(), SpeechError> {
        self.spoken
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(text.to_string());
        if self.fail {
            Err(SpeechError::Failed("scripted failure".into()))
        } else {
            Ok(())
        }
    }
}

/// Answers polls from a script, then reports no interrupt forever.
#[derive(Debug, Default)]
pub struct ScriptedInterrupt {
    answers: VecDeque<bool>,
}

impl ScriptedInterrupt {
    pub fn new(answers: impl IntoIterator<Item = bool>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
        }
    }

    /// Quiet for `polls` polls, then interrupt once.
    pub fn after(polls: usize) -> Self {
        Self::new(std::iter::repeat(false).take(polls).chain([true]))
    }
}

#[async_trait]
impl InterruptPoller for ScriptedInterrupt {
    async fn poll(&mut self, _timeout: Duration) -> bool {
        self.answers.pop_front().unwrap_or(false)
    }
}

/// Plays back scripted listening results. Once the script runs out every
/// listen times out.
#[derive(Debug, Default)]
pub struct ScriptedInput {
    script: VecDeque<Result<String, ListenError>>,
    pending: Option<String>,
    timeouts: Vec<Duration>,
}

impl ScriptedInput {
    pub fn new(script: impl IntoIterator<Item = Result<String, ListenError>>) -> Self {
        Self {
            script: script.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Convenience for scripts that only contain recognized text.
    pub fn saying<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        Self::new(lines.into_iter().map(|l| Ok(l.to_string())))
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }

    /// Timeout passed to each capture, in order.
    pub fn timeouts(&self) -> &[Duration] {
        &self.timeouts
    }
}

#[async_trait(?Send)]
impl SpeechInput for ScriptedInput {
    async fn capture(&mut self, timeout: Duration) -> Result<Vec<f32>, ListenError> {
        self.timeouts.push(timeout);
        match self.script.pop_front() {
            Some(Ok(text)) => {
                self.pending = Some(text);
                Ok(Vec::new())
            }
            Some(Err(e)) => Err(e),
            None => Err(ListenError::Timeout(timeout.as_secs_f64())),
        }
    }

    async fn recognize(&mut self, _audio: &[f32]) -> Result<String, ListenError> {
        self.pending
            .take()
            .filter(|t| !t.trim().is_empty())
            .ok_or(ListenError::Unrecognized)
    }

    fn sample_rate(&self) -> u32 {
        16_000
    }
}

/// Wake detector driven by a script; silent once it runs out.
#[derive(Debug, Default)]
pub struct ScriptedWake {
    answers: VecDeque<bool>,
}

impl ScriptedWake {
    pub fn new(answers: impl IntoIterator<Item = bool>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
        }
    }
}

#[async_trait(?Send)]
impl WakeWordDetector for ScriptedWake {
    async fn detect(&mut self, _input: &mut dyn SpeechInput, _timeout: Duration) -> bool {
        self.answers.pop_front().unwrap_or(false)
    }
}
