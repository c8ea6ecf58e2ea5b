//! Speaks one sentence at a time, checking for an interrupt around each.

use std::time::Duration;

use tracing::{info, warn};

use crate::history::ConversationHistory;
use crate::interrupt::InterruptPoller;
use crate::speech::SpeechOutput;

/// How a single `speak` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    /// Spoken and no interrupt seen.
    Completed,
    /// Interrupt seen before speaking; the sentence was dropped.
    InterruptedBeforeSpeaking,
    /// Interrupt seen after the sentence had already been spoken.
    InterruptedAfterSpeaking,
}

impl PlayOutcome {
    pub fn interrupted(self) -> bool {
        !matches!(self, Self::Completed)
    }

    /// Whether the sentence reached the speech output.
    pub fn was_spoken(self) -> bool {
        !matches!(self, Self::InterruptedBeforeSpeaking)
    }
}

pub struct TurnPlayer {
    speech: Box<dyn SpeechOutput>,
    interrupt: Box<dyn InterruptPoller>,
    poll_timeout: Duration,
}

impl TurnPlayer {
    pub fn new(
        speech: Box<dyn SpeechOutput>,
        interrupt: Box<dyn InterruptPoller>,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            speech,
            interrupt,
            poll_timeout,
        }
    }

    /// Speak one reply sentence.
    ///
    /// Polls for an interrupt before and after speaking. Only a completed
    /// sentence refreshes the history's interaction time.
    pub async fn speak(&mut self, sentence: &str, history: &mut ConversationHistory) -> PlayOutcome {
        if self.interrupt.poll(self.poll_timeout).await {
            info!("Interrupted by user before speaking");
            return PlayOutcome::InterruptedBeforeSpeaking;
        }

        self.say(sentence).await;

        if self.interrupt.poll(self.poll_timeout).await {
            info!("Interrupted by user after speaking");
            return PlayOutcome::InterruptedAfterSpeaking;
        }

        history.touch();
        PlayOutcome::Completed
    }

    /// Speak without interrupt checks, for greetings and fillers.
    /// Synthesizer failures are logged and swallowed.
    pub async fn say(&mut self, text: &str) {
        if let Err(e) = self.speech.speak(text).await {
            warn!("Speech output failed: {e}");
        }
    }
}
