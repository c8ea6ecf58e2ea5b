//! Drives one reply: records the user turn, queries the backend, and feeds
//! the reply sentence by sentence to the turn player.

use std::time::Duration;

use futures_util::StreamExt;
use rand::seq::SliceRandom;
use tracing::{debug, error, info, warn};

use crate::error::BackendError;
use crate::history::{ConversationHistory, Utterance};
use crate::ollama::OllamaClient;
use crate::player::TurnPlayer;
use crate::segmenter::{split_sentences, SentenceSegmenter};

/// Spoken while the request is prepared.
const ACKNOWLEDGEMENTS: &[&str] = &[
    "Give me a moment to ponder that.",
    "Just a moment, while I consider what you have said.",
];

/// How a call to [`ResponseOrchestrator::respond`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// Nothing to send.
    Skipped,
    /// Every sentence of the reply was spoken.
    Completed { sentences: usize },
    /// The user interrupted; `sentences` were recorded before that.
    Interrupted { sentences: usize },
    /// The backend failed; `sentences` were recorded before that.
    Failed { sentences: usize },
}

pub struct ResponseOrchestrator {
    client: OllamaClient,
    player: TurnPlayer,
    ack_timeout: Duration,
}

/// Whether to keep reading the reply after a sentence.
enum Flow {
    Continue,
    Stop,
}

impl ResponseOrchestrator {
    /// `ack_timeout` bounds the filler phrase; zero disables it.
    pub fn new(client: OllamaClient, player: TurnPlayer, ack_timeout: Duration) -> Self {
        Self {
            client,
            player,
            ack_timeout,
        }
    }

    pub fn player_mut(&mut self) -> &mut TurnPlayer {
        &mut self.player
    }

    /// Send `user_text` with the conversation so far and speak the reply.
    ///
    /// The user utterance is recorded before the request and kept whatever
    /// happens afterwards. Backend failures are logged, never returned.
    pub async fn respond(&mut self, history: &mut ConversationHistory, user_text: &str) -> ResponseOutcome {
        let user_text = user_text.trim();
        if user_text.is_empty() {
            info!("No text to send for processing");
            return ResponseOutcome::Skipped;
        }

        history.check_timeout();
        history.append(Utterance::user(user_text));
        let prompt = history.as_prompt_text();

        self.acknowledge().await;

        info!("Sending text to '{}' for processing", self.client.model());
        let mut sentences = 0;
        let result = if self.client.is_streaming() {
            self.stream_reply(history, &prompt, &mut sentences).await
        } else {
            self.single_reply(history, &prompt, &mut sentences).await
        };

        match result {
            Ok(Flow::Continue) => ResponseOutcome::Completed { sentences },
            Ok(Flow::Stop) => {
                info!("Response abandoned after {sentences} sentence(s)");
                ResponseOutcome::Interrupted { sentences }
            }
            Err(e) => {
                error!("Language model request failed: {e}");
                ResponseOutcome::Failed { sentences }
            }
        }
    }

    async fn acknowledge(&mut self) {
        if self.ack_timeout.is_zero() {
            return;
        }
        let Some(phrase) = ACKNOWLEDGEMENTS.choose(&mut rand::thread_rng()) else {
            return;
        };
        if tokio::time::timeout(self.ack_timeout, self.player.say(phrase))
            .await
            .is_err()
        {
            debug!("Acknowledgement cut off after {:.1}s", self.ack_timeout.as_secs_f64());
        }
    }

    async fn stream_reply(
        &mut self,
        history: &mut ConversationHistory,
        prompt: &str,
        sentences: &mut usize,
    ) -> Result<Flow, BackendError> {
        let mut stream = self.client.generate_stream(prompt).await?;
        let mut segmenter = SentenceSegmenter::new();
        let mut done = false;

        while let Some(item) = stream.next().await {
            let chunk = item?;
            debug!("Streamed: {chunk:?}");

            for sentence in segmenter.feed(&chunk.response) {
                if let Flow::Stop = self.deliver(history, &sentence, sentences).await {
                    return Ok(Flow::Stop);
                }
            }

            if chunk.done {
                done = true;
                break;
            }
        }

        if !done {
            warn!("Response stream ended without a final object");
        }

        if let Some(rest) = segmenter.flush() {
            return Ok(self.deliver(history, &rest, sentences).await);
        }
        Ok(Flow::Continue)
    }

    async fn single_reply(
        &mut self,
        history: &mut ConversationHistory,
        prompt: &str,
        sentences: &mut usize,
    ) -> Result<Flow, BackendError> {
        let text = self.client.generate(prompt).await?;
        if text.trim().is_empty() {
            warn!("Language model returned an empty response");
        }

        for sentence in split_sentences(&text) {
            if let Flow::Stop = self.deliver(history, &sentence, sentences).await {
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Continue)
    }

    /// Speak one sentence and record it if it was heard.
    async fn deliver(
        &mut self,
        history: &mut ConversationHistory,
        sentence: &str,
        sentences: &mut usize,
    ) -> Flow {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            return Flow::Continue;
        }

        info!("Assistant: {sentence}");
        let outcome = self.player.speak(sentence, history).await;
        if outcome.was_spoken() {
            history.append(Utterance::assistant(sentence));
            *sentences += 1;
        }

        if outcome.interrupted() {
            Flow::Stop
        } else {
            Flow::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OllamaConfig;
    use crate::history::Speaker;
    use crate::test_utils::{RecordingVoice, ScriptedInterrupt};

    fn orchestrator(voice: &RecordingVoice, interrupt: ScriptedInterrupt) -> ResponseOrchestrator {
        // Nothing listens on port 9; any request would fail fast.
        let client = OllamaClient::new(&OllamaConfig {
            url: "http://127.0.0.1".into(),
            port: Some(9),
            ..Default::default()
        })
        .unwrap();
        let player = TurnPlayer::new(
            Box::new(voice.clone()),
            Box::new(interrupt),
            Duration::from_millis(1),
        );
        ResponseOrchestrator::new(client, player, Duration::ZERO)
    }

    #[tokio::test]
    async fn empty_text_is_skipped_without_touching_history() {
        let voice = RecordingVoice::new();
        let mut o = orchestrator(&voice, ScriptedInterrupt::default());
        let mut history = ConversationHistory::new(10, Duration::from_secs(300));

        assert_eq!(o.respond(&mut history, "   ").await, ResponseOutcome::Skipped);
        assert!(history.is_empty());
        assert!(voice.spoken().is_empty());
    }

    #[tokio::test]
    async fn unreachable_backend_keeps_user_utterance() {
        let voice = RecordingVoice::new();
        let mut o = orchestrator(&voice, ScriptedInterrupt::default());
        let mut history = ConversationHistory::new(10, Duration::from_secs(300));

        let outcome = o.respond(&mut history, "what's the weather").await;

        assert_eq!(outcome, ResponseOutcome::Failed { sentences: 0 });
        assert_eq!(history.len(), 1);
        let first = history.iter().next().unwrap();
        assert_eq!(first.speaker(), Speaker::User);
        assert_eq!(first.text(), "what's the weather");
        assert!(voice.spoken().is_empty());
    }

    #[tokio::test]
    async fn deliver_records_spoken_sentences_only() {
        let voice = RecordingVoice::new();
        // First sentence: quiet, quiet. Second: interrupted before speaking.
        let mut o = orchestrator(&voice, ScriptedInterrupt::new([false, false, true]));
        let mut history = ConversationHistory::new(10, Duration::from_secs(300));
        let mut n = 0;

        assert!(matches!(o.deliver(&mut history, " One. ", &mut n).await, Flow::Continue));
        assert!(matches!(o.deliver(&mut history, "Two.", &mut n).await, Flow::Stop));
        assert!(matches!(o.deliver(&mut history, "  ", &mut n).await, Flow::Continue));

        assert_eq!(n, 1);
        assert_eq!(voice.spoken(), ["One."]);
        assert_eq!(history.as_prompt_text(), "Assistant: One.");
    }

    #[tokio::test]
    async fn acknowledgement_is_spoken_when_enabled() {
        let voice = RecordingVoice::new();
        let mut o = orchestrator(&voice, ScriptedInterrupt::default());
        o.ack_timeout = Duration::from_secs(1);

        o.acknowledge().await;

        let spoken = voice.spoken();
        assert_eq!(spoken.len(), 1);
        assert!(ACKNOWLEDGEMENTS.contains(&spoken[0].as_str()));
    }
}
