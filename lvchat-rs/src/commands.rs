//! Voice commands handled locally instead of being sent to the model.
//!
//! Every recognized utterance is offered to the registered handlers in
//! order. The first one that claims it ends the turn; if none does, the
//! utterance goes to the backend as usual.

use async_trait::async_trait;
use tracing::info;

use crate::history::ConversationHistory;
use crate::player::TurnPlayer;

#[async_trait]
pub trait CommandHandler: Send {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Handle `text` if it is this command. Returns false to let the
    /// utterance fall through to the next handler or the backend.
    async fn handle(
        &mut self,
        text: &str,
        history: &mut ConversationHistory,
        player: &mut TurnPlayer,
    ) -> bool;
}

/// Lowercase, trimmed, without trailing sentence punctuation.
pub fn normalize_command(text: &str) -> String {
    text.trim()
        .trim_end_matches(['.', '!', '?'])
        .trim_end()
        .to_lowercase()
}

const FORGET_PHRASES: &[&str] = &[
    "forget our conversation",
    "forget everything",
    "clear history",
    "start over",
];

const FORGET_REPLY: &str = "Okay, I've forgotten our conversation.";

/// Clears the conversation history on request.
#[derive(Debug, Default)]
pub struct ForgetCommand;

#[async_trait]
impl CommandHandler for ForgetCommand {
    fn name(&self) -> &str {
        "forget"
    }

    async fn handle(
        &mut self,
        text: &str,
        history: &mut ConversationHistory,
        player: &mut TurnPlayer,
    ) -> bool {
        if !FORGET_PHRASES.contains(&normalize_command(text).as_str()) {
            return false;
        }

        history.clear();
        info!("{FORGET_REPLY}");
        player.say(FORGET_REPLY).await;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::Utterance;
    use crate::test_utils::{RecordingVoice, ScriptedInterrupt};
    use std::time::Duration;

    fn player(voice: &RecordingVoice) -> TurnPlayer {
        TurnPlayer::new(
            Box::new(voice.clone()),
            Box::new(ScriptedInterrupt::default()),
            Duration::from_millis(1),
        )
    }

    #[test]
    fn normalizes_like_spoken_text() {
        assert_eq!(normalize_command("  Clear History! "), "clear history");
        assert_eq!(normalize_command("start over ?"), "start over");
    }

    #[tokio::test]
    async fn forget_clears_history_and_confirms() {
        let voice = RecordingVoice::new();
        let mut player = player(&voice);
        let mut history = ConversationHistory::new(10, Duration::from_secs(300));
        history.append(Utterance::user("my name is Sam"));
        history.append(Utterance::assistant("Nice to meet you."));

        assert!(ForgetCommand.handle("Forget our conversation.", &mut history, &mut player).await);
        assert!(history.is_empty());
        assert_eq!(voice.spoken(), [FORGET_REPLY]);
    }

    #[tokio::test]
    async fn forget_ignores_other_utterances() {
        let voice = RecordingVoice::new();
        let mut player = player(&voice);
        let mut history = ConversationHistory::new(10, Duration::from_secs(300));
        history.append(Utterance::user("hello"));

        assert!(!ForgetCommand.handle("please forget the milk", &mut history, &mut player).await);
        assert_eq!(history.len(), 1);
        assert!(voice.spoken().is_empty());
    }
}
