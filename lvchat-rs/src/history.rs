//! Bounded, time-aware conversation history.
//!
//! Utterances are kept in a FIFO ring of at most `max_history` entries. The
//! whole history is dropped when the gap since the last interaction exceeds
//! the idle timeout; that check runs at the start of an interaction, never
//! in the background.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Assistant,
}

impl Speaker {
    /// Label used when rendering the prompt.
    pub fn label(self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Assistant => "Assistant",
        }
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One line of the conversation. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    speaker: Speaker,
    text: String,
    timestamp: DateTime<Local>,
}

impl Utterance {
    pub fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
            timestamp: Local::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Speaker::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Speaker::Assistant, text)
    }

    pub fn speaker(&self) -> Speaker {
        self.speaker
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }
}

impl fmt::Display for Utterance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.speaker, self.text)
    }
}

/// Conversation history owned by one session.
#[derive(Debug)]
pub struct ConversationHistory {
    entries: VecDeque<Utterance>,
    max_history: usize,
    timeout: Duration,
    last_interaction: Instant,
}

impl ConversationHistory {
    /// `max_history` is clamped to at least one entry.
    pub fn new(max_history: usize, timeout: Duration) -> Self {
        let max_history = max_history.max(1);
        Self {
            entries: VecDeque::with_capacity(max_history),
            max_history,
            timeout,
            last_interaction: Instant::now(),
        }
    }

    /// Append an utterance, evicting the oldest entry when full.
    pub fn append(&mut self, utterance: Utterance) {
        self.append_at(utterance, Instant::now());
    }

    pub fn append_at(&mut self, utterance: Utterance, now: Instant) {
        while self.entries.len() >= self.max_history {
            if let Some(evicted) = self.entries.pop_front() {
                debug!("History full, evicting: {evicted}");
            }
        }
        self.entries.push_back(utterance);
        self.last_interaction = now;
    }

    /// Record that an interaction happened without adding an utterance.
    pub fn touch(&mut self) {
        self.touch_at(Instant::now());
    }

    pub fn touch_at(&mut self, now: Instant) {
        self.last_interaction = now;
    }

    /// Clear everything if the store has been idle longer than the timeout.
    /// Returns true when the history was cleared.
    pub fn check_timeout(&mut self) -> bool {
        self.check_timeout_at(Instant::now())
    }

    pub fn check_timeout_at(&mut self, now: Instant) -> bool {
        let idle = now.saturating_duration_since(self.last_interaction);
        if idle <= self.timeout {
            return false;
        }

        info!(
            "Conversation idle for {:.0}s, clearing {} utterance(s)",
            idle.as_secs_f64(),
            self.entries.len()
        );
        self.entries.clear();
        self.last_interaction = now;
        true
    }

    /// Drop every utterance. Counts as an interaction.
    pub fn clear(&mut self) {
        info!("Clearing {} utterance(s) on request", self.entries.len());
        self.entries.clear();
        self.last_interaction = Instant::now();
    }

    /// Render the history oldest-first as `Speaker: text` lines.
    pub fn as_prompt_text(&self) -> String {
        self.entries
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    pub fn last_interaction(&self) -> Instant {
        self.last_interaction
    }

    pub fn iter(&self) -> impl Iterator<Item = &Utterance> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(max: usize) -> ConversationHistory {
        ConversationHistory::new(max, Duration::from_secs(300))
    }

    #[test]
    fn never_exceeds_capacity() {
        let mut h = history(3);
        for i in 0..10 {
            h.append(Utterance::user(format!("message {i}")));
            assert!(h.len() <= 3);
        }
        let texts: Vec<&str> = h.iter().map(Utterance::text).collect();
        assert_eq!(texts, ["message 7", "message 8", "message 9"]);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut h = history(0);
        h.append(Utterance::user("a"));
        h.append(Utterance::user("b"));
        assert_eq!(h.len(), 1);
        assert_eq!(h.max_history(), 1);
    }

    #[test]
    fn prompt_is_chronological_and_labelled() {
        let mut h = history(10);
        h.append(Utterance::user("what time is it"));
        h.append(Utterance::assistant("It is noon."));
        h.append(Utterance::user("thanks"));
        assert_eq!(
            h.as_prompt_text(),
            "User: what time is it\nAssistant: It is noon.\nUser: thanks"
        );
    }

    #[test]
    fn empty_history_renders_empty_prompt() {
        assert_eq!(history(5).as_prompt_text(), "");
    }

    #[test]
    fn idle_timeout_boundary() {
        let timeout = Duration::from_secs(300);
        let epsilon = Duration::from_millis(10);
        let t0 = Instant::now();

        let mut h = ConversationHistory::new(10, timeout);
        h.append_at(Utterance::user("hello"), t0);

        assert!(!h.check_timeout_at(t0 + timeout - epsilon));
        assert_eq!(h.len(), 1);

        assert!(h.check_timeout_at(t0 + timeout + epsilon));
        assert!(h.is_empty());
        assert_eq!(h.last_interaction(), t0 + timeout + epsilon);
    }

    #[test]
    fn touch_defers_timeout() {
        let timeout = Duration::from_secs(60);
        let t0 = Instant::now();
        let mut h = ConversationHistory::new(10, timeout);
        h.append_at(Utterance::user("hello"), t0);
        h.touch_at(t0 + Duration::from_secs(50));

        assert!(!h.check_timeout_at(t0 + Duration::from_secs(100)));
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn clear_empties_and_refreshes() {
        let t0 = Instant::now();
        let mut h = history(5);
        h.append_at(Utterance::user("a"), t0);
        h.append_at(Utterance::assistant("b"), t0);

        h.clear();
        assert!(h.is_empty());
        assert_eq!(h.as_prompt_text(), "");
        assert!(h.last_interaction() >= t0);
    }
}
