//! The outer conversation loop.
//!
//! Keyword mode waits for the wake word, greets, then takes one utterance
//! per wake. Conversation mode treats every utterance as a turn. Either way
//! the loop only ends when the user says goodbye. Registered command
//! handlers get each utterance before the backend does.

use std::fmt;
use std::time::Duration;

use rand::seq::SliceRandom;
use tracing::{debug, info};

use crate::commands::{normalize_command, CommandHandler};
use crate::config::{Config, Mode};
use crate::history::ConversationHistory;
use crate::listener::{log_listen_error, SpeechInput};
use crate::orchestrator::ResponseOrchestrator;
use crate::wake::WakeWordDetector;

const GREETINGS: &[&str] = &[
    "Hello. How can I help you?",
    "Hey there. What can I do for you?",
    "Hi. Ready to assist you.",
    "Hello.",
];

const FAREWELL_PHRASES: &[&str] = &["goodbye", "goodbye assistant"];

pub const FAREWELL: &str = "Goodbye!";

/// Whether `text` is one of the phrases that end the session. Surrounding
/// whitespace and trailing `.`, `!`, `?` are ignored.
pub fn is_farewell(text: &str) -> bool {
    FAREWELL_PHRASES.contains(&normalize_command(text).as_str())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    WaitingForWake,
    Listening,
    Responding,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WaitingForWake => write!(f, "WAITING"),
            Self::Listening => write!(f, "LISTENING"),
            Self::Responding => write!(f, "RESPONDING"),
        }
    }
}

/// Result of one pass through the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Turn {
    Continue,
    Finished,
}

pub struct Session {
    mode: Mode,
    keyword_timeout: Duration,
    speech_timeout: Duration,
    input: Box<dyn SpeechInput>,
    wake: Box<dyn WakeWordDetector>,
    orchestrator: ResponseOrchestrator,
    handlers: Vec<Box<dyn CommandHandler>>,
    history: ConversationHistory,
    state: SessionState,
}

impl Session {
    pub fn new(
        config: &Config,
        input: Box<dyn SpeechInput>,
        wake: Box<dyn WakeWordDetector>,
        orchestrator: ResponseOrchestrator,
    ) -> Self {
        let history = ConversationHistory::new(
            config.conversation.max_history,
            config.conversation.history_timeout(),
        );
        let state = match config.mode {
            Mode::Keyword => SessionState::WaitingForWake,
            Mode::Conversation => SessionState::Listening,
        };

        Self {
            mode: config.mode,
            keyword_timeout: Duration::from_secs_f64(config.wake.keyword_timeout),
            speech_timeout: Duration::from_secs_f64(config.speech.speech_timeout),
            input,
            wake,
            orchestrator,
            handlers: Vec::new(),
            history,
            state,
        }
    }

    /// Offer utterances to `handler` after the ones already registered.
    pub fn add_handler(&mut self, handler: Box<dyn CommandHandler>) {
        info!("Command handler registered: {}", handler.name());
        self.handlers.push(handler);
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state != next {
            info!("State: {} → {}", self.state, next);
            self.state = next;
        }
    }

    /// The idle state between turns for the current mode.
    fn rest_state(&self) -> SessionState {
        match self.mode {
            Mode::Keyword => SessionState::WaitingForWake,
            Mode::Conversation => SessionState::Listening,
        }
    }

    /// Run until the user says goodbye.
    pub async fn run(&mut self) {
        match self.mode {
            Mode::Keyword => info!("Keyword mode: waiting for the wake word"),
            Mode::Conversation => info!("Conversation mode: listening continuously"),
        }

        while self.turn().await == Turn::Continue {}
        info!("Session ended");
    }

    /// One pass: optional wake word, one utterance, and the reply to it.
    pub async fn turn(&mut self) -> Turn {
        if self.mode == Mode::Keyword {
            self.set_state(SessionState::WaitingForWake);
            if !self.wake.detect(self.input.as_mut(), self.keyword_timeout).await {
                debug!("Keyword not detected");
                return Turn::Continue;
            }
            info!("Keyword detected");
            self.greet().await;
        }

        self.set_state(SessionState::Listening);
        let text = match self.input.listen(self.speech_timeout).await {
            Ok(text) => text,
            Err(e) => {
                log_listen_error(&e);
                let rest = self.rest_state();
                self.set_state(rest);
                return Turn::Continue;
            }
        };
        info!("User: {text}");

        if is_farewell(&text) {
            info!("{FAREWELL}");
            self.orchestrator
                .player_mut()
                .speak(FAREWELL, &mut self.history)
                .await;
            return Turn::Finished;
        }

        self.set_state(SessionState::Responding);
        if self.dispatch_command(&text).await {
            let rest = self.rest_state();
            self.set_state(rest);
            return Turn::Continue;
        }

        let outcome = self.orchestrator.respond(&mut self.history, &text).await;
        debug!("Turn finished: {outcome:?}");

        let rest = self.rest_state();
        self.set_state(rest);
        Turn::Continue
    }

    /// Whether a registered handler took the utterance.
    async fn dispatch_command(&mut self, text: &str) -> bool {
        let player = self.orchestrator.player_mut();
        for handler in &mut self.handlers {
            if handler.handle(text, &mut self.history, player).await {
                debug!("Handled by command: {}", handler.name());
                return true;
            }
        }
        false
    }

    async fn greet(&mut self) {
        let greeting = GREETINGS.choose(&mut rand::thread_rng()).copied();
        if let Some(greeting) = greeting {
            self.orchestrator.player_mut().say(greeting).await;
        }
    }
}
