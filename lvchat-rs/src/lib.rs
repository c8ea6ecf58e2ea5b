//! lvchat: a voice assistant loop for Ollama.
//!
//! Listens for a wake phrase, transcribes what the user says, and speaks the
//! model's streamed reply sentence by sentence. Pressing the interrupt key
//! during playback abandons the rest of the reply.

pub mod commands;
pub mod config;
pub mod error;
pub mod history;
pub mod interrupt;
pub mod listener;
pub mod ollama;
pub mod orchestrator;
pub mod player;
pub mod recorder;
pub mod segmenter;
pub mod session;
pub mod speech;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod transcriber;
pub mod wake;
