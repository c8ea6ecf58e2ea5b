//! Error types for the assistant loop.
//!
//! None of these are fatal once the session is running: the loop logs them
//! and goes back to listening.

use std::path::PathBuf;

use thiserror::Error;

/// Failures talking to the language-model backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("cannot connect to backend at {0}")]
    Connect(String),

    #[error("backend request timed out")]
    Timeout,

    #[error("backend returned status {0}: {1}")]
    Status(u16, String),

    #[error("backend reported an error: {0}")]
    Api(String),

    #[error("malformed backend response: {0}")]
    Malformed(String),

    #[error("backend request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Failures capturing or recognizing a user utterance.
#[derive(Debug, Error)]
pub enum ListenError {
    #[error("no speech within {0:.1}s")]
    Timeout(f64),

    #[error("could not understand audio")]
    Unrecognized,

    #[error("audio device error: {0}")]
    Device(String),

    #[error("transcription failed: {0}")]
    Transcription(String),
}

/// Failures invoking the platform speech synthesizer.
#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("no speech synthesizer found (tried {0})")]
    NoSynthesizer(String),

    #[error("speech synthesizer exited with {0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
