//! Configuration management for lvchat.
//!
//! Values come from command-line flags first, then the YAML config file,
//! then built-in defaults. A missing or broken config file is never fatal.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::ConfigError;
use crate::transcriber::WHISPER_SAMPLE_RATE;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Wait for the wake phrase before each utterance.
    #[default]
    Keyword,
    /// Listen continuously; every utterance is a turn.
    Conversation,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SpeechEngine {
    /// Local whisper.cpp model.
    #[default]
    Local,
    /// OpenAI-compatible transcription API.
    Cloud,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WakeConfig {
    pub keyword: String,
    pub keyword_timeout: f64,
    /// Rustpotter `.rpw` model for the dedicated wake-word engine.
    pub model_path: Option<PathBuf>,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            keyword: "hey assistant".into(),
            keyword_timeout: 5.0,
            model_path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub speech_timeout: f64,
    pub pause_threshold: f64,
    pub engine: SpeechEngine,
    pub whisper_model: String,
    pub cloud_url: String,
    pub cloud_model: String,
    pub cloud_api_key: Option<String>,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            speech_timeout: 5.0,
            pause_threshold: 0.8,
            engine: SpeechEngine::Local,
            whisper_model: "tiny".into(),
            cloud_url: "https://api.openai.com/v1/audio/transcriptions".into(),
            cloud_model: "whisper-1".into(),
            cloud_api_key: None,
        }
    }
}

impl SpeechConfig {
    /// API key from the config file, or `OPENAI_API_KEY`.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.cloud_api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub chunk_size: u32,
    /// RMS level below which a block counts as silence.
    pub silence_threshold: f32,
    /// Hard cap on one utterance, in seconds.
    pub max_duration: f64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            chunk_size: 1024,
            silence_threshold: 0.01,
            max_duration: 30.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    pub max_history: usize,
    /// Seconds of inactivity after which the history is cleared.
    pub history_timeout: u64,
    /// Upper bound in seconds on the "one moment" filler before a request.
    pub ack_timeout: f64,
    /// Key that interrupts playback; `"space"` or a single character.
    pub interrupt_key: String,
    pub interrupt_poll_ms: u64,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_history: 10,
            history_timeout: 300,
            ack_timeout: 3.0,
            interrupt_key: " ".into(),
            interrupt_poll_ms: 100,
        }
    }
}

impl ConversationConfig {
    pub fn interrupt_char(&self) -> Result<char, ConfigError> {
        if self.interrupt_key.eq_ignore_ascii_case("space") {
            return Ok(' ');
        }
        let mut chars = self.interrupt_key.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(c),
            _ => Err(ConfigError::Invalid(format!(
                "interrupt_key must be a single character or \"space\", got {:?}",
                self.interrupt_key
            ))),
        }
    }

    pub fn history_timeout(&self) -> Duration {
        Duration::from_secs(self.history_timeout)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.ack_timeout)
    }

    pub fn interrupt_poll(&self) -> Duration {
        Duration::from_millis(self.interrupt_poll_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub url: String,
    /// Appended to `url` when set.
    pub port: Option<u16>,
    pub model: String,
    pub stream: bool,
    pub temperature: f32,
    /// Seconds; bounds single-shot requests and each streamed read.
    pub request_timeout: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost".into(),
            port: Some(11434),
            model: "openhermes:7b-mistral-v2.5-q4_K_M".into(),
            stream: true,
            temperature: 0.1,
            request_timeout: 60,
        }
    }
}

impl OllamaConfig {
    /// Base URL of the server, without a trailing slash.
    pub fn endpoint(&self) -> String {
        let base = self.url.trim_end_matches('/');
        match self.port {
            Some(port) => format!("{base}:{port}"),
            None => base.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Synthesizer binary; platform default when unset.
    pub command: Option<String>,
    pub voice: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mode: Mode,
    pub verbose: bool,
    pub wake: WakeConfig,
    pub speech: SpeechConfig,
    pub audio: AudioConfig,
    pub conversation: ConversationConfig,
    pub ollama: OllamaConfig,
    pub tts: TtsConfig,
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub mode: Option<Mode>,
    pub keyword: Option<String>,
    pub keyword_timeout: Option<f64>,
    pub speech_timeout: Option<f64>,
    pub pause_threshold: Option<f64>,
    pub max_history: Option<usize>,
    pub history_timeout: Option<u64>,
    pub engine: Option<SpeechEngine>,
    pub whisper_model: Option<String>,
    pub stream_response: Option<bool>,
    pub model: Option<String>,
    pub ollama_url: Option<String>,
    pub ollama_port: Option<u16>,
    pub temperature: Option<f32>,
    pub verbose: bool,
}

macro_rules! override_field {
    ($source:expr, $target:expr, $name:literal) => {
        if let Some(value) = $source {
            debug!("Using {} = {:?} from command line", $name, value);
            $target = value;
        }
    };
}

impl Config {
    /// Config file to read: `path` if given, otherwise the first that exists of
    /// 1. ./config.yaml
    /// 2. ~/.config/lvchat/config.yaml
    /// 3. /etc/lvchat/config.yaml
    pub fn locate(path: Option<&Path>) -> Option<PathBuf> {
        path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("config.yaml")),
                dirs::home_dir().map(|h| h.join(".config/lvchat/config.yaml")),
                Some(PathBuf::from("/etc/lvchat/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        })
    }

    /// Load configuration from YAML file, falling back to defaults.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(config_path) = Self::locate(path) else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match Self::from_file(&config_path) {
            Ok(config) => {
                info!("Loaded config from {}", config_path.display());
                config
            }
            Err(e) => {
                warn!("{e}, using defaults");
                Self::default()
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&contents).map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn from_yaml(contents: &str) -> Result<Self, String> {
        // An empty file deserializes to unit, not a mapping.
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yml::from_str(contents).map_err(|e| e.to_string())
    }

    pub fn apply(&mut self, o: Overrides) {
        override_field!(o.mode, self.mode, "mode");
        override_field!(o.keyword, self.wake.keyword, "keyword");
        override_field!(o.keyword_timeout, self.wake.keyword_timeout, "keyword_timeout");
        override_field!(o.speech_timeout, self.speech.speech_timeout, "speech_timeout");
        override_field!(o.pause_threshold, self.speech.pause_threshold, "pause_threshold");
        override_field!(o.max_history, self.conversation.max_history, "max_history");
        override_field!(o.history_timeout, self.conversation.history_timeout, "history_timeout");
        override_field!(o.engine, self.speech.engine, "engine");
        override_field!(o.whisper_model, self.speech.whisper_model, "whisper_model");
        override_field!(o.stream_response, self.ollama.stream, "stream_response");
        override_field!(o.model, self.ollama.model, "model");
        override_field!(o.ollama_url, self.ollama.url, "ollama_url");
        override_field!(o.temperature, self.ollama.temperature, "temperature");
        if let Some(port) = o.ollama_port {
            debug!("Using ollama_port = {port} from command line");
            self.ollama.port = Some(port);
        }
        if o.verbose {
            self.verbose = true;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.conversation.max_history == 0 {
            return Err(ConfigError::Invalid("max_history must be at least 1".into()));
        }
        let timeouts = [
            ("keyword_timeout", self.wake.keyword_timeout),
            ("speech_timeout", self.speech.speech_timeout),
            ("pause_threshold", self.speech.pause_threshold),
            ("max_duration", self.audio.max_duration),
        ];
        for (name, value) in timeouts {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid(format!("{name} must be positive, got {value}")));
            }
        }
        if !(self.conversation.ack_timeout.is_finite() && self.conversation.ack_timeout >= 0.0) {
            return Err(ConfigError::Invalid("ack_timeout must not be negative".into()));
        }
        if self.ollama.request_timeout == 0 {
            return Err(ConfigError::Invalid("request_timeout must be at least 1s".into()));
        }
        if self.mode == Mode::Keyword && self.wake.keyword.trim().is_empty() {
            return Err(ConfigError::Invalid("keyword mode needs a non-empty keyword".into()));
        }
        // Local Whisper, also the fallback for cloud without a key, only takes 16 kHz.
        let uses_whisper = match self.speech.engine {
            SpeechEngine::Local => true,
            SpeechEngine::Cloud => self.speech.resolved_api_key().is_none(),
        };
        if uses_whisper && self.audio.sample_rate != WHISPER_SAMPLE_RATE {
            return Err(ConfigError::Invalid(format!(
                "local Whisper needs audio.sample_rate {WHISPER_SAMPLE_RATE}, got {}",
                self.audio.sample_rate
            )));
        }
        self.conversation.interrupt_char()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_reference_values() {
        let c = Config::default();
        assert_eq!(c.mode, Mode::Keyword);
        assert_eq!(c.wake.keyword, "hey assistant");
        assert_eq!(c.conversation.max_history, 10);
        assert_eq!(c.conversation.history_timeout, 300);
        assert!(c.ollama.stream);
        assert_eq!(c.ollama.endpoint(), "http://localhost:11434");
        assert!(c.validate().is_ok());
    }

    #[test]
    fn sample_rate_must_suit_whisper() {
        let mut c = Config::default();
        c.audio.sample_rate = 44_100;
        assert!(matches!(c.validate(), Err(ConfigError::Invalid(msg)) if msg.contains("sample_rate")));

        c.speech.engine = SpeechEngine::Cloud;
        c.speech.cloud_api_key = Some("sk-test".into());
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let c = Config::from_yaml(
            "mode: conversation\nollama:\n  model: llama3.2:3b\n  stream: false\nconversation:\n  max_history: 4\n",
        )
        .unwrap();
        assert_eq!(c.mode, Mode::Conversation);
        assert_eq!(c.ollama.model, "llama3.2:3b");
        assert!(!c.ollama.stream);
        assert_eq!(c.ollama.port, Some(11434));
        assert_eq!(c.conversation.max_history, 4);
        assert_eq!(c.speech.pause_threshold, 0.8);
    }

    #[test]
    fn empty_yaml_is_default() {
        let c = Config::from_yaml("  \n").unwrap();
        assert_eq!(c.conversation.max_history, 10);
    }

    #[test]
    fn unknown_mode_is_rejected() {
        assert!(Config::from_yaml("mode: shouting\n").is_err());
    }

    #[test]
    fn cli_overrides_file_values() {
        let mut c = Config::from_yaml("wake:\n  keyword: computer\nollama:\n  temperature: 0.7\n").unwrap();
        c.apply(Overrides {
            keyword: Some("hey lv".into()),
            ollama_port: Some(8080),
            stream_response: Some(false),
            verbose: true,
            ..Default::default()
        });
        assert_eq!(c.wake.keyword, "hey lv");
        assert_eq!(c.ollama.temperature, 0.7);
        assert_eq!(c.ollama.endpoint(), "http://localhost:8080");
        assert!(!c.ollama.stream);
        assert!(c.verbose);
    }

    #[test]
    fn endpoint_without_port() {
        let o = OllamaConfig {
            url: "http://127.0.0.1:5555/".into(),
            port: None,
            ..Default::default()
        };
        assert_eq!(o.endpoint(), "http://127.0.0.1:5555");
    }

    #[test]
    fn interrupt_key_parsing() {
        let mut c = ConversationConfig::default();
        assert_eq!(c.interrupt_char().unwrap(), ' ');
        c.interrupt_key = "SPACE".into();
        assert_eq!(c.interrupt_char().unwrap(), ' ');
        c.interrupt_key = "q".into();
        assert_eq!(c.interrupt_char().unwrap(), 'q');
        c.interrupt_key = "esc".into();
        assert!(c.interrupt_char().is_err());
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut c = Config::default();
        c.conversation.max_history = 0;
        assert!(c.validate().is_err());

        let mut c = Config::default();
        c.speech.speech_timeout = 0.0;
        assert!(c.validate().is_err());

        let mut c = Config::default();
        c.wake.keyword = " ".into();
        assert!(c.validate().is_err());
        c.mode = Mode::Conversation;
        assert!(c.validate().is_ok());
    }

    #[test]
    fn load_reads_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "verbose: true\nconversation:\n  history_timeout: 42").unwrap();

        let c = Config::load(Some(file.path()));
        assert!(c.verbose);
        assert_eq!(c.conversation.history_timeout(), Duration::from_secs(42));
    }

    #[test]
    fn load_falls_back_on_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "conversation: [not, a, map]\n").unwrap();

        assert!(matches!(Config::from_file(&path), Err(ConfigError::Parse { .. })));
        let c = Config::load(Some(&path));
        assert_eq!(c.conversation.max_history, 10);
    }

    #[test]
    fn load_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");
        assert!(matches!(Config::from_file(&path), Err(ConfigError::Read { .. })));
        assert!(!Config::load(Some(&path)).verbose);
    }
}
