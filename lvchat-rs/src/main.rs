//! lvchat: voice conversations with a local Ollama model.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lvchat::commands::ForgetCommand;
use lvchat::config::{Config, Mode, Overrides, SpeechConfig, SpeechEngine};
use lvchat::interrupt::KeyboardInterrupt;
use lvchat::listener::MicrophoneInput;
use lvchat::ollama::OllamaClient;
use lvchat::orchestrator::ResponseOrchestrator;
use lvchat::player::TurnPlayer;
use lvchat::recorder::AudioRecorder;
use lvchat::session::Session;
use lvchat::speech::SystemVoice;
use lvchat::transcriber::{CloudTranscriber, Transcriber, WhisperTranscriber};
use lvchat::wake;

#[derive(Parser, Debug)]
#[command(name = "lvchat", about = "Voice assistant loop for Ollama")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Wait for the wake phrase, or listen continuously
    #[arg(short, long, value_enum)]
    mode: Option<Mode>,

    /// Wake phrase for keyword mode
    #[arg(long)]
    keyword: Option<String>,

    /// Seconds to wait for the wake phrase
    #[arg(long)]
    keyword_timeout: Option<f64>,

    /// Seconds to wait for speech to start
    #[arg(long)]
    speech_timeout: Option<f64>,

    /// Seconds of silence that end an utterance
    #[arg(long)]
    pause_threshold: Option<f64>,

    /// Utterances kept in the conversation history
    #[arg(long)]
    max_history: Option<usize>,

    /// Seconds of inactivity before the history is cleared
    #[arg(long)]
    history_timeout: Option<u64>,

    /// Speech recognition engine
    #[arg(long, value_enum)]
    engine: Option<SpeechEngine>,

    /// Whisper model name or path for the local engine
    #[arg(long)]
    whisper_model: Option<String>,

    /// Stream the reply (true) or wait for the full response (false)
    #[arg(long)]
    stream_response: Option<bool>,

    /// Ollama model name
    #[arg(long)]
    model: Option<String>,

    /// Ollama base URL
    #[arg(long)]
    ollama_url: Option<String>,

    /// Ollama port
    #[arg(long)]
    ollama_port: Option<u16>,

    /// Sampling temperature
    #[arg(long)]
    temperature: Option<f32>,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            mode: self.mode,
            keyword: self.keyword.clone(),
            keyword_timeout: self.keyword_timeout,
            speech_timeout: self.speech_timeout,
            pause_threshold: self.pause_threshold,
            max_history: self.max_history,
            history_timeout: self.history_timeout,
            engine: self.engine,
            whisper_model: self.whisper_model.clone(),
            stream_response: self.stream_response,
            model: self.model.clone(),
            ollama_url: self.ollama_url.clone(),
            ollama_port: self.ollama_port,
            temperature: self.temperature,
            verbose: self.verbose,
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug,whisper_rs=info,hyper=info,reqwest=info")
    } else {
        EnvFilter::new("info,whisper_rs=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Cloud recognition needs a key; without one the local model is used.
async fn build_transcriber(speech: &SpeechConfig) -> anyhow::Result<Box<dyn Transcriber>> {
    if speech.engine == SpeechEngine::Cloud {
        match speech.resolved_api_key() {
            Some(key) => {
                info!("Speech engine: cloud ({})", speech.cloud_model);
                return Ok(Box::new(CloudTranscriber::new(
                    speech.cloud_url.clone(),
                    speech.cloud_model.clone(),
                    key,
                )));
            }
            None => warn!("Cloud speech engine selected but no API key is set; using local Whisper"),
        }
    }

    info!("Loading Whisper model...");
    let model = speech.whisper_model.clone();
    let whisper = tokio::task::spawn_blocking(move || WhisperTranscriber::load(&model))
        .await
        .context("Whisper loader task failed")??;
    Ok(Box::new(whisper))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // The log level can come from the config file, so peek at it before
    // the subscriber exists; the real load below logs what it finds.
    let file_verbose = Config::locate(args.config.as_deref())
        .and_then(|path| Config::from_file(&path).ok())
        .is_some_and(|c| c.verbose);
    init_logging(args.verbose || file_verbose);

    info!("lvchat starting");

    let mut config = Config::load(args.config.as_deref());
    config.apply(args.overrides());
    config.validate()?;
    info!(
        "Mode: {:?}, model: {} at {}",
        config.mode,
        config.ollama.model,
        config.ollama.endpoint()
    );

    let transcriber = build_transcriber(&config.speech).await?;

    let mut recorder = AudioRecorder::new(config.audio.clone());
    recorder.open_stream().context("Failed to open microphone")?;
    let sample_rate = recorder.sample_rate();
    let input = MicrophoneInput::new(
        recorder,
        transcriber,
        Duration::from_secs_f64(config.speech.pause_threshold),
    );
    let wake = wake::build_detector(&config.wake, sample_rate);

    let interrupt = KeyboardInterrupt::new(config.conversation.interrupt_char()?);
    info!("Press {:?} during a reply to interrupt it", interrupt.key());
    let shutdown = interrupt.shutdown_signal();
    let player = TurnPlayer::new(
        Box::new(SystemVoice::new(&config.tts)),
        Box::new(interrupt),
        config.conversation.interrupt_poll(),
    );

    let client = OllamaClient::new(&config.ollama)?;
    let orchestrator = ResponseOrchestrator::new(client, player, config.conversation.ack_timeout());
    let mut session = Session::new(&config, Box::new(input), wake, orchestrator);
    session.add_handler(Box::new(ForgetCommand));

    tokio::select! {
        _ = session.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
        }
        // Ctrl-C typed while the terminal is raw arrives as a key press.
        _ = shutdown.notified() => {
            info!("Shutting down...");
        }
    }

    Ok(())
}
