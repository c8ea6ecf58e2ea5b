//! Microphone capture with cpal.
//!
//! The input stream stays open for the whole session; `listen` arms the
//! callback, waits for speech to start, and returns once the speaker has
//! paused long enough.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::AudioConfig;
use crate::error::ListenError;

/// How often `listen` checks the callback's progress.
const STATUS_INTERVAL: Duration = Duration::from_millis(50);

pub struct AudioRecorder {
    config: AudioConfig,
    shared: Arc<Mutex<Capture>>,
    /// Kept alive for the always-open stream.
    stream: Option<Stream>,
}

/// State shared with the audio callback thread.
#[derive(Debug, Default)]
struct Capture {
    armed: bool,
    buffer: Vec<f32>,
    max_samples: usize,
    pause: Duration,
    speech_started: bool,
    silence_start: Option<Instant>,
    finished: bool,
}

impl Capture {
    fn arm(&mut self, pause: Duration) {
        self.buffer.clear();
        self.armed = true;
        self.pause = pause;
        self.speech_started = false;
        self.silence_start = None;
        self.finished = false;
    }

    /// Feed one callback block. `loud` is whether its RMS cleared the
    /// silence threshold.
    fn push(&mut self, data: &[f32], loud: bool, now: Instant) {
        if !self.armed {
            return;
        }

        let remaining = self.max_samples.saturating_sub(self.buffer.len());
        let to_copy = data.len().min(remaining);
        self.buffer.extend_from_slice(&data[..to_copy]);

        if self.buffer.len() >= self.max_samples {
            warn!("Max utterance duration reached");
            self.finish();
            return;
        }

        if loud {
            if !self.speech_started {
                debug!("Speech started");
            }
            self.speech_started = true;
            self.silence_start = None;
        } else if self.speech_started {
            let since = *self.silence_start.get_or_insert(now);
            if now.duration_since(since) >= self.pause {
                debug!("Pause of {:.1}s detected, utterance complete", self.pause.as_secs_f64());
                self.finish();
            }
        }
    }

    fn finish(&mut self) {
        self.armed = false;
        self.finished = true;
    }
}

impl AudioRecorder {
    pub fn new(config: AudioConfig) -> Self {
        let max_samples = (config.max_duration * config.sample_rate as f64) as usize;
        let shared = Arc::new(Mutex::new(Capture {
            max_samples,
            buffer: Vec::with_capacity(max_samples),
            ..Default::default()
        }));

        Self {
            config,
            shared,
            stream: None,
        }
    }

    fn capture(&self) -> MutexGuard<'_, Capture> {
        // The callback never panics while holding the lock, but a poisoned
        // buffer is still usable.
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the audio stream. Call once at startup.
    pub fn open_stream(&mut self) -> Result<(), ListenError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| ListenError::Device("no input audio device available".into()))?;

        info!(
            "Using audio device: {}",
            device.name().unwrap_or_else(|_| "unknown".into())
        );

        let stream_config = StreamConfig {
            channels: self.config.channels,
            sample_rate: SampleRate(self.config.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(self.config.chunk_size),
        };

        let shared = Arc::clone(&self.shared);
        let threshold = self.config.silence_threshold;

        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    let loud = rms_energy(data) >= threshold;
                    shared
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(data, loud, Instant::now());
                },
                move |err| {
                    warn!("Audio stream error: {err}");
                },
                None,
            )
            .map_err(|e| ListenError::Device(format!("failed to build input stream: {e}")))?;

        stream
            .play()
            .map_err(|e| ListenError::Device(format!("failed to start audio stream: {e}")))?;
        info!("Audio stream opened");

        self.stream = Some(stream);
        Ok(())
    }

    /// Record one utterance.
    ///
    /// Fails with [`ListenError::Timeout`] if no speech starts within
    /// `timeout`. Otherwise returns once `pause` of silence follows the
    /// speech, or the utterance hits the configured maximum length.
    pub async fn listen(&self, timeout: Duration, pause: Duration) -> Result<Vec<f32>, ListenError> {
        if self.stream.is_none() {
            return Err(ListenError::Device("audio stream is not open".into()));
        }

        self.capture().arm(pause);
        let started = Instant::now();
        let mut ticker = tokio::time::interval(STATUS_INTERVAL);

        loop {
            ticker.tick().await;
            let (speech_started, finished) = {
                let capture = self.capture();
                (capture.speech_started, capture.finished)
            };
            if finished {
                break;
            }
            if !speech_started && started.elapsed() >= timeout {
                self.stop();
                return Err(ListenError::Timeout(timeout.as_secs_f64()));
            }
        }

        Ok(self.stop())
    }

    /// Disarm the callback and take whatever was captured.
    fn stop(&self) -> Vec<f32> {
        let mut capture = self.capture();
        capture.armed = false;
        let samples = std::mem::take(&mut capture.buffer);
        let duration = samples.len() as f64 / self.config.sample_rate as f64;
        debug!("Captured {:.1}s ({} samples)", duration, samples.len());
        samples
    }

    /// Check if audio data is silent.
    pub fn is_silent(samples: &[f32], threshold: f32) -> bool {
        let rms = rms_energy(samples);
        debug!("Audio RMS energy: {rms:.4} (threshold: {threshold})");
        rms < threshold
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    pub fn silence_threshold(&self) -> f32 {
        self.config.silence_threshold
    }
}

fn rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture(max_samples: usize) -> Capture {
        let mut c = Capture {
            max_samples,
            ..Default::default()
        };
        c.arm(Duration::from_millis(500));
        c
    }

    #[test]
    fn rms_of_silence_and_tone() {
        assert_eq!(rms_energy(&[]), 0.0);
        assert_eq!(rms_energy(&[0.0; 64]), 0.0);
        assert!((rms_energy(&[0.5, -0.5, 0.5, -0.5]) - 0.5).abs() < 1e-6);
        assert!(AudioRecorder::is_silent(&[0.001; 32], 0.01));
        assert!(!AudioRecorder::is_silent(&[0.2; 32], 0.01));
    }

    #[test]
    fn leading_silence_does_not_start_the_pause_clock() {
        let mut c = capture(10_000);
        let t0 = Instant::now();
        c.push(&[0.0; 10], false, t0);
        c.push(&[0.0; 10], false, t0 + Duration::from_secs(2));
        assert!(!c.speech_started);
        assert!(!c.finished);
    }

    #[test]
    fn pause_after_speech_finishes_capture() {
        let mut c = capture(10_000);
        let t0 = Instant::now();
        c.push(&[0.3; 10], true, t0);
        c.push(&[0.0; 10], false, t0 + Duration::from_millis(100));
        assert!(!c.finished);
        c.push(&[0.0; 10], false, t0 + Duration::from_millis(650));
        assert!(c.finished);
        assert!(!c.armed);
        assert_eq!(c.buffer.len(), 30);

        // Disarmed: further blocks are ignored.
        c.push(&[0.3; 10], true, t0 + Duration::from_secs(1));
        assert_eq!(c.buffer.len(), 30);
    }

    #[test]
    fn speech_resets_the_pause_clock() {
        let mut c = capture(10_000);
        let t0 = Instant::now();
        c.push(&[0.3; 10], true, t0);
        c.push(&[0.0; 10], false, t0 + Duration::from_millis(100));
        c.push(&[0.3; 10], true, t0 + Duration::from_millis(400));
        c.push(&[0.0; 10], false, t0 + Duration::from_millis(700));
        assert!(!c.finished);
        c.push(&[0.0; 10], false, t0 + Duration::from_millis(1250));
        assert!(c.finished);
    }

    #[test]
    fn buffer_is_capped() {
        let mut c = capture(25);
        let t0 = Instant::now();
        c.push(&[0.3; 10], true, t0);
        c.push(&[0.3; 10], true, t0);
        c.push(&[0.3; 10], true, t0);
        assert_eq!(c.buffer.len(), 25);
        assert!(c.finished);
    }

    #[tokio::test]
    async fn listen_requires_an_open_stream() {
        let recorder = AudioRecorder::new(AudioConfig::default());
        let err = recorder
            .listen(Duration::from_millis(10), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ListenError::Device(_)));
    }
}
