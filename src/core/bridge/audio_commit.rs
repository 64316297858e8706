//! Audio commit scheduler.
//!
//! Buffers client audio for the current utterance and decides when the
//! utterance is over: after `silence_ms` of trailing silence following speech
//! (linear16 only), or when the window's deadline passes.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::core::realtime::openai::OpenAIRealtimeAudioFormat;

/// Hard cap on a buffered window (60s of 24kHz PCM16).
pub const MAX_WINDOW_BYTES: usize = 60 * 48_000;

/// Raw bytes per `input_audio_buffer.append` event.
pub const APPEND_CHUNK_BYTES: usize = 64 * 1024;

/// Scheduler tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioCommitConfig {
    /// Commit deadline measured from the window's first frame
    pub max_buffer_ms: u64,
    /// Trailing silence that ends an utterance
    pub silence_ms: u64,
    /// RMS amplitude (PCM16 scale) below which a frame is silent
    pub silence_threshold: f32,
    /// Shortest utterance worth committing
    pub min_commit_ms: u64,
}

impl Default for AudioCommitConfig {
    fn default() -> Self {
        Self {
            max_buffer_ms: 8000,
            silence_ms: 700,
            silence_threshold: 500.0,
            min_commit_ms: 100,
        }
    }
}

/// Root-mean-square amplitude of PCM 16-bit little-endian samples.
pub fn rms_amplitude(audio: &[u8]) -> f32 {
    let sample_count = audio.len() / 2;
    if sample_count == 0 {
        return 0.0;
    }

    let sum_squares: f64 = audio
        .chunks_exact(2)
        .map(|chunk| {
            let sample = i16::from_le_bytes([chunk[0], chunk[1]]) as f64;
            sample * sample
        })
        .sum();

    (sum_squares / sample_count as f64).sqrt() as f32
}

/// What a single pushed frame revealed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameOutcome {
    /// First speech in this window
    pub speech_started: bool,
    /// Trailing silence reached `silence_ms`
    pub end_of_utterance: bool,
}

/// Result of closing the current window.
#[derive(Debug, PartialEq, Eq)]
pub enum CommitDecision {
    /// Buffered audio to append and commit upstream
    Commit(Vec<u8>),
    /// Nothing worth committing
    Discard(&'static str),
}

#[derive(Debug)]
struct AudioCommitWindow {
    buffer: Vec<u8>,
    deadline: Instant,
    has_speech: bool,
    trailing_silence: Duration,
    end_detected: bool,
    commit_requested: bool,
    overflowed: bool,
}

/// Per-connection audio buffering state.
#[derive(Debug)]
pub struct AudioCommitScheduler {
    config: AudioCommitConfig,
    format: OpenAIRealtimeAudioFormat,
    window: Option<AudioCommitWindow>,
}

impl AudioCommitScheduler {
    pub fn new(config: AudioCommitConfig) -> Self {
        Self {
            config,
            format: OpenAIRealtimeAudioFormat::default(),
            window: None,
        }
    }

    pub fn config(&self) -> &AudioCommitConfig {
        &self.config
    }

    pub fn format(&self) -> OpenAIRealtimeAudioFormat {
        self.format
    }

    /// Set the client's input encoding. An open window is kept.
    pub fn set_format(&mut self, format: OpenAIRealtimeAudioFormat) {
        self.format = format;
    }

    pub fn has_window(&self) -> bool {
        self.window.is_some()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.window.as_ref().map_or(0, |w| w.buffer.len())
    }

    /// Duration of buffered audio.
    pub fn buffered_ms(&self) -> u64 {
        self.bytes_to_ms(self.buffered_bytes())
    }

    /// Deadline of the open window, unless a commit is already pending for it.
    pub fn deadline(&self) -> Option<Instant> {
        self.window
            .as_ref()
            .filter(|w| !w.commit_requested)
            .map(|w| w.deadline)
    }

    /// Mark the open window as waiting for the gate so that neither the
    /// deadline nor end-of-utterance fires again for it.
    pub fn mark_commit_requested(&mut self) {
        if let Some(window) = self.window.as_mut() {
            window.commit_requested = true;
        }
    }

    /// Append one client frame received at `now`.
    pub fn push(&mut self, frame: &[u8], now: Instant) -> FrameOutcome {
        let mut outcome = FrameOutcome::default();
        if frame.is_empty() {
            return outcome;
        }

        let detect = self.format == OpenAIRealtimeAudioFormat::Pcm16;
        let frame_ms = self.bytes_to_ms(frame.len());
        let max_buffer = Duration::from_millis(self.config.max_buffer_ms);
        let window = self.window.get_or_insert_with(|| AudioCommitWindow {
            buffer: Vec::with_capacity(frame.len() * 16),
            deadline: now + max_buffer,
            // Without detection every window counts as speech
            has_speech: !detect,
            trailing_silence: Duration::ZERO,
            end_detected: false,
            commit_requested: false,
            overflowed: false,
        });

        if window.buffer.len() + frame.len() > MAX_WINDOW_BYTES {
            if !window.overflowed {
                tracing::warn!(
                    buffered = window.buffer.len(),
                    "Audio window full, dropping frames until commit"
                );
                window.overflowed = true;
            }
        } else {
            window.buffer.extend_from_slice(frame);
        }

        if !detect || window.end_detected {
            return outcome;
        }

        if rms_amplitude(frame) >= self.config.silence_threshold {
            if !window.has_speech {
                window.has_speech = true;
                outcome.speech_started = true;
            }
            window.trailing_silence = Duration::ZERO;
        } else if window.has_speech {
            window.trailing_silence += Duration::from_millis(frame_ms);
            if window.trailing_silence >= Duration::from_millis(self.config.silence_ms) {
                window.end_detected = true;
                outcome.end_of_utterance = !window.commit_requested;
            }
        }

        outcome
    }

    /// Close the current window.
    pub fn take_commit(&mut self) -> CommitDecision {
        let Some(window) = self.window.take() else {
            return CommitDecision::Discard("no buffered audio");
        };

        if !window.has_speech {
            return CommitDecision::Discard("no speech detected");
        }
        if self.bytes_to_ms(window.buffer.len()) < self.config.min_commit_ms {
            return CommitDecision::Discard("utterance shorter than minimum");
        }
        CommitDecision::Commit(window.buffer)
    }

    /// Drop any buffered audio.
    pub fn discard(&mut self) {
        if let Some(window) = self.window.take() {
            tracing::debug!(bytes = window.buffer.len(), "Discarding audio window");
        }
    }

    fn bytes_to_ms(&self, bytes: usize) -> u64 {
        let bytes_per_ms = match self.format {
            OpenAIRealtimeAudioFormat::Pcm16 => self.format.sample_rate() as u64 * 2 / 1000,
            OpenAIRealtimeAudioFormat::G711Ulaw | OpenAIRealtimeAudioFormat::G711Alaw => {
                self.format.sample_rate() as u64 / 1000
            }
        };
        bytes as u64 / bytes_per_ms.max(1)
    }
}
