//! Wake word gating
//!
//! Listens on the microphone, cuts the signal into utterances with a local
//! energy detector, transcribes each utterance and checks it for the wake
//! phrase. The microphone is only held while a wait is in progress.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::capture::{FrameStream, Microphone, SAMPLE_RATE, calculate_rms, samples_to_wav};
use super::stt::Transcriber;
use crate::{Error, Result};

/// Minimum audio energy threshold to consider speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum voiced audio in an utterance (0.3 seconds at 16kHz)
const MIN_SPEECH_SAMPLES: usize = 4800;

/// Trailing silence that ends an utterance (0.5 seconds)
const SILENCE_SAMPLES: usize = 8000;

/// Delay before reopening a microphone that failed or closed
const REOPEN_DELAY: Duration = Duration::from_secs(1);

/// Characters stripped from the front of a spoken note
const NOTE_PUNCTUATION: &[char] = &[',', ':', ';', '.', '!', '?', '-'];

/// State of the wake word gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeWordState {
    /// Not listening; microphone released
    Idle,
    /// Waiting for the wake phrase
    Listening,
    /// Wake phrase heard on the last wait
    Triggered,
}

/// A successful wake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    /// Transcript containing the wake phrase (plus any follow-up)
    pub transcript: String,

    /// The configured wake phrase
    pub wake_word: String,

    /// Request spoken after the wake phrase
    pub note: Option<String>,
}

/// Splits a frame stream into utterances using RMS energy
#[derive(Debug)]
pub struct UtteranceSegmenter {
    max_samples: usize,
    buffer: Vec<f32>,
    voiced: usize,
    silence: usize,
}

impl UtteranceSegmenter {
    /// Create a segmenter that forces an endpoint at `max_listen`
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn new(max_listen: Duration) -> Self {
        let max_samples = (max_listen.as_secs_f64() * f64::from(SAMPLE_RATE)) as usize;
        Self {
            max_samples: max_samples.max(MIN_SPEECH_SAMPLES),
            buffer: Vec::new(),
            voiced: 0,
            silence: 0,
        }
    }

    /// Feed one frame; returns a finished utterance when an endpoint is reached
    pub fn push(&mut self, frame: &[f32]) -> Option<Vec<f32>> {
        let energy = calculate_rms(frame);
        let is_speech = energy > ENERGY_THRESHOLD;

        if self.buffer.is_empty() {
            if !is_speech {
                return None;
            }
            tracing::trace!(energy, "speech detected, listening");
        }

        self.buffer.extend_from_slice(frame);
        if is_speech {
            self.voiced += frame.len();
            self.silence = 0;
        } else {
            self.silence += frame.len();
        }

        if self.silence > SILENCE_SAMPLES && self.voiced > MIN_SPEECH_SAMPLES {
            tracing::debug!(samples = self.buffer.len(), "speech segment complete");
            return Some(self.take());
        }

        if self.buffer.len() >= self.max_samples {
            tracing::debug!(samples = self.buffer.len(), "maximum listen reached");
            return Some(self.take());
        }

        if self.silence > SILENCE_SAMPLES * 2 {
            tracing::trace!("too little speech before silence, resetting");
            self.reset();
        }

        None
    }

    /// Drop any partial utterance
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.voiced = 0;
        self.silence = 0;
    }

    fn take(&mut self) -> Vec<f32> {
        self.voiced = 0;
        self.silence = 0;
        std::mem::take(&mut self.buffer)
    }
}

/// Blocks the assistant loop until the wake phrase is spoken
pub struct WakeWordGate {
    microphone: Arc<dyn Microphone>,
    transcriber: Arc<dyn Transcriber>,
    wake_word: String,
    max_listen: Duration,
    followup: Duration,
    cancel: CancellationToken,
    state: WakeWordState,
}

impl WakeWordGate {
    /// Create a gate
    ///
    /// `followup` bounds the extra utterance captured when the wake phrase
    /// is spoken alone; zero disables it.
    ///
    /// # Errors
    ///
    /// Returns error if the wake phrase is blank
    pub fn new(
        microphone: Arc<dyn Microphone>,
        transcriber: Arc<dyn Transcriber>,
        wake_word: &str,
        max_listen: Duration,
        followup: Duration,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let wake_word = wake_word.trim().to_lowercase();
        if wake_word.is_empty() {
            return Err(Error::Config("wake word must not be empty".to_string()));
        }

        tracing::debug!(wake_word = %wake_word, "wake word gate initialized");

        Ok(Self {
            microphone,
            transcriber,
            wake_word,
            max_listen,
            followup,
            cancel,
            state: WakeWordState::Idle,
        })
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> WakeWordState {
        self.state
    }

    /// The normalized wake phrase
    #[must_use]
    pub fn wake_word(&self) -> &str {
        &self.wake_word
    }

    /// Wait for the wake phrase; `false` on timeout or stop
    pub async fn await_trigger(&mut self, timeout: Option<Duration>) -> bool {
        self.await_activation(timeout).await.is_some()
    }

    /// Wait for the wake phrase and return what was said
    ///
    /// Returns `None` when `timeout` elapses or the stop token fires. The
    /// microphone is released before returning either way.
    pub async fn await_activation(&mut self, timeout: Option<Duration>) -> Option<Activation> {
        self.state = WakeWordState::Listening;
        let deadline = timeout.map(|t| Instant::now() + t);

        let activation = self.listen(deadline).await;

        self.state = if activation.is_some() {
            WakeWordState::Triggered
        } else {
            WakeWordState::Idle
        };
        activation
    }

    async fn listen(&self, deadline: Option<Instant>) -> Option<Activation> {
        loop {
            match self.microphone.open().await {
                Ok(mut stream) => {
                    if let Some(activation) = self.listen_on(stream.as_mut(), deadline).await {
                        return Some(activation);
                    }
                    if self.cancel.is_cancelled() || deadline.is_some_and(|d| Instant::now() >= d)
                    {
                        return None;
                    }
                    tracing::warn!("microphone stream ended, reopening");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to open microphone, retrying");
                }
            }

            let retry_at = Instant::now() + REOPEN_DELAY;
            let wake_at = deadline.map_or(retry_at, |d| d.min(retry_at));
            tokio::select! {
                () = self.cancel.cancelled() => return None,
                () = tokio::time::sleep_until(wake_at) => {}
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return None;
            }
        }
    }

    /// Listen on an open stream until activation, deadline, stop or stream end
    async fn listen_on(
        &self,
        stream: &mut dyn FrameStream,
        deadline: Option<Instant>,
    ) -> Option<Activation> {
        let mut segmenter = UtteranceSegmenter::new(self.max_listen);

        loop {
            let utterance = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return None,
                () = sleep_until_deadline(deadline) => return None,
                frame = stream.next_frame() => match frame {
                    Some(frame) => segmenter.push(&frame),
                    None => return None,
                },
            };

            let Some(samples) = utterance else {
                continue;
            };

            let Some(transcript) = self.transcribe(&samples).await else {
                continue;
            };

            let Some(note) = match_wake_word(&transcript, &self.wake_word) else {
                tracing::debug!(transcript = %transcript, "no wake word in utterance");
                continue;
            };

            tracing::info!(wake_word = %self.wake_word, transcript = %transcript, "wake word detected");

            let mut activation = Activation {
                transcript,
                wake_word: self.wake_word.clone(),
                note,
            };

            if activation.note.is_none() {
                if let Some(followup) = self.capture_followup(stream).await {
                    activation.transcript = format!("{} {followup}", activation.transcript);
                    activation.note = clean_note(&followup);
                }
            }

            tracing::debug!(note = ?activation.note, "activation note");
            return Some(activation);
        }
    }

    /// Capture one more utterance after a bare wake phrase
    async fn capture_followup(&self, stream: &mut dyn FrameStream) -> Option<String> {
        if self.followup.is_zero() {
            return None;
        }

        let deadline = Instant::now() + self.followup;
        let mut segmenter = UtteranceSegmenter::new(self.max_listen.min(self.followup));

        loop {
            let utterance = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return None,
                () = tokio::time::sleep_until(deadline) => return None,
                frame = stream.next_frame() => segmenter.push(&frame?),
            };

            if let Some(samples) = utterance {
                return self.transcribe(&samples).await.filter(|t| !t.is_empty());
            }
        }
    }

    /// Transcribe an utterance; failures are logged and read as silence
    async fn transcribe(&self, samples: &[f32]) -> Option<String> {
        let wav = match samples_to_wav(samples, SAMPLE_RATE) {
            Ok(wav) => wav,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode utterance");
                return None;
            }
        };

        let result = tokio::select! {
            () = self.cancel.cancelled() => return None,
            result = self.transcriber.transcribe(&wav) => result,
        };

        match result {
            Ok(text) => Some(text.trim().to_string()),
            Err(e) => {
                tracing::warn!(error = %e, "transcription failed, ignoring utterance");
                None
            }
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Match `wake_word` (already lowercase) in `transcript`
///
/// Returns `None` without a match, otherwise the note spoken after the last
/// occurrence of the phrase (if any).
#[must_use]
pub fn match_wake_word(transcript: &str, wake_word: &str) -> Option<Option<String>> {
    let lower = transcript.to_lowercase();
    let start = lower.rfind(wake_word)?;
    let end = start + wake_word.len();

    // Lowercasing can shift byte offsets for some scripts; fall back to the
    // lowercase text when the offsets do not line up
    let tail = if lower.len() == transcript.len() {
        transcript.get(end..).unwrap_or(&lower[end..])
    } else {
        &lower[end..]
    };

    Some(clean_note(tail))
}

/// Normalize a spoken note: strip leading punctuation and whitespace
#[must_use]
pub fn clean_note(text: &str) -> Option<String> {
    let cleaned = text
        .trim_start_matches(|c: char| c.is_whitespace() || NOTE_PUNCTUATION.contains(&c))
        .trim();
    (!cleaned.is_empty()).then(|| cleaned.to_string())
}
