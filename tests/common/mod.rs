//! Shared test utilities
//!
//! Scripted stand-ins for every collaborator so the loop and the wake gate can
//! run without a display, audio hardware or network.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;

use desktop_assistant::voice::{
    AudioFormat, AudioSink, FRAME_SAMPLES, FrameStream, Microphone, SAMPLE_RATE,
    SpeechSynthesizer, SynthesizedAudio, Transcriber,
};
use desktop_assistant::{
    CapturedScreen, ContextProvider, CycleRequest, Error, Reasoner, Result, ScreenCapturer,
};

/// Smallest PNG signature the capturer hands out
pub const PNG_BYTES: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0, 0];

/// Generate sine wave audio samples
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn generate_sine_samples(frequency: f32, duration_secs: f32, amplitude: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// Generate silence
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn generate_silence(duration_secs: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    vec![0.0; num_samples]
}

/// Frames for one spoken utterance followed by enough silence to end it
pub fn utterance_frames() -> Vec<Vec<f32>> {
    let mut samples = generate_sine_samples(440.0, 0.5, 0.3);
    samples.extend(generate_silence(0.6));
    samples
        .chunks(FRAME_SAMPLES)
        .map(<[f32]>::to_vec)
        .collect()
}

/// Capturer returning a fixed PNG
#[derive(Default)]
pub struct FakeCapturer {
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl FakeCapturer {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScreenCapturer for FakeCapturer {
    async fn capture(&self) -> Result<CapturedScreen> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::Capture("no display".to_string()));
        }
        Ok(CapturedScreen::from_bytes(PNG_BYTES.to_vec()))
    }
}

/// Reasoner that replies after a delay and records what it was asked
pub struct ScriptedReasoner {
    reply: String,
    delay: Duration,
    fail: bool,
    calls: AtomicUsize,
    starts: Mutex<Vec<Instant>>,
    notes: Mutex<Vec<Option<String>>>,
    contexts: Mutex<Vec<Value>>,
    context_names: Mutex<Vec<Vec<String>>>,
}

impl ScriptedReasoner {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            delay: Duration::ZERO,
            fail: false,
            calls: AtomicUsize::new(0),
            starts: Mutex::new(Vec::new()),
            notes: Mutex::new(Vec::new()),
            contexts: Mutex::new(Vec::new()),
            context_names: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::replying("")
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> Vec<Instant> {
        self.starts.lock().unwrap().clone()
    }

    pub fn notes(&self) -> Vec<Option<String>> {
        self.notes.lock().unwrap().clone()
    }

    pub fn contexts(&self) -> Vec<Value> {
        self.contexts.lock().unwrap().clone()
    }

    /// Provider names of each request's snapshot, in snapshot order
    pub fn context_names(&self) -> Vec<Vec<String>> {
        self.context_names.lock().unwrap().clone()
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn generate(&self, request: &CycleRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.starts.lock().unwrap().push(Instant::now());
        self.notes.lock().unwrap().push(request.note.clone());
        self.contexts
            .lock()
            .unwrap()
            .push(serde_json::to_value(&request.context).unwrap());
        self.context_names
            .lock()
            .unwrap()
            .push(request.context.names().map(ToString::to_string).collect());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.fail {
            return Err(Error::Reasoning("quota exceeded".to_string()));
        }
        Ok(self.reply.clone())
    }
}

/// Synthesizer that counts calls and returns a tiny WAV
#[derive(Default)]
pub struct CountingSynthesizer {
    pub calls: AtomicUsize,
}

impl CountingSynthesizer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechSynthesizer for CountingSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(SynthesizedAudio {
            bytes: text.as_bytes().to_vec(),
            format: AudioFormat::Wav,
        })
    }
}

/// Sink that records stored and played files without touching disk
#[derive(Default)]
pub struct RecordingSink {
    stored: Mutex<Vec<Vec<u8>>>,
    played: Mutex<Vec<PathBuf>>,
}

impl RecordingSink {
    pub fn stored(&self) -> usize {
        self.stored.lock().unwrap().len()
    }

    pub fn played(&self) -> Vec<PathBuf> {
        self.played.lock().unwrap().clone()
    }
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn store(&self, audio: &SynthesizedAudio) -> Result<PathBuf> {
        let mut stored = self.stored.lock().unwrap();
        stored.push(audio.bytes.clone());
        Ok(PathBuf::from(format!(
            "recorded_{}.{}",
            stored.len(),
            audio.format.extension()
        )))
    }

    async fn play(&self, path: &Path) {
        self.played.lock().unwrap().push(path.to_path_buf());
    }
}

/// Provider returning a fixed value
pub struct StaticProvider(pub Value);

#[async_trait]
impl ContextProvider for StaticProvider {
    async fn produce(&self) -> Result<Value> {
        Ok(self.0.clone())
    }
}

/// Provider that always errors
pub struct BrokenProvider;

#[async_trait]
impl ContextProvider for BrokenProvider {
    async fn produce(&self) -> Result<Value> {
        Err(Error::ContextProvider("sensor offline".to_string()))
    }
}

/// Microphone handing out scripted frame sequences, one per open
///
/// Once a script runs out the stream stays open and silent, like a real
/// device in a quiet room.
#[derive(Default)]
pub struct FakeMicrophone {
    scripts: Mutex<VecDeque<Vec<Vec<f32>>>>,
    failures: AtomicUsize,
    opens: AtomicUsize,
}

impl FakeMicrophone {
    pub fn scripted(scripts: Vec<Vec<Vec<f32>>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            ..Self::default()
        }
    }

    /// Fail the first `n` opens
    #[must_use]
    pub fn failing_first(self, n: usize) -> Self {
        self.failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Microphone for FakeMicrophone {
    async fn open(&self) -> Result<Box<dyn FrameStream>> {
        self.opens.fetch_add(1, Ordering::SeqCst);

        let pending_failures = self.failures.load(Ordering::SeqCst);
        if pending_failures > 0 {
            self.failures.store(pending_failures - 1, Ordering::SeqCst);
            return Err(Error::Audio("device busy".to_string()));
        }

        let frames = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
        Ok(Box::new(ScriptedStream {
            frames: frames.into(),
        }))
    }
}

struct ScriptedStream {
    frames: VecDeque<Vec<f32>>,
}

#[async_trait]
impl FrameStream for ScriptedStream {
    async fn next_frame(&mut self) -> Option<Vec<f32>> {
        match self.frames.pop_front() {
            Some(frame) => Some(frame),
            None => std::future::pending().await,
        }
    }
}

/// Transcriber returning scripted results in order, then empty text
#[derive(Default)]
pub struct ScriptedTranscriber {
    results: Mutex<VecDeque<Result<String>>>,
    calls: AtomicUsize,
}

impl ScriptedTranscriber {
    pub fn new(results: Vec<Result<String>>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn saying(transcripts: &[&str]) -> Self {
        Self::new(transcripts.iter().map(|t| Ok((*t).to_string())).collect())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, _wav: &[u8]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(String::new()))
    }
}
