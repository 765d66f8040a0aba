//! Assistant loop
//!
//! Drives capture → context → reasoning → speech cycles, either on a fixed
//! interval or whenever the wake word gate fires, until the stop token is
//! cancelled.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::Error;
use crate::config::Config;
use crate::context::{ContextProviderRegistry, PROVIDER_TIMEOUT, ResolvedProvider};
use crate::reasoning::{CycleRequest, Reasoner};
use crate::screen::ScreenCapturer;
use crate::voice::{AudioSink, SpeechSynthesizer, WakeWordGate};

/// How long one gate wait lasts before the loop re-checks for a stop
pub const WAKE_POLL: Duration = Duration::from_secs(30);

/// Lifecycle of the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Stopped,
    Running,
    Stopping,
}

/// Whether to run a single cycle or keep going
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// One cycle, no gating; status reflects its outcome
    Once,
    /// Repeat until stopped or `max_turns` is reached
    Continuous,
}

/// Step of a cycle that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Capture,
    Reasoning,
    Synthesis,
    Playback,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Capture => "capture",
            Self::Reasoning => "reasoning",
            Self::Synthesis => "synthesis",
            Self::Playback => "playback",
        };
        f.write_str(name)
    }
}

/// A failed cycle
#[derive(Debug, thiserror::Error)]
#[error("{stage} failed: {source}")]
pub struct CycleError {
    /// Where the cycle stopped
    pub stage: Stage,
    /// Underlying collaborator error
    pub source: Error,
}

impl CycleError {
    const fn new(stage: Stage, source: Error) -> Self {
        Self { stage, source }
    }
}

/// Outcome of a successful cycle
#[derive(Debug, Clone)]
pub struct CycleResult {
    /// Reply text
    pub text: String,
    /// Stored audio, when speech ran and the file was kept
    pub audio_path: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Tunables for the loop
#[derive(Debug, Clone)]
pub struct LoopSettings {
    /// Fixed spacing between cycle starts in interval mode
    pub interval: Duration,
    /// Note used when no spoken note is available
    pub note: Option<String>,
    /// Stop after this many cycles
    pub max_turns: Option<u32>,
    /// Reply token limit passed to the reasoner
    pub max_output_tokens: u32,
    /// Time a running cycle gets to finish after a stop
    pub shutdown_grace: Duration,
    /// Length of one wake gate wait
    pub wake_poll: Duration,
    /// Per-provider context timeout
    pub provider_timeout: Duration,
    /// Synthesize and play replies when speech collaborators are attached
    pub speech_enabled: bool,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(8),
            note: None,
            max_turns: None,
            max_output_tokens: 220,
            shutdown_grace: Duration::from_secs(10),
            wake_poll: WAKE_POLL,
            provider_timeout: PROVIDER_TIMEOUT,
            speech_enabled: true,
        }
    }
}

impl LoopSettings {
    /// Settings from loaded configuration
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: config.assistant.interval(),
            note: config.assistant.note.clone(),
            max_turns: config.assistant.max_turns,
            max_output_tokens: config.openai.max_output_tokens,
            shutdown_grace: config.assistant.shutdown_grace(),
            speech_enabled: config.speech.enabled,
            ..Self::default()
        }
    }
}

/// Speech collaborators, present only when speech is enabled
struct Speech {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    sink: Arc<dyn AudioSink>,
}

/// The assistant orchestrator
pub struct AssistantLoop {
    capturer: Arc<dyn ScreenCapturer>,
    providers: Vec<ResolvedProvider>,
    reasoner: Arc<dyn Reasoner>,
    speech: Option<Speech>,
    gate: Option<WakeWordGate>,
    settings: LoopSettings,
    cancel: CancellationToken,
    state: watch::Sender<LoopState>,
}

impl AssistantLoop {
    /// Create a loop with speech and wake gating disabled
    #[must_use]
    pub fn new(
        capturer: Arc<dyn ScreenCapturer>,
        providers: Vec<ResolvedProvider>,
        reasoner: Arc<dyn Reasoner>,
        cancel: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(LoopState::Stopped);
        Self {
            capturer,
            providers,
            reasoner,
            speech: None,
            gate: None,
            settings: LoopSettings::default(),
            cancel,
            state,
        }
    }

    /// Speak replies through `synthesizer` and `sink`
    #[must_use]
    pub fn with_speech(
        mut self,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        sink: Arc<dyn AudioSink>,
    ) -> Self {
        self.speech = Some(Speech { synthesizer, sink });
        self
    }

    /// Gate cycles on the wake word instead of the interval
    #[must_use]
    pub fn with_wake_gate(mut self, gate: WakeWordGate) -> Self {
        self.gate = Some(gate);
        self
    }

    fn speech(&self) -> Option<&Speech> {
        self.speech
            .as_ref()
            .filter(|_| self.settings.speech_enabled)
    }

    /// Replace the loop settings
    #[must_use]
    pub fn with_settings(mut self, settings: LoopSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Observe state transitions
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    /// Token that stops the loop when cancelled
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Names of the providers consulted each cycle
    #[must_use]
    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(ResolvedProvider::name).collect()
    }

    fn set_state(&self, state: LoopState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(from = ?previous, to = ?state, "loop state changed");
        }
    }

    /// Run in `mode` and return a process status (0 success, 1 failure)
    pub async fn execute(&mut self, mode: RunMode) -> u8 {
        match mode {
            RunMode::Once => match self.run_once().await {
                Ok(_) => 0,
                Err(_) => 1,
            },
            RunMode::Continuous => {
                self.run().await;
                0
            }
        }
    }

    /// Run exactly one cycle with the configured note, without gating
    ///
    /// # Errors
    ///
    /// Returns the failed stage, or `None` as the source if the cycle was
    /// abandoned after a stop
    pub async fn run_once(&self) -> std::result::Result<CycleResult, Option<CycleError>> {
        self.set_state(LoopState::Running);
        let note = self.settings.note.clone();
        let outcome = self.run_guarded(1, note.as_deref()).await;
        self.set_state(LoopState::Stopped);

        match outcome {
            Some(Ok(result)) => Ok(result),
            Some(Err(e)) => Err(Some(e)),
            None => Err(None),
        }
    }

    /// Run cycles until stopped; returns the number of cycles started
    pub async fn run(&mut self) -> u32 {
        self.set_state(LoopState::Running);
        tracing::info!(
            mode = if self.gate.is_some() { "wake" } else { "interval" },
            interval_ms = self.settings.interval.as_millis(),
            providers = ?self.provider_names(),
            speech = self.speech().is_some(),
            "assistant loop started"
        );

        let mut cycle: u32 = 0;
        let mut next_start: Option<Instant> = None;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            if self.settings.max_turns.is_some_and(|max| cycle >= max) {
                tracing::info!(cycles = cycle, "reached max turns");
                break;
            }

            let note = if let Some(gate) = self.gate.as_mut() {
                match gate.await_activation(Some(self.settings.wake_poll)).await {
                    Some(activation) => activation.note.or_else(|| self.settings.note.clone()),
                    None => continue,
                }
            } else {
                if let Some(at) = next_start {
                    tokio::select! {
                        () = self.cancel.cancelled() => break,
                        () = tokio::time::sleep_until(at) => {}
                    }
                }
                self.settings.note.clone()
            };

            next_start = Some(Instant::now() + self.settings.interval);
            cycle += 1;
            let _ = self.run_guarded(cycle, note.as_deref()).await;
        }

        self.set_state(LoopState::Stopping);
        tracing::info!(cycles = cycle, "assistant loop stopped");
        self.set_state(LoopState::Stopped);
        cycle
    }

    /// Run a cycle, giving it the shutdown grace period if a stop arrives
    ///
    /// Returns `None` when the cycle was abandoned.
    async fn run_guarded(
        &self,
        cycle: u32,
        note: Option<&str>,
    ) -> Option<std::result::Result<CycleResult, CycleError>> {
        let fut = self.run_cycle(note);
        tokio::pin!(fut);

        let outcome = tokio::select! {
            result = &mut fut => Some(result),
            () = self.cancel.cancelled() => {
                self.set_state(LoopState::Stopping);
                tracing::info!(
                    cycle,
                    grace_ms = self.settings.shutdown_grace.as_millis(),
                    "stop requested, letting current cycle finish"
                );
                if let Ok(result) = tokio::time::timeout(self.settings.shutdown_grace, &mut fut).await {
                    Some(result)
                } else {
                    tracing::warn!(cycle, "cycle did not finish within shutdown grace, abandoning");
                    None
                }
            }
        };

        match &outcome {
            Some(Ok(result)) => {
                tracing::info!(cycle, reply = %result.text, "assistant replied");
                if let Some(path) = &result.audio_path {
                    tracing::info!(cycle, path = %path.display(), "audio saved");
                }
            }
            Some(Err(e)) => {
                tracing::error!(cycle, stage = %e.stage, error = %e.source, "cycle failed");
            }
            None => {}
        }

        outcome
    }

    /// One capture → context → reasoning → speech pass
    ///
    /// # Errors
    ///
    /// Returns the stage that failed and its error
    pub async fn run_cycle(
        &self,
        note: Option<&str>,
    ) -> std::result::Result<CycleResult, CycleError> {
        let started_at = Utc::now();

        let image = self
            .capturer
            .capture()
            .await
            .map_err(|e| CycleError::new(Stage::Capture, e))?;

        let context =
            ContextProviderRegistry::snapshot_with_timeout(&self.providers, self.settings.provider_timeout)
                .await;
        tracing::debug!(facts = context.len(), "context collected");

        let request = CycleRequest {
            image,
            context,
            note: note.map(ToString::to_string),
            max_output_tokens: self.settings.max_output_tokens,
        };

        let text = self
            .reasoner
            .generate(&request)
            .await
            .map_err(|e| CycleError::new(Stage::Reasoning, e))?;
        drop(request);

        let audio_path = match self.speech() {
            Some(speech) => {
                let audio = speech
                    .synthesizer
                    .synthesize(&text)
                    .await
                    .map_err(|e| CycleError::new(Stage::Synthesis, e))?;
                speech
                    .sink
                    .output(&audio)
                    .await
                    .map_err(|e| CycleError::new(Stage::Playback, e))?
            }
            None => None,
        };

        Ok(CycleResult {
            text,
            audio_path,
            started_at,
            finished_at: Utc::now(),
        })
    }
}
