//! Desktop Assistant - screenshot and context in, spoken advice out
//!
//! This library provides the core functionality for the desktop assistant:
//! - Context providers and the registry that snapshots them
//! - Screen capture and multimodal reasoning
//! - Voice processing (wake word gating, STT, TTS, playback)
//! - The assistant loop that schedules cycles
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   Triggers                           │
//! │        Interval timer   │   Wake word gate           │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Assistant Loop                       │
//! │   Screenshot  │  Context snapshot  │  Prompt         │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │               Remote services                        │
//! │   Reasoning (OpenAI)  │  TTS (ElevenLabs / OpenAI)   │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod assistant;
pub mod config;
pub mod context;
pub mod error;
pub mod prompt;
pub mod reasoning;
pub mod screen;
pub mod voice;

pub use assistant::{
    AssistantLoop, CycleError, CycleResult, LoopSettings, LoopState, RunMode, Stage,
};
pub use config::Config;
pub use context::{ContextProvider, ContextProviderRegistry, ContextSnapshot, ResolvedProvider};
pub use error::{Error, Result};
pub use reasoning::{CycleRequest, OpenAiReasoner, Reasoner};
pub use screen::{CapturedScreen, PlatformScreenCapturer, ScreenCapturer};
