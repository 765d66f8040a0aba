//! Error types for the desktop assistant

use thiserror::Error;

/// Result type alias for assistant operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the desktop assistant
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (missing credential, invalid value)
    #[error("configuration error: {0}")]
    Config(String),

    /// A context provider was registered twice under the same name
    #[error("context provider already registered: {0}")]
    DuplicateProvider(String),

    /// A requested context provider is not registered
    #[error("unknown context provider '{name}' (available: {available})")]
    UnknownProvider {
        /// First unresolved name
        name: String,
        /// Comma-separated list of registered names
        available: String,
    },

    /// A context provider failed to produce its fact
    #[error("context provider error: {0}")]
    ContextProvider(String),

    /// Screenshot capture error
    #[error("capture error: {0}")]
    Capture(String),

    /// Reasoning service error
    #[error("reasoning error: {0}")]
    Reasoning(String),

    /// Text-to-speech error
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Speech-to-text error
    #[error("transcription error: {0}")]
    Transcription(String),

    /// Audio device or encoding error
    #[error("audio error: {0}")]
    Audio(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether this error must stop the process before the loop starts
    #[must_use]
    pub const fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::DuplicateProvider(_) | Self::UnknownProvider { .. }
        )
    }
}
