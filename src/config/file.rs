//! TOML configuration file loading
//!
//! Supports `~/.config/desktop-assistant/config.toml` as a persistent config
//! source. All fields are optional; the file is a partial overlay on top of
//! defaults and is itself overridden by environment variables.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    /// `OpenAI` reasoning and transcription settings
    #[serde(default)]
    pub openai: OpenAiFileConfig,

    /// `ElevenLabs` speech settings
    #[serde(default)]
    pub elevenlabs: ElevenLabsFileConfig,

    /// Speech output toggles
    #[serde(default)]
    pub speech: SpeechFileConfig,

    /// Wake word settings
    #[serde(default)]
    pub wake: WakeFileConfig,

    /// Loop settings
    #[serde(default)]
    pub assistant: AssistantFileConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct OpenAiFileConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub timeout_seconds: Option<f64>,
    pub transcription_model: Option<String>,
    pub tts_model: Option<String>,
    pub tts_voice: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ElevenLabsFileConfig {
    pub api_key: Option<String>,
    pub voice_id: Option<String>,
    pub base_url: Option<String>,
    pub model_id: Option<String>,
    pub output_format: Option<String>,
    pub stability: Option<f32>,
    pub similarity_boost: Option<f32>,
    pub timeout_seconds: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SpeechFileConfig {
    /// Synthesize and play replies
    pub enabled: Option<bool>,

    /// "elevenlabs" or "openai"
    pub provider: Option<String>,

    /// Play audio after storing it
    pub autoplay: Option<bool>,

    /// Delete audio files after playback
    pub cleanup_audio: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WakeFileConfig {
    pub enabled: Option<bool>,
    pub wake_word: Option<String>,
    pub listen_seconds: Option<f64>,
    pub followup_seconds: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AssistantFileConfig {
    pub interval_seconds: Option<f64>,
    pub context_providers: Option<Vec<String>>,
    pub artifacts_dir: Option<PathBuf>,
    pub monitor_index: Option<u32>,
    pub system_prompt: Option<String>,
    pub shutdown_grace_seconds: Option<f64>,
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if the TOML is malformed
pub fn parse_config_file(content: &str) -> Result<ConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Load the TOML config file from the standard path
///
/// Returns `ConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ConfigFile {
    config_file_path().map_or_else(ConfigFile::default, |path| load_config_file_from(&path))
}

/// Load a config file from an explicit path, falling back to defaults
pub fn load_config_file_from(path: &Path) -> ConfigFile {
    if !path.exists() {
        return ConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match parse_config_file(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                ConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            ConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/desktop-assistant/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("desktop-assistant").join("config.toml"))
}
