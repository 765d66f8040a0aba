//! Configuration management for the desktop assistant
//!
//! Precedence: CLI flag > environment variable > TOML file > default.

pub mod file;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::context::BUILTIN_PROVIDERS;
use crate::prompt::DEFAULT_SYSTEM_PROMPT;
use crate::{Error, Result};

use self::file::ConfigFile;

/// Longest accepted interval, grace period, listen window or timeout
pub const MAX_DURATION_SECONDS: f64 = 86_400.0;

/// Desktop assistant configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// `OpenAI` reasoning, transcription and TTS settings
    pub openai: OpenAiConfig,

    /// `ElevenLabs` speech settings
    pub elevenlabs: ElevenLabsConfig,

    /// Speech output
    pub speech: SpeechConfig,

    /// Wake word gating
    pub wake: WakeConfig,

    /// Loop scheduling and capture
    pub assistant: AssistantConfig,
}

/// `OpenAI` API settings
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// API key (`OPENAI_API_KEY`)
    pub api_key: Option<SecretString>,

    /// API base URL, without trailing slash
    pub base_url: String,

    /// Multimodal reasoning model
    pub model: String,

    /// Sampling temperature
    pub temperature: f32,

    /// Upper bound on reply tokens
    pub max_output_tokens: u32,

    /// Per-request timeout
    pub timeout_seconds: f64,

    /// Model used to transcribe wake word utterances
    pub transcription_model: String,

    /// Model for `OpenAI` speech output
    pub tts_model: String,

    /// Voice for `OpenAI` speech output
    pub tts_voice: String,

    /// System prompt sent with every request
    pub system_prompt: String,
}

/// `ElevenLabs` API settings
#[derive(Debug, Clone)]
pub struct ElevenLabsConfig {
    pub api_key: Option<SecretString>,
    pub voice_id: Option<String>,
    pub base_url: String,
    pub model_id: String,
    /// `pcm_<rate>` or `mp3_<rate>_<bitrate>`
    pub output_format: String,
    pub stability: f32,
    pub similarity_boost: f32,
    pub timeout_seconds: f64,
}

/// Which service speaks replies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TtsProvider {
    #[default]
    ElevenLabs,
    OpenAi,
}

impl FromStr for TtsProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "elevenlabs" | "eleven_labs" => Ok(Self::ElevenLabs),
            "openai" => Ok(Self::OpenAi),
            other => Err(Error::Config(format!(
                "unknown TTS provider '{other}' (expected elevenlabs or openai)"
            ))),
        }
    }
}

/// Speech output settings
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    /// Synthesize and play replies
    pub enabled: bool,

    /// Synthesis backend
    pub provider: TtsProvider,

    /// Play audio after storing it
    pub autoplay: bool,

    /// Delete audio files once played
    pub cleanup_audio: bool,
}

/// Wake word settings
#[derive(Debug, Clone)]
pub struct WakeConfig {
    /// Gate cycles on the wake phrase instead of an interval
    pub enabled: bool,

    /// Phrase to listen for
    pub wake_word: String,

    /// Longest single utterance
    pub listen_seconds: f64,

    /// Extra listening after a bare wake phrase (0 disables)
    pub followup_seconds: f64,
}

/// Loop settings
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// Seconds between cycle starts in interval mode
    pub interval_seconds: f64,

    /// Context providers to consult, in order
    pub context_providers: Vec<String>,

    /// Root directory for generated files
    pub artifacts_dir: PathBuf,

    /// Display passed to the screenshot tool
    pub monitor_index: u32,

    /// Time a running cycle gets to finish after a stop
    pub shutdown_grace_seconds: f64,

    /// Note added to every prompt
    pub note: Option<String>,

    /// Stop after this many cycles
    pub max_turns: Option<u32>,
}

impl AssistantConfig {
    /// Interval between cycle starts
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_seconds)
    }

    /// Shutdown grace period
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs_f64(self.shutdown_grace_seconds)
    }

    /// Directory for synthesized audio
    #[must_use]
    pub fn audio_dir(&self) -> PathBuf {
        self.artifacts_dir.join("audio")
    }
}

impl WakeConfig {
    /// Longest single utterance
    #[must_use]
    pub fn max_listen(&self) -> Duration {
        Duration::from_secs_f64(self.listen_seconds)
    }

    /// Follow-up listening window
    #[must_use]
    pub fn followup(&self) -> Duration {
        Duration::from_secs_f64(self.followup_seconds)
    }
}

/// Command-line overrides applied on top of loaded configuration
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub interval_seconds: Option<f64>,
    pub max_turns: Option<u32>,
    pub note: Option<String>,
    pub context_providers: Option<String>,
    pub monitor_index: Option<u32>,
    pub no_speech: bool,
    pub no_autoplay: bool,
    pub voice_trigger: Option<bool>,
    pub wake_word: Option<String>,
}

/// Environment variable reader
///
/// Blank values count as unset.
struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn secret(&self, name: &str) -> Option<SecretString> {
        self.string(name).map(SecretString::from)
    }

    fn parse<T: FromStr>(&self, name: &str) -> Result<Option<T>> {
        self.string(name)
            .map(|raw| {
                raw.parse()
                    .map_err(|_| Error::Config(format!("invalid value for {name}: '{raw}'")))
            })
            .transpose()
    }

    fn flag(&self, name: &str) -> Option<bool> {
        self.string(name).map(|v| parse_bool(&v))
    }
}

/// Truthy strings: 1, true, yes, y, on (case-insensitive)
#[must_use]
pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

/// Split a comma-separated list, dropping empty entries
#[must_use]
pub fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

impl Config {
    /// Load configuration from the environment and the optional TOML file
    ///
    /// # Errors
    ///
    /// Returns error if a variable holds an unparseable value
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::from_sources(|name| std::env::var(name).ok(), fc)
    }

    /// Build configuration from an environment lookup and a parsed file
    ///
    /// # Errors
    ///
    /// Returns error if a variable holds an unparseable value
    pub fn from_sources<F>(lookup: F, fc: ConfigFile) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        // OpenAI (env > toml > default)
        let openai = OpenAiConfig {
            api_key: env
                .secret("OPENAI_API_KEY")
                .or_else(|| fc.openai.api_key.map(SecretString::from)),
            base_url: env
                .string("OPENAI_BASE_URL")
                .or(fc.openai.base_url)
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: env
                .string("OPENAI_MODEL")
                .or(fc.openai.model)
                .unwrap_or_else(|| "gpt-4.1-mini".to_string()),
            temperature: env
                .parse("OPENAI_TEMPERATURE")?
                .or(fc.openai.temperature)
                .unwrap_or(0.5),
            max_output_tokens: env
                .parse("OPENAI_MAX_OUTPUT_TOKENS")?
                .or(fc.openai.max_output_tokens)
                .unwrap_or(220),
            timeout_seconds: env
                .parse("OPENAI_TIMEOUT_SECONDS")?
                .or(fc.openai.timeout_seconds)
                .unwrap_or(45.0),
            transcription_model: env
                .string("OPENAI_TRANSCRIPTION_MODEL")
                .or(fc.openai.transcription_model)
                .unwrap_or_else(|| "whisper-1".to_string()),
            tts_model: env
                .string("OPENAI_TTS_MODEL")
                .or(fc.openai.tts_model)
                .unwrap_or_else(|| "tts-1".to_string()),
            tts_voice: env
                .string("OPENAI_TTS_VOICE")
                .or(fc.openai.tts_voice)
                .unwrap_or_else(|| "alloy".to_string()),
            system_prompt: env
                .string("ASSISTANT_SYSTEM_PROMPT")
                .or(fc.assistant.system_prompt)
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        };

        // ElevenLabs (env > toml > default)
        let elevenlabs = ElevenLabsConfig {
            api_key: env
                .secret("ELEVENLABS_API_KEY")
                .or_else(|| fc.elevenlabs.api_key.map(SecretString::from)),
            voice_id: env.string("ELEVENLABS_VOICE_ID").or(fc.elevenlabs.voice_id),
            base_url: env
                .string("ELEVENLABS_BASE_URL")
                .or(fc.elevenlabs.base_url)
                .unwrap_or_else(|| "https://api.elevenlabs.io/v1".to_string()),
            model_id: env
                .string("ELEVENLABS_MODEL_ID")
                .or(fc.elevenlabs.model_id)
                .unwrap_or_else(|| "eleven_multilingual_v2".to_string()),
            output_format: env
                .string("ELEVENLABS_OUTPUT_FORMAT")
                .or(fc.elevenlabs.output_format)
                .unwrap_or_else(|| "pcm_16000".to_string()),
            stability: env
                .parse("ELEVENLABS_STABILITY")?
                .or(fc.elevenlabs.stability)
                .unwrap_or(0.45),
            similarity_boost: env
                .parse("ELEVENLABS_SIMILARITY_BOOST")?
                .or(fc.elevenlabs.similarity_boost)
                .unwrap_or(0.75),
            timeout_seconds: env
                .parse("ELEVENLABS_TIMEOUT_SECONDS")?
                .or(fc.elevenlabs.timeout_seconds)
                .unwrap_or(45.0),
        };

        let provider = match env.string("ASSISTANT_TTS_PROVIDER").or(fc.speech.provider) {
            Some(name) => name.parse()?,
            None => TtsProvider::default(),
        };

        let speech = SpeechConfig {
            enabled: env
                .flag("ASSISTANT_ENABLE_SPEECH")
                .or(fc.speech.enabled)
                .unwrap_or(true),
            provider,
            autoplay: env
                .flag("ASSISTANT_AUTOPLAY")
                .or(fc.speech.autoplay)
                .unwrap_or(true),
            cleanup_audio: env
                .flag("ASSISTANT_CLEANUP_AUDIO")
                .or(fc.speech.cleanup_audio)
                .unwrap_or(false),
        };

        let wake = WakeConfig {
            enabled: env
                .flag("ASSISTANT_VOICE_TRIGGER")
                .or(fc.wake.enabled)
                .unwrap_or(false),
            wake_word: env
                .string("ASSISTANT_WAKE_WORD")
                .or(fc.wake.wake_word)
                .unwrap_or_else(|| "sophie".to_string()),
            listen_seconds: env
                .parse("ASSISTANT_WAKE_LISTEN_SECONDS")?
                .or(fc.wake.listen_seconds)
                .unwrap_or(4.0),
            followup_seconds: env
                .parse("ASSISTANT_WAKE_FOLLOWUP_SECONDS")?
                .or(fc.wake.followup_seconds)
                .unwrap_or(5.0),
        };

        let assistant = AssistantConfig {
            interval_seconds: env
                .parse("ASSISTANT_INTERVAL_SECONDS")?
                .or(fc.assistant.interval_seconds)
                .unwrap_or(8.0),
            context_providers: env
                .string("ASSISTANT_CONTEXT_PROVIDERS")
                .map(|s| split_csv(&s))
                .or(fc.assistant.context_providers)
                .unwrap_or_else(|| BUILTIN_PROVIDERS.iter().map(ToString::to_string).collect()),
            artifacts_dir: env
                .string("ASSISTANT_ARTIFACTS_DIR")
                .map(PathBuf::from)
                .or(fc.assistant.artifacts_dir)
                .unwrap_or_else(|| PathBuf::from("./artifacts")),
            monitor_index: env
                .parse("ASSISTANT_MONITOR_INDEX")?
                .or(fc.assistant.monitor_index)
                .unwrap_or(1),
            shutdown_grace_seconds: env
                .parse("ASSISTANT_SHUTDOWN_GRACE_SECONDS")?
                .or(fc.assistant.shutdown_grace_seconds)
                .unwrap_or(10.0),
            note: None,
            max_turns: None,
        };

        let config = Self {
            openai,
            elevenlabs,
            speech,
            wake,
            assistant,
        };
        config.check_ranges()?;
        Ok(config)
    }

    /// Apply command-line overrides
    ///
    /// # Errors
    ///
    /// Returns error if an override is out of range
    pub fn apply(&mut self, overrides: Overrides) -> Result<()> {
        if let Some(interval) = overrides.interval_seconds {
            self.assistant.interval_seconds = interval;
        }
        if let Some(max_turns) = overrides.max_turns {
            self.assistant.max_turns = Some(max_turns);
        }
        if let Some(note) = overrides.note.filter(|n| !n.trim().is_empty()) {
            self.assistant.note = Some(note);
        }
        if let Some(providers) = overrides.context_providers {
            self.assistant.context_providers = split_csv(&providers);
        }
        if let Some(monitor) = overrides.monitor_index {
            self.assistant.monitor_index = monitor;
        }
        if overrides.no_speech {
            self.speech.enabled = false;
        }
        if overrides.no_autoplay {
            self.speech.autoplay = false;
        }
        if let Some(enabled) = overrides.voice_trigger {
            self.wake.enabled = enabled;
        }
        if let Some(wake_word) = overrides.wake_word {
            self.wake.wake_word = wake_word;
        }

        self.check_ranges()
    }

    /// Check that every credential needed by the enabled features is present
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the first missing variable
    pub fn validate_credentials(&self) -> Result<()> {
        require_secret(self.openai.api_key.as_ref(), "OPENAI_API_KEY")?;

        if self.speech.enabled && self.speech.provider == TtsProvider::ElevenLabs {
            require_secret(self.elevenlabs.api_key.as_ref(), "ELEVENLABS_API_KEY")?;
            if self.elevenlabs.voice_id.as_deref().is_none_or(str::is_empty) {
                return Err(missing("ELEVENLABS_VOICE_ID"));
            }
        }

        if self.wake.enabled && self.wake.wake_word.trim().is_empty() {
            return Err(Error::Config("wake word must not be empty".to_string()));
        }

        Ok(())
    }

    fn check_ranges(&self) -> Result<()> {
        let durations = [
            ("interval", self.assistant.interval_seconds),
            ("shutdown grace", self.assistant.shutdown_grace_seconds),
            ("wake listen", self.wake.listen_seconds),
            ("wake follow-up", self.wake.followup_seconds),
            ("OpenAI timeout", self.openai.timeout_seconds),
            ("ElevenLabs timeout", self.elevenlabs.timeout_seconds),
        ];

        for (name, seconds) in durations {
            Duration::try_from_secs_f64(seconds).map_err(|e| {
                Error::Config(format!(
                    "{name} must be a non-negative number of seconds, got {seconds}: {e}"
                ))
            })?;
            if seconds > MAX_DURATION_SECONDS {
                return Err(Error::Config(format!(
                    "{name} must be at most {MAX_DURATION_SECONDS} seconds, got {seconds}"
                )));
            }
        }

        if self.assistant.interval_seconds <= 0.0 {
            return Err(Error::Config("interval must be greater than zero".to_string()));
        }
        if self.wake.listen_seconds <= 0.0 {
            return Err(Error::Config(
                "wake listen duration must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

fn missing(name: &str) -> Error {
    Error::Config(format!("missing required environment variable: {name}"))
}

fn require_secret(secret: Option<&SecretString>, name: &str) -> Result<()> {
    match secret {
        Some(value) if !value.expose_secret().is_empty() => Ok(()),
        _ => Err(missing(name)),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_sources(|name| map.get(name).cloned(), ConfigFile::default())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();

        assert_eq!(config.openai.model, "gpt-4.1-mini");
        assert_eq!(config.openai.max_output_tokens, 220);
        assert_eq!(config.elevenlabs.output_format, "pcm_16000");
        assert_eq!(config.speech.provider, TtsProvider::ElevenLabs);
        assert!(config.speech.enabled);
        assert!(!config.speech.cleanup_audio);
        assert!(!config.wake.enabled);
        assert_eq!(config.wake.wake_word, "sophie");
        assert_eq!(config.assistant.interval(), Duration::from_secs(8));
        assert_eq!(
            config.assistant.context_providers,
            vec!["timestamp", "environment", "active_window"]
        );
        assert_eq!(config.assistant.audio_dir(), PathBuf::from("./artifacts/audio"));
    }

    #[test]
    fn test_env_values() {
        let config = load(&[
            ("OPENAI_MAX_OUTPUT_TOKENS", "400"),
            ("ASSISTANT_CONTEXT_PROVIDERS", " timestamp, ,active_window "),
            ("ASSISTANT_VOICE_TRIGGER", "Yes"),
            ("ASSISTANT_ENABLE_SPEECH", "off"),
            ("ASSISTANT_TTS_PROVIDER", "OpenAI"),
        ])
        .unwrap();

        assert_eq!(config.openai.max_output_tokens, 400);
        assert_eq!(config.assistant.context_providers, vec!["timestamp", "active_window"]);
        assert!(config.wake.enabled);
        assert!(!config.speech.enabled);
        assert_eq!(config.speech.provider, TtsProvider::OpenAi);
    }

    #[test]
    fn test_blank_values_are_unset() {
        let config = load(&[("OPENAI_MODEL", "   "), ("ASSISTANT_INTERVAL_SECONDS", "")]).unwrap();
        assert_eq!(config.openai.model, "gpt-4.1-mini");
        assert!((config.assistant.interval_seconds - 8.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_invalid_number_is_config_error() {
        let err = load(&[("OPENAI_MAX_OUTPUT_TOKENS", "lots")]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("OPENAI_MAX_OUTPUT_TOKENS"));
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(load(&[("ASSISTANT_INTERVAL_SECONDS", "0")]).is_err());
    }

    #[test]
    fn test_oversized_durations_rejected() {
        let err = load(&[("OPENAI_TIMEOUT_SECONDS", "1e20")]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("OpenAI timeout"));

        assert!(load(&[("ASSISTANT_SHUTDOWN_GRACE_SECONDS", "NaN")]).is_err());
        assert!(load(&[("ASSISTANT_WAKE_FOLLOWUP_SECONDS", "-1")]).is_err());

        let mut config = load(&[]).unwrap();
        for interval in [1e20, 1e19, MAX_DURATION_SECONDS + 1.0] {
            let err = config
                .apply(Overrides {
                    interval_seconds: Some(interval),
                    ..Overrides::default()
                })
                .unwrap_err();
            assert!(err.is_startup_fatal(), "{interval}");
        }

        let mut config = load(&[]).unwrap();
        config
            .apply(Overrides {
                interval_seconds: Some(MAX_DURATION_SECONDS),
                ..Overrides::default()
            })
            .unwrap();
        assert_eq!(config.assistant.interval(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_env_overrides_file() {
        let fc = file::parse_config_file(
            "[openai]\nmodel = \"from-file\"\ntemperature = 0.9\n[wake]\nwake_word = \"lune\"\n",
        )
        .unwrap();
        let config = Config::from_sources(
            |name| (name == "OPENAI_MODEL").then(|| "from-env".to_string()),
            fc,
        )
        .unwrap();

        assert_eq!(config.openai.model, "from-env");
        assert!((config.openai.temperature - 0.9).abs() < f32::EPSILON);
        assert_eq!(config.wake.wake_word, "lune");
    }

    #[test]
    fn test_missing_openai_key() {
        let config = load(&[]).unwrap();
        let err = config.validate_credentials().unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
        assert!(err.is_startup_fatal());
    }

    #[test]
    fn test_speech_credentials_only_when_enabled() {
        let config = load(&[("OPENAI_API_KEY", "sk-test")]).unwrap();
        let err = config.validate_credentials().unwrap_err();
        assert!(err.to_string().contains("ELEVENLABS_API_KEY"));

        let config = load(&[("OPENAI_API_KEY", "sk-test"), ("ELEVENLABS_API_KEY", "el")]).unwrap();
        let err = config.validate_credentials().unwrap_err();
        assert!(err.to_string().contains("ELEVENLABS_VOICE_ID"));

        let mut config = load(&[("OPENAI_API_KEY", "sk-test")]).unwrap();
        config
            .apply(Overrides {
                no_speech: true,
                ..Overrides::default()
            })
            .unwrap();
        assert!(config.validate_credentials().is_ok());
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = load(&[]).unwrap();
        config
            .apply(Overrides {
                interval_seconds: Some(2.5),
                max_turns: Some(3),
                note: Some("what now?".to_string()),
                context_providers: Some("environment".to_string()),
                monitor_index: Some(2),
                no_autoplay: true,
                voice_trigger: Some(true),
                wake_word: Some("lune".to_string()),
                ..Overrides::default()
            })
            .unwrap();

        assert_eq!(config.assistant.interval(), Duration::from_millis(2500));
        assert_eq!(config.assistant.max_turns, Some(3));
        assert_eq!(config.assistant.note.as_deref(), Some("what now?"));
        assert_eq!(config.assistant.context_providers, vec!["environment"]);
        assert_eq!(config.assistant.monitor_index, 2);
        assert!(!config.speech.autoplay);
        assert!(config.wake.enabled);
        assert_eq!(config.wake.wake_word, "lune");
    }

    #[test]
    fn test_parse_bool() {
        for value in ["1", "true", "YES", "y", "On"] {
            assert!(parse_bool(value), "{value}");
        }
        for value in ["0", "false", "no", "maybe"] {
            assert!(!parse_bool(value), "{value}");
        }
    }
}
