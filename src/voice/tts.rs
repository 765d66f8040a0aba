//! Text-to-speech (TTS) processing

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::config::{ElevenLabsConfig, OpenAiConfig};
use crate::{Error, Result};

/// Default PCM rate when an output format does not name one
const DEFAULT_PCM_SAMPLE_RATE: u32 = 16000;

/// Container format of synthesized audio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    /// RIFF/WAV, 16-bit PCM
    Wav,
    /// MPEG layer III
    Mp3,
}

impl AudioFormat {
    /// File extension for this format
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
        }
    }
}

/// Audio produced for one reply
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    /// Encoded audio
    pub bytes: Vec<u8>,
    /// Encoding of `bytes`
    pub format: AudioFormat,
}

/// Turns reply text into audio
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize speech for `text`
    ///
    /// # Errors
    ///
    /// Returns `Error::Synthesis` for empty text or a failed service call
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio>;
}

/// Reject blank text before calling a service
fn cleaned_text(text: &str) -> Result<&str> {
    let cleaned = text.trim();
    if cleaned.is_empty() {
        return Err(Error::Synthesis("cannot synthesize an empty response".to_string()));
    }
    Ok(cleaned)
}

fn http_client(timeout_seconds: f64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs_f64(timeout_seconds))
        .build()
        .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))
}

/// `ElevenLabs` text-to-speech
pub struct ElevenLabsSynthesizer {
    client: reqwest::Client,
    api_key: SecretString,
    voice_id: String,
    base_url: String,
    model_id: String,
    output_format: String,
    stability: f32,
    similarity_boost: f32,
}

impl ElevenLabsSynthesizer {
    /// Create a synthesizer from configuration
    ///
    /// # Errors
    ///
    /// Returns error if the API key or voice id is missing
    pub fn new(config: &ElevenLabsConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.expose_secret().is_empty())
            .ok_or_else(|| {
                Error::Config("missing required environment variable: ELEVENLABS_API_KEY".to_string())
            })?;
        let voice_id = config
            .voice_id
            .clone()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                Error::Config("missing required environment variable: ELEVENLABS_VOICE_ID".to_string())
            })?;

        Ok(Self {
            client: http_client(config.timeout_seconds)?,
            api_key,
            voice_id,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model_id: config.model_id.clone(),
            output_format: config.output_format.clone(),
            stability: config.stability,
            similarity_boost: config.similarity_boost,
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio> {
        #[derive(serde::Serialize)]
        struct VoiceSettings {
            stability: f32,
            similarity_boost: f32,
        }

        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
            voice_settings: VoiceSettings,
        }

        let text = cleaned_text(text)?;
        let is_pcm = self.output_format.starts_with("pcm");

        let request = ElevenLabsRequest {
            text,
            model_id: &self.model_id,
            voice_settings: VoiceSettings {
                stability: self.stability,
                similarity_boost: self.similarity_boost,
            },
        };

        tracing::debug!(
            voice_id = %self.voice_id,
            output_format = %self.output_format,
            chars = text.len(),
            "requesting ElevenLabs speech"
        );

        let response = self
            .client
            .post(format!("{}/text-to-speech/{}", self.base_url, self.voice_id))
            .query(&[("output_format", self.output_format.as_str())])
            .header("xi-api-key", self.api_key.expose_secret())
            .header("Accept", if is_pcm { "audio/pcm" } else { "audio/mpeg" })
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Synthesis(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Synthesis(format!("ElevenLabs TTS error {status}: {body}")));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| Error::Synthesis(format!("failed to read audio: {e}")))?;

        if is_pcm {
            let sample_rate = parse_pcm_sample_rate(&self.output_format);
            Ok(SynthesizedAudio {
                bytes: pcm_to_wav(&audio, sample_rate)?,
                format: AudioFormat::Wav,
            })
        } else {
            Ok(SynthesizedAudio {
                bytes: audio.to_vec(),
                format: AudioFormat::Mp3,
            })
        }
    }
}

/// `OpenAI` text-to-speech
pub struct OpenAiSynthesizer {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    voice: String,
}

impl OpenAiSynthesizer {
    /// Create a synthesizer from the `OpenAI` settings
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(config: &OpenAiConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.expose_secret().is_empty())
            .ok_or_else(|| Error::Config("OpenAI API key required for TTS".to_string()))?;

        Ok(Self {
            client: http_client(config.timeout_seconds)?,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.tts_model.clone(),
            voice: config.tts_voice.clone(),
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            response_format: &'a str,
        }

        let request = TtsRequest {
            model: &self.model,
            input: cleaned_text(text)?,
            voice: &self.voice,
            response_format: "wav",
        };

        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Synthesis(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Synthesis(format!("OpenAI TTS error {status}: {body}")));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| Error::Synthesis(format!("failed to read audio: {e}")))?;

        Ok(SynthesizedAudio {
            bytes: audio.to_vec(),
            format: AudioFormat::Wav,
        })
    }
}

/// Sample rate from an output format like `pcm_16000`
#[must_use]
pub fn parse_pcm_sample_rate(output_format: &str) -> u32 {
    output_format
        .split_once('_')
        .and_then(|(_, rate)| rate.parse().ok())
        .unwrap_or(DEFAULT_PCM_SAMPLE_RATE)
}

/// Wrap raw little-endian 16-bit mono PCM in a WAV container
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn pcm_to_wav(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| Error::Synthesis(e.to_string()))?;

        for pair in pcm.chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
                .map_err(|e| Error::Synthesis(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Synthesis(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
