//! Audio storage and playback to speakers

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig};
use rubato::{FftFixedIn, Resampler};

use super::tts::SynthesizedAudio;
use crate::{Error, Result};

/// Receives synthesized replies
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Persist audio and return where it was written
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    async fn store(&self, audio: &SynthesizedAudio) -> Result<PathBuf>;

    /// Play a stored file. Best effort: failures are logged, never returned
    async fn play(&self, path: &Path);

    /// Store, then play
    ///
    /// Returns the stored path, or `None` if the file was removed after playback.
    ///
    /// # Errors
    ///
    /// Returns error if the audio could not be stored
    async fn output(&self, audio: &SynthesizedAudio) -> Result<Option<PathBuf>> {
        let path = self.store(audio).await?;
        self.play(&path).await;
        Ok(Some(path))
    }
}

/// Writes reply audio under `<artifacts>/audio` and plays it locally
#[derive(Debug, Clone)]
pub struct LocalAudioOutput {
    output_dir: PathBuf,
    autoplay: bool,
    cleanup_after_playback: bool,
}

impl LocalAudioOutput {
    /// Create an output writing into `output_dir`
    #[must_use]
    pub const fn new(output_dir: PathBuf, autoplay: bool, cleanup_after_playback: bool) -> Self {
        Self {
            output_dir,
            autoplay,
            cleanup_after_playback,
        }
    }

    /// Directory audio files are written to
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn build_output_path(&self, audio: &SynthesizedAudio) -> PathBuf {
        let timestamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        self.output_dir
            .join(format!("assistant_{timestamp}.{}", audio.format.extension()))
    }
}

#[async_trait]
impl AudioSink for LocalAudioOutput {
    async fn store(&self, audio: &SynthesizedAudio) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let path = self.build_output_path(audio);
        tokio::fs::write(&path, &audio.bytes).await?;
        tracing::debug!(path = %path.display(), bytes = audio.bytes.len(), "stored audio");
        Ok(path)
    }

    async fn play(&self, path: &Path) {
        let owned = path.to_path_buf();
        let result = tokio::task::spawn_blocking(move || play_file_blocking(&owned)).await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(path = %path.display(), error = %e, "audio playback failed");
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "audio playback task failed");
            }
        }
    }

    async fn output(&self, audio: &SynthesizedAudio) -> Result<Option<PathBuf>> {
        let path = self.store(audio).await?;

        if !self.autoplay {
            return Ok(Some(path));
        }

        self.play(&path).await;

        if self.cleanup_after_playback {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                tracing::warn!(path = %path.display(), error = %e, "audio cleanup failed");
            }
            return Ok(None);
        }

        Ok(Some(path))
    }
}

/// Decoded mono samples
struct DecodedAudio {
    samples: Vec<f32>,
    sample_rate: u32,
}

/// Decode and play a file on the default output device
fn play_file_blocking(path: &Path) -> Result<()> {
    let bytes = std::fs::read(path)?;
    let decoded = match path.extension().and_then(|e| e.to_str()) {
        Some("mp3") => decode_mp3(&bytes)?,
        _ => decode_wav(&bytes)?,
    };

    let host = cpal::default_host();
    let Some(device) = host.default_output_device() else {
        tracing::info!(path = %path.display(), "no audio output device, skipping playback");
        return Ok(());
    };

    play_samples_blocking(&device, decoded)
}

/// Pick an output config at `sample_rate`, or the device default
fn output_config(device: &cpal::Device, sample_rate: u32) -> Result<StreamConfig> {
    let exact = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .filter(|c| {
            c.sample_format() == SampleFormat::F32
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
        .min_by_key(cpal::SupportedStreamConfigRange::channels);

    if let Some(range) = exact {
        return Ok(range.with_sample_rate(SampleRate(sample_rate)).config());
    }

    let default = device
        .default_output_config()
        .map_err(|e| Error::Audio(e.to_string()))?;
    if default.sample_format() != SampleFormat::F32 {
        return Err(Error::Audio(format!(
            "unsupported output sample format {:?}",
            default.sample_format()
        )));
    }
    Ok(default.config())
}

fn play_samples_blocking(device: &cpal::Device, decoded: DecodedAudio) -> Result<()> {
    if decoded.samples.is_empty() {
        return Ok(());
    }

    let config = output_config(device, decoded.sample_rate)?;
    let channels = usize::from(config.channels);
    let output_rate = config.sample_rate.0;

    let samples = if output_rate == decoded.sample_rate {
        decoded.samples
    } else {
        resample(&decoded.samples, decoded.sample_rate, output_rate)?
    };
    let sample_count = samples.len();

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = output_rate,
        channels,
        samples = sample_count,
        "starting playback"
    );

    let samples = Arc::new(samples);
    let position = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));

    let stream = {
        let samples = Arc::clone(&samples);
        let position = Arc::clone(&position);
        let finished = Arc::clone(&finished);

        device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut pos = position.load(Ordering::Relaxed);
                    for frame in data.chunks_mut(channels) {
                        let sample = samples.get(pos).copied().unwrap_or(0.0);
                        frame.fill(sample);
                        if pos < samples.len() {
                            pos += 1;
                        }
                    }
                    position.store(pos, Ordering::Relaxed);
                    if pos >= samples.len() {
                        finished.store(true, Ordering::Relaxed);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?
    };

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    let duration_ms = (sample_count as u64 * 1000) / u64::from(output_rate.max(1));
    let timeout = Duration::from_millis(duration_ms + 500);
    let start = Instant::now();

    while !finished.load(Ordering::Relaxed) && start.elapsed() < timeout {
        std::thread::sleep(Duration::from_millis(50));
    }

    // Let the device drain its last buffer
    std::thread::sleep(Duration::from_millis(100));

    drop(stream);
    tracing::debug!(samples = sample_count, "playback complete");

    Ok(())
}

/// Decode WAV bytes to mono f32 samples
fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio> {
    let reader =
        hound::WavReader::new(Cursor::new(bytes)).map_err(|e| Error::Audio(e.to_string()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(e.to_string()))?,
        hound::SampleFormat::Int => {
            let scale = 2f32.powi(i32::from(spec.bits_per_sample) - 1);
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| to_f32(v) / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Audio(e.to_string()))?
        }
    };

    Ok(DecodedAudio {
        samples: to_mono(&interleaved, channels),
        sample_rate: spec.sample_rate,
    })
}

/// Decode MP3 bytes to mono f32 samples
fn decode_mp3(mp3_data: &[u8]) -> Result<DecodedAudio> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if sample_rate == 0 {
                    sample_rate = u32::try_from(frame.sample_rate).unwrap_or(0);
                }
                let pcm: Vec<f32> = frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                samples.extend(to_mono(&pcm, frame.channels));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    if sample_rate == 0 {
        return Err(Error::Audio("MP3 contained no frames".to_string()));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

#[allow(clippy::cast_precision_loss)]
const fn to_f32(value: i32) -> f32 {
    value as f32
}

#[allow(clippy::cast_precision_loss)]
fn to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Resample mono audio from `from` Hz to `to` Hz
///
/// The trailing partial chunk is zero-padded and the resampler delay is
/// flushed, then trimmed so the output covers exactly the input duration.
#[allow(clippy::cast_possible_truncation)]
fn resample(samples: &[f32], from: u32, to: u32) -> Result<Vec<f32>> {
    if samples.is_empty() || from == to {
        return Ok(samples.to_vec());
    }

    let mut resampler = FftFixedIn::<f64>::new(from as usize, to as usize, 1024, 2, 1)
        .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

    let chunk_size = resampler.input_frames_next();
    let input: Vec<f64> = samples.iter().map(|&s| f64::from(s)).collect();
    let mut output: Vec<f64> = Vec::new();

    let mut chunks = input.chunks_exact(chunk_size);
    for chunk in chunks.by_ref() {
        let frames = resampler
            .process(&[chunk], None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend_from_slice(&frames[0]);
    }

    let tail = [chunks.remainder()];
    if !tail[0].is_empty() {
        let frames = resampler
            .process_partial(Some(tail.as_slice()), None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend_from_slice(&frames[0]);
    }

    let delay = resampler.output_delay();
    let expected = expected_len(samples.len(), from, to);
    while output.len() < delay + expected {
        let frames = resampler
            .process_partial::<&[f64]>(None, None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        if frames[0].is_empty() {
            break;
        }
        output.extend_from_slice(&frames[0]);
    }

    Ok(output
        .into_iter()
        .skip(delay)
        .take(expected)
        .map(|s| s as f32)
        .collect())
}

/// Output length covering the same duration as `len` input samples
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn expected_len(len: usize, from: u32, to: u32) -> usize {
    (len as f64 * f64::from(to) / f64::from(from)).round() as usize
}
