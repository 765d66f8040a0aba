//! Audio capture from microphone

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig};
use tokio::sync::{mpsc, oneshot};

use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Samples per frame handed to the wake word gate (100 ms)
pub const FRAME_SAMPLES: usize = 1600;

/// Frames buffered between the device thread and the consumer
const FRAME_QUEUE: usize = 64;

/// An open microphone producing fixed-size mono frames
///
/// Dropping the stream releases the input device.
#[async_trait]
pub trait FrameStream: Send {
    /// Next frame of samples, or `None` once the device stopped
    async fn next_frame(&mut self) -> Option<Vec<f32>>;
}

/// Source of microphone streams
#[async_trait]
pub trait Microphone: Send + Sync {
    /// Open the input device
    ///
    /// # Errors
    ///
    /// Returns `Error::Audio` if no usable input device is available
    async fn open(&self) -> Result<Box<dyn FrameStream>>;
}

/// Microphone backed by the default cpal input device
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalMicrophone;

#[async_trait]
impl Microphone for CpalMicrophone {
    async fn open(&self) -> Result<Box<dyn FrameStream>> {
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_QUEUE);
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        // cpal streams are not Send, so the stream lives and dies on its own thread
        std::thread::Builder::new()
            .name("microphone".to_string())
            .spawn(move || {
                let stream = match build_input_stream(frame_tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                // Blocks until the consumer drops its sender
                let _ = stop_rx.recv();
                drop(stream);
                tracing::debug!("audio capture stopped");
            })?;

        ready_rx
            .await
            .map_err(|_| Error::Audio("microphone thread exited early".to_string()))??;

        Ok(Box::new(CpalFrameStream {
            frames: frame_rx,
            _stop: stop_tx,
        }))
    }
}

/// Frames forwarded from the capture thread
struct CpalFrameStream {
    frames: mpsc::Receiver<Vec<f32>>,
    _stop: std::sync::mpsc::Sender<()>,
}

#[async_trait]
impl FrameStream for CpalFrameStream {
    async fn next_frame(&mut self) -> Option<Vec<f32>> {
        self.frames.recv().await
    }
}

/// Open the default input device at 16kHz and start forwarding frames
fn build_input_stream(frames: mpsc::Sender<Vec<f32>>) -> Result<cpal::Stream> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

    // Prefer mono, fall back to the narrowest layout that supports 16kHz
    let supported_config = device
        .supported_input_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .filter(|c| {
            c.sample_format() == SampleFormat::F32
                && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        })
        .min_by_key(cpal::SupportedStreamConfigRange::channels)
        .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

    let config: StreamConfig = supported_config
        .with_sample_rate(SampleRate(SAMPLE_RATE))
        .config();
    let channels = usize::from(config.channels);

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = SAMPLE_RATE,
        channels,
        "audio capture initialized"
    );

    let mut pending: Vec<f32> = Vec::with_capacity(FRAME_SAMPLES * 2);

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                pending.extend(downmix(data, channels));

                while pending.len() >= FRAME_SAMPLES {
                    let frame: Vec<f32> = pending.drain(..FRAME_SAMPLES).collect();
                    if frames.try_send(frame).is_err() {
                        tracing::trace!("frame queue full, dropping frame");
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    tracing::debug!("audio capture started");

    Ok(stream)
}

/// Average interleaved channels down to mono
#[allow(clippy::cast_precision_loss)]
fn downmix(data: &[f32], channels: usize) -> impl Iterator<Item = f32> + '_ {
    data.chunks(channels.max(1))
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
}

/// Calculate RMS energy of audio samples
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
