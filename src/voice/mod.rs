//! Voice processing module
//!
//! Microphone capture, wake word gating, transcription, speech synthesis and
//! playback.

mod capture;
mod playback;
mod stt;
mod tts;
mod wake_word;

pub use capture::{
    CpalMicrophone, FRAME_SAMPLES, FrameStream, Microphone, SAMPLE_RATE, calculate_rms,
    samples_to_wav,
};
pub use playback::{AudioSink, LocalAudioOutput};
pub use stt::{Transcriber, WhisperTranscriber};
pub use tts::{
    AudioFormat, ElevenLabsSynthesizer, OpenAiSynthesizer, SpeechSynthesizer, SynthesizedAudio,
    parse_pcm_sample_rate, pcm_to_wav,
};
pub use wake_word::{
    Activation, UtteranceSegmenter, WakeWordGate, WakeWordState, clean_note, match_wake_word,
};
