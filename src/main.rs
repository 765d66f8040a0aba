use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use desktop_assistant::config::{Overrides, TtsProvider};
use desktop_assistant::voice::{
    AudioSink, CpalMicrophone, ElevenLabsSynthesizer, FrameStream, LocalAudioOutput, Microphone,
    OpenAiSynthesizer, SAMPLE_RATE, SpeechSynthesizer, WakeWordGate, WhisperTranscriber,
    calculate_rms,
};
use desktop_assistant::{
    AssistantLoop, Config, ContextProviderRegistry, LoopSettings, OpenAiReasoner,
    PlatformScreenCapturer, ResolvedProvider, RunMode,
};

/// Desktop assistant - looks at your screen and talks you through it
#[derive(Parser)]
#[command(name = "desktop-assistant", version, about)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Run a single cycle and exit with its status
    #[arg(long)]
    once: bool,

    /// Seconds between cycle starts
    #[arg(long, value_name = "SECS")]
    interval: Option<f64>,

    /// Stop after this many cycles
    #[arg(long, value_name = "N")]
    max_turns: Option<u32>,

    /// Note added to every prompt
    #[arg(long)]
    note: Option<String>,

    /// Comma-separated context providers, in order
    #[arg(long, value_name = "CSV")]
    context_providers: Option<String>,

    /// Display passed to the screenshot tool
    #[arg(long, value_name = "N")]
    monitor_index: Option<u32>,

    /// Disable speech synthesis and playback
    #[arg(long)]
    no_speech: bool,

    /// Store audio without playing it
    #[arg(long)]
    no_autoplay: bool,

    /// Wait for the wake word before each cycle
    #[arg(long, overrides_with = "no_voice_trigger")]
    voice_trigger: bool,

    /// Run on the interval timer even if wake gating is configured
    #[arg(long, overrides_with = "voice_trigger")]
    no_voice_trigger: bool,

    /// Wake phrase to listen for
    #[arg(long, value_name = "PHRASE")]
    wake_word: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// List the registered context providers
    Providers,
    /// Print one context snapshot as JSON
    Context,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
}

impl Cli {
    fn overrides(&self) -> Overrides {
        let voice_trigger = if self.voice_trigger {
            Some(true)
        } else if self.no_voice_trigger {
            Some(false)
        } else {
            None
        };

        Overrides {
            interval_seconds: self.interval,
            max_turns: self.max_turns,
            note: self.note.clone(),
            context_providers: self.context_providers.clone(),
            monitor_index: self.monitor_index,
            no_speech: self.no_speech,
            no_autoplay: self.no_autoplay,
            voice_trigger,
            wake_word: self.wake_word.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // -v wins, then RUST_LOG, then ASSISTANT_LOG_LEVEL
    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let level = std::env::var("ASSISTANT_LOG_LEVEL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| "info".to_string());
            EnvFilter::new(level.trim().to_lowercase())
        }),
        1 => EnvFilter::new("info,desktop_assistant=debug"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(cli).await {
        Ok(status) => ExitCode::from(status),
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    let overrides = cli.overrides();

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::Providers => {
                list_providers();
                Ok(0)
            }
            Command::Context => {
                print_context(overrides).await?;
                Ok(0)
            }
            Command::TestMic { duration } => {
                test_mic(duration).await?;
                Ok(0)
            }
        };
    }

    let mut config = Config::load()?;
    config.apply(overrides)?;
    config.validate_credentials()?;

    let providers =
        ContextProviderRegistry::builtin().resolve(&config.assistant.context_providers)?;

    let cancel = CancellationToken::new();
    let mut assistant = build_assistant(&config, providers, cancel.clone())?;

    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping");
            signal_token.cancel();
        }
    });

    if !cli.once {
        return Ok(assistant.execute(RunMode::Continuous).await);
    }

    match assistant.run_once().await {
        Ok(result) => {
            println!("{}", result.text);
            if let Some(path) = result.audio_path {
                println!("Audio saved: {}", path.display());
            }
            Ok(0)
        }
        Err(_) => Ok(1),
    }
}

/// Wire the configured collaborators into a loop
fn build_assistant(
    config: &Config,
    providers: Vec<ResolvedProvider>,
    cancel: CancellationToken,
) -> desktop_assistant::Result<AssistantLoop> {
    let capturer = Arc::new(PlatformScreenCapturer::new(config.assistant.monitor_index));
    let reasoner = Arc::new(OpenAiReasoner::new(&config.openai)?);

    let mut assistant = AssistantLoop::new(capturer, providers, reasoner, cancel.clone())
        .with_settings(LoopSettings::from_config(config));

    if config.speech.enabled {
        let synthesizer: Arc<dyn SpeechSynthesizer> = match config.speech.provider {
            TtsProvider::ElevenLabs => Arc::new(ElevenLabsSynthesizer::new(&config.elevenlabs)?),
            TtsProvider::OpenAi => Arc::new(OpenAiSynthesizer::new(&config.openai)?),
        };
        let sink: Arc<dyn AudioSink> = Arc::new(LocalAudioOutput::new(
            config.assistant.audio_dir(),
            config.speech.autoplay,
            config.speech.cleanup_audio,
        ));
        assistant = assistant.with_speech(synthesizer, sink);
    }

    if config.wake.enabled {
        let gate = WakeWordGate::new(
            Arc::new(CpalMicrophone),
            Arc::new(WhisperTranscriber::new(&config.openai)?),
            &config.wake.wake_word,
            config.wake.max_listen(),
            config.wake.followup(),
            cancel,
        )?;
        tracing::info!(wake_word = %gate.wake_word(), "voice trigger enabled");
        assistant = assistant.with_wake_gate(gate);
    }

    Ok(assistant)
}

fn list_providers() {
    let registry = ContextProviderRegistry::builtin();
    println!("Registered context providers:");
    for name in registry.names() {
        println!("  {name}");
    }
}

async fn print_context(overrides: Overrides) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    config.apply(overrides)?;

    let providers =
        ContextProviderRegistry::builtin().resolve(&config.assistant.context_providers)?;
    let snapshot = ContextProviderRegistry::snapshot(&providers).await;

    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut stream = CpalMicrophone.open().await?;

    println!("Sample rate: {SAMPLE_RATE} Hz");
    println!("---");

    for i in 0..duration {
        let mut samples = Vec::with_capacity(SAMPLE_RATE as usize);
        let second = tokio::time::sleep(Duration::from_secs(1));
        tokio::pin!(second);

        loop {
            tokio::select! {
                () = &mut second => break,
                frame = stream.next_frame() => match frame {
                    Some(frame) => samples.extend(frame),
                    None => anyhow::bail!("microphone stream ended"),
                },
            }
        }

        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    drop(stream);

    println!("\n---");
    println!("Wake word detection needs speech above RMS 0.03.");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}
