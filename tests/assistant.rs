//! Assistant loop integration tests
//!
//! Runs the loop against scripted collaborators on a paused clock

use std::sync::Arc;
use std::time::Duration;

use desktop_assistant::config::Overrides;
use desktop_assistant::config::file::ConfigFile;
use desktop_assistant::voice::WakeWordGate;
use desktop_assistant::{
    AssistantLoop, Config, ContextProviderRegistry, LoopSettings, LoopState, ResolvedProvider,
    RunMode, Stage,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

mod common;
use common::{
    BrokenProvider, CountingSynthesizer, FakeCapturer, FakeMicrophone, RecordingSink,
    ScriptedReasoner, ScriptedTranscriber, StaticProvider, utterance_frames,
};

fn settings(interval: Duration) -> LoopSettings {
    LoopSettings {
        interval,
        ..LoopSettings::default()
    }
}

fn assistant(reasoner: &Arc<ScriptedReasoner>, cancel: &CancellationToken) -> AssistantLoop {
    AssistantLoop::new(
        Arc::new(FakeCapturer::default()),
        Vec::new(),
        reasoner.clone(),
        cancel.clone(),
    )
}

/// Paused-clock timer deadlines land on millisecond ticks
fn assert_close(actual: Duration, expected: Duration) {
    assert!(
        actual.abs_diff(expected) <= Duration::from_millis(2),
        "expected {expected:?}, got {actual:?}"
    );
}

fn providers() -> Vec<ResolvedProvider> {
    let mut registry = ContextProviderRegistry::new();
    registry
        .register("weather", Arc::new(StaticProvider(json!({"sky": "clear"}))))
        .unwrap();
    registry.register("calendar", Arc::new(BrokenProvider)).unwrap();
    registry.resolve(&["calendar", "weather"]).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_interval_measured_between_starts() {
    let reasoner = Arc::new(ScriptedReasoner::replying("ok").with_delay(Duration::from_secs(3)));
    let cancel = CancellationToken::new();
    let mut assistant = assistant(&reasoner, &cancel).with_settings(LoopSettings {
        max_turns: Some(4),
        ..settings(Duration::from_secs(8))
    });

    assert_eq!(assistant.run().await, 4);

    let starts = reasoner.starts();
    assert_eq!(starts.len(), 4);
    for pair in starts.windows(2) {
        assert_close(pair[1] - pair[0], Duration::from_secs(8));
    }
}

#[tokio::test(start_paused = true)]
async fn test_slow_cycle_starts_next_immediately() {
    let reasoner = Arc::new(ScriptedReasoner::replying("ok").with_delay(Duration::from_secs(10)));
    let cancel = CancellationToken::new();
    let mut assistant = assistant(&reasoner, &cancel).with_settings(LoopSettings {
        max_turns: Some(3),
        ..settings(Duration::from_secs(8))
    });

    assistant.run().await;

    let starts = reasoner.starts();
    for pair in starts.windows(2) {
        assert_close(pair[1] - pair[0], Duration::from_secs(10));
    }
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_interval_sleep() {
    let reasoner = Arc::new(ScriptedReasoner::replying("ok"));
    let cancel = CancellationToken::new();
    let mut assistant = assistant(&reasoner, &cancel).with_settings(settings(Duration::from_secs(60)));
    let mut state = assistant.subscribe();

    let handle = tokio::spawn(async move {
        let cycles = assistant.run().await;
        (cycles, assistant.state())
    });

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(*state.borrow_and_update(), LoopState::Running);
    assert_eq!(reasoner.calls(), 1);

    cancel.cancel();

    let (cycles, final_state) = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("loop did not stop promptly")
        .unwrap();
    assert_eq!(cycles, 1);
    assert_eq!(final_state, LoopState::Stopped);
    assert_eq!(*state.borrow(), LoopState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_max_turns_stops_loop() {
    let reasoner = Arc::new(ScriptedReasoner::replying("ok"));
    let cancel = CancellationToken::new();
    let mut assistant = assistant(&reasoner, &cancel).with_settings(LoopSettings {
        max_turns: Some(2),
        ..settings(Duration::from_secs(1))
    });

    assert_eq!(assistant.execute(RunMode::Continuous).await, 0);
    assert_eq!(reasoner.calls(), 2);
    assert_eq!(assistant.state(), LoopState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_failed_cycles_do_not_stop_loop() {
    let reasoner = Arc::new(ScriptedReasoner::failing());
    let cancel = CancellationToken::new();
    let synthesizer = Arc::new(CountingSynthesizer::default());
    let mut assistant = assistant(&reasoner, &cancel)
        .with_speech(synthesizer.clone(), Arc::new(RecordingSink::default()))
        .with_settings(LoopSettings {
            max_turns: Some(3),
            ..settings(Duration::from_secs(1))
        });

    assert_eq!(assistant.run().await, 3);
    assert_eq!(reasoner.calls(), 3);
    assert_eq!(synthesizer.calls(), 0);
}

#[tokio::test]
async fn test_once_failure_sets_status_and_skips_speech() {
    let reasoner = Arc::new(ScriptedReasoner::failing());
    let cancel = CancellationToken::new();
    let synthesizer = Arc::new(CountingSynthesizer::default());
    let sink = Arc::new(RecordingSink::default());
    let mut assistant =
        assistant(&reasoner, &cancel).with_speech(synthesizer.clone(), sink.clone());

    assert_eq!(assistant.execute(RunMode::Once).await, 1);
    assert_eq!(synthesizer.calls(), 0);
    assert_eq!(sink.stored(), 0);
}

#[tokio::test]
async fn test_once_reports_failed_stage() {
    let reasoner = Arc::new(ScriptedReasoner::replying("never"));
    let assistant = AssistantLoop::new(
        Arc::new(FakeCapturer::failing()),
        Vec::new(),
        reasoner.clone(),
        CancellationToken::new(),
    );

    let err = assistant.run_once().await.unwrap_err().unwrap();
    assert_eq!(err.stage, Stage::Capture);
    assert_eq!(reasoner.calls(), 0);
}

#[tokio::test]
async fn test_speech_disabled_has_no_audio() {
    let reasoner = Arc::new(ScriptedReasoner::replying("Looks like a failing test."));
    let assistant = assistant(&reasoner, &CancellationToken::new());

    let result = assistant.run_once().await.unwrap();
    assert_eq!(result.text, "Looks like a failing test.");
    assert!(result.audio_path.is_none());
    assert!(result.finished_at >= result.started_at);
}

#[tokio::test]
async fn test_no_speech_cycle_end_to_end() {
    let mut config = Config::from_sources(
        |name| (name == "OPENAI_API_KEY").then(|| "sk-test".to_string()),
        ConfigFile::default(),
    )
    .unwrap();
    config
        .apply(Overrides {
            no_speech: true,
            context_providers: Some("timestamp,active_window".to_string()),
            ..Overrides::default()
        })
        .unwrap();
    config.validate_credentials().unwrap();

    let mut registry = ContextProviderRegistry::new();
    registry
        .register(
            "timestamp",
            Arc::new(StaticProvider(json!({"iso_utc": "2026-10-19T09:30:00+00:00"}))),
        )
        .unwrap();
    registry
        .register(
            "active_window",
            Arc::new(StaticProvider(json!({"title": "main.rs - editor"}))),
        )
        .unwrap();
    registry
        .register("environment", Arc::new(StaticProvider(json!({"os": "linux"}))))
        .unwrap();
    let providers = registry.resolve(&config.assistant.context_providers).unwrap();

    let capturer = Arc::new(FakeCapturer::default());
    let reasoner = Arc::new(ScriptedReasoner::replying("Looks like a code editor."));
    let synthesizer = Arc::new(CountingSynthesizer::default());
    let sink = Arc::new(RecordingSink::default());
    let assistant = AssistantLoop::new(
        capturer.clone(),
        providers,
        reasoner.clone(),
        CancellationToken::new(),
    )
    .with_speech(synthesizer.clone(), sink.clone())
    .with_settings(LoopSettings::from_config(&config));

    let result = assistant.run_once().await.unwrap();
    assert_eq!(result.text, "Looks like a code editor.");
    assert!(result.audio_path.is_none());

    assert_eq!(capturer.calls(), 1);
    assert_eq!(synthesizer.calls(), 0);
    assert_eq!(sink.stored(), 0);
    assert!(sink.played().is_empty());

    assert_eq!(
        reasoner.context_names(),
        vec![vec!["timestamp".to_string(), "active_window".to_string()]]
    );
    let context = &reasoner.contexts()[0];
    assert_eq!(context["active_window"]["title"], "main.rs - editor");
    assert!(context.get("environment").is_none());
}

#[tokio::test]
async fn test_speech_enabled_stores_and_plays() {
    let reasoner = Arc::new(ScriptedReasoner::replying("Save your work."));
    let synthesizer = Arc::new(CountingSynthesizer::default());
    let sink = Arc::new(RecordingSink::default());
    let mut assistant = assistant(&reasoner, &CancellationToken::new())
        .with_speech(synthesizer.clone(), sink.clone());

    assert_eq!(assistant.execute(RunMode::Once).await, 0);
    assert_eq!(synthesizer.calls(), 1);
    assert_eq!(sink.stored(), 1);
    assert_eq!(sink.played().len(), 1);
}

#[tokio::test]
async fn test_cycle_sends_snapshot_and_note() {
    let reasoner = Arc::new(ScriptedReasoner::replying("ok"));
    let assistant = AssistantLoop::new(
        Arc::new(FakeCapturer::default()),
        providers(),
        reasoner.clone(),
        CancellationToken::new(),
    )
    .with_settings(LoopSettings {
        note: Some("focus on the terminal".to_string()),
        ..LoopSettings::default()
    });

    assert_eq!(assistant.provider_names(), vec!["calendar", "weather"]);
    assistant.run_once().await.unwrap();

    let context = &reasoner.contexts()[0];
    assert_eq!(context["weather"], json!({"sky": "clear"}));
    assert_eq!(context["calendar"]["status"], "unavailable");
    assert_eq!(
        reasoner.notes(),
        vec![Some("focus on the terminal".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_stop_lets_cycle_finish_within_grace() {
    let reasoner = Arc::new(ScriptedReasoner::replying("done").with_delay(Duration::from_secs(3)));
    let cancel = CancellationToken::new();
    let assistant = assistant(&reasoner, &cancel);

    let handle = tokio::spawn(async move { assistant.run_once().await });

    tokio::time::sleep(Duration::from_secs(1)).await;
    cancel.cancel();

    let result = handle.await.unwrap().unwrap();
    assert_eq!(result.text, "done");
}

#[tokio::test(start_paused = true)]
async fn test_stop_abandons_cycle_after_grace() {
    let reasoner = Arc::new(ScriptedReasoner::replying("late").with_delay(Duration::from_secs(60)));
    let cancel = CancellationToken::new();
    let assistant = assistant(&reasoner, &cancel).with_settings(LoopSettings {
        shutdown_grace: Duration::from_secs(2),
        ..LoopSettings::default()
    });

    let start = tokio::time::Instant::now();
    let handle = tokio::spawn(async move { assistant.run_once().await });

    tokio::time::sleep(Duration::from_secs(1)).await;
    cancel.cancel();

    let outcome = handle.await.unwrap();
    assert!(matches!(outcome, Err(None)));
    assert!(start.elapsed() < Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn test_wake_gated_cycle_uses_spoken_note() {
    let reasoner = Arc::new(ScriptedReasoner::replying("ok"));
    let cancel = CancellationToken::new();
    let gate = WakeWordGate::new(
        Arc::new(FakeMicrophone::scripted(vec![utterance_frames()])),
        Arc::new(ScriptedTranscriber::saying(&["Lune, explain this chart"])),
        "lune",
        Duration::from_secs(4),
        Duration::ZERO,
        cancel.clone(),
    )
    .unwrap();

    let mut assistant = assistant(&reasoner, &cancel)
        .with_wake_gate(gate)
        .with_settings(LoopSettings {
            max_turns: Some(1),
            note: Some("configured note".to_string()),
            ..LoopSettings::default()
        });

    assert_eq!(assistant.run().await, 1);
    assert_eq!(reasoner.notes(), vec![Some("explain this chart".to_string())]);
}

#[tokio::test(start_paused = true)]
async fn test_wake_gated_loop_waits_without_cycles() {
    let reasoner = Arc::new(ScriptedReasoner::replying("ok"));
    let cancel = CancellationToken::new();
    let gate = WakeWordGate::new(
        Arc::new(FakeMicrophone::default()),
        Arc::new(ScriptedTranscriber::default()),
        "lune",
        Duration::from_secs(4),
        Duration::ZERO,
        cancel.clone(),
    )
    .unwrap();

    let mut assistant = assistant(&reasoner, &cancel)
        .with_wake_gate(gate)
        .with_settings(LoopSettings {
            wake_poll: Duration::from_secs(5),
            ..LoopSettings::default()
        });

    let handle = tokio::spawn(async move { assistant.run().await });

    tokio::time::sleep(Duration::from_secs(12)).await;
    cancel.cancel();

    let cycles = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("loop did not stop promptly")
        .unwrap();
    assert_eq!(cycles, 0);
    assert_eq!(reasoner.calls(), 0);
}
