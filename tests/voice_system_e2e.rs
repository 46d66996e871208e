//! End-to-end tests for the voice-command system.
//!
//! These drive the public `VoiceSystem` surface against a scripted platform
//! backend: setup, listening, dispatch into the injected action sink, queueing
//! while not ready, whisper detection, and the reconnect/suspend policy.

use aegis::actions::ids;
use aegis::test_utils::{RecordingActions, ScriptStep, ScriptedPlatform};
use aegis::{SystemState, VoiceConfig, VoiceSystem};
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Configuration with short backoff windows so reconnect paths run in
/// milliseconds instead of seconds.
fn fast_config() -> VoiceConfig {
    let mut config = VoiceConfig::default();
    config.reconnect.base_delay_ms = 5;
    config.reconnect.max_delay_ms = 40;
    config.reconnect.max_attempts = 3;
    config
}

/// Poll until `cond` holds or the deadline passes.
async fn wait_for<F: Fn() -> bool>(cond: F, what: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// A system wired to a scripted platform. The first (empty) script feeds the
/// setup probe; the rest feed listening sessions in order.
fn system_with_scripts(
    config: VoiceConfig,
    scripts: Vec<Vec<ScriptStep>>,
) -> (VoiceSystem, Arc<ScriptedPlatform>, Arc<RecordingActions>) {
    let mut platform = ScriptedPlatform::continuous().with_script(Vec::new());
    for script in scripts {
        platform = platform.with_script(script);
    }
    let platform = Arc::new(platform);
    let actions = Arc::new(RecordingActions::new());
    let system = VoiceSystem::new(
        config,
        Arc::clone(&platform) as _,
        Arc::clone(&actions) as _,
    )
    .expect("system construction");
    (system, platform, actions)
}

// ---------------------------------------------------------------------------
// Setup and dispatch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn noisy_sos_transcript_invokes_sos_action() {
    let (system, _platform, actions) = system_with_scripts(
        fast_config(),
        vec![vec![
            ScriptStep::transcript("sos plz help", 0.8, true),
            ScriptStep::Hang,
        ]],
    );

    assert!(system.setup_voice_recognition().await.unwrap());
    assert_eq!(system.state(), SystemState::Ready);
    system.start_listening().await.unwrap();
    assert_eq!(system.state(), SystemState::Listening);

    wait_for(
        || actions.invocations().contains(&ids::EMERGENCY_SOS.to_owned()),
        "SOS action",
    )
    .await;
    assert_eq!(actions.invocations(), vec![ids::EMERGENCY_SOS]);

    let metrics = system.metrics();
    assert_eq!(metrics.commands_processed, 1);
    assert_eq!(metrics.critical_commands_processed, 1);
    assert_eq!(metrics.successful_commands, 1);
    assert!((metrics.average_confidence - 0.8).abs() < 1e-6);
    assert!(!system.logs(10).is_empty());

    system.shutdown().await;
}

#[tokio::test]
async fn low_confidence_transcript_is_recorded_not_executed() {
    let (system, _platform, actions) = system_with_scripts(
        fast_config(),
        vec![vec![
            ScriptStep::transcript("take a photo", 0.3, true),
            ScriptStep::Hang,
        ]],
    );

    system.setup_voice_recognition().await.unwrap();
    system.start_listening().await.unwrap();

    wait_for(
        || system.metrics().misrecognized.len() == 1,
        "misrecognized entry",
    )
    .await;
    assert!(actions.invocations().is_empty());
    assert_eq!(system.metrics().commands_processed, 0);

    system.shutdown().await;
}

#[tokio::test]
async fn interim_results_are_not_dispatched() {
    let (system, _platform, actions) = system_with_scripts(
        fast_config(),
        vec![vec![
            ScriptStep::transcript("sos", 0.9, false),
            ScriptStep::transcript("sos", 0.9, true),
            ScriptStep::Hang,
        ]],
    );

    system.setup_voice_recognition().await.unwrap();
    system.start_listening().await.unwrap();

    wait_for(|| !actions.invocations().is_empty(), "final dispatch").await;
    // Only the final transcript reached dispatch.
    assert_eq!(actions.invocations(), vec![ids::EMERGENCY_SOS]);
    assert_eq!(system.metrics().commands_processed, 1);

    system.shutdown().await;
}

// ---------------------------------------------------------------------------
// Command queue
// ---------------------------------------------------------------------------

#[tokio::test]
async fn commands_queued_before_ready_flush_in_fifo_order() {
    let (system, _platform, actions) = system_with_scripts(fast_config(), Vec::new());

    // Not set up yet: everything queues instead of dropping.
    assert!(system.trigger_command(ids::EMERGENCY_SOS).unwrap());
    assert!(system.trigger_command(ids::CAPTURE_PHOTO).unwrap());
    assert!(system.trigger_command(ids::SHARE_LOCATION).unwrap());
    assert_eq!(system.queued_commands(), 3);
    assert!(actions.invocations().is_empty());

    assert!(system.setup_voice_recognition().await.unwrap());

    assert_eq!(
        actions.invocations(),
        vec![ids::EMERGENCY_SOS, ids::CAPTURE_PHOTO, ids::SHARE_LOCATION]
    );
    assert_eq!(system.queued_commands(), 0);

    system.shutdown().await;
}

// ---------------------------------------------------------------------------
// Whisper detection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn oscillating_whisper_amplitudes_count_one_detection() {
    let mut script = Vec::new();
    for i in 0..10 {
        script.push(ScriptStep::Energy(if i % 2 == 0 { 0.02 } else { 0.04 }));
    }
    script.push(ScriptStep::Hang);
    let (system, _platform, _actions) = system_with_scripts(fast_config(), vec![script]);

    system.setup_voice_recognition().await.unwrap();
    system.start_listening().await.unwrap();

    wait_for(|| system.metrics().whisper_detections == 1, "whisper metric").await;
    // Give any stragglers a chance to (wrongly) bump the counter again.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(system.metrics().whisper_detections, 1);

    system.shutdown().await;
}

// ---------------------------------------------------------------------------
// Reconnection policy
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unexpected_session_end_reconnects_and_resumes() {
    // First listening session dies after one utterance; the second hangs.
    let (system, platform, actions) = system_with_scripts(
        fast_config(),
        vec![
            vec![ScriptStep::transcript("sos", 0.9, true)],
            vec![ScriptStep::Hang],
        ],
    );

    system.setup_voice_recognition().await.unwrap();
    system.start_listening().await.unwrap();

    wait_for(|| !actions.invocations().is_empty(), "first dispatch").await;
    wait_for(
        || system.state() == SystemState::Listening && platform.open_calls() == 3,
        "reconnect",
    )
    .await;

    // Permission was re-checked during the restart, not just at setup.
    assert!(platform.permission_checks() >= 2);

    system.shutdown().await;
}

#[tokio::test]
async fn exhausted_reconnect_attempts_suspend_the_system() {
    let mut config = fast_config();
    config.reconnect.max_attempts = 2;
    // One short-lived listening session; no scripts left after that, so
    // every reconnect attempt fails.
    let (system, platform, _actions) =
        system_with_scripts(config, vec![vec![ScriptStep::Energy(0.001)]]);

    system.setup_voice_recognition().await.unwrap();
    system.start_listening().await.unwrap();

    wait_for(|| system.state() == SystemState::Suspended, "suspension").await;
    // probe + first session + exactly max_attempts failed reopens.
    assert_eq!(platform.open_calls(), 4);

    // Suspension is terminal until manual action.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(system.state(), SystemState::Suspended);

    system.shutdown().await;
}

#[tokio::test]
async fn suspended_system_recovers_on_manual_setup() {
    let mut config = fast_config();
    config.reconnect.max_attempts = 1;
    let (system, platform, _actions) =
        system_with_scripts(config, vec![vec![ScriptStep::Energy(0.001)]]);

    system.setup_voice_recognition().await.unwrap();
    system.start_listening().await.unwrap();
    wait_for(|| system.state() == SystemState::Suspended, "suspension").await;

    // Manual action: give the platform a working path and set up again.
    platform.push_script(Vec::new());
    assert!(system.setup_voice_recognition().await.unwrap());
    assert_eq!(system.state(), SystemState::Ready);

    system.shutdown().await;
}

// ---------------------------------------------------------------------------
// Stop and shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stop_listening_releases_the_audio_stream() {
    let (system, platform, _actions) =
        system_with_scripts(fast_config(), vec![vec![ScriptStep::Hang]]);

    system.setup_voice_recognition().await.unwrap();
    system.start_listening().await.unwrap();

    system.stop_listening().await;
    assert_eq!(system.state(), SystemState::Ready);
    // Probe session plus the cancelled listening session.
    wait_for(|| platform.closed_sessions() == 2, "audio release").await;

    // Idempotent.
    system.stop_listening().await;
    assert_eq!(system.state(), SystemState::Ready);

    system.shutdown().await;
}

#[tokio::test]
async fn results_arriving_after_stop_are_ignored() {
    let (system, _platform, actions) = system_with_scripts(
        fast_config(),
        vec![vec![
            ScriptStep::Hang,
            ScriptStep::transcript("sos", 0.9, true),
        ]],
    );

    system.setup_voice_recognition().await.unwrap();
    system.start_listening().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    system.stop_listening().await;
    // The hanging step resolves on cancellation; its trailing transcript
    // belongs to a stale session and must never dispatch.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(actions.invocations().is_empty());
    assert_eq!(system.metrics().commands_processed, 0);

    system.shutdown().await;
}

#[tokio::test]
async fn shutdown_clears_queue_and_logs() {
    let (system, _platform, actions) = system_with_scripts(fast_config(), Vec::new());

    assert!(system.trigger_command(ids::CAPTURE_PHOTO).unwrap());
    assert_eq!(system.queued_commands(), 1);

    system.shutdown().await;
    assert_eq!(system.state(), SystemState::ShutDown);
    assert_eq!(system.queued_commands(), 0);
    assert!(system.logs(50).is_empty());
    // The queued command was dropped, not replayed.
    assert!(actions.invocations().is_empty());
    assert!(system.trigger_command(ids::CAPTURE_PHOTO).is_err());
}

// ---------------------------------------------------------------------------
// Help surface
// ---------------------------------------------------------------------------

#[tokio::test]
async fn command_listing_exposes_the_safety_set() {
    let (system, _platform, _actions) = system_with_scripts(fast_config(), Vec::new());

    let commands = system.commands();
    assert!(commands.iter().any(|c| c.phrase == "sos" && c.critical));
    assert!(commands.iter().any(|c| c.phrase == "capture photo"));

    system.shutdown().await;
}
