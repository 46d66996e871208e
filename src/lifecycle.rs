//! Lifecycle and reconnection manager for the voice-command system.
//!
//! [`VoiceSystem`] owns the single state machine instance and serializes
//! every transition: adapter events, timer callbacks, and public API calls
//! all funnel through one shared state guarded by short critical sections.
//! Transient recognition failures drive an exponential-backoff reconnect
//! loop; exhausting the attempt budget suspends the system until manual
//! action. Commands arriving while the system is not ready are queued and
//! flushed in order once it is.

use crate::actions::ActionSink;
use crate::activity::{ActivityDetector, ActivityEvent};
use crate::config::{ReconnectConfig, VoiceConfig};
use crate::diagnostics::{self, LogEntry, LogLevel, SharedLogBuffer, log_to};
use crate::dispatch::{DispatchEngine, DispatchOutcome};
use crate::error::{Result, VoiceError};
use crate::external_stt::RemoteTranscriber;
use crate::matcher::FuzzyMatcher;
use crate::metrics::{self, MetricsSnapshot, SharedMetrics};
use crate::recognition::{
    self, RecognitionAdapter, RecognitionErrorKind, RecognitionEvent, SpeechPlatform,
    select_backend,
};
use crate::registry::CommandRegistry;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Depth of the adapter-to-lifecycle event channel.
const EVENT_CHANNEL_SIZE: usize = 64;

/// The one state machine per running system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemState {
    /// Nothing set up yet (or setup failed and awaits another attempt).
    Uninitialized,
    /// `setup_voice_recognition` is in flight.
    Initializing,
    /// Adapter initialized; not currently listening.
    Ready,
    /// Actively listening for commands.
    Listening,
    /// Recovering from a transient failure with backoff.
    Restarting,
    /// Reconnect attempts exhausted; waits for manual action.
    Suspended,
    /// Terminally stopped; resources released.
    ShutDown,
}

impl fmt::Display for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SystemState::Uninitialized => "uninitialized",
            SystemState::Initializing => "initializing",
            SystemState::Ready => "ready",
            SystemState::Listening => "listening",
            SystemState::Restarting => "restarting",
            SystemState::Suspended => "suspended",
            SystemState::ShutDown => "shut down",
        };
        f.write_str(s)
    }
}

/// Exponential backoff policy for reconnection attempts.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    base: Duration,
    max: Duration,
    /// Attempts before the system suspends.
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Build from validated configuration.
    #[must_use]
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self {
            base: Duration::from_millis(config.base_delay_ms),
            max: Duration::from_millis(config.max_delay_ms),
            max_attempts: config.max_attempts,
        }
    }

    /// Delay before 0-based attempt `attempt`: `base * 2^attempt`, capped.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base
            .saturating_mul(2u32.saturating_pow(attempt.min(10)))
            .min(self.max)
    }
}

/// State mutated on the serialized event timeline.
struct Inner {
    state: SystemState,
    dispatch: DispatchEngine,
    detector: ActivityDetector,
    reconnect_attempts: u32,
}

/// Everything the background tasks share with the public handle.
struct Shared {
    config: VoiceConfig,
    platform: Arc<dyn SpeechPlatform>,
    /// At most one adapter instance exists per system instance.
    adapter: tokio::sync::Mutex<Option<Box<dyn RecognitionAdapter + Send>>>,
    inner: Mutex<Inner>,
    metrics: SharedMetrics,
    logs: SharedLogBuffer,
    policy: ReconnectPolicy,
    transcriber: Option<Arc<RemoteTranscriber>>,
    /// Cancelled exactly once, on shutdown; fences all pending timers.
    shutdown: CancellationToken,
    /// Cancels the event/health tasks of the current setup epoch.
    session_cancel: Mutex<Option<CancellationToken>>,
}

/// Public handle to the voice-command system.
pub struct VoiceSystem {
    shared: Arc<Shared>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl VoiceSystem {
    /// Create a system with the standard safety command set.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error for invalid configuration.
    pub fn new(
        config: VoiceConfig,
        platform: Arc<dyn SpeechPlatform>,
        actions: Arc<dyn ActionSink>,
    ) -> Result<Self> {
        Self::with_registry(config, platform, actions, CommandRegistry::with_safety_defaults())
    }

    /// Create a system with a custom command registry.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error for invalid configuration or a registry
    /// that fails finalization (e.g. no critical command).
    pub fn with_registry(
        config: VoiceConfig,
        platform: Arc<dyn SpeechPlatform>,
        actions: Arc<dyn ActionSink>,
        registry: CommandRegistry,
    ) -> Result<Self> {
        config.validate()?;
        registry
            .finalize()
            .map_err(|e| VoiceError::Config(e.to_string()))?;

        let metrics = metrics::shared();
        let logs = diagnostics::shared();
        let dispatch = DispatchEngine::new(
            registry,
            FuzzyMatcher::new(config.matcher.fuzzy_threshold),
            actions,
            Arc::clone(&metrics),
            Arc::clone(&logs),
            config.dispatch.min_confidence,
        );
        let detector = ActivityDetector::new(&config.activity);
        let transcriber = RemoteTranscriber::from_config(&config.external_stt)?.map(Arc::new);
        let policy = ReconnectPolicy::from_config(&config.reconnect);

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                platform,
                adapter: tokio::sync::Mutex::new(None),
                inner: Mutex::new(Inner {
                    state: SystemState::Uninitialized,
                    dispatch,
                    detector,
                    reconnect_attempts: 0,
                }),
                metrics,
                logs,
                policy,
                transcriber,
                shutdown: CancellationToken::new(),
                session_cancel: Mutex::new(None),
            }),
        })
    }

    /// Set up the recognition adapter and become ready.
    ///
    /// Returns `Ok(true)` once ready (including when already ready),
    /// `Ok(false)` when setup is already in flight or a retry has been
    /// scheduled after a transient failure.
    ///
    /// # Errors
    ///
    /// `Permission` and `Unsupported` failures surface synchronously with
    /// actionable guidance; `Lifecycle` after shutdown.
    pub async fn setup_voice_recognition(&self) -> Result<bool> {
        {
            let mut inner = lock(&self.shared.inner);
            match inner.state {
                SystemState::Initializing => return Ok(false),
                SystemState::Ready | SystemState::Listening | SystemState::Restarting => {
                    return Ok(true);
                }
                SystemState::ShutDown => {
                    return Err(VoiceError::Lifecycle("system is shut down".into()));
                }
                SystemState::Uninitialized | SystemState::Suspended => {
                    inner.state = SystemState::Initializing;
                    inner.reconnect_attempts = 0;
                }
            }
        }

        match try_initialize(&self.shared).await {
            Ok(()) => Ok(true),
            Err(e) => handle_setup_failure(&self.shared, e),
        }
    }

    /// Begin listening for voice commands.
    ///
    /// # Errors
    ///
    /// `Lifecycle` unless the system is ready; adapter errors propagate.
    pub async fn start_listening(&self) -> Result<()> {
        {
            let inner = lock(&self.shared.inner);
            match inner.state {
                SystemState::Listening => return Ok(()),
                SystemState::Ready => {}
                other => {
                    return Err(VoiceError::Lifecycle(format!(
                        "cannot start listening while {other}"
                    )));
                }
            }
        }

        let mut guard = self.shared.adapter.lock().await;
        let adapter = guard
            .as_mut()
            .ok_or_else(|| VoiceError::Lifecycle("adapter not initialized".into()))?;
        adapter.start().await?;
        drop(guard);

        let mut inner = lock(&self.shared.inner);
        if inner.state == SystemState::Ready {
            inner.state = SystemState::Listening;
            inner.detector.reset();
        }
        drop(inner);
        info!("listening for voice commands");
        log_to(&self.shared.logs, LogLevel::Info, "listening started");
        Ok(())
    }

    /// Stop listening. Idempotent; also aborts an in-flight reconnect.
    pub async fn stop_listening(&self) {
        if let Some(adapter) = self.shared.adapter.lock().await.as_mut() {
            adapter.stop().await;
        }
        let mut inner = lock(&self.shared.inner);
        if matches!(inner.state, SystemState::Listening | SystemState::Restarting) {
            inner.state = SystemState::Ready;
        }
        inner.detector.reset();
        drop(inner);
        info!("listening stopped");
        log_to(&self.shared.logs, LogLevel::Info, "listening stopped");
    }

    /// Manually invoke an action, bypassing recognition. Queued while the
    /// system is not ready.
    ///
    /// Returns `Ok(true)` when the action executed or was queued, `Ok(false)`
    /// when it failed or was unavailable.
    ///
    /// # Errors
    ///
    /// `Lifecycle` after shutdown.
    pub fn trigger_command(&self, action_id: &str) -> Result<bool> {
        let mut inner = lock(&self.shared.inner);
        if inner.state == SystemState::ShutDown {
            return Err(VoiceError::Lifecycle("system is shut down".into()));
        }
        match inner.dispatch.trigger(action_id) {
            DispatchOutcome::Executed { .. } | DispatchOutcome::Queued => Ok(true),
            _ => Ok(false),
        }
    }

    /// Current state machine state.
    #[must_use]
    pub fn state(&self) -> SystemState {
        lock(&self.shared.inner).state
    }

    /// Number of commands waiting for the system to become ready.
    #[must_use]
    pub fn queued_commands(&self) -> usize {
        lock(&self.shared.inner).dispatch.queued_len()
    }

    /// Snapshot of the performance counters.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        lock(&self.shared.metrics).snapshot()
    }

    /// The most recent `count` diagnostics log entries, oldest first.
    #[must_use]
    pub fn logs(&self, count: usize) -> Vec<LogEntry> {
        lock(&self.shared.logs).recent(count)
    }

    /// Registered commands, for help/listing UIs.
    #[must_use]
    pub fn commands(&self) -> Vec<crate::registry::CommandEntry> {
        lock(&self.shared.inner)
            .dispatch
            .registry()
            .all()
            .cloned()
            .collect()
    }

    /// Shut down: release the adapter and audio stream, cancel every
    /// pending timer, clear the queue and logs. Idempotent and terminal.
    pub async fn shutdown(&self) {
        {
            let mut inner = lock(&self.shared.inner);
            if inner.state == SystemState::ShutDown {
                return;
            }
            inner.state = SystemState::ShutDown;
            inner.dispatch.set_ready(false);
            inner.dispatch.clear_queue();
        }

        if let Some(cancel) = lock(&self.shared.session_cancel).take() {
            cancel.cancel();
        }
        self.shared.shutdown.cancel();

        if let Some(mut adapter) = self.shared.adapter.lock().await.take() {
            adapter.stop().await;
        }

        lock(&self.shared.logs).clear();
        info!("voice system shut down");
    }
}

/// Initialize the adapter, probe the recognition path, and become ready.
async fn try_initialize(shared: &Arc<Shared>) -> Result<()> {
    // Tear down the previous setup epoch, if any.
    if let Some(cancel) = lock(&shared.session_cancel).take() {
        cancel.cancel();
    }
    if let Some(mut old) = shared.adapter.lock().await.take() {
        old.stop().await;
    }

    let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
    let mut adapter = select_backend(Arc::clone(&shared.platform), events_tx);
    adapter
        .initialize(&shared.config.recognition.language)
        .await?;

    // Verify the recognition path end to end before declaring readiness;
    // a service that cannot open a session fails setup transiently and is
    // retried with backoff.
    let locale = recognition::expand_language_tag(&shared.config.recognition.language);
    let mut probe = shared.platform.open_session(&locale).await?;
    probe.close().await;

    *shared.adapter.lock().await = Some(adapter);

    let session_cancel = shared.shutdown.child_token();
    *lock(&shared.session_cancel) = Some(session_cancel.clone());
    tokio::spawn(event_loop(
        Arc::clone(shared),
        events_rx,
        session_cancel.clone(),
    ));
    tokio::spawn(health_loop(Arc::clone(shared), session_cancel));

    let mut inner = lock(&shared.inner);
    inner.state = SystemState::Ready;
    inner.reconnect_attempts = 0;
    inner.dispatch.set_ready(true);
    drop(inner);

    info!("voice recognition ready");
    log_to(&shared.logs, LogLevel::Info, "voice recognition ready");
    Ok(())
}

/// Classify a setup failure: fatal errors surface, transient ones schedule
/// a backoff retry up to the attempt budget.
fn handle_setup_failure(shared: &Arc<Shared>, e: VoiceError) -> Result<bool> {
    match e {
        VoiceError::Permission(_) | VoiceError::Unsupported(_) => {
            let mut inner = lock(&shared.inner);
            inner.state = SystemState::Uninitialized;
            drop(inner);
            if let Some(guidance) = e.user_guidance() {
                log_to(&shared.logs, LogLevel::Error, guidance);
            }
            warn!("voice setup failed: {e}");
            Err(e)
        }
        VoiceError::Config(_) => {
            let mut inner = lock(&shared.inner);
            inner.state = SystemState::Uninitialized;
            drop(inner);
            error!("voice setup failed: {e}");
            Err(e)
        }
        _ => {
            let attempt = {
                let mut inner = lock(&shared.inner);
                inner.reconnect_attempts += 1;
                inner.reconnect_attempts
            };
            if attempt > shared.policy.max_attempts {
                let mut inner = lock(&shared.inner);
                inner.state = SystemState::Suspended;
                drop(inner);
                error!("voice setup suspended after {} attempts: {e}", attempt - 1);
                log_to(
                    &shared.logs,
                    LogLevel::Error,
                    format!("setup suspended after {} attempts", attempt - 1),
                );
                Ok(false)
            } else {
                {
                    let mut inner = lock(&shared.inner);
                    inner.state = SystemState::Uninitialized;
                }
                warn!("voice setup failed transiently (attempt {attempt}): {e}");
                log_to(
                    &shared.logs,
                    LogLevel::Warn,
                    format!("setup failed, retrying: {e}"),
                );
                schedule_setup_retry(shared, attempt);
                Ok(false)
            }
        }
    }
}

/// Sleep through the backoff window, then retry setup if nothing else
/// moved the state meanwhile.
fn schedule_setup_retry(shared: &Arc<Shared>, attempt: u32) {
    let delay = shared.policy.delay(attempt - 1);
    debug!("scheduling setup retry {attempt} in {delay:?}");
    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        tokio::select! {
            _ = shared.shutdown.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        {
            let mut inner = lock(&shared.inner);
            if inner.state != SystemState::Uninitialized {
                return;
            }
            inner.state = SystemState::Initializing;
        }
        if let Err(e) = try_initialize(&shared).await {
            let _ = handle_setup_failure(&shared, e);
        }
    });
}

/// Consume normalized adapter events on the serialized timeline.
async fn event_loop(
    shared: Arc<Shared>,
    mut events: mpsc::Receiver<RecognitionEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        handle_event(&shared, event).await;
    }
    debug!("recognition event loop ended");
}

async fn handle_event(shared: &Arc<Shared>, event: RecognitionEvent) {
    match event {
        RecognitionEvent::Started => {
            debug!("recognition session started");
        }
        RecognitionEvent::Result(result) => {
            if !result.is_final {
                debug!("interim transcript: {:?}", result.transcript);
                return;
            }
            let mut inner = lock(&shared.inner);
            let _ = inner.dispatch.handle(&result.transcript, result.confidence);
        }
        RecognitionEvent::Energy(amplitude) => {
            let activity = {
                let mut inner = lock(&shared.inner);
                inner.detector.process_sample(amplitude)
            };
            match activity {
                Some(ActivityEvent::WhisperStarted) => {
                    lock(&shared.metrics).record_whisper();
                    info!("whisper detected");
                    log_to(&shared.logs, LogLevel::Info, "whisper detected");
                }
                Some(ActivityEvent::SilenceFlush(samples)) => {
                    spawn_flush(shared, samples);
                }
                None => {}
            }
        }
        RecognitionEvent::Error { kind, detail } => {
            warn!("recognition error ({kind:?}): {detail}");
            if kind == RecognitionErrorKind::PermissionDenied {
                lock(&shared.metrics).record_error();
                handle_permission_loss(shared).await;
            } else if kind.is_transient() {
                lock(&shared.metrics).record_error();
                log_to(
                    &shared.logs,
                    LogLevel::Warn,
                    format!("recognition interrupted: {detail}"),
                );
                begin_restart(shared);
            } else {
                // NoSpeech / Aborted are informational outcomes.
                debug!("ignoring non-fatal recognition error: {detail}");
            }
        }
        RecognitionEvent::Ended => {
            let unexpected = lock(&shared.inner).state == SystemState::Listening;
            if unexpected {
                info!("recognition ended unexpectedly, reconnecting");
                log_to(
                    &shared.logs,
                    LogLevel::Warn,
                    "recognition ended unexpectedly",
                );
                begin_restart(shared);
            }
        }
    }
}

/// Ship flushed whisper audio to the remote transcription collaborator and
/// feed the transcript back through the normal dispatch path.
fn spawn_flush(shared: &Arc<Shared>, samples: Vec<f32>) {
    let Some(transcriber) = shared.transcriber.as_ref().map(Arc::clone) else {
        debug!("no transcription endpoint configured, dropping flushed audio");
        return;
    };
    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        let language = recognition::expand_language_tag(&shared.config.recognition.language);
        match transcriber.transcribe(&samples, &language).await {
            Ok(transcript) if !transcript.trim().is_empty() => {
                info!("out-of-band transcription: {transcript:?}");
                let confidence = shared.config.activity.flush_confidence;
                let mut inner = lock(&shared.inner);
                if inner.state == SystemState::ShutDown {
                    return;
                }
                let _ = inner.dispatch.handle(&transcript, confidence);
            }
            Ok(_) => debug!("out-of-band transcription was empty"),
            Err(e) => {
                warn!("out-of-band transcription failed: {e}");
                lock(&shared.metrics).record_error();
                log_to(
                    &shared.logs,
                    LogLevel::Warn,
                    format!("out-of-band transcription failed: {e}"),
                );
            }
        }
    });
}

/// Enter `Restarting` (if eligible) and spawn the reconnect loop.
fn begin_restart(shared: &Arc<Shared>) {
    {
        let mut inner = lock(&shared.inner);
        match inner.state {
            SystemState::Listening | SystemState::Ready => {
                inner.state = SystemState::Restarting;
                inner.dispatch.set_ready(false);
            }
            // Already restarting, suspended, or shut down.
            _ => return,
        }
    }
    tokio::spawn(restart_loop(Arc::clone(shared)));
}

/// Reconnect with exponential backoff until success, suspension, or the
/// state machine moves on. The attempt counter resets only on success.
async fn restart_loop(shared: Arc<Shared>) {
    loop {
        let attempt = {
            let mut inner = lock(&shared.inner);
            if inner.state != SystemState::Restarting {
                return;
            }
            inner.reconnect_attempts += 1;
            inner.reconnect_attempts
        };

        if attempt > shared.policy.max_attempts {
            let mut inner = lock(&shared.inner);
            if inner.state == SystemState::Restarting {
                inner.state = SystemState::Suspended;
            }
            drop(inner);
            error!(
                "reconnect suspended after {} attempts",
                shared.policy.max_attempts
            );
            log_to(
                &shared.logs,
                LogLevel::Error,
                format!(
                    "voice recognition suspended after {} failed reconnect attempts",
                    shared.policy.max_attempts
                ),
            );
            return;
        }

        let delay = shared.policy.delay(attempt - 1);
        info!("reconnect attempt {attempt} in {delay:?}");
        tokio::select! {
            _ = shared.shutdown.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        if lock(&shared.inner).state != SystemState::Restarting {
            return;
        }

        let mut guard = shared.adapter.lock().await;
        let Some(adapter) = guard.as_mut() else {
            return;
        };

        // Permission is re-checked on every restart, not just the first
        // initialization.
        if let Err(e) = adapter.check_permission().await {
            drop(guard);
            warn!("permission lost during reconnect: {e}");
            handle_permission_loss(&shared).await;
            return;
        }

        adapter.stop().await;
        match adapter.start().await {
            Ok(()) => {
                drop(guard);
                let mut inner = lock(&shared.inner);
                if inner.state == SystemState::Restarting {
                    inner.state = SystemState::Listening;
                    inner.reconnect_attempts = 0;
                    inner.detector.reset();
                    inner.dispatch.set_ready(true);
                }
                drop(inner);
                info!("reconnected after {attempt} attempt(s)");
                log_to(&shared.logs, LogLevel::Info, "voice recognition reconnected");
                return;
            }
            Err(e) => {
                drop(guard);
                warn!("reconnect attempt {attempt} failed: {e}");
            }
        }
    }
}

/// Runtime permission loss: stop the adapter and wait for user action.
async fn handle_permission_loss(shared: &Arc<Shared>) {
    if let Some(adapter) = shared.adapter.lock().await.as_mut() {
        adapter.stop().await;
    }
    {
        let mut inner = lock(&shared.inner);
        if inner.state != SystemState::ShutDown {
            inner.state = SystemState::Uninitialized;
            inner.dispatch.set_ready(false);
        }
    }
    let guidance = VoiceError::Permission(String::new())
        .user_guidance()
        .unwrap_or_default();
    warn!("microphone permission lost");
    log_to(
        &shared.logs,
        LogLevel::Error,
        format!("microphone permission lost. {guidance}"),
    );
}

/// Periodic liveness check while the system claims to be listening.
async fn health_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    let interval = Duration::from_millis(shared.config.recognition.health_check_interval_ms);
    let mut ticker = tokio::time::interval(interval);
    // Skip the immediate first tick.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        if lock(&shared.inner).state != SystemState::Listening {
            continue;
        }
        let alive = shared
            .adapter
            .lock()
            .await
            .as_ref()
            .is_some_and(|a| a.is_listening());
        if !alive {
            warn!("health check failed: adapter is not listening");
            log_to(
                &shared.logs,
                LogLevel::Warn,
                "health check failed, reconnecting",
            );
            begin_restart(&shared);
        }
    }
}
