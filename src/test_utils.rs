//! Shared test doubles used across unit and integration tests.
//!
//! [`ScriptedPlatform`] plays back pre-scripted recognition sessions so the
//! adapters and the lifecycle manager can be exercised without any real
//! speech backend; [`RecordingActions`] records which application actions
//! were invoked.

use crate::actions::{ActionError, ActionSink};
use crate::error::{Result, VoiceError};
use crate::recognition::{
    RecognitionErrorKind, RecognitionEvent, SessionEvent, SpeechCapabilities, SpeechPlatform,
    SpeechSession,
};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// One scripted session event.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Deliver a transcription.
    Transcript {
        /// Transcribed text.
        text: String,
        /// Backend confidence.
        confidence: f32,
        /// Whether the platform considers it final.
        is_final: bool,
    },
    /// Deliver an amplitude sample.
    Energy(f32),
    /// Deliver a backend error.
    Error {
        /// Classified kind.
        kind: RecognitionErrorKind,
        /// Detail string.
        detail: String,
    },
    /// Block until the session is cancelled (models an open microphone).
    Hang,
}

impl ScriptStep {
    /// Shorthand for a transcript step.
    #[must_use]
    pub fn transcript(text: &str, confidence: f32, is_final: bool) -> Self {
        ScriptStep::Transcript {
            text: text.to_owned(),
            confidence,
            is_final,
        }
    }
}

/// A scripted platform speech service.
pub struct ScriptedPlatform {
    supported: bool,
    permission: AtomicBool,
    capabilities: SpeechCapabilities,
    scripts: Mutex<VecDeque<Vec<ScriptStep>>>,
    fail_opens: AtomicUsize,
    open_calls: AtomicUsize,
    permission_checks: AtomicUsize,
    closed_sessions: Arc<AtomicUsize>,
}

impl ScriptedPlatform {
    /// A platform with a continuous (streaming) recognizer.
    #[must_use]
    pub fn continuous() -> Self {
        Self::with_capabilities(SpeechCapabilities {
            continuous: true,
            interim_results: true,
        })
    }

    /// A platform with a one-shot (device plugin) recognizer.
    #[must_use]
    pub fn one_shot() -> Self {
        Self::with_capabilities(SpeechCapabilities {
            continuous: false,
            interim_results: false,
        })
    }

    fn with_capabilities(capabilities: SpeechCapabilities) -> Self {
        Self {
            supported: true,
            permission: AtomicBool::new(true),
            capabilities,
            scripts: Mutex::new(VecDeque::new()),
            fail_opens: AtomicUsize::new(0),
            open_calls: AtomicUsize::new(0),
            permission_checks: AtomicUsize::new(0),
            closed_sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Mark the platform as having no speech recognizer.
    #[must_use]
    pub fn unsupported(mut self) -> Self {
        self.supported = false;
        self
    }

    /// Deny microphone permission from the start.
    #[must_use]
    pub fn without_permission(self) -> Self {
        self.permission.store(false, Ordering::SeqCst);
        self
    }

    /// Queue a session script; each `open_session` call consumes one.
    /// Once scripts are exhausted further opens fail with a transient error.
    #[must_use]
    pub fn with_script(self, steps: Vec<ScriptStep>) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.push_back(steps);
        }
        self
    }

    /// Fail the next `n` `open_session` calls before consuming any script.
    #[must_use]
    pub fn fail_next_opens(self, n: usize) -> Self {
        self.fail_opens.store(n, Ordering::SeqCst);
        self
    }

    /// Grant or revoke microphone permission at runtime.
    pub fn set_permission(&self, granted: bool) {
        self.permission.store(granted, Ordering::SeqCst);
    }

    /// Append a session script at runtime.
    pub fn push_script(&self, steps: Vec<ScriptStep>) {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.push_back(steps);
        }
    }

    /// How many sessions were opened.
    #[must_use]
    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    /// How many times permission was checked.
    #[must_use]
    pub fn permission_checks(&self) -> usize {
        self.permission_checks.load(Ordering::SeqCst)
    }

    /// How many sessions were closed (audio stream released).
    #[must_use]
    pub fn closed_sessions(&self) -> usize {
        self.closed_sessions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechPlatform for ScriptedPlatform {
    fn is_supported(&self) -> bool {
        self.supported
    }

    fn capabilities(&self) -> SpeechCapabilities {
        self.capabilities
    }

    async fn request_permission(&self) -> bool {
        self.permission_checks.fetch_add(1, Ordering::SeqCst);
        self.permission.load(Ordering::SeqCst)
    }

    async fn open_session(&self, _locale: &str) -> Result<Box<dyn SpeechSession>> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);

        let failures = self.fail_opens.load(Ordering::SeqCst);
        if failures > 0 {
            self.fail_opens.store(failures - 1, Ordering::SeqCst);
            return Err(VoiceError::Recognition("scripted open failure".into()));
        }

        let steps = {
            let mut scripts = match self.scripts.lock() {
                Ok(g) => g,
                Err(p) => p.into_inner(),
            };
            scripts.pop_front()
        };
        match steps {
            Some(steps) => Ok(Box::new(ScriptedSession {
                steps: steps.into(),
                closed: false,
                closed_counter: Arc::clone(&self.closed_sessions),
            })),
            None => Err(VoiceError::Recognition("no scripted session left".into())),
        }
    }
}

/// A session that plays back its script then ends.
struct ScriptedSession {
    steps: VecDeque<ScriptStep>,
    closed: bool,
    closed_counter: Arc<AtomicUsize>,
}

#[async_trait]
impl SpeechSession for ScriptedSession {
    async fn next_event(&mut self) -> Option<SessionEvent> {
        // Yield so consumers interleave the way real callbacks do.
        tokio::time::sleep(Duration::from_millis(1)).await;
        match self.steps.pop_front()? {
            ScriptStep::Transcript {
                text,
                confidence,
                is_final,
            } => Some(SessionEvent::Transcript {
                text,
                confidence,
                is_final,
            }),
            ScriptStep::Energy(amplitude) => Some(SessionEvent::Energy(amplitude)),
            ScriptStep::Error { kind, detail } => Some(SessionEvent::Error { kind, detail }),
            ScriptStep::Hang => {
                // Parked until the caller cancels and drops this future.
                tokio::time::sleep(Duration::from_secs(30)).await;
                None
            }
        }
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.closed_counter.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Collect adapter events until the channel goes quiet or closes.
pub async fn drain_events(mut rx: mpsc::Receiver<RecognitionEvent>) -> Vec<RecognitionEvent> {
    let mut events = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_millis(250), rx.recv()).await {
            Ok(Some(event)) => events.push(event),
            Ok(None) | Err(_) => break,
        }
    }
    events
}

/// An [`ActionSink`] that records invocations.
#[derive(Default)]
pub struct RecordingActions {
    invoked: Mutex<Vec<String>>,
    failing: HashSet<String>,
    unavailable: HashSet<String>,
}

impl RecordingActions {
    /// All actions available, none failing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make one action id fail on invocation.
    #[must_use]
    pub fn failing(mut self, action_id: &str) -> Self {
        self.failing.insert(action_id.to_owned());
        self
    }

    /// Make one action id report unavailable.
    #[must_use]
    pub fn unavailable(mut self, action_id: &str) -> Self {
        self.unavailable.insert(action_id.to_owned());
        self
    }

    /// Action ids invoked so far, in order.
    #[must_use]
    pub fn invocations(&self) -> Vec<String> {
        match self.invoked.lock() {
            Ok(g) => g.clone(),
            Err(p) => p.into_inner().clone(),
        }
    }
}

impl ActionSink for RecordingActions {
    fn is_available(&self, action_id: &str) -> bool {
        !self.unavailable.contains(action_id)
    }

    fn invoke(&self, action_id: &str) -> std::result::Result<(), ActionError> {
        let mut guard = match self.invoked.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        guard.push(action_id.to_owned());
        if self.failing.contains(action_id) {
            Err(ActionError(format!("scripted failure for {action_id}")))
        } else {
            Ok(())
        }
    }
}
