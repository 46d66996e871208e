//! Continuous streaming recognition backend.
//!
//! Wraps a platform service whose sessions stay open across utterances.
//! One background task pumps session events into the shared event channel;
//! a generation counter fences off events from sessions that were stopped,
//! so a result arriving after `stop()` is never delivered.

use super::{
    RecognitionAdapter, RecognitionEvent, RecognitionResult, SessionEvent, SpeechPlatform,
    SpeechSession, expand_language_tag,
};
use crate::error::{Result, VoiceError};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Adapter for continuous streaming platform recognizers.
pub struct StreamingAdapter {
    platform: Arc<dyn SpeechPlatform>,
    events: mpsc::Sender<RecognitionEvent>,
    locale: Option<String>,
    /// Bumped on every start *and* stop; a pump only forwards events while
    /// its captured generation is current.
    generation: Arc<AtomicU64>,
    listening: Arc<AtomicBool>,
    cancel: Option<CancellationToken>,
}

impl StreamingAdapter {
    /// Create an adapter emitting events into `events`.
    #[must_use]
    pub fn new(platform: Arc<dyn SpeechPlatform>, events: mpsc::Sender<RecognitionEvent>) -> Self {
        Self {
            platform,
            events,
            locale: None,
            generation: Arc::new(AtomicU64::new(0)),
            listening: Arc::new(AtomicBool::new(false)),
            cancel: None,
        }
    }
}

#[async_trait]
impl RecognitionAdapter for StreamingAdapter {
    async fn initialize(&mut self, language: &str) -> Result<()> {
        if self.locale.is_some() {
            return Err(VoiceError::Adapter("already initialized".into()));
        }
        if !self.platform.is_supported() {
            return Err(VoiceError::Unsupported(
                "platform has no speech recognizer".into(),
            ));
        }
        if !self.platform.request_permission().await {
            return Err(VoiceError::Permission("microphone permission denied".into()));
        }
        let locale = expand_language_tag(language);
        info!("streaming recognizer initialized for {locale}");
        self.locale = Some(locale);
        Ok(())
    }

    async fn check_permission(&self) -> Result<()> {
        if self.platform.request_permission().await {
            Ok(())
        } else {
            Err(VoiceError::Permission("microphone permission denied".into()))
        }
    }

    async fn start(&mut self) -> Result<()> {
        let locale = self
            .locale
            .as_ref()
            .ok_or_else(|| VoiceError::Adapter("not initialized".into()))?
            .clone();
        if self.listening.load(Ordering::SeqCst) {
            return Err(VoiceError::Adapter("already listening".into()));
        }

        let session = self.platform.open_session(&locale).await?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        self.cancel = Some(cancel.clone());
        self.listening.store(true, Ordering::SeqCst);

        tokio::spawn(pump(
            session,
            self.events.clone(),
            Arc::clone(&self.generation),
            generation,
            Arc::clone(&self.listening),
            cancel,
        ));
        Ok(())
    }

    async fn stop(&mut self) {
        // Fence first: any event the pump has in flight is now stale.
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        self.listening.store(false, Ordering::SeqCst);
    }

    fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }
}

/// Forward session events to the shared channel until the session ends,
/// the adapter stops, or the generation moves on.
async fn pump(
    mut session: Box<dyn SpeechSession>,
    events: mpsc::Sender<RecognitionEvent>,
    generation: Arc<AtomicU64>,
    my_generation: u64,
    listening: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let _ = events.send(RecognitionEvent::Started).await;

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = session.next_event() => event,
        };
        let Some(event) = event else {
            // Platform closed the session.
            break;
        };
        if generation.load(Ordering::SeqCst) != my_generation {
            debug!("dropping stale recognition event");
            break;
        }
        let _ = events.send(normalize_event(event)).await;
    }

    // The audio stream is released on every exit path.
    session.close().await;
    listening.store(false, Ordering::SeqCst);

    if generation.load(Ordering::SeqCst) == my_generation {
        let _ = events.send(RecognitionEvent::Ended).await;
    }
}

/// Map a raw session event to the normalized vocabulary.
pub(super) fn normalize_event(event: SessionEvent) -> RecognitionEvent {
    match event {
        SessionEvent::Transcript {
            text,
            confidence,
            is_final,
        } => RecognitionEvent::Result(RecognitionResult {
            transcript: text,
            confidence,
            is_final,
            received_at: Instant::now(),
        }),
        SessionEvent::Energy(amplitude) => RecognitionEvent::Energy(amplitude),
        SessionEvent::Error { kind, detail } => RecognitionEvent::Error { kind, detail },
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::test_utils::{ScriptStep, ScriptedPlatform, drain_events};

    #[tokio::test]
    async fn initialize_twice_is_rejected() {
        let platform = Arc::new(ScriptedPlatform::continuous());
        let (tx, _rx) = mpsc::channel(16);
        let mut adapter = StreamingAdapter::new(platform, tx);

        adapter.initialize("en").await.unwrap();
        let err = adapter.initialize("en").await.unwrap_err();
        assert!(matches!(err, VoiceError::Adapter(_)));
    }

    #[tokio::test]
    async fn unsupported_platform_is_rejected() {
        let platform = Arc::new(ScriptedPlatform::continuous().unsupported());
        let (tx, _rx) = mpsc::channel(16);
        let mut adapter = StreamingAdapter::new(platform, tx);

        let err = adapter.initialize("en").await.unwrap_err();
        assert!(matches!(err, VoiceError::Unsupported(_)));
    }

    #[tokio::test]
    async fn denied_permission_is_rejected() {
        let platform = Arc::new(ScriptedPlatform::continuous().without_permission());
        let (tx, _rx) = mpsc::channel(16);
        let mut adapter = StreamingAdapter::new(platform, tx);

        let err = adapter.initialize("en").await.unwrap_err();
        assert!(matches!(err, VoiceError::Permission(_)));
    }

    #[tokio::test]
    async fn start_before_initialize_is_rejected() {
        let platform = Arc::new(ScriptedPlatform::continuous());
        let (tx, _rx) = mpsc::channel(16);
        let mut adapter = StreamingAdapter::new(platform, tx);

        let err = adapter.start().await.unwrap_err();
        assert!(matches!(err, VoiceError::Adapter(_)));
    }

    #[tokio::test]
    async fn session_events_are_forwarded_and_normalized() {
        let platform = Arc::new(ScriptedPlatform::continuous().with_script(vec![
            ScriptStep::Energy(0.04),
            ScriptStep::transcript("sos", 0.9, true),
        ]));
        let (tx, rx) = mpsc::channel(16);
        let mut adapter = StreamingAdapter::new(Arc::clone(&platform) as _, tx);

        adapter.initialize("en").await.unwrap();
        adapter.start().await.unwrap();

        let events = drain_events(rx).await;
        assert!(matches!(events[0], RecognitionEvent::Started));
        assert!(matches!(events[1], RecognitionEvent::Energy(e) if (e - 0.04).abs() < 1e-6));
        match &events[2] {
            RecognitionEvent::Result(r) => {
                assert_eq!(r.transcript, "sos");
                assert!(r.is_final);
            }
            other => unreachable!("expected Result, got {other:?}"),
        }
        assert!(matches!(events.last(), Some(RecognitionEvent::Ended)));
        assert_eq!(platform.closed_sessions(), 1);
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        // A long script keeps the first session alive while we try again.
        let platform = Arc::new(
            ScriptedPlatform::continuous()
                .with_script(vec![ScriptStep::Hang]),
        );
        let (tx, _rx) = mpsc::channel(16);
        let mut adapter = StreamingAdapter::new(platform, tx);

        adapter.initialize("en").await.unwrap();
        adapter.start().await.unwrap();
        let err = adapter.start().await.unwrap_err();
        assert!(matches!(err, VoiceError::Adapter(_)));
        adapter.stop().await;
    }

    #[tokio::test]
    async fn events_after_stop_are_fenced_off() {
        let platform = Arc::new(ScriptedPlatform::continuous().with_script(vec![
            ScriptStep::Hang,
            ScriptStep::transcript("late result", 0.9, true),
        ]));
        let (tx, mut rx) = mpsc::channel(16);
        let mut adapter = StreamingAdapter::new(Arc::clone(&platform) as _, tx);

        adapter.initialize("en").await.unwrap();
        adapter.start().await.unwrap();

        // Consume the Started event, then stop while the session hangs.
        let first = rx.recv().await.unwrap();
        assert!(matches!(first, RecognitionEvent::Started));
        adapter.stop().await;

        // The hanging step resolves on cancellation; the late transcript and
        // the Ended marker must both be suppressed.
        let rest = drain_events(rx).await;
        assert!(
            rest.iter().all(|e| !matches!(e, RecognitionEvent::Result(_))),
            "stale result leaked: {rest:?}"
        );
        assert!(
            rest.iter().all(|e| !matches!(e, RecognitionEvent::Ended)),
            "stale end leaked: {rest:?}"
        );
        assert!(!adapter.is_listening());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let platform = Arc::new(ScriptedPlatform::continuous());
        let (tx, _rx) = mpsc::channel(16);
        let mut adapter = StreamingAdapter::new(platform, tx);

        adapter.initialize("en").await.unwrap();
        adapter.stop().await;
        adapter.stop().await;
        assert!(!adapter.is_listening());
    }
}
