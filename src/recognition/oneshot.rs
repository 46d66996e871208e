//! One-shot device recognition backend.
//!
//! Wraps a platform service whose sessions close after a single utterance
//! (device-plugin style). The pump re-opens a fresh session each time the
//! previous one ends, so callers observe the same continuous listening
//! contract as the streaming variant.

use super::{
    RecognitionAdapter, RecognitionErrorKind, RecognitionEvent, SpeechPlatform, SpeechSession,
    expand_language_tag, streaming::normalize_event,
};
use crate::error::{Result, VoiceError};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Adapter for single-utterance platform recognizers.
pub struct OneShotAdapter {
    platform: Arc<dyn SpeechPlatform>,
    events: mpsc::Sender<RecognitionEvent>,
    locale: Option<String>,
    /// Bumped on every start *and* stop; a pump only forwards events while
    /// its captured generation is current.
    generation: Arc<AtomicU64>,
    listening: Arc<AtomicBool>,
    cancel: Option<CancellationToken>,
}

impl OneShotAdapter {
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
impl RecognitionAdapter for OneShotAdapter {
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
        info!("one-shot recognizer initialized for {locale}");
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

        // The first session opens synchronously so start() surfaces failures;
        // subsequent sessions are opened by the pump as each one ends.
        let session = self.platform.open_session(&locale).await?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        self.cancel = Some(cancel.clone());
        self.listening.store(true, Ordering::SeqCst);

        tokio::spawn(pump(
            Arc::clone(&self.platform),
            locale,
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

/// Pump one-shot sessions back to back until stopped or the backend fails.
#[allow(clippy::too_many_arguments)]
async fn pump(
    platform: Arc<dyn SpeechPlatform>,
    locale: String,
    first_session: Box<dyn SpeechSession>,
    events: mpsc::Sender<RecognitionEvent>,
    generation: Arc<AtomicU64>,
    my_generation: u64,
    listening: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let _ = events.send(RecognitionEvent::Started).await;

    let mut session = Some(first_session);
    'outer: loop {
        let mut current = match session.take() {
            Some(s) => s,
            None => match platform.open_session(&locale).await {
                Ok(s) => s,
                Err(e) => {
                    warn!("one-shot session reopen failed: {e}");
                    if generation.load(Ordering::SeqCst) == my_generation {
                        let _ = events
                            .send(RecognitionEvent::Error {
                                kind: RecognitionErrorKind::Service,
                                detail: format!("session reopen failed: {e}"),
                            })
                            .await;
                    }
                    break;
                }
            },
        };

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => {
                    current.close().await;
                    break 'outer;
                }
                event = current.next_event() => event,
            };
            let Some(event) = event else {
                // Utterance over; release this session and open the next so
                // callers keep observing continuous listening.
                current.close().await;
                break;
            };
            if generation.load(Ordering::SeqCst) != my_generation {
                debug!("dropping stale recognition event");
                current.close().await;
                break 'outer;
            }
            let _ = events.send(normalize_event(event)).await;
        }

        if cancel.is_cancelled() {
            break;
        }
    }

    listening.store(false, Ordering::SeqCst);
    if generation.load(Ordering::SeqCst) == my_generation {
        let _ = events.send(RecognitionEvent::Ended).await;
    }
}
