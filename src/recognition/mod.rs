//! Speech recognition adapters over platform backends.
//!
//! Platform speech APIs come in two shapes: a continuous streaming service
//! that keeps one session open across utterances, and a one-shot device
//! service that closes its session after each utterance. Both are
//! normalized behind [`RecognitionAdapter`], which emits one common event
//! vocabulary; [`select_backend`] probes the platform's capabilities at
//! startup and picks the right variant.
//!
//! The platform itself is an opaque injected dependency ([`SpeechPlatform`]);
//! this crate never talks to a microphone or a speech model directly.

pub mod oneshot;
pub mod streaming;

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// One transcribed utterance from a recognition backend.
#[derive(Debug, Clone)]
pub struct RecognitionResult {
    /// The transcribed text.
    pub transcript: String,
    /// Backend-reported confidence in `[0, 1]`.
    pub confidence: f32,
    /// Whether this is a final transcription (vs. interim/streaming).
    pub is_final: bool,
    /// When the result arrived.
    pub received_at: Instant,
}

/// Classified recognition error, driving the lifecycle retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionErrorKind {
    /// Network failure reaching the speech service.
    Network,
    /// Audio capture dropped or the device glitched.
    AudioCapture,
    /// The speech service rejected or aborted the request.
    Service,
    /// Microphone permission revoked mid-session.
    PermissionDenied,
    /// Nothing was said in the listening window.
    NoSpeech,
    /// The session was cancelled deliberately.
    Aborted,
}

impl RecognitionErrorKind {
    /// Whether the lifecycle manager should retry with backoff.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            RecognitionErrorKind::Network
                | RecognitionErrorKind::AudioCapture
                | RecognitionErrorKind::Service
        )
    }
}

/// Normalized event emitted by a recognition adapter.
#[derive(Debug, Clone)]
pub enum RecognitionEvent {
    /// Listening began.
    Started,
    /// A transcription (interim or final) arrived.
    Result(RecognitionResult),
    /// Raw audio amplitude sample for the activity detector. The audio
    /// stream is shared with recognition, so energy rides the same channel.
    Energy(f32),
    /// A backend error.
    Error {
        /// Classified error kind.
        kind: RecognitionErrorKind,
        /// Backend-specific detail for logs.
        detail: String,
    },
    /// Listening ended (deliberately or because the backend gave up).
    Ended,
}

/// Raw event from a platform session, before normalization.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A transcription produced by the platform.
    Transcript {
        /// Transcribed text.
        text: String,
        /// Backend-reported confidence.
        confidence: f32,
        /// Whether the platform considers this final.
        is_final: bool,
    },
    /// Audio amplitude sample.
    Energy(f32),
    /// A platform error.
    Error {
        /// Classified error kind.
        kind: RecognitionErrorKind,
        /// Backend-specific detail.
        detail: String,
    },
}

/// Capabilities reported by a platform speech service.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpeechCapabilities {
    /// Whether the service keeps one session open across utterances.
    pub continuous: bool,
    /// Whether interim (non-final) results are delivered.
    pub interim_results: bool,
}

/// Opaque platform speech service supplied by the embedding application.
#[async_trait]
pub trait SpeechPlatform: Send + Sync {
    /// Whether speech recognition exists on this platform at all.
    fn is_supported(&self) -> bool;

    /// What the platform recognizer can do.
    fn capabilities(&self) -> SpeechCapabilities;

    /// Check (and if needed prompt for) microphone permission.
    async fn request_permission(&self) -> bool;

    /// Open a recognition session for a full locale tag.
    ///
    /// # Errors
    ///
    /// Returns a transient error when the session cannot be opened.
    async fn open_session(&self, locale: &str) -> Result<Box<dyn SpeechSession>>;
}

/// A live platform recognition session. Owns the audio stream while open.
#[async_trait]
pub trait SpeechSession: Send {
    /// Receive the next raw event; `None` once the session has ended.
    async fn next_event(&mut self) -> Option<SessionEvent>;

    /// Release the underlying audio stream. Must be idempotent.
    async fn close(&mut self);
}

/// Uniform contract over the two recognition backend variants.
#[async_trait]
pub trait RecognitionAdapter: Send {
    /// Prepare the adapter for a language.
    ///
    /// Short language codes are expanded via [`expand_language_tag`].
    /// Checks platform support and microphone permission.
    ///
    /// # Errors
    ///
    /// `Unsupported` when the platform has no recognizer, `Permission` when
    /// the microphone is denied, `Adapter` when already initialized.
    async fn initialize(&mut self, language: &str) -> Result<()>;

    /// Re-check microphone permission. Run on every explicit restart, not
    /// just the first initialization.
    ///
    /// # Errors
    ///
    /// `Permission` when the microphone is (no longer) allowed.
    async fn check_permission(&self) -> Result<()>;

    /// Begin listening and emitting events.
    ///
    /// # Errors
    ///
    /// `Adapter` when not initialized or already listening; transient
    /// errors when the platform session cannot be opened.
    async fn start(&mut self) -> Result<()>;

    /// Stop listening and release the audio stream. Idempotent; events from
    /// the stale session are fenced off and never delivered.
    async fn stop(&mut self);

    /// Whether a listening session is currently live.
    fn is_listening(&self) -> bool;
}

/// Choose an adapter variant by probing the platform's capabilities.
#[must_use]
pub fn select_backend(
    platform: Arc<dyn SpeechPlatform>,
    events: mpsc::Sender<RecognitionEvent>,
) -> Box<dyn RecognitionAdapter + Send> {
    if platform.capabilities().continuous {
        Box::new(streaming::StreamingAdapter::new(platform, events))
    } else {
        Box::new(oneshot::OneShotAdapter::new(platform, events))
    }
}

/// Expand a short language code to a full locale tag.
///
/// Unmapped codes (including full tags like `en-GB`) pass through unchanged.
#[must_use]
pub fn expand_language_tag(code: &str) -> String {
    let trimmed = code.trim();
    match trimmed.to_lowercase().as_str() {
        "en" => "en-US".to_owned(),
        "es" => "es-ES".to_owned(),
        "fr" => "fr-FR".to_owned(),
        "sw" => "sw-KE".to_owned(),
        "de" => "de-DE".to_owned(),
        "hi" => "hi-IN".to_owned(),
        "ar" => "ar-SA".to_owned(),
        "pt" => "pt-BR".to_owned(),
        "zh" => "zh-CN".to_owned(),
        "ja" => "ja-JP".to_owned(),
        _ => trimmed.to_owned(),
    }
}
