//! Error types for the voice-command pipeline.

/// Top-level error type for the voice-command system.
#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    /// Invalid configuration value. Fatal at setup, never retried.
    #[error("config error: {0}")]
    Config(String),

    /// Microphone permission denied. Retried only after explicit user action.
    #[error("permission error: {0}")]
    Permission(String),

    /// Speech recognition is not available on this platform. Fatal, no retry.
    #[error("platform unsupported: {0}")]
    Unsupported(String),

    /// Recognition backend error classified as transient (network, audio
    /// capture). Retried with backoff by the lifecycle manager.
    #[error("recognition error: {0}")]
    Recognition(String),

    /// An application action callback failed. Logged and counted, never
    /// propagated to the recognition loop.
    #[error("action error: {0}")]
    Action(String),

    /// Adapter driven outside its contract (not initialized, already
    /// listening, double initialize).
    #[error("adapter state error: {0}")]
    Adapter(String),

    /// Lifecycle state machine error (invalid transition, shut down).
    #[error("lifecycle error: {0}")]
    Lifecycle(String),

    /// Remote transcription service unreachable or timed out.
    #[error("network error: {0}")]
    Network(String),

    /// Remote transcription service answered with a failure.
    #[error("service error: {0}")]
    Service(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VoiceError {
    /// Actionable, user-facing guidance for failures the user can resolve.
    ///
    /// Returns `None` for internal errors where no user action helps.
    #[must_use]
    pub fn user_guidance(&self) -> Option<&'static str> {
        match self {
            VoiceError::Permission(_) => Some(
                "Microphone access is blocked. Enable microphone permission for \
                 this app in your system settings, then tap the microphone \
                 button to try again.",
            ),
            VoiceError::Unsupported(_) => Some(
                "Voice commands are not supported on this device. You can still \
                 trigger every safety action from the on-screen buttons.",
            ),
            _ => None,
        }
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, VoiceError>;
