//! The action surface the embedding application injects.
//!
//! The core never reaches into application globals; the lifecycle manager
//! receives an [`ActionSink`] exposing exactly the callables it needs, keyed
//! by action id. The core only cares about availability and success — the
//! implementations (camera, dialer, navigation, …) live in the host app.

use std::fmt;

/// Well-known action ids supplied by the host application.
pub mod ids {
    /// Trigger the emergency SOS flow (alerts, siren, location broadcast).
    pub const EMERGENCY_SOS: &str = "emergency.sos";
    /// Capture a photo with the active camera.
    pub const CAPTURE_PHOTO: &str = "camera.capture_photo";
    /// Capture a video clip.
    pub const CAPTURE_VIDEO: &str = "camera.capture_video";
    /// Share the current location with trusted contacts.
    pub const SHARE_LOCATION: &str = "location.share";
    /// Start evidence audio recording.
    pub const START_RECORDING: &str = "recorder.start";
    /// Stop evidence audio recording.
    pub const STOP_RECORDING: &str = "recorder.stop";
    /// Call the user's primary emergency contact.
    pub const CALL_PRIMARY_CONTACT: &str = "contacts.call_primary";
    /// Navigate to the home screen.
    pub const OPEN_HOME: &str = "screen.open.home";
    /// Navigate to the settings screen.
    pub const OPEN_SETTINGS: &str = "screen.open.settings";
    /// Navigate to the contacts screen.
    pub const OPEN_CONTACTS: &str = "screen.open.contacts";
}

/// Error returned by an application action callback.
///
/// Failures here are caught at the dispatch boundary, logged, and counted;
/// they never propagate into the recognition loop.
#[derive(Debug, Clone)]
pub struct ActionError(pub String);

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ActionError {}

/// Callable surface supplied by the host application.
pub trait ActionSink: Send + Sync {
    /// Whether the host can currently perform `action_id`.
    fn is_available(&self, action_id: &str) -> bool;

    /// Invoke the action bound to `action_id`.
    ///
    /// # Errors
    ///
    /// Returns an [`ActionError`] when the host callback fails; the dispatch
    /// engine records it and keeps running.
    fn invoke(&self, action_id: &str) -> std::result::Result<(), ActionError>;
}
