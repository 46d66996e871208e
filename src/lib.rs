//! Aegis: voice-command recognition and dispatch for hands-free safety actions.
//!
//! This crate turns noisy speech transcripts into application actions:
//! Platform speech backend → Recognition Adapter → Dispatch Engine →
//! injected action surface, with an activity detector watching audio
//! energy for whispered speech in parallel.
//!
//! # Architecture
//!
//! Independent components wired together by the lifecycle manager:
//! - **Command registry**: canonical phrases, alternatives, priorities,
//!   and the safety contract that an emergency command must exist
//! - **Fuzzy matcher**: deterministic edit-distance + token-overlap scoring
//! - **Recognition adapters**: one trait, two variants (continuous
//!   streaming vs. one-shot device backends), selected by capability probe
//! - **Activity detector**: adaptive whisper/silence classification with a
//!   bounded audio buffer flushed to a remote transcription collaborator
//! - **Dispatch engine**: confidence gating, matching, action invocation,
//!   metrics, and FIFO queueing while the system is not ready
//! - **Lifecycle manager**: the state machine, exponential-backoff
//!   reconnection, health checks, and shutdown

pub mod actions;
pub mod activity;
pub mod config;
pub mod diagnostics;
pub mod dispatch;
pub mod error;
pub mod external_stt;
pub mod lifecycle;
pub mod matcher;
pub mod metrics;
pub mod recognition;
pub mod registry;
pub mod test_utils;

pub use actions::{ActionError, ActionSink};
pub use config::VoiceConfig;
pub use dispatch::DispatchOutcome;
pub use error::{Result, VoiceError};
pub use lifecycle::{SystemState, VoiceSystem};
pub use metrics::MetricsSnapshot;
pub use recognition::{RecognitionAdapter, SpeechPlatform, SpeechSession};
pub use registry::{CommandEntry, CommandRegistry};
