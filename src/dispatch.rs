//! Dispatch engine: from transcript to application action.
//!
//! Transcripts that arrive before the system is ready are queued, never
//! dropped, and flushed in FIFO order exactly once when readiness returns.
//! Low-confidence transcripts are recorded and never matched. Action
//! callback failures are caught, logged, and counted; they cannot crash
//! the dispatch loop.

use crate::actions::ActionSink;
use crate::diagnostics::{LogLevel, SharedLogBuffer, log_to};
use crate::matcher::{CommandMatch, FuzzyMatcher};
use crate::metrics::{MisrecognizedReason, SharedMetrics};
use crate::registry::CommandRegistry;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of one dispatch attempt. Unmatched and low-confidence outcomes
/// are diagnostics, not errors; only `Failed` reflects an action error.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The system was not ready; the call was queued for later.
    Queued,
    /// Confidence fell below the threshold; recorded, never matched.
    LowConfidence,
    /// No registry candidate survived fuzzy thresholding.
    NoMatch,
    /// A command matched and its action succeeded.
    Executed {
        /// Invoked action id.
        action_id: String,
        /// Match distance (0 for exact and manual invocations).
        score: f32,
    },
    /// A command matched (or was triggered manually) but the action failed
    /// or was unavailable.
    Failed {
        /// Target action id.
        action_id: String,
        /// Failure detail.
        error: String,
    },
}

/// A deferred invocation captured while the system was not ready.
#[derive(Debug, Clone)]
enum PendingCommand {
    /// A recognized transcript awaiting matching.
    Transcript { transcript: String, confidence: f32 },
    /// A manual trigger bypassing recognition.
    Manual { action_id: String },
}

/// Matches transcripts against the registry and invokes bound actions.
pub struct DispatchEngine {
    registry: CommandRegistry,
    matcher: FuzzyMatcher,
    actions: Arc<dyn ActionSink>,
    metrics: SharedMetrics,
    logs: SharedLogBuffer,
    min_confidence: f32,
    queue: VecDeque<PendingCommand>,
    ready: bool,
}

impl DispatchEngine {
    /// Create an engine. The registry must already be finalized.
    pub fn new(
        registry: CommandRegistry,
        matcher: FuzzyMatcher,
        actions: Arc<dyn ActionSink>,
        metrics: SharedMetrics,
        logs: SharedLogBuffer,
        min_confidence: f32,
    ) -> Self {
        Self {
            registry,
            matcher,
            actions,
            metrics,
            logs,
            min_confidence,
            queue: VecDeque::new(),
            ready: false,
        }
    }

    /// The registry backing this engine, for help/listing surfaces.
    #[must_use]
    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Handle one recognized transcript.
    pub fn handle(&mut self, transcript: &str, confidence: f32) -> DispatchOutcome {
        if !self.ready {
            debug!("system not ready, queueing transcript");
            self.queue.push_back(PendingCommand::Transcript {
                transcript: transcript.to_owned(),
                confidence,
            });
            return DispatchOutcome::Queued;
        }
        self.dispatch_transcript(transcript, confidence)
    }

    /// Manually invoke an action, bypassing recognition. Queued like any
    /// other dispatch while the system is not ready.
    pub fn trigger(&mut self, action_id: &str) -> DispatchOutcome {
        if !self.ready {
            debug!("system not ready, queueing manual trigger for {action_id}");
            self.queue.push_back(PendingCommand::Manual {
                action_id: action_id.to_owned(),
            });
            return DispatchOutcome::Queued;
        }
        self.invoke_manual(action_id)
    }

    /// Flip readiness. Transitioning to ready flushes the queue in FIFO
    /// order, exactly once.
    pub fn set_ready(&mut self, ready: bool) {
        let became_ready = ready && !self.ready;
        self.ready = ready;
        if !became_ready {
            return;
        }
        if self.queue.is_empty() {
            return;
        }
        info!("flushing {} queued command(s)", self.queue.len());
        let pending: Vec<PendingCommand> = self.queue.drain(..).collect();
        for command in pending {
            match command {
                PendingCommand::Transcript {
                    transcript,
                    confidence,
                } => {
                    let _ = self.dispatch_transcript(&transcript, confidence);
                }
                PendingCommand::Manual { action_id } => {
                    let _ = self.invoke_manual(&action_id);
                }
            }
        }
    }

    /// Whether the engine currently accepts dispatches directly.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Number of deferred invocations.
    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Drop all deferred invocations. Used on shutdown.
    pub fn clear_queue(&mut self) {
        self.queue.clear();
    }

    fn dispatch_transcript(&mut self, transcript: &str, confidence: f32) -> DispatchOutcome {
        if confidence < self.min_confidence {
            debug!(
                "confidence {confidence:.2} below threshold {:.2}: {transcript:?}",
                self.min_confidence
            );
            self.record_misrecognized(transcript, confidence, MisrecognizedReason::LowConfidence);
            return DispatchOutcome::LowConfidence;
        }

        match self.matcher.best_match(transcript, &self.registry) {
            Some(matched) => self.execute(&matched, confidence),
            None => {
                info!("no command matched: {transcript:?}");
                self.record_misrecognized(transcript, confidence, MisrecognizedReason::NoMatch);
                log_to(
                    &self.logs,
                    LogLevel::Info,
                    format!("no command matched: {transcript:?}"),
                );
                DispatchOutcome::NoMatch
            }
        }
    }

    fn execute(&mut self, matched: &CommandMatch, confidence: f32) -> DispatchOutcome {
        let entry = &matched.entry;
        let result = self.actions.invoke(&entry.action_id);
        let succeeded = result.is_ok();

        {
            let mut metrics = match self.metrics.lock() {
                Ok(g) => g,
                Err(p) => p.into_inner(),
            };
            metrics.record_command(confidence, entry.critical, succeeded);
            if !succeeded {
                metrics.record_error();
            }
        }

        match result {
            Ok(()) => {
                info!(
                    "dispatched {:?} -> {} (score {:.2})",
                    matched.matched_phrase, entry.action_id, matched.score
                );
                log_to(
                    &self.logs,
                    LogLevel::Info,
                    format!("command {:?} -> {}", entry.phrase, entry.action_id),
                );
                DispatchOutcome::Executed {
                    action_id: entry.action_id.clone(),
                    score: matched.score,
                }
            }
            Err(e) => {
                warn!("action {} failed: {e}", entry.action_id);
                log_to(
                    &self.logs,
                    LogLevel::Error,
                    format!("action {} failed: {e}", entry.action_id),
                );
                DispatchOutcome::Failed {
                    action_id: entry.action_id.clone(),
                    error: e.to_string(),
                }
            }
        }
    }

    fn invoke_manual(&mut self, action_id: &str) -> DispatchOutcome {
        if !self.actions.is_available(action_id) {
            warn!("manual trigger for unavailable action {action_id}");
            let mut metrics = match self.metrics.lock() {
                Ok(g) => g,
                Err(p) => p.into_inner(),
            };
            metrics.record_error();
            return DispatchOutcome::Failed {
                action_id: action_id.to_owned(),
                error: "action unavailable".to_owned(),
            };
        }
        match self.actions.invoke(action_id) {
            Ok(()) => {
                info!("manual trigger {action_id} succeeded");
                log_to(
                    &self.logs,
                    LogLevel::Info,
                    format!("manual trigger {action_id}"),
                );
                DispatchOutcome::Executed {
                    action_id: action_id.to_owned(),
                    score: 0.0,
                }
            }
            Err(e) => {
                warn!("manual trigger {action_id} failed: {e}");
                let mut metrics = match self.metrics.lock() {
                    Ok(g) => g,
                    Err(p) => p.into_inner(),
                };
                metrics.record_error();
                log_to(
                    &self.logs,
                    LogLevel::Error,
                    format!("manual trigger {action_id} failed: {e}"),
                );
                DispatchOutcome::Failed {
                    action_id: action_id.to_owned(),
                    error: e.to_string(),
                }
            }
        }
    }

    fn record_misrecognized(
        &mut self,
        transcript: &str,
        confidence: f32,
        reason: MisrecognizedReason,
    ) {
        let mut metrics = match self.metrics.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        metrics.record_misrecognized(transcript, confidence, reason);
    }
}
