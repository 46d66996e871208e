//! Performance counters for the dispatch pipeline.
//!
//! A single [`PerformanceMetrics`] accumulator per running system, mutated
//! only by the dispatch engine and the lifecycle manager. Diagnostics read
//! it through point-in-time [`MetricsSnapshot`]s.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Capacity of the misrecognized-utterance history (FIFO eviction).
pub const MISRECOGNIZED_CAPACITY: usize = 500;

/// Why an utterance was recorded as misrecognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MisrecognizedReason {
    /// Backend confidence fell below the dispatch threshold.
    LowConfidence,
    /// No registry candidate survived fuzzy thresholding.
    NoMatch,
}

/// One misrecognized utterance.
#[derive(Debug, Clone, Serialize)]
pub struct MisrecognizedEntry {
    /// The raw transcript as received from the backend.
    pub transcript: String,
    /// Backend-reported confidence.
    pub confidence: f32,
    /// Why it was not executed.
    pub reason: MisrecognizedReason,
}

/// Accumulated counters; see [`MetricsSnapshot`] for the read side.
#[derive(Debug, Default)]
pub struct PerformanceMetrics {
    commands_processed: u64,
    successful_commands: u64,
    critical_commands_processed: u64,
    average_confidence: f64,
    confidence_samples: u64,
    error_count: u64,
    whisper_detections: u64,
    misrecognized: VecDeque<MisrecognizedEntry>,
}

/// Point-in-time copy of the metrics, safe to hand to diagnostics UIs.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Transcripts that entered matching (confidence gate passed).
    pub commands_processed: u64,
    /// Matched commands whose action callback succeeded.
    pub successful_commands: u64,
    /// Matched commands flagged critical (e.g. emergency SOS).
    pub critical_commands_processed: u64,
    /// Running mean of backend confidence over matched commands.
    pub average_confidence: f64,
    /// Action callback failures plus recognition errors.
    pub error_count: u64,
    /// Contiguous whisper segments observed.
    pub whisper_detections: u64,
    /// Bounded history of utterances that were not executed.
    pub misrecognized: Vec<MisrecognizedEntry>,
}

impl PerformanceMetrics {
    /// Record a matched command: updates counters and the running mean.
    ///
    /// The mean is a true running mean, `(avg*(n-1) + x) / n`.
    pub fn record_command(&mut self, confidence: f32, critical: bool, succeeded: bool) {
        self.commands_processed += 1;
        if succeeded {
            self.successful_commands += 1;
        }
        if critical {
            self.critical_commands_processed += 1;
        }
        self.confidence_samples += 1;
        let n = self.confidence_samples as f64;
        self.average_confidence =
            (self.average_confidence * (n - 1.0) + f64::from(confidence)) / n;
    }

    /// Record an action or recognition error.
    pub fn record_error(&mut self) {
        self.error_count += 1;
    }

    /// Record the start of a contiguous whisper segment.
    pub fn record_whisper(&mut self) {
        self.whisper_detections += 1;
    }

    /// Record an utterance that was not executed, evicting the oldest entry
    /// once the history is full.
    pub fn record_misrecognized(
        &mut self,
        transcript: &str,
        confidence: f32,
        reason: MisrecognizedReason,
    ) {
        if self.misrecognized.len() >= MISRECOGNIZED_CAPACITY {
            self.misrecognized.pop_front();
        }
        self.misrecognized.push_back(MisrecognizedEntry {
            transcript: transcript.to_owned(),
            confidence,
            reason,
        });
    }

    /// Point-in-time snapshot.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            commands_processed: self.commands_processed,
            successful_commands: self.successful_commands,
            critical_commands_processed: self.critical_commands_processed,
            average_confidence: self.average_confidence,
            error_count: self.error_count,
            whisper_detections: self.whisper_detections,
            misrecognized: self.misrecognized.iter().cloned().collect(),
        }
    }

    /// Clear all counters. Only a full restart of the system does this;
    /// reconnections never touch the accumulator.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// A metrics accumulator shared between the dispatch engine and the
/// lifecycle manager.
pub type SharedMetrics = Arc<Mutex<PerformanceMetrics>>;

/// Create a fresh shared accumulator.
#[must_use]
pub fn shared() -> SharedMetrics {
    Arc::new(Mutex::new(PerformanceMetrics::default()))
}
