//! Whisper and silence detection from raw audio energy.
//!
//! Receives RMS-like amplitude samples on a fixed cadence while the system
//! is listening and classifies each into silence, whispered speech, or
//! normal speech. Thresholds adapt to the ambient noise floor through an
//! exponential moving average, but only recalibrate while the environment
//! is genuinely quiet, so a noisy street never drags sensitivity upward.
//!
//! Whispered audio is buffered (ring-buffer semantics) and flushed for
//! out-of-band transcription once silence has persisted past the configured
//! timeout.

use crate::config::ActivityConfig;
use std::collections::VecDeque;

/// Classification of one amplitude sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceActivity {
    /// Below the whisper threshold.
    Silence,
    /// Between the whisper and normal-speech thresholds.
    Whisper,
    /// At or above the normal-speech threshold.
    NormalVoice,
}

/// Events produced by the detector for the dispatch path.
#[derive(Debug, Clone, PartialEq)]
pub enum ActivityEvent {
    /// A new contiguous whisper segment began.
    WhisperStarted,
    /// Sustained silence: buffered whisper audio, ready for out-of-band
    /// transcription. The internal buffer is cleared.
    SilenceFlush(Vec<f32>),
}

/// Adaptive energy classifier with a bounded whisper buffer.
#[derive(Debug)]
pub struct ActivityDetector {
    /// Current (adaptive) normal-speech threshold.
    sensitivity: f32,
    /// Current (adaptive) whisper threshold.
    whisper_sensitivity: f32,
    /// Configured baseline thresholds, the recalibration anchor.
    base_sensitivity: f32,
    base_whisper_sensitivity: f32,
    /// Quiet-room amplitude; recalibration only happens near this floor.
    noise_floor: f32,
    /// EMA of recent amplitude.
    ambient_avg: f32,
    /// Consecutive silence samples.
    silence_count: u32,
    /// Silence samples that constitute "sustained" silence.
    silence_threshold: u32,
    /// Whether we are inside a whisper segment.
    in_whisper: bool,
    /// Buffered whisper-era samples awaiting flush.
    buffer: VecDeque<f32>,
    max_buffer_size: usize,
}

impl ActivityDetector {
    /// Create a detector from validated configuration.
    #[must_use]
    pub fn new(config: &ActivityConfig) -> Self {
        let silence_threshold =
            (config.silence_timeout_ms / config.sample_interval_ms).max(1) as u32;
        Self {
            sensitivity: config.sensitivity,
            whisper_sensitivity: config.whisper_sensitivity,
            base_sensitivity: config.sensitivity,
            base_whisper_sensitivity: config.whisper_sensitivity,
            noise_floor: config.noise_floor,
            ambient_avg: config.noise_floor,
            silence_count: 0,
            silence_threshold,
            in_whisper: false,
            buffer: VecDeque::with_capacity(config.max_buffer_size.min(4_096)),
            max_buffer_size: config.max_buffer_size,
        }
    }

    /// Classify one amplitude against the current thresholds.
    #[must_use]
    pub fn classify(&self, amplitude: f32) -> VoiceActivity {
        if amplitude < self.whisper_sensitivity {
            VoiceActivity::Silence
        } else if amplitude < self.sensitivity {
            VoiceActivity::Whisper
        } else {
            VoiceActivity::NormalVoice
        }
    }

    /// Process one amplitude sample, returning an event when a whisper
    /// segment starts or buffered audio becomes ready to flush.
    pub fn process_sample(&mut self, amplitude: f32) -> Option<ActivityEvent> {
        let activity = self.classify(amplitude);
        self.track_ambient(amplitude);

        match activity {
            VoiceActivity::NormalVoice => {
                // Normal speech flows through the main recognition path;
                // it also terminates any whisper segment.
                self.in_whisper = false;
                self.silence_count = 0;
                None
            }
            VoiceActivity::Whisper => {
                self.silence_count = 0;
                self.push_sample(amplitude);
                if self.in_whisper {
                    None
                } else {
                    self.in_whisper = true;
                    Some(ActivityEvent::WhisperStarted)
                }
            }
            VoiceActivity::Silence => {
                // Short gaps stay part of the segment; only actual whisper
                // samples are buffered.
                self.silence_count += 1;
                if self.silence_count >= self.silence_threshold {
                    self.silence_count = 0;
                    self.in_whisper = false;
                    if self.buffer.is_empty() {
                        None
                    } else {
                        Some(ActivityEvent::SilenceFlush(self.buffer.drain(..).collect()))
                    }
                } else {
                    None
                }
            }
        }
    }

    /// Reset all adaptive and segment state. Used on listening restart.
    pub fn reset(&mut self) {
        self.sensitivity = self.base_sensitivity;
        self.whisper_sensitivity = self.base_whisper_sensitivity;
        self.ambient_avg = self.noise_floor;
        self.silence_count = 0;
        self.in_whisper = false;
        self.buffer.clear();
    }

    /// Number of currently buffered samples.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Current normal-speech threshold (adaptive).
    #[must_use]
    pub fn sensitivity(&self) -> f32 {
        self.sensitivity
    }

    /// Current whisper threshold (adaptive).
    #[must_use]
    pub fn whisper_sensitivity(&self) -> f32 {
        self.whisper_sensitivity
    }

    /// Update the ambient EMA and recalibrate thresholds when quiet.
    ///
    /// `avg = avg*0.9 + sample*0.1`. Recalibration only fires while the
    /// average sits near the noise floor, so loud environments cannot push
    /// the thresholds up and deafen the detector.
    fn track_ambient(&mut self, amplitude: f32) {
        self.ambient_avg = self.ambient_avg * 0.9 + amplitude * 0.1;
        if self.ambient_avg <= self.noise_floor * 2.0 {
            self.sensitivity = self.base_sensitivity.max(self.ambient_avg * 4.0);
            self.whisper_sensitivity = self.base_whisper_sensitivity.max(self.ambient_avg * 2.0);
        }
    }

    /// Append to the buffer, evicting the oldest sample when full.
    fn push_sample(&mut self, amplitude: f32) {
        if self.buffer.len() >= self.max_buffer_size {
            self.buffer.pop_front();
        }
        self.buffer.push_back(amplitude);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn test_config() -> ActivityConfig {
        ActivityConfig {
            sensitivity: 0.08,
            whisper_sensitivity: 0.03,
            noise_floor: 0.01,
            silence_timeout_ms: 500,
            sample_interval_ms: 100,
            max_buffer_size: 16,
            flush_confidence: 0.75,
        }
    }

    #[test]
    fn classify_bands() {
        let detector = ActivityDetector::new(&test_config());
        assert_eq!(detector.classify(0.001), VoiceActivity::Silence);
        assert_eq!(detector.classify(0.05), VoiceActivity::Whisper);
        assert_eq!(detector.classify(0.2), VoiceActivity::NormalVoice);
    }

    #[test]
    fn oscillating_whisper_counts_one_segment() {
        let mut detector = ActivityDetector::new(&test_config());
        let mut whisper_starts = 0;
        // Alternates just below and just above the whisper threshold; the
        // silence gaps are shorter than the timeout, so this is one segment.
        for i in 0..20 {
            let amplitude = if i % 2 == 0 { 0.02 } else { 0.04 };
            if let Some(ActivityEvent::WhisperStarted) = detector.process_sample(amplitude) {
                whisper_starts += 1;
            }
        }
        assert_eq!(whisper_starts, 1);
    }

    #[test]
    fn separate_segments_count_separately() {
        let mut detector = ActivityDetector::new(&test_config());
        let mut whisper_starts = 0;
        let mut flushes = 0;
        // Segment, sustained silence (>= 5 samples), segment again.
        let sequence: Vec<f32> = [0.05; 3]
            .into_iter()
            .chain([0.001; 6])
            .chain([0.05; 3])
            .collect();
        for amplitude in sequence {
            match detector.process_sample(amplitude) {
                Some(ActivityEvent::WhisperStarted) => whisper_starts += 1,
                Some(ActivityEvent::SilenceFlush(_)) => flushes += 1,
                None => {}
            }
        }
        assert_eq!(whisper_starts, 2);
        assert_eq!(flushes, 1);
    }

    #[test]
    fn normal_voice_ends_whisper_segment() {
        let mut detector = ActivityDetector::new(&test_config());
        assert_eq!(
            detector.process_sample(0.05),
            Some(ActivityEvent::WhisperStarted)
        );
        assert_eq!(detector.process_sample(0.5), None);
        // A fresh whisper after normal speech is a new segment.
        assert_eq!(
            detector.process_sample(0.05),
            Some(ActivityEvent::WhisperStarted)
        );
    }

    #[test]
    fn sustained_silence_flushes_buffer() {
        let mut detector = ActivityDetector::new(&test_config());
        for _ in 0..4 {
            detector.process_sample(0.05);
        }
        assert_eq!(detector.buffered_len(), 4);

        let mut flushed = None;
        for _ in 0..5 {
            if let Some(ActivityEvent::SilenceFlush(samples)) = detector.process_sample(0.001) {
                flushed = Some(samples);
            }
        }
        let flushed = flushed.expect("silence past the timeout should flush");
        assert_eq!(flushed.len(), 4);
        assert_eq!(detector.buffered_len(), 0);
    }

    #[test]
    fn silence_without_buffer_does_not_flush() {
        let mut detector = ActivityDetector::new(&test_config());
        for _ in 0..20 {
            assert_eq!(detector.process_sample(0.001), None);
        }
    }

    #[test]
    fn buffer_clamps_to_max_size_keeping_recent() {
        let mut detector = ActivityDetector::new(&test_config());
        // 40 distinct whisper amplitudes into a 16-slot buffer.
        for i in 0..40 {
            let amplitude = 0.04 + (i as f32) * 0.0001;
            detector.process_sample(amplitude);
        }
        assert_eq!(detector.buffered_len(), 16);

        // Flush and confirm only the most recent samples survived.
        let mut flushed = None;
        for _ in 0..5 {
            if let Some(ActivityEvent::SilenceFlush(samples)) = detector.process_sample(0.001) {
                flushed = Some(samples);
            }
        }
        let flushed = flushed.unwrap();
        let oldest_kept = 0.04 + 24.0 * 0.0001;
        assert!((flushed[0] - oldest_kept).abs() < 1e-6);
    }

    #[test]
    fn noisy_environment_does_not_raise_thresholds() {
        let mut detector = ActivityDetector::new(&test_config());
        for _ in 0..100 {
            detector.process_sample(0.5);
        }
        assert!((detector.sensitivity() - 0.08).abs() < f32::EPSILON);
        assert!((detector.whisper_sensitivity() - 0.03).abs() < f32::EPSILON);
    }

    #[test]
    fn quiet_environment_keeps_baseline_thresholds() {
        let mut detector = ActivityDetector::new(&test_config());
        for _ in 0..100 {
            detector.process_sample(0.002);
        }
        // Recalibration runs, but the baseline dominates in a quiet room.
        assert!((detector.sensitivity() - 0.08).abs() < f32::EPSILON);
        assert!((detector.whisper_sensitivity() - 0.03).abs() < f32::EPSILON);
    }

    #[test]
    fn reset_restores_baseline_state() {
        let mut detector = ActivityDetector::new(&test_config());
        for _ in 0..10 {
            detector.process_sample(0.05);
        }
        assert!(detector.buffered_len() > 0);
        detector.reset();
        assert_eq!(detector.buffered_len(), 0);
        assert_eq!(detector.process_sample(0.05), Some(ActivityEvent::WhisperStarted));
    }
}
