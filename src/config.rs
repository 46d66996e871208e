//! Configuration types for the voice-command pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration for the voice-command system.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Speech recognition settings.
    pub recognition: RecognitionConfig,
    /// Fuzzy matcher settings.
    pub matcher: MatcherConfig,
    /// Dispatch engine settings.
    pub dispatch: DispatchConfig,
    /// Activity / whisper detection settings.
    pub activity: ActivityConfig,
    /// Reconnection and backoff settings.
    pub reconnect: ReconnectConfig,
    /// Remote transcription collaborator settings.
    pub external_stt: ExternalSttConfig,
}

/// Speech recognition configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Recognition language. Short codes (`en`, `es`, `sw`, …) are expanded
    /// to full locale tags; full tags pass through unchanged.
    pub language: String,
    /// Interval between adapter health checks in ms.
    pub health_check_interval_ms: u64,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            language: "en".to_owned(),
            health_check_interval_ms: 30_000,
        }
    }
}

/// Fuzzy matcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Maximum accepted match distance in `[0, 1]`; lower is stricter.
    ///
    /// Typical values:
    ///   - 0.4: strict (near-verbatim phrases only)
    ///   - 0.5: default, tolerates a noisy word or two
    ///   - 0.6: loose (more reach, more false positives)
    pub fuzzy_threshold: f32,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: 0.5,
        }
    }
}

/// Dispatch engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Minimum backend-reported confidence required before a transcript is
    /// matched at all. Below this the utterance is recorded as misrecognized
    /// and never executed.
    pub min_confidence: f32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
        }
    }
}

/// Activity / whisper detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    /// Amplitude at or above which a sample counts as normal speech.
    pub sensitivity: f32,
    /// Amplitude at or above which a sample counts as whispered speech.
    /// Must be below `sensitivity`.
    pub whisper_sensitivity: f32,
    /// Ambient amplitude considered "quiet room". Threshold recalibration
    /// only happens while the moving average sits near this floor.
    pub noise_floor: f32,
    /// Sustained silence duration in ms after which buffered audio is
    /// flushed for out-of-band transcription.
    pub silence_timeout_ms: u64,
    /// Cadence at which amplitude samples arrive, in ms.
    pub sample_interval_ms: u64,
    /// Maximum buffered samples; oldest samples are evicted beyond this.
    pub max_buffer_size: usize,
    /// Confidence assigned to transcripts recovered from flushed audio by
    /// the remote transcription service.
    pub flush_confidence: f32,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            sensitivity: 0.08,
            whisper_sensitivity: 0.03,
            noise_floor: 0.01,
            silence_timeout_ms: 2_000,
            sample_interval_ms: 100,
            max_buffer_size: 1_024,
            flush_confidence: 0.75,
        }
    }
}

/// Reconnection and backoff configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Base retry delay in ms; attempt `n` waits `base * 2^n`, capped.
    pub base_delay_ms: u64,
    /// Upper bound on the retry delay in ms.
    pub max_delay_ms: u64,
    /// Attempts before the system suspends and waits for manual action.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_attempts: 5,
        }
    }
}

/// Remote transcription collaborator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalSttConfig {
    /// HTTP endpoint accepting `{audio, language}` and returning
    /// `{transcript}`. `None` disables out-of-band transcription.
    pub endpoint: Option<String>,
    /// Request timeout in ms.
    pub request_timeout_ms: u64,
}

impl Default for ExternalSttConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            request_timeout_ms: 10_000,
        }
    }
}

impl VoiceConfig {
    /// Validate all tunable values.
    ///
    /// Called once at system construction; a failure here is fatal and is
    /// never retried.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error naming the first offending field.
    pub fn validate(&self) -> crate::error::Result<()> {
        let err = |msg: String| Err(crate::error::VoiceError::Config(msg));

        if self.recognition.language.trim().is_empty() {
            return err("recognition.language must not be empty".into());
        }
        if self.recognition.health_check_interval_ms == 0 {
            return err("recognition.health_check_interval_ms must be positive".into());
        }
        if !(0.0..=1.0).contains(&self.matcher.fuzzy_threshold) {
            return err(format!(
                "matcher.fuzzy_threshold must be in [0, 1], got {}",
                self.matcher.fuzzy_threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.dispatch.min_confidence) {
            return err(format!(
                "dispatch.min_confidence must be in [0, 1], got {}",
                self.dispatch.min_confidence
            ));
        }
        if self.activity.sensitivity <= 0.0 || self.activity.sensitivity > 1.0 {
            return err(format!(
                "activity.sensitivity must be in (0, 1], got {}",
                self.activity.sensitivity
            ));
        }
        if self.activity.whisper_sensitivity <= 0.0
            || self.activity.whisper_sensitivity >= self.activity.sensitivity
        {
            return err(format!(
                "activity.whisper_sensitivity must be in (0, sensitivity), got {}",
                self.activity.whisper_sensitivity
            ));
        }
        if self.activity.noise_floor <= 0.0 {
            return err("activity.noise_floor must be positive".into());
        }
        if self.activity.sample_interval_ms == 0 {
            return err("activity.sample_interval_ms must be positive".into());
        }
        if self.activity.silence_timeout_ms < self.activity.sample_interval_ms {
            return err("activity.silence_timeout_ms must cover at least one sample".into());
        }
        if self.activity.max_buffer_size == 0 {
            return err("activity.max_buffer_size must be positive".into());
        }
        if !(0.0..=1.0).contains(&self.activity.flush_confidence) {
            return err(format!(
                "activity.flush_confidence must be in [0, 1], got {}",
                self.activity.flush_confidence
            ));
        }
        if self.reconnect.base_delay_ms == 0 {
            return err("reconnect.base_delay_ms must be positive".into());
        }
        if self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            return err("reconnect.max_delay_ms must be >= base_delay_ms".into());
        }
        if self.reconnect.max_attempts == 0 {
            return err("reconnect.max_attempts must be positive".into());
        }
        if self.external_stt.request_timeout_ms == 0 {
            return err("external_stt.request_timeout_ms must be positive".into());
        }
        Ok(())
    }

    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::VoiceError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::VoiceError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/aegis/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("aegis").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("aegis")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/aegis-config/config.toml")
        }
    }
}
