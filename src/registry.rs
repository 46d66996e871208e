//! Command registry: canonical phrases mapped to application actions.
//!
//! Each [`CommandEntry`] binds one canonical phrase (plus alternative
//! phrasings) to an action id, a priority, and a criticality flag. Entries
//! are immutable once the registry is finalized; the alternatives list is
//! what feeds the fuzzy matcher's candidate set, so no reflection or
//! name-mangling is involved in wiring alternate phrasings.

use crate::actions;
use std::fmt;

/// A single registered voice command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEntry {
    /// The primary registered form of the command.
    pub phrase: String,
    /// Application action id this command triggers.
    pub action_id: String,
    /// Priority for tie-breaking; 1 is highest.
    pub priority: u32,
    /// Whether this is a safety-critical command (e.g. emergency SOS).
    pub critical: bool,
    /// Secondary phrasings mapped to the same action.
    pub alternatives: Vec<String>,
}

/// Errors raised while building or finalizing a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The phrase is already registered (case-insensitive, trimmed).
    DuplicatePhrase(String),
    /// Priority must be a positive integer (1 is highest).
    InvalidPriority(u32),
    /// A finalized registry must contain at least one critical command.
    NoCriticalCommand,
    /// Phrases must contain at least one word.
    EmptyPhrase,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::DuplicatePhrase(p) => write!(f, "phrase already registered: {p:?}"),
            RegistryError::InvalidPriority(p) => {
                write!(f, "priority must be >= 1, got {p}")
            }
            RegistryError::NoCriticalCommand => {
                f.write_str("registry must contain at least one critical command")
            }
            RegistryError::EmptyPhrase => f.write_str("command phrase must not be empty"),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Registry of voice commands, keyed case-insensitively by trimmed phrase.
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    entries: Vec<CommandEntry>,
}

/// Canonical lookup key for a phrase: trimmed and lowercased.
fn phrase_key(phrase: &str) -> String {
    phrase.trim().to_lowercase()
}

impl CommandRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard safety command set this product ships with.
    ///
    /// Emergency SOS is the mandatory critical command; the rest cover the
    /// camera, location sharing, evidence recording, and screen navigation.
    #[must_use]
    pub fn with_safety_defaults() -> Self {
        let mut registry = Self::new();
        let defaults: &[(&str, &str, u32, bool, &[&str])] = &[
            (
                "sos",
                actions::ids::EMERGENCY_SOS,
                1,
                true,
                &["help me", "emergency", "send help"],
            ),
            (
                "capture photo",
                actions::ids::CAPTURE_PHOTO,
                3,
                false,
                &["take a photo", "take a picture"],
            ),
            (
                "capture video",
                actions::ids::CAPTURE_VIDEO,
                3,
                false,
                &["record a video"],
            ),
            (
                "share location",
                actions::ids::SHARE_LOCATION,
                2,
                false,
                &["send my location", "where am i"],
            ),
            (
                "start recording",
                actions::ids::START_RECORDING,
                2,
                false,
                &["record audio"],
            ),
            (
                "stop recording",
                actions::ids::STOP_RECORDING,
                2,
                false,
                &["stop audio"],
            ),
            (
                "call my contact",
                actions::ids::CALL_PRIMARY_CONTACT,
                2,
                false,
                &["call for help"],
            ),
            (
                "go home",
                actions::ids::OPEN_HOME,
                4,
                false,
                &["open home screen"],
            ),
            (
                "open settings",
                actions::ids::OPEN_SETTINGS,
                4,
                false,
                &[],
            ),
            (
                "open contacts",
                actions::ids::OPEN_CONTACTS,
                4,
                false,
                &["show my contacts"],
            ),
        ];

        for (phrase, action_id, priority, critical, alternatives) in defaults {
            let alternatives = alternatives.iter().map(|a| (*a).to_owned()).collect();
            // The built-in table is statically known to be valid.
            let _ = registry.register(phrase, action_id, *priority, *critical, alternatives);
        }
        registry
    }

    /// Register a command.
    ///
    /// # Errors
    ///
    /// Fails with [`RegistryError::DuplicatePhrase`] if the phrase is already
    /// present (case-insensitive, trimmed), [`RegistryError::InvalidPriority`]
    /// if `priority` is zero, or [`RegistryError::EmptyPhrase`] for a blank
    /// phrase.
    pub fn register(
        &mut self,
        phrase: &str,
        action_id: &str,
        priority: u32,
        critical: bool,
        alternatives: Vec<String>,
    ) -> std::result::Result<(), RegistryError> {
        if phrase.trim().is_empty() {
            return Err(RegistryError::EmptyPhrase);
        }
        if priority == 0 {
            return Err(RegistryError::InvalidPriority(priority));
        }
        let key = phrase_key(phrase);
        if self.entries.iter().any(|e| phrase_key(&e.phrase) == key) {
            return Err(RegistryError::DuplicatePhrase(phrase.trim().to_owned()));
        }
        self.entries.push(CommandEntry {
            phrase: phrase.trim().to_owned(),
            action_id: action_id.to_owned(),
            priority,
            critical,
            alternatives,
        });
        Ok(())
    }

    /// Exact lookup by canonical phrase (case-insensitive, trimmed).
    #[must_use]
    pub fn resolve(&self, phrase: &str) -> Option<&CommandEntry> {
        let key = phrase_key(phrase);
        self.entries.iter().find(|e| phrase_key(&e.phrase) == key)
    }

    /// Remove a command by canonical phrase. Returns whether it was present.
    pub fn remove(&mut self, phrase: &str) -> bool {
        let key = phrase_key(phrase);
        let before = self.entries.len();
        self.entries.retain(|e| phrase_key(&e.phrase) != key);
        self.entries.len() != before
    }

    /// All entries in registration order, for help/listing UIs.
    pub fn all(&self) -> impl Iterator<Item = &CommandEntry> {
        self.entries.iter()
    }

    /// Number of registered commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every matchable phrase (canonical and alternative) with its owning entry.
    ///
    /// This is the fuzzy matcher's candidate set.
    pub fn candidates(&self) -> impl Iterator<Item = (&str, &CommandEntry)> {
        self.entries.iter().flat_map(|entry| {
            std::iter::once((entry.phrase.as_str(), entry))
                .chain(entry.alternatives.iter().map(move |a| (a.as_str(), entry)))
        })
    }

    /// Finalize-time validation.
    ///
    /// The safety contract for this product: a registry with no critical
    /// command (no emergency path) is a configuration bug, not a valid state.
    ///
    /// # Errors
    ///
    /// Fails with [`RegistryError::NoCriticalCommand`] if no entry is
    /// marked critical.
    pub fn finalize(&self) -> std::result::Result<(), RegistryError> {
        if self.entries.iter().any(|e| e.critical) {
            Ok(())
        } else {
            Err(RegistryError::NoCriticalCommand)
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn sos_registry() -> CommandRegistry {
        let mut registry = CommandRegistry::new();
        registry
            .register(
                "sos",
                actions::ids::EMERGENCY_SOS,
                1,
                true,
                vec!["help me".into()],
            )
            .unwrap();
        registry
    }

    #[test]
    fn register_and_resolve() {
        let registry = sos_registry();
        let entry = registry.resolve("sos").unwrap();
        assert_eq!(entry.action_id, actions::ids::EMERGENCY_SOS);
        assert!(entry.critical);
    }

    #[test]
    fn resolve_is_case_insensitive_and_trimmed() {
        let registry = sos_registry();
        assert!(registry.resolve("  SOS ").is_some());
        assert!(registry.resolve("so s").is_none());
    }

    #[test]
    fn duplicate_phrase_rejected() {
        let mut registry = sos_registry();
        let err = registry
            .register("  SOS  ", "other.action", 2, false, Vec::new())
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicatePhrase(_)));
    }

    #[test]
    fn zero_priority_rejected() {
        let mut registry = CommandRegistry::new();
        let err = registry
            .register("sos", actions::ids::EMERGENCY_SOS, 0, true, Vec::new())
            .unwrap_err();
        assert_eq!(err, RegistryError::InvalidPriority(0));
    }

    #[test]
    fn empty_phrase_rejected() {
        let mut registry = CommandRegistry::new();
        let err = registry
            .register("   ", "x", 1, false, Vec::new())
            .unwrap_err();
        assert_eq!(err, RegistryError::EmptyPhrase);
    }

    #[test]
    fn remove_returns_presence() {
        let mut registry = sos_registry();
        assert!(registry.remove("SOS"));
        assert!(!registry.remove("sos"));
        assert!(registry.is_empty());
    }

    #[test]
    fn all_is_restartable() {
        let registry = CommandRegistry::with_safety_defaults();
        let first: Vec<_> = registry.all().map(|e| e.phrase.clone()).collect();
        let second: Vec<_> = registry.all().map(|e| e.phrase.clone()).collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), registry.len());
    }

    #[test]
    fn finalize_requires_critical_command() {
        let mut registry = CommandRegistry::new();
        registry
            .register("capture photo", actions::ids::CAPTURE_PHOTO, 3, false, Vec::new())
            .unwrap();
        assert_eq!(registry.finalize().unwrap_err(), RegistryError::NoCriticalCommand);

        registry
            .register("sos", actions::ids::EMERGENCY_SOS, 1, true, Vec::new())
            .unwrap();
        assert!(registry.finalize().is_ok());
    }

    #[test]
    fn safety_defaults_finalize_cleanly() {
        let registry = CommandRegistry::with_safety_defaults();
        assert!(registry.finalize().is_ok());
        let sos = registry.resolve("sos").unwrap();
        assert!(sos.critical);
        assert_eq!(sos.priority, 1);
        assert!(sos.alternatives.iter().any(|a| a == "help me"));
    }

    #[test]
    fn candidates_include_alternatives() {
        let registry = sos_registry();
        let candidates: Vec<_> = registry.candidates().map(|(p, _)| p.to_owned()).collect();
        assert_eq!(candidates, vec!["sos".to_owned(), "help me".to_owned()]);
    }
}
