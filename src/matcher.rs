//! Fuzzy matching of noisy transcripts onto registered command phrases.
//!
//! The distance metric is deterministic and symmetric: the minimum of a
//! character-level Levenshtein ratio and a token-overlap (Dice) distance,
//! both over normalized strings. The token term is what lets a short
//! canonical phrase ("sos") be reached from a longer noisy transcript
//! ("sos plz help") that whole-string edit distance would reject.
//!
//! Tie-break among candidates within the threshold: lowest distance first,
//! then exact string equality over fuzzy, then lower priority number
//! (1 is highest), then shorter phrase.

use crate::registry::{CommandEntry, CommandRegistry};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// A successful match of a transcript against the registry.
#[derive(Debug, Clone)]
pub struct CommandMatch {
    /// The matched registry entry.
    pub entry: CommandEntry,
    /// The phrase (canonical or alternative) that won the match.
    pub matched_phrase: String,
    /// Match distance in `[0, 1]`; 0 is identical.
    pub score: f32,
    /// Whether the normalized transcript equals the phrase exactly.
    pub exact: bool,
}

/// Matches normalized transcripts against the registry's candidate set.
#[derive(Debug, Clone)]
pub struct FuzzyMatcher {
    threshold: f32,
}

impl FuzzyMatcher {
    /// Create a matcher accepting candidates with distance `<= threshold`.
    #[must_use]
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    /// Find the best-matching registry entry for a transcript, or `None`
    /// when no candidate survives thresholding.
    #[must_use]
    pub fn best_match(&self, transcript: &str, registry: &CommandRegistry) -> Option<CommandMatch> {
        let normalized = normalize(transcript);
        if normalized.is_empty() {
            return None;
        }

        let mut best: Option<(MatchKey, CommandMatch)> = None;
        for (phrase, entry) in registry.candidates() {
            let candidate = normalize(phrase);
            if candidate.is_empty() {
                continue;
            }
            let exact = normalized == candidate;
            let score = if exact {
                0.0
            } else {
                phrase_distance(&normalized, &candidate)
            };
            if score > self.threshold {
                continue;
            }

            let key = MatchKey {
                score,
                exact,
                priority: entry.priority,
                phrase_len: candidate.chars().count(),
            };
            // Strictly-better replacement keeps the first registered entry
            // on a full tie, so results stay deterministic.
            let better = match &best {
                Some((current, _)) => key.cmp(current) == Ordering::Less,
                None => true,
            };
            if better {
                best = Some((
                    key,
                    CommandMatch {
                        entry: entry.clone(),
                        matched_phrase: phrase.to_owned(),
                        score,
                        exact,
                    },
                ));
            }
        }

        best.map(|(_, m)| m)
    }
}

/// Ordering key implementing the tie-break policy.
#[derive(Debug, Clone, Copy)]
struct MatchKey {
    score: f32,
    exact: bool,
    priority: u32,
    phrase_len: usize,
}

impl MatchKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.exact.cmp(&self.exact))
            .then_with(|| self.priority.cmp(&other.priority))
            .then_with(|| self.phrase_len.cmp(&other.phrase_len))
    }
}

/// Normalize a transcript or phrase: lowercase, strip punctuation,
/// collapse whitespace.
#[must_use]
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            for lower in ch.to_lowercase() {
                out.push(lower);
            }
        } else {
            // Whitespace and punctuation both act as token separators.
            pending_space = true;
        }
    }
    out
}

/// Combined distance between two normalized phrases in `[0, 1]`.
///
/// Symmetric and deterministic: `min(levenshtein_ratio, dice_distance)`.
fn phrase_distance(a: &str, b: &str) -> f32 {
    levenshtein_ratio(a, b).min(token_dice_distance(a, b))
}

/// Character-level Levenshtein distance normalized by the longer length.
fn levenshtein_ratio(a: &str, b: &str) -> f32 {
    let a_len = a.chars().count();
    let b_len = b.chars().count();
    let longest = a_len.max(b_len);
    if longest == 0 {
        return 0.0;
    }
    levenshtein(a, b) as f32 / longest as f32
}

/// Plain Levenshtein distance with a two-row DP table.
fn levenshtein(a: &str, b: &str) -> usize {
    if a == b {
        return 0;
    }
    let b_chars: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a.chars().count();
    }

    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0usize; b_chars.len() + 1];
    for (i, a_ch) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, b_ch) in b_chars.iter().enumerate() {
            let substitution = prev[j] + usize::from(a_ch != *b_ch);
            let insertion = curr[j] + 1;
            let deletion = prev[j + 1] + 1;
            curr[j + 1] = substitution.min(insertion).min(deletion);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_chars.len()]
}

/// Token-overlap distance: `1 - 2|A∩B| / (|A| + |B|)` over unique tokens.
fn token_dice_distance(a: &str, b: &str) -> f32 {
    let a_tokens: BTreeSet<&str> = a.split_whitespace().collect();
    let b_tokens: BTreeSet<&str> = b.split_whitespace().collect();
    let total = a_tokens.len() + b_tokens.len();
    if total == 0 {
        return 0.0;
    }
    let shared = a_tokens.intersection(&b_tokens).count();
    1.0 - (2 * shared) as f32 / total as f32
}
