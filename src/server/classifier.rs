//! Console line classification.
//!
//! Player counts are derived purely from log text. They drift if lines are
//! lost or the engine changes its wording; nothing reconciles them against
//! the query protocol.

use regex::Regex;
use std::sync::LazyLock;

/// What a console line means for the live status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineSignal {
    /// Engine finished initialization.
    Ready,
    /// Memory sample in megabytes.
    Memory(u64),
    PlayerJoined,
    PlayerLeft,
    /// Nothing of interest.
    None,
}

/// Maps a console line to a [`LineSignal`]. Must not panic on any input.
pub trait LineClassifier: Send + Sync {
    fn classify(&self, line: &str) -> LineSignal;
}

static MEMORY_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\* (\d+) MB").ok());

/// Classifier for the vanilla/Paper console format.
#[derive(Debug, Clone, Copy, Default)]
pub struct VanillaLogClassifier;

impl LineClassifier for VanillaLogClassifier {
    fn classify(&self, line: &str) -> LineSignal {
        if line.contains("Done (") && line.contains("For help, type") {
            return LineSignal::Ready;
        }
        if line.contains("joined the game") {
            return LineSignal::PlayerJoined;
        }
        if line.contains("left the game") {
            return LineSignal::PlayerLeft;
        }
        if let Some(pattern) = MEMORY_PATTERN.as_ref() {
            if let Some(mb) = pattern
                .captures(line)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse().ok())
            {
                return LineSignal::Memory(mb);
            }
        }
        LineSignal::None
    }
}
