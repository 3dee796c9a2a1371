//! Byte-level patch verification: diffs, locality checks, runtime
//! expectations, and honest aggregate counters.

use crate::CoreError;
use std::fmt;

/// A single differing byte between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteDelta {
    pub offset: u32,
    pub old: u8,
    pub new: u8,
}

impl fmt::Display for ByteDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "${:06X}: ${:02X} -> ${:02X}",
            self.offset, self.old, self.new
        )
    }
}

/// Report every differing byte between two equal-length ranges. `base` is
/// the offset of the first byte of both ranges, so deltas carry absolute
/// positions.
pub fn diff_bytes(base: u32, before: &[u8], after: &[u8]) -> Result<Vec<ByteDelta>, CoreError> {
    if before.len() != after.len() {
        return Err(CoreError::LengthMismatch {
            before: before.len(),
            after: after.len(),
        });
    }
    Ok(before
        .iter()
        .zip(after.iter())
        .enumerate()
        .filter(|(_, (o, n))| o != n)
        .map(|(i, (&old, &new))| ByteDelta {
            offset: base + i as u32,
            old,
            new,
        })
        .collect())
}

/// Locality assessment of an applied patch: a patch is clean iff every
/// observed delta falls inside its declared target range.
#[derive(Debug, Clone)]
pub struct PatchCheck {
    pub expected: Vec<ByteDelta>,
    pub unexpected: Vec<ByteDelta>,
}

impl PatchCheck {
    pub fn assess(deltas: Vec<ByteDelta>, target_offset: u32, target_size: u32) -> Self {
        let (expected, unexpected): (Vec<_>, Vec<_>) = deltas.into_iter().partition(|d| {
            d.offset >= target_offset && d.offset < target_offset + target_size
        });
        for delta in &unexpected {
            // Side effects outside the declared range are surfaced, never
            // swallowed; the caller decides whether to keep the patch
            log::warn!("unexpected change outside patch range: {}", delta);
        }
        Self {
            expected,
            unexpected,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.unexpected.is_empty()
    }
}

/// Expected shape of a sampled byte range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expectation {
    /// Bytes must equal this pattern exactly.
    Exact(Vec<u8>),
    /// Bytes must equal one of these patterns.
    AnyOf(Vec<Vec<u8>>),
    /// Bytes must differ from this pattern (e.g. "no longer the original").
    Not(Vec<u8>),
}

impl Expectation {
    pub fn matches(&self, observed: &[u8]) -> bool {
        match self {
            Expectation::Exact(want) => want == observed,
            Expectation::AnyOf(options) => options.iter().any(|w| w == observed),
            Expectation::Not(reject) => reject != observed,
        }
    }
}

/// Counters aggregated from real verification outcomes. These are the only
/// "confidence" numbers the toolkit reports; nothing is hardcoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifyStats {
    pub checks: u32,
    pub clean: u32,
    pub flagged: u32,
}

impl VerifyStats {
    pub fn record(&mut self, clean: bool) {
        self.checks += 1;
        if clean {
            self.clean += 1;
        } else {
            self.flagged += 1;
        }
    }
}

impl fmt::Display for VerifyStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} checks, {} clean, {} flagged",
            self.checks, self.clean, self.flagged
        )
    }
}
