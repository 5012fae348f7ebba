//! Inclusive, 1-based unit ranges chosen by the user.
//! The selector clamps to the collection and turns anything unsatisfiable
//! into an empty selection rather than an error.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use thiserror::Error;

/// Width of the window proposed on first load and after an auto-advance.
pub const DEFAULT_WINDOW: usize = 20;

/// An inclusive `{start, end}` pair over 1-based positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRange {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid range {0:?}, expected START-END or START")]
pub struct RangeParseError(String);

impl ProcessRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Bounded first window over a collection of `n` units.
    pub fn initial(n: usize) -> Self {
        Self::new(1, n.min(DEFAULT_WINDOW))
    }

    /// Whole collection.
    pub fn full(n: usize) -> Self {
        Self::new(1, n)
    }

    pub fn is_valid(&self) -> bool {
        self.start >= 1 && self.start <= self.end
    }

    /// 0-based half-open slice over `n` units, or `None` when the range
    /// selects nothing.
    pub fn slice(&self, n: usize) -> Option<Range<usize>> {
        if !self.is_valid() {
            return None;
        }
        let start = self.start - 1;
        let end = self.end.min(n);
        (start < end).then_some(start..end)
    }

    /// Number of units the range selects from a collection of `n`.
    pub fn len(&self, n: usize) -> usize {
        self.slice(n).map_or(0, |r| r.len())
    }

    /// Keep the start and re-window the end after the collection changed.
    pub fn rewindow(&self, n: usize) -> Self {
        Self::new(self.start, n.min(self.start + DEFAULT_WINDOW - 1))
    }

    /// Next window after `processed_end` (1-based, inclusive) units were
    /// processed, if any remain.
    pub fn advance_after(processed_end: usize, n: usize) -> Option<Self> {
        (processed_end < n).then(|| {
            let start = processed_end + 1;
            Self::new(start, n.min(start + DEFAULT_WINDOW - 1))
        })
    }
}

impl Default for ProcessRange {
    fn default() -> Self {
        Self::new(1, DEFAULT_WINDOW)
    }
}

impl fmt::Display for ProcessRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl FromStr for ProcessRange {
    type Err = RangeParseError;

    /// Accepts `3-7`, `3..7`, `3:7` or a single position `5`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || RangeParseError(s.to_string());
        let s = s.trim();
        let (a, b) = s
            .split_once("..")
            .or_else(|| s.split_once('-'))
            .or_else(|| s.split_once(':'))
            .unwrap_or((s, s));
        let start = a.trim().parse().map_err(|_| bad())?;
        let end = b.trim().parse().map_err(|_| bad())?;
        Ok(Self::new(start, end))
    }
}
