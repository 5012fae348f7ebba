//! Merging a batch response back into the blocks that were sent.
//! Blocks are matched by id only. Ids and timestamps of the originals are
//! never touched, whatever the response claims.

use crate::srt::{BlockIssue, SrtBlock};
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReconcileOptions {
    /// Largest accepted relative change in character count, e.g. `0.1`.
    /// `None` accepts any length.
    pub length_tolerance: Option<f32>,
}

/// What happened to each original during a merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub updated: usize,
    /// Ids absent from the response.
    pub missing: Vec<u32>,
    /// Ids whose rewrite failed the length check.
    pub rejected: Vec<u32>,
    pub count_mismatch: bool,
}

impl ReconcileReport {
    /// Blocks newly marked as errors by this merge.
    pub fn flagged(&self) -> usize {
        self.missing.len() + self.rejected.len()
    }
}

/// Merge `response` into `originals`.
///
/// The first response block carrying an id wins. A matched original gets
/// the new text and loses any previous issue; an unmatched one keeps its
/// text and is marked [`BlockIssue::MissingFromResponse`].
pub fn reconcile(
    originals: &mut [SrtBlock],
    response: &[SrtBlock],
    options: &ReconcileOptions,
) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    if response.len() != originals.len() {
        report.count_mismatch = true;
        warn!(
            "batch count mismatch: sent {} blocks, received {}",
            originals.len(),
            response.len()
        );
    }
    let mut by_id: HashMap<u32, &SrtBlock> = HashMap::with_capacity(response.len());
    for block in response {
        by_id.entry(block.id).or_insert(block);
    }
    for original in originals.iter_mut() {
        let Some(rewrite) = by_id.get(&original.id) else {
            debug!("block {} missing from response", original.id);
            original.issue = Some(BlockIssue::MissingFromResponse);
            report.missing.push(original.id);
            continue;
        };
        if let Some(tolerance) = options.length_tolerance {
            if !within_tolerance(&original.text, &rewrite.text, tolerance) {
                debug!("block {} rewrite rejected by length check", original.id);
                original.issue = Some(BlockIssue::LengthOutOfTolerance);
                report.rejected.push(original.id);
                continue;
            }
        }
        original.text = rewrite.text.clone();
        original.issue = None;
        report.updated += 1;
    }
    report
}

fn within_tolerance(before: &str, after: &str, tolerance: f32) -> bool {
    let before = before.chars().count() as f32;
    let after = after.chars().count() as f32;
    if before == 0.0 {
        return after == 0.0 || tolerance.is_infinite();
    }
    ((after - before).abs() / before) <= tolerance
}
