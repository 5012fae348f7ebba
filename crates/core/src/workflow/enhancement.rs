//! Batch rewrite of an existing document.
//! Failures stay local to their sub-batch: the run always finishes.

use crate::generate::Generator;
use crate::progress::{EventSink, Progress, RunEvent};
use crate::reconcile::reconcile;
use crate::session::{EnhancementSession, RunState};
use crate::srt::{self, BlockIssue};
use tracing::{debug, info, warn};

/// Counters for one enhancement run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnhancementReport {
    /// Blocks selected by the range.
    pub total: usize,
    pub processed: usize,
    /// Blocks flagged during this run.
    pub errors: usize,
    /// Blocks in the range whose text carries the low confidence marker.
    pub content_risks: usize,
    /// 1-based positions of the sub-batches whose call failed.
    pub failed_batches: Vec<usize>,
}

/// Rewrite the blocks selected by the session's range in sub-batches.
///
/// Each sub-batch is sent on its own. A reply is merged back by id; a failed
/// call marks every block of its sub-batch [`BlockIssue::GenerationFailed`]
/// and leaves the text alone. Blocks outside the range are never touched.
pub async fn run<G>(session: &mut EnhancementSession, generator: &G, events: &EventSink) -> EnhancementReport
where
    G: Generator + ?Sized,
{
    let mut report = EnhancementReport::default();
    let Some(slice) = session.range.slice(session.blocks.len()) else {
        debug!(
            "enhancement skipped: range {} selects nothing of {} block(s)",
            session.range,
            session.blocks.len()
        );
        return report;
    };
    let batch_size = session.batch_size();
    report.total = slice.len();
    info!(
        "enhancing blocks {}-{} in batches of {batch_size}",
        slice.start + 1,
        slice.end
    );
    session.state = RunState::Running;
    session.error_count = 0;
    session.progress = Progress::new(report.total);
    events.send(RunEvent::Progress(session.progress));

    for (n, start) in (slice.start..slice.end).step_by(batch_size).enumerate() {
        let batch_no = n + 1;
        let end = (start + batch_size).min(slice.end);
        let result = generator
            .enhance_batch(&session.blocks[start..end], &session.params)
            .await;
        match result {
            Ok(reply) => {
                let parsed = srt::parse(&reply);
                let merged = reconcile(&mut session.blocks[start..end], &parsed, &session.reconcile);
                if merged.flagged() > 0 {
                    warn!(
                        "batch {batch_no}: {} block(s) missing, {} rejected",
                        merged.missing.len(),
                        merged.rejected.len()
                    );
                }
                report.errors += merged.flagged();
            }
            Err(err) => {
                warn!("batch {batch_no} (blocks {}-{end}) failed: {err}", start + 1);
                for block in &mut session.blocks[start..end] {
                    block.issue = Some(BlockIssue::GenerationFailed);
                }
                report.errors += end - start;
                report.failed_batches.push(batch_no);
            }
        }
        session.progress.advance(end - start);
        session.error_count = report.errors;
        events.send(RunEvent::Progress(session.progress));
        events.send(RunEvent::Blocks(session.blocks.clone()));
        debug!("batch {batch_no} done, {}/{}", session.progress.current, report.total);
    }

    report.processed = session.progress.current;
    report.content_risks = session.blocks[slice]
        .iter()
        .filter(|b| b.has_content_risk())
        .count();
    session.state = RunState::Completed;
    info!(
        "enhancement finished: {} block(s), {} error(s), {} flagged by the model",
        report.processed, report.errors, report.content_risks
    );
    events.send(RunEvent::Finished);
    report
}
