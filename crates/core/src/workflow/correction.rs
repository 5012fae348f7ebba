//! Raw text to SRT, one chunk per generation call.

use crate::error::CorrectionError;
use crate::files;
use crate::generate::Generator;
use crate::progress::{estimate_remaining, format_eta, EventSink, Progress, RunEvent};
use crate::range::ProcessRange;
use crate::session::{CorrectionSession, RunState};
use crate::srt;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// How a correction run ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrectionOutcome {
    /// Blank input or a range that selects nothing. Nothing changed.
    Skipped,
    Completed {
        chunks: usize,
        blocks: usize,
        /// Window proposed for the next run, when chunks remain.
        next_range: Option<ProcessRange>,
    },
}

/// Correct the chunks selected by the session's range.
///
/// A range starting at chunk 1 discards the current document and numbers
/// from 1; any other range appends and continues after the last id. Each
/// chunk is requested with the next free id and the id after the last
/// parsed block becomes the next one.
///
/// The first failing call stops the run, as does a reply whose last id
/// leaves no id after it. Blocks from earlier chunks are
/// kept and the range is moved to start at the failed chunk so a rerun
/// resumes there.
pub async fn run<G>(
    session: &mut CorrectionSession,
    generator: &G,
    events: &EventSink,
) -> Result<CorrectionOutcome, CorrectionError>
where
    G: Generator + ?Sized,
{
    let total_chunks = session.chunk_count();
    if session.plan().input().trim().is_empty() {
        debug!("correction skipped: no input");
        return Ok(CorrectionOutcome::Skipped);
    }
    let Some(slice) = session.range.slice(total_chunks) else {
        debug!(
            "correction skipped: range {} selects nothing of {} chunk(s)",
            session.range, total_chunks
        );
        return Ok(CorrectionOutcome::Skipped);
    };
    let range_end = session.range.end;

    let mut next_id = if session.range.start == 1 {
        session.blocks.clear();
        1
    } else {
        match session.blocks.last() {
            None => 1,
            Some(last) => match last.id.checked_add(1) {
                Some(id) => id,
                None => {
                    let err = CorrectionError::IdOverflow {
                        chunk: slice.start + 1,
                        id: last.id,
                    };
                    return Err(fail(session, events, range_end, err));
                }
            },
        }
    };
    let chunks: Vec<String> = session.plan().chunks()[slice.clone()]
        .iter()
        .map(|c| c.text.clone())
        .collect();

    info!(
        "correcting chunks {}-{} of {} starting at id {}",
        slice.start + 1,
        slice.end,
        total_chunks,
        next_id
    );
    session.state = RunState::Running;
    session.last_error = None;
    session.progress = Progress::new(chunks.len());
    events.send(RunEvent::Progress(session.progress));

    let mut produced = 0;
    let mut last_ms: Option<u128> = None;
    for (offset, chunk) in chunks.iter().enumerate() {
        let position = slice.start + offset + 1;
        trace!("chunk {position} chars={} next_id={next_id}", chunk.chars().count());
        let begin = Instant::now();
        let reply = match generator.correct_chunk(chunk, next_id).await {
            Ok(reply) => reply,
            Err(source) => {
                let err = CorrectionError::Generation {
                    chunk: position,
                    source,
                };
                return Err(fail(session, events, range_end, err));
            }
        };
        let parsed = srt::parse(&reply);
        if parsed.is_empty() {
            warn!("chunk {position} produced no blocks");
        }
        if let Some(last) = parsed.last() {
            // The chunk's blocks are dropped so a rerun redoes the whole chunk.
            next_id = match last.id.checked_add(1) {
                Some(id) => id,
                None => {
                    let err = CorrectionError::IdOverflow {
                        chunk: position,
                        id: last.id,
                    };
                    return Err(fail(session, events, range_end, err));
                }
            };
        }
        produced += parsed.len();
        session.blocks.extend(parsed);
        session.progress.advance(1);
        events.send(RunEvent::Progress(session.progress));
        events.send(RunEvent::Blocks(session.blocks.clone()));

        let elapsed = begin.elapsed().as_millis();
        info!("corrected chunk {position}/{total_chunks} in {elapsed} ms");
        let remaining = chunks.len() - offset - 1;
        if let (Some(prev), true) = (last_ms, remaining > 0) {
            info!("ETA: {}", format_eta(estimate_remaining(prev, elapsed, remaining)));
        }
        last_ms = Some(elapsed);
        checkpoint(session, ProcessRange::new(position + 1, range_end));
    }

    let next_range = ProcessRange::advance_after(slice.end, total_chunks);
    if let Some(next) = next_range {
        info!("{} chunk(s) left, next range {next}", total_chunks - slice.end);
        session.range = next;
        checkpoint(session, next);
    } else if let Some(path) = &session.snapshot_path {
        if let Err(err) = files::remove_snapshot(path) {
            warn!("failed to remove checkpoint: {err:#}");
        }
    }
    session.state = RunState::Completed;
    events.send(RunEvent::Finished);
    Ok(CorrectionOutcome::Completed {
        chunks: chunks.len(),
        blocks: produced,
        next_range,
    })
}

/// Stop the run at `err.chunk()`, leaving the range there for a rerun.
fn fail(
    session: &mut CorrectionSession,
    events: &EventSink,
    range_end: usize,
    err: CorrectionError,
) -> CorrectionError {
    warn!("correction stopped: {err}");
    session.range = ProcessRange::new(err.chunk(), range_end);
    session.state = RunState::Failed(err.to_string());
    session.last_error = Some(err.to_string());
    checkpoint(session, session.range);
    events.send(RunEvent::Failed(err.to_string()));
    err
}

/// Persist the document with `resume` as the range to continue from.
/// A write failure is logged and the run goes on.
fn checkpoint(session: &CorrectionSession, resume: ProcessRange) {
    let Some(path) = &session.snapshot_path else {
        return;
    };
    let mut snapshot = session.snapshot();
    snapshot.range = resume;
    if let Err(err) = files::save_snapshot(path, &snapshot) {
        warn!("failed to save checkpoint: {err:#}");
    }
}
