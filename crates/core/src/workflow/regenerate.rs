//! Targeted rewrite of one block.

use crate::generate::Generator;
use crate::srt::SrtBlock;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegenerateOutcome {
    /// The block got new text and its issue was cleared.
    Replaced,
    /// The call failed; the block is exactly as it was.
    Unchanged,
    NotFound,
}

/// Ask for a new text for the block with `id`, keeping its timing.
/// Failures are logged and never surface as errors.
pub async fn regenerate<G>(blocks: &mut [SrtBlock], id: u32, generator: &G) -> RegenerateOutcome
where
    G: Generator + ?Sized,
{
    let Some(block) = blocks.iter_mut().find(|b| b.id == id) else {
        warn!("regenerate: no block with id {id}");
        return RegenerateOutcome::NotFound;
    };
    match generator
        .regenerate_block(&block.text, block.start_ms, block.end_ms)
        .await
    {
        Ok(text) => {
            info!("block {id} regenerated");
            block.text = text;
            block.issue = None;
            RegenerateOutcome::Replaced
        }
        Err(err) => {
            warn!("failed to regenerate block {id}: {err}");
            RegenerateOutcome::Unchanged
        }
    }
}
