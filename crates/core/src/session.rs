//! Per-workflow session state.
//!
//! A session owns its document outright. Every run and the regenerator take
//! it by `&mut`, so two writers on the same document cannot overlap. Callers
//! that share a session between tasks wrap it in a `tokio::sync::Mutex`.

use crate::chunk::{ChunkPlan, OversizePolicy};
use crate::generate::EnhancementParams;
use crate::progress::Progress;
use crate::range::ProcessRange;
use crate::reconcile::ReconcileOptions;
use crate::srt::{self, SrtBlock};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, trace};

/// Default number of blocks rewritten per enhancement call.
pub const DEFAULT_BATCH_SIZE: usize = 20;

/// Lifecycle of the most recent run on a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Completed,
    Failed(String),
    Cancelled,
}

impl RunState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

/// Raw text being turned into subtitles chunk by chunk.
#[derive(Debug, Clone, Default)]
pub struct CorrectionSession {
    plan: ChunkPlan,
    pub range: ProcessRange,
    pub blocks: Vec<SrtBlock>,
    pub progress: Progress,
    pub state: RunState,
    pub last_error: Option<String>,
    /// Where progress is checkpointed after every chunk, if anywhere.
    pub snapshot_path: Option<PathBuf>,
}

/// What a correction session needs to pick up where it stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionSnapshot {
    pub chunk_chars: usize,
    pub range: ProcessRange,
    pub blocks: Vec<SrtBlock>,
}

impl CorrectionSession {
    pub fn new(chunk_chars: usize) -> Self {
        Self {
            plan: ChunkPlan::new(chunk_chars),
            ..Default::default()
        }
    }

    pub fn plan(&self) -> &ChunkPlan {
        &self.plan
    }

    pub fn chunk_count(&self) -> usize {
        self.plan.len()
    }

    /// Replace the raw text. The range keeps its start and is re-windowed
    /// when the number of chunks changes.
    pub fn set_input(&mut self, input: impl Into<String>) {
        let before = self.plan.len();
        if self.plan.set_input(input) {
            self.after_rechunk(before);
        }
    }

    pub fn set_chunk_size(&mut self, max_chars: usize) {
        let before = self.plan.len();
        if self.plan.set_max_chars(max_chars) {
            self.after_rechunk(before);
        }
    }

    pub fn set_oversize_policy(&mut self, policy: OversizePolicy) {
        let before = self.plan.len();
        if self.plan.set_policy(policy) {
            self.after_rechunk(before);
        }
    }

    fn after_rechunk(&mut self, before: usize) {
        let n = self.plan.len();
        trace!("rechunked: {before} -> {n} chunks");
        if n > 0 && n != before {
            self.range = self.range.rewindow(n);
            debug!("range re-windowed to {}", self.range);
        }
    }

    /// The accumulated document as SRT text.
    pub fn document(&self) -> String {
        srt::format(&self.blocks)
    }

    /// Discard the document and any run state. The input is kept.
    pub fn clear(&mut self) {
        self.blocks.clear();
        self.progress = Progress::default();
        self.state = RunState::Idle;
        self.last_error = None;
    }

    /// Manual edit of one block's text. Returns false for an unknown id.
    pub fn edit_text(&mut self, id: u32, text: impl Into<String>) -> bool {
        edit_text(&mut self.blocks, id, text)
    }

    pub fn snapshot(&self) -> CorrectionSnapshot {
        CorrectionSnapshot {
            chunk_chars: self.plan.max_chars(),
            range: self.range,
            blocks: self.blocks.clone(),
        }
    }

    /// Resume from `snapshot`. Call after [`Self::set_input`] so the saved
    /// range is not re-windowed away.
    pub fn restore(&mut self, snapshot: CorrectionSnapshot) {
        self.set_chunk_size(snapshot.chunk_chars);
        self.range = snapshot.range;
        self.blocks = snapshot.blocks;
        self.state = RunState::Idle;
        self.last_error = None;
    }
}

/// An existing document rewritten in sub-batches.
#[derive(Debug, Clone)]
pub struct EnhancementSession {
    pub blocks: Vec<SrtBlock>,
    pub range: ProcessRange,
    batch_size: usize,
    pub params: EnhancementParams,
    pub reconcile: ReconcileOptions,
    pub progress: Progress,
    /// Blocks flagged during the last run.
    pub error_count: usize,
    pub state: RunState,
}

impl Default for EnhancementSession {
    fn default() -> Self {
        Self {
            blocks: Vec::new(),
            range: ProcessRange::full(0),
            batch_size: DEFAULT_BATCH_SIZE,
            params: EnhancementParams::default(),
            reconcile: ReconcileOptions::default(),
            progress: Progress::default(),
            error_count: 0,
            state: RunState::Idle,
        }
    }
}

impl EnhancementSession {
    /// Load a document; the range covers all of it.
    pub fn load(&mut self, blocks: Vec<SrtBlock>) {
        self.range = ProcessRange::full(blocks.len());
        self.blocks = blocks;
        self.progress = Progress::default();
        self.error_count = 0;
        self.state = RunState::Idle;
    }

    pub fn with_blocks(blocks: Vec<SrtBlock>) -> Self {
        let mut session = Self::default();
        session.load(blocks);
        session
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Sizes below one are raised to one.
    pub fn set_batch_size(&mut self, size: usize) {
        self.batch_size = size.max(1);
    }

    pub fn document(&self) -> String {
        srt::format(&self.blocks)
    }

    pub fn clear(&mut self) {
        self.load(Vec::new());
    }

    pub fn edit_text(&mut self, id: u32, text: impl Into<String>) -> bool {
        edit_text(&mut self.blocks, id, text)
    }

    /// Blocks that need a human look, in document order.
    pub fn attention(&self) -> impl Iterator<Item = &SrtBlock> {
        self.blocks.iter().filter(|b| b.needs_attention())
    }
}

/// A document restyled after a sample of the target voice.
#[derive(Debug, Clone, Default)]
pub struct StyleSession {
    pub srt: String,
    pub style: String,
    pub output: String,
    pub state: RunState,
}

impl StyleSession {
    pub fn new(srt: impl Into<String>, style: impl Into<String>) -> Self {
        Self {
            srt: srt.into(),
            style: style.into(),
            ..Default::default()
        }
    }

    pub fn clear(&mut self) {
        self.output.clear();
        self.state = RunState::Idle;
    }
}

/// Replace the text of the first block with `id`; timing and issue stay.
fn edit_text(blocks: &mut [SrtBlock], id: u32, text: impl Into<String>) -> bool {
    match blocks.iter_mut().find(|b| b.id == id) {
        Some(block) => {
            block.text = text.into();
            true
        }
        None => false,
    }
}
