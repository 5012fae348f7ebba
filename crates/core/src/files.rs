//! Reading and writing documents and correction checkpoints on disk.

use crate::session::CorrectionSnapshot;
use crate::srt::{self, SrtBlock};
use anyhow::{Context, Result};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace};

/// The workflow a document was produced by, which decides its file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workflow {
    Correction,
    Enhancement,
    Style,
}

impl Workflow {
    pub fn stem(&self) -> &'static str {
        match self {
            Self::Correction => "corrected",
            Self::Enhancement => "optimized",
            Self::Style => "styled",
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.srt", self.stem())
    }
}

impl fmt::Display for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.stem())
    }
}

/// Read an SRT file. With `strict`, any line outside a record is an error.
pub fn import_srt(path: &Path, strict: bool) -> Result<Vec<SrtBlock>> {
    trace!("import_srt path={} strict={strict}", path.display());
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let blocks = if strict {
        srt::parse_strict(&text).with_context(|| format!("failed to parse {}", path.display()))?
    } else {
        srt::parse(&text)
    };
    info!("loaded {} block(s) from {}", blocks.len(), path.display());
    Ok(blocks)
}

/// Write `content` to `<dir>/<stem>.srt` and return the path.
pub fn export_srt(dir: &Path, workflow: Workflow, content: &str) -> Result<PathBuf> {
    let path = dir.join(workflow.file_name());
    fs::write(&path, content).with_context(|| format!("failed to write {}", path.display()))?;
    info!("wrote {}", path.display());
    Ok(path)
}

/// Checkpoint file kept next to `input` while a correction is in progress.
pub fn snapshot_path(input: &Path) -> PathBuf {
    input.with_file_name(format!(
        "{}_partial_correction.json",
        input.file_stem().unwrap_or_default().to_string_lossy()
    ))
}

/// Save correction progress to disk.
/// The way this works is by serializing the snapshot to JSON for later resumption.
pub fn save_snapshot(path: &Path, snapshot: &CorrectionSnapshot) -> Result<()> {
    trace!("save_snapshot path={}", path.display());
    let text = serde_json::to_string(snapshot)?;
    fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?;
    debug!(
        "saved {} block(s), next range {} to {}",
        snapshot.blocks.len(),
        snapshot.range,
        path.display()
    );
    Ok(())
}

/// Load a checkpoint if one exists at `path`.
pub fn load_snapshot(path: &Path) -> Result<Option<CorrectionSnapshot>> {
    trace!("load_snapshot path={}", path.display());
    if !path.exists() {
        return Ok(None);
    }
    let text = fs::read_to_string(path)?;
    let snapshot = serde_json::from_str(&text)
        .with_context(|| format!("corrupt checkpoint {}", path.display()))?;
    Ok(Some(snapshot))
}

/// Remove a checkpoint once it is no longer needed. Missing files are fine.
pub fn remove_snapshot(path: &Path) -> Result<()> {
    if path.exists() {
        info!("removing partial correction {}", path.display());
        fs::remove_file(path)?;
    }
    Ok(())
}
