//! Binary entry point for the subtitle workbench.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use srtsmith_core::chunk::{OversizePolicy, DEFAULT_CHUNK_CHARS};
use srtsmith_core::config::{BackendKind, GenerationConfig};
use srtsmith_core::files::{self, Workflow};
use srtsmith_core::generate::{self, Emotion, Generator, Humor, Pacing, Redundancy};
use srtsmith_core::progress::{EventSink, RunEvent};
use srtsmith_core::range::ProcessRange;
use srtsmith_core::reconcile::ReconcileOptions;
use srtsmith_core::session::{
    CorrectionSession, EnhancementSession, StyleSession, DEFAULT_BATCH_SIZE,
};
use srtsmith_core::srt;
use srtsmith_core::workflow::{self, CorrectionOutcome, RegenerateOutcome, StyleOutcome};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Command line options for the binary.
#[derive(Parser)]
#[command(version, about = "Turn long scripts into subtitles with a text model")]
struct Cli {
    /// Enable verbose debug and trace logs.
    #[arg(long, global = true)]
    debug: bool,

    /// Completion service to use.
    #[arg(long, global = true, default_value_t = BackendKind::Gemini)]
    backend: BackendKind,

    /// Model for raw chunk correction.
    #[arg(long, global = true)]
    model_fast: Option<String>,

    /// Model for rewriting, regeneration and style transfer.
    #[arg(long, global = true)]
    model_quality: Option<String>,

    /// HTTP timeout in seconds. No timeout when omitted.
    #[arg(long, global = true)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show how a raw text file would be chunked.
    Chunks {
        input: PathBuf,
        #[arg(long, default_value_t = DEFAULT_CHUNK_CHARS)]
        chunk_size: usize,
        /// Split paragraphs longer than the chunk size at sentence ends.
        #[arg(long)]
        split_sentences: bool,
    },
    /// Correct raw text into an SRT document, chunk by chunk.
    Correct {
        input: PathBuf,
        #[arg(long, default_value_t = DEFAULT_CHUNK_CHARS)]
        chunk_size: usize,
        #[arg(long)]
        split_sentences: bool,
        /// Chunks to process, e.g. `1-20`. Defaults to the first window.
        #[arg(long)]
        range: Option<ProcessRange>,
        /// Continue from the checkpoint left by a previous run.
        #[arg(long)]
        resume: bool,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Rewrite an SRT document in batches, keeping ids and timestamps.
    Enhance(EnhanceArgs),
    /// Restyle an SRT document after a sample text.
    Style {
        input: PathBuf,
        /// File holding a sample of the target style.
        #[arg(long)]
        style: PathBuf,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Regenerate the text of a single block.
    Regenerate {
        input: PathBuf,
        #[arg(long)]
        id: u32,
        /// Write the result back to the input instead of printing it.
        #[arg(long)]
        write: bool,
    },
    /// Report structural problems and flagged blocks in an SRT document.
    Check {
        input: PathBuf,
        /// Fail on any text outside a subtitle record.
        #[arg(long)]
        strict: bool,
    },
}

#[derive(Args)]
struct EnhanceArgs {
    input: PathBuf,
    /// Blocks sent per request.
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,
    /// Blocks to process, e.g. `21-80`. Defaults to the whole document.
    #[arg(long)]
    range: Option<ProcessRange>,
    #[arg(long, default_value_t = Redundancy::Medium)]
    redundancy: Redundancy,
    #[arg(long, default_value_t = Emotion::Neutral)]
    emotion: Emotion,
    #[arg(long, default_value_t = Humor::None)]
    humor: Humor,
    #[arg(long, default_value_t = Pacing::Balanced)]
    pacing: Pacing,
    /// Character substitution hint, e.g. "Bob -> Robert".
    #[arg(long, default_value = "")]
    substitute: String,
    /// Reject rewrites whose length changes by more than this fraction.
    #[arg(long)]
    length_tolerance: Option<f32>,
    #[arg(long)]
    out_dir: Option<PathBuf>,
}

/// Application entry point which parses CLI args and performs actions.
/// This function should initialize logging and delegate to the core library.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let filter = if cli.debug {
        EnvFilter::default()
            .add_directive("srtsmith=trace".parse()?)
            .add_directive("srtsmith_core=trace".parse()?)
            .add_directive("info".parse()?)
    } else {
        EnvFilter::default()
            .add_directive("srtsmith=info".parse()?)
            .add_directive("srtsmith_core=info".parse()?)
            .add_directive("warn".parse()?)
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Command::Chunks {
            input,
            chunk_size,
            split_sentences,
        } => show_chunks(input, *chunk_size, *split_sentences),
        Command::Correct {
            input,
            chunk_size,
            split_sentences,
            range,
            resume,
            out_dir,
        } => {
            let generator = connect(&cli)?;
            let mut session = CorrectionSession::new(*chunk_size);
            session.set_oversize_policy(policy(*split_sentences));
            session.set_input(read(input)?);
            let checkpoint = files::snapshot_path(input);
            if *resume {
                match files::load_snapshot(&checkpoint)? {
                    Some(snapshot) => {
                        info!("resuming {} block(s) from {}", snapshot.blocks.len(), checkpoint.display());
                        session.restore(snapshot);
                    }
                    None => warn!("no checkpoint at {}, starting over", checkpoint.display()),
                }
            }
            if let Some(range) = range {
                session.range = *range;
            }
            session.snapshot_path = Some(checkpoint);
            correct(&mut session, generator.as_ref(), &output_dir(input, out_dir)).await
        }
        Command::Enhance(args) => {
            let generator = connect(&cli)?;
            enhance(args, generator.as_ref()).await
        }
        Command::Style {
            input,
            style,
            out_dir,
        } => {
            let generator = connect(&cli)?;
            let mut session = StyleSession::new(read(input)?, read(style)?);
            restyle(&mut session, generator.as_ref(), &output_dir(input, out_dir)).await
        }
        Command::Regenerate { input, id, write } => {
            let generator = connect(&cli)?;
            let mut blocks = files::import_srt(input, false)?;
            match workflow::regenerate(&mut blocks, *id, generator.as_ref()).await {
                RegenerateOutcome::Replaced => {}
                RegenerateOutcome::Unchanged => bail!("block {id} was left unchanged"),
                RegenerateOutcome::NotFound => bail!("no block with id {id} in {}", input.display()),
            }
            if *write {
                fs::write(input, srt::format(&blocks))?;
                info!("updated {}", input.display());
            } else if let Some(block) = blocks.iter().find(|b| b.id == *id) {
                println!("{}", block.text);
            }
            Ok(())
        }
        Command::Check { input, strict } => check(input, *strict),
    }
}

fn connect(cli: &Cli) -> Result<Box<dyn Generator>> {
    let mut config = GenerationConfig::from_env(cli.backend);
    if let Some(model) = &cli.model_fast {
        config.fast_model = model.clone();
    }
    if let Some(model) = &cli.model_quality {
        config.quality_model = model.clone();
    }
    config.timeout_secs = cli.timeout;
    info!(
        "using {} ({} / {})",
        config.backend, config.fast_model, config.quality_model
    );
    Ok(generate::connect(&config)?)
}

fn policy(split_sentences: bool) -> OversizePolicy {
    if split_sentences {
        OversizePolicy::SplitSentences
    } else {
        OversizePolicy::Keep
    }
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

/// Directory outputs are written to: `--out-dir`, else next to the input.
fn output_dir(input: &Path, out_dir: &Option<PathBuf>) -> PathBuf {
    match out_dir {
        Some(dir) => dir.clone(),
        None => input
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    }
}

/// Log progress events as percentages until the sink is dropped.
fn log_progress(mut rx: UnboundedReceiver<RunEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let RunEvent::Progress(p) = event {
                if p.current > 0 {
                    info!("completed {}% ({}/{})", p.percent(), p.current, p.total);
                }
            }
        }
    })
}

/// Wait for a helper task. A panic or abort is logged; the run result
/// still stands. Returns whether the task ran to completion.
async fn finish_task(handle: JoinHandle<()>, name: &str) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(err) => {
            warn!("{name} task did not finish: {err}");
            false
        }
    }
}

fn show_chunks(input: &Path, chunk_size: usize, split_sentences: bool) -> Result<()> {
    let mut session = CorrectionSession::new(chunk_size);
    session.set_oversize_policy(policy(split_sentences));
    session.set_input(read(input)?);
    let text = session.plan().input();
    println!("chunks:    {}", session.chunk_count());
    println!("chars:     {}", text.chars().count());
    println!("duration:  {}", srt::estimate_duration(text));
    println!("range:     {}", session.range);
    for (i, chunk) in session.plan().chunks().iter().enumerate() {
        if chunk.char_len() > chunk_size {
            warn!("chunk {} has {} chars, over the limit", i + 1, chunk.char_len());
        }
    }
    Ok(())
}

async fn correct(session: &mut CorrectionSession, generator: &dyn Generator, out_dir: &Path) -> Result<()> {
    let (sink, rx) = EventSink::channel();
    let logger = log_progress(rx);
    let result = workflow::correction::run(session, generator, &sink).await;
    drop(sink);
    finish_task(logger, "progress logger").await;

    if !session.blocks.is_empty() {
        files::export_srt(out_dir, Workflow::Correction, &session.document())?;
    }
    match result? {
        CorrectionOutcome::Skipped => warn!("nothing to do for range {}", session.range),
        CorrectionOutcome::Completed {
            chunks,
            blocks,
            next_range,
        } => {
            info!("{chunks} chunk(s) corrected into {blocks} block(s)");
            if let Some(next) = next_range {
                info!("run again with --resume to continue with chunks {next}");
            }
        }
    }
    Ok(())
}

async fn enhance(args: &EnhanceArgs, generator: &dyn Generator) -> Result<()> {
    let mut session = EnhancementSession::with_blocks(files::import_srt(&args.input, false)?);
    session.set_batch_size(args.batch_size);
    if let Some(range) = args.range {
        session.range = range;
    }
    session.params.redundancy = args.redundancy;
    session.params.emotion = args.emotion;
    session.params.humor = args.humor;
    session.params.pacing = args.pacing;
    session.params.character_substitution = args.substitute.clone();
    session.reconcile = ReconcileOptions {
        length_tolerance: args.length_tolerance,
    };

    let (sink, rx) = EventSink::channel();
    let logger = log_progress(rx);
    let report = workflow::enhancement::run(&mut session, generator, &sink).await;
    drop(sink);
    finish_task(logger, "progress logger").await;

    if report.total == 0 {
        warn!("range {} selects no blocks", session.range);
        return Ok(());
    }
    files::export_srt(&output_dir(&args.input, &args.out_dir), Workflow::Enhancement, &session.document())?;
    if report.errors > 0 {
        warn!(
            "{} block(s) need attention (failed batches: {:?})",
            report.errors, report.failed_batches
        );
    }
    if report.content_risks > 0 {
        warn!("{} block(s) flagged by the model as possible context errors", report.content_risks);
    }
    for block in session.attention() {
        info!("check block {} at {}", block.id, block.start_time());
    }
    Ok(())
}

async fn restyle(session: &mut StyleSession, generator: &dyn Generator, out_dir: &Path) -> Result<()> {
    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let (sink, mut rx) = EventSink::channel();
    let printer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while let Some(event) = rx.recv().await {
            if let RunEvent::Fragment(text) = event {
                let _ = stdout.write_all(text.as_bytes());
                let _ = stdout.flush();
            }
        }
    });
    let result = workflow::style::run(session, generator, &cancel, &sink).await;
    drop(sink);
    finish_task(printer, "fragment printer").await;
    println!();

    match result {
        Ok(StyleOutcome::Skipped) => bail!("document and style sample must both be non-empty"),
        Ok(StyleOutcome::Completed(text)) => {
            files::export_srt(out_dir, Workflow::Style, &text)?;
            Ok(())
        }
        Ok(StyleOutcome::Cancelled) => {
            warn!("cancelled; partial output not saved");
            Ok(())
        }
        Err(err) => {
            if !session.output.is_empty() {
                files::export_srt(out_dir, Workflow::Style, &session.output)?;
                warn!("stream broke off; partial output saved");
            }
            Err(err.into())
        }
    }
}

fn check(input: &Path, strict: bool) -> Result<()> {
    let blocks = files::import_srt(input, strict)?;
    let issues = srt::check_integrity(&blocks);
    for issue in &issues {
        println!("{issue}");
    }
    let flagged = blocks.iter().filter(|b| b.has_content_risk()).count();
    println!(
        "{} block(s), duration {}, {} structural issue(s), {} flagged block(s)",
        blocks.len(),
        srt::document_duration(&blocks),
        issues.len(),
        flagged
    );
    if !issues.is_empty() {
        bail!("{} structural issue(s) in {}", issues.len(), input.display());
    }
    Ok(())
}
