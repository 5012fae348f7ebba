//! This module is responsible for SRT parsing and integrity checks.
//! It exposes helpers to read and write SRT blocks while preserving ids and
//! timing, and tolerates the chatter a text model wraps around its output.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;
use tracing::{debug, trace};

/// Marker a model embeds in a block when it doubts the context it produced.
pub const CONTENT_RISK_MARKER: &str = "[⚠ POSSÍVEL ERRO DE CONTEXTO — REGERAR ESTE BLOCO]";

/// Part of [`CONTENT_RISK_MARKER`] that is still recognised when a model
/// mangles the brackets or the symbol around it.
const CONTENT_RISK_CORE: &str = "POSSÍVEL ERRO";

/// Reading rate assumed by [`estimate_duration`].
pub const CHARS_PER_SECOND: usize = 15;

/// Why the last automated attempt on a block is considered unreliable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockIssue {
    /// A batch response did not contain a block with this id.
    MissingFromResponse,
    /// The generation call carrying this block failed outright.
    GenerationFailed,
    /// The rewrite was rejected by the length tolerance check.
    LengthOutOfTolerance,
}

/// Represents a single SRT block (index, time range, text).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SrtBlock {
    pub id: u32,
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
    /// Text as it was when the block was parsed. Display only.
    #[serde(default)]
    pub original_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue: Option<BlockIssue>,
}

impl SrtBlock {
    /// Build a block whose original text snapshot equals `text`.
    pub fn new(id: u32, start_ms: u64, end_ms: u64, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            id,
            start_ms,
            end_ms,
            original_text: text.clone(),
            text,
            issue: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.issue.is_some()
    }

    /// True when the text carries the in-band low confidence marker.
    pub fn has_content_risk(&self) -> bool {
        self.text.contains(CONTENT_RISK_CORE)
    }

    /// Whether the block should be highlighted for review.
    pub fn needs_attention(&self) -> bool {
        self.is_error() || self.has_content_risk()
    }

    pub fn start_time(&self) -> String {
        format_time(self.start_ms)
    }

    pub fn end_time(&self) -> String {
        format_time(self.end_ms)
    }

    /// Compare the fields the SRT format owns, ignoring review state.
    pub fn same_cue(&self, other: &SrtBlock) -> bool {
        self.id == other.id
            && self.start_ms == other.start_ms
            && self.end_ms == other.end_ms
            && self.text == other.text
    }
}

/// Errors raised by [`parse_strict`] and the time helpers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unexpected content at line {line}: {content:?}")]
    UnexpectedLine { line: usize, content: String },
    #[error("invalid timestamp {0:?}")]
    InvalidTime(String),
    #[error("invalid time range {0:?}")]
    InvalidTimeRange(String),
}

/// A line of input that did not belong to any block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discarded {
    /// 1-based line number in the input.
    pub line: usize,
    pub content: String,
}

/// Result of a lenient scan: the blocks found and everything skipped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseReport {
    pub blocks: Vec<SrtBlock>,
    pub discarded: Vec<Discarded>,
}

struct OpenBlock<'a> {
    id: u32,
    start_ms: u64,
    end_ms: u64,
    /// Text lines with their 0-based index in the input.
    lines: Vec<(usize, &'a str)>,
    /// Set by a code fence; later lines are chatter until the next header.
    closed: bool,
}

impl<'a> OpenBlock<'a> {
    /// Split off a truncated `<id>\n<partial time>` left at the very end of
    /// the input, after a blank line.
    fn take_partial_header(&mut self) -> Vec<(usize, &'a str)> {
        let mut end = self.lines.len();
        while end > 0 && self.lines[end - 1].1.trim().is_empty() {
            end -= 1;
        }
        let body = &self.lines[..end];
        let tail = match body {
            [.., (_, blank), (_, id)] if blank.trim().is_empty() && is_id_line(id) => 1,
            [.., (_, blank), (_, id), (_, time)]
                if blank.trim().is_empty() && is_id_line(id) && is_partial_time(time) =>
            {
                2
            }
            _ => return Vec::new(),
        };
        let partial = self.lines.split_off(end - tail);
        partial.into_iter().take(tail).collect()
    }

    fn finish(self) -> SrtBlock {
        let text = self
            .lines
            .iter()
            .map(|(_, line)| *line)
            .collect::<Vec<_>>()
            .join("\n");
        SrtBlock::new(self.id, self.start_ms, self.end_ms, text.trim())
    }
}

fn is_id_line(line: &str) -> bool {
    let line = line.trim();
    !line.is_empty() && line.bytes().all(|b| b.is_ascii_digit())
}

fn is_partial_time(line: &str) -> bool {
    let line = line.trim();
    !line.is_empty()
        && line.bytes().all(|b| b.is_ascii_digit() || b" :,->".contains(&b))
        && parse_times(line).is_err()
}

/// Parse SRT text into a list of blocks, skipping anything that is not part
/// of a record. Skipped lines are logged at debug level.
pub fn parse(input: &str) -> Vec<SrtBlock> {
    parse_report(input).blocks
}

/// Scan `input` for `<id>\n<start> --> <end>\n<text>` records.
///
/// A record header is a digits-only line directly followed by a valid time
/// line. The text runs until the next header or the end of input, blank
/// lines included; surrounding whitespace is trimmed. A Markdown code fence
/// ends the current record, and everything after it up to the next header
/// is discarded along with lines before the first header. When the input
/// stops in the middle of a header, that partial header is discarded too.
pub fn parse_report(input: &str) -> ParseReport {
    let lines: Vec<&str> = input.lines().collect();
    let mut report = ParseReport::default();
    let mut open: Option<OpenBlock> = None;
    let mut i = 0;
    while i < lines.len() {
        if let Some((id, start_ms, end_ms)) = header_at(&lines, i) {
            if let Some(block) = open.take() {
                report.blocks.push(block.finish());
            }
            open = Some(OpenBlock {
                id,
                start_ms,
                end_ms,
                lines: Vec::new(),
                closed: false,
            });
            i += 2;
            continue;
        }
        let line = lines[i];
        match open.as_mut() {
            Some(block) if line.trim_start().starts_with("```") => {
                block.closed = true;
                discard(&mut report, i, line);
            }
            Some(block) if !block.closed => block.lines.push((i, line)),
            _ => {
                if !line.trim().is_empty() {
                    discard(&mut report, i, line);
                }
            }
        }
        i += 1;
    }
    if let Some(mut block) = open {
        if !block.closed && !input.ends_with('\n') {
            for (index, line) in block.take_partial_header() {
                discard(&mut report, index, line);
            }
        }
        report.blocks.push(block.finish());
    }
    if !report.discarded.is_empty() {
        debug!(
            "discarded {} unparsed line(s), first at line {}",
            report.discarded.len(),
            report.discarded[0].line
        );
    }
    report
}

/// Parse SRT text and fail on the first line that is not part of a record.
pub fn parse_strict(input: &str) -> Result<Vec<SrtBlock>, ParseError> {
    let report = parse_report(input);
    match report.discarded.into_iter().next() {
        Some(Discarded { line, content }) => Err(ParseError::UnexpectedLine { line, content }),
        None => Ok(report.blocks),
    }
}

fn discard(report: &mut ParseReport, index: usize, line: &str) {
    trace!("discarding line {}: {line:?}", index + 1);
    report.discarded.push(Discarded {
        line: index + 1,
        content: line.to_string(),
    });
}

fn header_at(lines: &[&str], i: usize) -> Option<(u32, u64, u64)> {
    if !is_id_line(lines[i]) {
        return None;
    }
    let id: u32 = lines[i].trim().parse().ok()?;
    let (start, end) = parse_times(lines.get(i + 1)?).ok()?;
    Some((id, start, end))
}

/// Format SRT blocks back to text.
/// Each block is rendered as `<id>\n<start> --> <end>\n<text>\n` and blocks
/// are joined with a blank line. Ids and times are written as they are.
pub fn format(blocks: &[SrtBlock]) -> String {
    blocks
        .iter()
        .map(|block| {
            format!(
                "{}\n{} --> {}\n{}\n",
                block.id,
                format_time(block.start_ms),
                format_time(block.end_ms),
                block.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse a time range like `00:00:01,000 --> 00:00:02,000` to milliseconds.
pub fn parse_times(line: &str) -> Result<(u64, u64), ParseError> {
    let (start, end) = line
        .split_once("-->")
        .ok_or_else(|| ParseError::InvalidTimeRange(line.to_string()))?;
    Ok((parse_time(start.trim())?, parse_time(end.trim())?))
}

/// Parse `HH:MM:SS,mmm` into milliseconds.
/// Minutes and seconds take any two digits; `00:75:00,000` is 75 minutes.
pub fn parse_time(t: &str) -> Result<u64, ParseError> {
    let bad = || ParseError::InvalidTime(t.to_string());
    let (clock, millis) = t.split_once(',').ok_or_else(bad)?;
    let parts: Vec<&str> = clock.split(':').collect();
    if parts.len() != 3
        || parts[0].len() < 2
        || parts[1].len() != 2
        || parts[2].len() != 2
        || millis.len() != 3
    {
        return Err(bad());
    }
    let digits = |s: &str| -> Result<u64, ParseError> {
        if s.bytes().all(|b| b.is_ascii_digit()) {
            s.parse().map_err(|_| bad())
        } else {
            Err(bad())
        }
    };
    let (h, m, s, ms) = (
        digits(parts[0])?,
        digits(parts[1])?,
        digits(parts[2])?,
        digits(millis)?,
    );
    h.checked_mul(60)
        .and_then(|v| v.checked_add(m))
        .and_then(|v| v.checked_mul(60))
        .and_then(|v| v.checked_add(s))
        .and_then(|v| v.checked_mul(1000))
        .and_then(|v| v.checked_add(ms))
        .ok_or_else(bad)
}

/// Format milliseconds back to `HH:MM:SS,mmm`.
pub fn format_time(ms: u64) -> String {
    let h = ms / 3_600_000;
    let m = (ms % 3_600_000) / 60_000;
    let s = (ms % 60_000) / 1000;
    let ms = ms % 1000;
    format!("{h:02}:{m:02}:{s:02},{ms:03}")
}

fn format_clock(total_secs: u64) -> String {
    let h = total_secs / 3600;
    let m = (total_secs % 3600) / 60;
    let s = total_secs % 60;
    format!("{h:02}:{m:02}:{s:02}")
}

/// Rough spoken length of raw text as `HH:MM:SS`.
/// The way this works is by assuming a fixed reading rate and rounding up
/// to whole seconds.
pub fn estimate_duration(text: &str) -> String {
    let chars = text.chars().count();
    let secs = (chars + CHARS_PER_SECOND - 1) / CHARS_PER_SECOND;
    format_clock(secs as u64)
}

/// Length of a document as the end time of its last block, without millis.
pub fn document_duration(blocks: &[SrtBlock]) -> String {
    blocks
        .last()
        .map(|b| format_clock(b.end_ms / 1000))
        .unwrap_or_else(|| format_clock(0))
}

/// Rewrite ids so they run 1..=n in document order.
pub fn renumber(blocks: &mut [SrtBlock]) {
    for (i, block) in blocks.iter_mut().enumerate() {
        block.id = i as u32 + 1;
    }
}

/// A structural problem found by [`check_integrity`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityIssue {
    DuplicateId { id: u32, position: usize },
    InvertedTiming { id: u32, position: usize },
    OutOfOrder { id: u32, previous: u32, position: usize },
}

impl fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateId { id, position } => {
                write!(f, "block #{position}: id {id} already used")
            }
            Self::InvertedTiming { id, position } => {
                write!(f, "block #{position} (id {id}): ends before it starts")
            }
            Self::OutOfOrder {
                id,
                previous,
                position,
            } => write!(f, "block #{position}: id {id} does not follow {previous}"),
        }
    }
}

/// Report duplicate ids, inverted time ranges and ids that do not increase.
/// Positions are 1-based. Nothing is fixed; callers decide what to do.
pub fn check_integrity(blocks: &[SrtBlock]) -> Vec<IntegrityIssue> {
    let mut issues = Vec::new();
    let mut seen = HashSet::new();
    let mut previous: Option<u32> = None;
    for (i, block) in blocks.iter().enumerate() {
        let position = i + 1;
        if !seen.insert(block.id) {
            issues.push(IntegrityIssue::DuplicateId {
                id: block.id,
                position,
            });
        } else if let Some(prev) = previous.filter(|p| block.id <= *p) {
            issues.push(IntegrityIssue::OutOfOrder {
                id: block.id,
                previous: prev,
                position,
            });
        }
        if block.start_ms > block.end_ms {
            issues.push(IntegrityIssue::InvertedTiming {
                id: block.id,
                position,
            });
        }
        previous = Some(block.id);
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<SrtBlock> {
        vec![
            SrtBlock::new(1, 0, 2_500, "Hello there."),
            SrtBlock::new(2, 2_500, 5_000, "Two lines\nof text"),
            SrtBlock::new(7, 3_600_000, 3_601_250, "After a gap"),
        ]
    }

    #[test]
    fn roundtrip_srt() {
        let input = "1\n00:00:00,000 --> 00:00:01,000\nHello\n";
        let blocks = parse(input);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].text, "Hello");
        assert_eq!(blocks[0].original_text, "Hello");
        assert_eq!(format(&blocks), input);
    }

    /// Parsing what we formatted gives back the same cues, gaps included.
    #[test]
    fn parse_of_format_is_identity() {
        let blocks = sample();
        let parsed = parse(&format(&blocks));
        assert_eq!(parsed.len(), blocks.len());
        for (a, b) in parsed.iter().zip(&blocks) {
            assert!(a.same_cue(b), "{a:?} != {b:?}");
        }
    }

    #[test]
    fn format_is_stable() {
        let blocks = sample();
        assert_eq!(format(&blocks), format(&blocks));
        assert!(format(&blocks).starts_with("1\n00:00:00,000 --> 00:00:02,500\nHello there.\n\n2\n"));
    }

    /// Model chatter and code fences are dropped and reported.
    #[test]
    fn skips_model_chatter() {
        let input = "Here is the SRT:\n```srt\n5\n00:00:01,000 --> 00:00:02,000\nOi\n\n6\n00:00:02,000 --> 00:00:03,000\nTudo bem?\n```\n\nLet me know!";
        let report = parse_report(input);
        assert_eq!(report.blocks.len(), 2);
        assert_eq!(report.blocks[0].id, 5);
        assert_eq!(report.blocks[1].text, "Tudo bem?");
        let lines: Vec<usize> = report.discarded.iter().map(|d| d.line).collect();
        assert_eq!(lines, vec![1, 2, 10, 12]);
    }

    #[test]
    fn accepts_crlf_and_missing_blank_lines() {
        let input = "1\r\n00:00:00,000 --> 00:00:01,000\r\nA\r\n2\r\n00:00:01,000 --> 00:00:02,000\r\nB\r\n";
        let blocks = parse(input);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].text, "A");
        assert_eq!(blocks[1].start_ms, 1_000);
    }

    #[test]
    fn drops_partial_trailing_record() {
        let input = "1\n00:00:00,000 --> 00:00:01,000\nHi\n\n2\n00:00:0";
        let report = parse_report(input);
        assert_eq!(report.blocks.len(), 1);
        assert_eq!(report.blocks[0].text, "Hi");
        assert_eq!(report.discarded.len(), 2);
    }

    /// A cut after a blank line is kept as text once the input is complete.
    #[test]
    fn complete_input_keeps_trailing_digits() {
        let input = "1\n00:00:00,000 --> 00:00:01,000\nHi\n\n2\n";
        let report = parse_report(input);
        assert_eq!(report.blocks[0].text, "Hi\n\n2");
        assert!(report.discarded.is_empty());
    }

    #[test]
    fn blank_lines_stay_inside_text() {
        let blocks = vec![
            SrtBlock::new(1, 0, 1_000, "a\n\nb"),
            SrtBlock::new(2, 1_000, 2_000, "c"),
        ];
        let parsed = parse(&format(&blocks));
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].text, "a\n\nb");
        assert_eq!(parsed[1].text, "c");
        assert_eq!(parse(&format(&blocks[..1]))[0].text, "a\n\nb");
    }

    #[test]
    fn header_without_text_yields_empty_block() {
        let blocks = parse("3\n00:00:00,000 --> 00:00:01,000\n");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].text, "");
    }

    #[test]
    fn strict_parse_reports_line() {
        let err = parse_strict("1\n00:00:00,000 --> 00:00:01,000\nHi\n```\n").unwrap_err();
        assert_eq!(
            err,
            ParseError::UnexpectedLine {
                line: 4,
                content: "```".into()
            }
        );
        let err = parse_strict("stray\n1\n00:00:00,000 --> 00:00:01,000\nHi\n").unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedLine { line: 1, .. }));
        assert!(parse_strict(&format(&sample())).is_ok());
    }

    #[test]
    fn parses_and_formats_times() {
        assert_eq!(parse_time("01:02:03,004").unwrap(), 3_723_004);
        assert_eq!(format_time(3_723_004), "01:02:03,004");
        assert_eq!(parse_time("100:00:00,000").unwrap(), 360_000_000);
        assert!(parse_time("00:00:01.000").is_err());
        assert_eq!(parse_time("00:61:00,000").unwrap(), 3_660_000);
        assert_eq!(parse_time("00:00:75,000").unwrap(), 75_000);
        assert!(parse_time("0:00:00,000").is_err());
        assert!(parse_times("00:00:01,000 00:00:02,000").is_err());
    }

    #[test]
    fn oversized_hours_are_rejected() {
        assert!(parse_time("9999999999999999:00:00,000").is_err());
        assert!(parse_time("99999999999999999999:00:00,000").is_err());
        let report = parse_report("1\n9999999999999999:00:00,000 --> 00:00:01,000\nx\n");
        assert!(report.blocks.is_empty());
        assert_eq!(report.discarded.len(), 3);
    }

    #[test]
    fn estimates_duration() {
        assert_eq!(estimate_duration(""), "00:00:00");
        assert_eq!(estimate_duration(&"a".repeat(15)), "00:00:01");
        assert_eq!(estimate_duration(&"a".repeat(16)), "00:00:02");
        assert_eq!(estimate_duration(&"é".repeat(15 * 3661)), "01:01:01");
    }

    #[test]
    fn document_duration_uses_last_end() {
        assert_eq!(document_duration(&[]), "00:00:00");
        assert_eq!(document_duration(&sample()), "01:00:01");
    }

    #[test]
    fn detects_content_risk() {
        let mut block = SrtBlock::new(1, 0, 1, "ok");
        assert!(!block.needs_attention());
        block.text = format!("{CONTENT_RISK_MARKER} texto");
        assert!(block.has_content_risk());
        assert!(block.needs_attention());
        assert!(!block.is_error());
    }

    #[test]
    fn renumbers_and_checks_integrity() {
        let mut blocks = sample();
        blocks.push(SrtBlock::new(7, 10, 5, "dup"));
        let issues = check_integrity(&blocks);
        assert_eq!(
            issues,
            vec![
                IntegrityIssue::DuplicateId { id: 7, position: 4 },
                IntegrityIssue::InvertedTiming { id: 7, position: 4 },
            ]
        );
        renumber(&mut blocks);
        let ids: Vec<u32> = blocks.iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(check_integrity(&blocks).len(), 1);
    }
}
