//! Progress counters, run events and the ETA helpers used by the workflows.

use crate::srt::SrtBlock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;

/// `current` out of `total` units done.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
}

impl Progress {
    pub fn new(total: usize) -> Self {
        Self { current: 0, total }
    }

    /// Add `by` units, never going past `total`.
    pub fn advance(&mut self, by: usize) {
        self.current = (self.current + by).min(self.total);
    }

    /// Completion between 0.0 and 1.0. An empty run counts as done.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.current as f64 / self.total as f64
    }

    pub fn percent(&self) -> usize {
        (self.fraction() * 100.0).round() as usize
    }
}

/// Something observers of a run may want to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    Progress(Progress),
    /// Snapshot of the document after a unit was merged.
    Blocks(Vec<SrtBlock>),
    /// Streamed piece of a style transfer.
    Fragment(String),
    Finished,
    Failed(String),
}

/// Optional receiver of [`RunEvent`]s.
/// Sending never blocks and a dropped receiver is ignored.
#[derive(Debug, Clone, Default)]
pub struct EventSink(Option<mpsc::UnboundedSender<RunEvent>>);

impl EventSink {
    /// A sink that drops everything.
    pub fn none() -> Self {
        Self(None)
    }

    /// A connected sink and the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RunEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(Some(tx)), rx)
    }

    pub fn send(&self, event: RunEvent) {
        if let Some(tx) = &self.0 {
            if tx.send(event).is_err() {
                trace!("event receiver dropped");
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.0.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

/// Estimate remaining time in milliseconds.
/// The way this works is by averaging `prev_ms` and `curr_ms` and
/// multiplying by the number of units left.
pub fn estimate_remaining(prev_ms: u128, curr_ms: u128, remaining: usize) -> u128 {
    trace!("estimate_remaining prev_ms={prev_ms} curr_ms={curr_ms} remaining={remaining}");
    let avg = (prev_ms + curr_ms) / 2;
    avg * remaining as u128
}

/// Format a duration in milliseconds as "X minute Y seconds".
pub fn format_eta(ms: u128) -> String {
    let total_secs = ms / 1000;
    let minutes = total_secs / 60;
    let seconds = total_secs % 60;
    if minutes > 0 {
        format!(
            "{} minute{} {} second{}",
            minutes,
            if minutes == 1 { "" } else { "s" },
            seconds,
            if seconds == 1 { "" } else { "s" }
        )
    } else {
        format!("{} second{}", seconds, if seconds == 1 { "" } else { "s" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Progress saturates at the total and reports a fraction.
    #[test]
    fn progress_is_capped() {
        let mut p = Progress::new(25);
        p.advance(20);
        assert_eq!(p.current, 20);
        p.advance(20);
        assert_eq!(p.current, 25);
        assert_eq!(p.fraction(), 1.0);
        assert_eq!(Progress::new(0).fraction(), 1.0);
        assert_eq!(Progress { current: 1, total: 3 }.percent(), 33);
    }

    /// Verify the estimate uses the average of the last two calls.
    #[test]
    fn estimates_remaining_time() {
        assert_eq!(estimate_remaining(1000, 2000, 2), 3000);
        assert_eq!(estimate_remaining(1000, 2000, 0), 0);
    }

    /// Ensure the ETA formatter outputs minutes and seconds.
    #[test]
    fn formats_eta() {
        assert_eq!(format_eta(110_000), "1 minute 50 seconds");
        assert_eq!(format_eta(45_000), "45 seconds");
        assert_eq!(format_eta(121_000), "2 minutes 1 second");
    }

    #[tokio::test]
    async fn sink_delivers_in_order_and_tolerates_drop() {
        let (sink, mut rx) = EventSink::channel();
        sink.send(RunEvent::Progress(Progress::new(2)));
        sink.send(RunEvent::Finished);
        assert_eq!(rx.recv().await, Some(RunEvent::Progress(Progress::new(2))));
        assert_eq!(rx.recv().await, Some(RunEvent::Finished));
        drop(rx);
        assert!(!sink.is_connected());
        sink.send(RunEvent::Finished);
        assert!(!EventSink::none().is_connected());
    }
}
