//! Whole-document style transfer, consumed as a stream.

use crate::error::GenerationError;
use crate::generate::Generator;
use crate::progress::{EventSink, RunEvent};
use crate::session::{RunState, StyleSession};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StyleOutcome {
    /// Document or style sample was blank.
    Skipped,
    /// The full restyled text, also left in the session.
    Completed(String),
    /// Stopped by the token; what arrived so far stays in the session.
    Cancelled,
}

/// Restyle `session.srt` after `session.style`, appending every fragment
/// to `session.output` as it arrives.
///
/// `cancel` is checked while waiting for the request and between fragments.
/// A broken stream fails the run but keeps the partial output.
pub async fn run<G>(
    session: &mut StyleSession,
    generator: &G,
    cancel: &CancellationToken,
    events: &EventSink,
) -> Result<StyleOutcome, GenerationError>
where
    G: Generator + ?Sized,
{
    if session.srt.trim().is_empty() || session.style.trim().is_empty() {
        debug!("style transfer skipped: missing document or style sample");
        return Ok(StyleOutcome::Skipped);
    }
    session.output.clear();
    session.state = RunState::Running;
    info!("style transfer started ({} chars)", session.srt.chars().count());

    let started = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        res = generator.style_transfer(&session.srt, &session.style) => Some(res),
    };
    let mut stream = match started {
        None => return Ok(cancelled(session)),
        Some(Ok(stream)) => stream,
        Some(Err(err)) => return Err(failed(session, events, err)),
    };

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(cancelled(session)),
            next = stream.next() => next,
        };
        match next {
            Some(Ok(fragment)) => {
                session.output.push_str(&fragment);
                events.send(RunEvent::Fragment(fragment));
            }
            Some(Err(err)) => return Err(failed(session, events, err)),
            None => break,
        }
    }

    session.state = RunState::Completed;
    info!("style transfer finished ({} chars)", session.output.chars().count());
    events.send(RunEvent::Finished);
    Ok(StyleOutcome::Completed(session.output.clone()))
}

fn cancelled(session: &mut StyleSession) -> StyleOutcome {
    info!(
        "style transfer cancelled after {} chars",
        session.output.chars().count()
    );
    session.state = RunState::Cancelled;
    StyleOutcome::Cancelled
}

fn failed(session: &mut StyleSession, events: &EventSink, err: GenerationError) -> GenerationError {
    warn!(
        "style transfer failed after {} chars: {err}",
        session.output.chars().count()
    );
    session.state = RunState::Failed(err.to_string());
    events.send(RunEvent::Failed(err.to_string()));
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::{EnhancementParams, FragmentStream};
    use crate::srt::SrtBlock;
    use async_trait::async_trait;
    use futures::stream;

    const DOC: &str = "1\n00:00:00,000 --> 00:00:02,000\nEra uma vez.\n";

    /// Streams the scripted items, then pends forever when `hang` is set.
    #[derive(Default)]
    struct MockGen {
        items: Vec<Result<String, GenerationError>>,
        hang: bool,
    }

    #[async_trait]
    impl Generator for MockGen {
        async fn correct_chunk(&self, _raw: &str, _start_id: u32) -> Result<String, GenerationError> {
            unreachable!()
        }

        async fn enhance_batch(
            &self,
            _blocks: &[SrtBlock],
            _params: &EnhancementParams,
        ) -> Result<String, GenerationError> {
            unreachable!()
        }

        async fn regenerate_block(
            &self,
            _text: &str,
            _start_ms: u64,
            _end_ms: u64,
        ) -> Result<String, GenerationError> {
            unreachable!()
        }

        async fn style_transfer(
            &self,
            _srt: &str,
            _style: &str,
        ) -> Result<FragmentStream, GenerationError> {
            let items: Vec<Result<String, GenerationError>> = self
                .items
                .iter()
                .map(|r| match r {
                    Ok(s) => Ok(s.clone()),
                    Err(e) => Err(GenerationError::Stream(e.to_string())),
                })
                .collect();
            let head = stream::iter(items);
            if self.hang {
                Ok(head.chain(stream::pending()).boxed())
            } else {
                Ok(head.boxed())
            }
        }
    }

    fn fragments(parts: &[&str]) -> Vec<Result<String, GenerationError>> {
        parts.iter().map(|p| Ok(p.to_string())).collect()
    }

    #[tokio::test]
    async fn concatenates_fragments_in_order() {
        let gen = MockGen {
            items: fragments(&["1\n00:00:00,000 --> ", "00:00:02,000\n", "Era uma noite escura.\n"]),
            ..Default::default()
        };
        let mut session = StyleSession::new(DOC, "noir");
        let (sink, mut rx) = EventSink::channel();
        let outcome = run(&mut session, &gen, &CancellationToken::new(), &sink)
            .await
            .unwrap();
        let expected = "1\n00:00:00,000 --> 00:00:02,000\nEra uma noite escura.\n";
        assert_eq!(outcome, StyleOutcome::Completed(expected.to_string()));
        assert_eq!(session.output, expected);
        assert_eq!(session.state, RunState::Completed);
        assert_eq!(rx.recv().await, Some(RunEvent::Fragment("1\n00:00:00,000 --> ".into())));
    }

    #[tokio::test]
    async fn blank_inputs_are_skipped() {
        let gen = MockGen::default();
        let token = CancellationToken::new();
        let mut session = StyleSession::new(DOC, "  ");
        assert_eq!(
            run(&mut session, &gen, &token, &EventSink::none()).await.unwrap(),
            StyleOutcome::Skipped
        );
        let mut session = StyleSession::new("", "noir");
        assert_eq!(
            run(&mut session, &gen, &token, &EventSink::none()).await.unwrap(),
            StyleOutcome::Skipped
        );
    }

    /// A broken stream keeps the text received before the error.
    #[tokio::test]
    async fn stream_error_keeps_partial_output() {
        let mut items = fragments(&["Era ", "uma "]);
        items.push(Err(GenerationError::Stream("reset".into())));
        let gen = MockGen {
            items,
            ..Default::default()
        };
        let mut session = StyleSession::new(DOC, "noir");
        let err = run(&mut session, &gen, &CancellationToken::new(), &EventSink::none())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Stream(_)));
        assert_eq!(session.output, "Era uma ");
        assert!(matches!(session.state, RunState::Failed(_)));
    }

    /// Cancelling a stalled stream returns promptly with the partial output.
    #[tokio::test]
    async fn cancellation_stops_consumption() {
        let gen = MockGen {
            items: fragments(&["Era "]),
            hang: true,
        };
        let mut session = StyleSession::new(DOC, "noir");
        let token = CancellationToken::new();
        let (sink, mut rx) = EventSink::channel();
        let trigger = token.clone();
        tokio::spawn(async move {
            if let Some(RunEvent::Fragment(_)) = rx.recv().await {
                trigger.cancel();
            }
        });
        let outcome = run(&mut session, &gen, &token, &sink).await.unwrap();
        assert_eq!(outcome, StyleOutcome::Cancelled);
        assert_eq!(session.output, "Era ");
        assert_eq!(session.state, RunState::Cancelled);
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let gen = MockGen::default();
        let token = CancellationToken::new();
        token.cancel();
        let mut session = StyleSession::new(DOC, "noir");
        let outcome = run(&mut session, &gen, &token, &EventSink::none())
            .await
            .unwrap();
        assert_eq!(outcome, StyleOutcome::Cancelled);
        assert!(session.output.is_empty());
    }
}
