//! Server-sent event decoding shared by the streaming backends.

use super::FragmentStream;
use crate::error::GenerationError;
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use tracing::trace;

/// Pulls one text fragment out of an event payload, if it carries any.
pub(crate) type Extract = fn(&str) -> Result<Option<String>, GenerationError>;

struct Decoder<B> {
    body: BoxStream<'static, Result<B, GenerationError>>,
    buf: Vec<u8>,
    pending: VecDeque<String>,
    done: bool,
    failed: Option<GenerationError>,
    extract: Extract,
}

impl<B> Decoder<B> {
    fn fail(&mut self, err: GenerationError) {
        self.done = true;
        self.failed = Some(err);
    }

    /// Handle every complete line in the buffer, or everything when `flush`.
    fn drain(&mut self, flush: bool) -> Result<(), GenerationError> {
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            self.line(&line)?;
            if self.done {
                return Ok(());
            }
        }
        if flush && !self.buf.is_empty() {
            let rest = std::mem::take(&mut self.buf);
            self.line(&rest)?;
        }
        Ok(())
    }

    fn line(&mut self, raw: &[u8]) -> Result<(), GenerationError> {
        let line = String::from_utf8_lossy(raw);
        let Some(data) = line.trim().strip_prefix("data:") else {
            return Ok(());
        };
        let payload = data.trim();
        if payload.is_empty() {
            return Ok(());
        }
        if payload == "[DONE]" {
            trace!("event stream finished");
            self.done = true;
            return Ok(());
        }
        if let Some(text) = (self.extract)(payload)? {
            if !text.is_empty() {
                self.pending.push_back(text);
            }
        }
        Ok(())
    }
}

/// Turn a raw event-stream body into text fragments.
/// Lines are split on raw bytes so multi-byte characters that straddle two
/// network chunks decode correctly. Fragments decoded before an error are
/// still delivered; the error is the last item.
pub(crate) fn fragments<S, B>(body: S, extract: Extract) -> FragmentStream
where
    S: Stream<Item = Result<B, GenerationError>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let decoder = Decoder {
        body: body.boxed(),
        buf: Vec::new(),
        pending: VecDeque::new(),
        done: false,
        failed: None,
        extract,
    };
    stream::unfold(decoder, |mut dec| async move {
        loop {
            if let Some(fragment) = dec.pending.pop_front() {
                return Some((Ok(fragment), dec));
            }
            if let Some(err) = dec.failed.take() {
                return Some((Err(err), dec));
            }
            if dec.done {
                return None;
            }
            match dec.body.next().await {
                Some(Ok(bytes)) => {
                    dec.buf.extend_from_slice(bytes.as_ref());
                    if let Err(err) = dec.drain(false) {
                        dec.fail(err);
                    }
                }
                Some(Err(err)) => dec.fail(err),
                None => {
                    if let Err(err) = dec.drain(true) {
                        dec.fail(err);
                    }
                    dec.done = true;
                }
            }
        }
    })
    .boxed()
}
