use futures::{stream, Stream, StreamExt};

use crate::error::{DecodeError, TransportError};
use crate::transport::ByteStream;
use crate::tweet::{self, Tweet};

/// One element of the decoded feed as seen by consumers.
#[derive(Debug)]
pub enum StreamEvent {
    /// A fully-decoded status.
    Tweet(Tweet),
    /// One malformed message unit. The stream continues.
    Invalid(DecodeError),
    /// The connection failed mid-stream. Always the final element;
    /// an orderly end of stream produces no marker at all.
    Interrupted(TransportError),
}

/// Incremental line framing over raw chunks.
///
/// Append-only carry buffer; each complete LF-terminated line is decoded as
/// one JSON status object. A raw 0x0A is always a boundary: inside JSON
/// strings newlines can only appear escaped. Blank lines are the endpoint's
/// keep-alives and produce nothing. One-pass and non-restartable.
pub struct LineDecoder {
    buf: Vec<u8>,
    max_line: usize,
    /// Set after an oversized unit: drop bytes until the next boundary.
    discarding: bool,
}

impl LineDecoder {
    pub fn new(max_line: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_line,
            discarding: false,
        }
    }

    /// Absorb one chunk, returning every event completed by it.
    ///
    /// Whatever trails the last boundary stays buffered for the next call;
    /// on orderly end of input the remainder is dropped with the decoder
    /// (it cannot be a complete unit).
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let mut chunk = chunk;

        if self.discarding {
            match chunk.iter().position(|&b| b == b'\n') {
                Some(at) => {
                    chunk = &chunk[at + 1..];
                    self.discarding = false;
                }
                None => return events,
            }
        }

        self.buf.extend_from_slice(chunk);

        let mut start = 0;
        while let Some(at) = self.buf[start..].iter().position(|&b| b == b'\n') {
            let end = start + at;
            let line = strip_cr(&self.buf[start..end]);
            if !line.is_empty() {
                events.push(self.decode_line(line));
            }
            start = end + 1;
        }
        if start > 0 {
            self.buf.drain(..start);
        }

        if self.buf.len() > self.max_line {
            events.push(StreamEvent::Invalid(DecodeError::Oversized {
                limit: self.max_line,
            }));
            self.buf.clear();
            self.discarding = true;
        }

        events
    }

    fn decode_line(&self, line: &[u8]) -> StreamEvent {
        if line.len() > self.max_line {
            return StreamEvent::Invalid(DecodeError::Oversized {
                limit: self.max_line,
            });
        }
        let text = match std::str::from_utf8(line) {
            Ok(text) => text,
            Err(_) => return StreamEvent::Invalid(DecodeError::InvalidUtf8),
        };
        match tweet::parse_status(text) {
            Ok(tweet) => StreamEvent::Tweet(tweet),
            Err(e) => StreamEvent::Invalid(e),
        }
    }
}

fn strip_cr(line: &[u8]) -> &[u8] {
    match line.split_last() {
        Some((b'\r', rest)) => rest,
        _ => line,
    }
}

/// Drive a [`LineDecoder`] over a transport byte stream.
///
/// A transport `Err` becomes the terminal [`StreamEvent::Interrupted`];
/// orderly termination ends the sequence, silently discarding any
/// unterminated remainder.
pub fn decode_stream(
    bytes: ByteStream,
    max_line: usize,
) -> impl Stream<Item = StreamEvent> + Send {
    struct State {
        bytes: ByteStream,
        decoder: LineDecoder,
        pending: std::collections::VecDeque<StreamEvent>,
        done: bool,
    }

    let state = State {
        bytes,
        decoder: LineDecoder::new(max_line),
        pending: std::collections::VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(event) = st.pending.pop_front() {
                return Some((event, st));
            }
            if st.done {
                return None;
            }
            match st.bytes.next().await {
                Some(Ok(chunk)) => st.pending.extend(st.decoder.feed(&chunk)),
                Some(Err(e)) => {
                    st.done = true;
                    return Some((StreamEvent::Interrupted(e), st));
                }
                None => st.done = true,
            }
        }
    })
}
