//! Line segmentation of a streaming byte source.
//!
//! [`LineBuffer`] is the push-based core: feed it bytes as they arrive and
//! pull complete lines out. [`Lines`] wraps a blocking "read one byte"
//! function into a lazy, single-pass iterator of lines.
//!
//! Every complete line keeps its trailing `\n`, so the text handed to the
//! trigger table is exactly what the process printed. A partial trailing
//! line is only produced by [`LineBuffer::finish`] (or at end-of-stream by
//! [`Lines`]), without a terminator. Bytes are decoded as UTF-8 when a line
//! completes; invalid sequences become U+FFFD.

use std::io::{BufReader, Read};
use std::iter::FusedIterator;

use bytes::BytesMut;

/// Line terminator.
const NEWLINE: u8 = b'\n';

/// Accumulates bytes and yields complete lines.
///
/// By default a line may grow without bound. With
/// [`with_max_line_len`](Self::with_max_line_len), an accumulator that
/// reaches the limit without a terminator is emitted as an unterminated
/// line and accumulation starts over.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: BytesMut,
    /// Prefix of `pending` already known to contain no terminator.
    scanned: usize,
    max_line_len: Option<usize>,
}

impl LineBuffer {
    /// Create an unbounded line buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a line buffer that splits lines longer than `max` bytes.
    ///
    /// A `max` of zero is treated as unbounded.
    #[must_use]
    pub fn with_max_line_len(max: usize) -> Self {
        Self {
            max_line_len: (max > 0).then_some(max),
            ..Self::default()
        }
    }

    /// Append one byte.
    pub fn push(&mut self, byte: u8) {
        self.pending.extend_from_slice(&[byte]);
    }

    /// Append a chunk of bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Take the next complete line, if one is buffered.
    pub fn next_line(&mut self) -> Option<String> {
        let unscanned = &self.pending[self.scanned..];
        let limit = self.max_line_len.unwrap_or(usize::MAX);

        if let Some(pos) = unscanned.iter().position(|&b| b == NEWLINE) {
            let end = self.scanned + pos + 1;
            if end <= limit {
                return Some(self.split_line(end));
            }
        }

        if self.pending.len() >= limit {
            return Some(self.split_line(limit));
        }

        self.scanned = self.pending.len();
        None
    }

    /// Flush whatever is left as a final, unterminated line.
    ///
    /// Returns `None` when nothing is pending. Complete lines still in the
    /// buffer should be drained with [`next_line`](Self::next_line) first.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let len = self.pending.len();
        Some(self.split_line(len))
    }

    /// Number of bytes buffered but not yet returned.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn split_line(&mut self, end: usize) -> String {
        let line = self.pending.split_to(end);
        self.scanned = 0;
        String::from_utf8_lossy(&line).into_owned()
    }
}

/// A lazy, single-pass sequence of lines produced from a read function.
///
/// The read function returns the next byte, or `None` at end-of-stream,
/// and may block. Once it returns `None` the iterator yields any partial
/// trailing line and then ends for good.
pub struct Lines<F> {
    read: F,
    buffer: LineBuffer,
    done: bool,
}

impl<F> Lines<F>
where
    F: FnMut() -> Option<u8>,
{
    /// Create a line iterator over `read`.
    pub fn new(read: F) -> Self {
        Self::with_buffer(read, LineBuffer::new())
    }

    /// Create a line iterator using a preconfigured buffer.
    pub const fn with_buffer(read: F, buffer: LineBuffer) -> Self {
        Self {
            read,
            buffer,
            done: false,
        }
    }
}

impl<F> std::fmt::Debug for Lines<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lines")
            .field("buffer", &self.buffer)
            .field("done", &self.done)
            .finish()
    }
}

impl<F> Iterator for Lines<F>
where
    F: FnMut() -> Option<u8>,
{
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            if let Some(line) = self.buffer.next_line() {
                return Some(line);
            }
            if self.done {
                return None;
            }
            match (self.read)() {
                Some(byte) => self.buffer.push(byte),
                None => {
                    self.done = true;
                    return self.buffer.finish();
                }
            }
        }
    }
}

impl<F> FusedIterator for Lines<F> where F: FnMut() -> Option<u8> {}

/// Read lines from any [`Read`] implementation.
///
/// A read error ends the sequence like end-of-stream does.
pub fn lines_from_reader<R: Read>(reader: R) -> Lines<impl FnMut() -> Option<u8>> {
    let mut bytes = BufReader::new(reader).bytes();
    Lines::new(move || match bytes.next()? {
        Ok(byte) => Some(byte),
        Err(err) => {
            tracing::debug!(error = %err, "line source failed; treating as end of stream");
            None
        }
    })
}
