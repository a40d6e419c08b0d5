//! Newline-delimited framing over a chunked byte stream.
//!
//! HTTP bodies arrive in arbitrary chunks: one chunk may carry several
//! records, and a single record may span many chunks. [`LineBuffer`]
//! reassembles complete `\n`-terminated lines, and [`ndjson_lines`]
//! adapts any `Bytes` stream into a stream of owned lines.
//!
//! Blank lines are yielded as empty strings; deciding that they are
//! keep-alives is the consumer's job.

use bytes::{Buf, Bytes, BytesMut};
use futures_util::{Stream, StreamExt};

use crate::error::Error;

/// Upper bound on a single line. PowerTrack activities are a few KiB; a
/// body that runs past this without a newline is not a line-oriented feed.
pub const MAX_LINE_BYTES: usize = 8 * 1024 * 1024;

/// Incremental line splitter.
#[derive(Debug)]
pub struct LineBuffer {
    buf: BytesMut,
    /// Prefix of `buf` already searched for a newline.
    scanned: usize,
    limit: usize,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::with_limit(MAX_LINE_BYTES)
    }
}

impl LineBuffer {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            scanned: 0,
            limit,
        }
    }

    /// Append a chunk.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Take the next complete line, without its terminator (`\n` or `\r\n`).
    ///
    /// Returns `Ok(None)` when no full line is buffered yet.
    pub fn next_line(&mut self) -> Result<Option<String>, Error> {
        let Some(pos) = self.buf[self.scanned..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|offset| self.scanned + offset)
        else {
            self.scanned = self.buf.len();
            if self.buf.len() > self.limit {
                return Err(Error::LineTooLong { limit: self.limit });
            }
            return Ok(None);
        };

        if pos > self.limit {
            return Err(Error::LineTooLong { limit: self.limit });
        }

        let mut line = self.buf.split_to(pos);
        self.buf.advance(1);
        self.scanned = 0;
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        Ok(Some(String::from_utf8(line.to_vec())?))
    }

    /// Flush whatever is left once the body has ended.
    ///
    /// An unterminated final line is still a line; an empty remainder is not.
    pub fn finish(&mut self) -> Result<Option<String>, Error> {
        if self.buf.is_empty() {
            return Ok(None);
        }
        let mut rest = self.buf.split();
        self.scanned = 0;
        if rest.last() == Some(&b'\r') {
            rest.truncate(rest.len() - 1);
        }
        Ok(Some(String::from_utf8(rest.to_vec())?))
    }

    /// Number of buffered bytes not yet returned as a line.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Split a chunked byte stream into lines.
///
/// Chunk errors are converted with `Into<Error>` and end the stream after
/// being yielded.
pub fn ndjson_lines<S, E>(chunks: S) -> impl Stream<Item = Result<String, Error>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<Error> + Send + 'static,
{
    async_stream::try_stream! {
        let mut chunks = Box::pin(chunks);
        let mut lines = LineBuffer::default();

        while let Some(chunk) = chunks.next().await {
            let chunk: Bytes = chunk.map_err(Into::<Error>::into)?;
            lines.push(&chunk);
            while let Some(line) = lines.next_line()? {
                yield line;
            }
        }

        if let Some(line) = lines.finish()? {
            yield line;
        }
    }
}
