//! Buffered reading over the upstream response body
//!
//! `reqwest` hands the body back as a stream of arbitrarily-sized chunks;
//! the part decoders need line-at-a-time and exact-count reads, so this
//! wrapper accumulates chunks in a `BytesMut` and serves them out.

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt, TryStreamExt};
use std::pin::Pin;

use crate::error::{Error, StreamError};

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Boxed chunk stream; the error is boxed so tests can inject failures
/// without constructing `reqwest` errors.
pub(crate) type ByteStream =
    Pin<Box<dyn Stream<Item = std::result::Result<Bytes, BoxError>> + Send>>;

/// Incremental reader over a chunked byte stream
pub(crate) struct BodyReader {
    stream: ByteStream,
    buf: BytesMut,
    eof: bool,
}

impl BodyReader {
    pub(crate) fn new(stream: ByteStream) -> Self {
        Self {
            stream,
            buf: BytesMut::with_capacity(64 * 1024),
            eof: false,
        }
    }

    pub(crate) fn from_response(response: reqwest::Response) -> Self {
        Self::new(Box::pin(
            response.bytes_stream().map_err(|e| Box::new(e) as BoxError),
        ))
    }

    /// Pull one more chunk into the buffer. Returns false at end of stream.
    async fn fill(&mut self) -> Result<bool, Error> {
        if self.eof {
            return Ok(false);
        }
        match self.stream.next().await {
            Some(Ok(chunk)) => {
                self.buf.extend_from_slice(&chunk);
                Ok(true)
            }
            Some(Err(e)) => Err(StreamError::Read(e).into()),
            None => {
                self.eof = true;
                Ok(false)
            }
        }
    }

    /// Read one line, stripped of its `\r\n` / `\n` terminator.
    ///
    /// Returns `None` on a clean end of stream at a line start. A trailing
    /// unterminated line is returned as-is before the `None`.
    pub(crate) async fn read_line(&mut self) -> Result<Option<Bytes>, Error> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let mut line = self.buf.split_to(pos + 1);
                line.truncate(pos);
                if line.last() == Some(&b'\r') {
                    line.truncate(line.len() - 1);
                }
                return Ok(Some(line.freeze()));
            }
            if !self.fill().await? {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                let line = self.buf.split().freeze();
                return Ok(Some(line));
            }
        }
    }

    /// Read exactly `n` bytes; end of stream before that is an error.
    pub(crate) async fn read_exact(&mut self, n: usize) -> Result<Bytes, Error> {
        while self.buf.len() < n {
            if !self.fill().await? {
                return Err(StreamError::UnexpectedEof.into());
            }
        }
        Ok(self.buf.split_to(n).freeze())
    }

    /// Read up to (excluding) the next occurrence of `delim`, leaving the
    /// delimiter itself in the buffer. Returns `None` if the stream ends
    /// before the delimiter shows up.
    pub(crate) async fn read_until(&mut self, delim: &[u8]) -> Result<Option<Bytes>, Error> {
        loop {
            if let Some(pos) = find(&self.buf, delim) {
                return Ok(Some(self.buf.split_to(pos).freeze()));
            }
            if !self.fill().await? {
                return Ok(None);
            }
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
