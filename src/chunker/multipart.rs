//! Part decoders for the upstream multipart body
//!
//! Two wire variants exist in the field:
//!
//! - [`WireFormat::Multipart`]: proper `multipart/x-mixed-replace` framing
//!   with `--boundary` delimiters and per-part headers.
//! - [`WireFormat::Legacy`]: the framing emitted by some webcams (notably
//!   AXIS models) whose boundary lines don't match the negotiated boundary.
//!   Any non-empty line is taken as a part marker and the `Content-Length`
//!   header inside the part is the only source of truth for the body size.

use bytes::Bytes;

use crate::error::{Error, ProtocolError, StreamError};

use super::body::BodyReader;

/// Upstream framing variant, selected per source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    /// Standards-compliant multipart delimiters
    #[default]
    Multipart,
    /// Permissive mode for devices with broken boundaries
    Legacy,
}

/// Decodes the response body into successive part payloads
pub(crate) struct PartDecoder {
    body: BodyReader,
    boundary: String,
    format: WireFormat,
    in_preamble: bool,
}

impl PartDecoder {
    pub(crate) fn new(body: BodyReader, boundary: String, format: WireFormat) -> Self {
        Self {
            body,
            boundary,
            format,
            in_preamble: true,
        }
    }

    /// Decode the next part payload.
    ///
    /// `Ok(None)` is a clean end of stream: the closing delimiter, a
    /// zero-length part, or EOF between parts.
    pub(crate) async fn next_part(&mut self) -> Result<Option<Bytes>, Error> {
        match self.format {
            WireFormat::Multipart => self.next_multipart().await,
            WireFormat::Legacy => self.next_legacy().await,
        }
    }

    async fn next_multipart(&mut self) -> Result<Option<Bytes>, Error> {
        let delimiter = format!("--{}", self.boundary);
        let close_delimiter = format!("--{}--", self.boundary);

        // Delimiter line, skipping the blank padding between parts. Text
        // before the first delimiter is an RFC 2046 preamble, ignored;
        // after that a stray line means the framing is broken.
        loop {
            let Some(line) = self.body.read_line().await? else {
                return Ok(None);
            };
            if line.is_empty() {
                continue;
            }
            if line == close_delimiter.as_str() {
                return Ok(None);
            }
            if line != delimiter.as_str() {
                if self.in_preamble {
                    continue;
                }
                return Err(ProtocolError::InvalidBoundary(
                    String::from_utf8_lossy(&line).into_owned(),
                )
                .into());
            }
            self.in_preamble = false;
            break;
        }

        let content_length = self.read_part_headers(false).await?;

        let data = match content_length {
            Some(n) => self.body.read_exact(n).await?,
            None => {
                // No size declared; scan forward to the next delimiter
                let scan = format!("\n--{}", self.boundary);
                let Some(mut data) = self.body.read_until(scan.as_bytes()).await? else {
                    return Err(StreamError::UnexpectedEof.into());
                };
                if data.last() == Some(&b'\r') {
                    data.truncate(data.len() - 1);
                }
                data
            }
        };

        if data.is_empty() {
            return Ok(None);
        }
        Ok(Some(data))
    }

    async fn next_legacy(&mut self) -> Result<Option<Bytes>, Error> {
        // Any non-empty line counts as the part marker
        loop {
            match self.body.read_line().await? {
                None => return Ok(None),
                Some(line) if line.is_empty() => continue,
                Some(_) => break,
            }
        }

        let Some(size) = self.read_part_headers(true).await? else {
            return Err(ProtocolError::MissingContentLength.into());
        };

        if size == 0 {
            return Ok(None);
        }
        Ok(Some(self.body.read_exact(size).await?))
    }

    /// Read part headers up to the blank line, returning the declared
    /// `Content-Length` if present.
    async fn read_part_headers(&mut self, required: bool) -> Result<Option<usize>, Error> {
        let mut content_length = None;

        loop {
            let Some(line) = self.body.read_line().await? else {
                if required && content_length.is_none() {
                    return Err(ProtocolError::MissingContentLength.into());
                }
                return Err(StreamError::UnexpectedEof.into());
            };
            if line.is_empty() {
                break;
            }

            let text = String::from_utf8_lossy(&line);
            let Some((name, value)) = text.split_once(':') else {
                return Err(ProtocolError::MalformedHeader(text.into_owned()).into());
            };
            if name.trim().eq_ignore_ascii_case("content-length") {
                let value = value.trim();
                let size = value
                    .parse::<usize>()
                    .map_err(|_| ProtocolError::InvalidContentLength(value.to_string()))?;
                content_length = Some(size);
            }
        }

        Ok(content_length)
    }
}
