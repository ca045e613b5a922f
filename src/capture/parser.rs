//! multipart/x-mixed-replace frame parser
//!
//! Reads one part at a time from a buffered byte source:
//!
//! ```text
//! ...noise...--<boundary>\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: <n>\r\n
//! \r\n
//! <n bytes of JPEG>\r\n
//! ```
//!
//! The boundary is matched by substring so leftovers from a previous part on
//! the same line do not desync the parser. Parts without a Content-Length are
//! skipped. A parser is bound to one connection and cannot be restarted.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::constants::MAX_LINE_BYTES;
use crate::error::CaptureError;
use crate::stream::Frame;

/// Extracts JPEG frames from a multipart byte stream
pub struct FrameParser<R> {
    reader: R,
    boundary: Vec<u8>,
    max_frame_bytes: usize,
    line: Vec<u8>,
    frames_parsed: u64,
    parts_skipped: u64,
}

impl<R: AsyncBufRead + Unpin> FrameParser<R> {
    pub fn new(reader: R, boundary: &str, max_frame_bytes: usize) -> Self {
        Self {
            reader,
            boundary: boundary.as_bytes().to_vec(),
            max_frame_bytes,
            line: Vec::with_capacity(256),
            frames_parsed: 0,
            parts_skipped: 0,
        }
    }

    /// Read until the next complete frame.
    ///
    /// Any error leaves the parser unusable; the caller should drop the connection.
    pub async fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        loop {
            self.seek_boundary().await?;

            let Some(length) = self.read_headers().await? else {
                self.parts_skipped += 1;
                tracing::debug!("Skipping part without Content-Length");
                continue;
            };

            if length > self.max_frame_bytes {
                return Err(CaptureError::FrameTooLarge(length));
            }

            let mut payload = vec![0u8; length];
            self.reader
                .read_exact(&mut payload)
                .await
                .map_err(eof_as_truncated)?;
            self.skip_line_terminator().await?;

            self.frames_parsed += 1;
            return Ok(Frame::from(payload));
        }
    }

    /// Frames returned so far
    pub fn frames_parsed(&self) -> u64 {
        self.frames_parsed
    }

    /// Parts dropped for lacking a Content-Length header
    pub fn parts_skipped(&self) -> u64 {
        self.parts_skipped
    }

    async fn seek_boundary(&mut self) -> Result<(), CaptureError> {
        // Tail of a read cut at the line limit; the boundary may straddle it
        let keep = self.boundary.len().saturating_sub(1);
        let mut window: Vec<u8> = Vec::new();
        loop {
            self.read_line().await?;
            window.extend_from_slice(&self.line);
            if contains(&window, &self.boundary) {
                return Ok(());
            }

            if self.line.ends_with(b"\n") {
                window.clear();
            } else {
                let cut = window.len().saturating_sub(keep);
                window.drain(..cut);
            }
        }
    }

    /// Returns the Content-Length, if the part declared one
    async fn read_headers(&mut self) -> Result<Option<usize>, CaptureError> {
        let mut content_length = None;
        loop {
            self.read_line().await?;
            if !self.line.ends_with(b"\n") {
                if self.line.len() < MAX_LINE_BYTES {
                    return Err(CaptureError::Truncated);
                }
                return Err(CaptureError::InvalidHeader("header line too long".into()));
            }

            let line = String::from_utf8_lossy(&self.line);
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                return Ok(content_length);
            }

            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            if name.trim().eq_ignore_ascii_case("content-length") {
                let value = value.trim();
                let length = value
                    .parse::<usize>()
                    .map_err(|_| CaptureError::InvalidHeader(format!("Content-Length: {value}")))?;
                content_length = Some(length);
            }
        }
    }

    /// Read one line (or up to the line limit) into `self.line`
    async fn read_line(&mut self) -> Result<(), CaptureError> {
        self.line.clear();
        let read = (&mut self.reader)
            .take(MAX_LINE_BYTES as u64)
            .read_until(b'\n', &mut self.line)
            .await?;
        if read == 0 {
            return Err(CaptureError::Truncated);
        }
        Ok(())
    }

    /// Consume the CRLF (or bare LF) after a payload, if present
    async fn skip_line_terminator(&mut self) -> Result<(), CaptureError> {
        for _ in 0..2 {
            let next = self.reader.fill_buf().await?.first().copied();
            match next {
                Some(b'\r') => self.reader.consume(1),
                Some(b'\n') => {
                    self.reader.consume(1);
                    break;
                }
                _ => break,
            }
        }
        Ok(())
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|window| window == needle)
}

fn eof_as_truncated(err: std::io::Error) -> CaptureError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        CaptureError::Truncated
    } else {
        CaptureError::Io(err)
    }
}
