//! Content-Length framing over arbitrary byte streams.
//!
//! Every frame on the wire is prefixed with a header block:
//! ```text
//! Content-Length: <length>\r\n
//! \r\n
//! <payload>
//! ```
//! The reading and writing halves are split so the connection can park a
//! dedicated reader thread on one side while callers share the other.

use std::io::{BufRead, Write};

use crate::error::TransportError;

const CONTENT_LENGTH: &str = "Content-Length: ";

/// Largest payload a [`FrameReader`] accepts.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Writes framed messages to an underlying byte sink.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: Write> FrameWriter<W> {
    /// Wraps a writer.
    #[must_use]
    pub const fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Writes one framed message and flushes the sink.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] if writing or flushing fails.
    pub fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let header = format!("{CONTENT_LENGTH}{}\r\n\r\n", payload.len());
        self.inner.write_all(header.as_bytes())?;
        self.inner.write_all(payload)?;
        self.inner.flush()?;
        Ok(())
    }

    /// Returns the wrapped writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Reads framed messages from an underlying buffered byte source.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
}

impl<R: BufRead> FrameReader<R> {
    /// Wraps a buffered reader.
    #[must_use]
    pub const fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Reads one framed message, blocking until it is complete.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] when the stream ends cleanly before
    /// a header starts, [`TransportError::MissingContentLength`] or
    /// [`TransportError::InvalidHeader`] for malformed headers,
    /// [`TransportError::FrameTooLarge`] when the announced length exceeds
    /// [`MAX_FRAME_BYTES`], and [`TransportError::Io`] when the stream fails
    /// mid-frame.
    pub fn receive(&mut self) -> Result<Vec<u8>, TransportError> {
        let content_length = self.read_headers()?;
        if content_length > MAX_FRAME_BYTES {
            return Err(TransportError::FrameTooLarge {
                length: content_length,
                limit: MAX_FRAME_BYTES,
            });
        }
        let mut content = vec![0_u8; content_length];
        self.inner.read_exact(&mut content)?;
        Ok(content)
    }

    fn read_headers(&mut self) -> Result<usize, TransportError> {
        let mut content_length: Option<usize> = None;
        let mut seen_header = false;

        loop {
            let mut line = String::new();
            let bytes_read = self.inner.read_line(&mut line)?;
            if bytes_read == 0 {
                if seen_header {
                    return Err(TransportError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "stream closed while reading headers",
                    )));
                }
                return Err(TransportError::Closed);
            }
            seen_header = true;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }

            if let Some(value) = trimmed.strip_prefix(CONTENT_LENGTH) {
                content_length = Some(value.parse().map_err(|_| TransportError::InvalidHeader)?);
            }
        }

        content_length.ok_or(TransportError::MissingContentLength)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use rstest::rstest;

    use super::*;

    fn reader(input: &[u8]) -> FrameReader<Cursor<Vec<u8>>> {
        FrameReader::new(Cursor::new(input.to_vec()))
    }

    #[rstest]
    fn writes_content_length_header() {
        let mut writer = FrameWriter::new(Vec::new());
        writer.send(b"test payload").expect("send failed");

        let written = String::from_utf8(writer.into_inner()).expect("invalid utf8");
        assert_eq!(written, "Content-Length: 12\r\n\r\ntest payload");
    }

    #[rstest]
    fn reads_consecutive_frames() {
        let mut frames = reader(b"Content-Length: 5\r\n\r\nhelloContent-Length: 3\r\n\r\nbye");

        assert_eq!(frames.receive().expect("first frame"), b"hello");
        assert_eq!(frames.receive().expect("second frame"), b"bye");
        assert!(matches!(frames.receive(), Err(TransportError::Closed)));
    }

    #[rstest]
    fn ignores_additional_headers() {
        let mut frames = reader(b"Content-Length: 4\r\nContent-Type: application/json\r\n\r\ntest");
        assert_eq!(frames.receive().expect("frame"), b"test");
    }

    #[rstest]
    #[case(b"Content-Type: application/json\r\n\r\ntest".as_slice())]
    fn rejects_missing_length(#[case] input: &[u8]) {
        let result = reader(input).receive();
        assert!(matches!(result, Err(TransportError::MissingContentLength)));
    }

    #[rstest]
    fn rejects_unparsable_length() {
        let result = reader(b"Content-Length: many\r\n\r\ntest").receive();
        assert!(matches!(result, Err(TransportError::InvalidHeader)));
    }

    #[rstest]
    #[case::past_the_limit(b"Content-Length: 67108865\r\n\r\n".as_slice())]
    #[case::usize_max(b"Content-Length: 18446744073709551615\r\n\r\n".as_slice())]
    fn oversized_frames_are_refused_before_reading(#[case] input: &[u8]) {
        let result = reader(input).receive();
        assert!(matches!(
            result,
            Err(TransportError::FrameTooLarge { limit: MAX_FRAME_BYTES, .. })
        ));
    }

    #[rstest]
    fn truncated_header_is_an_io_error() {
        let result = reader(b"Content-Length: 10").receive();
        assert!(matches!(result, Err(TransportError::Io(_))));
    }

    #[rstest]
    fn truncated_payload_is_an_io_error() {
        let result = reader(b"Content-Length: 10\r\n\r\nabc").receive();
        assert!(matches!(result, Err(TransportError::Io(_))));
    }
}
