use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{
    codec::find,
    error::{Error, ErrorKind, Result},
};

const MAX_FRAME_SIZE: usize = 64 << 20;

/// Splits a byte stream into separator-terminated frames.
///
/// Partial input stays in the internal buffer, so dropping a pending
/// [`FrameReader::next_frame`] future loses nothing.
pub struct FrameReader<R> {
    reader: R,
    buffer: BytesMut,
    separator: Bytes,
    scanned: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R, separator: &[u8]) -> Self {
        Self {
            reader,
            buffer: BytesMut::with_capacity(64 << 10),
            separator: Bytes::copy_from_slice(separator),
            scanned: 0,
        }
    }

    fn parse_frame(&mut self) -> Result<Option<Bytes>> {
        // resume the search where the previous one stopped.
        let start = self
            .scanned
            .saturating_sub(self.separator.len().saturating_sub(1));
        if let Some(pos) = find(&self.buffer[start..], &self.separator) {
            let frame = self.buffer.split_to(start + pos).freeze();
            self.buffer.advance(self.separator.len());
            self.scanned = 0;
            return Ok(Some(frame));
        }

        self.scanned = self.buffer.len();
        if self.buffer.len() >= MAX_FRAME_SIZE {
            return Err(Error::new(
                ErrorKind::FrameTooLong,
                format!("frame is too long: {}", self.buffer.len()),
            ));
        }
        Ok(None)
    }

    /// Returns the next non-blank frame without its separator, or `None`
    /// once the stream is exhausted.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors and on frames longer than 64 MiB.
    pub async fn next_frame(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(frame) = self.parse_frame()? {
                if frame.trim_ascii().is_empty() {
                    continue;
                }
                return Ok(Some(frame));
            }

            let n = self
                .reader
                .read_buf(&mut self.buffer)
                .await
                .map_err(|e| Error::new(ErrorKind::TcpRecvMsgFailed, e.to_string()))?;
            if n == 0 {
                // an unterminated trailing frame still counts at eof.
                let rest = self.buffer.split().freeze();
                self.scanned = 0;
                if rest.trim_ascii().is_empty() {
                    return Ok(None);
                }
                return Ok(Some(rest));
            }
        }
    }
}

impl<R> std::fmt::Debug for FrameReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameReader")
            .field("buffered", &self.buffer.len())
            .finish()
    }
}
