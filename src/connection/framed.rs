//! Socket plumbing: TCP open and the reply frame reader.

use crate::error::{Error, Result};
use crate::resp::parser::resp_frame_len;

use bytes::{Bytes, BytesMut};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;

/// Initial read buffer capacity (64 KB).
const DEFAULT_BUF_CAPACITY: usize = 64 * 1024;

/// Grow the buffer when less than this is free before a read.
const MIN_READ_SPACE: usize = 4096;

/// Open a TCP stream to `addr` within `timeout`, Nagle disabled.
pub async fn open(addr: &str, timeout: Duration) -> Result<TcpStream> {
    let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(Error::Timeout(format!(
                "connection to {addr} timed out after {timeout:?}"
            )))
        }
    };
    stream.set_nodelay(true).ok();
    Ok(stream)
}

/// Cuts complete reply frames off a byte stream.
///
/// Only the frame boundary is computed here; typed decoding happens later
/// over the returned `Bytes`, which share the read buffer's allocation.
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
    max_buf_size: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, max_buf_size: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY.min(max_buf_size)),
            max_buf_size,
        }
    }

    /// Read one complete reply frame.
    ///
    /// Malformed framing, an oversized reply, or end of stream are all
    /// errors the connection cannot recover from.
    pub async fn read_frame(&mut self) -> Result<Bytes> {
        loop {
            if !self.buf.is_empty() {
                match resp_frame_len(&self.buf) {
                    Ok(len) => return Ok(self.buf.split_to(len).freeze()),
                    Err(Error::Incomplete) => {}
                    Err(e) => return Err(e),
                }
            }

            if self.buf.len() > self.max_buf_size {
                return Err(Error::Protocol(format!(
                    "reply too large: buffer would exceed {} bytes",
                    self.max_buf_size
                )));
            }
            if self.buf.capacity() - self.buf.len() < MIN_READ_SPACE {
                let want = (self.buf.capacity() * 2).max(DEFAULT_BUF_CAPACITY);
                self.buf.reserve(want - self.buf.len());
            }
            let n = self.inner.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(Error::connection(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed by server",
                ));
            }
        }
    }

    /// Bytes received but not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

// ── Tests ──────────────────────────────────────────────────────────
