//! Transfer buffers.
//!
//! Each encoded request lives in a pooled `BytesMut` from submission until
//! the writer task has flushed it. The pool is bounded by a semaphore, so
//! at most `transfer_buffers` requests per connection are encoded but not
//! yet on the wire; further submitters wait for a buffer.

use crate::error::{Error, Result};
use bytes::BytesMut;
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Initial capacity of a freshly allocated buffer.
const INITIAL_CAPACITY: usize = 4 * 1024;

/// Buffers larger than this are not kept on the free list.
const RETAIN_CAPACITY: usize = 1024 * 1024;

/// Bounded pool of request buffers for one connection.
pub struct TransferBuffers {
    permits: Arc<Semaphore>,
    free: Arc<Mutex<Vec<BytesMut>>>,
    max_size: usize,
}

impl TransferBuffers {
    pub fn new(count: usize, max_size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(count)),
            free: Arc::new(Mutex::new(Vec::with_capacity(count))),
            max_size,
        }
    }

    /// Largest request a buffer may hold.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Buffers not currently handed out.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait for a free buffer with room for `len` bytes.
    ///
    /// A request larger than the configured maximum is refused up front
    /// as an invalid argument. Nothing is queued and the connection stays
    /// usable.
    pub async fn acquire(&self, len: usize) -> Result<TransferBuffer> {
        if len > self.max_size {
            return Err(Error::InvalidArgument(format!(
                "request of {len} bytes exceeds max buffer size {}",
                self.max_size
            )));
        }
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| Error::Disposed)?;
        let mut buf = self
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(INITIAL_CAPACITY));
        buf.reserve(len);
        Ok(TransferBuffer {
            buf,
            free: Arc::clone(&self.free),
            _permit: permit,
        })
    }

    /// Refuse further acquisitions; waiters fail with `Disposed`.
    pub fn close(&self) {
        self.permits.close();
    }
}

/// One checked-out buffer. Dropping it returns the buffer and its slot.
pub struct TransferBuffer {
    buf: BytesMut,
    free: Arc<Mutex<Vec<BytesMut>>>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for TransferBuffer {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        &self.buf
    }
}

impl DerefMut for TransferBuffer {
    fn deref_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }
}

impl Drop for TransferBuffer {
    fn drop(&mut self) {
        let mut buf = std::mem::take(&mut self.buf);
        if buf.capacity() <= RETAIN_CAPACITY {
            buf.clear();
            self.free.lock().push(buf);
        }
    }
}
