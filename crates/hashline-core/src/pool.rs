//! Receive buffer pool for the ingress workers.
//!
//! Every inbound datagram is read into a [`PooledBuf`] checked out of a
//! shared [`BufferPool`]. The buffer is owned by exactly one worker at a
//! time; dropping it hands the allocation back to the pool. When the
//! pool is empty a fresh buffer is allocated, and when it is already at
//! capacity a returned buffer is simply freed.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, Weak};

struct PoolShared {
    free: Mutex<Vec<Vec<u8>>>,
    buf_size: usize,
    capacity: usize,
}

/// Fixed-size pool of receive buffers.
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    /// Create a pool holding at most `capacity` buffers of `buf_size`
    /// bytes each.
    #[must_use]
    pub fn new(capacity: usize, buf_size: usize) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                free: Mutex::new(Vec::with_capacity(capacity)),
                buf_size,
                capacity,
            }),
        }
    }

    /// Check a zeroed buffer out of the pool.
    #[must_use]
    pub fn acquire(&self) -> PooledBuf {
        let buf = {
            let mut free = self.shared.free.lock().unwrap_or_else(|e| e.into_inner());
            free.pop()
        };
        let buf = buf.unwrap_or_else(|| vec![0u8; self.shared.buf_size]);
        PooledBuf {
            buf,
            pool: Arc::downgrade(&self.shared),
        }
    }

    /// Buffers currently idle in the pool.
    #[must_use]
    pub fn available(&self) -> usize {
        self.shared
            .free
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

/// A buffer checked out of a [`BufferPool`]; returns itself on drop.
pub struct PooledBuf {
    buf: Vec<u8>,
    pool: Weak<PoolShared>,
}

impl Deref for PooledBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        let Some(shared) = self.pool.upgrade() else {
            return;
        };
        let mut buf = std::mem::take(&mut self.buf);
        let mut free = shared.free.lock().unwrap_or_else(|e| e.into_inner());
        if free.len() < shared.capacity {
            buf.clear();
            buf.resize(shared.buf_size, 0);
            free.push(buf);
        }
    }
}
