//! Datagram buffer pool.
//!
//! The worker allocates one buffer per received (or sent) datagram. Doing
//! that with the system allocator on every packet is wasteful for a
//! high-rate endpoint, so buffers are recycled through a [`DatagramPool`].
//! The pool is an external collaborator (§1): the worker only depends on the
//! trait, and an application can swap in its own allocator (e.g. one backed
//! by a lock-free SPSC ring) by implementing it.

use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;

/// Allocates and recycles fixed-owner buffers for datagram payloads.
pub trait DatagramPool: Send + Sync {
    /// Acquire a buffer of at least `len` bytes, zero-length until resized.
    fn acquire(self: Arc<Self>, len: usize) -> PooledBuffer;

    /// Return a buffer to the pool for reuse. Called by [`PooledBuffer`]'s
    /// `Drop` impl; pool implementations should clear the buffer before
    /// storing it.
    fn release(&self, buf: BytesMut);
}

/// An owned buffer checked out from a [`DatagramPool`].
///
/// Dereferences to [`BytesMut`]. When dropped, the buffer is returned to the
/// pool it came from rather than deallocated, satisfying the "released by
/// drop before reuse" rule in §5.
pub struct PooledBuffer {
    buf: Option<BytesMut>,
    pool: Arc<dyn DatagramPool>,
}

impl PooledBuffer {
    fn new(buf: BytesMut, pool: Arc<dyn DatagramPool>) -> Self {
        Self {
            buf: Some(buf),
            pool,
        }
    }

    /// Resize the buffer, zero-filling any newly exposed bytes.
    pub fn reset(&mut self, len: usize) {
        let buf = self.buf.get_or_insert_with(BytesMut::new);
        buf.clear();
        buf.resize(len, 0);
    }
}

impl std::ops::Deref for PooledBuffer {
    type Target = BytesMut;
    fn deref(&self) -> &BytesMut {
        self.buf.as_ref().expect("buffer taken before drop")
    }
}

impl std::ops::DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut BytesMut {
        self.buf.as_mut().expect("buffer taken before drop")
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.buf.as_ref().map(BytesMut::len).unwrap_or(0))
            .finish()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}

/// A simple free-list [`DatagramPool`]: a mutex-guarded `Vec` of spare
/// buffers, capped so a burst of traffic can't grow the pool unboundedly.
pub struct FreeListPool {
    free: Mutex<Vec<BytesMut>>,
    capacity: usize,
}

impl std::fmt::Debug for FreeListPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FreeListPool")
            .field("capacity", &self.capacity)
            .field("available", &self.free.lock().len())
            .finish()
    }
}

impl FreeListPool {
    /// Create a pool that keeps at most `capacity` spare buffers around.
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(Vec::with_capacity(capacity.min(64))),
            capacity,
        })
    }
}

impl Default for FreeListPool {
    fn default() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            capacity: 256,
        }
    }
}

impl DatagramPool for FreeListPool {
    fn acquire(self: Arc<Self>, len: usize) -> PooledBuffer {
        let mut buf = self.free.lock().pop().unwrap_or_default();
        buf.clear();
        buf.resize(len, 0);
        PooledBuffer::new(buf, self)
    }

    fn release(&self, mut buf: BytesMut) {
        if self.free.lock().len() < self.capacity {
            buf.clear();
            self.free.lock().push(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquired_buffer_has_requested_length() {
        let pool = FreeListPool::new(4);
        let buf = pool.clone().acquire(18);
        assert_eq!(buf.len(), 18);
    }

    #[test]
    fn dropped_buffer_is_recycled() {
        let pool = FreeListPool::new(4);
        {
            let _buf = pool.clone().acquire(64);
        }
        assert_eq!(pool.free.lock().len(), 1);

        let buf = pool.clone().acquire(8);
        assert_eq!(buf.len(), 8);
        assert_eq!(pool.free.lock().len(), 0);
    }

    #[test]
    fn pool_does_not_grow_past_capacity() {
        let pool = FreeListPool::new(1);
        let a = pool.clone().acquire(8);
        let b = pool.clone().acquire(8);
        drop(a);
        drop(b);
        assert_eq!(pool.free.lock().len(), 1);
    }
}
