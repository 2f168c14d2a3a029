//! Reusable compression buffers for rollback entry serialization.
//!
//! Serializing an entry needs a Snappy encoder (which owns a hash table) and
//! an output buffer sized for the worst-case compressed page. The pool hands
//! them out to frame writers and takes them back afterwards so steady-state
//! checkpointing does not allocate per page.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Maximum number of idle buffers kept by the pool.
const DEFAULT_POOL_CAPACITY: usize = 16;

/// One encoder and its output buffer.
pub struct CompressionBuffer {
    /// Snappy encoder.
    pub encoder: snap::raw::Encoder,
    /// Serialized entry output.
    pub buf: Vec<u8>,
}

impl CompressionBuffer {
    fn new() -> Self {
        Self {
            encoder: snap::raw::Encoder::new(),
            buf: Vec::new(),
        }
    }
}

impl std::fmt::Debug for CompressionBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressionBuffer")
            .field("capacity", &self.buf.capacity())
            .finish_non_exhaustive()
    }
}

/// Thread-safe pool of [`CompressionBuffer`]s.
#[derive(Debug)]
pub struct CompressionBufferPool {
    idle: Mutex<Vec<CompressionBuffer>>,
    capacity: usize,
    reused: AtomicU64,
    allocated: AtomicU64,
}

impl CompressionBufferPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_POOL_CAPACITY)
    }

    /// Creates an empty pool that keeps at most `capacity` idle buffers.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            reused: AtomicU64::new(0),
            allocated: AtomicU64::new(0),
        }
    }

    /// Takes a buffer from the pool, allocating one if none is idle.
    pub fn get(&self) -> CompressionBuffer {
        if let Some(buffer) = self.idle.lock().pop() {
            self.reused.fetch_add(1, Ordering::Relaxed);
            return buffer;
        }
        self.allocated.fetch_add(1, Ordering::Relaxed);
        CompressionBuffer::new()
    }

    /// Returns a buffer to the pool; dropped if the pool is full.
    pub fn put(&self, mut buffer: CompressionBuffer) {
        buffer.buf.clear();
        let mut idle = self.idle.lock();
        if idle.len() < self.capacity {
            idle.push(buffer);
        }
    }

    /// Drops every idle buffer.
    pub fn clear(&self) {
        self.idle.lock().clear();
    }

    /// Returns the number of idle buffers.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Returns (reused, allocated) counts since creation.
    #[must_use]
    pub fn stats(&self) -> (u64, u64) {
        (
            self.reused.load(Ordering::Relaxed),
            self.allocated.load(Ordering::Relaxed),
        )
    }
}

impl Default for CompressionBufferPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reuse() {
        let pool = CompressionBufferPool::new();

        let mut buffer = pool.get();
        buffer.buf.extend_from_slice(&[1, 2, 3]);
        pool.put(buffer);
        assert_eq!(pool.idle_count(), 1);

        let buffer = pool.get();
        assert!(buffer.buf.is_empty());
        assert_eq!(pool.stats(), (1, 1));
    }

    #[test]
    fn test_capacity_bound() {
        let pool = CompressionBufferPool::with_capacity(1);
        let a = pool.get();
        let b = pool.get();
        pool.put(a);
        pool.put(b);
        assert_eq!(pool.idle_count(), 1);

        pool.clear();
        assert_eq!(pool.idle_count(), 0);
    }
}
