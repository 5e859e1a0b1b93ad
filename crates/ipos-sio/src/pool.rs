//! Package buffer pool
//!
//! Random-access reads allocate a full package buffer per call. The pool
//! keeps a bounded free list so concurrent `read_at` callers can reuse them.

use parking_lot::Mutex;
use zeroize::Zeroize;

use crate::MAX_PACKAGE_SIZE;

/// Default number of idle buffers kept around.
pub const DEFAULT_POOL_CAPACITY: usize = 32;

#[derive(Debug)]
pub struct BufferPool {
    free: Mutex<Vec<Box<[u8]>>>,
    capacity: usize,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            capacity,
        }
    }

    /// Take a package-sized buffer, allocating if the pool is empty.
    pub fn take(&self) -> Box<[u8]> {
        self.free
            .lock()
            .pop()
            .unwrap_or_else(|| vec![0u8; MAX_PACKAGE_SIZE].into_boxed_slice())
    }

    /// Return a buffer. It is wiped first since it held plaintext. Buffers of
    /// the wrong size, or beyond capacity, are dropped.
    pub fn put(&self, mut buf: Box<[u8]>) {
        buf.zeroize();
        if buf.len() != MAX_PACKAGE_SIZE {
            return;
        }
        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(buf);
        }
    }

    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_put_reuses() {
        let pool = BufferPool::new(2);
        let buf = pool.take();
        assert_eq!(buf.len(), MAX_PACKAGE_SIZE);
        assert_eq!(pool.idle(), 0);
        pool.put(buf);
        assert_eq!(pool.idle(), 1);
        let _ = pool.take();
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn test_capacity_bound() {
        let pool = BufferPool::new(1);
        pool.put(pool.take());
        pool.put(vec![0u8; MAX_PACKAGE_SIZE].into_boxed_slice());
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_returned_buffer_is_wiped() {
        let pool = BufferPool::new(1);
        let mut buf = pool.take();
        buf.fill(0xaa);
        pool.put(buf);
        assert!(pool.take().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_wrong_size_dropped() {
        let pool = BufferPool::default();
        pool.put(vec![0u8; 10].into_boxed_slice());
        assert_eq!(pool.idle(), 0);
    }
}
