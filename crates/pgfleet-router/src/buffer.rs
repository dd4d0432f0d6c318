//! Recycled I/O buffer pool for client/upstream forwarding, generalized
//! from this codebase's `BytesMutPool` convention: bounded, lock-free,
//! cleared on return, dropped rather than grown past capacity.

use bytes::BytesMut;
use crossbeam_queue::ArrayQueue;

pub struct IoBufferPool {
    pool: ArrayQueue<BytesMut>,
    default_capacity: usize,
}

impl IoBufferPool {
    pub fn new(pool_size: usize, default_capacity: usize) -> Self {
        assert!(pool_size > 0, "pool_size must be positive");
        assert!(default_capacity > 0, "default_capacity must be positive");
        Self {
            pool: ArrayQueue::new(pool_size),
            default_capacity,
        }
    }

    pub fn get(&self) -> BytesMut {
        self.pool.pop().unwrap_or_else(|| BytesMut::with_capacity(self.default_capacity))
    }

    pub fn put(&self, mut buf: BytesMut) {
        buf.clear();
        let _ = self.pool.push(buf);
    }

    pub fn available(&self) -> usize {
        self.pool.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_put_roundtrip_clears_and_retains_capacity() {
        let pool = IoBufferPool::new(4, 256);
        let mut buf = pool.get();
        buf.extend_from_slice(b"hello");
        let capacity = buf.capacity();
        pool.put(buf);

        let recycled = pool.get();
        assert!(recycled.is_empty());
        assert_eq!(recycled.capacity(), capacity);
    }

    #[test]
    fn exhausted_pool_allocates_fresh() {
        let pool = IoBufferPool::new(1, 64);
        let _a = pool.get();
        let b = pool.get();
        assert!(b.capacity() >= 64);
    }
}
