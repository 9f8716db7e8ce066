use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::trace;

/* 📖 # Why a free list of fixed-size nodes?

Every open stream needs a read buffer and often a write buffer. Streams are opened and
closed constantly, so the pool hands out fixed-size blocks from a free list and takes them
back when the node handle is dropped. A node therefore returns to the pool on every exit
path, including early returns on errors.
*/

/// Default size of one buffer node in bytes.
pub const DEFAULT_NODE_SIZE: usize = 8 * 1024;

/// Default number of idle nodes kept on the free list.
pub const DEFAULT_MAX_FREE: usize = 1024;

/// Process-local pool of fixed-size buffer nodes.
///
/// Cloning the pool is cheap and yields a handle to the same free list.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    node_size: usize,
    max_free: usize,
    free_list: Mutex<Vec<Box<[u8]>>>,
    metrics: PoolMetrics,
}

#[derive(Default)]
struct PoolMetrics {
    allocations: AtomicUsize,
    reuses: AtomicUsize,
    outstanding: AtomicUsize,
}

/// Snapshot of the pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Nodes ever created with a fresh heap allocation.
    pub allocations: usize,
    /// Checkouts satisfied from the free list.
    pub reuses: usize,
    /// Nodes currently checked out.
    pub outstanding: usize,
    /// Nodes idle on the free list.
    pub free: usize,
}

impl BufferPool {
    pub fn new(node_size: usize, max_free: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                node_size: node_size.max(1),
                max_free,
                free_list: Mutex::new(Vec::new()),
                metrics: PoolMetrics::default(),
            }),
        }
    }

    /// Capacity of every node handed out by this pool.
    pub fn node_size(&self) -> usize {
        self.inner.node_size
    }

    /// Checks out one node, reusing an idle one when available.
    pub fn allocate(&self) -> BufferNode {
        let recycled = self.inner.free_list.lock().pop();
        let data = match recycled {
            Some(data) => {
                self.inner.metrics.reuses.fetch_add(1, Ordering::Relaxed);
                data
            }
            None => {
                self.inner.metrics.allocations.fetch_add(1, Ordering::Relaxed);
                trace!(node_size = self.inner.node_size, "allocating fresh buffer node");
                vec![0u8; self.inner.node_size].into_boxed_slice()
            }
        };
        self.inner.metrics.outstanding.fetch_add(1, Ordering::Relaxed);
        BufferNode {
            data,
            len: 0,
            pool: self.inner.clone(),
        }
    }

    /// Returns a node to the free list. Equivalent to dropping it.
    pub fn free(&self, node: BufferNode) {
        drop(node);
    }

    /// Returns every node of a chain to the free list.
    pub fn free_all(&self, chain: super::BufferChain) {
        drop(chain);
    }

    pub fn stats(&self) -> PoolStats {
        let metrics = &self.inner.metrics;
        PoolStats {
            allocations: metrics.allocations.load(Ordering::Relaxed),
            reuses: metrics.reuses.load(Ordering::Relaxed),
            outstanding: metrics.outstanding.load(Ordering::Relaxed),
            free: self.inner.free_list.lock().len(),
        }
    }

    /// Drops every idle node, releasing its memory.
    pub fn shrink(&self) {
        self.inner.free_list.lock().clear();
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_NODE_SIZE, DEFAULT_MAX_FREE)
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("node_size", &self.inner.node_size)
            .field("stats", &self.stats())
            .finish()
    }
}

impl PoolInner {
    fn recycle(&self, data: Box<[u8]>) {
        self.metrics.outstanding.fetch_sub(1, Ordering::Relaxed);
        let mut free_list = self.free_list.lock();
        if free_list.len() < self.max_free {
            free_list.push(data);
        }
    }
}

/// A fixed-capacity block checked out of a [`BufferPool`].
///
/// `len` counts the filled prefix. Dropping the node hands its storage back to the pool.
pub struct BufferNode {
    data: Box<[u8]>,
    len: usize,
    pool: Arc<PoolInner>,
}

impl BufferNode {
    pub fn capacity(&self) -> usize {
        self.storage().len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    pub fn remaining(&self) -> usize {
        self.capacity() - self.len
    }

    /// The filled prefix.
    pub fn filled(&self) -> &[u8] {
        &self.storage()[..self.len]
    }

    /// The whole block, filled or not.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.storage_mut()
    }

    /// The unfilled tail of the block.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        let len = self.len;
        &mut self.storage_mut()[len..]
    }

    /// Sets the filled length, clamped to capacity.
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(self.capacity());
    }

    /// Copies as much of `bytes` as fits, returning the number copied.
    pub fn push_slice(&mut self, bytes: &[u8]) -> usize {
        let count = bytes.len().min(self.remaining());
        let start = self.len;
        self.storage_mut()[start..start + count].copy_from_slice(&bytes[..count]);
        self.len += count;
        count
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    fn storage(&self) -> &[u8] {
        &self.data
    }

    fn storage_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for BufferNode {
    fn drop(&mut self) {
        let data = std::mem::take(&mut self.data);
        if !data.is_empty() {
            self.pool.recycle(data);
        }
    }
}

impl fmt::Debug for BufferNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferNode")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_allocate_free_cycles_reuse_nodes() {
        let pool = BufferPool::new(64, 16);
        for _ in 0..1000 {
            let mut node = pool.allocate();
            node.push_slice(b"hello");
            pool.free(node);
        }
        let stats = pool.stats();
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.reuses, 999);
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.free, 1);
    }

    #[test]
    fn test_reused_node_starts_empty() {
        let pool = BufferPool::new(16, 4);
        let mut node = pool.allocate();
        node.push_slice(b"abc");
        drop(node);
        let node = pool.allocate();
        assert!(node.is_empty());
        assert_eq!(node.capacity(), 16);
    }

    #[test]
    fn test_push_slice_stops_at_capacity() {
        let pool = BufferPool::new(4, 4);
        let mut node = pool.allocate();
        assert_eq!(node.push_slice(b"abcdef"), 4);
        assert!(node.is_full());
        assert_eq!(node.filled(), b"abcd");
        assert_eq!(node.push_slice(b"x"), 0);
    }

    #[test]
    fn test_free_list_is_bounded() {
        let pool = BufferPool::new(8, 2);
        let nodes: Vec<_> = (0..5).map(|_| pool.allocate()).collect();
        assert_eq!(pool.stats().outstanding, 5);
        drop(nodes);
        let stats = pool.stats();
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.free, 2);
    }

    #[test]
    fn test_concurrent_allocate_and_free() {
        let pool = BufferPool::new(32, 64);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let pool = pool.clone();
                thread::spawn(move || {
                    for _ in 0..500 {
                        let mut node = pool.allocate();
                        node.push_slice(&[i as u8; 8]);
                        assert_eq!(node.filled(), &[i as u8; 8]);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let stats = pool.stats();
        assert_eq!(stats.outstanding, 0);
        assert!(stats.allocations <= 8);
        assert_eq!(stats.allocations + stats.reuses, 8 * 500);
    }
}
