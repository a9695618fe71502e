use super::region::SharedMemoryRegion;
use crate::error::MemoryError;
use log::{debug, warn};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Fixed-size codec buffers handed out with exclusive ownership
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    name: String,
    buffer_size: usize,
    capacity: usize,
    state: Mutex<PoolState>,
}

#[derive(Default)]
struct PoolState {
    free: Vec<(usize, SharedMemoryRegion)>,
    in_use: usize,
    peak_in_use: usize,
    allocation_count: usize,
    closed: bool,
}

/// A buffer owned by exactly one caller until it is released back
pub struct CodecBuffer {
    index: usize,
    len: usize,
    region: Option<SharedMemoryRegion>,
    pool: Arc<PoolInner>,
}

/// Pool usage statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub buffer_size: usize,
    pub capacity: usize,
    pub in_use: usize,
    pub available: usize,
    pub peak_in_use: usize,
    pub allocation_count: usize,
}

impl BufferPool {
    pub fn new(name: impl Into<String>, buffer_size: usize, capacity: usize) -> Result<Self, MemoryError> {
        if capacity == 0 {
            return Err(MemoryError::InvalidValue("pool capacity must be non-zero".to_string()));
        }
        let name = name.into();
        // First buffer is allocated eagerly so a bad size fails here
        let probe = SharedMemoryRegion::init_local(format!("{}-0", name), buffer_size, false)?;

        let state = PoolState {
            free: vec![(0, probe)],
            allocation_count: 1,
            ..PoolState::default()
        };
        debug!(
            "Buffer pool '{}' created: {} x {} bytes",
            name, capacity, buffer_size
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                name,
                buffer_size,
                capacity,
                state: Mutex::new(state),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Take a buffer, reusing a released one when available
    pub fn acquire(&self) -> Result<CodecBuffer, MemoryError> {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        if state.closed {
            return Err(MemoryError::Closed {
                name: inner.name.clone(),
            });
        }
        if state.in_use >= inner.capacity {
            return Err(MemoryError::PoolExhausted {
                capacity: inner.capacity,
            });
        }

        let (index, region) = match state.free.pop() {
            Some(entry) => entry,
            None => {
                let index = state.allocation_count;
                let region = SharedMemoryRegion::init_local(
                    format!("{}-{}", inner.name, index),
                    inner.buffer_size,
                    false,
                )?;
                state.allocation_count += 1;
                (index, region)
            }
        };
        state.in_use += 1;
        state.peak_in_use = state.peak_in_use.max(state.in_use);

        Ok(CodecBuffer {
            index,
            len: 0,
            region: Some(region),
            pool: Arc::clone(inner),
        })
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            buffer_size: self.inner.buffer_size,
            capacity: self.inner.capacity,
            in_use: state.in_use,
            available: state.free.len(),
            peak_in_use: state.peak_in_use,
            allocation_count: state.allocation_count,
        }
    }

    /// Drop idle buffers, keeping at most `keep` for reuse
    pub fn shrink(&self, keep: usize) -> usize {
        let mut state = self.inner.state.lock();
        let excess = state.free.len().saturating_sub(keep);
        state.free.truncate(keep);
        excess
    }

    /// Refuse further acquires and release idle buffers. Outstanding buffers
    /// are closed when their owners release them.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.free.clear();
        if state.in_use > 0 {
            warn!(
                "Buffer pool '{}' closed with {} buffers still held",
                self.inner.name, state.in_use
            );
        }
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("name", &self.inner.name)
            .field("stats", &self.stats())
            .finish()
    }
}

impl PoolInner {
    fn give_back(&self, index: usize, mut region: SharedMemoryRegion) {
        let mut state = self.state.lock();
        state.in_use = state.in_use.saturating_sub(1);
        if state.closed {
            region.close();
            return;
        }
        state.free.push((index, region));
    }
}

impl CodecBuffer {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn capacity(&self) -> usize {
        self.pool.buffer_size
    }

    /// Number of valid bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn region(&self) -> Result<&SharedMemoryRegion, MemoryError> {
        self.region.as_ref().ok_or_else(|| MemoryError::Closed {
            name: format!("{}-{}", self.pool.name, self.index),
        })
    }

    /// Replace the contents with `data`
    pub fn fill(&mut self, data: &[u8]) -> Result<(), MemoryError> {
        self.region()?.write_at(0, data)?;
        self.len = data.len();
        Ok(())
    }

    /// Copy out the valid bytes
    pub fn to_vec(&self) -> Result<Vec<u8>, MemoryError> {
        let len = self.len;
        self.region()?.with_slice(|bytes| bytes[..len].to_vec())
    }

    /// Return the buffer to its pool
    pub fn release(mut self) {
        self.return_to_pool();
    }

    fn return_to_pool(&mut self) {
        if let Some(region) = self.region.take() {
            // Next owner must not see our payload
            if let Err(e) = region.zero() {
                warn!("Failed to scrub buffer {}: {}", self.index, e);
            }
            self.pool.give_back(self.index, region);
        }
    }
}

impl Drop for CodecBuffer {
    fn drop(&mut self) {
        self.return_to_pool();
    }
}

impl fmt::Debug for CodecBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecBuffer")
            .field("pool", &self.pool.name)
            .field("index", &self.index)
            .field("len", &self.len)
            .finish()
    }
}

impl PoolStats {
    /// Bytes currently held by callers
    pub fn bytes_in_use(&self) -> usize {
        self.in_use * self.buffer_size
    }

    pub fn format_stats(&self) -> String {
        let mut stats = String::new();
        stats.push_str("=== Buffer Pool ===\n");
        stats.push_str(&format!(
            "In use: {}/{} ({:.2} KB)\n",
            self.in_use,
            self.capacity,
            self.bytes_in_use() as f64 / 1024.0
        ));
        stats.push_str(&format!("Idle: {}\n", self.available));
        stats.push_str(&format!("Peak: {}\n", self.peak_in_use));
        stats.push_str(&format!("Total Allocations: {}\n", self.allocation_count));
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_pool_creation() {
        let pool = BufferPool::new("input", 1024, 4).unwrap();
        let stats = pool.stats();
        assert_eq!(stats.capacity, 4);
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.available, 1);
        assert_eq!(stats.allocation_count, 1);

        assert!(BufferPool::new("empty", 1024, 0).is_err());
        assert!(BufferPool::new("no-size", 0, 4).is_err());
    }

    #[test]
    fn test_acquire_and_reuse() {
        let pool = BufferPool::new("input", 256, 4).unwrap();

        let first = pool.acquire().unwrap();
        let index = first.index();
        first.release();

        let second = pool.acquire().unwrap();
        assert_eq!(second.index(), index);
        assert_eq!(pool.stats().allocation_count, 1);
    }

    #[test]
    fn test_pool_exhaustion() {
        let pool = BufferPool::new("output", 64, 2).unwrap();
        let a = pool.acquire().unwrap();
        let _b = pool.acquire().unwrap();

        assert_eq!(
            pool.acquire().unwrap_err(),
            MemoryError::PoolExhausted { capacity: 2 }
        );

        drop(a);
        assert!(pool.acquire().is_ok());
        assert_eq!(pool.stats().peak_in_use, 2);
    }

    #[test]
    fn test_buffer_contents_do_not_leak_between_owners() {
        let pool = BufferPool::new("input", 32, 1).unwrap();

        let mut buffer = pool.acquire().unwrap();
        buffer.fill(b"secret").unwrap();
        assert_eq!(buffer.len(), 6);
        assert_eq!(buffer.to_vec().unwrap(), b"secret".to_vec());
        buffer.release();

        let next = pool.acquire().unwrap();
        assert!(next.is_empty());
        let raw = next.region().unwrap().with_slice(|bytes| bytes[..6].to_vec()).unwrap();
        assert_eq!(raw, vec![0; 6]);
    }

    #[test]
    fn test_fill_larger_than_capacity_fails() {
        let pool = BufferPool::new("input", 8, 1).unwrap();
        let mut buffer = pool.acquire().unwrap();
        assert!(matches!(
            buffer.fill(&[1; 9]),
            Err(MemoryError::InvalidValue(_))
        ));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_close_refuses_acquire() {
        let pool = BufferPool::new("closing", 64, 2).unwrap();
        let held = pool.acquire().unwrap();
        pool.close();
        pool.close();

        assert!(matches!(pool.acquire(), Err(MemoryError::Closed { .. })));
        drop(held);

        let stats = pool.stats();
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.available, 0);
    }

    #[test]
    fn test_shrink() {
        let pool = BufferPool::new("shrink", 64, 4).unwrap();
        let held: Vec<_> = (0..4).map(|_| pool.acquire().unwrap()).collect();
        drop(held);
        assert_eq!(pool.stats().available, 4);

        assert_eq!(pool.shrink(1), 3);
        assert_eq!(pool.stats().available, 1);
    }

    #[test]
    fn test_concurrent_acquire_respects_capacity() {
        let pool = BufferPool::new("shared", 128, 3).unwrap();
        let workers: Vec<_> = (0..8)
            .map(|i| {
                let pool = pool.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        if let Ok(mut buffer) = pool.acquire() {
                            buffer.fill(&[i as u8; 16]).unwrap();
                            assert_eq!(buffer.to_vec().unwrap(), vec![i as u8; 16]);
                        }
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        let stats = pool.stats();
        assert_eq!(stats.in_use, 0);
        assert!(stats.peak_in_use <= 3);
        assert!(stats.allocation_count <= 3);
    }

    #[test]
    fn test_format_stats() {
        let pool = BufferPool::new("fmt", 1024, 2).unwrap();
        let _buffer = pool.acquire().unwrap();
        let formatted = pool.stats().format_stats();
        assert!(formatted.contains("Buffer Pool"));
        assert!(formatted.contains("In use: 1/2"));
    }
}
