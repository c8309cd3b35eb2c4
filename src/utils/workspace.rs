//! # Partial-Likelihood Buffer Pool
//!
//! Pre-sized buffers for partial likelihoods, recycled through a free list so
//! that repeated recomputation of the same compute nodes does not allocate.
//!
//! ## Design Philosophy
//! The compute core borrows a [`PooledBuffer`] when a node needs a proposed
//! epoch and hands the stale one back on accept or reject. Free lists are
//! keyed by [`BufferShape`] and capped; when a list is empty the pool
//! allocates a fresh buffer, and when it is full a returned buffer is dropped.
//! The pool never blocks.

use std::collections::HashMap;

use serde::Serialize;

/// Retained buffers per shape
pub const DEFAULT_MAX_RETAINED: usize = 1600;

/// Dimensions of one partial buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferShape {
    pub sites: usize,
    pub categories: usize,
    pub states: usize,
}

impl BufferShape {
    #[inline]
    pub fn len(&self) -> usize {
        self.sites * self.categories * self.states
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offset of the state vector for (`category`, `site`), site relative
    /// to the buffer's first site
    #[inline]
    pub fn offset(&self, category: usize, site: usize) -> usize {
        (category * self.sites + site) * self.states
    }
}

/// A buffer borrowed from an [`ArrayPool`]
#[derive(Debug)]
pub struct PooledBuffer {
    shape: BufferShape,
    data: Vec<f64>,
}

impl PooledBuffer {
    #[inline]
    pub fn shape(&self) -> BufferShape {
        self.shape
    }

    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }
}

/// Pool counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub borrowed: u64,
    pub reused: u64,
    pub allocated: u64,
    pub returned: u64,
    pub dropped: u64,
}

#[derive(Debug)]
pub struct ArrayPool {
    free: HashMap<BufferShape, Vec<Vec<f64>>>,
    max_retained: usize,
    stats: PoolStats,
}

impl ArrayPool {
    pub fn new(max_retained: usize) -> Self {
        Self {
            free: HashMap::new(),
            max_retained,
            stats: PoolStats::default(),
        }
    }

    /// Take a buffer of `shape`; contents are unspecified
    pub fn borrow(&mut self, shape: BufferShape) -> PooledBuffer {
        self.stats.borrowed += 1;
        let data = match self.free.get_mut(&shape).and_then(|list| list.pop()) {
            Some(data) => {
                self.stats.reused += 1;
                data
            }
            None => {
                self.stats.allocated += 1;
                vec![0.0; shape.len()]
            }
        };
        PooledBuffer { shape, data }
    }

    pub fn give_back(&mut self, buffer: PooledBuffer) {
        self.stats.returned += 1;
        let list = self.free.entry(buffer.shape).or_default();
        if list.len() < self.max_retained {
            list.push(buffer.data);
        } else {
            self.stats.dropped += 1;
        }
    }

    /// Buffers currently held for `shape`
    pub fn retained(&self, shape: BufferShape) -> usize {
        self.free.get(&shape).map(|l| l.len()).unwrap_or(0)
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }
}

impl Default for ArrayPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETAINED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(sites: usize) -> BufferShape {
        BufferShape {
            sites,
            categories: 2,
            states: 4,
        }
    }

    #[test]
    fn test_buffer_reuse() {
        let mut pool = ArrayPool::new(4);
        let b = pool.borrow(shape(10));
        assert_eq!(b.as_slice().len(), 80);
        pool.give_back(b);
        assert_eq!(pool.retained(shape(10)), 1);

        let _b = pool.borrow(shape(10));
        let stats = pool.stats();
        assert_eq!(stats.borrowed, 2);
        assert_eq!(stats.reused, 1);
        assert_eq!(stats.allocated, 1);
    }

    #[test]
    fn test_shapes_are_separate() {
        let mut pool = ArrayPool::new(4);
        let b = pool.borrow(shape(10));
        pool.give_back(b);
        let c = pool.borrow(shape(11));
        assert_eq!(c.shape(), shape(11));
        assert_eq!(pool.stats().allocated, 2);
        assert_eq!(pool.retained(shape(10)), 1);
    }

    #[test]
    fn test_free_list_cap() {
        let mut pool = ArrayPool::new(2);
        let buffers: Vec<_> = (0..3).map(|_| pool.borrow(shape(5))).collect();
        for b in buffers {
            pool.give_back(b);
        }
        assert_eq!(pool.retained(shape(5)), 2);
        assert_eq!(pool.stats().dropped, 1);
    }

    #[test]
    fn test_offset_layout() {
        let s = shape(10);
        assert_eq!(s.offset(0, 0), 0);
        assert_eq!(s.offset(0, 1), 4);
        assert_eq!(s.offset(1, 0), 40);
    }
}
