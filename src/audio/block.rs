//! Fixed-size sample blocks and the pool they come from
//!
//! Blocks are allocated once up front and recycled through a lock-free
//! queue, so the audio path never touches the heap.

use crossbeam::queue::ArrayQueue;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::constants::AUDIO_BLOCK_SAMPLES;

/// One channel's worth of samples for one audio period
#[derive(Clone, PartialEq, Eq)]
pub struct SampleBlock {
    data: Box<[i16]>,
}

impl SampleBlock {
    /// A silent block
    pub fn new() -> Self {
        Self {
            data: vec![0i16; AUDIO_BLOCK_SAMPLES].into_boxed_slice(),
        }
    }

    pub fn silence(&mut self) {
        self.data.fill(0);
    }
}

impl Default for SampleBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SampleBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleBlock")
            .field("len", &self.data.len())
            .finish()
    }
}

impl Deref for SampleBlock {
    type Target = [i16];

    fn deref(&self) -> &[i16] {
        &self.data
    }
}

impl DerefMut for SampleBlock {
    fn deref_mut(&mut self) -> &mut [i16] {
        &mut self.data
    }
}

/// Source of sample blocks
pub trait BlockAllocator {
    /// Take a block; `None` when the pool is exhausted
    fn allocate(&self) -> Option<SampleBlock>;

    /// Give a block back
    fn release(&self, block: SampleBlock);
}

impl<T: BlockAllocator + ?Sized> BlockAllocator for Arc<T> {
    fn allocate(&self) -> Option<SampleBlock> {
        (**self).allocate()
    }

    fn release(&self, block: SampleBlock) {
        (**self).release(block)
    }
}

/// Pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub available: usize,
    pub exhausted: usize,
}

/// Fixed pool of pre-allocated blocks
pub struct BlockPool {
    free: ArrayQueue<SampleBlock>,
    exhausted_count: AtomicUsize,
}

impl BlockPool {
    /// Create a pool holding `capacity` silent blocks
    pub fn new(capacity: usize) -> Self {
        let free = ArrayQueue::new(capacity.max(1));
        for _ in 0..capacity {
            let _ = free.push(SampleBlock::new());
        }
        Self {
            free,
            exhausted_count: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.free.capacity()
    }

    /// Blocks currently free
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Allocation attempts that found the pool empty
    pub fn exhausted_count(&self) -> usize {
        self.exhausted_count.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.capacity(),
            available: self.available(),
            exhausted: self.exhausted_count(),
        }
    }
}

impl BlockAllocator for BlockPool {
    fn allocate(&self) -> Option<SampleBlock> {
        match self.free.pop() {
            Some(mut block) => {
                block.silence();
                Some(block)
            }
            None => {
                self.exhausted_count.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn release(&self, block: SampleBlock) {
        // a foreign block beyond capacity is simply dropped
        let _ = self.free.push(block);
    }
}

/// Thread-safe handle to a block pool
pub type SharedBlockPool = Arc<BlockPool>;

/// Create a new shared block pool
pub fn create_shared_pool(capacity: usize) -> SharedBlockPool {
    Arc::new(BlockPool::new(capacity))
}
