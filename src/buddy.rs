//! A binary-buddy arena allocator.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::{AllocError, ConfigError};

/// The default minimum block size, in bytes.
///
/// Matches one cache line on common hardware; requests smaller than this are
/// rounded up to it.
pub const DEFAULT_MIN_BLOCK_SIZE: usize = 64;

/// Computes the offset of a block's buddy.
///
/// `size` must be the block's own level size and `offset` a multiple of it.
/// Within a binary buddy layout the sibling of a size-`size` block is the
/// other half of the enclosing size-`2 * size` parent, which is always at
/// `offset ^ size`. The computation is an involution: applying it twice
/// returns the original offset.
#[inline]
pub fn buddy_of(offset: usize, size: usize) -> usize {
    offset ^ size
}

/// A handle to an allocated block.
///
/// A block is a conceptual `(offset, size)` pair: an arena-relative byte
/// offset plus the granted power-of-two size. Handles are plain values; they
/// do not borrow the arena and remain comparable after the allocation is
/// released (at which point they are merely stale).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Block {
    offset: usize,
    size: usize,
}

impl Block {
    /// Returns the block's offset from the start of the arena.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Returns the granted size of the block in bytes.
    ///
    /// This is the rounded power-of-two size, which may exceed the size
    /// originally requested.
    #[inline]
    pub fn len(&self) -> usize {
        self.size
    }

    /// Returns `true` if the block has zero length. Granted blocks never do.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

/// One size class of the allocator.
///
/// Level 0 holds whole-arena blocks; each deeper level holds blocks half the
/// size of the previous. Free offsets are kept in an ordered set so that the
/// buddy membership check during coalescing stays sub-linear as block counts
/// grow.
struct Level {
    block_size: usize,
    free: BTreeSet<usize>,
}

impl Level {
    /// Retrieves the offset of the buddy of the block at `offset`.
    #[inline]
    fn buddy_of(&self, offset: usize) -> usize {
        buddy_of(offset, self.block_size)
    }

    /// Removes and returns a free block, lowest offset first.
    #[inline]
    fn take_any(&mut self) -> Option<usize> {
        self.free.pop_first()
    }
}

/// Point-in-time memory usage statistics.
///
/// A diagnostic surface only; `allocate` and `deallocate` never consult it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MemoryStats {
    /// Total arena size in bytes.
    pub total: usize,
    /// Sum of all granted allocation sizes.
    pub used: usize,
    /// `total - used`.
    pub free: usize,
    /// Size of the coarsest level with a non-empty free list, or 0 if no
    /// block is free.
    pub largest_free_block: usize,
    /// `1 - largest_free_block / free` when any memory is free, else 0.
    ///
    /// Describes how much free memory is scattered outside the single
    /// largest free block.
    pub fragmentation: f64,
}

/// A fixed-capacity binary buddy allocator over one owned arena.
///
/// The arena is a contiguous, zero-initialized byte extent of power-of-two
/// size, owned exclusively by the allocator for its entire lifetime. Issued
/// blocks are logically checked out to the caller until the matching
/// [`deallocate`] returns them.
///
/// Every returned block is a power of two in size, aligned to its own size,
/// and disjoint from every other live allocation and every free block. A
/// block and its buddy are never simultaneously free at the same level; any
/// such pair is coalesced immediately when the second one is freed, which
/// bounds long-run fragmentation.
///
/// There is no internal synchronization: a single logical caller must issue
/// `allocate`/`deallocate` calls serially, excluding concurrent use via
/// external locking if necessary. Reads and writes of already-returned
/// payload bytes never touch allocator metadata.
///
/// [`deallocate`]: BuddyArena::deallocate
pub struct BuddyArena {
    arena: Box<[u8]>,
    total_size: usize,
    min_block_size: usize,
    levels: Vec<Level>,
    /// Offset of each live block mapped to its granted size. Used to
    /// validate and size deallocation requests.
    allocations: HashMap<usize, usize>,
}

impl BuddyArena {
    /// Constructs an arena of at least `capacity` bytes with the
    /// [default minimum block size](DEFAULT_MIN_BLOCK_SIZE).
    ///
    /// # Errors
    ///
    /// See [`with_min_block_size`](Self::with_min_block_size).
    pub fn new(capacity: usize) -> Result<BuddyArena, ConfigError> {
        Self::with_min_block_size(capacity, DEFAULT_MIN_BLOCK_SIZE)
    }

    /// Constructs an arena of at least `capacity` bytes that never splits
    /// blocks below `min_block_size` bytes.
    ///
    /// The capacity is rounded up to the next power of two. Level 0 starts
    /// with the whole arena as its single free block.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if `capacity` is zero or cannot be rounded
    /// to a power of two, or if `min_block_size` is zero, not a power of
    /// two, or exceeds the rounded capacity.
    pub fn with_min_block_size(
        capacity: usize,
        min_block_size: usize,
    ) -> Result<BuddyArena, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }

        if !min_block_size.is_power_of_two() {
            return Err(ConfigError::MinBlockNotPowerOfTwo(min_block_size));
        }

        let total_size = capacity
            .checked_next_power_of_two()
            .ok_or(ConfigError::CapacityTooLarge(capacity))?;

        if min_block_size > total_size {
            return Err(ConfigError::MinBlockTooLarge {
                min: min_block_size,
                capacity: total_size,
            });
        }

        // Number of halvings from the whole arena down to the minimum block
        // size, inclusive.
        let level_count =
            (total_size.trailing_zeros() - min_block_size.trailing_zeros()) as usize + 1;

        let mut levels: Vec<Level> = (0..level_count)
            .map(|depth| Level {
                block_size: total_size >> depth,
                free: BTreeSet::new(),
            })
            .collect();

        // The whole arena starts as one free block.
        levels[0].free.insert(0);

        Ok(BuddyArena {
            arena: vec![0u8; total_size].into_boxed_slice(),
            total_size,
            min_block_size,
            levels,
            allocations: HashMap::new(),
        })
    }

    /// Returns the total arena size in bytes.
    #[inline]
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// Returns the minimum block size in bytes.
    #[inline]
    pub fn min_block_size(&self) -> usize {
        self.min_block_size
    }

    /// Returns the number of size classes.
    #[inline]
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Returns the number of outstanding allocations.
    #[inline]
    pub fn live_allocations(&self) -> usize {
        self.allocations.len()
    }

    /// Rounds a requested size to the size class actually granted.
    ///
    /// Returns `None` if the result would exceed the arena.
    fn effective_size(&self, size: usize) -> Option<usize> {
        size.max(self.min_block_size)
            .checked_next_power_of_two()
            .filter(|&rounded| rounded <= self.total_size)
    }

    /// Maps a granted (power-of-two, in-range) size to its level index.
    fn level_for(&self, size: usize) -> usize {
        (self.total_size.trailing_zeros() - size.trailing_zeros()) as usize
    }

    /// Removes a free block of exactly `self.levels[target].block_size`
    /// bytes from the free lists, splitting a coarser block if necessary.
    fn find_block(&mut self, target: usize) -> Option<usize> {
        if let Some(offset) = self.levels[target].take_any() {
            return Some(offset);
        }

        // No block at the target level; take the first free block from the
        // finest coarser level that has one.
        let (start, offset) = (0..target)
            .rev()
            .find_map(|level| self.levels[level].take_any().map(|offset| (level, offset)))?;

        // Split down to the target level. The left half stays in hand, the
        // right half becomes a free entry one level deeper. No payload moves;
        // splitting is metadata bookkeeping only.
        for level in start..target {
            let child_size = self.levels[level + 1].block_size;
            self.levels[level + 1].free.insert(offset + child_size);
        }

        Some(offset)
    }

    /// Allocates a block of at least `size` bytes.
    ///
    /// The granted size is `max(size, min_block_size)` rounded up to the
    /// next power of two; the returned block is aligned to that size. A
    /// request of zero bytes is granted a minimum-size block.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::OutOfMemory`] if the rounded size exceeds the
    /// arena or no free block of sufficient size exists at any level. The
    /// failure is atomic: no partial allocation state is left behind.
    pub fn allocate(&mut self, size: usize) -> Result<Block, AllocError> {
        let granted = self
            .effective_size(size)
            .ok_or(AllocError::OutOfMemory { requested: size })?;

        let target = self.level_for(granted);

        let offset = self
            .find_block(target)
            .ok_or(AllocError::OutOfMemory { requested: size })?;

        self.allocations.insert(offset, granted);

        Ok(Block {
            offset,
            size: granted,
        })
    }

    /// Returns a previously allocated block to the arena.
    ///
    /// The freed block is pushed onto its level's free list, then repeatedly
    /// merged with its buddy for as long as the buddy is also free, climbing
    /// toward level 0. Each free thereby reconstitutes the largest possible
    /// free block.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::InvalidPointer`] if `block` is not a live
    /// allocation of this arena (double free or foreign handle). The
    /// allocator state is left unchanged.
    pub fn deallocate(&mut self, block: Block) -> Result<(), AllocError> {
        let mut offset = block.offset();

        let size = self
            .allocations
            .remove(&offset)
            .ok_or(AllocError::InvalidPointer { offset })?;

        let mut level = self.level_for(size);
        self.levels[level].free.insert(offset);

        // Coalesce upward. The top-level block never merges further.
        while level > 0 {
            let buddy = self.levels[level].buddy_of(offset);

            if !self.levels[level].free.remove(&buddy) {
                break;
            }

            // Both halves leave this level; the merged block is the one at
            // the smaller offset.
            self.levels[level].free.remove(&offset);
            offset = offset.min(buddy);
            level -= 1;
            self.levels[level].free.insert(offset);
        }

        Ok(())
    }

    /// Returns the payload bytes of an allocated block.
    ///
    /// # Panics
    ///
    /// Panics if `block` did not come from this arena and reaches past its
    /// end. A handle whose allocation has been freed reads whatever bytes
    /// currently occupy that range.
    #[inline]
    pub fn bytes(&self, block: Block) -> &[u8] {
        &self.arena[block.offset..block.offset + block.size]
    }

    /// Returns the payload bytes of an allocated block, mutably.
    ///
    /// # Panics
    ///
    /// Panics if `block` did not come from this arena and reaches past its
    /// end.
    #[inline]
    pub fn bytes_mut(&mut self, block: Block) -> &mut [u8] {
        &mut self.arena[block.offset..block.offset + block.size]
    }

    /// Computes point-in-time usage statistics.
    pub fn stats(&self) -> MemoryStats {
        let used: usize = self.allocations.values().sum();
        let free = self.total_size - used;

        // Levels are ordered coarsest first, so the first non-empty free
        // list holds the largest free block.
        let largest_free_block = self
            .levels
            .iter()
            .find(|level| !level.free.is_empty())
            .map(|level| level.block_size)
            .unwrap_or(0);

        let fragmentation = if free > 0 {
            1.0 - largest_free_block as f64 / free as f64
        } else {
            0.0
        };

        MemoryStats {
            total: self.total_size,
            used,
            free,
            largest_free_block,
            fragmentation,
        }
    }
}

impl fmt::Debug for BuddyArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuddyArena")
            .field("total_size", &self.total_size)
            .field("min_block_size", &self.min_block_size)
            .field("levels", &self.levels.len())
            .field("live_allocations", &self.allocations.len())
            .finish_non_exhaustive()
    }
}

impl Drop for BuddyArena {
    fn drop(&mut self) {
        // Outstanding records at teardown are caller leaks; report them but
        // do not fail, the arena memory is reclaimed either way.
        if !self.allocations.is_empty() {
            let leaked: usize = self.allocations.values().sum();
            log::warn!(
                "buddy arena dropped with {} outstanding block(s), {} bytes leaked",
                self.allocations.len(),
                leaked,
            );
        }
    }
}
