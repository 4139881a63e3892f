//! Fixed-capacity binary buddy arena allocator.
//!
//! A [`BuddyArena`] owns one contiguous, zero-initialized arena of
//! power-of-two size and carves it into power-of-two blocks. Free blocks are
//! tracked per size class ("level"); allocation splits a coarser block down
//! to the requested class, and deallocation coalesces freed siblings back
//! into larger blocks.
//!
//! Blocks are identified by arena-relative offsets rather than raw pointers,
//! so handles stay valid, comparable, and safe to pass around for as long as
//! the arena lives. The allocator performs no internal synchronization; a
//! single logical caller must issue `allocate`/`deallocate` calls serially.
//!
//! ```
//! use buddy_arena::BuddyArena;
//!
//! let mut arena = BuddyArena::with_min_block_size(1024, 64)?;
//! let block = arena.allocate(100)?;
//! assert_eq!(block.len(), 128);
//! arena.deallocate(block)?;
//! assert_eq!(arena.stats().free, 1024);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![doc(html_root_url = "https://docs.rs/buddy_arena/0.1.0")]
#![warn(missing_debug_implementations)]
#![warn(missing_docs)]

pub mod buddy;
pub mod pixel;


use thiserror::Error;

pub use crate::buddy::{Block, BuddyArena, MemoryStats, DEFAULT_MIN_BLOCK_SIZE};
pub use crate::pixel::PixelBuffer;

/// The error type for allocator constructors.
///
/// Construction errors are fatal: no allocator value exists in an invalid
/// configuration, so later address arithmetic can never silently misbehave.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The requested capacity was zero.
    #[error("arena capacity must be nonzero")]
    ZeroCapacity,

    /// The requested capacity cannot be rounded up to a power of two
    /// without overflowing `usize`.
    #[error("arena capacity {0} cannot be rounded to a power of two")]
    CapacityTooLarge(usize),

    /// The minimum block size was zero or not a power of two.
    ///
    /// A non-power-of-two minimum would corrupt the level/size
    /// correspondence and the buddy computation, so it is rejected here
    /// rather than detected later.
    #[error("minimum block size {0} is not a positive power of two")]
    MinBlockNotPowerOfTwo(usize),

    /// The minimum block size exceeds the (rounded) arena capacity.
    #[error("minimum block size {min} exceeds arena capacity {capacity}")]
    MinBlockTooLarge {
        /// The requested minimum block size.
        min: usize,
        /// The arena capacity after rounding up to a power of two.
        capacity: usize,
    },
}

/// The error type for `allocate` and `deallocate`.
///
/// Both variants are recoverable and leave the allocator state untouched.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AllocError {
    /// No free block of sufficient size exists at any level.
    ///
    /// The caller may retry after freeing memory, or fail its own operation.
    #[error("out of memory: no free block can satisfy {requested} bytes")]
    OutOfMemory {
        /// The size originally requested by the caller.
        requested: usize,
    },

    /// The offset passed to `deallocate` is not a live allocation.
    ///
    /// This indicates a double free or a foreign handle. The allocator
    /// reports it and carries on unchanged.
    #[error("invalid pointer: offset {offset} is not a live allocation")]
    InvalidPointer {
        /// The offending arena-relative offset.
        offset: usize,
    },
}
