//! A pixel buffer backed by a buddy arena.
//!
//! This is the one in-scope consumer of [`BuddyArena`]: each buffer owns
//! exactly one arena for its lifetime and backs its interleaved pixel
//! storage with a single block from it. Image decode/encode and geometric
//! transforms are external collaborators that only ever see byte ranges.

use std::fmt;

use thiserror::Error;

use crate::buddy::{Block, BuddyArena, MemoryStats, DEFAULT_MIN_BLOCK_SIZE};
use crate::ConfigError;

/// The error type for pixel buffer constructors.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum PixelBufferError {
    /// The backing arena could not be configured.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The supplied pixel data does not match the stated dimensions.
    #[error("pixel data is {actual} bytes, expected {expected} for {width}x{height}x{channels}")]
    DataLengthMismatch {
        /// Length of the supplied data.
        actual: usize,
        /// `width * height * channels`.
        expected: usize,
        /// Image width in pixels.
        width: usize,
        /// Image height in pixels.
        height: usize,
        /// Interleaved channels per pixel.
        channels: usize,
    },
}

/// Interleaved pixel storage for one image, backed by one [`BuddyArena`].
///
/// Pixels are stored row-major as `channels` consecutive bytes per pixel.
/// The arena lives exactly as long as the buffer; dropping the buffer
/// returns the backing block before the arena is torn down, so a
/// well-behaved buffer never trips the arena's leak report.
pub struct PixelBuffer {
    arena: BuddyArena,
    block: Block,
    width: usize,
    height: usize,
    channels: usize,
}

impl PixelBuffer {
    /// Creates a zero-filled buffer for a `width` x `height` image with
    /// `channels` bytes per pixel.
    ///
    /// # Errors
    ///
    /// Returns an error if any dimension is zero or the total byte size
    /// overflows.
    pub fn new(
        width: usize,
        height: usize,
        channels: usize,
    ) -> Result<PixelBuffer, PixelBufferError> {
        let byte_len = width
            .checked_mul(height)
            .and_then(|px| px.checked_mul(channels))
            .ok_or(ConfigError::CapacityTooLarge(usize::MAX))?;

        if byte_len == 0 {
            return Err(ConfigError::ZeroCapacity.into());
        }

        let mut arena = BuddyArena::new(byte_len.max(DEFAULT_MIN_BLOCK_SIZE))?;

        // The arena was sized to fit, so the first allocation cannot fail.
        let block = arena
            .allocate(byte_len)
            .expect("first allocation from a freshly sized arena");

        Ok(PixelBuffer {
            arena,
            block,
            width,
            height,
            channels,
        })
    }

    /// Creates a buffer from already-decoded pixel data.
    ///
    /// `data` must be row-major interleaved bytes of exactly
    /// `width * height * channels` length; it is copied into the arena.
    ///
    /// # Errors
    ///
    /// Returns an error if the dimensions are invalid or `data` has the
    /// wrong length.
    pub fn from_bytes(
        width: usize,
        height: usize,
        channels: usize,
        data: &[u8],
    ) -> Result<PixelBuffer, PixelBufferError> {
        let expected = width
            .checked_mul(height)
            .and_then(|px| px.checked_mul(channels))
            .ok_or(ConfigError::CapacityTooLarge(usize::MAX))?;

        if data.len() != expected {
            return Err(PixelBufferError::DataLengthMismatch {
                actual: data.len(),
                expected,
                width,
                height,
                channels,
            });
        }

        let mut buffer = PixelBuffer::new(width, height, channels)?;
        buffer.as_bytes_mut().copy_from_slice(data);

        Ok(buffer)
    }

    /// Returns the image width in pixels.
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Returns the image height in pixels.
    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Returns the number of interleaved channels per pixel.
    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Returns the payload length in bytes.
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.width * self.height * self.channels
    }

    /// Returns the whole payload, for handing to an external encoder.
    ///
    /// Note that the backing block may be larger than the payload; only the
    /// payload prefix is exposed.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.arena.bytes(self.block)[..self.byte_len()]
    }

    /// Returns the whole payload mutably, for filling from an external
    /// decoder.
    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        let len = self.byte_len();
        &mut self.arena.bytes_mut(self.block)[..len]
    }

    /// Returns the bytes of row `y`.
    ///
    /// # Panics
    ///
    /// Panics if `y >= height`.
    pub fn row(&self, y: usize) -> &[u8] {
        assert!(y < self.height, "row {} out of range", y);

        let stride = self.width * self.channels;
        &self.as_bytes()[y * stride..(y + 1) * stride]
    }

    /// Returns the bytes of row `y`, mutably.
    ///
    /// # Panics
    ///
    /// Panics if `y >= height`.
    pub fn row_mut(&mut self, y: usize) -> &mut [u8] {
        assert!(y < self.height, "row {} out of range", y);

        let stride = self.width * self.channels;
        let start = y * stride;
        &mut self.as_bytes_mut()[start..start + stride]
    }

    /// Returns the channel bytes of the pixel at `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if `x >= width` or `y >= height`.
    pub fn pixel(&self, x: usize, y: usize) -> &[u8] {
        assert!(x < self.width, "column {} out of range", x);

        &self.row(y)[x * self.channels..(x + 1) * self.channels]
    }

    /// Returns the channel bytes of the pixel at `(x, y)`, mutably.
    ///
    /// # Panics
    ///
    /// Panics if `x >= width` or `y >= height`.
    pub fn pixel_mut(&mut self, x: usize, y: usize) -> &mut [u8] {
        assert!(x < self.width, "column {} out of range", x);

        let channels = self.channels;
        &mut self.row_mut(y)[x * channels..(x + 1) * channels]
    }

    /// Returns a human-readable summary of the buffer.
    pub fn describe(&self) -> String {
        format!(
            "{}x{} pixels, {} channel(s), {} bytes (arena: {} bytes)",
            self.width,
            self.height,
            self.channels,
            self.byte_len(),
            self.arena.total_size(),
        )
    }

    /// Returns the backing arena's usage statistics.
    pub fn memory_stats(&self) -> MemoryStats {
        self.arena.stats()
    }
}

impl fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("channels", &self.channels)
            .field("arena", &self.arena)
            .finish_non_exhaustive()
    }
}

impl Drop for PixelBuffer {
    fn drop(&mut self) {
        // Return the backing block so the arena tears down leak-free.
        let _ = self.arena.deallocate(self.block);
    }
}
