//! Fixed-shape frame buffer for pooled reuse.
//!
//! `FrameBuffer` owns one pre-allocated byte buffer plus inline metadata.
//! The buffer is sized once (typically `width * height * bytes_per_pixel`)
//! and never reallocated, so a pool of `FrameBuffer`s turns a steady stream
//! of frames into a fixed working set.
//!
//! Modules must not keep references into a buffer after the frame has been
//! handed back to the pool; `reset` only clears metadata and the next
//! producer overwrites the bytes.

use crate::PoolError;

/// Frame data stored in a [`FramePool`](crate::FramePool).
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    /// Pre-allocated storage. Length is the fixed capacity.
    data: Vec<u8>,

    /// Bytes written for the current frame (`<= data.len()`).
    len: usize,

    /// Producer-assigned sequence number.
    pub sequence: u64,

    pub width: u32,
    pub height: u32,
    pub bytes_per_pixel: u32,

    /// Capture time as nanoseconds since the producer's epoch.
    pub timestamp_ns: u64,
}

impl FrameBuffer {
    /// Allocate a zeroed buffer of `capacity` bytes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity],
            len: 0,
            sequence: 0,
            width: 0,
            height: 0,
            bytes_per_pixel: 0,
            timestamp_ns: 0,
        }
    }

    /// Allocate a buffer large enough for one `width x height` image.
    #[must_use]
    pub fn for_shape(width: u32, height: u32, bytes_per_pixel: u32) -> Self {
        let capacity = width as usize * height as usize * bytes_per_pixel as usize;
        let mut frame = Self::with_capacity(capacity);
        frame.width = width;
        frame.height = height;
        frame.bytes_per_pixel = bytes_per_pixel;
        frame
    }

    /// Clear per-frame metadata for reuse.
    ///
    /// Shape and the allocation are kept; the bytes are not zeroed since the
    /// next fill overwrites them.
    pub fn reset(&mut self) {
        self.len = 0;
        self.sequence = 0;
        self.timestamp_ns = 0;
    }

    /// Copy `src` into the buffer, replacing the current contents.
    pub fn fill_from(&mut self, src: &[u8]) -> Result<(), PoolError> {
        if src.len() > self.data.len() {
            return Err(PoolError::BufferOverflow {
                len: src.len(),
                capacity: self.data.len(),
            });
        }
        self.data[..src.len()].copy_from_slice(src);
        self.len = src.len();
        Ok(())
    }

    /// Valid bytes of the current frame.
    #[inline]
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    #[inline]
    #[must_use]
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data[..self.len]
    }

    /// Fixed capacity in bytes.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
