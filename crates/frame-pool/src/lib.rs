//! Non-blocking object pool for recycling fixed-shape frames.
//!
//! Frame producers that run at camera rate cannot afford a fresh heap
//! allocation per frame. [`FramePool`] keeps a bag of idle frames that a
//! producer draws from before filling a frame, and that the consumer
//! (usually the pipeline's frame-complete handler) hands frames back to.
//!
//! # Behaviour
//!
//! - [`FramePool::get`] never blocks and never fails. When the idle set is
//!   empty a new frame is synthesized with the factory.
//! - [`FramePool::put`] never rejects a frame. The nominal pool size is a
//!   soft target: a producer burst costs extra allocations, never a fault.
//! - The idle set is a lock-free [`SegQueue`], so `get`/`put` are safe from
//!   any number of threads.
//!
//! # Ownership
//!
//! `get` and `put` are the only transfer points. A frame handed out by `get`
//! belongs to the caller until it is returned; the pool performs no
//! ownership check, so returning the same frame twice is a caller bug.
//! [`Pooled`] wraps a leased frame and returns it on drop for callers that
//! prefer scoped ownership.
//!
//! # Example
//!
//! ```
//! use frame_pool::FramePool;
//!
//! let pool = FramePool::new(4, || vec![0u8; 640 * 480]).unwrap();
//! assert_eq!(pool.count(), 4);
//!
//! let mut frame = pool.get();
//! frame[0] = 42;
//! pool.put(frame);
//! assert_eq!(pool.count(), 4);
//! ```

pub mod frame_buffer;

pub use frame_buffer::FrameBuffer;

use crossbeam_queue::SegQueue;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

/// Factory used to synthesize frames.
type FactoryFn<T> = Box<dyn Fn() -> T + Send + Sync>;

/// Hook applied to a frame when it is returned.
type ResetFn<T> = Box<dyn Fn(&mut T) + Send + Sync>;

/// Errors raised while configuring a pool or filling a pooled buffer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("frame pool requires a frame factory")]
    MissingFactory,

    #[error("invalid pool size {0}: must be at least 1")]
    InvalidSize(usize),

    #[error("frame data of {len} bytes exceeds buffer capacity of {capacity} bytes")]
    BufferOverflow { len: usize, capacity: usize },
}

/// Thread-safe cache of reusable frames.
pub struct FramePool<T> {
    /// Idle frames ready to be handed out
    idle: SegQueue<T>,
    factory: FactoryFn<T>,
    reset_fn: Option<ResetFn<T>>,
    /// Nominal number of frames, pre-populated at construction
    pool_size: usize,
    /// Total factory invocations, including the initial fill
    allocations: AtomicUsize,
}

impl<T> std::fmt::Debug for FramePool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramePool")
            .field("pool_size", &self.pool_size)
            .field("idle", &self.idle.len())
            .field("allocations", &self.allocations.load(Ordering::Relaxed))
            .field("has_reset", &self.reset_fn.is_some())
            .finish()
    }
}

impl<T: Send + 'static> FramePool<T> {
    /// Create a pool holding `pool_size` frames made by `factory`.
    ///
    /// The factory is called exactly `pool_size` times before this returns.
    pub fn new<F>(pool_size: usize, factory: F) -> Result<Arc<Self>, PoolError>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::builder().size(pool_size).factory(factory).build()
    }

    /// Start building a pool with an optional reset hook.
    pub fn builder() -> FramePoolBuilder<T> {
        FramePoolBuilder {
            size: 0,
            factory: None,
            reset: None,
        }
    }

    /// Take an idle frame, or make a new one if none is idle.
    pub fn get(&self) -> T {
        if let Some(frame) = self.idle.pop() {
            return frame;
        }

        let total = self.allocations.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            pool_type = std::any::type_name::<T>(),
            pool_size = self.pool_size,
            allocations = total,
            "Frame pool empty, allocating a new frame"
        );
        (self.factory)()
    }

    /// Return a frame to the idle set.
    pub fn put(&self, mut frame: T) {
        if let Some(reset) = &self.reset_fn {
            reset(&mut frame);
        }
        self.idle.push(frame);
        trace!(idle = self.idle.len(), "Frame returned to pool");
    }

    /// Lease a frame that goes back to the pool when the guard drops.
    pub fn lease(self: &Arc<Self>) -> Pooled<T> {
        Pooled {
            pool: Arc::clone(self),
            frame: Some(self.get()),
        }
    }

    /// Number of idle frames. Advisory: races with concurrent `get`/`put`.
    #[must_use]
    pub fn count(&self) -> usize {
        self.idle.len()
    }

    /// Nominal pool size given at construction.
    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Total number of frames the factory has produced.
    #[must_use]
    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::Relaxed)
    }
}

/// Builder for [`FramePool`].
pub struct FramePoolBuilder<T> {
    size: usize,
    factory: Option<FactoryFn<T>>,
    reset: Option<ResetFn<T>>,
}

impl<T: Send + 'static> FramePoolBuilder<T> {
    /// Number of frames to pre-populate.
    pub fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Function that makes one new frame.
    pub fn factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.factory = Some(Box::new(factory));
        self
    }

    /// Hook run on every frame passed to [`FramePool::put`].
    pub fn reset<R>(mut self, reset: R) -> Self
    where
        R: Fn(&mut T) + Send + Sync + 'static,
    {
        self.reset = Some(Box::new(reset));
        self
    }

    /// Validate the settings and pre-populate the pool.
    pub fn build(self) -> Result<Arc<FramePool<T>>, PoolError> {
        let factory = self.factory.ok_or(PoolError::MissingFactory)?;
        if self.size == 0 {
            return Err(PoolError::InvalidSize(self.size));
        }

        let idle = SegQueue::new();
        for _ in 0..self.size {
            idle.push(factory());
        }

        debug!(
            pool_type = std::any::type_name::<T>(),
            pool_size = self.size,
            "Frame pool pre-populated"
        );

        Ok(Arc::new(FramePool {
            idle,
            factory,
            reset_fn: self.reset,
            pool_size: self.size,
            allocations: AtomicUsize::new(self.size),
        }))
    }
}

/// A frame leased from a [`FramePool`].
///
/// Dereferences to the frame and returns it to the pool on drop.
pub struct Pooled<T: Send + 'static> {
    pool: Arc<FramePool<T>>,
    // Always `Some` until drop or `detach`
    frame: Option<T>,
}

impl<T: Send + 'static> Pooled<T> {
    /// Take the frame out of pool custody.
    ///
    /// The frame is not returned automatically afterwards; hand it back
    /// with [`FramePool::put`] when done.
    #[must_use]
    pub fn detach(mut self) -> T {
        match self.frame.take() {
            Some(frame) => frame,
            None => unreachable!("pooled frame already taken"),
        }
    }

    /// The pool this frame returns to.
    #[must_use]
    pub fn pool(&self) -> &Arc<FramePool<T>> {
        &self.pool
    }
}

impl<T: Send + 'static> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.frame {
            Some(frame) => frame,
            None => unreachable!("pooled frame already taken"),
        }
    }
}

impl<T: Send + 'static> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.frame {
            Some(frame) => frame,
            None => unreachable!("pooled frame already taken"),
        }
    }
}

impl<T: Send + 'static> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            self.pool.put(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_prepopulates_pool_size_frames() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let pool = FramePool::new(5, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            0u32
        })
        .unwrap();

        assert_eq!(pool.count(), 5);
        assert_eq!(pool.pool_size(), 5);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(pool.allocations(), 5);
    }

    #[test]
    fn test_missing_factory_rejected() {
        let result = FramePool::<u8>::builder().size(3).build();
        assert_eq!(result.unwrap_err(), PoolError::MissingFactory);
    }

    #[test]
    fn test_zero_size_rejected() {
        let result = FramePool::new(0, || 0u8);
        assert_eq!(result.unwrap_err(), PoolError::InvalidSize(0));
    }

    #[test]
    fn test_get_then_put_keeps_count() {
        let pool = FramePool::new(3, || vec![0u8; 16]).unwrap();

        let frame = pool.get();
        assert_eq!(pool.count(), 2);
        pool.put(frame);
        assert_eq!(pool.count(), 3);
        assert_eq!(pool.allocations(), 3);
    }

    #[test]
    fn test_exhausted_pool_synthesizes() {
        let pool = FramePool::new(2, || 7i32).unwrap();

        let held: Vec<_> = (0..3).map(|_| pool.get()).collect();
        assert_eq!(held, vec![7, 7, 7]);
        assert_eq!(pool.count(), 0);
        assert_eq!(pool.allocations(), 3);

        // Soft cap: every frame goes back, even past the nominal size
        for frame in held {
            pool.put(frame);
        }
        assert_eq!(pool.count(), 3);
    }

    #[test]
    fn test_reset_runs_on_put() {
        let pool = FramePool::builder()
            .size(1)
            .factory(|| vec![0u8; 4])
            .reset(|buf: &mut Vec<u8>| buf.fill(0))
            .build()
            .unwrap();

        let mut frame = pool.get();
        frame[0] = 9;
        pool.put(frame);

        let frame = pool.get();
        assert_eq!(frame[0], 0);
    }

    #[test]
    fn test_lease_returns_on_drop() {
        let pool = FramePool::new(1, || 0u64).unwrap();

        {
            let mut leased = pool.lease();
            *leased = 99;
            assert_eq!(pool.count(), 0);
        }
        assert_eq!(pool.count(), 1);
        assert_eq!(pool.get(), 99);
    }

    #[test]
    fn test_detach_keeps_frame_out() {
        let pool = FramePool::new(1, || 1u8).unwrap();

        let frame = pool.lease().detach();
        assert_eq!(frame, 1);
        assert_eq!(pool.count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_get_put() {
        let pool = FramePool::new(4, || 0usize).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let pool = Arc::clone(&pool);
                tokio::spawn(async move {
                    for _ in 0..100 {
                        let mut frame = pool.get();
                        frame = frame.wrapping_add(i);
                        tokio::task::yield_now().await;
                        pool.put(frame);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        // Every frame handed out came back
        assert_eq!(pool.count(), pool.allocations());
        assert!(pool.count() >= 4);
    }
}
