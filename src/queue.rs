//! Bounded blocking FIFO between producers and the pipeline worker.
//!
//! One [`FrameQueue`] exists per pipeline run. Producers push from any
//! thread; exactly one worker takes. The queue carries three lifecycle flags:
//!
//! - `adding_completed`: no further pushes are accepted, queued items drain.
//! - `completed`: `adding_completed` and empty. Never reverts.
//! - `cancelled`: the run was aborted. Waiters wake up and `take` stops
//!   handing out items even if some remain.
//!
//! All waits park on a condvar; nothing spins.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// Reason a non-blocking push did not enqueue. The item is handed back.
#[derive(Debug, PartialEq, Eq)]
pub enum PushError<T> {
    /// Queue is at capacity
    Full(T),
    /// Adding has completed or the run was cancelled
    Closed(T),
}

impl<T> PushError<T> {
    /// Recover the rejected item.
    pub fn into_inner(self) -> T {
        match self {
            PushError::Full(item) | PushError::Closed(item) => item,
        }
    }
}

struct QueueState<T> {
    items: VecDeque<T>,
    adding_completed: bool,
    cancelled: bool,
}

/// FIFO queue with optional capacity and completion semantics.
pub struct FrameQueue<T> {
    state: Mutex<QueueState<T>>,
    /// Signalled when an item arrives or the queue closes
    not_empty: Condvar,
    /// Signalled when space frees or the queue closes
    not_full: Condvar,
    capacity: Option<usize>,
}

impl<T> FrameQueue<T> {
    /// Create a queue. `None` capacity means unbounded.
    pub fn new(capacity: Option<usize>) -> Self {
        let initial = capacity.unwrap_or(0).min(1024);
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(initial),
                adding_completed: false,
                cancelled: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    fn is_full(&self, state: &QueueState<T>) -> bool {
        self.capacity
            .is_some_and(|capacity| state.items.len() >= capacity)
    }

    /// Append `item`, waiting while the queue is full.
    ///
    /// Returns the item if adding completed or the run was cancelled before
    /// space became available.
    pub fn push_blocking(&self, item: T) -> Result<(), T> {
        let mut state = self.state.lock();
        loop {
            if state.adding_completed || state.cancelled {
                return Err(item);
            }
            if !self.is_full(&state) {
                break;
            }
            self.not_full.wait(&mut state);
        }
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Append `item` without waiting.
    pub fn try_push(&self, item: T) -> Result<(), PushError<T>> {
        let mut state = self.state.lock();
        if state.adding_completed || state.cancelled {
            return Err(PushError::Closed(item));
        }
        if self.is_full(&state) {
            return Err(PushError::Full(item));
        }
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Remove the oldest item, waiting until one arrives.
    ///
    /// Returns `None` once the queue is completed or cancelled.
    pub fn take(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if state.cancelled {
                return None;
            }
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Some(item);
            }
            if state.adding_completed {
                return None;
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Close the queue to new items. Queued items still drain.
    pub fn complete_adding(&self) {
        self.state.lock().adding_completed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Stop handing out items and wake every waiter.
    pub fn cancel(&self) {
        self.state.lock().cancelled = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Remove every queued item without processing it.
    pub fn drain(&self) -> Vec<T> {
        let items: Vec<T> = self.state.lock().items.drain(..).collect();
        self.not_full.notify_all();
        items
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn is_adding_completed(&self) -> bool {
        self.state.lock().adding_completed
    }

    /// Adding completed and nothing left to drain.
    pub fn is_completed(&self) -> bool {
        let state = self.state.lock();
        state.adding_completed && state.items.is_empty()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }
}
