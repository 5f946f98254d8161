//! Pipeline notifications.
//!
//! Two mechanisms are offered:
//!
//! - **Callbacks** ([`Observers`]): frame-start, frame-complete and
//!   queue-complete handlers run synchronously on the worker thread. They see
//!   the frame by reference, in order, never interleaved with another frame.
//!   Frame-complete runs before the frame is handed back to the pool.
//! - **Lifecycle stream** ([`PipelineEvent`]): a `tokio::sync::broadcast`
//!   channel for status consumers (UIs, loggers). Slow receivers lag and
//!   miss events rather than slowing the worker.

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;

/// Capacity of the lifecycle broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle and status events published by a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    Started { run: u64 },
    /// Adding completed; the worker keeps draining
    Stopped { run: u64, queued: usize },
    Aborted { run: u64 },
    /// A frame was discarded by dropping backpressure
    FrameDropped { total: u64 },
    ModuleFailed { module: String, error: String },
    /// Fired once per run after the last queued frame completed
    QueueComplete { run: u64, processed: u64 },
    Disposed,
}

type FrameFn<T> = Arc<dyn Fn(&T) + Send + Sync>;
type SignalFn = Arc<dyn Fn() + Send + Sync>;

/// Registered frame and queue callbacks.
pub struct Observers<T> {
    frame_start: RwLock<Vec<FrameFn<T>>>,
    frame_complete: RwLock<Vec<FrameFn<T>>>,
    queue_complete: RwLock<Vec<SignalFn>>,
}

impl<T> Default for Observers<T> {
    fn default() -> Self {
        Self {
            frame_start: RwLock::new(Vec::new()),
            frame_complete: RwLock::new(Vec::new()),
            queue_complete: RwLock::new(Vec::new()),
        }
    }
}

impl<T> Observers<T> {
    pub fn on_frame_start(&self, callback: FrameFn<T>) {
        self.frame_start.write().push(callback);
    }

    pub fn on_frame_complete(&self, callback: FrameFn<T>) {
        self.frame_complete.write().push(callback);
    }

    pub fn on_queue_complete(&self, callback: SignalFn) {
        self.queue_complete.write().push(callback);
    }

    // Handlers are cloned out so a callback may register another one
    // without deadlocking on the list lock.

    pub fn frame_started(&self, frame: &T) {
        let handlers = self.frame_start.read().clone();
        for handler in &handlers {
            handler(frame);
        }
    }

    pub fn frame_completed(&self, frame: &T) {
        let handlers = self.frame_complete.read().clone();
        for handler in &handlers {
            handler(frame);
        }
    }

    pub fn queue_completed(&self) {
        let handlers = self.queue_complete.read().clone();
        for handler in &handlers {
            handler();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_callbacks_run_in_registration_order() {
        let observers: Observers<u32> = Observers::default();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let seen = Arc::clone(&seen);
            observers.on_frame_complete(Arc::new(move |frame: &u32| {
                seen.lock().push(format!("{tag}:{frame}"));
            }));
        }

        observers.frame_completed(&7);
        assert_eq!(*seen.lock(), vec!["first:7", "second:7"]);
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_value(PipelineEvent::QueueComplete {
            run: 1,
            processed: 10,
        })
        .unwrap();
        assert_eq!(json["event"], "queue_complete");
        assert_eq!(json["processed"], 10);
    }
}
