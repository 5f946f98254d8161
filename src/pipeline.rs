//! Background frame-processing pipeline.
//!
//! [`BackgroundPipeline`] owns a bounded FIFO, one dedicated worker thread,
//! an ordered [`ModuleChain`], a [`PipelineTimer`] and optionally a
//! [`FramePool`]. Producers call [`enqueue`] from any thread; the worker
//! dequeues in order and runs each frame through the enabled modules.
//!
//! # Lifecycle
//!
//! ```text
//! Created --start()--> Running --stop()--> Stopped --drained--> Completed
//!                      Running --abort()--> Aborted
//!                      any     --dispose()--> Disposed
//! ```
//!
//! - `stop()` closes the queue and returns immediately; the worker drains
//!   what is queued and then fires `QueueComplete` exactly once.
//! - `abort()` cancels: the frame in flight finishes its current module
//!   chain, nothing further is dequeued, and leftover frames are released.
//! - A new `start()` after `stop()` waits for the previous run to drain
//!   before spawning a new worker, so two workers never overlap.
//! - A panic inside a module aborts the run. The frame being processed is
//!   lost; everything still queued is released.
//! - The lifecycle state alone decides whether frames are accepted. Stopping
//!   the timer through [`BackgroundPipeline::timer`] does not stop the run.
//!
//! # Backpressure
//!
//! Chosen per pipeline by [`PipelineConfig::backpressure`]:
//! [`Backpressure::Block`] suspends producers while the queue is full,
//! [`Backpressure::Drop`] discards the frame and logs a warning. Enqueueing
//! into a pipeline that is not running is a silent no-op in both modes.
//!
//! # Frame ownership
//!
//! A frame belongs to the pipeline from a successful `enqueue` until the
//! frame-complete callbacks have run. It is then released: returned to the
//! attached pool, or dropped when there is none. Frames the pipeline refuses
//! (dropped, enqueued after shutdown, left over after an abort) are released
//! the same way.
//!
//! [`enqueue`]: BackgroundPipeline::enqueue

use crate::config::{Backpressure, PipelineConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::events::{Observers, PipelineEvent, EVENT_CHANNEL_CAPACITY};
use crate::module::{ModuleChain, ProcessingModule};
use crate::queue::{FrameQueue, PushError};
use crate::timer::PipelineTimer;
use frame_pool::FramePool;
use parking_lot::{Condvar, Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

/// Pipeline lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Created,
    Running,
    /// Adding completed, worker still draining
    Stopped,
    /// Drain finished after `stop()`
    Completed,
    Aborted,
    Disposed,
}

/// What happened to a frame passed to [`BackgroundPipeline::enqueue`].
///
/// Purely informational; none of these is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Queue full under dropping backpressure
    Dropped,
    /// Pipeline not running, stopping, or aborted
    Rejected,
}

/// Point-in-time throughput snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub state: PipelineState,
    pub elapsed_ms: u64,
    pub fps: f64,
    pub backlog: usize,
    pub processed: u64,
    pub dropped: u64,
    pub pool_idle: Option<usize>,
}

struct StateCell {
    state: PipelineState,
    /// Run whose worker may still be alive
    run: u64,
    worker_active: bool,
}

/// Everything the worker thread needs.
struct Shared<T> {
    config: PipelineConfig,
    timer: PipelineTimer,
    pool: Option<Arc<FramePool<T>>>,
    modules: Mutex<ModuleChain<T>>,
    observers: Observers<T>,
    events: broadcast::Sender<PipelineEvent>,
    state: Mutex<StateCell>,
    state_changed: Condvar,
    processed: AtomicU64,
    dropped: AtomicU64,
}

impl<T: Send + 'static> Shared<T> {
    fn state(&self) -> PipelineState {
        self.state.lock().state
    }

    fn set_state(&self, state: PipelineState) {
        self.state.lock().state = state;
        self.state_changed.notify_all();
    }

    /// Move to `to` only from one of `from`. Returns whether it moved.
    fn transition(&self, from: &[PipelineState], to: PipelineState) -> bool {
        let mut cell = self.state.lock();
        if !from.contains(&cell.state) {
            return false;
        }
        cell.state = to;
        drop(cell);
        self.state_changed.notify_all();
        true
    }

    fn publish(&self, event: PipelineEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn release(&self, frame: T) {
        if let Some(pool) = &self.pool {
            pool.put(frame);
        }
    }

    /// Run one frame through the chain. Returns true if the pipeline must halt.
    fn process_frame(&self, frame: &mut T) -> bool {
        self.observers.frame_started(frame);

        let outcome = self
            .modules
            .lock()
            .run(frame, self.config.module_errors);

        self.timer.increment();
        self.processed.fetch_add(1, Ordering::AcqRel);

        for failure in outcome.failures {
            self.publish(PipelineEvent::ModuleFailed {
                module: failure.module,
                error: failure.error.to_string(),
            });
        }

        self.observers.frame_completed(frame);
        outcome.halted
    }

    /// Cancel a run from the worker after a halting module failure.
    fn halt(&self, queue: &FrameQueue<T>, run: u64) {
        let aborted = self.transition(
            &[PipelineState::Running, PipelineState::Stopped],
            PipelineState::Aborted,
        );
        if aborted {
            self.publish(PipelineEvent::Aborted { run });
        }
        queue.cancel();
        queue.complete_adding();
        self.timer.stop();
    }

    fn worker_loop(&self, queue: Arc<FrameQueue<T>>, run: u64) {
        let _exit = WorkerExit {
            shared: self,
            queue: &queue,
            run,
        };
        debug!(run, "Pipeline worker started");

        while let Some(mut frame) = queue.take() {
            let halt = self.process_frame(&mut frame);
            self.release(frame);
            if halt {
                warn!(run, "Halting pipeline after module failure");
                self.halt(&queue, run);
                break;
            }
        }

        if queue.is_cancelled() {
            let leftover = queue.drain();
            debug!(run, leftover = leftover.len(), "Queue processing cancelled");
            for frame in leftover {
                self.release(frame);
            }
        } else {
            let processed = self.processed.load(Ordering::Acquire);
            self.observers.queue_completed();
            self.publish(PipelineEvent::QueueComplete { run, processed });
            info!(run, processed, "Queue complete");

            let mut cell = self.state.lock();
            if cell.run == run && cell.state == PipelineState::Stopped {
                cell.state = PipelineState::Completed;
            }
        }
    }
}

/// Marks the worker gone when `worker_loop` returns or unwinds.
///
/// A panicking module aborts the run: producers blocked on the queue are
/// released and waiters see the worker exit.
struct WorkerExit<'a, T: Send + 'static> {
    shared: &'a Shared<T>,
    queue: &'a FrameQueue<T>,
    run: u64,
}

impl<T: Send + 'static> Drop for WorkerExit<'_, T> {
    fn drop(&mut self) {
        if thread::panicking() {
            error!(run = self.run, "Pipeline worker panicked, aborting run");
            self.shared.halt(self.queue, self.run);
            for frame in self.queue.drain() {
                self.shared.release(frame);
            }
        }

        let mut cell = self.shared.state.lock();
        if cell.run == self.run {
            cell.worker_active = false;
        }
        drop(cell);
        self.shared.state_changed.notify_all();
    }
}

struct Run {
    id: u64,
    worker: Option<JoinHandle<()>>,
}

fn join_worker(handle: JoinHandle<()>) {
    // Lifecycle calls made from a worker callback cannot wait for themselves
    if handle.thread().id() == thread::current().id() {
        return;
    }
    if handle.join().is_err() {
        warn!("Pipeline worker panicked");
    }
}

/// Generic background pipeline over frames of type `T`.
pub struct BackgroundPipeline<T: Send + 'static> {
    shared: Arc<Shared<T>>,
    /// Queue of the current run; read on every enqueue
    queue: RwLock<Option<Arc<FrameQueue<T>>>>,
    /// Serializes start against start
    starting: Mutex<()>,
    /// Worker of the latest run, joined by start and dispose
    control: Mutex<Option<Run>>,
    runs: AtomicU64,
}

impl<T: Send + 'static> std::fmt::Debug for BackgroundPipeline<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundPipeline")
            .field("state", &self.state())
            .field("backlog", &self.count())
            .field("modules", &self.module_names())
            .field("timer", &self.shared.timer)
            .finish()
    }
}

impl<T: Send + 'static> BackgroundPipeline<T> {
    /// Create a pipeline with no pool and no modules.
    pub fn new(config: PipelineConfig) -> PipelineResult<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: PipelineConfig) -> PipelineBuilder<T> {
        PipelineBuilder {
            config,
            pool: None,
            factory: None,
            modules: Vec::new(),
        }
    }

    /// Start processing. No-op while running.
    pub fn start(&self) -> PipelineResult<()> {
        let _starting = self.starting.lock();
        match self.shared.state() {
            PipelineState::Disposed => return Err(PipelineError::Disposed),
            PipelineState::Running => return Ok(()),
            _ => {}
        }

        // Joined without holding `control`: the draining worker's callbacks
        // may call stop, abort or dispose
        let previous = self.control.lock().take();
        if let Some(Run {
            id,
            worker: Some(worker),
        }) = previous
        {
            debug!(run = id, "Waiting for previous run to finish");
            join_worker(worker);
        }

        let mut control = self.control.lock();
        if self.shared.state() == PipelineState::Disposed {
            return Err(PipelineError::Disposed);
        }

        let run = self.runs.fetch_add(1, Ordering::AcqRel) + 1;
        let capacity = self
            .shared
            .config
            .effective_capacity(self.shared.pool.as_ref().map(|p| p.pool_size()));
        let queue = Arc::new(FrameQueue::new(capacity));

        self.shared.timer.start()?;
        // Installed before the state flips so stop() always closes this queue
        *self.queue.write() = Some(Arc::clone(&queue));
        {
            let mut cell = self.shared.state.lock();
            cell.state = PipelineState::Running;
            cell.run = run;
            cell.worker_active = true;
        }
        self.shared.state_changed.notify_all();

        let shared = Arc::clone(&self.shared);
        let worker_queue = Arc::clone(&queue);
        let spawned = thread::Builder::new()
            .name(self.shared.config.worker_name.clone())
            .spawn(move || shared.worker_loop(worker_queue, run));

        let worker = match spawned {
            Ok(worker) => worker,
            Err(source) => {
                queue.cancel();
                self.shared.timer.stop();
                {
                    let mut cell = self.shared.state.lock();
                    cell.state = PipelineState::Aborted;
                    cell.worker_active = false;
                }
                self.shared.state_changed.notify_all();
                return Err(PipelineError::Spawn {
                    name: self.shared.config.worker_name.clone(),
                    source,
                });
            }
        };

        *control = Some(Run {
            id: run,
            worker: Some(worker),
        });
        self.shared.publish(PipelineEvent::Started { run });
        info!(
            run,
            capacity = ?capacity,
            backpressure = ?self.shared.config.backpressure,
            modules = self.shared.modules.lock().len(),
            "Pipeline started"
        );
        Ok(())
    }

    /// Close the queue and let the worker drain. Does not wait.
    pub fn stop(&self) {
        if !self
            .shared
            .transition(&[PipelineState::Running], PipelineState::Stopped)
        {
            return;
        }
        self.close_run(self.runs.load(Ordering::Acquire), false);
    }

    /// Cancel processing without draining, then stop.
    pub fn abort(&self) {
        if !self.shared.transition(
            &[PipelineState::Running, PipelineState::Stopped],
            PipelineState::Aborted,
        ) {
            return;
        }
        self.close_run(self.runs.load(Ordering::Acquire), true);
    }

    fn close_run(&self, run: u64, cancel: bool) {
        let queue = self.queue.read().clone();
        let queued = queue.as_ref().map_or(0, |q| q.len());

        // Published before the queue closes so it precedes QueueComplete
        if cancel {
            self.shared.publish(PipelineEvent::Aborted { run });
            info!(run, discarded = queued, "Pipeline aborted");
        } else {
            self.shared.publish(PipelineEvent::Stopped { run, queued });
            info!(run, queued, "Pipeline stopped, draining");
        }

        if let Some(queue) = &queue {
            if cancel {
                queue.cancel();
            }
        }
        self.shared.timer.stop();
        if let Some(queue) = &queue {
            queue.complete_adding();
        }
    }

    /// Hand a frame to the pipeline.
    ///
    /// Never fails. Frames that are not queued are released immediately.
    pub fn enqueue(&self, frame: T) -> EnqueueOutcome {
        let queue = self.queue.read().clone();
        let queue = match queue {
            Some(queue)
                if self.shared.state() == PipelineState::Running
                    && !queue.is_adding_completed()
                    && !queue.is_cancelled() =>
            {
                queue
            }
            _ => {
                trace!("Enqueue ignored, pipeline not accepting frames");
                self.shared.release(frame);
                return EnqueueOutcome::Rejected;
            }
        };

        match self.shared.config.backpressure {
            Backpressure::Block => match queue.push_blocking(frame) {
                Ok(()) => EnqueueOutcome::Queued,
                Err(frame) => {
                    self.shared.release(frame);
                    EnqueueOutcome::Rejected
                }
            },
            Backpressure::Drop => match queue.try_push(frame) {
                Ok(()) => EnqueueOutcome::Queued,
                Err(PushError::Full(frame)) => {
                    let total = self.shared.dropped.fetch_add(1, Ordering::AcqRel) + 1;
                    warn!(
                        total_dropped = total,
                        capacity = ?queue.capacity(),
                        "Queue full, frame dropped"
                    );
                    self.shared.publish(PipelineEvent::FrameDropped { total });
                    self.shared.release(frame);
                    EnqueueOutcome::Dropped
                }
                Err(PushError::Closed(frame)) => {
                    self.shared.release(frame);
                    EnqueueOutcome::Rejected
                }
            },
        }
    }

    /// Release the queue, modules and timer. Aborts a live run first.
    ///
    /// Module dispose failures are logged and do not stop the teardown.
    /// Calling this more than once is a no-op.
    pub fn dispose(&self) {
        let mut control = self.control.lock();
        if self.shared.state() == PipelineState::Disposed {
            return;
        }

        if self.shared.transition(
            &[PipelineState::Running, PipelineState::Stopped],
            PipelineState::Aborted,
        ) {
            self.close_run(self.runs.load(Ordering::Acquire), true);
        }
        if let Some(run) = control.take() {
            if let Some(worker) = run.worker {
                join_worker(worker);
            }
        }

        if let Some(queue) = self.queue.write().take() {
            for frame in queue.drain() {
                self.shared.release(frame);
            }
        }

        let failures = self.shared.modules.lock().dispose_all();
        self.shared.timer.stop();
        self.shared.set_state(PipelineState::Disposed);
        self.shared.publish(PipelineEvent::Disposed);
        info!(module_failures = failures, "Pipeline disposed");
    }

    /// Block until the worker has exited (drained or aborted), up to `timeout`.
    ///
    /// Returns true immediately if no run is active.
    pub fn wait_for_completion(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut cell = self.shared.state.lock();
        while cell.worker_active {
            if self
                .shared
                .state_changed
                .wait_until(&mut cell, deadline)
                .timed_out()
            {
                return !cell.worker_active;
            }
        }
        true
    }

    /// Append a module. Refused while running.
    pub fn add_module<M>(&self, module: M) -> PipelineResult<()>
    where
        M: ProcessingModule<T> + 'static,
    {
        match self.shared.state() {
            PipelineState::Running => Err(PipelineError::ModulesLocked),
            PipelineState::Disposed => Err(PipelineError::Disposed),
            _ => {
                self.shared.modules.lock().push(Box::new(module));
                Ok(())
            }
        }
    }

    /// Enable or disable modules by name. Returns whether any matched.
    pub fn set_module_enabled(&self, name: &str, enabled: bool) -> bool {
        self.shared.modules.lock().set_enabled(name, enabled)
    }

    pub fn module_names(&self) -> Vec<String> {
        self.shared.modules.lock().names()
    }

    /// Called on the worker before any module runs.
    pub fn on_frame_start<F>(&self, callback: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.shared.observers.on_frame_start(Arc::new(callback));
    }

    /// Called on the worker after all modules ran, before the frame is released.
    pub fn on_frame_complete<F>(&self, callback: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.shared.observers.on_frame_complete(Arc::new(callback));
    }

    /// Called once per run when the queue has fully drained after `stop()`.
    pub fn on_queue_complete<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.observers.on_queue_complete(Arc::new(callback));
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.shared.events.subscribe()
    }

    /// Frames currently queued. Advisory.
    pub fn count(&self) -> usize {
        self.queue.read().as_ref().map_or(0, |queue| queue.len())
    }

    /// True before the first start, and once a run has drained.
    pub fn is_completed(&self) -> bool {
        self.queue
            .read()
            .as_ref()
            .map_or(true, |queue| queue.is_completed())
    }

    /// True before the first start, and once adding has been closed.
    pub fn is_adding_completed(&self) -> bool {
        self.queue
            .read()
            .as_ref()
            .map_or(true, |queue| queue.is_adding_completed())
    }

    pub fn state(&self) -> PipelineState {
        self.shared.state()
    }

    pub fn timer(&self) -> &PipelineTimer {
        &self.shared.timer
    }

    pub fn pool(&self) -> Option<&Arc<FramePool<T>>> {
        self.shared.pool.as_ref()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.shared.config
    }

    /// Frames processed across all runs.
    pub fn processed_frames(&self) -> u64 {
        self.shared.processed.load(Ordering::Acquire)
    }

    /// Frames discarded by dropping backpressure across all runs.
    pub fn dropped_frames(&self) -> u64 {
        self.shared.dropped.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            state: self.state(),
            elapsed_ms: self.shared.timer.elapsed().as_millis() as u64,
            fps: self.shared.timer.fps(),
            backlog: self.count(),
            processed: self.processed_frames(),
            dropped: self.dropped_frames(),
            pool_idle: self.shared.pool.as_ref().map(|pool| pool.count()),
        }
    }
}

impl<T: Send + 'static> Drop for BackgroundPipeline<T> {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Builder for [`BackgroundPipeline`].
pub struct PipelineBuilder<T> {
    config: PipelineConfig,
    pool: Option<Arc<FramePool<T>>>,
    factory: Option<Box<dyn Fn() -> T + Send + Sync>>,
    modules: Vec<Box<dyn ProcessingModule<T>>>,
}

impl<T: Send + 'static> PipelineBuilder<T> {
    /// Recycle completed frames into an existing pool.
    pub fn with_pool(mut self, pool: Arc<FramePool<T>>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Build a pool of `config.pool_size` frames from `factory`.
    pub fn with_frame_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.factory = Some(Box::new(factory));
        self
    }

    pub fn module<M>(mut self, module: M) -> Self
    where
        M: ProcessingModule<T> + 'static,
    {
        self.modules.push(Box::new(module));
        self
    }

    pub fn build(self) -> PipelineResult<BackgroundPipeline<T>> {
        self.config.validate()?;

        let pool = match (self.pool, self.factory) {
            (Some(pool), _) => Some(pool),
            (None, Some(factory)) => Some(
                FramePool::builder()
                    .size(self.config.pool_size)
                    .factory(factory)
                    .build()?,
            ),
            (None, None) => None,
        };

        let mut chain = ModuleChain::new();
        for module in self.modules {
            chain.push(module);
        }

        let timer = PipelineTimer::new(self.config.frequency_hz)?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(BackgroundPipeline {
            shared: Arc::new(Shared {
                config: self.config,
                timer,
                pool,
                modules: Mutex::new(chain),
                observers: Observers::default(),
                events,
                state: Mutex::new(StateCell {
                    state: PipelineState::Created,
                    run: 0,
                    worker_active: false,
                }),
                state_changed: Condvar::new(),
                processed: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
            queue: RwLock::new(None),
            starting: Mutex::new(()),
            control: Mutex::new(None),
            runs: AtomicU64::new(0),
        })
    }
}
