//! Periodic pipeline clock and throughput meter.
//!
//! [`PipelineTimer`] does two independent jobs:
//!
//! - fires a payload-free tick every `1000 / frequency_hz` ms on its own
//!   thread, which collaborators use as a production cadence or to refresh
//!   displays;
//! - measures processed frames per second. Each [`increment`] counts one
//!   frame; once the measurement window is at least one second old the rate
//!   is recomputed as `round(count / window_secs)` and the window restarts.
//!   The rate therefore refreshes about once per second instead of jittering
//!   per frame.
//!
//! There is no pause: `stop()` freezes the elapsed time until the next
//! `start()` resets it.
//!
//! [`increment`]: PipelineTimer::increment

use crate::error::{PipelineError, PipelineResult};
use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, trace};

/// Length of one fps measurement window.
pub const FPS_WINDOW: Duration = Duration::from_secs(1);

type TickFn = Arc<dyn Fn() + Send + Sync>;

/// Rate calculator over a rolling window of at least [`FPS_WINDOW`].
///
/// Takes explicit instants so it can run on a controlled clock.
#[derive(Debug, Clone)]
pub struct FpsMeter {
    count: u64,
    window_start: Option<Instant>,
    fps: f64,
}

impl Default for FpsMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl FpsMeter {
    pub fn new() -> Self {
        Self {
            count: 0,
            window_start: None,
            fps: 0.0,
        }
    }

    /// Begin a fresh window at `now` and clear the last rate.
    pub fn restart(&mut self, now: Instant) {
        self.count = 0;
        self.window_start = Some(now);
        self.fps = 0.0;
    }

    /// Count one event at `now`. Returns the new rate when the window closes.
    pub fn record(&mut self, now: Instant) -> Option<f64> {
        self.count += 1;
        let start = *self.window_start.get_or_insert(now);
        let elapsed = now.saturating_duration_since(start);
        if elapsed < FPS_WINDOW {
            return None;
        }

        self.fps = (self.count as f64 / elapsed.as_secs_f64()).round();
        self.count = 0;
        self.window_start = Some(now);
        Some(self.fps)
    }

    /// Last computed rate.
    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Events counted in the current window.
    pub fn pending(&self) -> u64 {
        self.count
    }
}

#[derive(Default)]
struct ClockState {
    started_at: Option<Instant>,
    start_time: Option<DateTime<Utc>>,
    /// Elapsed time captured by the last `stop()`
    frozen_elapsed: Duration,
    meter: FpsMeter,
}

/// Stop flag for one ticker thread. Each `start()` gets a fresh one.
struct TickSignal {
    stopped: Mutex<bool>,
    cv: Condvar,
}

struct TimerShared {
    frequency_hz: u32,
    period: Duration,
    running: AtomicBool,
    clock: Mutex<ClockState>,
    fps_tx: watch::Sender<f64>,
    tick_observers: RwLock<Vec<TickFn>>,
    ticks: AtomicU64,
}

struct Ticker {
    handle: JoinHandle<()>,
    signal: Arc<TickSignal>,
}

/// Fixed-frequency tick source and fps meter for a pipeline.
pub struct PipelineTimer {
    shared: Arc<TimerShared>,
    ticker: Mutex<Option<Ticker>>,
}

impl std::fmt::Debug for PipelineTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineTimer")
            .field("frequency_hz", &self.shared.frequency_hz)
            .field("period", &self.shared.period)
            .field("running", &self.is_running())
            .field("fps", &self.fps())
            .finish()
    }
}

impl PipelineTimer {
    /// Create a stopped timer ticking at `frequency_hz`.
    pub fn new(frequency_hz: u32) -> PipelineResult<Self> {
        if frequency_hz == 0 {
            return Err(PipelineError::InvalidArgument(
                "timer frequency must be at least 1 Hz".to_string(),
            ));
        }
        let period_ms = 1000 / u64::from(frequency_hz);
        if period_ms == 0 {
            return Err(PipelineError::InvalidArgument(format!(
                "timer frequency {frequency_hz} Hz gives a zero-length period"
            )));
        }

        let (fps_tx, _) = watch::channel(0.0);
        Ok(Self {
            shared: Arc::new(TimerShared {
                frequency_hz,
                period: Duration::from_millis(period_ms),
                running: AtomicBool::new(false),
                clock: Mutex::new(ClockState::default()),
                fps_tx,
                tick_observers: RwLock::new(Vec::new()),
                ticks: AtomicU64::new(0),
            }),
            ticker: Mutex::new(None),
        })
    }

    /// Start ticking and measuring. No-op if already running.
    pub fn start(&self) -> PipelineResult<()> {
        let mut ticker = self.ticker.lock();
        if self.shared.running.load(Ordering::Acquire) {
            return Ok(());
        }

        {
            let mut clock = self.shared.clock.lock();
            let now = Instant::now();
            clock.started_at = Some(now);
            clock.start_time = Some(Utc::now());
            clock.frozen_elapsed = Duration::ZERO;
            clock.meter.restart(now);
        }
        self.shared.fps_tx.send_replace(0.0);
        self.shared.ticks.store(0, Ordering::Release);

        let signal = Arc::new(TickSignal {
            stopped: Mutex::new(false),
            cv: Condvar::new(),
        });
        let shared = Arc::clone(&self.shared);
        let thread_signal = Arc::clone(&signal);
        let handle = thread::Builder::new()
            .name("pipeline-timer".to_string())
            .spawn(move || tick_loop(shared, thread_signal))
            .map_err(|source| PipelineError::Spawn {
                name: "pipeline-timer".to_string(),
                source,
            })?;

        *ticker = Some(Ticker { handle, signal });
        self.shared.running.store(true, Ordering::Release);
        debug!(
            frequency_hz = self.shared.frequency_hz,
            period_ms = self.shared.period.as_millis() as u64,
            "Pipeline timer started"
        );
        Ok(())
    }

    /// Stop ticking and freeze the elapsed time. No-op if not running.
    pub fn stop(&self) {
        let ticker = {
            let mut ticker = self.ticker.lock();
            if !self.shared.running.swap(false, Ordering::AcqRel) {
                return;
            }
            let mut clock = self.shared.clock.lock();
            if let Some(started_at) = clock.started_at {
                clock.frozen_elapsed = started_at.elapsed();
            }
            ticker.take()
        };

        if let Some(Ticker { handle, signal }) = ticker {
            *signal.stopped.lock() = true;
            signal.cv.notify_all();
            // A tick observer may stop the timer from the tick thread itself
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        debug!(
            ticks = self.tick_count(),
            fps = self.fps(),
            "Pipeline timer stopped"
        );
    }

    /// Count one processed frame. No-op while stopped.
    pub fn increment(&self) {
        if !self.shared.running.load(Ordering::Acquire) {
            return;
        }
        let updated = self.shared.clock.lock().meter.record(Instant::now());
        if let Some(fps) = updated {
            self.shared.fps_tx.send_replace(fps);
            trace!(fps, "Pipeline fps updated");
        }
    }

    /// Register a callback invoked on the tick thread every period.
    pub fn on_tick<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.tick_observers.write().push(Arc::new(callback));
    }

    /// Subscribe to fps updates.
    pub fn watch_fps(&self) -> watch::Receiver<f64> {
        self.shared.fps_tx.subscribe()
    }

    /// Last computed frames-per-second.
    pub fn fps(&self) -> f64 {
        *self.shared.fps_tx.borrow()
    }

    /// Time since `start()`, frozen once stopped.
    pub fn elapsed(&self) -> Duration {
        let clock = self.shared.clock.lock();
        match clock.started_at {
            Some(started_at) if self.is_running() => started_at.elapsed(),
            _ => clock.frozen_elapsed,
        }
    }

    /// Wall-clock time of the last `start()`.
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.shared.clock.lock().start_time
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Ticks fired since the last `start()`.
    pub fn tick_count(&self) -> u64 {
        self.shared.ticks.load(Ordering::Acquire)
    }

    pub fn period(&self) -> Duration {
        self.shared.period
    }

    pub fn frequency_hz(&self) -> u32 {
        self.shared.frequency_hz
    }
}

impl Drop for PipelineTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn tick_loop(shared: Arc<TimerShared>, signal: Arc<TickSignal>) {
    let mut next = Instant::now();
    loop {
        if *signal.stopped.lock() {
            break;
        }

        let observers: Vec<TickFn> = shared.tick_observers.read().clone();
        for observer in &observers {
            observer();
        }
        shared.ticks.fetch_add(1, Ordering::AcqRel);

        // Slow observers skip missed ticks instead of bursting to catch up
        next += shared.period;
        let now = Instant::now();
        if next < now {
            next = now;
        }

        let mut stopped = signal.stopped.lock();
        while !*stopped {
            if signal.cv.wait_until(&mut stopped, next).timed_out() {
                break;
            }
        }
        if *stopped {
            break;
        }
    }
}
