//! Shared helpers for pipeline integration tests
//!
//! - Timing assertions with environment-aware tolerances
//! - Test modules: recorder, gate, failing, panicking
//! - Polling helpers

#![allow(dead_code)] // Not every test file uses every helper

use anyhow::{bail, Result};
use frame_pipeline::ProcessingModule;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// Tolerance levels for real-time timing assertions.
#[derive(Debug, Clone, Copy)]
pub enum TimingTolerance {
    /// 20% tolerance - default for local development
    Normal,
    /// 50% tolerance - for CI environments with variable load
    Relaxed,
}

impl TimingTolerance {
    pub fn factor(&self) -> f64 {
        match self {
            TimingTolerance::Normal => 0.20,
            TimingTolerance::Relaxed => 0.50,
        }
    }
}

/// `Relaxed` on CI, `Normal` otherwise.
pub fn env_timing_tolerance() -> TimingTolerance {
    if std::env::var("CI").is_ok() {
        TimingTolerance::Relaxed
    } else {
        TimingTolerance::Normal
    }
}

/// Assert that `actual` is within tolerance of `expected`.
///
/// # Panics
/// Panics if the value is outside the tolerance range.
pub fn assert_near(actual: f64, expected: f64, tolerance: TimingTolerance, context: &str) {
    let factor = tolerance.factor();
    let min = expected * (1.0 - factor);
    let max = expected * (1.0 + factor);
    assert!(
        actual >= min && actual <= max,
        "{}: expected {:.2} ±{:.0}%, got {:.2} (acceptable range: {:.2} to {:.2})",
        context,
        expected,
        factor * 100.0,
        actual,
        min,
        max
    );
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Records every frame it sees, in order.
#[derive(Clone)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<u64>>>,
    disposed: Arc<AtomicBool>,
    enabled: bool,
}

impl Recorder {
    pub fn new() -> Self {
        Self {
            seen: Arc::default(),
            disposed: Arc::default(),
            enabled: true,
        }
    }

    pub fn seen(&self) -> Vec<u64> {
        self.seen.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl ProcessingModule<u64> for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }
    fn is_enabled(&self) -> bool {
        self.enabled
    }
    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
    fn process(&mut self, frame: &mut u64) -> Result<()> {
        self.seen.lock().push(*frame);
        Ok(())
    }
    fn dispose(&mut self) -> Result<()> {
        self.disposed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct GateState {
    open: bool,
    entered: usize,
}

/// Parks the worker inside `process` until opened.
#[derive(Clone, Default)]
pub struct Gate {
    state: Arc<Mutex<GateState>>,
    changed: Arc<Condvar>,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        self.state.lock().open = true;
        self.changed.notify_all();
    }

    /// Wait until the worker has entered the gate `count` times.
    pub fn wait_entered(&self, count: usize) -> bool {
        let deadline = Instant::now() + WAIT;
        let mut state = self.state.lock();
        while state.entered < count {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return state.entered >= count;
            }
        }
        true
    }
}

impl ProcessingModule<u64> for Gate {
    fn name(&self) -> &str {
        "gate"
    }
    fn is_enabled(&self) -> bool {
        true
    }
    fn set_enabled(&mut self, _enabled: bool) {}
    fn process(&mut self, _frame: &mut u64) -> Result<()> {
        let mut state = self.state.lock();
        state.entered += 1;
        self.changed.notify_all();
        let deadline = Instant::now() + WAIT;
        while !state.open {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                bail!("gate never opened");
            }
        }
        Ok(())
    }
}

/// Fails on one frame value and always fails to dispose.
pub struct Faulty {
    pub fail_on: u64,
}

impl ProcessingModule<u64> for Faulty {
    fn name(&self) -> &str {
        "faulty"
    }
    fn is_enabled(&self) -> bool {
        true
    }
    fn set_enabled(&mut self, _enabled: bool) {}
    fn process(&mut self, frame: &mut u64) -> Result<()> {
        if *frame == self.fail_on {
            bail!("cannot process frame {}", frame);
        }
        Ok(())
    }
    fn dispose(&mut self) -> Result<()> {
        bail!("device handle already released")
    }
}

/// Sleeps for a fixed time per frame.
pub struct Busy(pub Duration);

impl ProcessingModule<u64> for Busy {
    fn is_enabled(&self) -> bool {
        true
    }
    fn set_enabled(&mut self, _enabled: bool) {}
    fn process(&mut self, _frame: &mut u64) -> Result<()> {
        std::thread::sleep(self.0);
        Ok(())
    }
}

/// Panics on one frame value.
pub struct Panicky {
    pub panic_on: u64,
}

impl ProcessingModule<u64> for Panicky {
    fn name(&self) -> &str {
        "panicky"
    }
    fn is_enabled(&self) -> bool {
        true
    }
    fn set_enabled(&mut self, _enabled: bool) {}
    fn process(&mut self, frame: &mut u64) -> Result<()> {
        if *frame == self.panic_on {
            panic!("driver crashed on frame {}", frame);
        }
        Ok(())
    }
}
