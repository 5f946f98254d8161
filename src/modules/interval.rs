//! Inter-frame interval tracking.

use crate::module::ProcessingModule;
use anyhow::Result;
use std::time::{Duration, Instant};

/// Running mean of the gaps between successive events.
#[derive(Debug, Clone, Default)]
pub struct MeanInterval {
    last: Option<Instant>,
    total: Duration,
    samples: u32,
}

impl MeanInterval {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event at `now`. The first event only sets the reference point.
    pub fn record(&mut self, now: Instant) {
        if let Some(last) = self.last {
            self.total += now.saturating_duration_since(last);
            self.samples += 1;
        }
        self.last = Some(now);
    }

    /// Mean gap, or `None` before two events were seen.
    pub fn mean(&self) -> Option<Duration> {
        (self.samples > 0).then(|| self.total / self.samples)
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Module that measures how evenly frames reach the worker. Leaves frames untouched.
#[derive(Debug)]
pub struct IntervalProbe {
    enabled: bool,
    frames: u64,
    interval: MeanInterval,
}

impl Default for IntervalProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl IntervalProbe {
    pub fn new() -> Self {
        Self {
            enabled: true,
            frames: 0,
            interval: MeanInterval::new(),
        }
    }

    pub fn mean_interval(&self) -> Option<Duration> {
        self.interval.mean()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Forget accumulated samples, e.g. between report windows.
    pub fn reset(&mut self) {
        self.frames = 0;
        self.interval.reset();
    }
}

impl<T> ProcessingModule<T> for IntervalProbe {
    fn name(&self) -> &str {
        "interval_probe"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            // A gap spanning the disabled period is not a frame interval
            self.interval.last = None;
        }
    }

    fn process(&mut self, _frame: &mut T) -> Result<()> {
        self.frames += 1;
        self.interval.record(Instant::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_interval_controlled_clock() {
        let base = Instant::now();
        let mut interval = MeanInterval::new();
        assert_eq!(interval.mean(), None);

        interval.record(base);
        assert_eq!(interval.mean(), None);

        interval.record(base + Duration::from_millis(30));
        interval.record(base + Duration::from_millis(70));
        assert_eq!(interval.samples(), 2);
        assert_eq!(interval.mean(), Some(Duration::from_millis(35)));

        interval.reset();
        assert_eq!(interval.samples(), 0);
        assert_eq!(interval.mean(), None);
    }

    #[test]
    fn test_probe_counts_frames() {
        let mut probe = IntervalProbe::new();
        let mut frame = 0u8;
        for _ in 0..3 {
            ProcessingModule::<u8>::process(&mut probe, &mut frame).unwrap();
        }
        assert_eq!(probe.frames(), 3);
        assert!(probe.mean_interval().is_some());

        probe.reset();
        assert_eq!(probe.frames(), 0);
        assert_eq!(probe.mean_interval(), None);
    }
}
