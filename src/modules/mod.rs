//! Ready-made processing modules used by the demo binary and tests.

pub mod interval;
pub mod workload;

pub use interval::{IntervalProbe, MeanInterval};
pub use workload::WorkloadModule;
