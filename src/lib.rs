//! Background frame-processing pipeline.
//!
//! Producers (camera callbacks, sensor readers, file replayers) hand frames
//! to a [`BackgroundPipeline`], which runs them through an ordered chain of
//! [`ProcessingModule`]s on one dedicated worker thread. Supporting pieces:
//!
//! - [`frame_pool`]: non-blocking pool that recycles completed frames
//! - [`timer`]: nominal-rate tick source and processed-frames-per-second meter
//! - [`queue`]: bounded FIFO with completion and cancellation
//! - [`config`]: figment-layered settings, including the backpressure policy
//!
//! # Example
//!
//! ```no_run
//! use frame_pipeline::{BackgroundPipeline, PipelineConfig};
//! use frame_pipeline::modules::IntervalProbe;
//! use std::time::Duration;
//!
//! let pipeline = BackgroundPipeline::builder(PipelineConfig::lossless(30))
//!     .with_frame_factory(|| vec![0u8; 640 * 480])
//!     .module(IntervalProbe::new())
//!     .build()?;
//!
//! pipeline.start()?;
//! let pool = pipeline.pool().expect("pool configured").clone();
//! pipeline.enqueue(pool.get());
//! pipeline.stop();
//! pipeline.wait_for_completion(Duration::from_secs(1));
//! # Ok::<(), frame_pipeline::PipelineError>(())
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod module;
pub mod modules;
pub mod pipeline;
pub mod queue;
pub mod timer;

pub use frame_pool;

pub use config::{Backpressure, ModuleErrorPolicy, PipelineConfig};
pub use error::{PipelineError, PipelineResult};
pub use events::PipelineEvent;
pub use module::{ModuleChain, ProcessingModule, SharedModule};
pub use pipeline::{
    BackgroundPipeline, EnqueueOutcome, PipelineBuilder, PipelineState, PipelineStats,
};
pub use timer::{FpsMeter, PipelineTimer};
