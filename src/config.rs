//! Pipeline configuration using Figment.
//!
//! Settings are layered (lowest to highest precedence):
//! 1. Built-in defaults
//! 2. A TOML file
//! 3. Environment variables prefixed with `PIPELINE_`
//!
//! ```text
//! PIPELINE_FREQUENCY_HZ=30
//! PIPELINE_BACKPRESSURE=drop
//! PIPELINE_QUEUE_CAPACITY=16
//! ```
//!
//! The enqueue policy is never implicit: `backpressure` selects between the
//! lossless mode (producers block while the queue is full) and the real-time
//! mode (frames are dropped and logged when the queue is full).
//!
//! # Example
//!
//! ```no_run
//! use frame_pipeline::config::PipelineConfig;
//!
//! let config = PipelineConfig::load_from("pipeline.toml")?;
//! println!("{} Hz, {:?}", config.frequency_hz, config.backpressure);
//! # Ok::<(), frame_pipeline::error::PipelineError>(())
//! ```

use crate::error::{PipelineError, PipelineResult};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Queue capacity used when neither an explicit capacity nor a pool is set.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Highest supported timer frequency. Above this the period rounds to 0 ms.
pub const MAX_FREQUENCY_HZ: u32 = 1000;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "PIPELINE_";

/// What `enqueue` does when the queue is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backpressure {
    /// Lossless: the producer waits for space. Every accepted frame is processed.
    Block,
    /// Real-time: the frame is discarded and the drop is logged and counted.
    Drop,
}

/// What the worker does when a module's `process` returns an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleErrorPolicy {
    /// Log the failure and continue with the next module. The frame still completes.
    Skip,
    /// Log the failure, complete the current frame, then abort the pipeline.
    Halt,
}

/// Settings for one [`BackgroundPipeline`](crate::pipeline::BackgroundPipeline).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Timer tick frequency in Hz (also the producer cadence in the demo)
    #[serde(default = "default_frequency_hz")]
    pub frequency_hz: u32,
    /// Number of frames pre-allocated when the pipeline builds its own pool
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Explicit queue capacity. Falls back to the pool size, then
    /// [`DEFAULT_QUEUE_CAPACITY`].
    #[serde(default)]
    pub queue_capacity: Option<usize>,
    /// When false the queue is unbounded and `backpressure` never triggers
    #[serde(default = "default_restrict_size")]
    pub restrict_size: bool,
    #[serde(default = "default_backpressure")]
    pub backpressure: Backpressure,
    #[serde(default = "default_module_errors")]
    pub module_errors: ModuleErrorPolicy,
    /// Name given to the worker thread
    #[serde(default = "default_worker_name")]
    pub worker_name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_frequency_hz() -> u32 {
    30
}

fn default_pool_size() -> usize {
    // two seconds of frames at the default rate
    60
}

fn default_restrict_size() -> bool {
    true
}

fn default_backpressure() -> Backpressure {
    Backpressure::Block
}

fn default_module_errors() -> ModuleErrorPolicy {
    ModuleErrorPolicy::Skip
}

fn default_worker_name() -> String {
    "pipeline-worker".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frequency_hz: default_frequency_hz(),
            pool_size: default_pool_size(),
            queue_capacity: None,
            restrict_size: default_restrict_size(),
            backpressure: default_backpressure(),
            module_errors: default_module_errors(),
            worker_name: default_worker_name(),
            log_level: default_log_level(),
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by `PIPELINE_*` environment variables.
    pub fn from_env() -> PipelineResult<Self> {
        Self::extract(Figment::from(Serialized::defaults(Self::default())))
    }

    /// Defaults, then the TOML file at `path`, then the environment.
    ///
    /// A missing file is not an error; its layer is simply empty.
    pub fn load_from<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        Self::extract(
            Figment::from(Serialized::defaults(Self::default())).merge(Toml::file(path.as_ref())),
        )
    }

    fn extract(figment: Figment) -> PipelineResult<Self> {
        let config: Self = figment.merge(Env::prefixed(ENV_PREFIX)).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Lossless preset: blocking enqueue.
    pub fn lossless(frequency_hz: u32) -> Self {
        Self {
            frequency_hz,
            backpressure: Backpressure::Block,
            ..Self::default()
        }
    }

    /// Real-time preset: dropping enqueue.
    pub fn realtime(frequency_hz: u32) -> Self {
        Self {
            frequency_hz,
            backpressure: Backpressure::Drop,
            ..Self::default()
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Check the settings for values that parse but cannot work.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.frequency_hz == 0 || self.frequency_hz > MAX_FREQUENCY_HZ {
            return Err(PipelineError::Validation(format!(
                "Invalid frequency_hz {}. Must be 1-{}",
                self.frequency_hz, MAX_FREQUENCY_HZ
            )));
        }

        if self.pool_size == 0 {
            return Err(PipelineError::Validation(
                "Invalid pool_size 0. Must be at least 1".to_string(),
            ));
        }

        if self.queue_capacity == Some(0) {
            return Err(PipelineError::Validation(
                "Invalid queue_capacity 0. Must be at least 1".to_string(),
            ));
        }

        if self.worker_name.trim().is_empty() {
            return Err(PipelineError::Validation(
                "worker_name cannot be empty".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(PipelineError::Validation(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        Ok(())
    }

    /// Queue capacity for a run, given the size of an attached pool.
    ///
    /// `None` means unbounded.
    pub fn effective_capacity(&self, pool_size: Option<usize>) -> Option<usize> {
        if !self.restrict_size {
            return None;
        }
        Some(
            self.queue_capacity
                .or(pool_size)
                .unwrap_or(DEFAULT_QUEUE_CAPACITY),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.backpressure, Backpressure::Block);
        assert_eq!(config.module_errors, ModuleErrorPolicy::Skip);
    }

    #[test]
    fn test_load_from_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
frequency_hz = 15
queue_capacity = 8
backpressure = "drop"
module_errors = "halt"
worker_name = "depth-worker"
"#
        )
        .unwrap();

        let config = PipelineConfig::load_from(file.path()).unwrap();
        assert_eq!(config.frequency_hz, 15);
        assert_eq!(config.queue_capacity, Some(8));
        assert_eq!(config.backpressure, Backpressure::Drop);
        assert_eq!(config.module_errors, ModuleErrorPolicy::Halt);
        assert_eq!(config.worker_name, "depth-worker");
        // Untouched keys keep their defaults
        assert_eq!(config.pool_size, 60);
        assert!(config.restrict_size);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_invalid_file_values_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "frequency_hz = 0").unwrap();

        let err = PipelineConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[test]
    fn test_unknown_policy_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"backpressure = "sometimes""#).unwrap();

        let err = PipelineConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_validation_errors() {
        let mut config = PipelineConfig::default();
        config.frequency_hz = MAX_FREQUENCY_HZ + 1;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.pool_size = 0;
        assert!(config.validate().is_err());

        let config = PipelineConfig::default().with_queue_capacity(0);
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.log_level = "verbose".into();
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.worker_name = "  ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_effective_capacity() {
        let config = PipelineConfig::default();
        assert_eq!(config.effective_capacity(None), Some(DEFAULT_QUEUE_CAPACITY));
        assert_eq!(config.effective_capacity(Some(10)), Some(10));

        let config = PipelineConfig::default().with_queue_capacity(4);
        assert_eq!(config.effective_capacity(Some(10)), Some(4));

        let mut config = PipelineConfig::realtime(30);
        config.restrict_size = false;
        assert_eq!(config.effective_capacity(Some(10)), None);
    }
}
