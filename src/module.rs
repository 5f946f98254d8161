//! Processing module contract and the ordered module chain.
//!
//! A module is one stage of per-frame work. All `process` calls for a
//! pipeline happen on its single worker thread, in registration order, so a
//! module needs no internal locking for its per-frame state.
//!
//! # Failure policy
//!
//! `process` returns `anyhow::Result<()>`. What happens on `Err` is chosen by
//! [`ModuleErrorPolicy`]:
//!
//! - `Skip`: the error is logged at `warn`, the remaining modules still run
//!   and the frame completes normally.
//! - `Halt`: the error is logged at `error`, the remaining modules are
//!   skipped, the frame still completes (so it can be recycled), and the
//!   pipeline then aborts.
//!
//! A panic inside `process` is a bug and is not caught.
//!
//! # Sharing a module
//!
//! The pipeline owns its modules for disposal. Wrap a module in
//! [`SharedModule`] to keep a handle for toggling or inspecting it from
//! outside while it is registered.

use crate::config::ModuleErrorPolicy;
use anyhow::Result;
use parking_lot::{Mutex, MutexGuard};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// One stage of the pipeline.
pub trait ProcessingModule<T>: Send {
    /// Name used in logs and for [`ModuleChain::set_enabled`].
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Disabled modules are skipped without being called.
    fn is_enabled(&self) -> bool;

    fn set_enabled(&mut self, enabled: bool);

    /// Transform `frame` in place. Runs on the worker and gates throughput,
    /// so it must return in bounded time.
    fn process(&mut self, frame: &mut T) -> Result<()>;

    /// Release resources. Called once when the pipeline is disposed.
    fn dispose(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A module failure raised while processing one frame.
#[derive(Debug)]
pub struct ModuleFailure {
    pub module: String,
    pub error: anyhow::Error,
}

/// Result of running the chain over one frame.
#[derive(Debug, Default)]
pub struct ChainOutcome {
    /// Modules that actually ran
    pub invoked: usize,
    pub failures: Vec<ModuleFailure>,
    /// Set when a failure happened under `ModuleErrorPolicy::Halt`
    pub halted: bool,
}

/// Module handle shared between the pipeline and the caller.
pub struct SharedModule<M> {
    inner: Arc<Mutex<M>>,
    name: String,
}

impl<M> Clone for SharedModule<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            name: self.name.clone(),
        }
    }
}

impl<M> SharedModule<M> {
    /// Wrap `module`. The name is captured once; modules keep a fixed name.
    pub fn new<T>(module: M) -> Self
    where
        M: ProcessingModule<T>,
    {
        let name = module.name().to_string();
        Self {
            inner: Arc::new(Mutex::new(module)),
            name,
        }
    }

    /// Lock the module. Blocks while the worker is inside `process`.
    pub fn lock(&self) -> MutexGuard<'_, M> {
        self.inner.lock()
    }
}

impl<T, M> ProcessingModule<T> for SharedModule<M>
where
    M: ProcessingModule<T>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn is_enabled(&self) -> bool {
        self.inner.lock().is_enabled()
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.inner.lock().set_enabled(enabled);
    }

    fn process(&mut self, frame: &mut T) -> Result<()> {
        self.inner.lock().process(frame)
    }

    fn dispose(&mut self) -> Result<()> {
        self.inner.lock().dispose()
    }
}

/// Ordered list of modules run over every frame.
pub struct ModuleChain<T> {
    modules: Vec<Box<dyn ProcessingModule<T>>>,
}

impl<T> Default for ModuleChain<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ModuleChain<T> {
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
        }
    }

    pub fn push(&mut self, module: Box<dyn ProcessingModule<T>>) {
        debug!(module = module.name(), position = self.modules.len(), "Module registered");
        self.modules.push(module);
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.modules.iter().map(|m| m.name().to_string()).collect()
    }

    /// Toggle every module called `name`. Returns whether any matched.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        let mut found = false;
        for module in self.modules.iter_mut().filter(|m| m.name() == name) {
            module.set_enabled(enabled);
            found = true;
        }
        found
    }

    /// Run the enabled modules over `frame` in registration order.
    pub fn run(&mut self, frame: &mut T, policy: ModuleErrorPolicy) -> ChainOutcome {
        let mut outcome = ChainOutcome::default();
        for module in self.modules.iter_mut() {
            if !module.is_enabled() {
                continue;
            }
            outcome.invoked += 1;
            let Err(err) = module.process(frame) else {
                continue;
            };

            match policy {
                ModuleErrorPolicy::Skip => {
                    warn!(module = module.name(), error = %err, "Module failed, continuing");
                }
                ModuleErrorPolicy::Halt => {
                    error!(module = module.name(), error = %err, "Module failed, halting pipeline");
                    outcome.halted = true;
                }
            }
            outcome.failures.push(ModuleFailure {
                module: module.name().to_string(),
                error: err,
            });
            if outcome.halted {
                break;
            }
        }
        outcome
    }

    /// Dispose every module. Errors and panics are logged and suppressed so
    /// one faulty module cannot block the rest. Returns the failure count.
    pub fn dispose_all(&mut self) -> usize {
        let mut failures = 0;
        for module in self.modules.iter_mut() {
            let name = module.name().to_string();
            match panic::catch_unwind(AssertUnwindSafe(|| module.dispose())) {
                Ok(Ok(())) => debug!(module = %name, "Module disposed"),
                Ok(Err(err)) => {
                    failures += 1;
                    error!(module = %name, error = %err, "Module dispose failed");
                }
                Err(_) => {
                    failures += 1;
                    error!(module = %name, "Module panicked during dispose");
                }
            }
        }
        failures
    }
}
