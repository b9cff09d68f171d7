//! # Factory registry: command name → runner constructor.
//!
//! The registry is a plain value owned by the manager (no process-wide
//! globals); builtins and external extensions register into it during the
//! builder phase, before the dispatch loop starts. Resolution failures are
//! not errors here: the dispatcher synthesises an `UNKNOWN_CMD` result for
//! names without a factory.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;
use tracing::warn;

use crate::command::Command;
use crate::error::JobError;
use crate::runner::{BuiltinFn, ExecConfig, ExternalRunner, InternalRunner, RunnerRef};

/// Manager-side knobs handed to factories when a runner is built.
pub struct BuildContext {
    /// Metering cadence for external runners.
    pub meter_interval: Duration,
}

/// Constructs a runner for a command.
pub trait Factory: Send + Sync + 'static {
    fn build(&self, cmd: Command, ctx: &BuildContext) -> RunnerRef;
}

struct InternalFactory {
    func: Arc<BuiltinFn>,
}

impl Factory for InternalFactory {
    fn build(&self, cmd: Command, _ctx: &BuildContext) -> RunnerRef {
        Arc::new(InternalRunner::new(cmd, Arc::clone(&self.func)))
    }
}

struct ExternalFactory {
    exec: ExecConfig,
}

impl Factory for ExternalFactory {
    fn build(&self, cmd: Command, ctx: &BuildContext) -> RunnerRef {
        Arc::new(
            ExternalRunner::new(cmd, self.exec.clone()).with_meter_interval(ctx.meter_interval),
        )
    }
}

/// Mapping from command name to runner factory.
#[derive(Default)]
pub struct Registry {
    factories: HashMap<String, Arc<dyn Factory>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory under `name`, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, factory: Arc<dyn Factory>) {
        let name = name.into();
        if self.factories.insert(name.clone(), factory).is_some() {
            warn!(target: "procvisor.registry", name, "factory replaced");
        }
    }

    /// Registers a builtin function. The function's JSON return value
    /// becomes the result payload; an error becomes an `ERROR` result.
    pub fn register_builtin<F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(Command) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, JobError>> + Send + 'static,
    {
        let func: Arc<BuiltinFn> = Arc::new(move |cmd| f(cmd).boxed());
        self.register(name, Arc::new(InternalFactory { func }));
    }

    /// Registers an external binary under `name`.
    pub fn register_external(&mut self, name: impl Into<String>, exec: ExecConfig) {
        self.register(name, Arc::new(ExternalFactory { exec }));
    }

    /// Looks up the factory for a command name.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Factory>> {
        self.factories.get(name).cloned()
    }

    /// True if a factory is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}
