//! # procvisor
//!
//! **Procvisor** is the execution core of a node-resident process-manager
//! agent: a concurrency-bounded command dispatcher with per-command
//! lifecycle tracking, serialising command queues, and fan-out of runtime
//! telemetry (messages, metrics, statistics, results) to registered
//! handlers.
//!
//! ## Features
//!
//! | Area           | Description                                                        | Key types / traits                              |
//! |----------------|--------------------------------------------------------------------|-------------------------------------------------|
//! | **Dispatch**   | Bounded-slot admission, duplicate detection, kill/kill-all.        | [`ProcessManager`], [`Config`]                  |
//! | **Runners**    | Builtin (in-process) and external (child process) execution.       | [`Runner`], [`InternalRunner`], [`ExternalRunner`] |
//! | **Factories**  | Command name → runner constructor, extensible at startup.          | [`Registry`], [`Factory`]                       |
//! | **Queues**     | Strict FIFO serialisation for commands sharing `args.queue`.       | `run_cmd_queued`                                |
//! | **Telemetry**  | Message/result/stats fan-out in registration order.                | [`MessageHandler`], [`ResultHandler`], [`StatsHandler`] |
//! | **Statistics** | Per-command statsd aggregation with interval flush.                | [`Statsd`], [`Stats`]                           |
//! | **Hooks**      | Per-runner pid/exit observers for higher layers.                   | [`Hook`]                                        |
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use procvisor::{Command, Config, JobResult, ProcessManager, ResultHandler};
//!
//! struct PrintResults;
//!
//! #[async_trait::async_trait]
//! impl ResultHandler for PrintResults {
//!     async fn on_result(&self, result: &JobResult) {
//!         println!("{} -> {}", result.id, result.state);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pm = ProcessManager::builder(Config::default())
//!         .with_default_builtins()
//!         .with_result_handler(Arc::new(PrintResults))
//!         .build();
//!     pm.run()?;
//!
//!     pm.run_cmd(Command::new("job-1", "get_cpu_info")).await?;
//!     Ok(())
//! }
//! ```
//!
//! ---

mod backoff;
pub mod builtin;
mod command;
mod config;
mod error;
mod manager;
mod message;
pub mod meter;
mod mid;
mod queue;
mod registry;
mod result;
mod runner;
mod stats;

// ---- Public re-exports ----

pub use backoff::Backoff;
pub use command::{Args, Command};
pub use config::Config;
pub use error::{JobError, RuntimeError};
pub use manager::{
    MessageHandler, MeterHandler, ProcessManager, ProcessManagerBuilder, ResultHandler,
    StatsHandler,
};
pub use message::{
    Message, LEVEL_CRITICAL, LEVEL_DEBUG, LEVEL_OPERATOR, LEVEL_OPS_ERROR, LEVEL_PUBLIC,
    LEVEL_RESULT_JSON, LEVEL_STATSD, LEVEL_STDERR, LEVEL_STDOUT, LEVEL_STRUCTURED,
    LEVEL_UNKNOWN, LEVEL_WARNING,
};
pub use registry::{BuildContext, Factory, Registry};
pub use result::{JobResult, JobState};
pub use runner::{
    BuiltinFn, ExecConfig, ExternalRunner, Hook, InternalRunner, RunContext, RunSink, Runner,
    RunnerRef,
};
pub use stats::{FlushHook, Stats, Statsd};
