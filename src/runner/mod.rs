//! # Runner abstraction: the live execution of a command.
//!
//! A [`Runner`] takes a command from admission to a single terminal
//! [`JobResult`]. Two variants exist:
//!
//! - [`InternalRunner`] executes a registered builtin function in-process.
//! - [`ExternalRunner`] forks a child process and multiplexes its output.
//!
//! ## Contract
//! - `run` delivers **exactly one** terminal result through the
//!   [`RunContext`], then fires the exit signal; the dispatcher's watchdog
//!   cleans up only after that signal.
//! - `kill` is best-effort and non-blocking; a killed runner still delivers
//!   its one terminal result.
//! - `wait` blocks until the terminal result exists and returns a copy.
//!
//! [`Hook`]s are per-runner observers installed at construction; they are
//! invoked synchronously before the exit signal so observers always see a
//! fully terminated runner. The core itself never installs hooks.

mod external;
mod internal;

pub use external::{ExecConfig, ExternalRunner};
pub use internal::{BuiltinFn, InternalRunner};

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{oneshot, Notify};

use crate::command::Command;
use crate::message::Message;
use crate::result::JobResult;

/// Shared handle to a runner.
pub type RunnerRef = Arc<dyn Runner>;

/// The live execution of one command.
#[async_trait]
pub trait Runner: Send + Sync + 'static {
    /// The command this runner executes.
    fn cmd(&self) -> &Command;

    /// Executes the command to completion, delivering exactly one terminal
    /// result through `ctx`.
    async fn run(&self, ctx: RunContext);

    /// Requests immediate termination. Non-blocking, best-effort.
    fn kill(&self);

    /// Blocks until the terminal result is available.
    async fn wait(&self) -> JobResult;
}

/// Dispatcher collaborators handed to a runner for one execution.
#[async_trait]
pub trait RunSink: Send + Sync + 'static {
    /// A message produced by the runner (one per output line).
    async fn message(&self, msg: Message);

    /// The terminal result. Called exactly once per execution.
    async fn result(&self, result: JobResult);

    /// A metering tick for a live OS process.
    async fn meter(&self, cmd: &Command, pid: u32);
}

/// Execution context: the sink plus the single-shot exit signal.
pub struct RunContext {
    sink: Arc<dyn RunSink>,
    signal: oneshot::Sender<()>,
}

impl RunContext {
    pub fn new(sink: Arc<dyn RunSink>, signal: oneshot::Sender<()>) -> Self {
        Self { sink, signal }
    }

    /// A clone of the sink, for tasks outliving this borrow (stream
    /// readers, metering tickers).
    pub fn sink(&self) -> Arc<dyn RunSink> {
        Arc::clone(&self.sink)
    }

    /// Forwards a message to the dispatcher.
    pub async fn message(&self, msg: Message) {
        self.sink.message(msg).await;
    }

    /// Forwards the terminal result to the dispatcher.
    pub async fn result(&self, result: JobResult) {
        self.sink.result(result).await;
    }

    /// Fires the exit signal. The runner will not restart after this.
    pub fn finish(self) {
        let _ = self.signal.send(());
    }
}

/// Per-runner lifecycle observer, installed at construction.
pub trait Hook: Send + Sync + 'static {
    /// Invoked once as soon as the OS pid is known (external runners only).
    fn on_pid(&self, _pid: u32) {}

    /// Invoked exactly once on terminal exit, before the exit signal.
    fn on_exit(&self, _success: bool) {}
}

/// One-shot slot holding the terminal result, awaitable from `wait`.
pub(crate) struct ResultCell {
    slot: Mutex<Option<JobResult>>,
    notify: Notify,
}

impl ResultCell {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    pub(crate) fn set(&self, result: JobResult) {
        *self.slot.lock().unwrap() = Some(result);
        self.notify.notify_waiters();
    }

    pub(crate) async fn wait(&self) -> JobResult {
        loop {
            // Register before checking so a concurrent `set` cannot be
            // missed between the check and the await.
            let notified = self.notify.notified();
            if let Some(result) = self.slot.lock().unwrap().clone() {
                return result;
            }
            notified.await;
        }
    }
}
