//! # Process manager: admission control, lifecycle orchestration, fan-out.
//!
//! The manager is the crate's facade. It is assembled once through
//! [`ProcessManagerBuilder`] (handlers and factories are builder-phase
//! only), then driven by a single dispatch loop.
//!
//! ## Wiring (module-level flow)
//! ```text
//! run_cmd(cmd) ────► direct channel ──┐
//! run_cmd_queued(cmd) ─► CmdQueue ────┤  select! (no priority)
//!                                     ▼
//!                          dispatch loop (one task)
//!                            1. acquire slot permit   (max_jobs bound,
//!                               strictly BEFORE the receive)
//!                            2. receive one command
//!                            3. resolve factory        ── none ─► UNKNOWN_CMD
//!                            4. duplicate id check     ── dup ──► DUPLICATE_ID
//!                            5. insert runner + statsd into state
//!                            6. spawn watchdog (owns the permit)
//!                            7. spawn runner task
//!
//! runner ──► RunSink::message ──► statsd feed (level 10)
//!                              └► loglevels filter ► stamp epoch ► assign id
//!                                 ► message handlers (registration order)
//!        ──► RunSink::result  ──► result handlers (registration order)
//!        ──► RunSink::meter   ──► _cpu_/_rss_/_vms_/_swap_ gauges
//!                              └► meter handlers
//!        ──► exit signal ──► watchdog: stop statsd, remove from state,
//!                            queue.notify(cmd), release slot
//! ```
//!
//! ## Rules
//! - The slot check happens strictly before the receive; a command is never
//!   dequeued while all slots are busy.
//! - `processes` and `statsdes` share one lock; snapshots are consistent.
//! - Synthetic failures (unknown/duplicate) also notify the queue manager so
//!   a queue head can never wedge.

mod handlers;

pub use handlers::{MessageHandler, MeterHandler, ResultHandler, StatsHandler};

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::builtin;
use crate::command::Command;
use crate::config::Config;
use crate::error::{JobError, RuntimeError};
use crate::message::{epoch_ns, Message, LEVEL_STATSD};
use crate::meter;
use crate::mid::MidCounter;
use crate::queue::CmdQueue;
use crate::registry::{BuildContext, Registry};
use crate::result::{JobResult, JobState};
use crate::runner::{ExecConfig, RunContext, RunSink, RunnerRef};
use crate::stats::{FlushHook, Stats, Statsd};

use handlers::Handlers;

const DUPLICATE_ID_TEXT: &str = "A job exists with the same ID";

/// Builds a [`ProcessManager`]. Registration is one-shot: once `build()`
/// runs, handler lists and the factory registry are immutable.
pub struct ProcessManagerBuilder {
    cfg: Config,
    registry: Registry,
    handlers: Handlers,
}

impl ProcessManagerBuilder {
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            registry: Registry::new(),
            handlers: Handlers::default(),
        }
    }

    /// Appends a message handler (invoked in registration order).
    pub fn with_message_handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handlers.messages.push(handler);
        self
    }

    /// Appends a result handler (invoked in registration order).
    pub fn with_result_handler(mut self, handler: Arc<dyn ResultHandler>) -> Self {
        self.handlers.results.push(handler);
        self
    }

    /// Appends a statistics flush handler.
    pub fn with_stats_handler(mut self, handler: Arc<dyn StatsHandler>) -> Self {
        self.handlers.stats.push(handler);
        self
    }

    /// Appends a custom per-command metering handler.
    pub fn with_meter_handler(mut self, handler: Arc<dyn MeterHandler>) -> Self {
        self.handlers.meters.push(handler);
        self
    }

    /// Registers a builtin function.
    pub fn with_builtin<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Command) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, JobError>> + Send + 'static,
    {
        self.registry.register_builtin(name, f);
        self
    }

    /// Registers an external binary.
    pub fn with_external(mut self, name: impl Into<String>, exec: ExecConfig) -> Self {
        self.registry.register_external(name, exec);
        self
    }

    /// Registers the stock builtins (`get_cpu_info`, `get_nic_info`).
    pub fn with_default_builtins(mut self) -> Self {
        builtin::register_all(&mut self.registry);
        self
    }

    /// Direct registry access, for custom [`Factory`](crate::registry::Factory)
    /// implementations (containerised runners, hook installation).
    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn build(self) -> ProcessManager {
        let (cmds_tx, cmds_rx) = mpsc::channel(self.cfg.capacity_clamped());
        let slots = Arc::new(Semaphore::new(self.cfg.jobs_clamped()));
        let mid = MidCounter::load(&self.cfg.mid_file);

        ProcessManager {
            inner: Arc::new(Inner {
                registry: self.registry,
                handlers: Arc::new(self.handlers),
                state: Mutex::new(State::default()),
                mid,
                queue: CmdQueue::new(),
                cmds_tx,
                cmds_rx: Mutex::new(Some(cmds_rx)),
                slots,
                token: CancellationToken::new(),
                cfg: self.cfg,
            }),
        }
    }
}

#[derive(Default)]
struct State {
    processes: HashMap<String, RunnerRef>,
    statsdes: HashMap<String, Arc<Statsd>>,
}

struct Inner {
    cfg: Config,
    registry: Registry,
    handlers: Arc<Handlers>,
    state: Mutex<State>,
    mid: MidCounter,
    queue: CmdQueue,
    cmds_tx: mpsc::Sender<Command>,
    cmds_rx: Mutex<Option<mpsc::Receiver<Command>>>,
    slots: Arc<Semaphore>,
    token: CancellationToken,
}

/// Cloneable handle to the process manager.
#[derive(Clone)]
pub struct ProcessManager {
    inner: Arc<Inner>,
}

impl ProcessManager {
    pub fn builder(cfg: Config) -> ProcessManagerBuilder {
        ProcessManagerBuilder::new(cfg)
    }

    /// Starts the dispatch loop. Fails on a second call.
    pub fn run(&self) -> Result<(), RuntimeError> {
        let direct = self
            .inner
            .cmds_rx
            .lock()
            .unwrap()
            .take()
            .ok_or(RuntimeError::AlreadyRunning)?;
        let queued = self
            .inner
            .queue
            .producer()
            .ok_or(RuntimeError::AlreadyRunning)?;

        let inner = Arc::clone(&self.inner);
        tokio::spawn(Inner::dispatch(inner, direct, queued));
        Ok(())
    }

    /// Submits a command on the direct (immediate) path. Applies
    /// backpressure when the submission channel is full.
    pub async fn run_cmd(&self, cmd: Command) -> Result<(), RuntimeError> {
        if self.inner.token.is_cancelled() {
            return Err(RuntimeError::Closed);
        }
        self.inner
            .cmds_tx
            .send(cmd)
            .await
            .map_err(|_| RuntimeError::Closed)
    }

    /// Submits a command through the serialising queue manager. Commands
    /// without `args.queue` behave like the direct path.
    pub fn run_cmd_queued(&self, cmd: Command) {
        self.inner.queue.push(cmd);
    }

    /// Kills the runner registered under `id`. Returns false when no such
    /// runner is live.
    pub fn kill(&self, id: &str) -> bool {
        let state = self.inner.state.lock().unwrap();
        match state.processes.get(id) {
            Some(runner) => {
                runner.kill();
                true
            }
            None => false,
        }
    }

    /// Kills every live runner. Non-blocking.
    pub fn kill_all(&self) {
        let runners: Vec<RunnerRef> = {
            let state = self.inner.state.lock().unwrap();
            state.processes.values().cloned().collect()
        };
        for runner in runners {
            runner.kill();
        }
    }

    /// A consistent snapshot of the currently running commands.
    pub fn processes(&self) -> Vec<Command> {
        let state = self.inner.state.lock().unwrap();
        state
            .processes
            .values()
            .map(|runner| runner.cmd().clone())
            .collect()
    }

    /// Stops the dispatch loop and kills every live runner.
    pub fn shutdown(&self) {
        self.inner.token.cancel();
        self.kill_all();
    }
}

impl Inner {
    async fn dispatch(
        inner: Arc<Inner>,
        mut direct: mpsc::Receiver<Command>,
        mut queued: mpsc::UnboundedReceiver<Command>,
    ) {
        loop {
            // Slot first: a command is never pulled off either source while
            // all execution slots are busy.
            let permit = tokio::select! {
                _ = inner.token.cancelled() => break,
                permit = Arc::clone(&inner.slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            // Two sources, no priority: immediate commands and queue heads.
            let cmd = tokio::select! {
                _ = inner.token.cancelled() => break,
                Some(cmd) = direct.recv() => cmd,
                Some(cmd) = queued.recv() => cmd,
                else => break,
            };

            Inner::admit(&inner, cmd, permit).await;
        }
        debug!(target: "procvisor.manager", "dispatch loop stopped");
    }

    async fn admit(inner: &Arc<Inner>, cmd: Command, permit: OwnedSemaphorePermit) {
        let Some(factory) = inner.registry.resolve(&cmd.name) else {
            warn!(target: "procvisor.manager", cmd = %cmd, "unknown command");
            inner.queue.notify(&cmd);
            let result = JobResult::basic(&cmd, JobState::UnknownCmd);
            inner.handlers.emit_result(&result).await;
            return;
        };

        let duplicate = {
            let state = inner.state.lock().unwrap();
            state.processes.contains_key(&cmd.id)
        };
        if duplicate {
            warn!(target: "procvisor.manager", cmd = %cmd, "duplicate job id");
            inner.queue.notify(&cmd);
            let mut result = JobResult::basic(&cmd, JobState::DuplicateId);
            result.data = DUPLICATE_ID_TEXT.into();
            inner.handlers.emit_result(&result).await;
            return;
        }

        let runner = factory.build(
            cmd.clone(),
            &BuildContext {
                meter_interval: inner.cfg.meter_interval,
            },
        );

        let statsd = Arc::new(Statsd::new(
            stats_prefix(&cmd),
            std::time::Duration::from_secs(cmd.args.get_int("stats_interval").max(0) as u64),
            stats_flush_hook(Arc::clone(&inner.handlers)),
        ));
        Arc::clone(&statsd).run();

        {
            let mut state = inner.state.lock().unwrap();
            state.processes.insert(cmd.id.clone(), Arc::clone(&runner));
            state.statsdes.insert(cmd.id.clone(), Arc::clone(&statsd));
        }

        let (signal_tx, signal_rx) = oneshot::channel();

        // Watchdog: owns the slot permit until the runner signals that it
        // will not restart.
        {
            let inner = Arc::clone(inner);
            let cmd = cmd.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let _ = signal_rx.await;
                statsd.stop();
                {
                    let mut state = inner.state.lock().unwrap();
                    state.processes.remove(&cmd.id);
                    state.statsdes.remove(&cmd.id);
                }
                inner.queue.notify(&cmd);
            });
        }

        let ctx = RunContext::new(
            Arc::new(ManagerSink {
                inner: Arc::clone(inner),
            }),
            signal_tx,
        );
        tokio::spawn(async move { runner.run(ctx).await });
    }

    fn statsd_for(&self, id: &str) -> Option<Arc<Statsd>> {
        self.state.lock().unwrap().statsdes.get(id).cloned()
    }
}

/// `{gid}.{nid}.{name}.{args.domain}.{args.name}`
fn stats_prefix(cmd: &Command) -> String {
    format!(
        "{}.{}.{}.{}.{}",
        cmd.gid,
        cmd.nid,
        cmd.name,
        cmd.args.get_string("domain"),
        cmd.args.get_string("name")
    )
}

fn stats_flush_hook(handlers: Arc<Handlers>) -> FlushHook {
    Arc::new(move |stats: Stats| {
        let handlers = Arc::clone(&handlers);
        tokio::spawn(async move { handlers.emit_stats(&stats).await });
    })
}

/// The dispatcher side of the runner contract.
struct ManagerSink {
    inner: Arc<Inner>,
}

#[async_trait]
impl RunSink for ManagerSink {
    async fn message(&self, mut msg: Message) {
        // Statsd samples feed the command's aggregator and nothing else.
        if msg.level == LEVEL_STATSD {
            if let Some(statsd) = self.inner.statsd_for(&msg.cmd.id) {
                statsd.feed(msg.message.trim());
            }
            return;
        }

        let levels = msg.cmd.args.get_int_array("loglevels");
        if !levels.is_empty() && !levels.contains(&(msg.level as i64)) {
            return;
        }

        msg.epoch = epoch_ns();
        msg.id = self.inner.mid.next();
        self.inner.handlers.emit_message(&msg).await;
    }

    async fn result(&self, result: JobResult) {
        self.inner.handlers.emit_result(&result).await;
    }

    async fn meter(&self, cmd: &Command, pid: u32) {
        let Some(statsd) = self.inner.statsd_for(&cmd.id) else {
            return;
        };

        if let Some(cpu) = meter::cpu_percent(pid) {
            statsd.gauge("_cpu_", cpu);
        }
        if let Some(mem) = meter::memory(pid) {
            statsd.gauge("_rss_", mem.rss as f64);
            statsd.gauge("_vms_", mem.vms as f64);
            statsd.gauge("_swap_", mem.swap as f64);
        }

        self.inner.handlers.emit_meter(&statsd, cmd, pid).await;
    }
}
