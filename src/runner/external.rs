//! # External runner: forks a child process and multiplexes its output.
//!
//! ```text
//!   spawn(binary, args, env)
//!        │
//!        ├── stdin  ◄── cmd.data
//!        ├── stdout ──► line reader ──► Message (level prefix or 1)
//!        ├── stderr ──► line reader ──► Message (level prefix or 2)
//!        ├── ticker ──► sink.meter(cmd, pid)
//!        ▼
//!   wait ── success ───────────────► SUCCESS
//!        ├─ non-zero ─ restart budget left? ─ backoff, respawn
//!        │                        └─ no ───► ERROR
//!        ├─ kill token ──────────────────► KILLED
//!        └─ max_time elapsed ────────────► TIMEOUT
//! ```
//!
//! ## Rules
//! - Exactly one terminal result per execution, after **all** output lines
//!   of the final attempt have been forwarded.
//! - `args.max_restart` bounds restarts on non-zero exit; delays follow the
//!   configured [`Backoff`].
//! - `args.max_time` (seconds) bounds each attempt; on expiry the child is
//!   killed and the result is `TIMEOUT`.
//! - Captured streams are bounded; output past the cap is still parsed into
//!   messages but no longer captured.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command as OsCommand};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::backoff::Backoff;
use crate::command::Command;
use crate::error::JobError;
use crate::message::{Message, LEVEL_STDERR, LEVEL_STDOUT};
use crate::result::{unix_now, JobResult, JobState};

use super::{Hook, ResultCell, RunContext, RunSink, Runner};

const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";
const DEFAULT_HOME: &str = "/";

/// Per-stream capture bound for `result.streams`.
const STREAM_CAP: usize = 1 << 20;

/// Static execution recipe bound to a command name at registration.
#[derive(Clone, Debug)]
pub struct ExecConfig {
    /// Binary to execute.
    pub binary: String,
    /// Fixed argument list.
    pub args: Vec<String>,
    /// Working directory; inherited when `None`.
    pub cwd: Option<PathBuf>,
    /// Environment overlayed on the `PATH`/`HOME` defaults.
    pub env: HashMap<String, String>,
}

impl ExecConfig {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

enum AttemptEnd {
    Success,
    Failed(String),
    Killed,
    Timeout,
    SpawnError(String),
}

/// Runner executing a child process.
pub struct ExternalRunner {
    cmd: Command,
    exec: ExecConfig,
    backoff: Backoff,
    meter_interval: Duration,
    hooks: Vec<Arc<dyn Hook>>,
    token: CancellationToken,
    result: ResultCell,
}

impl ExternalRunner {
    pub fn new(cmd: Command, exec: ExecConfig) -> Self {
        Self {
            cmd,
            exec,
            backoff: Backoff::default(),
            meter_interval: Duration::from_secs(2),
            hooks: Vec::new(),
            token: CancellationToken::new(),
            result: ResultCell::new(),
        }
    }

    /// Installs a lifecycle hook. Construction-time only.
    pub fn with_hook(mut self, hook: Arc<dyn Hook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Overrides the restart backoff schedule.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Overrides the metering cadence (0 disables metering).
    pub fn with_meter_interval(mut self, interval: Duration) -> Self {
        self.meter_interval = interval;
        self
    }

    fn spawn_child(&self) -> std::io::Result<Child> {
        let mut os_cmd = OsCommand::new(&self.exec.binary);
        os_cmd
            .args(&self.exec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env_clear()
            .env("PATH", DEFAULT_PATH)
            .env("HOME", DEFAULT_HOME)
            .kill_on_drop(true);
        for (key, value) in &self.exec.env {
            os_cmd.env(key, value);
        }
        if let Some(cwd) = &self.exec.cwd {
            os_cmd.current_dir(cwd);
        }
        os_cmd.spawn()
    }

    async fn run_attempt(&self, ctx: &RunContext, out: &mut String, err: &mut String) -> AttemptEnd {
        let mut child = match self.spawn_child() {
            Ok(child) => child,
            Err(e) => return AttemptEnd::SpawnError(JobError::Spawn { source: e }.to_string()),
        };

        let pid = child.id();
        if let Some(pid) = pid {
            trace!(target: "procvisor.runner", cmd = %self.cmd, pid, "child started");
            for hook in &self.hooks {
                hook.on_pid(pid);
            }
        }

        // Deliver the opaque payload on stdin; the pipe closes on drop.
        if let Some(mut stdin) = child.stdin.take() {
            let data = self.cmd.data.clone();
            tokio::spawn(async move {
                if !data.is_empty() {
                    let _ = stdin.write_all(data.as_bytes()).await;
                }
            });
        }

        let shared = Arc::new(self.cmd.clone());
        let out_task = child
            .stdout
            .take()
            .map(|s| read_lines(ctx.sink(), Arc::clone(&shared), s, LEVEL_STDOUT));
        let err_task = child
            .stderr
            .take()
            .map(|s| read_lines(ctx.sink(), Arc::clone(&shared), s, LEVEL_STDERR));

        let meter_task = match pid {
            Some(pid) if !self.meter_interval.is_zero() => Some(spawn_meter(
                ctx.sink(),
                Arc::clone(&shared),
                pid,
                self.meter_interval,
            )),
            _ => None,
        };

        let max_time = self.cmd.args.get_int("max_time");
        let deadline = async {
            if max_time > 0 {
                time::sleep(Duration::from_secs(max_time as u64)).await;
            } else {
                std::future::pending::<()>().await;
            }
        };
        tokio::pin!(deadline);

        let end = tokio::select! {
            status = child.wait() => match status {
                Ok(status) if status.success() => AttemptEnd::Success,
                Ok(status) => AttemptEnd::Failed(status.to_string()),
                Err(e) => AttemptEnd::Failed(format!("wait failed: {e}")),
            },
            _ = self.token.cancelled() => {
                let _ = child.kill().await;
                AttemptEnd::Killed
            }
            _ = &mut deadline => {
                let _ = child.kill().await;
                AttemptEnd::Timeout
            }
        };

        if let Some(task) = meter_task {
            task.abort();
        }
        // Drain the readers so every line of this attempt is forwarded
        // before the terminal result.
        if let Some(task) = out_task {
            out.push_str(&task.await.unwrap_or_default());
        }
        if let Some(task) = err_task {
            err.push_str(&task.await.unwrap_or_default());
        }

        end
    }
}

#[async_trait]
impl Runner for ExternalRunner {
    fn cmd(&self) -> &Command {
        &self.cmd
    }

    async fn run(&self, ctx: RunContext) {
        let start = unix_now();
        let max_restart = self.cmd.args.get_int("max_restart").max(0) as u64;

        let mut attempt: u64 = 0;
        let mut prev_delay: Option<Duration> = None;
        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut data = String::new();

        let state = loop {
            attempt += 1;
            match self.run_attempt(&ctx, &mut stdout, &mut stderr).await {
                AttemptEnd::Success => break JobState::Success,
                AttemptEnd::Killed => break JobState::Killed,
                AttemptEnd::Timeout => {
                    data = format!(
                        "exceeded max_time of {}s",
                        self.cmd.args.get_int("max_time")
                    );
                    break JobState::Timeout;
                }
                AttemptEnd::SpawnError(text) => {
                    data = text;
                    break JobState::Error;
                }
                AttemptEnd::Failed(text) => {
                    if attempt > max_restart {
                        data = text;
                        break JobState::Error;
                    }
                    let delay = self.backoff.next(prev_delay);
                    prev_delay = Some(delay);
                    debug!(target: "procvisor.runner", cmd = %self.cmd, attempt, ?delay,
                           "restarting after non-zero exit");
                    tokio::select! {
                        _ = time::sleep(delay) => {}
                        _ = self.token.cancelled() => break JobState::Killed,
                    }
                }
            }
        };

        let success = state == JobState::Success;
        for hook in &self.hooks {
            hook.on_exit(success);
        }

        let mut result = JobResult::basic(&self.cmd, state);
        result.start_time = start;
        result.time = unix_now() - start;
        result.data = data;
        result.streams = (stdout, stderr);

        self.result.set(result.clone());
        ctx.result(result).await;
        ctx.finish();
    }

    fn kill(&self) {
        self.token.cancel();
    }

    async fn wait(&self) -> JobResult {
        self.result.wait().await
    }
}

/// Forwards each line of `stream` as a message and returns the captured
/// text (bounded by [`STREAM_CAP`]).
fn read_lines<R>(
    sink: Arc<dyn RunSink>,
    cmd: Arc<Command>,
    stream: R,
    level: u8,
) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut captured = String::new();
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if captured.len() < STREAM_CAP {
                captured.push_str(&line);
                captured.push('\n');
            }
            sink.message(Message::parse_line(&cmd, &line, level)).await;
        }
        captured
    })
}

fn spawn_meter(
    sink: Arc<dyn RunSink>,
    cmd: Arc<Command>,
    pid: u32,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = time::interval(every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick of `interval` completes immediately.
        tick.tick().await;
        loop {
            tick.tick().await;
            sink.meter(&cmd, pid).await;
        }
    })
}
