//! # Builtin runner: executes a registered function in-process.
//!
//! The function's return value is JSON-encoded into the result `data`
//! (level `LEVEL_RESULT_JSON`); an error becomes `state = ERROR` with the
//! error text in `data`. Builtins run to completion: `kill` is a no-op.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::command::Command;
use crate::error::JobError;
use crate::message::LEVEL_RESULT_JSON;
use crate::result::{unix_now, JobResult, JobState};

use super::{ResultCell, RunContext, Runner};

/// A registered builtin: `Command -> Result<json, JobError>`.
pub type BuiltinFn = dyn Fn(Command) -> BoxFuture<'static, Result<Value, JobError>> + Send + Sync;

/// Runner executing a builtin function.
pub struct InternalRunner {
    cmd: Command,
    func: Arc<BuiltinFn>,
    result: ResultCell,
}

impl InternalRunner {
    pub fn new(cmd: Command, func: Arc<BuiltinFn>) -> Self {
        Self {
            cmd,
            func,
            result: ResultCell::new(),
        }
    }
}

#[async_trait]
impl Runner for InternalRunner {
    fn cmd(&self) -> &Command {
        &self.cmd
    }

    async fn run(&self, ctx: RunContext) {
        let start = unix_now();

        let outcome = (self.func)(self.cmd.clone()).await;

        let mut result = JobResult::basic(&self.cmd, JobState::Success);
        result.start_time = start;
        result.level = LEVEL_RESULT_JSON;

        match outcome {
            Ok(value) => match serde_json::to_string(&value) {
                Ok(encoded) => result.data = encoded,
                Err(e) => {
                    result.state = JobState::Error;
                    result.data = JobError::from(e).to_string();
                }
            },
            Err(e) => {
                result.state = JobState::Error;
                result.data = e.to_string();
            }
        }

        result.time = unix_now() - start;

        self.result.set(result.clone());
        ctx.result(result).await;
        ctx.finish();
    }

    fn kill(&self) {
        // Builtins are synchronous with respect to their scheduling unit
        // and always run to completion.
    }

    async fn wait(&self) -> JobResult {
        self.result.wait().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::runner::RunSink;
    use futures::FutureExt;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    struct Capture {
        results: Mutex<Vec<JobResult>>,
    }

    #[async_trait]
    impl RunSink for Capture {
        async fn message(&self, _msg: Message) {}
        async fn result(&self, result: JobResult) {
            self.results.lock().unwrap().push(result);
        }
        async fn meter(&self, _cmd: &Command, _pid: u32) {}
    }

    fn harness() -> (Arc<Capture>, RunContext, oneshot::Receiver<()>) {
        let capture = Arc::new(Capture {
            results: Mutex::new(Vec::new()),
        });
        let (tx, rx) = oneshot::channel();
        let ctx = RunContext::new(Arc::clone(&capture) as Arc<dyn RunSink>, tx);
        (capture, ctx, rx)
    }

    #[tokio::test]
    async fn encodes_value_into_result_data() {
        let func: Arc<BuiltinFn> =
            Arc::new(|_cmd| async move { Ok(json!({"cores": 4})) }.boxed());
        let runner = InternalRunner::new(Command::new("a", "get_cpu_info"), func);

        let (capture, ctx, signal) = harness();
        runner.run(ctx).await;

        let results = capture.results.lock().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].state, JobState::Success);
        assert_eq!(results[0].level, LEVEL_RESULT_JSON);
        assert_eq!(results[0].data, r#"{"cores":4}"#);
        drop(results);

        // Exit signal fired after the result.
        signal.await.unwrap();
        assert_eq!(runner.wait().await.state, JobState::Success);
    }

    #[tokio::test]
    async fn error_becomes_error_state() {
        let func: Arc<BuiltinFn> =
            Arc::new(|_cmd| async move { Err(JobError::failed("no such nic")) }.boxed());
        let runner = InternalRunner::new(Command::new("a", "get_nic_info"), func);

        let (capture, ctx, _signal) = harness();
        runner.run(ctx).await;

        let results = capture.results.lock().unwrap();
        assert_eq!(results[0].state, JobState::Error);
        assert_eq!(results[0].data, "no such nic");
    }
}
