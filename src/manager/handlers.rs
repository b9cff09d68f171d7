//! # Handler fan-out.
//!
//! The manager owns four append-only handler lists, filled during the
//! builder phase and immutable once the dispatch loop starts. Handlers are
//! invoked in registration order; a panic inside a handler is caught and
//! logged so one misbehaving sink cannot take down the dispatcher.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::warn;

use crate::command::Command;
use crate::message::Message;
use crate::result::JobResult;
use crate::stats::{Stats, Statsd};

/// Receives every message the dispatcher fans out.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn on_message(&self, msg: &Message);
}

/// Receives every terminal result.
#[async_trait]
pub trait ResultHandler: Send + Sync + 'static {
    async fn on_result(&self, result: &JobResult);
}

/// Receives every flushed statistics snapshot.
#[async_trait]
pub trait StatsHandler: Send + Sync + 'static {
    async fn on_stats(&self, stats: &Stats);
}

/// Custom per-command metering, invoked on every metering tick of a live
/// external process in addition to the built-in gauges.
#[async_trait]
pub trait MeterHandler: Send + Sync + 'static {
    async fn on_meter(&self, statsd: &Statsd, cmd: &Command, pid: u32);
}

/// The four registration-ordered handler lists.
#[derive(Default)]
pub(crate) struct Handlers {
    pub messages: Vec<Arc<dyn MessageHandler>>,
    pub results: Vec<Arc<dyn ResultHandler>>,
    pub stats: Vec<Arc<dyn StatsHandler>>,
    pub meters: Vec<Arc<dyn MeterHandler>>,
}

impl Handlers {
    pub(crate) async fn emit_message(&self, msg: &Message) {
        for handler in &self.messages {
            guard(handler.on_message(msg), "message").await;
        }
    }

    pub(crate) async fn emit_result(&self, result: &JobResult) {
        for handler in &self.results {
            guard(handler.on_result(result), "result").await;
        }
    }

    pub(crate) async fn emit_stats(&self, stats: &Stats) {
        for handler in &self.stats {
            guard(handler.on_stats(stats), "stats").await;
        }
    }

    pub(crate) async fn emit_meter(&self, statsd: &Statsd, cmd: &Command, pid: u32) {
        for handler in &self.meters {
            guard(handler.on_meter(statsd, cmd, pid), "meter").await;
        }
    }
}

/// Isolates a single handler invocation from the dispatcher.
async fn guard(fut: impl Future<Output = ()>, kind: &str) {
    if let Err(panic) = AssertUnwindSafe(fut).catch_unwind().await {
        warn!(target: "procvisor.handlers", kind, "handler panicked: {panic:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Panicking;

    #[async_trait]
    impl ResultHandler for Panicking {
        async fn on_result(&self, _result: &JobResult) {
            panic!("sink exploded");
        }
    }

    struct Counting {
        seen: AtomicUsize,
    }

    #[async_trait]
    impl ResultHandler for Counting {
        async fn on_result(&self, _result: &JobResult) {
            self.seen.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn panicking_handler_does_not_stop_the_fan_out() {
        let counting = Arc::new(Counting {
            seen: AtomicUsize::new(0),
        });
        let mut handlers = Handlers::default();
        handlers.results.push(Arc::new(Panicking));
        handlers.results.push(Arc::clone(&counting) as Arc<dyn ResultHandler>);

        let result = JobResult::basic(
            &Command::new("a", "ping"),
            crate::result::JobState::Success,
        );
        handlers.emit_result(&result).await;

        assert_eq!(counting.seen.load(Ordering::SeqCst), 1);
    }
}
