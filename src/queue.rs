//! # Serialising command queues.
//!
//! Commands tagged with the same `args.queue` name must run strictly one
//! after another. [`CmdQueue`] keeps one FIFO per queue name and exposes a
//! single output channel from which the dispatcher consumes ready commands.
//!
//! ```text
//!  push(cmd) ──► queues["install"]: [c1, c2, c3]
//!                       │ head only
//!                       ▼
//!                 output channel ──► dispatcher
//!                       ▲
//!  notify(c1) ──────────┘ (pop head, emit next)
//! ```
//!
//! ## Rules
//! - At most one command per queue is ever outstanding on the output
//!   channel.
//! - A command without a queue name bypasses the queues entirely.
//! - `push` and `notify` are the only writers of the queue map.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::trace;

use crate::command::Command;

/// Queue manager serialising commands that share a queue name.
pub struct CmdQueue {
    queues: Mutex<HashMap<String, VecDeque<Command>>>,
    tx: mpsc::UnboundedSender<Command>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
}

impl CmdQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            queues: Mutex::new(HashMap::new()),
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Enqueues a command. The head of a queue is emitted to the output
    /// channel as soon as it becomes head; commands without a queue name
    /// are emitted immediately.
    pub fn push(&self, cmd: Command) {
        let Some(queue) = cmd.args.queue() else {
            let _ = self.tx.send(cmd);
            return;
        };

        let mut queues = self.queues.lock().unwrap();
        let pending = queues.entry(queue).or_default();
        pending.push_back(cmd);
        if pending.len() == 1 {
            if let Some(head) = pending.front() {
                let _ = self.tx.send(head.clone());
            }
        }
    }

    /// Tells the manager that `cmd` has terminated. If it is the head of
    /// its queue it is removed and the next command (if any) is emitted.
    pub fn notify(&self, cmd: &Command) {
        let Some(queue) = cmd.args.queue() else {
            return;
        };

        let mut queues = self.queues.lock().unwrap();
        let Some(pending) = queues.get_mut(&queue) else {
            return;
        };

        if pending.front().map(|head| head.id == cmd.id) != Some(true) {
            // Not the head: nothing was outstanding for this command.
            return;
        }

        pending.pop_front();
        trace!(target: "procvisor.queue", queue, id = %cmd.id, "queue head finished");

        let next = pending.front().cloned();
        match next {
            Some(next) => {
                let _ = self.tx.send(next);
            }
            None => {
                queues.remove(&queue);
            }
        }
    }

    /// Takes the output channel; the dispatcher consumes ready commands
    /// from it. Yields `None` on a second call.
    pub(crate) fn producer(&self) -> Option<mpsc::UnboundedReceiver<Command>> {
        self.rx.lock().unwrap().take()
    }
}

impl Default for CmdQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn queued(id: &str, queue: &str) -> Command {
        let mut cmd = Command::new(id, "step");
        cmd.args.set("queue", json!(queue));
        cmd
    }

    #[test]
    fn same_queue_emits_one_at_a_time() {
        let q = CmdQueue::new();
        let mut rx = q.producer().unwrap();

        q.push(queued("1", "install"));
        q.push(queued("2", "install"));

        assert_eq!(rx.try_recv().unwrap().id, "1");
        assert!(rx.try_recv().is_err());

        q.notify(&queued("1", "install"));
        assert_eq!(rx.try_recv().unwrap().id, "2");

        q.notify(&queued("2", "install"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn independent_queues_do_not_serialise() {
        let q = CmdQueue::new();
        let mut rx = q.producer().unwrap();

        q.push(queued("a", "one"));
        q.push(queued("b", "two"));

        assert_eq!(rx.try_recv().unwrap().id, "a");
        assert_eq!(rx.try_recv().unwrap().id, "b");
    }

    #[test]
    fn unqueued_commands_pass_straight_through() {
        let q = CmdQueue::new();
        let mut rx = q.producer().unwrap();

        q.push(Command::new("x", "ping"));
        assert_eq!(rx.try_recv().unwrap().id, "x");
    }

    #[test]
    fn notify_with_stale_id_keeps_head() {
        let q = CmdQueue::new();
        let mut rx = q.producer().unwrap();

        q.push(queued("1", "install"));
        q.push(queued("2", "install"));
        let _ = rx.try_recv();

        // A stray notify for a command that is not the head pops nothing
        // and emits nothing.
        q.notify(&queued("2", "install"));
        assert!(rx.try_recv().is_err());

        q.notify(&queued("1", "install"));
        assert_eq!(rx.try_recv().unwrap().id, "2");
    }

    #[test]
    fn producer_is_taken_once() {
        let q = CmdQueue::new();
        assert!(q.producer().is_some());
        assert!(q.producer().is_none());
    }
}
