//! # Runtime messages emitted by runners.
//!
//! Every line an external process writes (and every log record a builtin
//! emits) becomes a [`Message`]. The level partitions messages: stdout,
//! stderr, statsd samples, structured result payloads. The dispatcher stamps
//! `epoch` and assigns the monotonic `id` as the message passes through its
//! fan-out; until then both are zero.
//!
//! External processes tag a line's level with a `"<level>::"` prefix, e.g.
//! `20::{"status": "ok"}`. Lines without a prefix default to the stream's
//! level (stdout or stderr).

use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::command::Command;

/// Plain stdout line.
pub const LEVEL_STDOUT: u8 = 1;
/// Plain stderr line.
pub const LEVEL_STDERR: u8 = 2;
/// Message destined for a public dashboard.
pub const LEVEL_PUBLIC: u8 = 3;
/// Message destined for an operator.
pub const LEVEL_OPERATOR: u8 = 4;
/// Unclassified message.
pub const LEVEL_UNKNOWN: u8 = 5;
/// Structured (JSON) log record.
pub const LEVEL_STRUCTURED: u8 = 6;
/// Warning.
pub const LEVEL_WARNING: u8 = 7;
/// Operational error.
pub const LEVEL_OPS_ERROR: u8 = 8;
/// Critical error.
pub const LEVEL_CRITICAL: u8 = 9;
/// Statsd sample; routed into the command's aggregator, never to handlers.
pub const LEVEL_STATSD: u8 = 10;
/// Debug message.
pub const LEVEL_DEBUG: u8 = 11;
/// JSON result payload.
pub const LEVEL_RESULT_JSON: u8 = 20;

/// One log/telemetry record produced during a command's execution.
#[derive(Debug, Clone)]
pub struct Message {
    /// Monotonic id, assigned by the dispatcher fan-out (0 before that).
    pub id: u32,
    /// The command this message belongs to.
    pub cmd: Arc<Command>,
    /// Message level (see the `LEVEL_*` constants).
    pub level: u8,
    /// Message body.
    pub message: String,
    /// Nanoseconds since the unix epoch, stamped by the dispatcher.
    pub epoch: i64,
}

impl Message {
    /// Creates an unstamped message.
    pub fn new(cmd: &Arc<Command>, level: u8, message: impl Into<String>) -> Self {
        Self {
            id: 0,
            cmd: Arc::clone(cmd),
            level,
            message: message.into(),
            epoch: 0,
        }
    }

    /// Parses one output line into a message.
    ///
    /// A leading `"<level>::"` selects the level; anything else (including an
    /// out-of-range level) keeps the whole line at `default_level`.
    pub fn parse_line(cmd: &Arc<Command>, line: &str, default_level: u8) -> Self {
        if let Some((prefix, rest)) = line.split_once("::") {
            if !prefix.is_empty() && prefix.bytes().all(|b| b.is_ascii_digit()) {
                if let Ok(level) = prefix.parse::<u8>() {
                    return Self::new(cmd, level, rest);
                }
            }
        }
        Self::new(cmd, default_level, line)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.level, self.cmd.id, self.message)
    }
}

/// Nanoseconds since the unix epoch.
pub(crate) fn epoch_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd() -> Arc<Command> {
        Arc::new(Command::new("m", "echo"))
    }

    #[test]
    fn parses_level_prefix() {
        let msg = Message::parse_line(&cmd(), "20::{\"ok\":true}", LEVEL_STDOUT);
        assert_eq!(msg.level, LEVEL_RESULT_JSON);
        assert_eq!(msg.message, "{\"ok\":true}");
    }

    #[test]
    fn no_prefix_uses_stream_default() {
        let msg = Message::parse_line(&cmd(), "plain output", LEVEL_STDERR);
        assert_eq!(msg.level, LEVEL_STDERR);
        assert_eq!(msg.message, "plain output");
    }

    #[test]
    fn statsd_line() {
        let msg = Message::parse_line(&cmd(), "10::disk.free:512|g", LEVEL_STDOUT);
        assert_eq!(msg.level, LEVEL_STATSD);
        assert_eq!(msg.message, "disk.free:512|g");
    }

    #[test]
    fn out_of_range_prefix_is_kept_verbatim() {
        let msg = Message::parse_line(&cmd(), "999::text", LEVEL_STDOUT);
        assert_eq!(msg.level, LEVEL_STDOUT);
        assert_eq!(msg.message, "999::text");
    }

    #[test]
    fn non_numeric_prefix_is_kept_verbatim() {
        let msg = Message::parse_line(&cmd(), "key::value", LEVEL_STDOUT);
        assert_eq!(msg.level, LEVEL_STDOUT);
        assert_eq!(msg.message, "key::value");
    }
}
