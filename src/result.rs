//! # Terminal job results.
//!
//! Every admitted command produces exactly one [`JobResult`]. The dispatcher
//! never inspects `state`; classification exists for the transport layer and
//! for handlers.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::command::{Args, Command};

/// Terminal classification of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// The job ran to completion successfully.
    #[serde(rename = "SUCCESS")]
    Success,
    /// The job failed; human-readable text in `data`.
    #[serde(rename = "ERROR")]
    Error,
    /// No factory is registered for the command name.
    #[serde(rename = "UNKNOWN_CMD")]
    UnknownCmd,
    /// A job with the same id is already running.
    #[serde(rename = "DUPLICATE_ID")]
    DuplicateId,
    /// The job was explicitly terminated.
    #[serde(rename = "KILLED")]
    Killed,
    /// The job exceeded its runner-enforced time bound.
    #[serde(rename = "TIMEOUT")]
    Timeout,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Success => "SUCCESS",
            JobState::Error => "ERROR",
            JobState::UnknownCmd => "UNKNOWN_CMD",
            JobState::DuplicateId => "DUPLICATE_ID",
            JobState::Killed => "KILLED",
            JobState::Timeout => "TIMEOUT",
        };
        f.write_str(s)
    }
}

/// The terminal record of one command invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    /// Command id this result belongs to.
    pub id: String,
    /// Grid id, copied from the command.
    pub gid: i64,
    /// Node id, copied from the command.
    pub nid: i64,
    /// Command name.
    pub cmd: String,
    /// Argument map, copied so the transport can route by `tag`.
    pub args: Args,
    /// Terminal state.
    pub state: JobState,
    /// Payload level (see the message `LEVEL_*` constants).
    pub level: u8,
    /// Result payload (JSON for builtins, error text on failure).
    pub data: String,
    /// Unix seconds at which execution started.
    #[serde(rename = "starttime")]
    pub start_time: i64,
    /// Wall-clock execution time in seconds.
    pub time: i64,
    /// Captured (stdout, stderr) of external processes.
    pub streams: (String, String),
}

impl JobResult {
    /// Creates a bare result for `cmd` with the given state and empty
    /// payload.
    pub fn basic(cmd: &Command, state: JobState) -> Self {
        Self {
            id: cmd.id.clone(),
            gid: cmd.gid,
            nid: cmd.nid,
            cmd: cmd.name.clone(),
            args: cmd.args.clone(),
            state,
            level: 0,
            data: String::new(),
            start_time: unix_now(),
            time: 0,
            streams: (String::new(), String::new()),
        }
    }
}

/// Seconds since the unix epoch.
pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
