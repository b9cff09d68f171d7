//! # Command: the inbound unit of work.
//!
//! A [`Command`] is parsed once at ingress and never mutated afterwards.
//! `name` selects the runner factory, `args` carries the loosely typed
//! argument map, and `data` is an opaque payload delivered to the runner's
//! standard input.

mod args;

pub use args::Args;

use std::fmt;

use serde::{Deserialize, Serialize};

/// An immutable request record describing one unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    /// Unique id of this running instance.
    pub id: String,
    /// Grid id of the submitting controller.
    #[serde(default)]
    pub gid: i64,
    /// Node id this command targets.
    #[serde(default)]
    pub nid: i64,
    /// Runner kind, resolved through the factory registry.
    pub name: String,
    /// Argument map.
    #[serde(default)]
    pub args: Args,
    /// Opaque payload piped to the runner's standard input.
    #[serde(default)]
    pub data: String,
    /// Roles this command is addressed to (transport concern, kept verbatim).
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Command {
    /// Creates a command with the given id and runner name and empty
    /// arguments.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            gid: 0,
            nid: 0,
            name: name.into(),
            args: Args::new(),
            data: String::new(),
            roles: Vec::new(),
        }
    }

    /// Parses a command from its JSON wire form.
    ///
    /// A missing `args` becomes an empty map; unknown top-level fields are
    /// ignored.
    pub fn parse(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}# {} {})",
            self.id,
            self.name,
            self.args.get_string("name")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_wire_form() {
        let raw = br#"{
            "id": "job-1",
            "gid": 1,
            "nid": 7,
            "name": "execute",
            "args": {"name": "ls", "queue": "fs"},
            "data": "",
            "roles": ["node"]
        }"#;

        let cmd = Command::parse(raw).unwrap();
        assert_eq!(cmd.id, "job-1");
        assert_eq!(cmd.gid, 1);
        assert_eq!(cmd.nid, 7);
        assert_eq!(cmd.name, "execute");
        assert_eq!(cmd.args.get_string("name"), "ls");
        assert_eq!(cmd.args.queue().as_deref(), Some("fs"));
        assert_eq!(cmd.roles, vec!["node".to_string()]);
    }

    #[test]
    fn missing_args_becomes_empty() {
        let cmd = Command::parse(br#"{"id":"a","name":"ping"}"#).unwrap();
        assert_eq!(cmd.args.get_string("anything"), "");
        assert_eq!(cmd.data, "");
        assert!(cmd.roles.is_empty());
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let cmd = Command::parse(br#"{"id":"a","name":"ping","future_field":42}"#).unwrap();
        assert_eq!(cmd.name, "ping");
    }

    #[test]
    fn display_shows_id_and_name() {
        let mut cmd = Command::new("a", "execute");
        cmd.args.set("name", serde_json::json!("ls"));
        assert_eq!(cmd.to_string(), "(a# execute ls)");
    }
}
