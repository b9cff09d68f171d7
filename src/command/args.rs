//! # Command arguments: a loosely typed map with coercing accessors.
//!
//! Controllers send arguments as an arbitrary JSON object. [`Args`] keeps
//! that object as-is and exposes typed accessors that never fail: an absent
//! key or a type mismatch reads as the zero value. Two fields have special
//! meaning to the dispatcher:
//!
//! - `tag` an opaque routing token for result handlers ([`Args::tag`],
//!   [`Args::set_tag`]).
//! - `queue` the serialisation queue name ([`Args::queue`]); absent means
//!   "no queue".

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

const TAG_KEY: &str = "tag";
const QUEUE_KEY: &str = "queue";

/// Heterogeneous command arguments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Args {
    map: HashMap<String, Value>,
}

impl Args {
    /// Creates an empty argument map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw access to a value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.map.get(key)
    }

    /// Sets a value, replacing any previous one.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.map.insert(key.into(), value);
    }

    /// String value; `""` when absent or not a string.
    pub fn get_string(&self, key: &str) -> String {
        match self.map.get(key) {
            Some(Value::String(s)) => s.clone(),
            _ => String::new(),
        }
    }

    /// Integer value; `0` when absent or not an integer.
    pub fn get_int(&self, key: &str) -> i64 {
        self.map.get(key).and_then(Value::as_i64).unwrap_or(0)
    }

    /// Float value; `0.0` when absent or not a number.
    pub fn get_float(&self, key: &str) -> f64 {
        self.map.get(key).and_then(Value::as_f64).unwrap_or(0.0)
    }

    /// Integer array; empty when absent. Non-integer elements are skipped.
    pub fn get_int_array(&self, key: &str) -> Vec<i64> {
        match self.map.get(key) {
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_i64).collect(),
            _ => Vec::new(),
        }
    }

    /// The routing tag; `""` when unset.
    pub fn tag(&self) -> String {
        self.get_string(TAG_KEY)
    }

    /// Sets the routing tag.
    pub fn set_tag(&mut self, tag: impl Into<String>) {
        self.map.insert(TAG_KEY.into(), Value::String(tag.into()));
    }

    /// The serialisation queue name; `None` when unset or empty.
    pub fn queue(&self) -> Option<String> {
        let queue = self.get_string(QUEUE_KEY);
        if queue.is_empty() {
            None
        } else {
            Some(queue)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn absent_keys_read_as_zero_values() {
        let args = Args::new();
        assert_eq!(args.get_string("name"), "");
        assert_eq!(args.get_int("count"), 0);
        assert_eq!(args.get_float("ratio"), 0.0);
        assert!(args.get_int_array("levels").is_empty());
        assert_eq!(args.tag(), "");
        assert!(args.queue().is_none());
    }

    #[test]
    fn type_mismatch_reads_as_zero_value() {
        let mut args = Args::new();
        args.set("count", json!("not a number"));
        args.set("name", json!(7));

        assert_eq!(args.get_int("count"), 0);
        assert_eq!(args.get_string("name"), "");
    }

    #[test]
    fn typed_accessors() {
        let mut args = Args::new();
        args.set("name", json!("redis"));
        args.set("seconds", json!(60));
        args.set("loglevels", json!([1, 2, "x", 3]));

        assert_eq!(args.get_string("name"), "redis");
        assert_eq!(args.get_int("seconds"), 60);
        assert_eq!(args.get_int_array("loglevels"), vec![1, 2, 3]);
    }

    #[test]
    fn tag_round_trip() {
        let mut args = Args::new();
        args.set_tag("controller-7");
        assert_eq!(args.tag(), "controller-7");
    }

    #[test]
    fn queue_empty_means_none() {
        let mut args = Args::new();
        args.set("queue", json!(""));
        assert!(args.queue().is_none());

        args.set("queue", json!("install"));
        assert_eq!(args.queue().as_deref(), Some("install"));
    }

    #[test]
    fn deserializes_from_object() {
        let args: Args = serde_json::from_str(r#"{"domain":"net","seconds":3}"#).unwrap();
        assert_eq!(args.get_string("domain"), "net");
        assert_eq!(args.get_int("seconds"), 3);
    }
}
