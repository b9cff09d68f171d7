//! # Durable monotonic message-id counter.
//!
//! Every message fanned out by the dispatcher carries an id from this
//! counter. The value is persisted to a small file on every increment so
//! that ids are never reused across agent restarts; a write failure is
//! logged and swallowed (ids may be skipped after a crash, never reused).

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::warn;

/// File-backed monotonic `u32` counter.
pub struct MidCounter {
    path: PathBuf,
    value: Mutex<u32>,
}

impl MidCounter {
    /// Loads the counter from `path`. A missing or unparsable file starts
    /// the counter at 0.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let value = match fs::read_to_string(&path) {
            Ok(content) => match content.trim().parse::<u32>() {
                Ok(v) => v,
                Err(e) => {
                    warn!(target: "procvisor.mid", path = %path.display(), error = %e,
                          "invalid message-id file, starting at 0");
                    0
                }
            },
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    warn!(target: "procvisor.mid", path = %path.display(), error = %e,
                          "cannot read message-id file, starting at 0");
                }
                0
            }
        };

        Self {
            path,
            value: Mutex::new(value),
        }
    }

    /// Increments the counter, persists it best-effort, and returns the new
    /// value.
    pub fn next(&self) -> u32 {
        let mut value = self.value.lock().unwrap();
        *value = value.wrapping_add(1);
        if let Err(e) = fs::write(&self.path, value.to_string()) {
            warn!(target: "procvisor.mid", path = %self.path.display(), error = %e,
                  "failed to persist message id");
        }
        *value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_starts_at_zero() {
        let dir = tempfile::tempdir().unwrap();
        let counter = MidCounter::load(dir.path().join("mid"));
        assert_eq!(counter.next(), 1);
        assert_eq!(counter.next(), 2);
    }

    #[test]
    fn resumes_from_persisted_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mid");
        fs::write(&path, "42").unwrap();

        let counter = MidCounter::load(&path);
        assert_eq!(counter.next(), 43);

        // A reload continues past everything already issued.
        let counter = MidCounter::load(&path);
        assert_eq!(counter.next(), 44);
    }

    #[test]
    fn tolerates_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mid");
        fs::write(&path, "7\n").unwrap();
        assert_eq!(MidCounter::load(&path).next(), 8);
    }

    #[test]
    fn invalid_content_starts_at_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mid");
        fs::write(&path, "not a number").unwrap();
        assert_eq!(MidCounter::load(&path).next(), 1);
    }
}
