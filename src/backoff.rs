//! # Exponential backoff for external process restarts.
//!
//! When an external command exits non-zero and still has restart budget
//! left, the runner sleeps between attempts. [`Backoff`] produces that
//! delay sequence: a fixed first delay, multiplied on every subsequent
//! attempt and capped at `max`.

use std::time::Duration;

/// Delay schedule between restart attempts of an external process.
#[derive(Clone, Copy, Debug)]
pub struct Backoff {
    /// Delay before the first restart.
    pub first: Duration,
    /// Upper bound for any delay.
    pub max: Duration,
    /// Multiplier applied to the previous delay.
    pub factor: f64,
}

impl Default for Backoff {
    /// `500ms` first, doubling up to `30s`.
    fn default() -> Self {
        Self {
            first: Duration::from_millis(500),
            max: Duration::from_secs(30),
            factor: 2.0,
        }
    }
}

impl Backoff {
    /// Returns the next delay given the previous one (`None` on the first
    /// restart).
    pub fn next(&self, prev: Option<Duration>) -> Duration {
        match prev {
            None => self.first.min(self.max),
            Some(d) => {
                let next = (d.as_secs_f64() * self.factor).min(self.max.as_secs_f64());
                Duration::from_secs_f64(next)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_and_caps() {
        let b = Backoff {
            first: Duration::from_millis(100),
            max: Duration::from_millis(350),
            factor: 2.0,
        };

        let d1 = b.next(None);
        let d2 = b.next(Some(d1));
        let d3 = b.next(Some(d2));

        assert_eq!(d1, Duration::from_millis(100));
        assert_eq!(d2, Duration::from_millis(200));
        assert_eq!(d3, Duration::from_millis(350));
    }

    #[test]
    fn first_is_capped() {
        let b = Backoff {
            first: Duration::from_secs(10),
            max: Duration::from_secs(1),
            factor: 2.0,
        };
        assert_eq!(b.next(None), Duration::from_secs(1));
    }
}
