//! # Per-command statistics aggregation.
//!
//! Each admitted command gets its own [`Statsd`] aggregator. Runners feed it
//! statsd-wire samples (`key:value|op`); the dispatcher's metering adds
//! built-in gauges. Every `interval` the aggregator snapshots its buffer
//! into a [`Stats`] record, hands it to the flush hook, and resets.
//!
//! ## Rules
//! - `gauge` is replace-on-write; `average` is a running mean since the
//!   last flush.
//! - Empty buffers are not flushed.
//! - `stop()` is idempotent and does **not** perform a final flush.
//! - A zero interval makes the aggregator inert (no flush task at all).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// One flushed snapshot of a command's metrics.
///
/// Metric keys are fully qualified: `"{prefix}.{key}"`.
#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    /// Aggregator prefix (`{gid}.{nid}.{name}.{domain}.{instance}`).
    pub prefix: String,
    /// Fully qualified metric name → value.
    pub metrics: HashMap<String, f64>,
}

/// Callback receiving each flushed snapshot.
pub type FlushHook = Arc<dyn Fn(Stats) + Send + Sync>;

enum Sample {
    Gauge(f64),
    Average { sum: f64, count: u64 },
}

impl Sample {
    fn value(&self) -> f64 {
        match self {
            Sample::Gauge(v) => *v,
            Sample::Average { sum, count } => {
                if *count == 0 {
                    0.0
                } else {
                    sum / *count as f64
                }
            }
        }
    }
}

/// Rolling per-command aggregator with interval flush.
pub struct Statsd {
    prefix: String,
    interval: Duration,
    on_flush: FlushHook,
    buffer: Mutex<HashMap<String, Sample>>,
    token: CancellationToken,
}

impl Statsd {
    /// Creates an aggregator. Call [`Statsd::run`] to start the flush loop.
    pub fn new(prefix: impl Into<String>, interval: Duration, on_flush: FlushHook) -> Self {
        Self {
            prefix: prefix.into(),
            interval,
            on_flush,
            buffer: Mutex::new(HashMap::new()),
            token: CancellationToken::new(),
        }
    }

    /// The aggregator prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Replace-on-write metric.
    pub fn gauge(&self, key: &str, value: f64) {
        let mut buffer = self.buffer.lock().unwrap();
        buffer.insert(key.to_string(), Sample::Gauge(value));
    }

    /// Running mean since the last flush.
    pub fn average(&self, key: &str, value: f64) {
        let mut buffer = self.buffer.lock().unwrap();
        let sample = buffer
            .entry(key.to_string())
            .or_insert(Sample::Average { sum: 0.0, count: 0 });
        if let Sample::Average { sum, count } = sample {
            *sum += value;
            *count += 1;
        } else {
            // A gauge under the same key is overtaken by the average.
            *sample = Sample::Average { sum: value, count: 1 };
        }
    }

    /// Parses one statsd-wire sample (`key:value|op`) and routes it.
    ///
    /// Op `g` is a gauge; every other op aggregates as an average.
    /// Unparsable samples are dropped.
    pub fn feed(&self, sample: &str) {
        let Some((key, rest)) = sample.split_once(':') else {
            trace!(target: "procvisor.stats", sample, "dropping malformed sample");
            return;
        };
        let (raw_value, op) = match rest.split_once('|') {
            Some((v, op)) => (v, op.trim()),
            None => (rest, ""),
        };
        let Ok(value) = raw_value.trim().parse::<f64>() else {
            trace!(target: "procvisor.stats", sample, "dropping non-numeric sample");
            return;
        };

        match op {
            "g" => self.gauge(key.trim(), value),
            _ => self.average(key.trim(), value),
        }
    }

    /// Starts the flush loop. A zero interval leaves the aggregator inert.
    pub fn run(self: Arc<Self>) {
        if self.interval.is_zero() {
            return;
        }

        tokio::spawn(async move {
            let mut tick = time::interval(self.interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick of `interval` completes immediately.
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = self.token.cancelled() => break,
                    _ = tick.tick() => self.flush_now(),
                }
            }
        });
    }

    /// Stops the flush loop without a final flush. Idempotent.
    pub fn stop(&self) {
        self.token.cancel();
    }

    fn flush_now(&self) {
        let metrics: HashMap<String, f64> = {
            let mut buffer = self.buffer.lock().unwrap();
            if buffer.is_empty() {
                return;
            }
            buffer
                .drain()
                .map(|(key, sample)| (format!("{}.{}", self.prefix, key), sample.value()))
                .collect()
        };

        (self.on_flush)(Stats {
            prefix: self.prefix.clone(),
            metrics,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector() -> (FlushHook, Arc<Mutex<Vec<Stats>>>) {
        let flushed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&flushed);
        let hook: FlushHook = Arc::new(move |stats| sink.lock().unwrap().push(stats));
        (hook, flushed)
    }

    #[test]
    fn gauge_replaces_on_write() {
        let (hook, flushed) = collector();
        let statsd = Statsd::new("p", Duration::from_secs(60), hook);

        statsd.gauge("cpu", 10.0);
        statsd.gauge("cpu", 30.0);
        statsd.flush_now();

        let stats = &flushed.lock().unwrap()[0];
        assert_eq!(stats.metrics["p.cpu"], 30.0);
    }

    #[test]
    fn average_is_running_mean() {
        let (hook, flushed) = collector();
        let statsd = Statsd::new("p", Duration::from_secs(60), hook);

        statsd.average("lat", 10.0);
        statsd.average("lat", 20.0);
        statsd.average("lat", 60.0);
        statsd.flush_now();

        let stats = &flushed.lock().unwrap()[0];
        assert_eq!(stats.metrics["p.lat"], 30.0);
    }

    #[test]
    fn feed_routes_by_op() {
        let (hook, flushed) = collector();
        let statsd = Statsd::new("1.2.job.net.eth0", Duration::from_secs(60), hook);

        statsd.feed("free:512|g");
        statsd.feed("free:100|g");
        statsd.feed("hits:1|c");
        statsd.feed("hits:3|c");
        statsd.feed("garbage");
        statsd.feed("bad:value|c");
        statsd.flush_now();

        let stats = &flushed.lock().unwrap()[0];
        assert_eq!(stats.prefix, "1.2.job.net.eth0");
        assert_eq!(stats.metrics["1.2.job.net.eth0.free"], 100.0);
        assert_eq!(stats.metrics["1.2.job.net.eth0.hits"], 2.0);
        assert_eq!(stats.metrics.len(), 2);
    }

    #[test]
    fn flush_resets_the_buffer() {
        let (hook, flushed) = collector();
        let statsd = Statsd::new("p", Duration::from_secs(60), hook);

        statsd.gauge("cpu", 1.0);
        statsd.flush_now();
        statsd.flush_now();

        assert_eq!(flushed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn interval_flush_and_stop() {
        let (hook, flushed) = collector();
        let statsd = Arc::new(Statsd::new("p", Duration::from_millis(50), hook));
        Arc::clone(&statsd).run();

        statsd.gauge("cpu", 5.0);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!flushed.lock().unwrap().is_empty());

        statsd.stop();
        statsd.stop(); // idempotent
        // Let any flush already past the select settle before counting.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let seen = flushed.lock().unwrap().len();
        statsd.gauge("cpu", 6.0);
        tokio::time::sleep(Duration::from_millis(200)).await;
        // no flush after stop, and no final flush of the pending gauge
        assert_eq!(flushed.lock().unwrap().len(), seen);
    }

    #[tokio::test]
    async fn zero_interval_is_inert() {
        let (hook, flushed) = collector();
        let statsd = Arc::new(Statsd::new("p", Duration::ZERO, hook));
        Arc::clone(&statsd).run();

        statsd.gauge("cpu", 5.0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(flushed.lock().unwrap().is_empty());
    }
}
