//! # Process metering via procfs.
//!
//! Best-effort samples of a live child process, read from `/proc/<pid>`.
//! Everything here returns `Option`: a vanished process or an unreadable
//! file is not an error, the metric is simply skipped for that tick.

use std::fs;

/// Kernel clock ticks per second (`CLK_TCK`); fixed at 100 on linux.
const CLK_TCK: f64 = 100.0;

/// Memory usage of a process, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MemSample {
    /// Resident set size.
    pub rss: u64,
    /// Virtual memory size.
    pub vms: u64,
    /// Swapped-out size.
    pub swap: u64,
}

/// CPU usage of `pid` as a percentage of one core, averaged over the
/// process lifetime.
pub fn cpu_percent(pid: u32) -> Option<f64> {
    let stat = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // Skip past the parenthesised comm field; it may contain spaces.
    let rest = stat.rsplit_once(')').map(|(_, r)| r)?;
    let fields: Vec<&str> = rest.split_whitespace().collect();

    // Offsets relative to the field after comm: state is 0, so
    // utime(14) -> 11, stime(15) -> 12, starttime(22) -> 19.
    let utime: f64 = fields.get(11)?.parse().ok()?;
    let stime: f64 = fields.get(12)?.parse().ok()?;
    let start_ticks: f64 = fields.get(19)?.parse().ok()?;

    let uptime: f64 = fs::read_to_string("/proc/uptime")
        .ok()?
        .split_whitespace()
        .next()?
        .parse()
        .ok()?;

    let elapsed = uptime - start_ticks / CLK_TCK;
    if elapsed <= 0.0 {
        return Some(0.0);
    }
    Some((utime + stime) / CLK_TCK / elapsed * 100.0)
}

/// Memory usage of `pid`, from `/proc/<pid>/status`.
pub fn memory(pid: u32) -> Option<MemSample> {
    let status = fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
    let mut sample = MemSample::default();
    let mut seen_rss = false;

    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            sample.rss = parse_kb(rest)?;
            seen_rss = true;
        } else if let Some(rest) = line.strip_prefix("VmSize:") {
            sample.vms = parse_kb(rest)?;
        } else if let Some(rest) = line.strip_prefix("VmSwap:") {
            sample.swap = parse_kb(rest)?;
        }
    }

    // Kernel threads carry no Vm* fields at all.
    if !seen_rss {
        return None;
    }
    Some(sample)
}

fn parse_kb(rest: &str) -> Option<u64> {
    let kb: u64 = rest.trim().trim_end_matches("kB").trim().parse().ok()?;
    Some(kb * 1024)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_own_process() {
        let pid = std::process::id();

        let mem = memory(pid).expect("own process is always readable");
        assert!(mem.rss > 0);
        assert!(mem.vms >= mem.rss);

        let cpu = cpu_percent(pid).expect("own process is always readable");
        assert!(cpu >= 0.0);
    }

    #[test]
    fn vanished_pid_reads_as_none() {
        // Max pid on linux is bounded well below u32::MAX.
        assert!(cpu_percent(u32::MAX).is_none());
        assert!(memory(u32::MAX).is_none());
    }

    #[test]
    fn parses_kb_suffix() {
        assert_eq!(parse_kb("  1024 kB"), Some(1024 * 1024));
        assert_eq!(parse_kb("0 kB"), Some(0));
        assert_eq!(parse_kb("garbage"), None);
    }
}
