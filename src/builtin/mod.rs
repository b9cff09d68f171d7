//! # Built-in commands.
//!
//! Small host-introspection commands that run in-process, registered through
//! the same [`Registry::register_builtin`] entry point any embedder uses.
//! Results are JSON documents in the result `data`.

use std::fs;

use serde_json::{json, Value};

use crate::command::Command;
use crate::error::JobError;
use crate::registry::Registry;

/// Name of the CPU-info builtin.
pub const GET_CPU_INFO: &str = "get_cpu_info";
/// Name of the NIC-info builtin.
pub const GET_NIC_INFO: &str = "get_nic_info";

/// Registers every builtin into `registry`.
pub fn register_all(registry: &mut Registry) {
    registry.register_builtin(GET_CPU_INFO, |cmd| async move { get_cpu_info(&cmd) });
    registry.register_builtin(GET_NIC_INFO, |cmd| async move { get_nic_info(&cmd) });
}

/// Per-processor info from `/proc/cpuinfo`.
fn get_cpu_info(_cmd: &Command) -> Result<Value, JobError> {
    let content = fs::read_to_string("/proc/cpuinfo")
        .map_err(|e| JobError::failed(format!("cpuinfo: {e}")))?;

    let mut cpus = Vec::new();
    let mut current = json!({});

    for line in content.lines() {
        if line.trim().is_empty() {
            if current.as_object().map(|o| !o.is_empty()) == Some(true) {
                cpus.push(std::mem::replace(&mut current, json!({})));
            }
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());
        match key {
            "processor" | "physical id" | "cpu cores" => {
                if let Ok(n) = value.parse::<i64>() {
                    current[key_name(key)] = json!(n);
                }
            }
            "vendor_id" => current["vendorId"] = json!(value),
            "model name" => current["modelName"] = json!(value),
            "cache size" => current["cacheSize"] = json!(value),
            "cpu MHz" => {
                if let Ok(mhz) = value.parse::<f64>() {
                    current["mhz"] = json!(mhz);
                }
            }
            "flags" => {
                current["flags"] = json!(value.split_whitespace().collect::<Vec<_>>());
            }
            _ => {}
        }
    }
    if current.as_object().map(|o| !o.is_empty()) == Some(true) {
        cpus.push(current);
    }

    Ok(Value::Array(cpus))
}

fn key_name(raw: &str) -> &'static str {
    match raw {
        "processor" => "cpu",
        "physical id" => "physicalId",
        _ => "cores",
    }
}

/// Interface info from `/sys/class/net`.
fn get_nic_info(_cmd: &Command) -> Result<Value, JobError> {
    let entries =
        fs::read_dir("/sys/class/net").map_err(|e| JobError::failed(format!("net: {e}")))?;

    let mut nics = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        let base = entry.path();

        let read = |file: &str| -> Option<String> {
            fs::read_to_string(base.join(file))
                .ok()
                .map(|s| s.trim().to_string())
        };

        nics.push(json!({
            "name": name,
            "hardwareaddr": read("address").unwrap_or_default(),
            "mtu": read("mtu").and_then(|s| s.parse::<i64>().ok()).unwrap_or(0),
            "operstate": read("operstate").unwrap_or_default(),
        }));
    }

    Ok(Value::Array(nics))
}
