// SPDX-License-Identifier: MIT
//! Built-in system checks: cpu, memory, disk, process.
//!
//! All four sample the host through `sysinfo`. They run on the evaluator's
//! blocking worker pool, so short blocking refreshes are fine here.

use std::ffi::OsString;
use sysinfo::{Disks, ProcessesToUpdate, System};

use super::{Check, CheckContext, CheckError, CheckSpec, Evaluation, Health};

const DEFAULT_WARN_PERCENT: f64 = 85.0;
const DEFAULT_FAIL_PERCENT: f64 = 95.0;

/// Map a usage percentage onto a health state given warn/fail thresholds.
fn grade(percent: f64, warn: f64, fail: f64) -> Health {
    if percent >= fail {
        Health::Failed
    } else if percent >= warn {
        Health::Degraded
    } else {
        Health::Healthy
    }
}

fn thresholds(spec: &CheckSpec) -> (f64, f64) {
    (
        spec.param_f64("warn_percent").unwrap_or(DEFAULT_WARN_PERCENT),
        spec.param_f64("fail_percent").unwrap_or(DEFAULT_FAIL_PERCENT),
    )
}

// ─── CPU ─────────────────────────────────────────────────────────────────────

/// Samples aggregate CPU utilization.
///
/// `sysinfo` computes usage as a delta between two refreshes, so the first
/// invocation primes the sampler and waits the minimum update interval.
pub struct CpuCheck {
    sys: System,
    warn: f64,
    fail: f64,
}

pub fn cpu_factory(spec: &CheckSpec) -> Result<Box<dyn Check>, CheckError> {
    let (warn, fail) = thresholds(spec);
    Ok(Box::new(CpuCheck {
        sys: System::new(),
        warn,
        fail,
    }))
}

impl Check for CpuCheck {
    fn execute(&mut self, context: &mut CheckContext) -> Result<Evaluation, CheckError> {
        if context.get_i64("primed").is_none() {
            self.sys.refresh_cpu_usage();
            std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
            context.set("primed", 1i64);
        }
        self.sys.refresh_cpu_usage();
        let percent = self.sys.global_cpu_usage() as f64;
        Ok(
            Evaluation::new(grade(percent, self.warn, self.fail), format!("cpu {percent:.1}%"))
                .with_metric("cpu_percent", percent),
        )
    }
}

// ─── Memory ──────────────────────────────────────────────────────────────────

/// Samples used physical memory as a percentage of total.
pub struct MemoryCheck {
    sys: System,
    warn: f64,
    fail: f64,
}

pub fn memory_factory(spec: &CheckSpec) -> Result<Box<dyn Check>, CheckError> {
    let (warn, fail) = thresholds(spec);
    Ok(Box::new(MemoryCheck {
        sys: System::new(),
        warn,
        fail,
    }))
}

impl Check for MemoryCheck {
    fn execute(&mut self, _context: &mut CheckContext) -> Result<Evaluation, CheckError> {
        self.sys.refresh_memory();
        let total = self.sys.total_memory();
        if total == 0 {
            return Err(CheckError::Execution("total memory reported as zero".into()));
        }
        let used = self.sys.used_memory();
        let percent = used as f64 / total as f64 * 100.0;
        Ok(Evaluation::new(
            grade(percent, self.warn, self.fail),
            format!("memory {percent:.1}% used"),
        )
        .with_metric("memory_percent", percent)
        .with_metric("memory_used_bytes", used as f64)
        .with_metric("memory_total_bytes", total as f64))
    }
}

// ─── Disk ────────────────────────────────────────────────────────────────────

/// Samples filesystem usage.
///
/// With a `mount` parameter the check watches that single mount point;
/// without one it grades every mounted filesystem and reports the worst.
pub struct DiskCheck {
    mount: Option<String>,
    warn: f64,
    fail: f64,
}

pub fn disk_factory(spec: &CheckSpec) -> Result<Box<dyn Check>, CheckError> {
    let (warn, fail) = thresholds(spec);
    Ok(Box::new(DiskCheck {
        mount: spec.param_str("mount").map(str::to_owned),
        warn,
        fail,
    }))
}

impl Check for DiskCheck {
    fn execute(&mut self, _context: &mut CheckContext) -> Result<Evaluation, CheckError> {
        let disks = Disks::new_with_refreshed_list();

        let mut worst = Health::Healthy;
        let mut worst_line = String::new();
        let mut worst_percent = 0.0f64;
        let mut seen = false;

        for disk in disks.list() {
            let mount = disk.mount_point().to_string_lossy().into_owned();
            if let Some(wanted) = &self.mount {
                if &mount != wanted {
                    continue;
                }
            }
            let total = disk.total_space();
            if total == 0 {
                continue;
            }
            seen = true;
            let used = total.saturating_sub(disk.available_space());
            let percent = used as f64 / total as f64 * 100.0;
            let health = grade(percent, self.warn, self.fail);
            if worst_line.is_empty() || Health::worst(worst, health) != worst {
                worst = Health::worst(worst, health);
                worst_line = format!("disk {mount} {percent:.1}% used");
                worst_percent = percent;
            }
        }

        if !seen {
            return match &self.mount {
                Some(mount) => Err(CheckError::Execution(format!("mount `{mount}` not found"))),
                None => Err(CheckError::Execution("no mounted filesystems found".into())),
            };
        }

        Ok(Evaluation::new(worst, worst_line).with_metric("disk_percent", worst_percent))
    }
}

// ─── Process ─────────────────────────────────────────────────────────────────

/// Verifies that a named process is running.
///
/// Parameters: `name` (required), `min_count` (default 1).
pub struct ProcessCheck {
    sys: System,
    name: OsString,
    min_count: u64,
}

pub fn process_factory(spec: &CheckSpec) -> Result<Box<dyn Check>, CheckError> {
    let name = spec
        .param_str("name")
        .ok_or_else(|| CheckError::bad_param("name", "required for process checks"))?;
    Ok(Box::new(ProcessCheck {
        sys: System::new(),
        name: OsString::from(name),
        min_count: spec.param_u64("min_count").unwrap_or(1),
    }))
}

impl Check for ProcessCheck {
    fn execute(&mut self, _context: &mut CheckContext) -> Result<Evaluation, CheckError> {
        self.sys.refresh_processes(ProcessesToUpdate::All, true);
        let count = self.sys.processes_by_name(&self.name).count() as u64;
        let name = self.name.to_string_lossy();
        let health = if count >= self.min_count {
            Health::Healthy
        } else {
            Health::Failed
        };
        Ok(Evaluation::new(
            health,
            format!("{count} `{name}` process(es) running (want >= {})", self.min_count),
        )
        .with_metric("process_count", count as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn grade_respects_thresholds() {
        assert_eq!(grade(10.0, 85.0, 95.0), Health::Healthy);
        assert_eq!(grade(85.0, 85.0, 95.0), Health::Degraded);
        assert_eq!(grade(99.0, 85.0, 95.0), Health::Failed);
    }

    #[test]
    fn process_factory_requires_name() {
        let spec = CheckSpec::new("sys.proc", "process", Duration::from_secs(60));
        assert!(process_factory(&spec).is_err());
    }

    #[test]
    fn memory_check_produces_metrics() {
        let spec = CheckSpec::new("sys.mem", "memory", Duration::from_secs(60));
        let mut check = memory_factory(&spec).unwrap();
        let mut ctx = check.init();
        let eval = check.execute(&mut ctx).unwrap();
        assert!(eval.metrics.contains_key("memory_percent"));
        assert!(eval.metrics["memory_total_bytes"] > 0.0);
    }
}
