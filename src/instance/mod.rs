// SPDX-License-Identifier: MIT
//! Durable instance storage.
//!
//! The instance manifest (`agent.toml` in the data directory) holds the
//! agent's identity, the endpoint URL, agent-level timeout defaults, and the
//! check list. It is read once per processor activation, under an exclusive
//! file lock scoped to the read, and exposed as already-parsed records —
//! read-only to the scheduling core.
//!
//! ```toml
//! agent_id = "host/web-1"
//! endpoint_url = "https://collector.example.com"
//!
//! [metadata]
//! region = "us-east"
//!
//! [timeouts]
//! probe = 30            # agent-level default, seconds
//!
//! [[check]]
//! id = "system.cpu"
//! type = "cpu"
//! delay = 60.0          # seconds; fractional values allowed
//! offset = 0.0
//! jitter = 10.0
//! behavior = "scalar"
//!
//! [check.params]
//! warn_percent = 85.0
//!
//! [check.timeouts]
//! probe = 15
//! ```

use fs2::FileExt;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::checks::{BehaviorType, CheckSpec, CheckTimeouts};
use crate::processor::TimeoutDefaults;

pub const MANIFEST_FILE: &str = "agent.toml";

#[derive(Debug, thiserror::Error)]
pub enum InstanceError {
    #[error("no such instance: {0}")]
    NotFound(PathBuf),
    #[error("failed to read instance manifest: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed instance manifest: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("duplicate check id `{0}`")]
    DuplicateCheckId(String),
    #[error("check `{id}`: {reason}")]
    InvalidCheck { id: String, reason: String },
}

// ─── Manifest wire format ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Manifest {
    agent_id: String,
    endpoint_url: String,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
    #[serde(default)]
    timeouts: TimeoutTable,
    #[serde(default, rename = "check")]
    checks: Vec<CheckTable>,
}

/// Timeout values in whole seconds, all optional.
#[derive(Debug, Default, Deserialize)]
struct TimeoutTable {
    join: Option<u64>,
    probe: Option<u64>,
    alert: Option<u64>,
    retirement: Option<u64>,
}

impl TimeoutTable {
    fn as_defaults(&self) -> TimeoutDefaults {
        TimeoutDefaults {
            join: self.join.map(Duration::from_secs),
            probe: self.probe.map(Duration::from_secs),
            alert: self.alert.map(Duration::from_secs),
            retirement: self.retirement.map(Duration::from_secs),
        }
    }

    fn as_overrides(&self) -> CheckTimeouts {
        CheckTimeouts {
            join: self.join.map(Duration::from_secs),
            probe: self.probe.map(Duration::from_secs),
            alert: self.alert.map(Duration::from_secs),
            retirement: self.retirement.map(Duration::from_secs),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CheckTable {
    id: String,
    #[serde(rename = "type")]
    check_type: String,
    /// Steady-state period, seconds. Fractional values allowed.
    delay: f64,
    #[serde(default)]
    offset: f64,
    #[serde(default)]
    jitter: f64,
    #[serde(default)]
    behavior: BehaviorType,
    #[serde(default)]
    params: HashMap<String, toml::Value>,
    #[serde(default)]
    timeouts: TimeoutTable,
}

// ─── Instance ────────────────────────────────────────────────────────────────

/// The parsed instance: agent identity, endpoint, and check list.
#[derive(Debug)]
pub struct Instance {
    agent_id: String,
    endpoint_url: String,
    metadata: BTreeMap<String, String>,
    timeout_defaults: TimeoutDefaults,
    checks: Vec<CheckSpec>,
}

impl Instance {
    /// Read and validate the manifest at `data_dir/agent.toml`.
    ///
    /// The file is read under an exclusive lock so a concurrent editor
    /// cannot hand us a half-written manifest; the lock is released as soon
    /// as the contents are in memory.
    pub fn open(data_dir: &Path) -> Result<Self, InstanceError> {
        let path = data_dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Err(InstanceError::NotFound(path));
        }

        let mut file = std::fs::File::open(&path)?;
        file.lock_exclusive()?;
        let mut contents = String::new();
        let read = file.read_to_string(&mut contents);
        let _ = fs2::FileExt::unlock(&file);
        read?;

        let manifest: Manifest = toml::from_str(&contents)?;
        Self::from_manifest(manifest)
    }

    fn from_manifest(manifest: Manifest) -> Result<Self, InstanceError> {
        let mut seen = HashSet::new();
        let mut checks = Vec::with_capacity(manifest.checks.len());
        for table in manifest.checks {
            if !seen.insert(table.id.clone()) {
                return Err(InstanceError::DuplicateCheckId(table.id));
            }
            checks.push(check_spec(table)?);
        }
        Ok(Self {
            agent_id: manifest.agent_id,
            endpoint_url: manifest.endpoint_url,
            metadata: manifest.metadata,
            timeout_defaults: manifest.timeouts.as_defaults(),
            checks,
        })
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn timeout_defaults(&self) -> &TimeoutDefaults {
        &self.timeout_defaults
    }

    pub fn list_checks(&self) -> &[CheckSpec] {
        &self.checks
    }
}

fn seconds(id: &str, field: &str, value: f64) -> Result<Duration, InstanceError> {
    if !value.is_finite() || value < 0.0 {
        return Err(InstanceError::InvalidCheck {
            id: id.to_string(),
            reason: format!("`{field}` must be a non-negative number of seconds, got {value}"),
        });
    }
    Ok(Duration::from_secs_f64(value))
}

fn check_spec(table: CheckTable) -> Result<CheckSpec, InstanceError> {
    if table.delay <= 0.0 || !table.delay.is_finite() {
        return Err(InstanceError::InvalidCheck {
            id: table.id,
            reason: format!("`delay` must be a positive number of seconds, got {}", table.delay),
        });
    }
    let delay = Duration::from_secs_f64(table.delay);
    let offset = seconds(&table.id, "offset", table.offset)?;
    let jitter = seconds(&table.id, "jitter", table.jitter)?;

    let params = table
        .params
        .into_iter()
        .map(|(key, value)| {
            let json = serde_json::to_value(value).map_err(|e| InstanceError::InvalidCheck {
                id: table.id.clone(),
                reason: format!("parameter `{key}` is not representable: {e}"),
            })?;
            Ok((key, json))
        })
        .collect::<Result<HashMap<_, _>, InstanceError>>()?;

    Ok(CheckSpec {
        id: table.id,
        check_type: table.check_type,
        params,
        delay,
        offset,
        jitter,
        behavior: table.behavior,
        timeouts: table.timeouts.as_overrides(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
agent_id = "host/web-1"
endpoint_url = "https://collector.example.com"

[metadata]
region = "us-east"

[timeouts]
probe = 30

[[check]]
id = "system.cpu"
type = "cpu"
delay = 60.0
jitter = 10.0

[check.params]
warn_percent = 80.0

[[check]]
id = "system.disk.root"
type = "disk"
delay = 300.0
offset = 15.0
behavior = "aggregate"

[check.params]
mount = "/"

[check.timeouts]
probe = 15
"#;

    fn write_manifest(contents: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), contents).unwrap();
        dir
    }

    #[test]
    fn parses_a_full_manifest() {
        let dir = write_manifest(MANIFEST);
        let instance = Instance::open(dir.path()).unwrap();

        assert_eq!(instance.agent_id(), "host/web-1");
        assert_eq!(instance.endpoint_url(), "https://collector.example.com");
        assert_eq!(instance.metadata()["region"], "us-east");
        assert_eq!(instance.timeout_defaults().probe, Some(Duration::from_secs(30)));

        let checks = instance.list_checks();
        assert_eq!(checks.len(), 2);
        assert_eq!(checks[0].id, "system.cpu");
        assert_eq!(checks[0].delay, Duration::from_secs(60));
        assert_eq!(checks[0].jitter, Duration::from_secs(10));
        assert_eq!(checks[0].param_f64("warn_percent"), Some(80.0));
        assert_eq!(checks[1].behavior, BehaviorType::Aggregate);
        assert_eq!(checks[1].offset, Duration::from_secs(15));
        assert_eq!(checks[1].param_str("mount"), Some("/"));
        assert_eq!(checks[1].timeouts.probe, Some(Duration::from_secs(15)));
        assert_eq!(checks[1].timeouts.join, None);
    }

    #[test]
    fn missing_manifest_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        match Instance::open(dir.path()) {
            Err(InstanceError::NotFound(_)) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_check_ids_are_rejected() {
        let manifest = r#"
agent_id = "a"
endpoint_url = "http://e"

[[check]]
id = "dup"
type = "cpu"
delay = 60.0

[[check]]
id = "dup"
type = "memory"
delay = 60.0
"#;
        let dir = write_manifest(manifest);
        match Instance::open(dir.path()) {
            Err(InstanceError::DuplicateCheckId(id)) => assert_eq!(id, "dup"),
            other => panic!("expected DuplicateCheckId, got {other:?}"),
        }
    }

    #[test]
    fn zero_delay_is_rejected() {
        let manifest = r#"
agent_id = "a"
endpoint_url = "http://e"

[[check]]
id = "bad"
type = "cpu"
delay = 0.0
"#;
        let dir = write_manifest(manifest);
        assert!(matches!(
            Instance::open(dir.path()),
            Err(InstanceError::InvalidCheck { .. })
        ));
    }
}
