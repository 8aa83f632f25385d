// SPDX-License-Identifier: MIT
//! Registration document — the wire description of an agent and its checks.
//!
//! Built once per registration attempt from the current check list. Each
//! check declares a behavior type and four timeout policies; every timeout
//! falls back through three tiers: explicit per-check value → agent-level
//! default → hardcoded application default.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::checks::{BehaviorType, CheckSpec, CheckTimeouts};

/// Application-default timeout policies (the last fallback tier).
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_ALERT_TIMEOUT: Duration = Duration::from_secs(2 * 60);
pub const DEFAULT_RETIREMENT_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Agent-level timeout defaults (the middle fallback tier), typically loaded
/// from the instance manifest. `None` falls through to the application tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeoutDefaults {
    pub join: Option<Duration>,
    pub probe: Option<Duration>,
    pub alert: Option<Duration>,
    pub retirement: Option<Duration>,
}

/// Resolved timeout policy for one check, in whole seconds on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutPolicy {
    pub join_secs: u64,
    pub probe_secs: u64,
    pub alert_secs: u64,
    pub retirement_secs: u64,
}

impl TimeoutPolicy {
    /// Resolve the three fallback tiers for one check.
    pub fn resolve(overrides: &CheckTimeouts, defaults: &TimeoutDefaults) -> Self {
        fn tier(explicit: Option<Duration>, agent: Option<Duration>, app: Duration) -> u64 {
            explicit.or(agent).unwrap_or(app).as_secs()
        }
        Self {
            join_secs: tier(overrides.join, defaults.join, DEFAULT_JOIN_TIMEOUT),
            probe_secs: tier(overrides.probe, defaults.probe, DEFAULT_PROBE_TIMEOUT),
            alert_secs: tier(overrides.alert, defaults.alert, DEFAULT_ALERT_TIMEOUT),
            retirement_secs: tier(
                overrides.retirement,
                defaults.retirement,
                DEFAULT_RETIREMENT_TIMEOUT,
            ),
        }
    }
}

/// One check's entry in the registration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRegistration {
    pub id: String,
    pub behavior: BehaviorType,
    pub timeouts: TimeoutPolicy,
}

/// The document establishing this agent's identity with the endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub agent_id: String,
    /// Fixed agent type literal for this implementation.
    pub agent_type: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    pub checks: Vec<CheckRegistration>,
}

impl Registration {
    /// Build a registration from the current check list.
    pub fn build(
        agent_id: impl Into<String>,
        metadata: BTreeMap<String, String>,
        checks: &[CheckSpec],
        defaults: &TimeoutDefaults,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_type: "vigild".to_string(),
            metadata,
            checks: checks
                .iter()
                .map(|spec| CheckRegistration {
                    id: spec.id.clone(),
                    behavior: spec.behavior,
                    timeouts: TimeoutPolicy::resolve(&spec.timeouts, defaults),
                })
                .collect(),
        }
    }
}
