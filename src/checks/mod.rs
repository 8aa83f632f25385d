// SPDX-License-Identifier: MIT
//! Check contract and built-in check implementations.
//!
//! A check is a unit of monitoring logic with the capability set
//! `{init, execute, fini}`. `init` produces the check's private [`CheckContext`]
//! — a key/value bag the check reads and writes across invocations (e.g. the
//! previous counter sample for computing a rate). `execute` produces one
//! [`Evaluation`]; any error or panic it raises is caught by the evaluator and
//! converted into a failure outcome, so check authors cannot crash the agent.
//!
//! Check types are resolved through a [`CheckRegistry`] — a plain map from
//! type name to factory function, populated at startup.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

pub mod builtin;

pub use builtin::{CpuCheck, DiskCheck, MemoryCheck, ProcessCheck};

// ─── Health ──────────────────────────────────────────────────────────────────

/// Health state reported by one check evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    /// The monitored resource is operating normally.
    Healthy,
    /// Functional but degraded (e.g. above a warning threshold).
    Degraded,
    /// The monitored resource is unavailable or past its failure threshold.
    Failed,
    /// The check ran but could not determine a state.
    Unknown,
}

impl Health {
    /// Returns the worse (higher-severity) of two states.
    pub fn worst(a: Health, b: Health) -> Health {
        match (&a, &b) {
            (Health::Failed, _) | (_, Health::Failed) => Health::Failed,
            (Health::Unknown, _) | (_, Health::Unknown) => Health::Unknown,
            (Health::Degraded, _) | (_, Health::Degraded) => Health::Degraded,
            _ => Health::Healthy,
        }
    }
}

impl std::fmt::Display for Health {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Health::Healthy => write!(f, "healthy"),
            Health::Degraded => write!(f, "degraded"),
            Health::Failed => write!(f, "failed"),
            Health::Unknown => write!(f, "unknown"),
        }
    }
}

// ─── Evaluation ──────────────────────────────────────────────────────────────

/// The structured result of one check execution.
///
/// Immutable once constructed; consumed exactly once by the processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    /// Human-readable one-line summary of what the check observed.
    pub summary: String,
    /// Health state of the monitored resource.
    pub health: Health,
    /// Optional numeric metrics keyed by metric name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, f64>,
    /// When the evaluation was produced.
    pub timestamp: DateTime<Utc>,
}

impl Evaluation {
    pub fn new(health: Health, summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            health,
            metrics: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn healthy(summary: impl Into<String>) -> Self {
        Self::new(Health::Healthy, summary)
    }

    pub fn degraded(summary: impl Into<String>) -> Self {
        Self::new(Health::Degraded, summary)
    }

    pub fn failed(summary: impl Into<String>) -> Self {
        Self::new(Health::Failed, summary)
    }

    pub fn unknown(summary: impl Into<String>) -> Self {
        Self::new(Health::Unknown, summary)
    }

    /// Attach a numeric metric.
    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }
}

// ─── Check errors ────────────────────────────────────────────────────────────

/// Errors raised by check instantiation or execution.
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    /// No factory registered for the requested check type.
    #[error("unknown check type `{0}`")]
    UnknownType(String),
    /// A required check parameter is absent or malformed.
    #[error("check parameter `{key}`: {reason}")]
    BadParam { key: String, reason: String },
    /// The check body reported a failure.
    #[error("{0}")]
    Execution(String),
    /// The check body panicked; the panic was caught by the evaluator.
    #[error("check panicked: {0}")]
    Panicked(String),
}

impl CheckError {
    pub fn bad_param(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BadParam {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

// ─── CheckContext ────────────────────────────────────────────────────────────

/// Opaque per-check key/value state threaded through successive invocations.
///
/// Exactly one invocation of a given check accesses its context at a time;
/// the evaluator's dispatch discipline enforces this.
#[derive(Debug, Clone, Default)]
pub struct CheckContext {
    values: HashMap<String, serde_json::Value>,
}

impl CheckContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.values.get(key).and_then(|v| v.as_i64())
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.values.get(key).and_then(|v| v.as_f64())
    }
}

// ─── Check trait ─────────────────────────────────────────────────────────────

/// The capability contract every check type implements.
///
/// `init` and `fini` must not fail in normal operation; any error escaping
/// `execute` becomes a failure outcome and does not halt future scheduling
/// of the check.
pub trait Check: Send {
    /// Produce the initial context for this check. Called once per agent run.
    fn init(&mut self) -> CheckContext {
        CheckContext::new()
    }

    /// Run the check once and produce an evaluation.
    fn execute(&mut self, context: &mut CheckContext) -> Result<Evaluation, CheckError>;

    /// Release any resources held by the check. Called once at teardown.
    fn fini(&mut self, context: &mut CheckContext) {
        let _ = context;
    }
}

// ─── CheckSpec ───────────────────────────────────────────────────────────────

/// Declared semantic contract under which the endpoint interprets a check's
/// evaluations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorType {
    #[default]
    Scalar,
    Aggregate,
}

/// Per-check timeout overrides (seconds-level granularity on the wire).
/// `None` falls back to the agent-level default, then the application default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckTimeouts {
    pub join: Option<Duration>,
    pub probe: Option<Duration>,
    pub alert: Option<Duration>,
    pub retirement: Option<Duration>,
}

/// Immutable configuration record for one check, loaded at startup.
#[derive(Debug, Clone)]
pub struct CheckSpec {
    /// Hierarchical identifier, unique within the agent (e.g. `"system.cpu"`).
    pub id: String,
    /// Check type name resolved through the [`CheckRegistry`].
    pub check_type: String,
    /// Check-specific parameters (opaque key/value bag).
    pub params: HashMap<String, serde_json::Value>,
    /// Steady-state period between firings.
    pub delay: Duration,
    /// Initial phase shift before the first firing.
    pub offset: Duration,
    /// Maximum additional random phase shift applied to the first firing only.
    pub jitter: Duration,
    /// Declared behavior type, forwarded in the registration document.
    pub behavior: BehaviorType,
    /// Per-check timeout overrides.
    pub timeouts: CheckTimeouts,
}

impl CheckSpec {
    pub fn new(id: impl Into<String>, check_type: impl Into<String>, delay: Duration) -> Self {
        Self {
            id: id.into(),
            check_type: check_type.into(),
            params: HashMap::new(),
            delay,
            offset: Duration::ZERO,
            jitter: Duration::ZERO,
            behavior: BehaviorType::Scalar,
            timeouts: CheckTimeouts::default(),
        }
    }

    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.params.get(key).and_then(|v| v.as_f64())
    }

    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.params.get(key).and_then(|v| v.as_u64())
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// Factory signature for instantiating a check from its spec.
pub type CheckFactory = fn(&CheckSpec) -> Result<Box<dyn Check>, CheckError>;

/// Startup-time registration table mapping check type names to factories.
///
/// Replaces dynamic plugin discovery: every check type the agent supports is
/// registered here before the supervisor starts.
pub struct CheckRegistry {
    factories: HashMap<String, CheckFactory>,
}

impl CheckRegistry {
    /// An empty registry. Mostly useful in tests.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry pre-populated with the built-in system checks.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("cpu", builtin::cpu_factory);
        registry.register("memory", builtin::memory_factory);
        registry.register("disk", builtin::disk_factory);
        registry.register("process", builtin::process_factory);
        registry
    }

    pub fn register(&mut self, type_name: impl Into<String>, factory: CheckFactory) {
        self.factories.insert(type_name.into(), factory);
    }

    /// Instantiate a check for the given spec.
    pub fn instantiate(&self, spec: &CheckSpec) -> Result<Box<dyn Check>, CheckError> {
        match self.factories.get(&spec.check_type) {
            Some(factory) => factory(spec),
            None => Err(CheckError::UnknownType(spec.check_type.clone())),
        }
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }
}

impl Default for CheckRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
