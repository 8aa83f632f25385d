// SPDX-License-Identifier: MIT
//! Shared fixtures: a scripted endpoint fake and deterministic check types.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vigild::checks::{Check, CheckContext, CheckError, CheckSpec, Evaluation};
use vigild::evaluator::{CheckOutcome, ResultStream};
use vigild::processor::{Registration, TimeoutDefaults};
use vigild::transport::{Endpoint, TransportError};

// ─── Endpoint fake ───────────────────────────────────────────────────────────

/// Scripted endpoint. Each registration call pops the next scripted response
/// for its operation; an exhausted script means success. Every call is
/// recorded in arrival order as `"update"`, `"create"`, or `"submit:<id>"`.
#[derive(Default)]
pub struct MockEndpoint {
    update_script: Mutex<VecDeque<Result<(), TransportError>>>,
    create_script: Mutex<VecDeque<Result<(), TransportError>>>,
    calls: Mutex<Vec<String>>,
}

impl MockEndpoint {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script_update(&self, response: Result<(), TransportError>) {
        self.update_script.lock().unwrap().push_back(response);
    }

    pub fn script_create(&self, response: Result<(), TransportError>) {
        self.create_script.lock().unwrap().push_back(response);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// The check ids of all recorded evaluation submissions, in order.
    pub fn submissions(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|call| call.strip_prefix("submit:").map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl Endpoint for MockEndpoint {
    async fn register_agent(&self, _registration: &Registration) -> Result<(), TransportError> {
        self.calls.lock().unwrap().push("update".to_string());
        self.update_script.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }

    async fn create_agent(&self, _registration: &Registration) -> Result<(), TransportError> {
        self.calls.lock().unwrap().push("create".to_string());
        self.create_script.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }

    async fn submit_evaluation(
        &self,
        check_id: &str,
        _evaluation: &Evaluation,
    ) -> Result<(), TransportError> {
        self.calls.lock().unwrap().push(format!("submit:{check_id}"));
        Ok(())
    }
}

/// A registration document with no checks, enough for exercising the
/// processor's retry state machine.
pub fn empty_registration(agent_id: &str) -> Registration {
    Registration::build(agent_id, BTreeMap::new(), &[], &TimeoutDefaults::default())
}

// ─── Check fixtures ──────────────────────────────────────────────────────────

/// Always-healthy check that counts its executions and flags finalization.
pub struct SteadyCheck {
    pub runs: Arc<AtomicU32>,
    pub finalized: Arc<AtomicBool>,
}

impl SteadyCheck {
    pub fn new() -> Self {
        Self {
            runs: Arc::new(AtomicU32::new(0)),
            finalized: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Check for SteadyCheck {
    fn execute(&mut self, _context: &mut CheckContext) -> Result<Evaluation, CheckError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(Evaluation::healthy("all good"))
    }

    fn fini(&mut self, _context: &mut CheckContext) {
        self.finalized.store(true, Ordering::SeqCst);
    }
}

/// Always returns an execution error.
pub struct BrokenCheck;

impl Check for BrokenCheck {
    fn execute(&mut self, _context: &mut CheckContext) -> Result<Evaluation, CheckError> {
        Err(CheckError::Execution("wires crossed".to_string()))
    }
}

/// Panics on every execution.
pub struct PanickyCheck;

impl Check for PanickyCheck {
    fn execute(&mut self, _context: &mut CheckContext) -> Result<Evaluation, CheckError> {
        panic!("check blew up");
    }
}

/// Reports the running counter from its context as the summary, then
/// advances it by two. First four summaries: "0", "2", "4", "6".
pub struct CountingCheck;

impl Check for CountingCheck {
    fn init(&mut self) -> CheckContext {
        let mut context = CheckContext::new();
        context.set("current", 0i64);
        context
    }

    fn execute(&mut self, context: &mut CheckContext) -> Result<Evaluation, CheckError> {
        let current = context.get_i64("current").unwrap_or(0);
        context.set("current", current + 2);
        Ok(Evaluation::healthy(current.to_string()))
    }
}

/// Holds a worker thread for `hold` before succeeding.
pub struct SlowCheck {
    pub hold: Duration,
}

impl Check for SlowCheck {
    fn execute(&mut self, _context: &mut CheckContext) -> Result<Evaluation, CheckError> {
        std::thread::sleep(self.hold);
        Ok(Evaluation::healthy("finally"))
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

pub fn spec(id: &str, delay: Duration, offset: Duration) -> CheckSpec {
    let mut spec = CheckSpec::new(id, "test", delay);
    spec.offset = offset;
    spec
}

/// Drain outcomes from the stream until `window` elapses.
pub async fn collect_for(results: &mut ResultStream, window: Duration) -> Vec<CheckOutcome> {
    let deadline = tokio::time::Instant::now() + window;
    let mut outcomes = Vec::new();
    while let Ok(Some(outcome)) = tokio::time::timeout_at(deadline, results.next_result()).await {
        outcomes.push(outcome);
    }
    outcomes
}

/// Collect exactly `n` outcomes, or panic if `window` elapses first.
pub async fn collect_n(results: &mut ResultStream, n: usize, window: Duration) -> Vec<CheckOutcome> {
    let deadline = tokio::time::Instant::now() + window;
    let mut outcomes = Vec::with_capacity(n);
    while outcomes.len() < n {
        match tokio::time::timeout_at(deadline, results.next_result()).await {
            Ok(Some(outcome)) => outcomes.push(outcome),
            Ok(None) => panic!("result stream closed after {} outcomes", outcomes.len()),
            Err(_) => panic!("timed out with {} of {n} outcomes", outcomes.len()),
        }
    }
    outcomes
}
