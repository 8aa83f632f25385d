// SPDX-License-Identifier: MIT
//! Check execution engine.
//!
//! The evaluator turns "this check is due" into "here is its result" while
//! keeping the control loop clean: check bodies run on a bounded blocking
//! worker pool, errors and panics become [`CheckOutcome::Failure`] results,
//! and a broken check never stalls or crashes the others.
//!
//! Dispatch discipline:
//! - worker-pool submission applies backpressure (waits) when the pool is
//!   saturated — exhaustion stays visible instead of lossy, and the wait is
//!   interrupted by shutdown;
//! - the result queue is bounded and lossy (drop + warn) — a slow consumer
//!   never blocks check scheduling;
//! - a firing for a check whose previous run is still in flight is coalesced
//!   (skipped, logged at debug), which also keeps the per-check context
//!   single-threaded.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

use crate::checks::{Check, CheckContext, CheckError, CheckSpec, Evaluation};
use crate::scheduler::{Scheduler, SchedulerError};
use crate::shutdown::ShutdownSignal;

/// How long teardown waits for in-flight executions to come home before
/// giving up on their contexts. Cancellation is cooperative: a body already
/// running on a worker thread is not force-killed.
const TEARDOWN_DRAIN: Duration = Duration::from_secs(2);

/// Typed result of one check execution.
#[derive(Debug)]
pub enum CheckOutcome {
    Success {
        check_id: String,
        evaluation: Evaluation,
    },
    Failure {
        check_id: String,
        error: CheckError,
    },
}

impl CheckOutcome {
    pub fn check_id(&self) -> &str {
        match self {
            CheckOutcome::Success { check_id, .. } => check_id,
            CheckOutcome::Failure { check_id, .. } => check_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CheckOutcome::Success { .. })
    }
}

/// A check spec bound to its instantiated check object and rolling context.
///
/// Owned exclusively by the evaluator for the lifetime of one agent run;
/// the check's `fini` hook runs when the evaluator tears down.
pub struct ScheduledCheck {
    pub spec: CheckSpec,
    body: CheckBody,
}

struct CheckBody {
    check: Box<dyn Check>,
    context: CheckContext,
}

impl ScheduledCheck {
    /// Bind a spec to a check instance, invoking the check's `init` hook to
    /// produce its context.
    pub fn new(spec: CheckSpec, mut check: Box<dyn Check>) -> Self {
        let context = check.init();
        Self {
            spec,
            body: CheckBody { check, context },
        }
    }
}

/// One execution coming back from the worker pool. The body travels with the
/// completion so the evaluator can return it to the check's slot.
struct Completion {
    check_id: String,
    body: CheckBody,
    result: Result<Evaluation, CheckError>,
}

struct Slot {
    /// `None` while an execution of this check is in flight.
    body: Option<CheckBody>,
}

/// Consumer half of the evaluator's result queue.
pub struct ResultStream {
    rx: mpsc::Receiver<CheckOutcome>,
}

impl ResultStream {
    /// Yield the next completed result, in completion order (not firing
    /// order — execution durations vary). `None` once the evaluator is gone.
    pub async fn next_result(&mut self) -> Option<CheckOutcome> {
        self.rx.recv().await
    }
}

enum Event {
    Shutdown,
    Due(Option<String>),
    Done(Option<Completion>),
}

pub struct Evaluator {
    scheduler: Scheduler,
    slots: HashMap<String, Slot>,
    pool: Arc<Semaphore>,
    results_tx: mpsc::Sender<CheckOutcome>,
    completions_tx: mpsc::Sender<Completion>,
    completions_rx: mpsc::Receiver<Completion>,
}

impl Evaluator {
    /// Create an evaluator with a worker pool of `pool_size` threads, a due
    /// queue of `due_depth` firings, and a result queue of `result_depth`
    /// outcomes.
    pub fn new(pool_size: usize, due_depth: usize, result_depth: usize) -> (Self, ResultStream) {
        let (results_tx, results_rx) = mpsc::channel(result_depth);
        // Sized so every in-flight execution can complete without blocking;
        // the pool bound guarantees at most `pool_size` are outstanding.
        let (completions_tx, completions_rx) = mpsc::channel(pool_size.max(1));
        (
            Self {
                scheduler: Scheduler::new(due_depth),
                slots: HashMap::new(),
                pool: Arc::new(Semaphore::new(pool_size.max(1))),
                results_tx,
                completions_tx,
                completions_rx,
            },
            ResultStream { rx: results_rx },
        )
    }

    /// Register every check with the internal scheduler using its
    /// delay/offset/jitter. Duplicate check ids surface synchronously.
    pub fn start(&mut self, checks: Vec<ScheduledCheck>) -> Result<(), SchedulerError> {
        for scheduled in checks {
            let ScheduledCheck { spec, body } = scheduled;
            self.scheduler
                .schedule(spec.id.clone(), spec.delay, spec.offset, spec.jitter)?;
            self.slots.insert(spec.id, Slot { body: Some(body) });
        }
        info!(checks = self.slots.len(), "evaluator started");
        Ok(())
    }

    /// Main loop: wait concurrently on the shutdown signal, the next due
    /// firing, and in-flight completions. Returns once shutdown is signaled,
    /// after cancelling timers and draining in-flight work (bounded).
    pub async fn run_until_signaled(&mut self, shutdown: ShutdownSignal) {
        loop {
            let event = tokio::select! {
                _ = shutdown.signaled() => Event::Shutdown,
                due = self.scheduler.next_due() => Event::Due(due),
                done = self.completions_rx.recv() => Event::Done(done),
            };
            match event {
                Event::Shutdown => break,
                Event::Due(Some(check_id)) => self.dispatch(check_id, &shutdown).await,
                Event::Done(Some(completion)) => self.complete(completion),
                // Channels closing from under us means teardown either way.
                Event::Due(None) | Event::Done(None) => break,
            }
        }
        self.teardown().await;
    }

    /// Submit one due check to the worker pool.
    ///
    /// Waits for a permit when the pool is saturated (backpressure); the
    /// wait ends early on shutdown, returning the body to its slot. The
    /// check body and its context leave the slot for the duration of the
    /// run, which is what coalesces re-firings of a check still in flight.
    async fn dispatch(&mut self, check_id: String, shutdown: &ShutdownSignal) {
        let Some(slot) = self.slots.get_mut(&check_id) else {
            warn!(check = %check_id, "firing for unregistered check — ignored");
            return;
        };
        let Some(mut body) = slot.body.take() else {
            debug!(check = %check_id, "previous execution still in flight — firing skipped");
            return;
        };

        let permit = tokio::select! {
            permit = self.pool.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return, // pool closed — tearing down
            },
            _ = shutdown.signaled() => {
                // Undispatched: the body goes back so teardown still runs
                // its fini hook. The control loop exits on its next turn.
                slot.body = Some(body);
                return;
            }
        };
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let joined = tokio::task::spawn_blocking(move || {
                let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    body.check.execute(&mut body.context)
                }))
                .unwrap_or_else(|panic| Err(CheckError::Panicked(panic_message(&panic))));
                Completion {
                    check_id,
                    body,
                    result,
                }
            })
            .await;
            if let Ok(completion) = joined {
                // Sized for the pool bound; see `new`.
                let _ = completions.send(completion).await;
            }
        });
    }

    /// Return the body to its slot and emit the typed outcome.
    fn complete(&mut self, completion: Completion) {
        let Completion {
            check_id,
            body,
            result,
        } = completion;

        if let Some(slot) = self.slots.get_mut(&check_id) {
            slot.body = Some(body);
        }

        let outcome = match result {
            Ok(evaluation) => CheckOutcome::Success {
                check_id,
                evaluation,
            },
            Err(error) => {
                warn!(check = %check_id, err = %error, "check execution failed");
                CheckOutcome::Failure { check_id, error }
            }
        };

        match self.results_tx.try_send(outcome) {
            Ok(()) => {}
            Err(TrySendError::Full(outcome)) => {
                warn!(check = %outcome.check_id(), "result queue full — result dropped");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Cancel all timers, give in-flight executions a bounded window to come
    /// home, then run every check's `fini` hook.
    async fn teardown(&mut self) {
        self.scheduler.unschedule_all();
        while self.scheduler.try_next_due().is_some() {}

        let deadline = tokio::time::Instant::now() + TEARDOWN_DRAIN;
        while self.slots.values().any(|slot| slot.body.is_none()) {
            match tokio::time::timeout_at(deadline, self.completions_rx.recv()).await {
                Ok(Some(completion)) => {
                    if let Some(slot) = self.slots.get_mut(&completion.check_id) {
                        slot.body = Some(completion.body);
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    let stragglers = self
                        .slots
                        .iter()
                        .filter(|(_, slot)| slot.body.is_none())
                        .count();
                    warn!(stragglers, "teardown drain timed out — abandoning in-flight contexts");
                    break;
                }
            }
        }

        for (check_id, slot) in self.slots.drain() {
            if let Some(mut body) = slot.body {
                body.check.fini(&mut body.context);
                debug!(check = %check_id, "check finalized");
            }
        }
        info!("evaluator stopped");
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
