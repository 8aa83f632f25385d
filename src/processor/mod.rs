// SPDX-License-Identifier: MIT
//! Registration and result relay.
//!
//! One processor activation covers one supervisor iteration: establish the
//! agent's identity with the endpoint, then relay evaluator results until a
//! shutdown signal arrives.
//!
//! Registration has its own retry policy (see [`RegistrationPolicy`]).
//! Steady-state submissions are best-effort and never retried: a failed
//! submission is logged and the evaluation is gone — the next firing will
//! produce a fresh one anyway.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::evaluator::{CheckOutcome, Evaluator, ResultStream};
use crate::shutdown::ShutdownSignal;
use crate::transport::{Endpoint, TransportError};

pub mod registration;

pub use registration::{Registration, TimeoutDefaults};

/// How long shutdown waits for the evaluator task to finish its own
/// teardown before declaring the cancellation complete anyway.
const EVALUATOR_STOP_WAIT: Duration = Duration::from_secs(5);

/// Registration retry knobs.
#[derive(Debug, Clone)]
pub struct RegistrationPolicy {
    /// Maximum number of endpoint calls before giving up (including the
    /// first, and including mode-switch retries).
    pub max_attempts: u32,
    /// Delay before retrying after the endpoint says "retry later".
    pub retry_delay: Duration,
}

impl Default for RegistrationPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            retry_delay: Duration::from_secs(5 * 60),
        }
    }
}

impl RegistrationPolicy {
    /// A policy suitable for quick unit tests (no real waiting).
    pub fn instant() -> Self {
        Self {
            max_attempts: 4,
            retry_delay: Duration::from_millis(1),
        }
    }
}

/// Errors that end a processor activation.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("registration failed: {0}")]
    Registration(#[source] TransportError),
    #[error("registration abandoned after {attempts} attempts")]
    RegistrationExhausted { attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegistrationMode {
    Update,
    Create,
}

enum RegisterOutcome {
    Registered,
    /// Shutdown was signaled before registration settled.
    Interrupted,
}

enum Event {
    Shutdown,
    Result(Option<CheckOutcome>),
    SubmissionDone,
}

pub struct Processor {
    endpoint: Arc<dyn Endpoint>,
    policy: RegistrationPolicy,
    /// Bound on concurrent evaluation submissions (the endpoint I/O pool).
    submit_pool: Arc<tokio::sync::Semaphore>,
}

impl Processor {
    pub fn new(
        endpoint: Arc<dyn Endpoint>,
        policy: RegistrationPolicy,
        submit_pool_size: usize,
    ) -> Self {
        Self {
            endpoint,
            policy,
            submit_pool: Arc::new(tokio::sync::Semaphore::new(submit_pool_size.max(1))),
        }
    }

    /// Run one activation: register, then relay results until signaled.
    ///
    /// A terminal registration failure aborts the activation and surfaces to
    /// the supervisor — fatal for the activation, not the process.
    pub async fn run(
        &self,
        registration: Registration,
        mut evaluator: Evaluator,
        mut results: ResultStream,
        shutdown: ShutdownSignal,
    ) -> Result<(), ProcessorError> {
        match self.register(&registration, &shutdown).await? {
            RegisterOutcome::Registered => {}
            RegisterOutcome::Interrupted => {
                info!("shutdown requested during registration — activation abandoned");
                return Ok(());
            }
        }

        let eval_shutdown = shutdown.clone();
        let eval_task =
            tokio::spawn(async move { evaluator.run_until_signaled(eval_shutdown).await });

        let mut submissions: JoinSet<()> = JoinSet::new();
        loop {
            let event = tokio::select! {
                _ = shutdown.signaled() => Event::Shutdown,
                outcome = results.next_result() => Event::Result(outcome),
                Some(_) = submissions.join_next(), if !submissions.is_empty() => Event::SubmissionDone,
            };
            match event {
                Event::Shutdown => break,
                Event::Result(Some(outcome)) => {
                    self.relay(outcome, &mut submissions).await;
                }
                // Evaluator gone without a signal: end the activation.
                Event::Result(None) => break,
                Event::SubmissionDone => {}
            }
        }

        // Cancel pending submissions, then give the evaluator a bounded
        // window to finish its own teardown.
        let pending = submissions.len();
        if pending > 0 {
            debug!(pending, "cancelling pending evaluation submissions");
        }
        submissions.shutdown().await;

        match tokio::time::timeout(EVALUATOR_STOP_WAIT, eval_task).await {
            Ok(Ok(())) => {}
            Ok(Err(join_err)) => warn!(err = %join_err, "evaluator task ended abnormally"),
            Err(_) => warn!("evaluator did not stop in time — proceeding with shutdown"),
        }

        info!("processor activation complete");
        Ok(())
    }

    /// Forward one outcome: successes become tracked fire-and-forget
    /// submissions; failures are logged and produce no evaluation.
    async fn relay(&self, outcome: CheckOutcome, submissions: &mut JoinSet<()>) {
        match outcome {
            CheckOutcome::Success {
                check_id,
                evaluation,
            } => {
                // Blocks when the endpoint I/O pool is saturated.
                let permit = match self.submit_pool.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };
                let endpoint = self.endpoint.clone();
                submissions.spawn(async move {
                    let _permit = permit;
                    if let Err(err) = endpoint.submit_evaluation(&check_id, &evaluation).await {
                        warn!(check = %check_id, err = %err, "evaluation submission failed");
                    }
                });
            }
            CheckOutcome::Failure { check_id, error } => {
                warn!(check = %check_id, err = %error, "check failed — no evaluation submitted");
            }
        }
    }

    /// Registration state machine.
    ///
    /// Starts in update mode. NotFound in update mode (or Conflict in create
    /// mode) flips the mode and retries immediately; RetryLater sleeps the
    /// configured delay; any other error is terminal. Every endpoint call
    /// counts against `max_attempts`. The retry sleep and the gaps between
    /// attempts observe the shutdown signal.
    async fn register(
        &self,
        registration: &Registration,
        shutdown: &ShutdownSignal,
    ) -> Result<RegisterOutcome, ProcessorError> {
        let mut mode = RegistrationMode::Update;
        for attempt in 1..=self.policy.max_attempts {
            if shutdown.is_signaled() {
                return Ok(RegisterOutcome::Interrupted);
            }
            let result = match mode {
                RegistrationMode::Update => self.endpoint.register_agent(registration).await,
                RegistrationMode::Create => self.endpoint.create_agent(registration).await,
            };
            match result {
                Ok(()) => {
                    info!(
                        agent = %registration.agent_id,
                        checks = registration.checks.len(),
                        attempt,
                        "agent registered"
                    );
                    return Ok(RegisterOutcome::Registered);
                }
                Err(TransportError::ResourceNotFound(_))
                    if mode == RegistrationMode::Update =>
                {
                    debug!(attempt, "agent not known to endpoint — switching to create");
                    mode = RegistrationMode::Create;
                }
                Err(TransportError::Conflict(_)) if mode == RegistrationMode::Create => {
                    debug!(attempt, "agent already exists — switching to update");
                    mode = RegistrationMode::Update;
                }
                Err(TransportError::RetryLater(_)) => {
                    warn!(
                        attempt,
                        max = self.policy.max_attempts,
                        delay_ms = self.policy.retry_delay.as_millis(),
                        "endpoint asked to retry later"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.policy.retry_delay) => {}
                        _ = shutdown.signaled() => return Ok(RegisterOutcome::Interrupted),
                    }
                }
                Err(err) => {
                    error!(attempt, err = %err, "registration failed terminally");
                    return Err(ProcessorError::Registration(err));
                }
            }
        }
        Err(ProcessorError::RegistrationExhausted {
            attempts: self.policy.max_attempts,
        })
    }
}
