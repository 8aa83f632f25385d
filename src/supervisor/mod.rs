// SPDX-License-Identifier: MIT
//! Top-level run loop.
//!
//! The supervisor owns the shutdown signal and keeps the agent alive across
//! reload cycles: each iteration opens the instance, wires a fresh
//! scheduler/evaluator/processor pipeline, and runs it to completion. A
//! reload signal restarts the iteration; terminate ends the loop.
//!
//! OS signals are translated once at startup: SIGHUP means reload,
//! SIGINT/SIGTERM mean terminate. Acceptance is idempotent per activation —
//! after one signal is accepted, further signals are ignored until the
//! activation completes and the flag is cleared.

use anyhow::{Context as _, Result};
use std::sync::Arc;
use tracing::{error, info};

use crate::checks::CheckRegistry;
use crate::config::AgentConfig;
use crate::evaluator::{Evaluator, ScheduledCheck};
use crate::instance::Instance;
use crate::processor::{Processor, ProcessorError, Registration, RegistrationPolicy};
use crate::shutdown::{ShutdownMode, ShutdownSignal};
use crate::transport::HttpEndpoint;

pub struct Supervisor {
    config: Arc<AgentConfig>,
    registry: CheckRegistry,
    shutdown: ShutdownSignal,
}

impl Supervisor {
    pub fn new(config: AgentConfig, registry: CheckRegistry) -> Self {
        Self {
            config: Arc::new(config),
            registry,
            shutdown: ShutdownSignal::new(),
        }
    }

    /// Handle to the shared shutdown signal (for embedding and tests).
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Run processor activations until terminated.
    ///
    /// A failed registration parks the loop until the next signal (reload
    /// retries with a freshly-opened instance); any other error escaping an
    /// activation is fatal for the process.
    pub async fn run_forever(&self) -> Result<()> {
        self.install_signal_handlers()?;

        loop {
            match self.run_activation().await {
                Ok(ShutdownMode::Reload) => {
                    info!("reload signaled — restarting processor activation");
                    self.shutdown.clear();
                }
                Ok(ShutdownMode::Terminate) => {
                    info!("terminate signaled — agent stopping");
                    return Ok(());
                }
                Err(err) if err.downcast_ref::<ProcessorError>().is_some() => {
                    // Registration failure: fatal for the activation only.
                    error!(err = %err, "processor activation failed — waiting for a signal");
                    match self.shutdown.signaled().await {
                        ShutdownMode::Reload => self.shutdown.clear(),
                        ShutdownMode::Terminate => return Ok(()),
                    }
                }
                Err(err) => {
                    error!(err = %err, "unrecoverable supervisor error — terminating");
                    self.shutdown.request(ShutdownMode::Terminate);
                    return Err(err);
                }
            }
        }
    }

    /// One activation: open the instance, wire the pipeline, run it to
    /// completion, and report which signal ended it.
    async fn run_activation(&self) -> Result<ShutdownMode> {
        let config = &self.config;
        let instance = Instance::open(&config.data_dir)
            .with_context(|| format!("failed to open instance in {}", config.data_dir.display()))?;
        info!(
            agent = %instance.agent_id(),
            endpoint = %instance.endpoint_url(),
            checks = instance.list_checks().len(),
            "instance opened"
        );

        let mut scheduled = Vec::with_capacity(instance.list_checks().len());
        for spec in instance.list_checks() {
            let check = self
                .registry
                .instantiate(spec)
                .with_context(|| format!("failed to instantiate check `{}`", spec.id))?;
            scheduled.push(ScheduledCheck::new(spec.clone(), check));
        }

        let (mut evaluator, results) = Evaluator::new(
            config.check_pool_size,
            config.due_queue_depth,
            config.result_queue_depth,
        );
        evaluator.start(scheduled).context("failed to schedule checks")?;

        let endpoint = HttpEndpoint::new(
            instance.endpoint_url(),
            instance.agent_id(),
            config.endpoint_timeout,
        )
        .context("failed to build endpoint client")?;

        let registration = Registration::build(
            instance.agent_id(),
            instance.metadata().clone(),
            instance.list_checks(),
            instance.timeout_defaults(),
        );

        let processor = Processor::new(
            Arc::new(endpoint),
            RegistrationPolicy {
                max_attempts: config.registration_max_attempts,
                retry_delay: config.registration_retry_delay,
            },
            config.endpoint_pool_size,
        );
        processor
            .run(registration, evaluator, results, self.shutdown.clone())
            .await?;

        // The activation ended; the accepted signal decides what happens
        // next. An activation that ends without one (evaluator loss) is
        // treated as terminate.
        Ok(self.shutdown.current().unwrap_or(ShutdownMode::Terminate))
    }

    fn install_signal_handlers(&self) -> Result<()> {
        let shutdown = self.shutdown.clone();
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sighup =
                signal(SignalKind::hangup()).context("failed to register SIGHUP handler")?;
            let mut sigterm =
                signal(SignalKind::terminate()).context("failed to register SIGTERM handler")?;
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = sighup.recv() => {
                            info!("SIGHUP received — reload requested");
                            shutdown.request(ShutdownMode::Reload);
                        }
                        _ = sigterm.recv() => {
                            info!("SIGTERM received — terminate requested");
                            shutdown.request(ShutdownMode::Terminate);
                        }
                        _ = tokio::signal::ctrl_c() => {
                            info!("interrupt received — terminate requested");
                            shutdown.request(ShutdownMode::Terminate);
                        }
                    }
                }
            });
        }
        #[cfg(not(unix))]
        {
            tokio::spawn(async move {
                loop {
                    if tokio::signal::ctrl_c().await.is_err() {
                        tracing::warn!("interrupt handler unavailable");
                        break;
                    }
                    info!("interrupt received — terminate requested");
                    shutdown.request(ShutdownMode::Terminate);
                }
            });
        }
        Ok(())
    }
}
