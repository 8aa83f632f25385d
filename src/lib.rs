// SPDX-License-Identifier: MIT
//! vigild — single-host monitoring agent.
//!
//! Pipeline: the [`scheduler`] decides when each check is due, the
//! [`evaluator`] executes checks on a bounded worker pool and emits typed
//! results, the [`processor`] registers the agent with the collection
//! endpoint and relays results to it, and the [`supervisor`] keeps the whole
//! thing alive across reload cycles.

pub mod checks;
pub mod config;
pub mod evaluator;
pub mod instance;
pub mod pidfile;
pub mod processor;
pub mod scheduler;
pub mod shutdown;
pub mod supervisor;
pub mod transport;

pub use config::AgentConfig;
pub use shutdown::{ShutdownMode, ShutdownSignal};
pub use supervisor::Supervisor;
