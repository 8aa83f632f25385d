// SPDX-License-Identifier: MIT
//! HTTP endpoint client.
//!
//! The collection endpoint is consumed through the [`Endpoint`] trait so the
//! processor can be tested against scripted fakes. [`HttpEndpoint`] is the
//! real implementation: JSON over HTTP with a caller-supplied timeout.
//!
//! Status codes map onto [`TransportError`] variants so callers can
//! distinguish "resource not found" / "conflict" / "retry later" from fatal
//! failures; the registration retry policy in the processor keys off these.

use async_trait::async_trait;
use std::time::Duration;

use crate::checks::Evaluation;
use crate::processor::registration::Registration;

/// Classified endpoint/transport failures.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("resource not found: {0}")]
    ResourceNotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("internal server error: {0}")]
    InternalError(String),
    #[error("not implemented: {0}")]
    NotImplemented(String),
    #[error("retry later: {0}")]
    RetryLater(String),
    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },
    #[error("transport failure: {0}")]
    Network(#[from] reqwest::Error),
}

impl TransportError {
    /// Map an HTTP status onto the error taxonomy.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            400 => Self::BadRequest(body),
            403 => Self::Forbidden(body),
            404 => Self::ResourceNotFound(body),
            409 => Self::Conflict(body),
            500 => Self::InternalError(body),
            501 => Self::NotImplemented(body),
            503 => Self::RetryLater(body),
            status => Self::UnexpectedStatus { status, body },
        }
    }
}

/// Operations the collection endpoint must support.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Update an existing agent's registration.
    async fn register_agent(&self, registration: &Registration) -> Result<(), TransportError>;

    /// Create a new agent registration.
    async fn create_agent(&self, registration: &Registration) -> Result<(), TransportError>;

    /// Submit one evaluation under the given check id.
    async fn submit_evaluation(
        &self,
        check_id: &str,
        evaluation: &Evaluation,
    ) -> Result<(), TransportError>;
}

/// Real endpoint implementation over `reqwest`.
pub struct HttpEndpoint {
    client: reqwest::Client,
    base_url: String,
    agent_id: String,
}

impl HttpEndpoint {
    /// Build a client for `base_url` with the given per-request timeout.
    /// Evaluation submissions are scoped under `agent_id`.
    pub fn new(
        base_url: impl Into<String>,
        agent_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Ok(Self {
            client,
            base_url,
            agent_id: agent_id.into(),
        })
    }

    async fn expect_success(response: reqwest::Response) -> Result<(), TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(TransportError::from_status(status.as_u16(), body))
    }
}

#[async_trait]
impl Endpoint for HttpEndpoint {
    async fn register_agent(&self, registration: &Registration) -> Result<(), TransportError> {
        let url = format!("{}/v2/agents/{}", self.base_url, registration.agent_id);
        let response = self.client.put(url).json(registration).send().await?;
        Self::expect_success(response).await
    }

    async fn create_agent(&self, registration: &Registration) -> Result<(), TransportError> {
        let url = format!("{}/v2/agents", self.base_url);
        let response = self.client.post(url).json(registration).send().await?;
        Self::expect_success(response).await
    }

    async fn submit_evaluation(
        &self,
        check_id: &str,
        evaluation: &Evaluation,
    ) -> Result<(), TransportError> {
        let url = format!(
            "{}/v2/agents/{}/checks/{}/evaluations",
            self.base_url, self.agent_id, check_id
        );
        let response = self.client.post(url).json(evaluation).send().await?;
        Self::expect_success(response).await
    }
}
