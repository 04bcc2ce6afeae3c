use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use shared::{
    domain::{Agreement, FinalizedAgreement, Offer, SessionId, SessionParams},
    protocol::{AutoNegotiationResponse, CreatedSession, ErrorPayload, TimelineResponse},
};
use thiserror::Error;
use tracing::debug;
use url::Url;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid negotiation service url '{0}'")]
    InvalidBaseUrl(String),
    #[error("negotiation service returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("negotiation service request timed out")]
    Timeout,
    #[error("negotiation service unreachable: {0}")]
    Transport(#[source] reqwest::Error),
}

impl ServiceError {
    /// Whether a retry could plausibly succeed. Retry policy itself lives in
    /// the orchestrator, and only for idempotent operations.
    pub fn is_transient(&self) -> bool {
        match self {
            ServiceError::Timeout | ServiceError::Transport(_) => true,
            ServiceError::Status { status, .. } => *status >= 500,
            ServiceError::InvalidBaseUrl(_) => false,
        }
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ServiceError::Timeout
        } else {
            ServiceError::Transport(err)
        }
    }
}

/// Thin request layer over the negotiation service. One round-trip per
/// operation, responses decoded verbatim, no retries.
pub struct SessionClient {
    http: Client,
    base_url: String,
}

impl SessionClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ServiceError> {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let base_url = base_url.into();
        Url::parse(&base_url).map_err(|_| ServiceError::InvalidBaseUrl(base_url.clone()))?;
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(ServiceError::Transport)?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn create_session(
        &self,
        params: &SessionParams,
    ) -> Result<CreatedSession, ServiceError> {
        debug!(role = params.role.as_str(), "service: creating session");
        let res = self
            .http
            .post(format!("{}/sessions", self.base_url))
            .json(params)
            .send()
            .await
            .map_err(ServiceError::from_reqwest)?;
        decode_response(res).await
    }

    pub async fn run_auto_negotiation(
        &self,
        session_id: SessionId,
    ) -> Result<Agreement, ServiceError> {
        debug!(session_id = session_id.0, "service: running auto-negotiation");
        let res = self
            .http
            .post(format!("{}/sessions/{}/auto", self.base_url, session_id.0))
            .send()
            .await
            .map_err(ServiceError::from_reqwest)?;
        let body: AutoNegotiationResponse = decode_response(res).await?;
        Ok(body.agreement)
    }

    pub async fn timeline(&self, session_id: SessionId) -> Result<Vec<Offer>, ServiceError> {
        debug!(session_id = session_id.0, "service: fetching timeline");
        let res = self
            .http
            .get(format!(
                "{}/sessions/{}/timeline",
                self.base_url, session_id.0
            ))
            .send()
            .await
            .map_err(ServiceError::from_reqwest)?;
        let body: TimelineResponse = decode_response(res).await?;
        Ok(body.offers)
    }

    pub async fn finalize(
        &self,
        session_id: SessionId,
    ) -> Result<FinalizedAgreement, ServiceError> {
        debug!(session_id = session_id.0, "service: finalizing agreement");
        let res = self
            .http
            .post(format!(
                "{}/sessions/{}/finalize",
                self.base_url, session_id.0
            ))
            .send()
            .await
            .map_err(ServiceError::from_reqwest)?;
        decode_response(res).await
    }
}

async fn decode_response<T: DeserializeOwned>(res: reqwest::Response) -> Result<T, ServiceError> {
    let status = res.status();
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorPayload>(&body)
            .map(|payload| payload.detail)
            .unwrap_or_else(|_| {
                if body.is_empty() {
                    status
                        .canonical_reason()
                        .unwrap_or("unknown error")
                        .to_string()
                } else {
                    body
                }
            });
        return Err(ServiceError::Status {
            status: status.as_u16(),
            message,
        });
    }
    res.json::<T>().await.map_err(ServiceError::from_reqwest)
}

#[cfg(test)]
#[path = "tests/session_client_tests.rs"]
mod tests;
