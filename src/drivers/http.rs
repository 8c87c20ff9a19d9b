//! Outbound HTTP used by the remote drivers.

use std::time::Duration;

use serde_json::Value;
use tracing::trace;
use ureq::Agent;

/// Failure to obtain a JSON document from a provider.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The provider answered with a non-2xx status.
    #[error("HTTP status {code}")]
    Status { code: u16, body: String },

    /// The request never completed.
    #[error("request failed: {0}")]
    Network(String),

    /// The body was not JSON.
    #[error("invalid JSON response: {0}")]
    Decode(String),
}

impl TransportError {
    /// The body of a `Status` failure parsed as JSON, when it is JSON.
    pub fn body_json(&self) -> Option<Value> {
        match self {
            TransportError::Status { body, .. } => serde_json::from_str(body).ok(),
            _ => None,
        }
    }
}

/// A blocking JSON-over-HTTP GET.
pub trait HttpClient: Send + Sync {
    fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Result<Value, TransportError>;
}

/// [`HttpClient`] backed by a shared `ureq` agent.
#[derive(Debug, Clone)]
pub struct UreqClient {
    agent: Agent,
}

impl UreqClient {
    pub fn new(timeout: Duration) -> Self {
        let agent = Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();
        Self { agent }
    }
}

impl Default for UreqClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl HttpClient for UreqClient {
    fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Result<Value, TransportError> {
        let mut request = self.agent.get(url);
        for (key, value) in query {
            request = request.query(*key, *value);
        }

        let response = request
            .call()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let status = response.status();
        let body = response
            .into_body()
            .read_to_string()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        trace!(url, status = status.as_u16(), "provider responded");

        if !status.is_success() {
            return Err(TransportError::Status {
                code: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| TransportError::Decode(e.to_string()))
    }
}
