//! Shared plumbing of the remote-API drivers.
//!
//! Every provider differs only in how it builds its request and how its JSON
//! maps onto a [`Location`]; [`ApiDriver`] supplies the rest.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, trace};

use super::http::{HttpClient, TransportError};
use crate::driver::GeoLocationDriver;
use crate::error::{Error, Result};
use crate::location::{asn_text, Location};

/// One remote geolocation service.
pub trait ApiProvider: Send + Sync {
    /// Service name used in error messages.
    const SERVICE: &'static str;

    /// Request URL for `ip`.
    fn url(&self, ip: &str) -> String;

    /// Query parameters sent with every request.
    fn query(&self) -> Vec<(&'static str, String)> {
        Vec::new()
    }

    /// An error the provider reported inside a successful response.
    fn rejection(&self, body: &Value) -> Option<String>;

    /// Human readable detail from a non-2xx response body.
    fn status_detail(&self, body: &Value) -> Option<String> {
        text(body, "message").or_else(|| text(body, "reason"))
    }

    /// Field map from the provider's JSON onto a record for `ip`.
    fn to_location(&self, ip: &str, body: &Value) -> Location;
}

/// A [`GeoLocationDriver`] making exactly one GET per lookup.
pub struct ApiDriver<P> {
    name: String,
    provider: P,
    http: Arc<dyn HttpClient>,
}

impl<P: ApiProvider> ApiDriver<P> {
    pub fn new<N: Into<String>>(name: N, provider: P, http: Arc<dyn HttpClient>) -> Self {
        Self {
            name: name.into(),
            provider,
            http,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    fn transport_failure(&self, err: TransportError) -> Error {
        let detail = err
            .body_json()
            .and_then(|body| self.provider.status_detail(&body))
            .unwrap_or_else(|| err.to_string());
        Error::not_found_with(format!("Request to {} failed: {}", P::SERVICE, detail), err)
    }
}

impl<P: ApiProvider> GeoLocationDriver for ApiDriver<P> {
    fn resolve(&self, ip: &str) -> Result<Location> {
        let url = self.provider.url(ip);
        let query = self.provider.query();
        let pairs: Vec<(&str, &str)> = query.iter().map(|(k, v)| (*k, v.as_str())).collect();

        debug!(driver = %self.name, %url, "querying provider");
        let body = self
            .http
            .get_json(&url, &pairs)
            .map_err(|e| self.transport_failure(e))?;

        if let Some(reason) = self.provider.rejection(&body) {
            return Err(Error::not_found(format!("{} API error: {}", P::SERVICE, reason)));
        }

        let location = self.provider.to_location(ip, &body).with_ip(ip);
        trace!(driver = %self.name, ?location, "mapped provider response");
        Ok(location)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Walk a dotted path into a JSON document.
fn lookup<'a>(body: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(body, |node, key| node.get(key))
}

/// String at `path`; numbers are rendered as text.
pub(crate) fn text(body: &Value, path: &str) -> Option<String> {
    match lookup(body, path)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Float at `path`; numeric strings are accepted.
pub(crate) fn number(body: &Value, path: &str) -> Option<f64> {
    match lookup(body, path)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// ASN at `path`, integer or string.
pub(crate) fn asn(body: &Value, path: &str) -> Option<String> {
    lookup(body, path).and_then(asn_text)
}

/// `endpoint` override or the provider default, without a trailing slash.
pub(crate) fn base_url(endpoint: Option<&str>, default: &str) -> String {
    endpoint.unwrap_or(default).trim_end_matches('/').to_string()
}
