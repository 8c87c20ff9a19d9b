//! Ordered composite driver.

use std::sync::Weak;

use tracing::{debug, warn};

use crate::driver::{DriverResolver, GeoLocationDriver};
use crate::error::{Error, Result};
use crate::location::Location;

/// Tries its members in order and returns the first success.
pub struct ChainDriver {
    name: String,
    members: Vec<String>,
    registry: Weak<dyn DriverResolver>,
}

impl ChainDriver {
    pub fn new<N: Into<String>>(
        name: N,
        members: Vec<String>,
        registry: Weak<dyn DriverResolver>,
    ) -> Self {
        Self {
            name: name.into(),
            members,
            registry,
        }
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }
}

impl GeoLocationDriver for ChainDriver {
    fn resolve(&self, ip: &str) -> Result<Location> {
        let registry = self.registry.upgrade().ok_or_else(|| {
            Error::configuration(self.name.as_str(), "the driver registry is no longer available")
        })?;

        let mut failures = Vec::with_capacity(self.members.len());
        for member in &self.members {
            // only per-lookup misses are absorbed
            let outcome = registry.driver(member).and_then(|driver| driver.resolve(ip));
            match outcome {
                Ok(location) => {
                    debug!(chain = %self.name, %member, "chain member resolved {}", ip);
                    return Ok(location);
                }
                Err(err) if err.is_not_found() => {
                    warn!(chain = %self.name, %member, "chain member failed: {}", err);
                    failures.push(format!("Driver '{}' failed: {}", member, err));
                }
                Err(err) => return Err(err),
            }
        }

        Err(Error::not_found(format!(
            "All drivers in the chain failed to locate the IP. Errors: {}",
            failures.join("; ")
        )))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
