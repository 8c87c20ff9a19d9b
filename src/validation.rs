//! Address validation in front of every lookup.

use std::net::IpAddr;

use ip_gate::{Gate, GateBuilder};

use crate::config::ValidationConfig;
use crate::error::Result;

/// Decides whether an address may be looked up at all.
pub trait AddressValidator: Send + Sync {
    fn validate(&self, ip: &str) -> Result<IpAddr>;
}

/// [`AddressValidator`] backed by [`ip_gate`].
#[derive(Debug, Clone, Copy, Default)]
pub struct GateValidator {
    gate: Gate,
}

impl GateValidator {
    pub fn new(gate: Gate) -> Self {
        Self { gate }
    }

    pub fn from_config(config: &ValidationConfig) -> Self {
        Self::new(GateBuilder::new().ipv6_ranges(config.filter_ipv6).build())
    }
}

impl AddressValidator for GateValidator {
    fn validate(&self, ip: &str) -> Result<IpAddr> {
        Ok(self.gate.check(ip)?)
    }
}
