//! Static record driver for tests, development and offline use.

use serde_json::Value;

use crate::config::DriverSettings;
use crate::driver::GeoLocationDriver;
use crate::error::{Error, Result};
use crate::location::Location;

/// Returns the configured record for every address.
#[derive(Debug, Clone)]
pub struct NullDriver {
    name: String,
    template: Location,
}

impl NullDriver {
    /// Build the template once; bad field types fail here, never per lookup.
    pub fn from_settings<N: Into<String>>(name: N, settings: &DriverSettings) -> Result<Self> {
        let name = name.into();
        let mut fields = settings.as_map().clone();
        fields.insert("ip".into(), Value::String(String::new()));
        fields.remove("from_cache");

        let template = Location::from_map(fields)
            .map_err(|e| Error::configuration(name.as_str(), e.to_string()))?;

        Ok(Self { name, template })
    }
}

impl GeoLocationDriver for NullDriver {
    fn resolve(&self, ip: &str) -> Result<Location> {
        Ok(self.template.clone().with_ip(ip))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
