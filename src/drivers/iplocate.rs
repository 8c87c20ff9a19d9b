//! iplocate.io

use serde_json::Value;

use super::api::{asn, base_url, number, text, ApiDriver, ApiProvider};
use crate::config::DriverSettings;
use crate::location::Location;

const DEFAULT_ENDPOINT: &str = "https://iplocate.io";

pub type IpLocateDriver = ApiDriver<IpLocate>;

#[derive(Debug, Clone)]
pub struct IpLocate {
    base: String,
    key: Option<String>,
}

impl IpLocate {
    pub fn from_settings(settings: &DriverSettings) -> Self {
        Self {
            base: base_url(settings.str("endpoint"), DEFAULT_ENDPOINT),
            key: settings.str("key").map(String::from),
        }
    }
}

impl ApiProvider for IpLocate {
    const SERVICE: &'static str = "iplocate.io";

    fn url(&self, ip: &str) -> String {
        format!("{}/api/lookup/{}", self.base, ip)
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        self.key
            .iter()
            .map(|key| ("apiKey", key.clone()))
            .collect()
    }

    fn rejection(&self, body: &Value) -> Option<String> {
        match body.get("error")? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    fn to_location(&self, ip: &str, body: &Value) -> Location {
        Location::new(ip)
            .with_iso_code(text(body, "country_code"))
            .with_country(text(body, "country"))
            .with_city(text(body, "city"))
            .with_state(text(body, "subdivision"))
            .with_postal_code(text(body, "postal_code"))
            .with_lat(number(body, "latitude"))
            .with_lon(number(body, "longitude"))
            .with_timezone(text(body, "time_zone"))
            .with_continent(text(body, "continent"))
            .with_currency(text(body, "currency_code"))
            .with_asn_number(asn(body, "asn.asn"))
            .with_asn_organization(text(body, "asn.name"))
    }
}
