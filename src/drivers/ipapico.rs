//! ipapi.co

use serde_json::Value;

use super::api::{asn, base_url, number, text, ApiDriver, ApiProvider};
use crate::config::DriverSettings;
use crate::location::Location;

const DEFAULT_ENDPOINT: &str = "https://ipapi.co";

pub type IpApiCoDriver = ApiDriver<IpApiCo>;

#[derive(Debug, Clone)]
pub struct IpApiCo {
    base: String,
    key: Option<String>,
}

impl IpApiCo {
    pub fn from_settings(settings: &DriverSettings) -> Self {
        Self {
            base: base_url(settings.str("endpoint"), DEFAULT_ENDPOINT),
            key: settings.str("key").map(String::from),
        }
    }
}

impl ApiProvider for IpApiCo {
    const SERVICE: &'static str = "ipapi.co";

    fn url(&self, ip: &str) -> String {
        format!("{}/{}/json/", self.base, ip)
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        self.key.iter().map(|key| ("key", key.clone())).collect()
    }

    fn rejection(&self, body: &Value) -> Option<String> {
        match body.get("error") {
            None | Some(Value::Null) | Some(Value::Bool(false)) => None,
            Some(_) => Some(text(body, "reason").unwrap_or_else(|| "unknown error".to_string())),
        }
    }

    fn to_location(&self, ip: &str, body: &Value) -> Location {
        Location::new(ip)
            .with_iso_code(text(body, "country_code"))
            .with_country(text(body, "country_name"))
            .with_city(text(body, "city"))
            .with_state(text(body, "region"))
            .with_postal_code(text(body, "postal"))
            .with_lat(number(body, "latitude"))
            .with_lon(number(body, "longitude"))
            .with_timezone(text(body, "timezone"))
            .with_continent(text(body, "continent_code"))
            .with_currency(text(body, "currency"))
            .with_asn_number(asn(body, "asn"))
            .with_asn_organization(text(body, "org"))
    }
}
