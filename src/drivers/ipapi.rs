//! ip-api.com, free and pro tiers.

use serde_json::Value;

use super::api::{asn, base_url, number, text, ApiDriver, ApiProvider};
use crate::config::DriverSettings;
use crate::location::Location;

const FREE_ENDPOINT: &str = "http://ip-api.com";
const PRO_ENDPOINT: &str = "https://pro.ip-api.com";
const FIELDS: &str = "status,message,country,countryCode,continentCode,regionName,city,zip,lat,lon,timezone,currency,isp,org,as,query";

pub type IpApiDriver = ApiDriver<IpApi>;

#[derive(Debug, Clone)]
pub struct IpApi {
    base: String,
    key: Option<String>,
}

impl IpApi {
    /// A configured key selects the pro endpoint.
    pub fn from_settings(settings: &DriverSettings) -> Self {
        let key = settings.str("key").map(String::from);
        let default = if key.is_some() { PRO_ENDPOINT } else { FREE_ENDPOINT };
        Self {
            base: base_url(settings.str("endpoint"), default),
            key,
        }
    }

    pub fn is_pro(&self) -> bool {
        self.key.is_some()
    }
}

impl ApiProvider for IpApi {
    const SERVICE: &'static str = "ip-api.com";

    fn url(&self, ip: &str) -> String {
        format!("{}/json/{}", self.base, ip)
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = vec![("fields", FIELDS.to_string()), ("lang", "en".to_string())];
        if let Some(key) = &self.key {
            query.push(("key", key.clone()));
        }
        query
    }

    fn rejection(&self, body: &Value) -> Option<String> {
        if body.get("status").and_then(Value::as_str) != Some("fail") {
            return None;
        }
        Some(text(body, "message").unwrap_or_else(|| "unknown error".to_string()))
    }

    fn to_location(&self, ip: &str, body: &Value) -> Location {
        Location::new(ip)
            .with_iso_code(text(body, "countryCode"))
            .with_country(text(body, "country"))
            .with_city(text(body, "city"))
            .with_state(text(body, "regionName"))
            .with_postal_code(text(body, "zip"))
            .with_lat(number(body, "lat"))
            .with_lon(number(body, "lon"))
            .with_timezone(text(body, "timezone"))
            .with_continent(text(body, "continentCode"))
            .with_currency(text(body, "currency"))
            .with_asn_number(asn(body, "as"))
            .with_asn_organization(text(body, "isp").or_else(|| text(body, "org")))
    }
}
