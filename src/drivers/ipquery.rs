//! ipquery.io

use serde_json::Value;

use super::api::{asn, base_url, number, text, ApiDriver, ApiProvider};
use crate::config::DriverSettings;
use crate::location::Location;

const DEFAULT_ENDPOINT: &str = "https://api.ipquery.io";

pub type IpQueryDriver = ApiDriver<IpQuery>;

/// Keyless provider; errors only surface as non-2xx responses.
#[derive(Debug, Clone)]
pub struct IpQuery {
    base: String,
}

impl IpQuery {
    pub fn from_settings(settings: &DriverSettings) -> Self {
        Self {
            base: base_url(settings.str("endpoint"), DEFAULT_ENDPOINT),
        }
    }
}

impl ApiProvider for IpQuery {
    const SERVICE: &'static str = "IPQuery.io";

    fn url(&self, ip: &str) -> String {
        format!("{}/{}", self.base, ip)
    }

    fn rejection(&self, _body: &Value) -> Option<String> {
        None
    }

    fn status_detail(&self, body: &Value) -> Option<String> {
        text(body, "message")
    }

    fn to_location(&self, ip: &str, body: &Value) -> Location {
        Location::new(ip)
            .with_iso_code(text(body, "location.country_code"))
            .with_country(text(body, "location.country"))
            .with_city(text(body, "location.city"))
            .with_state(text(body, "location.state"))
            .with_postal_code(text(body, "location.zipcode"))
            .with_lat(number(body, "location.latitude"))
            .with_lon(number(body, "location.longitude"))
            .with_timezone(text(body, "location.timezone"))
            .with_asn_number(asn(body, "isp.asn"))
            .with_asn_organization(text(body, "isp.org"))
    }
}
