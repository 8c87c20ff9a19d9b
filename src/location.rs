//! The normalized geolocation record every driver produces.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Mean Earth radius used by [`Location::distance_to`].
const EARTH_RADIUS_KM: f64 = 6371.0;
const EARTH_RADIUS_MI: f64 = 3959.0;

/// Geolocation data for a single IP address.
///
/// A `Location` is assembled once by a driver through the `with_*` builder
/// methods and is read-only afterwards. The `ip` field always holds the
/// address that was requested, whatever the provider echoed back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    ip: String,
    #[serde(default)]
    iso_code: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    postal_code: Option<String>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
    #[serde(default)]
    timezone: Option<String>,
    #[serde(default)]
    continent: Option<String>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default, deserialize_with = "deserialize_asn")]
    asn_number: Option<String>,
    #[serde(default)]
    asn_organization: Option<String>,
    #[serde(default)]
    from_cache: bool,
}

/// Generates the getter and the consuming setter of an optional text field.
macro_rules! text_fields {
    ($($field:ident => $setter:ident),* $(,)?) => {
        $(
            pub fn $field(&self) -> Option<&str> {
                self.$field.as_deref()
            }

            pub fn $setter(mut self, value: Option<String>) -> Self {
                self.$field = value.filter(|v| !v.is_empty());
                self
            }
        )*
    };
}

impl Location {
    /// Start a record for `ip` with every optional field unset.
    pub fn new<T: Into<String>>(ip: T) -> Self {
        Self {
            ip: ip.into(),
            iso_code: None,
            country: None,
            city: None,
            state: None,
            postal_code: None,
            lat: None,
            lon: None,
            timezone: None,
            continent: None,
            currency: None,
            asn_number: None,
            asn_organization: None,
            from_cache: false,
        }
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    text_fields! {
        iso_code => with_iso_code,
        country => with_country,
        city => with_city,
        state => with_state,
        postal_code => with_postal_code,
        timezone => with_timezone,
        continent => with_continent,
        currency => with_currency,
        asn_number => with_asn_number,
        asn_organization => with_asn_organization,
    }

    pub fn lat(&self) -> Option<f64> {
        self.lat
    }

    pub fn lon(&self) -> Option<f64> {
        self.lon
    }

    /// Latitudes outside -90..=90 (or non-finite) are dropped.
    pub fn with_lat(mut self, lat: Option<f64>) -> Self {
        self.lat = lat.filter(|v| v.is_finite() && (-90.0..=90.0).contains(v));
        self
    }

    /// Longitudes outside -180..=180 (or non-finite) are dropped.
    pub fn with_lon(mut self, lon: Option<f64>) -> Self {
        self.lon = lon.filter(|v| v.is_finite() && (-180.0..=180.0).contains(v));
        self
    }

    /// Replace the address, keeping every other field.
    pub fn with_ip<T: Into<String>>(mut self, ip: T) -> Self {
        self.ip = ip.into();
        self
    }

    /// Whether this record was served by the cache decorator.
    pub fn is_from_cache(&self) -> bool {
        self.from_cache
    }

    pub(crate) fn cached(mut self) -> Self {
        self.from_cache = true;
        self
    }

    /// Great-circle distance to `other` using the haversine formula.
    ///
    /// Returns `0.0` when either side lacks coordinates.
    pub fn distance_to(&self, other: &Location, unit: Unit) -> f64 {
        let (Some(lat_from), Some(lon_from), Some(lat_to), Some(lon_to)) =
            (self.lat, self.lon, other.lat, other.lon)
        else {
            return 0.0;
        };

        let lat_from = lat_from.to_radians();
        let lat_to = lat_to.to_radians();
        let lat_delta = lat_to - lat_from;
        let lon_delta = (lon_to - lon_from).to_radians();

        let a = (lat_delta / 2.0).sin().powi(2)
            + lat_from.cos() * lat_to.cos() * (lon_delta / 2.0).sin().powi(2);

        2.0 * a.sqrt().asin() * unit.earth_radius()
    }

    /// Flat, ordered key/value view for presentation layers.
    pub fn to_map(&self) -> Map<String, Value> {
        let text = |v: &Option<String>| v.clone().map(Value::String).unwrap_or(Value::Null);
        let float = |v: Option<f64>| v.map(Value::from).unwrap_or(Value::Null);

        let mut map = Map::with_capacity(14);
        map.insert("ip".into(), Value::String(self.ip.clone()));
        map.insert("iso_code".into(), text(&self.iso_code));
        map.insert("country".into(), text(&self.country));
        map.insert("city".into(), text(&self.city));
        map.insert("state".into(), text(&self.state));
        map.insert("postal_code".into(), text(&self.postal_code));
        map.insert("lat".into(), float(self.lat));
        map.insert("lon".into(), float(self.lon));
        map.insert("timezone".into(), text(&self.timezone));
        map.insert("continent".into(), text(&self.continent));
        map.insert("currency".into(), text(&self.currency));
        map.insert("asn_number".into(), text(&self.asn_number));
        map.insert("asn_organization".into(), text(&self.asn_organization));
        map.insert("from_cache".into(), Value::Bool(self.from_cache));
        map
    }

    /// Rebuild a record from a [`Location::to_map`] style mapping.
    ///
    /// `from_cache` is provenance, not identity, and is never restored.
    ///
    /// # Errors
    ///
    /// Fails when `ip` is missing or a field has the wrong JSON type.
    pub fn from_map(map: Map<String, Value>) -> Result<Self, serde_json::Error> {
        let parsed: Location = serde_json::from_value(Value::Object(map))?;
        Ok(Location::new(parsed.ip)
            .with_iso_code(parsed.iso_code)
            .with_country(parsed.country)
            .with_city(parsed.city)
            .with_state(parsed.state)
            .with_postal_code(parsed.postal_code)
            .with_lat(parsed.lat)
            .with_lon(parsed.lon)
            .with_timezone(parsed.timezone)
            .with_continent(parsed.continent)
            .with_currency(parsed.currency)
            .with_asn_number(parsed.asn_number)
            .with_asn_organization(parsed.asn_organization))
    }
}

/// Render an ASN as text, accepting both integers and strings.
pub(crate) fn asn_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn deserialize_asn<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(deserializer)?
        .as_ref()
        .and_then(asn_text))
}

/// Unit for [`Location::distance_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Unit {
    #[default]
    Kilometers,
    Miles,
}

impl Unit {
    pub fn earth_radius(self) -> f64 {
        match self {
            Unit::Kilometers => EARTH_RADIUS_KM,
            Unit::Miles => EARTH_RADIUS_MI,
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            Unit::Kilometers => "km",
            Unit::Miles => "mi",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

impl FromStr for Unit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "km" => Ok(Unit::Kilometers),
            "mi" => Ok(Unit::Miles),
            other => Err(format!("unknown distance unit '{}', expected km or mi", other)),
        }
    }
}
