//! Settings for the manager, its drivers and the cache.
//!
//! A [`Config`] starts from built-in defaults, is optionally overlaid with a
//! TOML file and then with environment variables. It is resolved once, before
//! the [`crate::Manager`] is built, and never changes afterwards.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Where the `maxmind` driver looks for its database unless told otherwise.
pub const DEFAULT_MMDB_PATH: &str = "/usr/share/GeoIP/GeoLite2-City.mmdb";

const DEFAULT_DRIVER: &str = "maxmind";

/// Free-form key/value settings of one driver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DriverSettings(Map<String, Value>);

impl DriverSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert<K: Into<String>, V: Into<Value>>(&mut self, key: K, value: V) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// A non-empty string setting.
    pub fn str(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// A list of strings. A missing key is an empty list.
    pub fn list(&self, key: &str) -> std::result::Result<Vec<String>, String> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(String::from)
                        .ok_or_else(|| format!("'{}' must only contain strings", key))
                })
                .collect(),
            Some(_) => Err(format!("'{}' must be a list of strings", key)),
        }
    }

    /// Deserialize the whole settings map into a typed structure.
    pub fn deserialize<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(Value::Object(self.0.clone()))
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Overlay `other` onto these settings key by key.
    pub fn merge(&mut self, other: DriverSettings) {
        for (key, value) in other.0 {
            self.0.insert(key, value);
        }
    }
}

/// Backing store of the cache decorator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// In-process store, lost when the process exits.
    #[default]
    Memory,
    /// JSON file shared by successive invocations.
    File,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::Memory => write!(f, "memory"),
            StoreKind::File => write!(f, "file"),
        }
    }
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(StoreKind::Memory),
            "file" => Ok(StoreKind::File),
            other => Err(format!("unknown cache store '{}'", other)),
        }
    }
}

/// Cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub store: StoreKind,
    /// File used by the `file` store.
    pub path: Option<PathBuf>,
    /// Entry lifetime in minutes.
    pub ttl: u64,
    pub prefix: String,
    pub tag: String,
    /// Upper bound on entries held by the `memory` store.
    pub max_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            store: StoreKind::Memory,
            path: None,
            ttl: 60 * 24,
            prefix: "geolocation_".to_string(),
            tag: "geolocation".to_string(),
            max_capacity: 10_000,
        }
    }
}

impl CacheConfig {
    /// The part of the settings the cache decorator needs.
    pub fn policy(&self) -> CachePolicy {
        CachePolicy {
            enabled: self.enabled,
            prefix: self.prefix.clone(),
            tag: self.tag.clone(),
            ttl_minutes: self.ttl,
        }
    }

    pub fn file_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("geolocate-cache.json"))
    }
}

/// How the cache decorator keys, groups and expires entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    pub enabled: bool,
    pub prefix: String,
    pub tag: String,
    pub ttl_minutes: u64,
}

impl CachePolicy {
    pub fn key(&self, ip: &str) -> String {
        format!("{}{}", self.prefix, ip)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_minutes.saturating_mul(60))
    }
}

/// Outbound HTTP settings shared by the remote drivers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_secs: 5 }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Address validation settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Also refuse private and reserved IPv6 ranges.
    pub filter_ipv6: bool,
}

/// Top-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Driver used by `locate` and by `driver(None)`.
    pub driver: String,
    /// Driver tried once when the default one fails.
    pub fallback_driver: Option<String>,
    pub drivers: BTreeMap<String, DriverSettings>,
    pub cache: CacheConfig,
    pub http: HttpConfig,
    pub validation: ValidationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            driver: DEFAULT_DRIVER.to_string(),
            fallback_driver: None,
            drivers: default_drivers(),
            cache: CacheConfig::default(),
            http: HttpConfig::default(),
            validation: ValidationConfig::default(),
        }
    }
}

fn default_drivers() -> BTreeMap<String, DriverSettings> {
    let mut drivers = BTreeMap::new();
    drivers.insert("iplocate".to_string(), DriverSettings::new());
    drivers.insert("ipquery".to_string(), DriverSettings::new());
    drivers.insert("ipapi".to_string(), DriverSettings::new());
    drivers.insert("ipapico".to_string(), DriverSettings::new());
    drivers.insert(
        "maxmind".to_string(),
        DriverSettings::new().with("database_path", DEFAULT_MMDB_PATH),
    );
    drivers.insert(
        "chain".to_string(),
        DriverSettings::new().with("drivers", vec!["iplocate", "maxmind"]),
    );
    drivers.insert(
        "null".to_string(),
        DriverSettings::new()
            .with("iso_code", "ZZ")
            .with("country", "Unknown")
            .with("lat", 0.0)
            .with("lon", 0.0)
            .with("timezone", "UTC")
            .with("continent", "Unknown")
            .with("asn_number", 0)
            .with("asn_organization", "Unknown"),
    );
    drivers
}

impl Config {
    /// Parse TOML, merging driver settings key by key over the defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let mut parsed: Config =
            toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;

        let mut drivers = default_drivers();
        for (name, settings) in std::mem::take(&mut parsed.drivers) {
            drivers.entry(name).or_default().merge(settings);
        }
        parsed.drivers = drivers;

        Ok(parsed)
    }

    /// Read and parse a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Overlay values from the process environment.
    pub fn apply_env_vars(&mut self) -> Result<()> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Overlay values from an environment-like lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(driver) = lookup("GEOLOCATION_DRIVER").filter(|v| !v.is_empty()) {
            self.driver = driver;
        }
        if let Some(fallback) = lookup("GEOLOCATION_FALLBACK_DRIVER") {
            self.fallback_driver = Some(fallback).filter(|v| !v.is_empty());
        }

        for (var, driver, key) in [
            ("IPLOCATE_KEY", "iplocate", "key"),
            ("IPAPI_KEY", "ipapi", "key"),
            ("IPAPICO_KEY", "ipapico", "key"),
            ("MAXMIND_DATABASE_PATH", "maxmind", "database_path"),
        ] {
            if let Some(value) = lookup(var) {
                self.drivers
                    .entry(driver.to_string())
                    .or_default()
                    .insert(key, value);
            }
        }

        if let Some(enabled) = lookup("GEOLOCATION_CACHE_ENABLED") {
            self.cache.enabled = parse_bool(&enabled).ok_or_else(|| {
                Error::Config(format!(
                    "GEOLOCATION_CACHE_ENABLED must be a boolean, got '{}'",
                    enabled
                ))
            })?;
        }
        if let Some(store) = lookup("GEOLOCATION_CACHE_STORE") {
            self.cache.store = store.parse().map_err(Error::Config)?;
        }
        if let Some(ttl) = lookup("GEOLOCATION_CACHE_TTL") {
            self.cache.ttl = ttl.trim().parse().map_err(|_| {
                Error::Config(format!(
                    "GEOLOCATION_CACHE_TTL must be a number of minutes, got '{}'",
                    ttl
                ))
            })?;
        }

        Ok(())
    }

    /// Settings of `name`, empty when the driver has none.
    pub fn driver_settings(&self, name: &str) -> DriverSettings {
        self.drivers.get(name).cloned().unwrap_or_default()
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_stock_settings() {
        let config = Config::default();
        assert_eq!(config.driver, "maxmind");
        assert_eq!(config.fallback_driver, None);
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.ttl, 1440);
        assert_eq!(
            config.driver_settings("chain").list("drivers").unwrap(),
            ["iplocate", "maxmind"]
        );
        assert_eq!(
            config.driver_settings("maxmind").str("database_path"),
            Some(DEFAULT_MMDB_PATH)
        );
        assert_eq!(config.driver_settings("null").str("iso_code"), Some("ZZ"));
    }

    #[test]
    fn toml_merges_over_defaults() {
        let config = Config::from_toml_str(
            r#"
            driver = "chain"
            fallback_driver = "null"

            [drivers.chain]
            drivers = ["ipapi", "null"]

            [drivers.null]
            country = "Nowhere"

            [cache]
            enabled = true
            ttl = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.driver, "chain");
        assert_eq!(config.fallback_driver.as_deref(), Some("null"));
        assert_eq!(
            config.driver_settings("chain").list("drivers").unwrap(),
            ["ipapi", "null"]
        );
        let null = config.driver_settings("null");
        assert_eq!(null.str("country"), Some("Nowhere"));
        assert_eq!(null.str("iso_code"), Some("ZZ"));
        assert!(config.drivers.contains_key("maxmind"));
        assert!(config.cache.enabled);
        assert_eq!(config.cache.policy().ttl(), Duration::from_secs(300));
        assert_eq!(config.cache.tag, "geolocation");
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let err = Config::from_toml_str("driver = [").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn load_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geolocation.toml");
        std::fs::write(&path, "driver = \"null\"\n[cache]\nstore = \"file\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.driver, "null");
        assert_eq!(config.cache.store, StoreKind::File);

        let missing = Config::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(missing, Error::Io(_)));
    }

    #[test]
    fn env_overlay() {
        let env: HashMap<&str, &str> = [
            ("GEOLOCATION_DRIVER", "ipapi"),
            ("GEOLOCATION_FALLBACK_DRIVER", "maxmind"),
            ("IPAPI_KEY", "secret"),
            ("MAXMIND_DATABASE_PATH", "/tmp/City.mmdb"),
            ("GEOLOCATION_CACHE_ENABLED", "true"),
            ("GEOLOCATION_CACHE_STORE", "file"),
            ("GEOLOCATION_CACHE_TTL", "15"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.driver, "ipapi");
        assert_eq!(config.fallback_driver.as_deref(), Some("maxmind"));
        assert_eq!(config.driver_settings("ipapi").str("key"), Some("secret"));
        assert_eq!(
            config.driver_settings("maxmind").str("database_path"),
            Some("/tmp/City.mmdb")
        );
        assert!(config.cache.enabled);
        assert_eq!(config.cache.store, StoreKind::File);
        assert_eq!(config.cache.ttl, 15);
    }

    #[test]
    fn env_overlay_rejects_garbage() {
        let mut config = Config::default();
        let err = config
            .apply_env(|key| (key == "GEOLOCATION_CACHE_TTL").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("GEOLOCATION_CACHE_TTL"));
    }

    #[test]
    fn empty_fallback_env_clears_fallback() {
        let mut config = Config {
            fallback_driver: Some("null".into()),
            ..Config::default()
        };
        config
            .apply_env(|key| (key == "GEOLOCATION_FALLBACK_DRIVER").then(String::new))
            .unwrap();
        assert_eq!(config.fallback_driver, None);
    }

    #[test]
    fn settings_list_type_errors() {
        let settings = DriverSettings::new().with("drivers", "ipapi");
        assert!(settings.list("drivers").is_err());
        assert!(settings.list("missing").unwrap().is_empty());
    }
}
