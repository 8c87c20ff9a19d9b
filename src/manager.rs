//! The resolution manager: validation, driver registry and fallback.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::cache::{store_from_config, CacheDecorator, CacheStore};
use crate::config::{CachePolicy, Config, DriverSettings};
use crate::driver::{DriverResolver, GeoLocationDriver};
use crate::drivers::{
    ApiDriver, ChainDriver, HttpClient, IpApi, IpApiCo, IpLocate, IpQuery, MaxMindDriver,
    NullDriver, UreqClient,
};
use crate::error::{Error, Result};
use crate::location::Location;
use crate::validation::{AddressValidator, GateValidator};

/// Everything a factory may use to build a driver.
pub struct DriverContext<'a> {
    /// Name the driver is registered under.
    pub name: &'a str,
    /// The driver's settings from [`Config::drivers`].
    pub settings: &'a DriverSettings,
    /// Shared outbound HTTP client.
    pub http: &'a Arc<dyn HttpClient>,
    registry: Weak<dyn DriverResolver>,
}

impl DriverContext<'_> {
    /// Handle for composite drivers that resolve other drivers by name.
    pub fn registry(&self) -> Weak<dyn DriverResolver> {
        self.registry.clone()
    }

    pub fn configuration_error<R: Into<String>>(&self, reason: R) -> Error {
        Error::configuration(self.name, reason)
    }
}

/// Builds one driver instance from its context.
pub type DriverFactory =
    Box<dyn Fn(&DriverContext<'_>) -> Result<Arc<dyn GeoLocationDriver>> + Send + Sync>;

struct Registry {
    config: Config,
    policy: CachePolicy,
    factories: BTreeMap<String, DriverFactory>,
    instances: RwLock<HashMap<String, Arc<dyn GeoLocationDriver>>>,
    store: Arc<dyn CacheStore>,
    http: Arc<dyn HttpClient>,
    this: Weak<Registry>,
}

impl Registry {
    /// The bare driver, built on first use and shared afterwards.
    fn instance(&self, name: &str) -> Result<Arc<dyn GeoLocationDriver>> {
        if let Some(driver) = self.instances.read().get(name) {
            return Ok(driver.clone());
        }

        let factory = self.factories.get(name).ok_or_else(|| Error::UnknownDriver {
            name: name.to_string(),
        })?;
        let settings = self.config.driver_settings(name);
        let ctx = DriverContext {
            name,
            settings: &settings,
            http: &self.http,
            registry: self.this.clone() as Weak<dyn DriverResolver>,
        };
        let built = factory(&ctx)?;
        debug!(driver = name, "driver constructed");

        Ok(self
            .instances
            .write()
            .entry(name.to_string())
            .or_insert(built)
            .clone())
    }
}

impl DriverResolver for Registry {
    fn driver(&self, name: &str) -> Result<Arc<dyn GeoLocationDriver>> {
        let instance = self.instance(name)?;
        if !self.policy.enabled {
            return Ok(instance);
        }
        Ok(Arc::new(CacheDecorator::new(
            instance,
            self.policy.clone(),
            self.store.clone(),
        )))
    }
}

/// Assembles a [`Manager`].
///
/// The built-in drivers are registered up front; [`ManagerBuilder::register`]
/// adds or replaces entries.
pub struct ManagerBuilder {
    config: Config,
    factories: BTreeMap<String, DriverFactory>,
    store: Option<Arc<dyn CacheStore>>,
    http: Option<Arc<dyn HttpClient>>,
    validator: Option<Box<dyn AddressValidator>>,
}

impl ManagerBuilder {
    pub fn new(config: Config) -> Self {
        let builder = Self {
            config,
            factories: BTreeMap::new(),
            store: None,
            http: None,
            validator: None,
        };
        builder
            .register("iplocate", |ctx| {
                Ok(Arc::new(ApiDriver::new(
                    ctx.name,
                    IpLocate::from_settings(ctx.settings),
                    ctx.http.clone(),
                )))
            })
            .register("ipquery", |ctx| {
                Ok(Arc::new(ApiDriver::new(
                    ctx.name,
                    IpQuery::from_settings(ctx.settings),
                    ctx.http.clone(),
                )))
            })
            .register("ipapi", |ctx| {
                Ok(Arc::new(ApiDriver::new(
                    ctx.name,
                    IpApi::from_settings(ctx.settings),
                    ctx.http.clone(),
                )))
            })
            .register("ipapico", |ctx| {
                Ok(Arc::new(ApiDriver::new(
                    ctx.name,
                    IpApiCo::from_settings(ctx.settings),
                    ctx.http.clone(),
                )))
            })
            .register("maxmind", |ctx| {
                let path = ctx
                    .settings
                    .str("database_path")
                    .ok_or_else(|| ctx.configuration_error("database_path is not set"))?;
                Ok(Arc::new(MaxMindDriver::open(ctx.name, Path::new(path))?))
            })
            .register("null", |ctx| {
                Ok(Arc::new(NullDriver::from_settings(ctx.name, ctx.settings)?))
            })
            .register("chain", |ctx| {
                let members = ctx
                    .settings
                    .list("drivers")
                    .map_err(|reason| ctx.configuration_error(reason))?;
                if members.iter().any(|m| m == ctx.name) {
                    return Err(ctx.configuration_error("a chain cannot contain itself"));
                }
                Ok(Arc::new(ChainDriver::new(ctx.name, members, ctx.registry())))
            })
    }

    /// Register `factory` under `name`, replacing any previous entry.
    pub fn register<N, F>(mut self, name: N, factory: F) -> Self
    where
        N: Into<String>,
        F: Fn(&DriverContext<'_>) -> Result<Arc<dyn GeoLocationDriver>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
        self
    }

    /// Use `store` instead of the one selected by the cache settings.
    pub fn cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use `http` for every remote driver.
    pub fn http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn validator<V: AddressValidator + 'static>(mut self, validator: V) -> Self {
        self.validator = Some(Box::new(validator));
        self
    }

    pub fn build(self) -> Manager {
        let ManagerBuilder {
            config,
            factories,
            store,
            http,
            validator,
        } = self;

        let store = store.unwrap_or_else(|| store_from_config(&config.cache));
        let http = http.unwrap_or_else(|| Arc::new(UreqClient::new(config.http.timeout())));
        let validator = validator
            .unwrap_or_else(|| Box::new(GateValidator::from_config(&config.validation)));
        let policy = config.cache.policy();

        let registry = Arc::new_cyclic(|this| Registry {
            config,
            policy,
            factories,
            instances: RwLock::new(HashMap::new()),
            store,
            http,
            this: this.clone(),
        });

        Manager {
            registry,
            validator,
        }
    }
}

/// Entry point for lookups.
///
/// ```no_run
/// use geolocate::{Config, Manager};
///
/// let manager = Manager::new(Config::default());
/// let location = manager.locate("8.8.8.8")?;
/// println!("{:?}", location.country());
/// # Ok::<(), geolocate::Error>(())
/// ```
pub struct Manager {
    registry: Arc<Registry>,
    validator: Box<dyn AddressValidator>,
}

impl Manager {
    /// A manager with the built-in drivers and default collaborators.
    pub fn new(config: Config) -> Self {
        ManagerBuilder::new(config).build()
    }

    pub fn builder(config: Config) -> ManagerBuilder {
        ManagerBuilder::new(config)
    }

    pub fn config(&self) -> &Config {
        &self.registry.config
    }

    /// Validate `ip`, resolve it with the default driver and, if that fails,
    /// once more with the fallback driver.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidAddress`] before any driver is consulted; the default
    /// driver's error when no fallback is configured; otherwise
    /// [`Error::AggregateFailure`] when both fail.
    pub fn locate(&self, ip: &str) -> Result<Location> {
        self.validator.validate(ip)?;

        let primary = match self.driver(None).and_then(|driver| driver.resolve(ip)) {
            Ok(location) => return Ok(location),
            Err(err) => err,
        };

        let Some(fallback) = self.config().fallback_driver.as_deref() else {
            return Err(primary);
        };
        warn!(
            driver = %self.config().driver,
            fallback,
            "default driver failed, trying fallback: {}",
            primary
        );

        self.driver(Some(fallback))
            .and_then(|driver| driver.resolve(ip))
            .map_err(|err| Error::AggregateFailure {
                primary: Box::new(primary),
                fallback: Box::new(err),
            })
    }

    /// The driver called `name`, or the default driver, cache-wrapped unless
    /// caching is disabled.
    pub fn driver(&self, name: Option<&str>) -> Result<Arc<dyn GeoLocationDriver>> {
        let name = name.unwrap_or(&self.registry.config.driver);
        self.registry.driver(name)
    }

    /// Registered driver names in sorted order.
    pub fn driver_names(&self) -> Vec<&str> {
        self.registry.factories.keys().map(String::as_str).collect()
    }

    /// Drop every cached location under the configured tag.
    pub fn flush_cache(&self) -> Result<()> {
        let tag = &self.registry.policy.tag;
        self.registry.store.flush(tag)?;
        debug!(tag = %tag, "cache flushed");
        Ok(())
    }
}
