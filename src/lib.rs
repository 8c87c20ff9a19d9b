//! The geolocate library resolves IP addresses into normalized geographic and
//! network metadata.
//!
//! Lookups go through a [`Manager`], which validates the address, asks the
//! configured driver (remote API, local MaxMind database, a static record or
//! an ordered chain of those) and falls back to a second driver when the first
//! one fails. Successful results can be cached.
//!
//! # Examples
//!
//! Registering a custom driver next to the built-in ones:
//!
//! ```rust
//! use std::sync::Arc;
//! use geolocate::{Config, GeoLocationDriver, Location, Manager, Result};
//!
//! struct Office;
//!
//! impl GeoLocationDriver for Office {
//!     fn resolve(&self, ip: &str) -> Result<Location> {
//!         Ok(Location::new(ip).with_city(Some("Lisbon".into())))
//!     }
//!
//!     fn name(&self) -> &str {
//!         "office"
//!     }
//! }
//!
//! let config = Config {
//!     driver: "office".into(),
//!     ..Config::default()
//! };
//! let manager = Manager::builder(config)
//!     .register("office", |_ctx| Ok(Arc::new(Office)))
//!     .build();
//!
//! let location = manager.locate("8.8.8.8")?;
//! assert_eq!(location.city(), Some("Lisbon"));
//! # Ok::<(), geolocate::Error>(())
//! ```

pub mod cache;
pub mod config;
pub mod driver;
pub mod drivers;
pub mod error;
pub mod location;
pub mod manager;
pub mod validation;

pub use crate::cache::{CacheDecorator, CacheStore, FileStore, MemoryStore};
pub use crate::config::{CachePolicy, Config, DriverSettings, StoreKind};
pub use crate::driver::{DriverResolver, GeoLocationDriver};
pub use crate::error::{Error, Result};
pub use crate::location::{Location, Unit};
pub use crate::manager::{DriverContext, DriverFactory, Manager, ManagerBuilder};
pub use crate::validation::{AddressValidator, GateValidator};
