//! Built-in geolocation drivers.

pub mod api;
pub mod chain;
pub mod http;
pub mod ipapi;
pub mod ipapico;
pub mod iplocate;
pub mod ipquery;
pub mod maxmind;
pub mod null;

pub use api::{ApiDriver, ApiProvider};
pub use chain::ChainDriver;
pub use http::{HttpClient, TransportError, UreqClient};
pub use ipapi::{IpApi, IpApiDriver};
pub use ipapico::{IpApiCo, IpApiCoDriver};
pub use iplocate::{IpLocate, IpLocateDriver};
pub use ipquery::{IpQuery, IpQueryDriver};
pub use maxmind::{CityDatabase, CityRecord, MaxMindDriver};
pub use null::NullDriver;
