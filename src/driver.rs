use std::sync::Arc;

use crate::error::Result;
use crate::location::Location;

/// The contract every geolocation backend satisfies.
///
/// Implementations make at most one attempt per call and report an address
/// they cannot place as [`crate::Error::LocationNotFound`].
pub trait GeoLocationDriver: Send + Sync {
    /// Resolve `ip` into a [`Location`] whose `ip` is exactly `ip`.
    fn resolve(&self, ip: &str) -> Result<Location>;

    /// Name used in logs and chain failure reports.
    fn name(&self) -> &str;
}

/// Hands out ready-to-use driver instances by name.
///
/// Composite drivers hold one of these to reach their members through the same
/// construction and cache wrapping as top-level lookups.
pub trait DriverResolver: Send + Sync {
    fn driver(&self, name: &str) -> Result<Arc<dyn GeoLocationDriver>>;
}
