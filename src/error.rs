/// Error types for the geolocate library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The address is malformed, private or reserved. No driver was consulted.
    #[error(transparent)]
    InvalidAddress(#[from] ip_gate::Rejection),

    /// A single driver could not resolve the address.
    #[error("{message}")]
    LocationNotFound {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A driver could not be constructed from its settings.
    #[error("driver '{driver}' is misconfigured: {reason}")]
    Configuration { driver: String, reason: String },

    /// No factory is registered under this driver name.
    #[error("unknown driver: {name}")]
    UnknownDriver { name: String },

    /// Both the default and the fallback driver failed.
    #[error("both primary and fallback drivers failed. Original error: {primary}")]
    AggregateFailure {
        primary: Box<Error>,
        #[source]
        fallback: Box<Error>,
    },

    /// Configuration could not be read or holds an unusable value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The cache store could not be maintained.
    #[error("cache store error: {0}")]
    Cache(String),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn not_found<T: Into<String>>(message: T) -> Self {
        Error::LocationNotFound {
            message: message.into(),
            source: None,
        }
    }

    pub fn not_found_with<T, E>(message: T, source: E) -> Self
    where
        T: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::LocationNotFound {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn configuration<D: Into<String>, R: Into<String>>(driver: D, reason: R) -> Self {
        Error::Configuration {
            driver: driver.into(),
            reason: reason.into(),
        }
    }

    /// Whether this is an expected per-lookup miss, as opposed to a fatal failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::LocationNotFound { .. })
    }
}

/// Convenience type alias for Results using the library error.
pub type Result<T> = std::result::Result<T, Error>;
