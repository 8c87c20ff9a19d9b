//! Local MaxMind City database.

use std::fs::File;
use std::net::IpAddr;
use std::path::Path;

use maxminddb::{geoip2, MaxMindDbError, PathElement, Reader};
use tracing::debug;

use crate::driver::GeoLocationDriver;
use crate::error::{Error, Result};
use crate::location::Location;

/// Point lookups against a City-shaped database.
pub trait CityDatabase: Send + Sync {
    fn lookup_city(&self, ip: IpAddr) -> std::result::Result<Option<CityRecord>, MaxMindDbError>;
}

impl CityDatabase for Reader<Vec<u8>> {
    fn lookup_city(&self, ip: IpAddr) -> std::result::Result<Option<CityRecord>, MaxMindDbError> {
        let result = self.lookup(ip)?;
        let Some(city) = result.decode::<geoip2::City>()? else {
            return Ok(None);
        };

        // City's traits carry no ASN; Enterprise and merged builds store it
        // under the same keys.
        let asn_number: Option<u32> = result.decode_path(&[
            PathElement::Key("traits"),
            PathElement::Key("autonomous_system_number"),
        ])?;
        let asn_organization: Option<String> = result.decode_path(&[
            PathElement::Key("traits"),
            PathElement::Key("autonomous_system_organization"),
        ])?;

        let mut record = CityRecord::from(city);
        record.traits = Traits {
            autonomous_system_number: asn_number,
            autonomous_system_organization: asn_organization,
        };
        Ok(Some(record))
    }
}

/// Owned copy of the GeoIP2/GeoLite2 City fields we read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CityRecord {
    pub city: Named,
    pub continent: Coded,
    pub country: Country,
    pub location: Coordinates,
    pub postal: Coded,
    pub subdivisions: Vec<Subdivision>,
    pub traits: Traits,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Names {
    pub en: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Named {
    pub names: Names,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Coded {
    pub code: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Country {
    pub iso_code: Option<String>,
    pub names: Names,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Subdivision {
    pub iso_code: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Coordinates {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Traits {
    pub autonomous_system_number: Option<u32>,
    pub autonomous_system_organization: Option<String>,
}

impl From<&geoip2::Names<'_>> for Names {
    fn from(names: &geoip2::Names<'_>) -> Self {
        Self {
            en: names.english.map(String::from),
        }
    }
}

impl From<geoip2::City<'_>> for CityRecord {
    fn from(city: geoip2::City<'_>) -> Self {
        Self {
            city: Named {
                names: Names::from(&city.city.names),
            },
            continent: Coded {
                code: city.continent.code.map(String::from),
            },
            country: Country {
                iso_code: city.country.iso_code.map(String::from),
                names: Names::from(&city.country.names),
            },
            location: Coordinates {
                latitude: city.location.latitude,
                longitude: city.location.longitude,
                time_zone: city.location.time_zone.map(String::from),
            },
            postal: Coded {
                code: city.postal.code.map(String::from),
            },
            subdivisions: city
                .subdivisions
                .iter()
                .map(|s| Subdivision {
                    iso_code: s.iso_code.map(String::from),
                })
                .collect(),
            traits: Traits::default(),
        }
    }
}

impl CityRecord {
    fn into_location(self, ip: &str) -> Location {
        // subdivisions run from least to most specific
        let state = self.subdivisions.into_iter().last().and_then(|s| s.iso_code);

        Location::new(ip)
            .with_iso_code(self.country.iso_code)
            .with_country(self.country.names.en)
            .with_city(self.city.names.en)
            .with_state(state)
            .with_postal_code(self.postal.code)
            .with_lat(self.location.latitude)
            .with_lon(self.location.longitude)
            .with_timezone(self.location.time_zone)
            .with_continent(self.continent.code)
            .with_asn_number(self.traits.autonomous_system_number.map(|n| n.to_string()))
            .with_asn_organization(self.traits.autonomous_system_organization)
    }
}

pub struct MaxMindDriver {
    name: String,
    db: Box<dyn CityDatabase>,
}

impl MaxMindDriver {
    /// Open the database at `path`, once.
    pub fn open<N: Into<String>>(name: N, path: &Path) -> Result<Self> {
        let name = name.into();
        if let Err(e) = File::open(path) {
            return Err(Error::configuration(
                name,
                format!(
                    "the MaxMind database file does not exist or is not readable at path: {} ({})",
                    path.display(),
                    e
                ),
            ));
        }

        let reader = Reader::open_readfile(path).map_err(|e| {
            Error::configuration(
                name.as_str(),
                format!("{} is not a valid MaxMind database: {}", path.display(), e),
            )
        })?;
        debug!(
            driver = %name,
            path = %path.display(),
            database_type = %reader.metadata.database_type,
            "opened MaxMind database"
        );

        Ok(Self::with_database(name, Box::new(reader)))
    }

    pub fn with_database<N: Into<String>>(name: N, db: Box<dyn CityDatabase>) -> Self {
        Self {
            name: name.into(),
            db,
        }
    }
}

impl GeoLocationDriver for MaxMindDriver {
    fn resolve(&self, ip: &str) -> Result<Location> {
        let addr: IpAddr = ip.parse().map_err(|e| {
            Error::not_found_with(format!("The address {} is not in the database.", ip), e)
        })?;

        match self.db.lookup_city(addr) {
            Ok(Some(record)) => Ok(record.into_location(ip)),
            Ok(None) => Err(Error::not_found(format!(
                "The address {} is not in the database.",
                ip
            ))),
            Err(e) => Err(Error::not_found_with(
                format!("MaxMind lookup for {} failed: {}", ip, e),
                e,
            )),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
