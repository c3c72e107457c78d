//! # Reference Data Module
//!
//! Static lookups that enrich timing entries for display: driver details by
//! racing number and team colours by team name. The core engine never needs
//! them; they are consumed by hosts such as the `servers` monitor.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// JSON-backed lookup table.
pub mod table;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use table::{ReferenceError, ReferenceTable};

/// Static details about a driver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DriverInfo {
    pub number: String,
    pub first_name: String,
    pub last_name: String,
    /// Three-letter abbreviation, e.g. `VER`.
    pub code: Option<String>,
    pub team: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid colour '{0}': expected #RRGGBB")]
pub struct InvalidColor(pub String);

/// A `#RRGGBB` colour, stored upper-case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ColorHex(String);

impl ColorHex {
    pub fn parse(value: &str) -> Result<Self, InvalidColor> {
        let value = value.trim();
        let valid = value.len() == 7
            && value.starts_with('#')
            && value[1..].chars().all(|c| c.is_ascii_hexdigit());
        if !valid {
            return Err(InvalidColor(value.to_string()));
        }
        Ok(Self(value.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ColorHex {
    type Error = InvalidColor;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ColorHex> for String {
    fn from(color: ColorHex) -> Self {
        color.0
    }
}

impl fmt::Display for ColorHex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lookup of driver and team details.
pub trait ReferenceData: Send + Sync {
    fn resolve_driver_by_number(&self, number: &str) -> Option<DriverInfo>;

    fn resolve_team_color(&self, team: &str) -> Option<ColorHex>;
}
