use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use super::{ColorHex, DriverInfo, ReferenceData};

#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("Failed to read reference file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid reference data: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ReferenceDocument {
    drivers: HashMap<String, DriverInfo>,
    team_colors: HashMap<String, ColorHex>,
}

/// In-memory [`ReferenceData`] loaded from JSON.
///
/// ```json
/// {
///   "drivers": { "1": { "firstName": "Max", "lastName": "Verstappen", "code": "VER", "team": "Red Bull" } },
///   "teamColors": { "Red Bull": "#3671C6" }
/// }
/// ```
///
/// Team names match case-insensitively. A driver's `number` defaults to its
/// key when the document leaves it out.
#[derive(Debug, Clone, Default)]
pub struct ReferenceTable {
    drivers: HashMap<String, DriverInfo>,
    team_colors: HashMap<String, ColorHex>,
}

impl ReferenceTable {
    pub fn from_json(json: &str) -> Result<Self, ReferenceError> {
        let doc: ReferenceDocument = serde_json::from_str(json)?;

        let drivers = doc
            .drivers
            .into_iter()
            .map(|(key, mut info)| {
                let key = key.trim().to_string();
                if info.number.is_empty() {
                    info.number = key.clone();
                }
                (key, info)
            })
            .collect();

        let team_colors = doc
            .team_colors
            .into_iter()
            .map(|(team, color)| (team.trim().to_lowercase(), color))
            .collect();

        Ok(Self { drivers, team_colors })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ReferenceError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ReferenceError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let table = Self::from_json(&content)?;
        log::info!(
            "Loaded reference data from {}: {} drivers, {} team colours.",
            path.display(),
            table.drivers.len(),
            table.team_colors.len()
        );
        Ok(table)
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty() && self.team_colors.is_empty()
    }
}

impl ReferenceData for ReferenceTable {
    fn resolve_driver_by_number(&self, number: &str) -> Option<DriverInfo> {
        self.drivers.get(number.trim()).cloned()
    }

    fn resolve_team_color(&self, team: &str) -> Option<ColorHex> {
        self.team_colors.get(&team.trim().to_lowercase()).cloned()
    }
}
