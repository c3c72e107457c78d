//! # Timing Payload Model
//!
//! The business payload carried as the first argument of a `DATA` envelope.
//! Fields are kept exactly as received: everything is optional, numbers are
//! accepted where strings are expected, and driver order is the server's.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::envelope::DecodeError;

/// Opaque session identifier. The feed sends either a number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SessionId {
    Number(i64),
    Text(String),
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionId::Number(n) => write!(f, "{}", n),
            SessionId::Text(s) => f.write_str(s),
        }
    }
}

/// One driver's line in the timing table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DriverTimingEntry {
    #[serde(deserialize_with = "lenient_string")]
    pub position: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub position_display: Option<String>,
    /// Racing number, used by presentation code for reference-data lookups.
    #[serde(deserialize_with = "lenient_string", alias = "racingNumber")]
    pub number: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub first_name: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub last_name: Option<String>,
    #[serde(deserialize_with = "lenient_string", alias = "externalTeam", alias = "teamName")]
    pub team: Option<String>,
    /// Elapsed race time as displayed by the feed.
    #[serde(deserialize_with = "lenient_string")]
    pub race_time: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub gap: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub interval: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub laps: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub pits: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub tyre_compound: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub tyre_age: Option<String>,
    /// Sector times in track order; a sector not yet run is `None`.
    #[serde(deserialize_with = "lenient_sectors")]
    pub sectors: Vec<Option<String>>,
    /// Highlight per sector, parallel to `sectors`.
    #[serde(deserialize_with = "lenient_highlights")]
    pub sector_colors: Vec<SectorHighlight>,
    #[serde(deserialize_with = "lenient_status")]
    pub status: DriverStatus,
}

/// How a sector time compares with the best times so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SectorHighlight {
    #[default]
    Regular,
    PersonalFastest,
    OverallFastest,
}

impl SectorHighlight {
    /// 1 is personal fastest, 2 overall fastest, anything else regular.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => SectorHighlight::PersonalFastest,
            2 => SectorHighlight::OverallFastest,
            _ => SectorHighlight::Regular,
        }
    }

    fn from_value(value: &Value) -> Self {
        match value {
            Value::Number(n) => n.as_i64().map(Self::from_code).unwrap_or_default(),
            Value::String(s) => match normalise(s).as_str() {
                "personalfastest" | "personal" => SectorHighlight::PersonalFastest,
                "overallfastest" | "overall" => SectorHighlight::OverallFastest,
                _ => SectorHighlight::Regular,
            },
            Value::Object(map) => {
                if flag(map, &["overallFastest", "OverallFastest"]) {
                    SectorHighlight::OverallFastest
                } else if flag(map, &["personalFastest", "PersonalFastest"]) {
                    SectorHighlight::PersonalFastest
                } else {
                    SectorHighlight::Regular
                }
            }
            _ => SectorHighlight::Regular,
        }
    }
}

/// Whether the car is running, in the pit lane or out of the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DriverStatus {
    #[default]
    Running,
    InPit,
    Retired,
    Stopped,
}

impl DriverStatus {
    /// 1 in pit, 2 retired, 3 stopped, anything else running.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => DriverStatus::InPit,
            2 => DriverStatus::Retired,
            3 => DriverStatus::Stopped,
            _ => DriverStatus::Running,
        }
    }

    /// Retired wins over stopped, stopped over in pit.
    fn from_flags(map: &Map<String, Value>) -> Self {
        if flag(map, &["retired", "Retired"]) {
            DriverStatus::Retired
        } else if flag(map, &["stopped", "Stopped"]) {
            DriverStatus::Stopped
        } else if flag(map, &["inPit", "InPit"]) {
            DriverStatus::InPit
        } else {
            DriverStatus::Running
        }
    }
}

impl DriverTimingEntry {
    /// Decodes one element of the drivers array.
    ///
    /// Besides the plain fields, highlights are read from sector objects when
    /// no explicit `sectorColors` are sent, and `inPit`/`retired`/`stopped`
    /// flags fill in the status when no `status` is sent.
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        let mut entry = Self::deserialize(value)?;
        let Some(map) = value.as_object() else {
            return Ok(entry);
        };

        if !map.contains_key("sectorColors") {
            if let Some(Value::Array(sectors)) = map.get("sectors") {
                if sectors.iter().any(Value::is_object) {
                    entry.sector_colors = sectors.iter().map(SectorHighlight::from_value).collect();
                }
            }
        }
        if !map.contains_key("status") {
            entry.status = DriverStatus::from_flags(map);
        }
        Ok(entry)
    }

    /// "First Last", or whichever half is present.
    pub fn display_name(&self) -> Option<String> {
        match (self.first_name.as_deref(), self.last_name.as_deref()) {
            (Some(first), Some(last)) => Some(format!("{} {}", first, last)),
            (Some(only), None) | (None, Some(only)) => Some(only.to_string()),
            (None, None) => None,
        }
    }
}

/// A complete picture of the timing table at one point in time.
///
/// Immutable once built. A new snapshot replaces the previous one wholesale;
/// nothing is merged across messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingSnapshot {
    pub session_id: Option<SessionId>,
    pub session_name: String,
    pub current_lap: Option<String>,
    pub total_laps: Option<String>,
    pub entries: Vec<DriverTimingEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePayload {
    #[serde(default, alias = "sessionId")]
    selected_session_id: Option<SessionId>,
    #[serde(default, deserialize_with = "lenient_string", alias = "sessionName")]
    race_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    current_lap: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    total_laps: Option<String>,
    #[serde(default, alias = "entries", alias = "results", alias = "lines")]
    drivers: Option<Vec<Value>>,
}

impl TimingSnapshot {
    /// Builds a snapshot from the first argument of a `DATA` envelope.
    pub fn from_payload(payload: &Value) -> Result<Self, DecodeError> {
        if !payload.is_object() {
            return Err(DecodeError::Payload(format!(
                "expected an object, found {}",
                if payload.is_array() { "an array" } else { "a scalar" }
            )));
        }

        let wire = WirePayload::deserialize(payload)
            .map_err(|e| DecodeError::Payload(e.to_string()))?;

        let entries = wire
            .drivers
            .unwrap_or_default()
            .iter()
            .map(DriverTimingEntry::from_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DecodeError::Payload(e.to_string()))?;

        Ok(Self {
            session_id: wire.selected_session_id,
            session_name: wire.race_name.unwrap_or_default(),
            current_lap: wire.current_lap,
            total_laps: wire.total_laps,
            entries,
        })
    }

    /// The first entry in server order, which the feed lists as the leader.
    pub fn leader(&self) -> Option<&DriverTimingEntry> {
        self.entries.first()
    }
}

/// Accepts strings, numbers and booleans; everything else becomes `None`.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Sector values may be scalars or objects carrying a `value` field.
fn lenient_sectors<'de, D>(deserializer: D) -> Result<Vec<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let Some(Value::Array(items)) = value else {
        return Ok(Vec::new());
    };
    Ok(items
        .iter()
        .map(|item| match item {
            Value::Object(map) => map
                .get("value")
                .or_else(|| map.get("Value"))
                .and_then(scalar_string)
                .filter(|s| !s.is_empty()),
            other => scalar_string(other),
        })
        .collect())
}

fn lenient_highlights<'de, D>(deserializer: D) -> Result<Vec<SectorHighlight>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Array(items)) => items.iter().map(SectorHighlight::from_value).collect(),
        _ => Vec::new(),
    })
}

fn lenient_status<'de, D>(deserializer: D) -> Result<DriverStatus, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_i64().map(DriverStatus::from_code).unwrap_or_default(),
        Some(Value::String(s)) => match normalise(&s).as_str() {
            "inpit" | "pit" => DriverStatus::InPit,
            "retired" | "out" => DriverStatus::Retired,
            "stopped" => DriverStatus::Stopped,
            _ => DriverStatus::Running,
        },
        _ => DriverStatus::Running,
    })
}

fn normalise(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn flag(map: &Map<String, Value>, keys: &[&str]) -> bool {
    keys.iter().any(|k| map.get(*k).and_then(Value::as_bool).unwrap_or(false))
}
