use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One of the two physical pump outlets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Station {
    #[serde(rename = "stationA")]
    A,
    #[serde(rename = "stationB")]
    B,
}

impl Station {
    pub const ALL: [Station; 2] = [Station::A, Station::B];

    pub fn label(self) -> &'static str {
        match self {
            Station::A => "stationA",
            Station::B => "stationB",
        }
    }
}

impl fmt::Display for Station {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown station label: {0}")]
pub struct UnknownStation(pub String);

impl FromStr for Station {
    type Err = UnknownStation;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized: String = value
            .chars()
            .filter(|char| char.is_ascii_alphanumeric())
            .flat_map(|char| char.to_lowercase())
            .collect();

        match normalized.as_str() {
            "stationa" | "a" | "1" => Ok(Station::A),
            "stationb" | "b" | "2" => Ok(Station::B),
            _ => Err(UnknownStation(value.to_string())),
        }
    }
}

/// The stations claimed by a single request. A dual request claims both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StationSet {
    Single(Station),
    Dual,
}

impl StationSet {
    pub fn stations(self) -> &'static [Station] {
        match self {
            StationSet::Single(Station::A) => &[Station::A],
            StationSet::Single(Station::B) => &[Station::B],
            StationSet::Dual => &Station::ALL,
        }
    }

    pub fn contains(self, station: Station) -> bool {
        self.stations().contains(&station)
    }

    pub fn is_dual(self) -> bool {
        matches!(self, StationSet::Dual)
    }

    pub fn label(self) -> &'static str {
        match self {
            StationSet::Single(station) => station.label(),
            StationSet::Dual => "dual",
        }
    }
}

impl fmt::Display for StationSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for StationSet {
    type Err = UnknownStation;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case("dual") || trimmed.eq_ignore_ascii_case("both") {
            return Ok(StationSet::Dual);
        }
        trimmed.parse().map(StationSet::Single)
    }
}

impl TryFrom<String> for StationSet {
    type Error = UnknownStation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StationSet> for String {
    fn from(value: StationSet) -> Self {
        value.label().to_string()
    }
}

/// Power state of a station as reported by the remote authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StationPower {
    On,
    #[default]
    Off,
}

impl StationPower {
    pub fn is_on(self) -> bool {
        matches!(self, StationPower::On)
    }
}
