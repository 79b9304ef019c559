use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::clock::TimestampMs;
use crate::domain::station::{Station, StationPower, StationSet};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub String);

impl ActorId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// System-wide view of who is filling and which stations are powered.
///
/// Snapshots are ephemeral: every admission decision and every remote-stop
/// check is made against the snapshot passed in, never a cached one.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OccupancySnapshot {
    pub active_actor: Option<ActorId>,
    pub station_a: StationPower,
    pub station_b: StationPower,
}

impl OccupancySnapshot {
    /// Nobody active and both stations off; what "no content" means.
    pub fn vacant() -> Self {
        Self::default()
    }

    pub fn power(&self, station: Station) -> StationPower {
        match station {
            Station::A => self.station_a,
            Station::B => self.station_b,
        }
    }

    pub fn is_held_by(&self, actor: &ActorId) -> bool {
        self.active_actor.as_ref() == Some(actor)
    }

    pub fn all_off(&self, stations: StationSet) -> bool {
        stations
            .stations()
            .iter()
            .all(|station| !self.power(*station).is_on())
    }
}

/// A session the authority reports as still running for an actor.
#[derive(Debug, Clone, PartialEq)]
pub struct InProgressSession {
    pub stations: StationSet,
    pub started_at: Option<TimestampMs>,
    pub amount_liters: Option<f64>,
    pub predicted_duration_seconds: Option<u32>,
    pub remote_session_id: Option<String>,
}
