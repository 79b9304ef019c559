use serde::Serialize;
use thiserror::Error;

use crate::domain::occupancy::{ActorId, OccupancySnapshot};
use crate::domain::station::{Station, StationSet};

/// Why a station request was refused. Denials are user-facing outcomes,
/// not failures, and are never retried automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Denial {
    #[error("you already have a fill running; stop it before starting another")]
    SessionAlreadyActive,
    #[error("{station} is in use by another customer")]
    StationBusy { station: Station },
    #[error("both stations must be free for a dual fill")]
    DualUnavailable,
}

/// Decides whether `requested` may be started by `actor` given `occupancy`.
///
/// Must be called with a snapshot fetched at the point of action.
pub fn evaluate(
    requested: StationSet,
    actor: &ActorId,
    occupancy: &OccupancySnapshot,
) -> Result<(), Denial> {
    match occupancy.active_actor.as_ref() {
        Some(active) if active == actor => Err(Denial::SessionAlreadyActive),
        Some(_) => match requested {
            StationSet::Single(station) if occupancy.power(station).is_on() => {
                Err(Denial::StationBusy { station })
            }
            StationSet::Dual if !occupancy.all_off(StationSet::Dual) => {
                Err(Denial::DualUnavailable)
            }
            _ => Ok(()),
        },
        None => Ok(()),
    }
}

pub fn can_admit(requested: StationSet, actor: &ActorId, occupancy: &OccupancySnapshot) -> bool {
    evaluate(requested, actor, occupancy).is_ok()
}
