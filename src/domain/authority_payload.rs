use chrono::DateTime;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::clock::TimestampMs;
use crate::domain::occupancy::{ActorId, InProgressSession, OccupancySnapshot};
use crate::domain::station::{Station, StationPower, StationSet};

#[derive(Debug, Error, PartialEq)]
pub enum PayloadError {
    #[error("payload must be a JSON object")]
    InvalidPayloadType,
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid value for field {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

const ACTIVE_ACTOR_KEYS: &[&str] = &[
    "activeActorId",
    "activeActor",
    "actorId",
    "userId",
    "customerId",
];
const STATION_A_KEYS: &[&str] = &["stationA", "pumpA", "station1", "valve1"];
const STATION_B_KEYS: &[&str] = &["stationB", "pumpB", "station2", "valve2"];
const STATION_SET_KEYS: &[&str] = &["stations", "stationSet", "station", "mode"];
const STARTED_AT_KEYS: &[&str] = &["startedAt", "startTime", "started", "createdAt"];
const AMOUNT_KEYS: &[&str] = &["amount", "capacityLiters", "capacity", "liters"];
const PREDICTED_KEYS: &[&str] = &["predictedDurationSeconds", "durationSeconds", "duration"];
const SESSION_ID_KEYS: &[&str] = &["remoteSessionId", "sessionId", "id"];
const ESTIMATE_KEYS: &[&str] = &["seconds", "durationSeconds", "estimate", "duration"];

// Numbers above this are treated as epoch milliseconds, below as epoch seconds.
const EPOCH_MILLIS_THRESHOLD: f64 = 100_000_000_000.0;

/// Parses an occupancy payload. `null` and `{}` both mean nobody is active.
pub fn parse_occupancy(payload: &Value) -> Result<OccupancySnapshot, PayloadError> {
    if payload.is_null() {
        return Ok(OccupancySnapshot::vacant());
    }
    let object = payload.as_object().ok_or(PayloadError::InvalidPayloadType)?;

    let active_actor = find_value(object, ACTIVE_ACTOR_KEYS)
        .and_then(parse_identifier)
        .map(ActorId);

    Ok(OccupancySnapshot {
        active_actor,
        station_a: find_power(object, STATION_A_KEYS)?,
        station_b: find_power(object, STATION_B_KEYS)?,
    })
}

/// Parses an in-progress session payload.
///
/// `null`, an empty object and an empty array all mean there is nothing to
/// recover. Arrays are accepted and their first element is used.
pub fn parse_in_progress_session(
    payload: &Value,
) -> Result<Option<InProgressSession>, PayloadError> {
    let payload = match payload {
        Value::Null => return Ok(None),
        Value::Array(items) => match items.first() {
            Some(first) => first,
            None => return Ok(None),
        },
        other => other,
    };
    let object = payload.as_object().ok_or(PayloadError::InvalidPayloadType)?;
    if object.is_empty() {
        return Ok(None);
    }

    let stations = parse_station_set(object)?;
    let started_at = match find_value(object, STARTED_AT_KEYS) {
        Some(Value::Null) | None => None,
        Some(value) => {
            let parsed = parse_timestamp(value);
            if parsed.is_none() {
                tracing::warn!(value = %value, "ignoring unusable session start time");
            }
            parsed
        }
    };
    let amount_liters = find_number(object, AMOUNT_KEYS).filter(|value| *value > 0.0);
    let predicted_duration_seconds = find_number(object, PREDICTED_KEYS).and_then(f64_to_seconds);
    let remote_session_id = find_value(object, SESSION_ID_KEYS).and_then(parse_identifier);

    Ok(Some(InProgressSession {
        stations,
        started_at,
        amount_liters,
        predicted_duration_seconds,
        remote_session_id,
    }))
}

/// Parses a duration estimate: a bare number or an object holding one.
pub fn parse_estimate_seconds(payload: &Value) -> Result<u32, PayloadError> {
    let number = match payload {
        Value::Object(object) => find_number(object, ESTIMATE_KEYS),
        other => parse_f64(other),
    };

    let number = number.ok_or(PayloadError::MissingField("seconds|durationSeconds"))?;
    f64_to_seconds(number).ok_or_else(|| PayloadError::InvalidValue {
        field: "seconds",
        value: number.to_string(),
    })
}

/// Parses the identifier returned when a session is recorded.
pub fn parse_session_id(payload: &Value) -> Result<String, PayloadError> {
    match payload {
        Value::Object(object) => find_value(object, SESSION_ID_KEYS)
            .and_then(parse_identifier)
            .ok_or(PayloadError::MissingField("remoteSessionId|sessionId|id")),
        other => parse_identifier(other).ok_or(PayloadError::InvalidPayloadType),
    }
}

fn parse_station_set(object: &Map<String, Value>) -> Result<StationSet, PayloadError> {
    if let Some(value) = find_value(object, STATION_SET_KEYS) {
        return match value {
            Value::String(text) => {
                text.parse()
                    .map_err(|_| PayloadError::InvalidValue {
                        field: "stations",
                        value: text.clone(),
                    })
            }
            Value::Array(items) => station_set_from_list(items),
            other => Err(PayloadError::InvalidValue {
                field: "stations",
                value: other.to_string(),
            }),
        };
    }

    let station_a = find_power(object, STATION_A_KEYS)?.is_on();
    let station_b = find_power(object, STATION_B_KEYS)?.is_on();
    match (station_a, station_b) {
        (true, true) => Ok(StationSet::Dual),
        (true, false) => Ok(StationSet::Single(Station::A)),
        (false, true) => Ok(StationSet::Single(Station::B)),
        (false, false) => Err(PayloadError::MissingField("stations")),
    }
}

fn station_set_from_list(items: &[Value]) -> Result<StationSet, PayloadError> {
    let mut stations = Vec::new();
    for item in items {
        let station = item
            .as_str()
            .and_then(|text| text.parse::<Station>().ok())
            .ok_or_else(|| PayloadError::InvalidValue {
                field: "stations",
                value: item.to_string(),
            })?;
        if !stations.contains(&station) {
            stations.push(station);
        }
    }

    match stations.as_slice() {
        [single] => Ok(StationSet::Single(*single)),
        [_, _] => Ok(StationSet::Dual),
        _ => Err(PayloadError::MissingField("stations")),
    }
}

fn find_power(object: &Map<String, Value>, aliases: &[&str]) -> Result<StationPower, PayloadError> {
    let Some(value) = find_value(object, aliases) else {
        return Ok(StationPower::Off);
    };

    parse_power(value).ok_or_else(|| PayloadError::InvalidValue {
        field: "station power",
        value: value.to_string(),
    })
}

fn parse_power(value: &Value) -> Option<StationPower> {
    let on = match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64()? > 0.0,
        Value::String(text) => match normalize_key(text).as_str() {
            "on" | "true" | "1" | "running" | "active" | "open" => true,
            "off" | "false" | "0" | "stopped" | "inactive" | "closed" | "" => false,
            _ => return None,
        },
        _ => return None,
    };

    Some(if on {
        StationPower::On
    } else {
        StationPower::Off
    })
}

fn parse_identifier(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => {
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn parse_timestamp(value: &Value) -> Option<TimestampMs> {
    match value {
        Value::String(text) => {
            let trimmed = text.trim();
            if let Ok(datetime) = DateTime::parse_from_rfc3339(trimmed) {
                return Some(TimestampMs(datetime.timestamp_millis()));
            }
            trimmed.parse::<f64>().ok().and_then(epoch_to_timestamp)
        }
        Value::Number(number) => number.as_f64().and_then(epoch_to_timestamp),
        _ => None,
    }
}

fn epoch_to_timestamp(value: f64) -> Option<TimestampMs> {
    if !value.is_finite() || value <= 0.0 {
        return None;
    }

    let millis = if value >= EPOCH_MILLIS_THRESHOLD {
        value
    } else {
        value * 1000.0
    };
    Some(TimestampMs(millis.round() as i64))
}

fn find_number(object: &Map<String, Value>, aliases: &[&str]) -> Option<f64> {
    find_value(object, aliases).and_then(parse_f64)
}

fn find_value<'a>(object: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    for alias in aliases {
        if let Some(value) = object.get(*alias) {
            return Some(value);
        }
    }

    let normalized_aliases: Vec<String> =
        aliases.iter().map(|alias| normalize_key(alias)).collect();

    object.iter().find_map(|(key, value)| {
        let normalized_key = normalize_key(key);
        if normalized_aliases
            .iter()
            .any(|alias| alias == &normalized_key)
        {
            Some(value)
        } else {
            None
        }
    })
}

fn normalize_key(value: &str) -> String {
    value
        .chars()
        .filter(|char| char.is_ascii_alphanumeric())
        .flat_map(|char| char.to_lowercase())
        .collect()
}

fn parse_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().replace(',', ".").parse::<f64>().ok(),
        _ => None,
    }
}

fn f64_to_seconds(value: f64) -> Option<u32> {
    if !value.is_finite() || value < 0.0 || value > f64::from(u32::MAX) {
        return None;
    }

    Some(value.ceil() as u32)
}
