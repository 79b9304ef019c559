use std::fs;
use std::io;
use std::sync::Mutex;

use serde::Deserialize;
use serde_json::Value;

use crate::adapters::authority::{AuthorityError, RemoteAuthority};
use crate::domain::authority_payload::{
    PayloadError, parse_estimate_seconds, parse_in_progress_session, parse_occupancy,
    parse_session_id,
};
use crate::domain::occupancy::{ActorId, InProgressSession, OccupancySnapshot};
use crate::domain::station::{Station, StationSet};

#[derive(Debug, Clone, Default, Deserialize)]
struct ScriptFile {
    #[serde(default = "default_loop")]
    loop_forever: bool,
    #[serde(default)]
    occupancy: Vec<ScriptEvent>,
    #[serde(default)]
    in_progress: Vec<ScriptEvent>,
    #[serde(default)]
    start_station: Vec<ScriptEvent>,
    #[serde(default)]
    stop_station: Vec<ScriptEvent>,
    #[serde(default)]
    estimate: Vec<ScriptEvent>,
    #[serde(default)]
    record_session: Vec<ScriptEvent>,
    #[serde(default)]
    record_stop: Vec<ScriptEvent>,
}

#[derive(Debug, Clone, Deserialize)]
struct ScriptEvent {
    #[serde(default, deserialize_with = "present_value")]
    ok: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum Operation {
    Occupancy,
    InProgress,
    StartStation,
    StopStation,
    Estimate,
    RecordSession,
    RecordStop,
}

impl Operation {
    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Default)]
struct ReplayState {
    cursors: [usize; 7],
    calls: Vec<String>,
}

/// Replays scripted authority responses from a JSON file.
///
/// Operations with no scripted events answer with a neutral success: a
/// vacant occupancy, no in-progress session, accepted start/stop calls and a
/// freshly generated session id. The estimate has no neutral answer and
/// fails so callers exercise their fallback.
#[derive(Debug)]
pub struct ScriptAuthority {
    script: ScriptFile,
    state: Mutex<ReplayState>,
}

fn default_loop() -> bool {
    true
}

/// Keeps an explicit `"ok": null` distinct from a missing `ok` key.
fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl ScriptAuthority {
    pub fn from_file(path: &str) -> Result<Self, AuthorityError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, AuthorityError> {
        let script: ScriptFile = serde_json::from_str(content)?;

        let all_events = [
            &script.occupancy,
            &script.in_progress,
            &script.start_station,
            &script.stop_station,
            &script.estimate,
            &script.record_session,
            &script.record_stop,
        ];
        if all_events.iter().all(|events| events.is_empty()) {
            return Err(AuthorityError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                "authority script must contain at least one event",
            )));
        }

        Ok(Self {
            script,
            state: Mutex::new(ReplayState::default()),
        })
    }

    /// Calls received so far, as `operation[:argument]` labels.
    pub fn calls(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|state| state.calls.clone())
            .unwrap_or_default()
    }

    fn events(&self, operation: Operation) -> &[ScriptEvent] {
        match operation {
            Operation::Occupancy => &self.script.occupancy,
            Operation::InProgress => &self.script.in_progress,
            Operation::StartStation => &self.script.start_station,
            Operation::StopStation => &self.script.stop_station,
            Operation::Estimate => &self.script.estimate,
            Operation::RecordSession => &self.script.record_session,
            Operation::RecordStop => &self.script.record_stop,
        }
    }

    /// Returns the next scripted event, or `None` when nothing is scripted.
    fn next_event(
        &self,
        operation: Operation,
        label: String,
    ) -> Result<Option<ScriptEvent>, AuthorityError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| AuthorityError::Scripted("replay state lock poisoned".to_string()))?;
        state.calls.push(label);

        let events = self.events(operation);
        if events.is_empty() {
            return Ok(None);
        }

        let cursor = &mut state.cursors[operation.index()];
        if *cursor >= events.len() {
            if self.script.loop_forever {
                *cursor = 0;
            } else {
                return Err(AuthorityError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "authority replay finished",
                )));
            }
        }

        let event = events.get(*cursor).cloned();
        *cursor = cursor.saturating_add(1);
        Ok(event)
    }

    fn execute_event(event: ScriptEvent) -> Result<Value, AuthorityError> {
        match (event.ok, event.error) {
            (Some(payload), None) => Ok(payload),
            (None, Some(error)) => Err(map_script_error(&error)),
            _ => Err(AuthorityError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                "script event must contain exactly one of: ok or error",
            ))),
        }
    }

    fn replay(
        &self,
        operation: Operation,
        label: String,
    ) -> Result<Option<Value>, AuthorityError> {
        self.next_event(operation, label)?
            .map(Self::execute_event)
            .transpose()
    }
}

fn map_script_error(kind: &str) -> AuthorityError {
    let normalized = kind.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "timeout" => AuthorityError::Io(io::Error::new(io::ErrorKind::TimedOut, kind)),
        "connection_refused" | "unreachable" => {
            AuthorityError::Io(io::Error::new(io::ErrorKind::ConnectionRefused, kind))
        }
        "unavailable" => AuthorityError::Status {
            status: 503,
            body: kind.to_string(),
        },
        "rejected" => AuthorityError::Status {
            status: 409,
            body: kind.to_string(),
        },
        "not_found" => AuthorityError::Status {
            status: 404,
            body: kind.to_string(),
        },
        "invalid_payload" => AuthorityError::Payload(PayloadError::InvalidPayloadType),
        _ => AuthorityError::Scripted(format!("unknown scripted error kind: {kind}")),
    }
}

impl RemoteAuthority for ScriptAuthority {
    async fn occupancy(&self) -> Result<OccupancySnapshot, AuthorityError> {
        match self.replay(Operation::Occupancy, "occupancy".to_string())? {
            Some(payload) => Ok(parse_occupancy(&payload)?),
            None => Ok(OccupancySnapshot::vacant()),
        }
    }

    async fn in_progress_session(
        &self,
        actor: &ActorId,
    ) -> Result<Option<InProgressSession>, AuthorityError> {
        match self.replay(Operation::InProgress, format!("in_progress:{actor}")) {
            Ok(Some(payload)) => Ok(parse_in_progress_session(&payload)?),
            Ok(None) | Err(AuthorityError::Status { status: 404, .. }) => Ok(None),
            Err(error) => Err(error),
        }
    }

    async fn start_station(&self, station: Station) -> Result<(), AuthorityError> {
        self.replay(Operation::StartStation, format!("start:{station}"))
            .map(|_| ())
    }

    async fn stop_station(&self, station: Station) -> Result<(), AuthorityError> {
        self.replay(Operation::StopStation, format!("stop:{station}"))
            .map(|_| ())
    }

    async fn estimate_duration(
        &self,
        _actor: &ActorId,
        stations: StationSet,
        _capacity_liters: f64,
    ) -> Result<u32, AuthorityError> {
        match self.replay(Operation::Estimate, format!("estimate:{stations}"))? {
            Some(payload) => Ok(parse_estimate_seconds(&payload)?),
            None => Err(AuthorityError::Scripted("no estimate scripted".to_string())),
        }
    }

    async fn record_session(
        &self,
        _actor: &ActorId,
        _amount_liters: f64,
        stations: StationSet,
    ) -> Result<String, AuthorityError> {
        match self.replay(Operation::RecordSession, format!("record_session:{stations}"))? {
            Some(payload) => Ok(parse_session_id(&payload)?),
            None => Ok(uuid::Uuid::new_v4().to_string()),
        }
    }

    async fn record_stop(
        &self,
        _actor: &ActorId,
        remote_session_id: &str,
    ) -> Result<(), AuthorityError> {
        self.replay(
            Operation::RecordStop,
            format!("record_stop:{remote_session_id}"),
        )
        .map(|_| ())
    }
}
