use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

use crate::adapters::authority::{AuthorityError, RemoteAuthority};
use crate::domain::clock::{Clock, TimestampMs};
use crate::domain::occupancy::{ActorId, InProgressSession, OccupancySnapshot};
use crate::domain::station::{Station, StationPower, StationSet};

pub const ACTOR: &str = "cust-1";
pub const OTHER_ACTOR: &str = "cust-2";
pub const START_MS: i64 = 1_700_000_000_000;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Occupancy,
    InProgress,
    Start(Station),
    Stop(Station),
    Estimate(StationSet),
    RecordSession(StationSet),
    RecordStop(String),
}

#[derive(Debug)]
struct FakeState {
    occupancy: OccupancySnapshot,
    occupancy_fails: bool,
    in_progress: Option<InProgressSession>,
    failing_starts: HashSet<Station>,
    failing_stops: HashSet<Station>,
    stop_delay: Duration,
    record_delay: Duration,
    estimate: Option<u32>,
    record_session_id: Option<String>,
    calls: Vec<(Instant, Call)>,
}

/// In-memory authority whose answers tests set up front and whose calls
/// are recorded with the (possibly paused) tokio time they arrived at.
#[derive(Debug, Clone)]
pub struct FakeAuthority {
    state: Arc<Mutex<FakeState>>,
}

impl Default for FakeAuthority {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                occupancy: OccupancySnapshot::vacant(),
                occupancy_fails: false,
                in_progress: None,
                failing_starts: HashSet::new(),
                failing_stops: HashSet::new(),
                stop_delay: Duration::ZERO,
                record_delay: Duration::ZERO,
                estimate: None,
                record_session_id: Some("sess-1".to_string()),
                calls: Vec::new(),
            })),
        }
    }
}

impl FakeAuthority {
    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake authority lock")
    }

    pub fn set_occupancy(&self, occupancy: OccupancySnapshot) {
        self.lock().occupancy = occupancy;
    }

    pub fn fail_occupancy(&self, fails: bool) {
        self.lock().occupancy_fails = fails;
    }

    pub fn set_in_progress(&self, session: Option<InProgressSession>) {
        self.lock().in_progress = session;
    }

    pub fn fail_start(&self, station: Station) {
        self.lock().failing_starts.insert(station);
    }

    pub fn fail_stop(&self, station: Station, fails: bool) {
        let mut state = self.lock();
        if fails {
            state.failing_stops.insert(station);
        } else {
            state.failing_stops.remove(&station);
        }
    }

    pub fn set_stop_delay(&self, delay: Duration) {
        self.lock().stop_delay = delay;
    }

    pub fn set_record_delay(&self, delay: Duration) {
        self.lock().record_delay = delay;
    }

    pub fn set_estimate(&self, seconds: Option<u32>) {
        self.lock().estimate = seconds;
    }

    pub fn set_record_session_id(&self, id: Option<&str>) {
        self.lock().record_session_id = id.map(ToString::to_string);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.iter().map(|(_, call)| call.clone()).collect()
    }

    pub fn timed_calls(&self) -> Vec<(Instant, Call)> {
        self.lock().calls.clone()
    }

    pub fn hardware_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, Call::Start(_) | Call::Stop(_)))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    fn record(&self, call: Call) {
        self.lock().calls.push((Instant::now(), call));
    }
}

fn scripted(message: &str) -> AuthorityError {
    AuthorityError::Scripted(message.to_string())
}

impl RemoteAuthority for FakeAuthority {
    async fn occupancy(&self) -> Result<OccupancySnapshot, AuthorityError> {
        self.record(Call::Occupancy);
        let state = self.lock();
        if state.occupancy_fails {
            return Err(scripted("occupancy unavailable"));
        }
        Ok(state.occupancy.clone())
    }

    async fn in_progress_session(
        &self,
        _actor: &ActorId,
    ) -> Result<Option<InProgressSession>, AuthorityError> {
        self.record(Call::InProgress);
        Ok(self.lock().in_progress.clone())
    }

    async fn start_station(&self, station: Station) -> Result<(), AuthorityError> {
        self.record(Call::Start(station));
        if self.lock().failing_starts.contains(&station) {
            return Err(scripted("start rejected"));
        }
        Ok(())
    }

    async fn stop_station(&self, station: Station) -> Result<(), AuthorityError> {
        self.record(Call::Stop(station));
        let (delay, fails) = {
            let state = self.lock();
            (state.stop_delay, state.failing_stops.contains(&station))
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if fails {
            return Err(scripted("stop rejected"));
        }
        Ok(())
    }

    async fn estimate_duration(
        &self,
        _actor: &ActorId,
        stations: StationSet,
        _capacity_liters: f64,
    ) -> Result<u32, AuthorityError> {
        self.record(Call::Estimate(stations));
        self.lock()
            .estimate
            .ok_or_else(|| scripted("estimator offline"))
    }

    async fn record_session(
        &self,
        _actor: &ActorId,
        _amount_liters: f64,
        stations: StationSet,
    ) -> Result<String, AuthorityError> {
        self.record(Call::RecordSession(stations));
        let delay = self.lock().record_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.lock()
            .record_session_id
            .clone()
            .ok_or_else(|| scripted("accounting offline"))
    }

    async fn record_stop(
        &self,
        _actor: &ActorId,
        remote_session_id: &str,
    ) -> Result<(), AuthorityError> {
        self.record(Call::RecordStop(remote_session_id.to_string()));
        Ok(())
    }
}

/// Wall clock that only moves when a test says so.
#[derive(Debug, Clone)]
pub struct ManualClock {
    millis: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn at(millis: i64) -> Self {
        Self {
            millis: Arc::new(AtomicI64::new(millis)),
        }
    }

    pub fn advance_secs(&self, seconds: i64) {
        self.millis.fetch_add(seconds * 1000, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> TimestampMs {
        TimestampMs(self.millis.load(Ordering::SeqCst))
    }
}

/// Wall clock that follows tokio time, so paused tests see remote latency.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin: Instant,
    origin_millis: i64,
}

impl TokioClock {
    pub fn at(millis: i64) -> Self {
        Self {
            origin: Instant::now(),
            origin_millis: millis,
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> TimestampMs {
        let elapsed = i64::try_from(self.origin.elapsed().as_millis()).unwrap_or(i64::MAX);
        TimestampMs(self.origin_millis.saturating_add(elapsed))
    }
}

pub fn actor() -> ActorId {
    ActorId::new(ACTOR)
}

pub fn held_by(actor: &str, station_a: StationPower, station_b: StationPower) -> OccupancySnapshot {
    OccupancySnapshot {
        active_actor: Some(ActorId::new(actor)),
        station_a,
        station_b,
    }
}
