use serde::Serialize;
use thiserror::Error;

use crate::domain::admission::{self, Denial};
use crate::domain::cadence::PollContext;
use crate::domain::clock::TimestampMs;
use crate::domain::countdown::{CountdownEngine, CountdownSignal, FINAL_APPROACH_SECONDS};
use crate::domain::estimate::fallback_duration_seconds;
use crate::domain::occupancy::{ActorId, InProgressSession, OccupancySnapshot};
use crate::domain::station::{Station, StationSet};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SequencerError {
    #[error("request denied: {0}")]
    Denied(Denial),
    #[error("cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: StateKind,
    },
    #[error("no fill session is active")]
    NoActiveSession,
    #[error("a stop request is already in flight")]
    StopInFlight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StateKind {
    Idle,
    AwaitingStartConfirm,
    AwaitingValveConfirm,
    StartingHardware,
    Running,
    FinalApproach,
    Completing,
    StopPending,
    Error,
}

impl std::fmt::Display for StateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            StateKind::Idle => "idle",
            StateKind::AwaitingStartConfirm => "awaiting start confirmation",
            StateKind::AwaitingValveConfirm => "awaiting valve confirmation",
            StateKind::StartingHardware => "starting hardware",
            StateKind::Running => "running",
            StateKind::FinalApproach => "in final approach",
            StateKind::Completing => "completing",
            StateKind::StopPending => "stop pending",
            StateKind::Error => "in error",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompletedReason {
    Manual,
    RemoteAutoStop,
    None,
}

/// A fill that has been asked for but whose pumps are not yet running.
#[derive(Debug, Clone, PartialEq)]
pub struct FillRequest {
    pub stations: StationSet,
    pub capacity_liters: f64,
    pub predicted_duration_seconds: Option<u32>,
}

impl FillRequest {
    pub fn new(stations: StationSet, capacity_liters: f64) -> Self {
        Self {
            stations,
            capacity_liters,
            predicted_duration_seconds: None,
        }
    }

    pub fn predicted_or_fallback(&self) -> u32 {
        self.predicted_duration_seconds
            .unwrap_or_else(|| fallback_duration_seconds(self.stations, self.capacity_liters))
    }
}

/// A fill whose pumps are physically on. Owns its countdown exclusively.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub stations: StationSet,
    pub started_at: TimestampMs,
    pub predicted_duration_seconds: u32,
    pub capacity_liters: Option<f64>,
    pub remote_session_id: Option<String>,
    countdown: CountdownEngine,
}

impl Session {
    fn start(
        stations: StationSet,
        started_at: TimestampMs,
        predicted_duration_seconds: u32,
        remaining: u32,
    ) -> Self {
        Self {
            stations,
            started_at,
            predicted_duration_seconds,
            capacity_liters: None,
            remote_session_id: None,
            countdown: CountdownEngine::new(remaining, true),
        }
    }

    pub fn remaining_seconds(&self) -> u32 {
        self.countdown.remaining()
    }

    pub fn countdown(&self) -> &CountdownEngine {
        &self.countdown
    }

    fn remaining_at(&self, now: TimestampMs) -> u32 {
        let elapsed = now.seconds_since(self.started_at);
        let elapsed = u32::try_from(elapsed).unwrap_or(u32::MAX);
        self.predicted_duration_seconds.saturating_sub(elapsed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FillFailure {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    pub stations: StationSet,
    pub reason: CompletedReason,
    pub remote_session_id: Option<String>,
    pub started_at: String,
    pub finished_at: String,
}

impl Completion {
    fn from_session(session: &Session, reason: CompletedReason, finished_at: TimestampMs) -> Self {
        Self {
            stations: session.stations,
            reason,
            remote_session_id: session.remote_session_id.clone(),
            started_at: session.started_at.to_iso8601(),
            finished_at: finished_at.to_iso8601(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FillState {
    Idle,
    AwaitingStartConfirm(FillRequest),
    AwaitingValveConfirm(FillRequest),
    StartingHardware(FillRequest),
    Running(Session),
    FinalApproach(Session),
    Completing(Session),
    StopPending { session: Session, in_flight: bool },
    Error(FillFailure),
}

impl FillState {
    pub fn kind(&self) -> StateKind {
        match self {
            FillState::Idle => StateKind::Idle,
            FillState::AwaitingStartConfirm(_) => StateKind::AwaitingStartConfirm,
            FillState::AwaitingValveConfirm(_) => StateKind::AwaitingValveConfirm,
            FillState::StartingHardware(_) => StateKind::StartingHardware,
            FillState::Running(_) => StateKind::Running,
            FillState::FinalApproach(_) => StateKind::FinalApproach,
            FillState::Completing(_) => StateKind::Completing,
            FillState::StopPending { .. } => StateKind::StopPending,
            FillState::Error(_) => StateKind::Error,
        }
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            FillState::Running(session)
            | FillState::FinalApproach(session)
            | FillState::Completing(session)
            | FillState::StopPending { session, .. } => Some(session),
            _ => None,
        }
    }

    fn session_mut(&mut self) -> Option<&mut Session> {
        match self {
            FillState::Running(session)
            | FillState::FinalApproach(session)
            | FillState::Completing(session)
            | FillState::StopPending { session, .. } => Some(session),
            _ => None,
        }
    }

    pub fn request(&self) -> Option<&FillRequest> {
        match self {
            FillState::AwaitingStartConfirm(request)
            | FillState::AwaitingValveConfirm(request)
            | FillState::StartingHardware(request) => Some(request),
            _ => None,
        }
    }
}

/// What the owner must do after confirming the start gate.
#[derive(Debug, Clone, PartialEq)]
pub enum StartStep {
    AwaitValveConfirm,
    StartHardware(FillRequest),
}

/// What a countdown tick changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Idle,
    Counted { remaining: u32 },
    EnteredFinalApproach,
    /// The countdown ran out; remote state must be confirmed by a poll.
    EnteredCompleting,
}

/// What an occupancy snapshot changed.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    Unchanged,
    Completed(Completion),
    /// The authority reports this actor active although nothing runs locally.
    UntrackedOwnSession,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEntry {
    Running { remaining: u32 },
    /// Entered with no more than the final-approach window left.
    FinalApproach { remaining: u32 },
    /// Nothing left on the clock; remote state must be confirmed by a poll.
    Completing,
}

/// Identity of a ticking countdown schedule. A change means the previous
/// schedule must be dropped before a new one starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleId {
    pub session: u64,
    pub epoch: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StopPlan {
    pub stations: StationSet,
    pub remote_session_id: Option<String>,
}

/// The fill session state machine for one actor.
///
/// Every input is applied synchronously; remote calls happen outside and
/// their outcomes are fed back in. Inputs that no longer apply to the current
/// state are ignored, so late or duplicated outcomes are harmless.
#[derive(Debug, Clone)]
pub struct Sequencer {
    actor: ActorId,
    valve_station: Option<Station>,
    state: FillState,
    session_generation: u64,
    last_completion: Option<Completion>,
    last_denial: Option<Denial>,
}

impl Sequencer {
    pub fn new(actor: ActorId, valve_station: Option<Station>) -> Self {
        Self {
            actor,
            valve_station,
            state: FillState::Idle,
            session_generation: 0,
            last_completion: None,
            last_denial: None,
        }
    }

    pub fn actor(&self) -> &ActorId {
        &self.actor
    }

    pub fn state(&self) -> &FillState {
        &self.state
    }

    pub fn kind(&self) -> StateKind {
        self.state.kind()
    }

    pub fn last_completion(&self) -> Option<&Completion> {
        self.last_completion.as_ref()
    }

    pub fn last_denial(&self) -> Option<Denial> {
        self.last_denial
    }

    /// The countdown schedule that should currently be ticking, if any.
    pub fn countdown_schedule(&self) -> Option<ScheduleId> {
        self.state
            .session()
            .map(Session::countdown)
            .filter(|countdown| countdown.is_enabled())
            .map(|countdown| ScheduleId {
                session: self.session_generation,
                epoch: countdown.schedule_epoch(),
            })
    }

    pub fn poll_context(&self) -> PollContext {
        match &self.state {
            FillState::Running(session) | FillState::FinalApproach(session) => {
                PollContext::Counting {
                    remaining: session.remaining_seconds(),
                }
            }
            FillState::Completing(_) | FillState::StopPending { .. } => {
                PollContext::CompletedLocally
            }
            _ => PollContext::Quiet,
        }
    }

    pub fn ensure_can_request(&self) -> Result<(), SequencerError> {
        match self.state {
            FillState::Idle | FillState::Error(_) => Ok(()),
            _ => Err(self.invalid("request a fill")),
        }
    }

    /// Idle -> AwaitingStartConfirm, re-checking admission against `occupancy`.
    pub fn request(
        &mut self,
        request: FillRequest,
        occupancy: &OccupancySnapshot,
    ) -> Result<(), SequencerError> {
        self.ensure_can_request()?;
        self.last_denial = None;
        self.state = FillState::AwaitingStartConfirm(request);
        self.recheck_admission(occupancy)
    }

    pub fn attach_estimate(&mut self, seconds: u32) {
        if let FillState::AwaitingStartConfirm(request) = &mut self.state {
            request.predicted_duration_seconds = Some(seconds);
        }
    }

    pub fn confirm_start(&mut self) -> Result<StartStep, SequencerError> {
        let FillState::AwaitingStartConfirm(request) = &self.state else {
            return Err(self.invalid("confirm start"));
        };
        let request = request.clone();

        if self
            .valve_station
            .is_some_and(|station| request.stations.contains(station))
        {
            self.state = FillState::AwaitingValveConfirm(request);
            return Ok(StartStep::AwaitValveConfirm);
        }

        self.state = FillState::StartingHardware(request.clone());
        Ok(StartStep::StartHardware(request))
    }

    pub fn confirm_valve(&mut self) -> Result<FillRequest, SequencerError> {
        let FillState::AwaitingValveConfirm(request) = &self.state else {
            return Err(self.invalid("confirm the valve"));
        };
        let request = request.clone();
        self.state = FillState::StartingHardware(request.clone());
        Ok(request)
    }

    /// Leaves a confirmation gate without touching hardware.
    pub fn cancel(&mut self) -> Result<(), SequencerError> {
        match self.state {
            FillState::AwaitingStartConfirm(_) | FillState::AwaitingValveConfirm(_) => {
                self.state = FillState::Idle;
                Ok(())
            }
            _ => Err(self.invalid("cancel")),
        }
    }

    /// Re-evaluates admission for the pending request. A denial returns to Idle.
    pub fn recheck_admission(
        &mut self,
        occupancy: &OccupancySnapshot,
    ) -> Result<(), SequencerError> {
        let Some(request) = self.state.request() else {
            return Err(self.invalid("check admission"));
        };

        if let Err(denial) = admission::evaluate(request.stations, &self.actor, occupancy) {
            self.state = FillState::Idle;
            self.last_denial = Some(denial);
            return Err(SequencerError::Denied(denial));
        }

        Ok(())
    }

    /// StartingHardware -> Running once every required station reported ok.
    pub fn hardware_started(&mut self, now: TimestampMs) -> Option<SessionEntry> {
        let FillState::StartingHardware(request) = &self.state else {
            return None;
        };

        let predicted = request.predicted_or_fallback();
        let mut session = Session::start(request.stations, now, predicted, predicted);
        session.capacity_liters = Some(request.capacity_liters);
        self.session_generation = self.session_generation.wrapping_add(1);
        Some(self.enter_session(session))
    }

    pub fn remote_session_recorded(&mut self, remote_session_id: String) {
        if let Some(session) = self.state.session_mut() {
            session.remote_session_id = Some(remote_session_id);
        }
    }

    /// Any pre-running state -> Error after a failed remote call.
    pub fn fail(&mut self, message: impl Into<String>) {
        if self.state.session().is_some() {
            return;
        }
        self.state = FillState::Error(FillFailure {
            message: message.into(),
        });
    }

    pub fn acknowledge(&mut self) -> Result<(), SequencerError> {
        match self.state {
            FillState::Error(_) => {
                self.state = FillState::Idle;
                Ok(())
            }
            _ => Err(self.invalid("acknowledge")),
        }
    }

    pub fn tick(&mut self) -> TickOutcome {
        let signal = match &mut self.state {
            FillState::Running(session) | FillState::FinalApproach(session) => {
                session.countdown.tick()
            }
            _ => return TickOutcome::Idle,
        };

        match signal {
            Some(CountdownSignal::FinalApproach) => {
                self.replace_session_state(FillState::FinalApproach);
                TickOutcome::EnteredFinalApproach
            }
            Some(CountdownSignal::Exhausted) => {
                self.replace_session_state(FillState::Completing);
                TickOutcome::EnteredCompleting
            }
            None => TickOutcome::Counted {
                remaining: self
                    .state
                    .session()
                    .map_or(0, Session::remaining_seconds),
            },
        }
    }

    /// Applies a freshly polled snapshot. Remote truth always wins over the
    /// local countdown.
    pub fn observe(&mut self, occupancy: &OccupancySnapshot, now: TimestampMs) -> Observation {
        let reason = match &self.state {
            FillState::Running(_) | FillState::FinalApproach(_) | FillState::Completing(_) => {
                CompletedReason::RemoteAutoStop
            }
            FillState::StopPending { .. } => CompletedReason::Manual,
            FillState::Idle | FillState::Error(_) => {
                if occupancy.is_held_by(&self.actor) {
                    return Observation::UntrackedOwnSession;
                }
                return Observation::Unchanged;
            }
            _ => return Observation::Unchanged,
        };

        let Some(session) = self.state.session() else {
            return Observation::Unchanged;
        };
        let still_ours =
            occupancy.is_held_by(&self.actor) && !occupancy.all_off(session.stations);
        if still_ours {
            return Observation::Unchanged;
        }

        let completion = Completion::from_session(session, reason, now);
        self.finish(completion.clone());
        Observation::Completed(completion)
    }

    /// Running/FinalApproach/Completing -> StopPending with the stop in flight.
    pub fn begin_stop(&mut self) -> Result<StopPlan, SequencerError> {
        let state = std::mem::replace(&mut self.state, FillState::Idle);
        let mut session = match state {
            FillState::Running(session)
            | FillState::FinalApproach(session)
            | FillState::Completing(session)
            | FillState::StopPending {
                session,
                in_flight: false,
            } => session,
            other => {
                let error = match other {
                    FillState::StopPending { .. } => SequencerError::StopInFlight,
                    _ => SequencerError::NoActiveSession,
                };
                self.state = other;
                return Err(error);
            }
        };

        session.countdown.set_enabled(false);
        let plan = StopPlan {
            stations: session.stations,
            remote_session_id: session.remote_session_id.clone(),
        };
        self.state = FillState::StopPending {
            session,
            in_flight: true,
        };
        Ok(plan)
    }

    pub fn stop_succeeded(&mut self, now: TimestampMs) -> Option<Completion> {
        let FillState::StopPending { session, .. } = &self.state else {
            return None;
        };
        let completion = Completion::from_session(session, CompletedReason::Manual, now);
        self.finish(completion.clone());
        Some(completion)
    }

    /// Stays in StopPending so nothing implies the pump is still safely timed.
    pub fn stop_failed(&mut self) {
        if let FillState::StopPending { in_flight, .. } = &mut self.state {
            *in_flight = false;
        }
    }

    /// Re-attaches to a session the authority reports as physically running.
    ///
    /// Without a usable start time the session is treated as just started.
    pub fn recover(
        &mut self,
        in_progress: &InProgressSession,
        predicted_duration_seconds: u32,
        now: TimestampMs,
    ) -> Result<SessionEntry, SequencerError> {
        self.ensure_can_request()
            .map_err(|_| self.invalid("recover a session"))?;

        let started_at = in_progress.started_at.unwrap_or(now);
        let mut session = Session::start(
            in_progress.stations,
            started_at,
            predicted_duration_seconds,
            0,
        );
        session.capacity_liters = in_progress.amount_liters;
        session.remote_session_id = in_progress.remote_session_id.clone();
        let remaining = session.remaining_at(now);
        session.countdown.reset(remaining);

        self.session_generation = self.session_generation.wrapping_add(1);
        Ok(self.enter_session(session))
    }

    /// Recomputes the running countdown from wall-clock elapsed time and
    /// starts a fresh schedule for it.
    pub fn resync(&mut self, now: TimestampMs) -> Option<SessionEntry> {
        let mut session = match std::mem::replace(&mut self.state, FillState::Idle) {
            FillState::Running(session) | FillState::FinalApproach(session) => session,
            other => {
                self.state = other;
                return None;
            }
        };

        let remaining = session.remaining_at(now);
        if remaining != session.remaining_seconds() {
            session.countdown.reset(remaining);
        }

        Some(self.enter_session(session))
    }

    /// Takes over stations the authority reports on for this actor when no
    /// session record exists, leaving them stoppable from StopPending.
    pub fn adopt_untracked(
        &mut self,
        occupancy: &OccupancySnapshot,
        now: TimestampMs,
    ) -> Option<StationSet> {
        if self.ensure_can_request().is_err() || !occupancy.is_held_by(&self.actor) {
            return None;
        }

        let stations = match (occupancy.station_a.is_on(), occupancy.station_b.is_on()) {
            (true, true) => StationSet::Dual,
            (true, false) => StationSet::Single(Station::A),
            (false, true) => StationSet::Single(Station::B),
            (false, false) => return None,
        };

        let mut session = Session::start(stations, now, 0, 0);
        session.countdown.set_enabled(false);
        self.session_generation = self.session_generation.wrapping_add(1);
        self.state = FillState::StopPending {
            session,
            in_flight: false,
        };
        Some(stations)
    }

    /// Suspends the countdown while no one is watching; the value is kept.
    pub fn suspend(&mut self) {
        if let Some(session) = self.state.session_mut() {
            session.countdown.set_enabled(false);
        }
    }

    fn enter_session(&mut self, mut session: Session) -> SessionEntry {
        let remaining = session.remaining_seconds();
        if remaining == 0 {
            session.countdown.set_enabled(false);
            self.state = FillState::Completing(session);
            return SessionEntry::Completing;
        }

        session.countdown.set_enabled(true);
        if remaining <= FINAL_APPROACH_SECONDS {
            self.state = FillState::FinalApproach(session);
            return SessionEntry::FinalApproach { remaining };
        }

        self.state = FillState::Running(session);
        SessionEntry::Running { remaining }
    }

    fn replace_session_state(&mut self, wrap: fn(Session) -> FillState) {
        let state = std::mem::replace(&mut self.state, FillState::Idle);
        self.state = match state {
            FillState::Running(session)
            | FillState::FinalApproach(session)
            | FillState::Completing(session) => wrap(session),
            other => other,
        };
    }

    fn finish(&mut self, completion: Completion) {
        self.state = FillState::Idle;
        self.last_completion = Some(completion);
    }

    fn invalid(&self, action: &'static str) -> SequencerError {
        SequencerError::InvalidTransition {
            action,
            state: self.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        CompletedReason, FillRequest, FillState, Observation, SequencerError, SessionEntry,
        StartStep, StateKind, TickOutcome,
    };
    use super::Sequencer;
    use crate::domain::admission::Denial;
    use crate::domain::cadence::PollContext;
    use crate::domain::clock::TimestampMs;
    use crate::domain::occupancy::{ActorId, InProgressSession, OccupancySnapshot};
    use crate::domain::station::{Station, StationPower, StationSet};

    const NOW: TimestampMs = TimestampMs(1_700_000_000_000);

    fn me() -> ActorId {
        ActorId::new("me")
    }

    fn held_by_me(stations: StationSet) -> OccupancySnapshot {
        OccupancySnapshot {
            active_actor: Some(me()),
            station_a: if stations.contains(Station::A) {
                StationPower::On
            } else {
                StationPower::Off
            },
            station_b: if stations.contains(Station::B) {
                StationPower::On
            } else {
                StationPower::Off
            },
        }
    }

    fn running(stations: StationSet, seconds: u32) -> Sequencer {
        let mut sequencer = Sequencer::new(me(), Some(Station::B));
        let mut request = FillRequest::new(stations, 100.0);
        request.predicted_duration_seconds = Some(seconds);
        sequencer
            .request(request, &OccupancySnapshot::vacant())
            .expect("request should be admitted");
        match sequencer.confirm_start().expect("start should confirm") {
            StartStep::AwaitValveConfirm => {
                sequencer.confirm_valve().expect("valve should confirm");
            }
            StartStep::StartHardware(_) => {}
        }
        sequencer.hardware_started(NOW);
        sequencer
    }

    #[test]
    fn request_is_denied_against_fresh_snapshot() {
        let mut sequencer = Sequencer::new(me(), None);
        let occupancy = OccupancySnapshot {
            active_actor: Some(ActorId::new("other")),
            station_a: StationPower::On,
            station_b: StationPower::Off,
        };

        let result = sequencer.request(FillRequest::new(StationSet::Dual, 200.0), &occupancy);

        assert_eq!(result, Err(SequencerError::Denied(Denial::DualUnavailable)));
        assert_eq!(sequencer.kind(), StateKind::Idle);
        assert_eq!(sequencer.last_denial(), Some(Denial::DualUnavailable));
    }

    #[test]
    fn valve_gate_only_applies_to_requests_using_the_valve_station() {
        let mut single_a = Sequencer::new(me(), Some(Station::B));
        single_a
            .request(
                FillRequest::new(StationSet::Single(Station::A), 50.0),
                &OccupancySnapshot::vacant(),
            )
            .expect("request should be admitted");
        assert!(matches!(
            single_a.confirm_start(),
            Ok(StartStep::StartHardware(_))
        ));

        let mut dual = Sequencer::new(me(), Some(Station::B));
        dual.request(FillRequest::new(StationSet::Dual, 50.0), &OccupancySnapshot::vacant())
            .expect("request should be admitted");
        assert_eq!(dual.confirm_start(), Ok(StartStep::AwaitValveConfirm));
        assert_eq!(dual.kind(), StateKind::AwaitingValveConfirm);
        assert!(dual.confirm_valve().is_ok());
        assert_eq!(dual.kind(), StateKind::StartingHardware);
    }

    #[test]
    fn second_request_while_running_is_rejected() {
        let mut sequencer = running(StationSet::Single(Station::A), 100);

        let result = sequencer.request(
            FillRequest::new(StationSet::Single(Station::B), 10.0),
            &OccupancySnapshot::vacant(),
        );

        assert!(matches!(
            result,
            Err(SequencerError::InvalidTransition {
                state: StateKind::Running,
                ..
            })
        ));
    }

    #[test]
    fn hardware_start_arms_countdown_with_fallback_estimate() {
        let mut sequencer = Sequencer::new(me(), None);
        sequencer
            .request(
                FillRequest::new(StationSet::Dual, 1000.0),
                &OccupancySnapshot::vacant(),
            )
            .expect("request should be admitted");
        sequencer.confirm_start().expect("start should confirm");

        let entry = sequencer.hardware_started(NOW);

        assert_eq!(entry, Some(SessionEntry::Running { remaining: 460 }));
        assert!(sequencer.countdown_schedule().is_some());
        assert_eq!(
            sequencer.poll_context(),
            PollContext::Counting { remaining: 460 }
        );
    }

    #[test]
    fn countdown_drives_final_approach_then_completing() {
        let mut sequencer = running(StationSet::Single(Station::A), 7);

        assert_eq!(sequencer.tick(), TickOutcome::Counted { remaining: 6 });
        assert_eq!(sequencer.tick(), TickOutcome::EnteredFinalApproach);
        assert_eq!(sequencer.kind(), StateKind::FinalApproach);
        for _ in 0..4 {
            assert!(matches!(sequencer.tick(), TickOutcome::Counted { .. }));
        }
        assert_eq!(sequencer.tick(), TickOutcome::EnteredCompleting);
        assert_eq!(sequencer.kind(), StateKind::Completing);
        assert_eq!(sequencer.poll_context(), PollContext::CompletedLocally);
        assert_eq!(sequencer.tick(), TickOutcome::Idle);
    }

    #[test]
    fn remote_stop_overrides_local_countdown() {
        let mut sequencer = running(StationSet::Single(Station::A), 100);
        for _ in 0..20 {
            sequencer.tick();
        }

        let observation = sequencer.observe(&OccupancySnapshot::vacant(), NOW);

        let Observation::Completed(completion) = observation else {
            panic!("expected completion, got {observation:?}");
        };
        assert_eq!(completion.reason, CompletedReason::RemoteAutoStop);
        assert_eq!(sequencer.kind(), StateKind::Idle);
        assert_eq!(sequencer.countdown_schedule(), None);
        assert_eq!(sequencer.tick(), TickOutcome::Idle);
    }

    #[test]
    fn own_hardware_switched_off_counts_as_remote_stop() {
        let mut sequencer = running(StationSet::Dual, 100);
        let occupancy = OccupancySnapshot {
            active_actor: Some(me()),
            station_a: StationPower::Off,
            station_b: StationPower::Off,
        };

        assert!(matches!(
            sequencer.observe(&occupancy, NOW),
            Observation::Completed(_)
        ));
    }

    #[test]
    fn matching_snapshot_keeps_session_running() {
        let mut sequencer = running(StationSet::Dual, 100);

        assert_eq!(
            sequencer.observe(&held_by_me(StationSet::Dual), NOW),
            Observation::Unchanged
        );
        assert_eq!(sequencer.kind(), StateKind::Running);
    }

    #[test]
    fn completing_waits_for_remote_confirmation() {
        let mut sequencer = running(StationSet::Single(Station::A), 1);
        assert_eq!(sequencer.tick(), TickOutcome::EnteredCompleting);

        assert_eq!(
            sequencer.observe(&held_by_me(StationSet::Single(Station::A)), NOW),
            Observation::Unchanged
        );
        assert_eq!(sequencer.kind(), StateKind::Completing);

        assert!(matches!(
            sequencer.observe(&OccupancySnapshot::vacant(), NOW),
            Observation::Completed(_)
        ));
        assert_eq!(
            sequencer.last_completion().map(|completion| completion.reason),
            Some(CompletedReason::RemoteAutoStop)
        );
    }

    #[test]
    fn manual_stop_is_single_flight() {
        let mut sequencer = running(StationSet::Dual, 100);
        sequencer.remote_session_recorded("sess-9".to_string());

        let plan = sequencer.begin_stop().expect("stop should begin");
        assert_eq!(plan.stations, StationSet::Dual);
        assert_eq!(plan.remote_session_id.as_deref(), Some("sess-9"));
        assert_eq!(sequencer.begin_stop(), Err(SequencerError::StopInFlight));

        let completion = sequencer.stop_succeeded(NOW).expect("stop should complete");
        assert_eq!(completion.reason, CompletedReason::Manual);
        assert_eq!(sequencer.kind(), StateKind::Idle);
        assert_eq!(sequencer.begin_stop(), Err(SequencerError::NoActiveSession));
        assert_eq!(sequencer.stop_succeeded(NOW), None);
    }

    #[test]
    fn failed_stop_stays_pending_and_can_be_retried() {
        let mut sequencer = running(StationSet::Single(Station::A), 100);
        sequencer.begin_stop().expect("stop should begin");

        sequencer.stop_failed();

        assert_eq!(sequencer.kind(), StateKind::StopPending);
        assert_eq!(sequencer.countdown_schedule(), None);
        assert_eq!(sequencer.tick(), TickOutcome::Idle);
        assert!(sequencer.begin_stop().is_ok());
    }

    #[test]
    fn stop_pending_converges_to_idle_from_snapshot() {
        let mut sequencer = running(StationSet::Single(Station::A), 100);
        sequencer.begin_stop().expect("stop should begin");
        sequencer.stop_failed();

        let observation = sequencer.observe(&OccupancySnapshot::vacant(), NOW);

        let Observation::Completed(completion) = observation else {
            panic!("expected completion, got {observation:?}");
        };
        assert_eq!(completion.reason, CompletedReason::Manual);
    }

    #[test]
    fn recovery_reconstructs_remaining_from_start_time() {
        let mut sequencer = Sequencer::new(me(), None);
        let in_progress = InProgressSession {
            stations: StationSet::Dual,
            started_at: Some(TimestampMs(NOW.0 - 100_000)),
            amount_liters: None,
            predicted_duration_seconds: Some(240),
            remote_session_id: Some("sess-1".to_string()),
        };

        let entry = sequencer
            .recover(&in_progress, 240, NOW)
            .expect("recovery should succeed");

        assert_eq!(entry, SessionEntry::Running { remaining: 140 });
        let session = sequencer.state().session().expect("session should exist");
        assert_eq!(session.remote_session_id.as_deref(), Some("sess-1"));
        assert_eq!(session.remaining_seconds(), 140);
    }

    #[test]
    fn recovery_past_predicted_end_goes_straight_to_completing() {
        let mut sequencer = Sequencer::new(me(), None);
        let in_progress = InProgressSession {
            stations: StationSet::Single(Station::B),
            started_at: Some(TimestampMs(NOW.0 - 600_000)),
            amount_liters: Some(100.0),
            predicted_duration_seconds: None,
            remote_session_id: None,
        };

        let entry = sequencer
            .recover(&in_progress, 90, NOW)
            .expect("recovery should succeed");

        assert_eq!(entry, SessionEntry::Completing);
        assert_eq!(sequencer.kind(), StateKind::Completing);
    }

    #[test]
    fn recovery_without_start_time_assumes_just_started() {
        let mut sequencer = Sequencer::new(me(), None);
        let in_progress = InProgressSession {
            stations: StationSet::Single(Station::A),
            started_at: None,
            amount_liters: None,
            predicted_duration_seconds: None,
            remote_session_id: None,
        };

        let entry = sequencer
            .recover(&in_progress, 300, NOW)
            .expect("recovery should succeed");

        assert_eq!(entry, SessionEntry::Running { remaining: 300 });
        let session = sequencer.state().session().expect("session should exist");
        assert_eq!(session.started_at, NOW);
    }

    #[test]
    fn recovery_inside_final_approach_window_enters_final_approach() {
        let mut sequencer = Sequencer::new(me(), None);
        let in_progress = InProgressSession {
            stations: StationSet::Dual,
            started_at: Some(TimestampMs(NOW.0 - 237_000)),
            amount_liters: None,
            predicted_duration_seconds: Some(240),
            remote_session_id: None,
        };

        let entry = sequencer
            .recover(&in_progress, 240, NOW)
            .expect("recovery should succeed");

        assert_eq!(entry, SessionEntry::FinalApproach { remaining: 3 });
        assert_eq!(sequencer.kind(), StateKind::FinalApproach);
        assert_eq!(sequencer.poll_context(), PollContext::Counting { remaining: 3 });
        assert_eq!(sequencer.tick(), TickOutcome::Counted { remaining: 2 });
        assert_eq!(sequencer.tick(), TickOutcome::Counted { remaining: 1 });
        assert_eq!(sequencer.kind(), StateKind::FinalApproach);
        assert_eq!(sequencer.tick(), TickOutcome::EnteredCompleting);
    }

    #[test]
    fn resync_into_final_approach_window_enters_final_approach() {
        let mut sequencer = running(StationSet::Single(Station::A), 100);
        sequencer.suspend();

        let entry = sequencer.resync(TimestampMs(NOW.0 + 97_000));

        assert_eq!(entry, Some(SessionEntry::FinalApproach { remaining: 3 }));
        assert_eq!(sequencer.kind(), StateKind::FinalApproach);
        assert!(sequencer.countdown_schedule().is_some());
    }

    #[test]
    fn untracked_stations_are_adopted_for_a_manual_stop() {
        let mut sequencer = Sequencer::new(me(), None);
        sequencer.fail("stationB did not start");
        let occupancy = held_by_me(StationSet::Single(Station::A));

        let adopted = sequencer.adopt_untracked(&occupancy, NOW);

        assert_eq!(adopted, Some(StationSet::Single(Station::A)));
        assert_eq!(sequencer.kind(), StateKind::StopPending);
        assert_eq!(sequencer.countdown_schedule(), None);
        assert_eq!(sequencer.observe(&occupancy, NOW), Observation::Unchanged);

        let plan = sequencer.begin_stop().expect("adopted stations can be stopped");
        assert_eq!(plan.stations, StationSet::Single(Station::A));
        assert_eq!(plan.remote_session_id, None);
        assert!(sequencer.stop_succeeded(NOW).is_some());
        assert_eq!(sequencer.kind(), StateKind::Idle);
    }

    #[test]
    fn nothing_is_adopted_without_own_stations_on() {
        let mut sequencer = Sequencer::new(me(), None);
        let switched_off = OccupancySnapshot {
            active_actor: Some(me()),
            station_a: StationPower::Off,
            station_b: StationPower::Off,
        };

        assert_eq!(sequencer.adopt_untracked(&switched_off, NOW), None);
        assert_eq!(
            sequencer.adopt_untracked(&OccupancySnapshot::vacant(), NOW),
            None
        );
        assert_eq!(sequencer.kind(), StateKind::Idle);

        let mut active = running(StationSet::Dual, 100);
        assert_eq!(
            active.adopt_untracked(&held_by_me(StationSet::Dual), NOW),
            None
        );
        assert_eq!(active.kind(), StateKind::Running);
    }

    #[test]
    fn idle_sequencer_flags_untracked_own_session() {
        let mut sequencer = Sequencer::new(me(), None);

        assert_eq!(
            sequencer.observe(&held_by_me(StationSet::Dual), NOW),
            Observation::UntrackedOwnSession
        );
        assert_eq!(
            sequencer.observe(&OccupancySnapshot::vacant(), NOW),
            Observation::Unchanged
        );
    }

    #[test]
    fn failure_before_running_enters_error_until_acknowledged() {
        let mut sequencer = Sequencer::new(me(), None);
        sequencer
            .request(
                FillRequest::new(StationSet::Single(Station::A), 10.0),
                &OccupancySnapshot::vacant(),
            )
            .expect("request should be admitted");
        sequencer.confirm_start().expect("start should confirm");

        sequencer.fail("stationA did not start");

        assert!(matches!(sequencer.state(), FillState::Error(failure) if failure.message == "stationA did not start"));
        assert_eq!(sequencer.hardware_started(NOW), None);
        sequencer.acknowledge().expect("error should clear");
        assert_eq!(sequencer.kind(), StateKind::Idle);
    }

    #[test]
    fn resync_recomputes_from_wall_clock() {
        let mut sequencer = running(StationSet::Single(Station::A), 100);
        let before = sequencer.countdown_schedule();
        sequencer.suspend();
        assert_eq!(sequencer.countdown_schedule(), None);

        let entry = sequencer.resync(TimestampMs(NOW.0 + 30_000));

        assert_eq!(entry, Some(SessionEntry::Running { remaining: 70 }));
        assert!(sequencer.countdown_schedule().is_some());
        assert_ne!(sequencer.countdown_schedule(), before);
    }
}
