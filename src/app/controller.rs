use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, watch};

use crate::adapters::authority::{AuthorityError, RemoteAuthority};
use crate::domain::admission::Denial;
use crate::domain::cadence;
use crate::domain::clock::Clock;
use crate::domain::estimate::fallback_duration_seconds;
use crate::domain::occupancy::{ActorId, OccupancySnapshot};
use crate::domain::sequencer::{
    CompletedReason, Completion, FillRequest, FillState, Observation, ScheduleId, Sequencer,
    SequencerError, Session, SessionEntry, StartStep, StateKind, TickOutcome,
};
use crate::domain::station::{Station, StationSet};

const NOTIFICATION_CAPACITY: usize = 64;
const SETTLE_STEP: Duration = Duration::from_secs(1);
const FINAL_APPROACH_PROGRESS: &str = "Completing fill";
const ELAPSED_PROGRESS: &str = "Fill time elapsed, confirming with the station";

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Sequencer(#[from] SequencerError),
    #[error("remote authority call failed: {0}")]
    Authority(#[from] AuthorityError),
}

/// User-facing commands the controller accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum FillAction {
    Request {
        stations: StationSet,
        capacity_liters: f64,
    },
    ConfirmStart,
    ConfirmValve,
    Cancel,
    Stop,
    Acknowledge,
    Attach,
    Detach,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Progress(String),
    Denied(Denial),
    Failed(String),
    Completed(Completion),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerSettings {
    pub settling_delay_seconds: u32,
    pub default_capacity_liters: f64,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            settling_delay_seconds: 5,
            default_capacity_liters: 1000.0,
        }
    }
}

/// What the UI layer sees of the controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FillView {
    pub actor_id: ActorId,
    pub state: StateKind,
    pub attached: bool,
    pub stations: Option<StationSet>,
    pub remaining_seconds: Option<u32>,
    pub predicted_duration_seconds: Option<u32>,
    pub final_approach: bool,
    pub remote_session_id: Option<String>,
    pub progress: Option<String>,
    pub last_completion: Option<Completion>,
    pub last_error: Option<String>,
    pub last_denial: Option<Denial>,
}

/// Drives the [`Sequencer`] against a remote authority.
///
/// Every method runs to completion before the next input is applied; the
/// runtime event loop guarantees that. Remote calls are awaited inline, so
/// no transition ever has two requests in flight.
pub struct FillController<A, C> {
    authority: A,
    clock: C,
    sequencer: Sequencer,
    settings: ControllerSettings,
    attached: bool,
    poll_requested: bool,
    progress: Option<String>,
    last_error: Option<String>,
    events: broadcast::Sender<Notification>,
    view: watch::Sender<FillView>,
}

impl<A, C> FillController<A, C>
where
    A: RemoteAuthority,
    C: Clock,
{
    pub fn new(authority: A, clock: C, sequencer: Sequencer, settings: ControllerSettings) -> Self {
        let (events, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let (view, _) = watch::channel(FillView {
            actor_id: sequencer.actor().clone(),
            state: sequencer.kind(),
            attached: false,
            stations: None,
            remaining_seconds: None,
            predicted_duration_seconds: None,
            final_approach: false,
            remote_session_id: None,
            progress: None,
            last_completion: None,
            last_error: None,
            last_denial: None,
        });

        Self {
            authority,
            clock,
            sequencer,
            settings,
            attached: false,
            poll_requested: false,
            progress: None,
            last_error: None,
            events,
            view,
        }
    }

    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn countdown_schedule(&self) -> Option<ScheduleId> {
        self.sequencer.countdown_schedule()
    }

    pub fn poll_interval(&self) -> Duration {
        cadence::poll_interval(self.sequencer.poll_context())
    }

    /// Returns whether an immediate reconciliation poll was asked for, and
    /// clears the request.
    pub fn take_poll_request(&mut self) -> bool {
        std::mem::take(&mut self.poll_requested)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.events.subscribe()
    }

    pub fn notifications(&self) -> broadcast::Sender<Notification> {
        self.events.clone()
    }

    pub fn watch_view(&self) -> watch::Receiver<FillView> {
        self.view.subscribe()
    }

    pub async fn apply(&mut self, action: FillAction) -> Result<(), ControllerError> {
        tracing::debug!(?action, state = %self.sequencer.kind(), "applying fill action");

        let result = match action {
            FillAction::Request {
                stations,
                capacity_liters,
            } => self.request(stations, capacity_liters).await,
            FillAction::ConfirmStart => self.confirm_start().await,
            FillAction::ConfirmValve => self.confirm_valve().await,
            FillAction::Cancel => self.cancel(),
            FillAction::Stop => self.stop().await,
            FillAction::Acknowledge => self.acknowledge(),
            FillAction::Attach => self.attach().await,
            FillAction::Detach => {
                self.detach();
                Ok(())
            }
        };

        self.publish_view();
        result
    }

    pub async fn request(
        &mut self,
        stations: StationSet,
        capacity_liters: f64,
    ) -> Result<(), ControllerError> {
        self.sequencer.ensure_can_request()?;
        self.last_error = None;
        self.progress = None;

        let occupancy = match self.authority.occupancy().await {
            Ok(occupancy) => occupancy,
            Err(error) => return Err(self.fail("could not check station availability", error)),
        };
        if let Err(error) = self
            .sequencer
            .request(FillRequest::new(stations, capacity_liters), &occupancy)
        {
            return Err(self.reject(error));
        }

        let predicted = self.estimate(stations, capacity_liters).await;
        self.sequencer.attach_estimate(predicted);

        tracing::info!(
            actor = %self.sequencer.actor(),
            stations = %stations,
            capacity_liters,
            predicted_duration_seconds = predicted,
            "fill requested, awaiting start confirmation"
        );
        self.report_progress(format!(
            "Ready to fill with {stations} in about {predicted}s, confirm to start"
        ));
        Ok(())
    }

    pub async fn confirm_start(&mut self) -> Result<(), ControllerError> {
        match self.sequencer.confirm_start()? {
            StartStep::AwaitValveConfirm => {
                tracing::info!("start confirmed, waiting for manual valve");
                self.report_progress("Open the manual valve, then confirm".to_string());
                Ok(())
            }
            StartStep::StartHardware(request) => self.start_hardware(request).await,
        }
    }

    pub async fn confirm_valve(&mut self) -> Result<(), ControllerError> {
        let request = self.sequencer.confirm_valve()?;
        tracing::info!("manual valve confirmed");
        self.start_hardware(request).await
    }

    pub fn cancel(&mut self) -> Result<(), ControllerError> {
        self.sequencer.cancel()?;
        tracing::info!("fill request cancelled");
        self.progress = None;
        Ok(())
    }

    pub fn acknowledge(&mut self) -> Result<(), ControllerError> {
        self.sequencer.acknowledge()?;
        self.last_error = None;
        self.progress = None;
        Ok(())
    }

    async fn start_hardware(&mut self, request: FillRequest) -> Result<(), ControllerError> {
        let occupancy = match self.authority.occupancy().await {
            Ok(occupancy) => occupancy,
            Err(error) => {
                return Err(self.fail("could not re-check station availability", error));
            }
        };
        if let Err(error) = self.sequencer.recheck_admission(&occupancy) {
            return Err(self.reject(error));
        }

        let mut started: Option<Station> = None;
        for &station in request.stations.stations() {
            if let Some(previous) = started {
                self.settle(previous).await;
            }

            self.report_progress(format!("Starting {station}"));
            if let Err(error) = self.authority.start_station(station).await {
                let context = match started {
                    Some(previous) => {
                        format!("failed to start {station}, {previous} may still be running")
                    }
                    None => format!("failed to start {station}"),
                };
                return Err(self.fail(&context, error));
            }
            tracing::info!(station = %station, "station started");
            started = Some(station);
        }

        let entered = self.sequencer.hardware_started(self.clock.now());

        match self
            .authority
            .record_session(
                self.sequencer.actor(),
                request.capacity_liters,
                request.stations,
            )
            .await
        {
            Ok(remote_session_id) => {
                tracing::info!(remote_session_id = %remote_session_id, "fill session recorded");
                self.sequencer.remote_session_recorded(remote_session_id);
            }
            Err(error) => {
                tracing::warn!(error = %error, "failed to record fill session, continuing");
            }
        }

        // The pumps have been running while the session was recorded.
        let entry = self.sequencer.resync(self.clock.now()).or(entered);

        match entry {
            Some(SessionEntry::Running { remaining }) => {
                tracing::info!(
                    stations = %request.stations,
                    remaining_seconds = remaining,
                    "fill running"
                );
                self.report_progress(format!(
                    "Filling with {}, about {remaining}s remaining",
                    request.stations
                ));
            }
            Some(SessionEntry::FinalApproach { remaining }) => {
                tracing::info!(
                    stations = %request.stations,
                    remaining_seconds = remaining,
                    "fill running inside final approach"
                );
                self.report_progress(FINAL_APPROACH_PROGRESS.to_string());
            }
            Some(SessionEntry::Completing) => {
                self.report_progress(ELAPSED_PROGRESS.to_string());
                self.poll().await;
            }
            None => {}
        }

        Ok(())
    }

    /// Hard wait between two station starts, reporting every second.
    async fn settle(&mut self, started: Station) {
        let total = self.settings.settling_delay_seconds;
        for elapsed in 1..=total {
            tokio::time::sleep(SETTLE_STEP).await;
            self.report_progress(format!(
                "Waiting for {started} to settle ({elapsed}/{total}s)"
            ));
        }
    }

    pub async fn stop(&mut self) -> Result<(), ControllerError> {
        let plan = self.sequencer.begin_stop()?;
        self.report_progress(format!("Stopping {}", plan.stations));

        let result = match plan.stations {
            StationSet::Single(station) => self.authority.stop_station(station).await,
            StationSet::Dual => {
                let (a, b) = tokio::join!(
                    self.authority.stop_station(Station::A),
                    self.authority.stop_station(Station::B)
                );
                a.and(b)
            }
        };

        if let Err(error) = result {
            self.sequencer.stop_failed();
            let message = format!("failed to stop {}: {error}", plan.stations);
            tracing::warn!(error = %error, stations = %plan.stations, "stop failed, awaiting retry or remote confirmation");
            self.last_error = Some(message.clone());
            self.notify(Notification::Failed(message));
            return Err(error.into());
        }

        let Some(completion) = self.sequencer.stop_succeeded(self.clock.now()) else {
            return Ok(());
        };

        if let Some(remote_session_id) = plan.remote_session_id.as_deref()
            && let Err(error) = self
                .authority
                .record_stop(self.sequencer.actor(), remote_session_id)
                .await
        {
            tracing::warn!(
                error = %error,
                remote_session_id,
                "failed to record manual stop"
            );
        }

        self.complete(completion);
        Ok(())
    }

    /// One reconciliation round against the authority's occupancy.
    /// Failures are logged and never change state.
    pub async fn poll(&mut self) {
        let occupancy = match self.authority.occupancy().await {
            Ok(occupancy) => occupancy,
            Err(error) => {
                tracing::warn!(error = %error, state = %self.sequencer.kind(), "occupancy poll failed");
                return;
            }
        };

        match self.sequencer.observe(&occupancy, self.clock.now()) {
            Observation::Unchanged => {}
            Observation::Completed(completion) => {
                tracing::info!(
                    reason = ?completion.reason,
                    active_actor = ?occupancy.active_actor,
                    "occupancy ended the fill session"
                );
                self.complete(completion);
            }
            Observation::UntrackedOwnSession => {
                tracing::info!("authority reports an untracked session for this actor");
                match self.recover().await {
                    Ok(true) => {}
                    Ok(false) => self.adopt_untracked(&occupancy),
                    Err(error) => {
                        tracing::warn!(error = %error, "session recovery after poll failed");
                    }
                }
            }
        }

        self.publish_view();
    }

    pub async fn tick(&mut self) {
        match self.sequencer.tick() {
            TickOutcome::Idle => return,
            TickOutcome::Counted { .. } => {}
            TickOutcome::EnteredFinalApproach => {
                tracing::info!("fill entering final approach");
                self.report_progress(FINAL_APPROACH_PROGRESS.to_string());
            }
            TickOutcome::EnteredCompleting => {
                tracing::info!("countdown exhausted, confirming remote state");
                self.report_progress(ELAPSED_PROGRESS.to_string());
                self.poll().await;
            }
        }

        self.publish_view();
    }

    /// Re-attaches to a session the authority reports as running for this
    /// actor. Never starts hardware. Returns whether a session was recovered.
    pub async fn recover(&mut self) -> Result<bool, ControllerError> {
        if self.sequencer.ensure_can_request().is_err() {
            return Ok(false);
        }

        let Some(in_progress) = self
            .authority
            .in_progress_session(self.sequencer.actor())
            .await?
        else {
            tracing::debug!(actor = %self.sequencer.actor(), "no in-progress session to recover");
            return Ok(false);
        };

        let predicted = match in_progress.predicted_duration_seconds {
            Some(seconds) => seconds,
            None => {
                let capacity = in_progress
                    .amount_liters
                    .unwrap_or(self.settings.default_capacity_liters);
                self.estimate(in_progress.stations, capacity).await
            }
        };

        if in_progress.started_at.is_none() {
            tracing::warn!(
                stations = %in_progress.stations,
                "in-progress session has no start time, treating it as just started"
            );
        }

        let entry = self
            .sequencer
            .recover(&in_progress, predicted, self.clock.now())?;
        self.last_error = None;

        match entry {
            SessionEntry::Running { remaining } => {
                tracing::info!(
                    stations = %in_progress.stations,
                    predicted_duration_seconds = predicted,
                    remaining_seconds = remaining,
                    "recovered in-progress fill session"
                );
                self.report_progress(format!(
                    "Resumed filling with {}, about {remaining}s remaining",
                    in_progress.stations
                ));
            }
            SessionEntry::FinalApproach { remaining } => {
                tracing::info!(
                    stations = %in_progress.stations,
                    remaining_seconds = remaining,
                    "recovered fill session inside final approach"
                );
                self.report_progress(FINAL_APPROACH_PROGRESS.to_string());
            }
            SessionEntry::Completing => {
                tracing::info!(
                    stations = %in_progress.stations,
                    "recovered fill session is past its predicted end"
                );
                self.poll_requested = true;
                self.report_progress(ELAPSED_PROGRESS.to_string());
            }
        }

        Ok(true)
    }

    /// Stations left on for this actor without any session record, e.g. after
    /// a partial dual start. They become a stop-only session.
    fn adopt_untracked(&mut self, occupancy: &OccupancySnapshot) {
        let previous_error = match self.sequencer.state() {
            FillState::Error(failure) => Some(failure.message.clone()),
            _ => None,
        };
        let Some(stations) = self
            .sequencer
            .adopt_untracked(occupancy, self.clock.now())
        else {
            return;
        };

        tracing::warn!(
            stations = %stations,
            "stations running without a session record, waiting for a manual stop"
        );
        if previous_error.is_some() {
            self.last_error = previous_error;
        }
        self.report_progress(format!(
            "{stations} is still running without a session, stop it to release the station"
        ));
    }

    /// The owning context regained focus: resume schedules, then reconcile.
    pub async fn attach(&mut self) -> Result<(), ControllerError> {
        self.attached = true;
        self.poll_requested = true;

        if let Some(entry) = self.sequencer.resync(self.clock.now()) {
            tracing::info!(?entry, "countdown resumed from wall-clock time");
            match entry {
                SessionEntry::Running { .. } => {}
                SessionEntry::FinalApproach { .. } => {
                    self.report_progress(FINAL_APPROACH_PROGRESS.to_string());
                }
                SessionEntry::Completing => self.report_progress(ELAPSED_PROGRESS.to_string()),
            }
            return Ok(());
        }

        if let Err(error) = self.recover().await {
            tracing::warn!(error = %error, "session recovery failed");
            return Err(error);
        }
        Ok(())
    }

    /// The owning context went away: drop every schedule, keep the state.
    pub fn detach(&mut self) {
        self.attached = false;
        self.sequencer.suspend();
        tracing::info!(state = %self.sequencer.kind(), "controller detached");
    }

    pub fn view(&self) -> FillView {
        let state = self.sequencer.state();
        let session = state.session();
        let request = state.request();

        FillView {
            actor_id: self.sequencer.actor().clone(),
            state: state.kind(),
            attached: self.attached,
            stations: session
                .map(|session| session.stations)
                .or_else(|| request.map(|request| request.stations)),
            remaining_seconds: session.map(Session::remaining_seconds),
            predicted_duration_seconds: session
                .map(|session| session.predicted_duration_seconds)
                .or_else(|| request.and_then(|request| request.predicted_duration_seconds)),
            final_approach: matches!(
                state,
                FillState::FinalApproach(_) | FillState::Completing(_)
            ),
            remote_session_id: session.and_then(|session| session.remote_session_id.clone()),
            progress: self.progress.clone(),
            last_completion: self.sequencer.last_completion().cloned(),
            last_error: match state {
                FillState::Error(failure) => Some(failure.message.clone()),
                _ => self.last_error.clone(),
            },
            last_denial: self.sequencer.last_denial(),
        }
    }

    async fn estimate(&self, stations: StationSet, capacity_liters: f64) -> u32 {
        match self
            .authority
            .estimate_duration(self.sequencer.actor(), stations, capacity_liters)
            .await
        {
            Ok(seconds) => seconds,
            Err(error) => {
                let fallback = fallback_duration_seconds(stations, capacity_liters);
                tracing::warn!(
                    error = %error,
                    fallback_seconds = fallback,
                    "duration estimate unavailable, using local approximation"
                );
                fallback
            }
        }
    }

    fn complete(&mut self, completion: Completion) {
        let message = match completion.reason {
            CompletedReason::Manual => format!("Fill on {} stopped", completion.stations),
            CompletedReason::RemoteAutoStop | CompletedReason::None => {
                format!("Fill on {} finished", completion.stations)
            }
        };
        tracing::info!(
            stations = %completion.stations,
            reason = ?completion.reason,
            remote_session_id = ?completion.remote_session_id,
            "fill session completed"
        );
        self.last_error = None;
        self.progress = Some(message);
        self.notify(Notification::Completed(completion));
        self.publish_view();
    }

    fn fail(&mut self, context: &str, error: AuthorityError) -> ControllerError {
        let message = format!("{context}: {error}");
        tracing::warn!(error = %error, state = %self.sequencer.kind(), "{context}");
        self.sequencer.fail(message.clone());
        self.progress = None;
        self.notify(Notification::Failed(message));
        ControllerError::Authority(error)
    }

    fn reject(&mut self, error: SequencerError) -> ControllerError {
        if let SequencerError::Denied(denial) = &error {
            tracing::info!(denial = %denial, "fill request denied");
            self.progress = None;
            self.notify(Notification::Denied(*denial));
        }
        error.into()
    }

    fn report_progress(&mut self, message: String) {
        self.progress = Some(message.clone());
        self.notify(Notification::Progress(message));
        self.publish_view();
    }

    fn notify(&self, notification: Notification) {
        // No subscribers is fine.
        let _ = self.events.send(notification);
    }

    fn publish_view(&self) {
        self.view.send_replace(self.view());
    }
}
