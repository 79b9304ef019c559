use std::future;
use std::thread::JoinHandle;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{App, HttpServer, web};
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval};

use crate::adapters::api::{ApiState, configure_routes};
use crate::adapters::authority::{AuthorityError, RemoteAuthority};
use crate::adapters::http_authority::HttpAuthority;
use crate::adapters::script_authority::ScriptAuthority;
use crate::app::config::{AppConfig, AuthorityMode};
use crate::app::controller::{ControllerSettings, FillAction, FillController};
use crate::app::error::AppError;
use crate::app::services::{Command, ControllerHandle};
use crate::domain::clock::{Clock, SystemClock};
use crate::domain::occupancy::{ActorId, InProgressSession, OccupancySnapshot};
use crate::domain::sequencer::{ScheduleId, Sequencer};
use crate::domain::station::{Station, StationSet};

const COMMAND_CAPACITY: usize = 32;
const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

/// The authority implementation selected by configuration.
#[derive(Debug)]
pub enum ConfiguredAuthority {
    Http(HttpAuthority),
    Script(ScriptAuthority),
}

impl ConfiguredAuthority {
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        match &config.authority {
            AuthorityMode::Http { base_url } => HttpAuthority::new(
                base_url,
                Duration::from_millis(config.authority_timeout_ms),
            )
            .map(Self::Http)
            .map_err(AppError::authority),
            AuthorityMode::Script { path } => ScriptAuthority::from_file(path)
                .map(Self::Script)
                .map_err(AppError::authority),
        }
    }
}

impl RemoteAuthority for ConfiguredAuthority {
    async fn occupancy(&self) -> Result<OccupancySnapshot, AuthorityError> {
        match self {
            Self::Http(authority) => authority.occupancy().await,
            Self::Script(authority) => authority.occupancy().await,
        }
    }

    async fn in_progress_session(
        &self,
        actor: &ActorId,
    ) -> Result<Option<InProgressSession>, AuthorityError> {
        match self {
            Self::Http(authority) => authority.in_progress_session(actor).await,
            Self::Script(authority) => authority.in_progress_session(actor).await,
        }
    }

    async fn start_station(&self, station: Station) -> Result<(), AuthorityError> {
        match self {
            Self::Http(authority) => authority.start_station(station).await,
            Self::Script(authority) => authority.start_station(station).await,
        }
    }

    async fn stop_station(&self, station: Station) -> Result<(), AuthorityError> {
        match self {
            Self::Http(authority) => authority.stop_station(station).await,
            Self::Script(authority) => authority.stop_station(station).await,
        }
    }

    async fn estimate_duration(
        &self,
        actor: &ActorId,
        stations: StationSet,
        capacity_liters: f64,
    ) -> Result<u32, AuthorityError> {
        match self {
            Self::Http(authority) => {
                authority
                    .estimate_duration(actor, stations, capacity_liters)
                    .await
            }
            Self::Script(authority) => {
                authority
                    .estimate_duration(actor, stations, capacity_liters)
                    .await
            }
        }
    }

    async fn record_session(
        &self,
        actor: &ActorId,
        amount_liters: f64,
        stations: StationSet,
    ) -> Result<String, AuthorityError> {
        match self {
            Self::Http(authority) => authority.record_session(actor, amount_liters, stations).await,
            Self::Script(authority) => {
                authority
                    .record_session(actor, amount_liters, stations)
                    .await
            }
        }
    }

    async fn record_stop(
        &self,
        actor: &ActorId,
        remote_session_id: &str,
    ) -> Result<(), AuthorityError> {
        match self {
            Self::Http(authority) => authority.record_stop(actor, remote_session_id).await,
            Self::Script(authority) => authority.record_stop(actor, remote_session_id).await,
        }
    }
}

/// Creates the handle for `controller` and the command receiver its loop
/// must be driven with.
pub fn channel<A, C>(controller: &FillController<A, C>) -> (ControllerHandle, mpsc::Receiver<Command>)
where
    A: RemoteAuthority,
    C: Clock,
{
    let (commands, receiver) = mpsc::channel(COMMAND_CAPACITY);
    let handle = ControllerHandle::new(
        commands,
        controller.watch_view(),
        controller.notifications(),
    );
    (handle, receiver)
}

/// Serialises UI commands, the adaptive poll timer and the countdown
/// schedule on one task. Ends when every handle is dropped or a shutdown
/// command arrives; all schedules end with it.
pub async fn run_controller<A, C>(
    mut controller: FillController<A, C>,
    mut commands: mpsc::Receiver<Command>,
) where
    A: RemoteAuthority,
    C: Clock,
{
    if let Err(error) = controller.apply(FillAction::Attach).await {
        tracing::warn!(error = %error, "initial attach failed");
    }

    let mut countdown: Option<(ScheduleId, Interval)> = None;
    let mut poll_deadline = Instant::now();

    loop {
        if controller.take_poll_request() {
            poll_deadline = Instant::now();
        }
        sync_countdown(&controller, &mut countdown);
        let polling = controller.is_attached();

        tokio::select! {
            biased;

            command = commands.recv() => match command {
                Some(Command::Apply { action, reply }) => {
                    let result = controller.apply(action).await.map(|()| controller.view());
                    if reply.send(result).is_err() {
                        tracing::debug!("command caller went away before the reply");
                    }
                }
                Some(Command::Shutdown) | None => break,
            },
            () = tokio::time::sleep_until(poll_deadline), if polling => {
                controller.poll().await;
                poll_deadline = Instant::now() + controller.poll_interval();
            }
            () = next_tick(&mut countdown) => controller.tick().await,
        }
    }

    tracing::info!("controller loop stopped");
}

/// Keeps at most one countdown interval alive, replacing it whenever the
/// sequencer reports a different schedule.
fn sync_countdown<A, C>(
    controller: &FillController<A, C>,
    countdown: &mut Option<(ScheduleId, Interval)>,
) where
    A: RemoteAuthority,
    C: Clock,
{
    let wanted = controller
        .countdown_schedule()
        .filter(|_| controller.is_attached());

    match (wanted, countdown.as_ref()) {
        (Some(id), Some((current, _))) if *current == id => {}
        (Some(id), _) => {
            tracing::debug!(session = id.session, epoch = id.epoch, "countdown schedule started");
            let interval =
                tokio::time::interval_at(Instant::now() + COUNTDOWN_TICK, COUNTDOWN_TICK);
            *countdown = Some((id, interval));
        }
        (None, Some(_)) => {
            tracing::debug!("countdown schedule cancelled");
            *countdown = None;
        }
        (None, None) => {}
    }
}

async fn next_tick(countdown: &mut Option<(ScheduleId, Interval)>) {
    match countdown {
        Some((_, interval)) => {
            interval.tick().await;
        }
        None => future::pending::<()>().await,
    }
}

/// Runs the controller loop on its own thread with a single-threaded runtime.
pub fn spawn_controller<A, C>(
    controller: FillController<A, C>,
) -> Result<(ControllerHandle, JoinHandle<()>), AppError>
where
    A: RemoteAuthority,
    C: Clock + Send + 'static,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(AppError::runtime)?;
    let (handle, commands) = channel(&controller);

    let thread = std::thread::Builder::new()
        .name("fill-controller".to_string())
        .spawn(move || runtime.block_on(run_controller(controller, commands)))
        .map_err(AppError::runtime)?;

    Ok((handle, thread))
}

fn build_cors(allowed_origin: Option<&str>) -> Cors {
    match allowed_origin {
        Some(origin) => Cors::default()
            .allowed_origin(origin)
            .allowed_methods(vec!["GET", "POST"])
            .allow_any_header()
            .max_age(3600),
        None => Cors::permissive(),
    }
}

pub fn run(config: AppConfig) -> Result<(), AppError> {
    let authority = ConfiguredAuthority::from_config(&config)?;
    let sequencer = Sequencer::new(ActorId::new(config.actor_id.clone()), config.valve_station);
    let controller = FillController::new(
        authority,
        SystemClock,
        sequencer,
        ControllerSettings {
            settling_delay_seconds: config.settling_delay_seconds,
            default_capacity_liters: config.default_capacity_liters,
        },
    );
    let (handle, controller_thread) = spawn_controller(controller)?;

    let api_state = ApiState {
        fill: handle.clone(),
    };
    let cors_origin = config.cors_allowed_origin.clone();

    tracing::info!(bind = %config.http_bind, "http server starting");

    let server_result = actix_web::rt::System::new().block_on(async move {
        HttpServer::new(move || {
            App::new()
                .wrap(build_cors(cors_origin.as_deref()))
                .app_data(web::Data::new(api_state.clone()))
                .configure(configure_routes)
        })
        .bind(&config.http_bind)?
        .run()
        .await
    });

    handle.shutdown();
    drop(handle);
    if controller_thread.join().is_err() {
        return Err(AppError::runtime("controller thread panicked"));
    }

    server_result.map_err(AppError::runtime)
}
