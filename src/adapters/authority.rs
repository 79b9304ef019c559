use std::future::Future;

use thiserror::Error;

use crate::domain::authority_payload::PayloadError;
use crate::domain::occupancy::{ActorId, InProgressSession, OccupancySnapshot};
use crate::domain::station::{Station, StationSet};

/// The remote system that owns the pumps and is the source of truth for
/// what is actually running.
///
/// Timeouts are the implementation's responsibility; callers treat every
/// error the same way.
pub trait RemoteAuthority: Send + Sync + 'static {
    fn occupancy(&self) -> impl Future<Output = Result<OccupancySnapshot, AuthorityError>> + Send;

    fn in_progress_session(
        &self,
        actor: &ActorId,
    ) -> impl Future<Output = Result<Option<InProgressSession>, AuthorityError>> + Send;

    fn start_station(
        &self,
        station: Station,
    ) -> impl Future<Output = Result<(), AuthorityError>> + Send;

    fn stop_station(
        &self,
        station: Station,
    ) -> impl Future<Output = Result<(), AuthorityError>> + Send;

    fn estimate_duration(
        &self,
        actor: &ActorId,
        stations: StationSet,
        capacity_liters: f64,
    ) -> impl Future<Output = Result<u32, AuthorityError>> + Send;

    fn record_session(
        &self,
        actor: &ActorId,
        amount_liters: f64,
        stations: StationSet,
    ) -> impl Future<Output = Result<String, AuthorityError>> + Send;

    fn record_stop(
        &self,
        actor: &ActorId,
        remote_session_id: &str,
    ) -> impl Future<Output = Result<(), AuthorityError>> + Send;
}

#[derive(Debug, Error)]
pub enum AuthorityError {
    #[error("authority request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("authority responded with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("authority payload invalid: {0}")]
    Payload(#[from] PayloadError),
    #[error("failed to load authority script: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse authority script as JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid authority base url {url}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("scripted authority failure: {0}")]
    Scripted(String),
}
