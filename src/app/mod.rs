pub mod config;
pub mod controller;
mod error;
mod logging;
pub mod runtime;
pub mod services;

pub use error::AppError;

pub fn run_service() -> Result<(), AppError> {
    logging::init()?;

    let config = config::AppConfig::from_env()?;

    tracing::info!(
        actor_id = %config.actor_id,
        authority = ?config.authority,
        authority_timeout_ms = config.authority_timeout_ms,
        http_bind = %config.http_bind,
        settling_delay_seconds = config.settling_delay_seconds,
        valve_station = ?config.valve_station,
        default_capacity_liters = config.default_capacity_liters,
        "fill service bootstrap initialized"
    );

    runtime::run(config)
}
