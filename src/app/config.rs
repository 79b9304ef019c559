use std::str::FromStr;

use crate::app::AppError;
use crate::domain::station::Station;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorityMode {
    Http { base_url: String },
    Script { path: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub actor_id: String,
    pub authority: AuthorityMode,
    pub authority_timeout_ms: u64,
    pub http_bind: String,
    pub settling_delay_seconds: u32,
    pub valve_station: Option<Station>,
    pub default_capacity_liters: f64,
    pub cors_allowed_origin: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let actor_id = non_empty(&lookup, "FILL_ACTOR_ID")
            .ok_or_else(|| AppError::config("FILL_ACTOR_ID is required"))?;

        let mode = non_empty(&lookup, "AUTHORITY_MODE").unwrap_or_else(|| "http".to_string());
        let authority = match mode.to_ascii_lowercase().as_str() {
            "http" => AuthorityMode::Http {
                base_url: non_empty(&lookup, "AUTHORITY_URL").ok_or_else(|| {
                    AppError::config("AUTHORITY_URL is required when AUTHORITY_MODE=http")
                })?,
            },
            "script" => AuthorityMode::Script {
                path: non_empty(&lookup, "AUTHORITY_SCRIPT_PATH").ok_or_else(|| {
                    AppError::config("AUTHORITY_SCRIPT_PATH is required when AUTHORITY_MODE=script")
                })?,
            },
            other => {
                return Err(AppError::config(format!(
                    "AUTHORITY_MODE must be http or script, got {other}"
                )));
            }
        };

        let valve_station = match non_empty(&lookup, "MANUAL_VALVE_STATION") {
            None => Some(Station::B),
            Some(value) if value.eq_ignore_ascii_case("none") => None,
            Some(value) => Some(Station::from_str(&value).map_err(AppError::config)?),
        };

        let default_capacity_liters =
            parse_or_default(&lookup, "DEFAULT_CAPACITY_LITERS", 1000.0_f64)?;
        if !default_capacity_liters.is_finite() || default_capacity_liters <= 0.0 {
            return Err(AppError::config(
                "DEFAULT_CAPACITY_LITERS must be a positive number",
            ));
        }

        Ok(Self {
            actor_id,
            authority,
            authority_timeout_ms: parse_or_default(&lookup, "AUTHORITY_TIMEOUT_MS", 5000_u64)?,
            http_bind: non_empty(&lookup, "HTTP_BIND").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            settling_delay_seconds: parse_or_default(&lookup, "SETTLING_DELAY_SECONDS", 5_u32)?,
            valve_station,
            default_capacity_liters,
            cors_allowed_origin: non_empty(&lookup, "CORS_ALLOWED_ORIGIN"),
        })
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or_default<T, F>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr + Copy,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::config(format!("{key} must be a valid number"))),
        None => Ok(default),
    }
}
