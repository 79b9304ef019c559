use std::time::Duration;

use chrono::Utc;
use fill_station_controller::adapters::authority::RemoteAuthority;
use fill_station_controller::adapters::http_authority::HttpAuthority;
use fill_station_controller::domain::admission::can_admit;
use fill_station_controller::domain::occupancy::{ActorId, OccupancySnapshot};
use fill_station_controller::domain::station::{Station, StationSet};

const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

fn main() {
    dotenvy::dotenv().ok();

    let Some(base_url) = std::env::var("AUTHORITY_URL")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
    else {
        println!("[{}] ERROR: AUTHORITY_URL is required", now_iso());
        return;
    };
    let interval = std::env::var("PROBE_INTERVAL_SECONDS")
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map_or(DEFAULT_INTERVAL, Duration::from_secs);
    let actor = std::env::var("FILL_ACTOR_ID").ok().map(ActorId::new);

    let authority = match HttpAuthority::new(&base_url, REQUEST_TIMEOUT) {
        Ok(authority) => authority,
        Err(err) => {
            println!("[{}] ERROR: could not build HTTP client: {err}", now_iso());
            return;
        }
    };
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            println!("[{}] ERROR: could not start runtime: {err}", now_iso());
            return;
        }
    };

    println!(
        "Starting occupancy probe against {base_url} (interval: {}s)...",
        interval.as_secs()
    );

    runtime.block_on(async {
        loop {
            match authority.occupancy().await {
                Ok(snapshot) => {
                    for line in describe(&snapshot, actor.as_ref()) {
                        println!("{line}");
                    }
                }
                Err(err) => println!("[{}] ERROR: occupancy query failed: {err}", now_iso()),
            }
            println!();
            tokio::time::sleep(interval).await;
        }
    });
}

fn describe(snapshot: &OccupancySnapshot, actor: Option<&ActorId>) -> Vec<String> {
    let holder = snapshot
        .active_actor
        .as_ref()
        .map_or_else(|| "nobody".to_string(), ToString::to_string);
    let mut lines = vec![format!("[{}] Active: {holder}", now_iso())];

    for station in Station::ALL {
        lines.push(format!(
            "  {station}: {}",
            if snapshot.power(station).is_on() {
                "on"
            } else {
                "off"
            }
        ));
    }

    if let Some(actor) = actor {
        let admissible: Vec<&str> = [
            StationSet::Single(Station::A),
            StationSet::Single(Station::B),
            StationSet::Dual,
        ]
        .into_iter()
        .filter(|set| can_admit(*set, actor, snapshot))
        .map(StationSet::label)
        .collect();
        lines.push(format!(
            "  Admissible for {actor}: {}",
            if admissible.is_empty() {
                "none".to_string()
            } else {
                admissible.join(", ")
            }
        ));
    }

    lines
}

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}
