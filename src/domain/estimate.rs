use crate::domain::station::StationSet;

// Best-effort approximations of fill time per liter; not verified flow rates.
const DUAL_SECONDS_PER_LITER: f64 = 0.46;
const SINGLE_SECONDS_PER_LITER: f64 = 0.9;

/// Local duration estimate used when the remote estimator is unavailable.
pub fn fallback_duration_seconds(stations: StationSet, capacity_liters: f64) -> u32 {
    if !capacity_liters.is_finite() || capacity_liters <= 0.0 {
        return 0;
    }

    let rate = if stations.is_dual() {
        DUAL_SECONDS_PER_LITER
    } else {
        SINGLE_SECONDS_PER_LITER
    };

    let seconds = (capacity_liters * rate).round();
    if seconds >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        seconds as u32
    }
}
