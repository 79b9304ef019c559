use chrono::{DateTime, SecondsFormat, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimestampMs(pub i64);

impl TimestampMs {
    /// Whole seconds elapsed from `earlier` to `self`, clamped at zero.
    pub fn seconds_since(self, earlier: TimestampMs) -> u64 {
        let delta = self.0.saturating_sub(earlier.0);
        u64::try_from(delta / 1000).unwrap_or(0)
    }

    pub fn to_iso8601(self) -> String {
        let datetime = DateTime::<Utc>::from_timestamp_millis(self.0)
            .unwrap_or_else(|| DateTime::<Utc>::from(std::time::UNIX_EPOCH));
        datetime.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

pub trait Clock {
    fn now(&self) -> TimestampMs;
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> TimestampMs {
        TimestampMs(Utc::now().timestamp_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::TimestampMs;

    #[test]
    fn elapsed_seconds_truncate_and_clamp() {
        assert_eq!(TimestampMs(101_999).seconds_since(TimestampMs(1_000)), 100);
        assert_eq!(TimestampMs(1_000).seconds_since(TimestampMs(5_000)), 0);
    }

    #[test]
    fn formats_rfc3339_with_millis() {
        assert_eq!(
            TimestampMs(1_700_000_000_000).to_iso8601(),
            "2023-11-14T22:13:20.000Z"
        );
    }
}
