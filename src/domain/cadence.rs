use std::time::Duration;

/// What the poller needs to know about local state to pick its cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollContext {
    /// No countdown is running locally.
    Quiet,
    /// A countdown is running with this many seconds left.
    Counting { remaining: u32 },
    /// The local session believes it is finished and awaits remote confirmation.
    CompletedLocally,
}

/// Poll interval as a step function of local countdown state.
pub fn poll_interval(context: PollContext) -> Duration {
    match context {
        PollContext::CompletedLocally => Duration::from_secs(2),
        PollContext::Counting { remaining } if remaining <= 5 => Duration::from_secs(1),
        PollContext::Counting { remaining } if remaining <= 30 => Duration::from_secs(5),
        PollContext::Counting { .. } | PollContext::Quiet => Duration::from_secs(30),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{PollContext, poll_interval};

    #[test]
    fn tightens_as_completion_nears() {
        let cases = [
            (PollContext::Quiet, 30),
            (PollContext::Counting { remaining: 240 }, 30),
            (PollContext::Counting { remaining: 31 }, 30),
            (PollContext::Counting { remaining: 30 }, 5),
            (PollContext::Counting { remaining: 6 }, 5),
            (PollContext::Counting { remaining: 5 }, 1),
            (PollContext::Counting { remaining: 0 }, 1),
            (PollContext::CompletedLocally, 2),
        ];

        for (context, seconds) in cases {
            assert_eq!(
                poll_interval(context),
                Duration::from_secs(seconds),
                "{context:?}"
            );
        }
    }
}
