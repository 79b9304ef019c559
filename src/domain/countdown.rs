/// Remaining seconds at which the final-approach signal fires.
pub const FINAL_APPROACH_SECONDS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownSignal {
    FinalApproach,
    Exhausted,
}

/// Second-granularity countdown with two one-shot threshold signals.
///
/// The engine is purely logical: whoever owns it calls [`tick`](Self::tick)
/// once per second while it is enabled. [`schedule_epoch`](Self::schedule_epoch)
/// changes on every enable so the owner can drop any ticking schedule that
/// belongs to an older epoch before creating a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountdownEngine {
    remaining: u32,
    enabled: bool,
    final_approach_armed: bool,
    exhausted_armed: bool,
    schedule_epoch: u64,
}

impl CountdownEngine {
    pub fn new(initial_seconds: u32, enabled: bool) -> Self {
        let mut engine = Self {
            remaining: initial_seconds,
            enabled: false,
            final_approach_armed: true,
            exhausted_armed: true,
            schedule_epoch: 0,
        };
        engine.set_enabled(enabled);
        engine
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    pub fn schedule_epoch(&self) -> u64 {
        self.schedule_epoch
    }

    /// Enabling always starts a fresh schedule; disabling keeps the value.
    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled {
            self.schedule_epoch = self.schedule_epoch.wrapping_add(1);
        }
        self.enabled = enabled;
    }

    /// Replaces the value and re-arms both signals. Resetting to zero does
    /// not fire `Exhausted`; the caller handles that case.
    pub fn reset(&mut self, seconds: u32) {
        self.remaining = seconds;
        self.final_approach_armed = true;
        self.exhausted_armed = true;
    }

    pub fn tick(&mut self) -> Option<CountdownSignal> {
        if !self.enabled || self.remaining == 0 {
            return None;
        }

        self.remaining -= 1;

        if self.remaining == FINAL_APPROACH_SECONDS && self.final_approach_armed {
            self.final_approach_armed = false;
            return Some(CountdownSignal::FinalApproach);
        }

        if self.remaining == 0 && self.exhausted_armed {
            self.exhausted_armed = false;
            return Some(CountdownSignal::Exhausted);
        }

        None
    }
}
