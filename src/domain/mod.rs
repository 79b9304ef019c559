pub mod admission;
pub mod authority_payload;
pub mod cadence;
pub mod clock;
pub mod countdown;
pub mod estimate;
pub mod occupancy;
pub mod sequencer;
pub mod station;
