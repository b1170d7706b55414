//! Time abstractions.

mod clock;

pub use clock::{epoch_secs, Clock, MockClock, SystemClock};
