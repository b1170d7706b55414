//! Clock abstraction for testable time-dependent code.
//!
//! Every expiry decision in the cache reads wall-clock time through a
//! [`Clock`]. Production code uses [`SystemClock`]; tests use [`MockClock`]
//! and advance it explicitly instead of sleeping.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Clock abstraction for testable time-dependent code
pub trait Clock: Send + Sync + 'static {
    /// Get current instant (monotonic time)
    fn now(&self) -> Instant;

    /// Get current system time (wall clock)
    fn system_time(&self) -> SystemTime;

    /// Get seconds since UNIX epoch with sub-second precision
    fn epoch_secs(&self) -> f64 {
        epoch_secs(self.system_time())
    }

    /// Get whole seconds since UNIX epoch
    fn unix_secs(&self) -> u64 {
        self.system_time().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
    }
}

/// Convert a wall-clock time into fractional seconds since UNIX epoch.
///
/// Times before the epoch collapse to `0.0`.
#[must_use]
pub fn epoch_secs(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

/// System clock implementation using real time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Implement Clock for Arc<T> where T: Clock for convenient cloning
impl<T: Clock> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn system_time(&self) -> SystemTime {
        (**self).system_time()
    }
}

/// Mock clock for deterministic testing
///
/// Wall-clock time starts at [`MockClock::DEFAULT_EPOCH_SECS`] so expiry
/// arithmetic behaves like it would against a real clock. Clones share the
/// same elapsed counter.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    wall_start: SystemTime,
    elapsed: Arc<Mutex<Duration>>,
}

impl MockClock {
    /// Wall-clock seconds since UNIX epoch a fresh mock clock reports.
    pub const DEFAULT_EPOCH_SECS: u64 = 1_700_000_000;

    /// Create a new mock clock starting at [`Self::DEFAULT_EPOCH_SECS`]
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(UNIX_EPOCH + Duration::from_secs(Self::DEFAULT_EPOCH_SECS))
    }

    /// Create a new mock clock with a specific wall-clock start time
    #[must_use]
    pub fn starting_at(wall_start: SystemTime) -> Self {
        Self { start: Instant::now(), wall_start, elapsed: Arc::new(Mutex::new(Duration::ZERO)) }
    }

    /// Advance the clock by the given duration
    pub fn advance(&self, duration: Duration) {
        *self.elapsed.lock() += duration;
    }

    /// Set the total elapsed time since the clock was created
    pub fn set_elapsed(&self, duration: Duration) {
        *self.elapsed.lock() = duration;
    }

    /// Get the total elapsed time since the clock was created
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        self.wall_start + self.elapsed()
    }
}
