//! The process-wide monotonic clock.
//!
//! Every timestamp recorded by `framescope` is expressed in seconds since a
//! single epoch, fixed the first time the clock is read. Because all threads
//! share the epoch, timestamps taken on different threads can be compared
//! directly, without any wall-clock skew.

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<WallTime> = OnceLock::new();

/// "Monotonic clock" with nanosecond precision (using [`std::time::Instant`]).
#[derive(Debug)]
pub struct WallTime {
    start: Instant,
}

impl WallTime {
    fn new() -> Self {
        WallTime {
            start: Instant::now(),
        }
    }

    #[inline]
    fn since_start(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

/// Seconds elapsed since the process epoch.
#[inline]
pub fn now() -> f64 {
    EPOCH.get_or_init(WallTime::new).since_start()
}

/// Fixes the epoch if it has not been fixed yet. Calling this early (e.g. at
/// the top of `main`) makes timestamps read as "seconds since startup".
pub fn init() {
    EPOCH.get_or_init(WallTime::new);
}
