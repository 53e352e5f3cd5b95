use std::time::{Duration, Instant};

///
/// Interval timer checked by polling.  A zero interval is always
/// expired.
///
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    interval: Duration,
    started: Instant,
}

impl Timer {
    pub fn new(interval: Duration) -> Timer {
        Timer {
            interval,
            started: Instant::now(),
        }
    }
    pub fn from_secs(secs: u64) -> Timer {
        Timer::new(Duration::from_secs(secs))
    }

    pub fn reset(&mut self) {
        self.started = Instant::now();
    }
    pub fn interval(&self) -> Duration {
        self.interval
    }
    pub fn expired(&self) -> bool {
        self.started.elapsed() >= self.interval
    }
}
