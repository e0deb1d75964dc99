use log::debug;
use std::thread;
use std::time::{Duration, Instant};

/// Per-instance request pacing: consecutive requests are at least
/// `1 / requests_per_second` apart. Not shared across instances.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    interval: Option<Duration>,
    last_request: Option<Instant>,
}

impl RateLimiter {
    pub fn new(requests_per_second: f64) -> Self {
        // rates too small for a representable interval also disable pacing
        let interval = if requests_per_second > 0.0 {
            Duration::try_from_secs_f64(1.0 / requests_per_second).ok()
        } else {
            None
        };
        if interval.is_none() {
            debug!("Rate limiting disabled for {} requests/s", requests_per_second);
        }

        RateLimiter {
            interval,
            last_request: None,
        }
    }

    pub fn disabled() -> Self {
        RateLimiter {
            interval: None,
            last_request: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.interval.is_some()
    }

    /// Blocks for whatever remains of the interval since the last request.
    /// Returns the time slept.
    pub fn wait(&self) -> Duration {
        let (Some(interval), Some(last)) = (self.interval, self.last_request) else {
            return Duration::ZERO;
        };

        let elapsed = last.elapsed();
        if elapsed >= interval {
            return Duration::ZERO;
        }

        let remaining = interval - elapsed;
        debug!("Rate limit: waiting {:?} before next request", remaining);
        thread::sleep(remaining);
        remaining
    }

    /// Records that a request just completed.
    pub fn mark(&mut self) {
        self.last_request = Some(Instant::now());
    }
}
