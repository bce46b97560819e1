//! Minimum-spacing limiter for outbound quote requests.
//!
//! One instance is shared by every caller in a fetch cycle. `wait` holds the
//! lock while sleeping, so callers are released one at a time in the order
//! they acquired the lock, each at least `min_interval` after the previous.

use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use super::settings::DEFAULT_SPACING_SECONDS;

#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_release: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_release: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    fn lock_last(&self) -> MutexGuard<'_, Option<Instant>> {
        self.last_release.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limiter mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Block until at least `min_interval` has passed since the previous
    /// call returned.
    pub fn wait(&self) {
        let mut last = self.lock_last();

        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                let remaining = self.min_interval - elapsed;
                debug!("Rate limiter: waiting {:?}", remaining);
                thread::sleep(remaining);
            }
        }

        *last = Some(Instant::now());
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Duration::from_secs_f64(DEFAULT_SPACING_SECONDS))
    }
}
