//! Request pacing: per-source minimum intervals and an optional global cap

use crate::clock::Clock;
use chrono::{DateTime, Utc};
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Minimum interval between requests for one source tag.
///
/// Time is supplied by the caller so that a synthetic clock can drive it.
#[derive(Debug, Clone)]
pub struct SourceRateLimiter {
    last_request: Option<DateTime<Utc>>,
    min_interval: Duration,
}

impl SourceRateLimiter {
    /// Limiter allowing `rpm` requests per minute
    pub fn per_minute(rpm: u32) -> Self {
        Self {
            last_request: None,
            min_interval: interval_for_rpm(rpm),
        }
    }

    pub fn set_min_interval(&mut self, interval: Duration) {
        self.min_interval = interval;
    }

    pub fn last_request(&self) -> Option<DateTime<Utc>> {
        self.last_request
    }

    /// Take a slot at `now`, or report how long to wait for one
    pub fn try_acquire(&mut self, now: DateTime<Utc>) -> std::result::Result<(), Duration> {
        if let Some(last) = self.last_request {
            let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                trace!("Rate limiting: waiting {:?}", wait_time);
                return Err(wait_time);
            }
        }

        self.last_request = Some(now);
        Ok(())
    }
}

/// `60 / rpm` seconds
pub fn interval_for_rpm(rpm: u32) -> Duration {
    Duration::from_secs_f64(60.0 / f64::from(rpm.max(1)))
}

/// Presents a [`Clock`] to governor as time since the Unix epoch
#[derive(Clone)]
struct GovernorClock(Arc<dyn Clock>);

impl governor::clock::Clock for GovernorClock {
    type Instant = Duration;

    fn now(&self) -> Duration {
        let nanos = self.0.now().timestamp_nanos_opt().unwrap_or_default();
        Duration::from_nanos(u64::try_from(nanos).unwrap_or_default())
    }
}

/// Process-wide cap across all sources
pub struct GlobalRateLimiter {
    limiter: RateLimiter<NotKeyed, InMemoryState, GovernorClock, NoOpMiddleware<Duration>>,
    clock: GovernorClock,
}

impl GlobalRateLimiter {
    pub fn per_minute(requests_per_minute: u32, clock: Arc<dyn Clock>) -> Self {
        let rpm = NonZeroU32::new(requests_per_minute).unwrap_or(nonzero!(1u32));
        let clock = GovernorClock(clock);
        let limiter = RateLimiter::direct_with_clock(Quota::per_minute(rpm), clock.clone());

        Self { limiter, clock }
    }

    /// Wait until a request is allowed, sleeping on the injected clock
    pub async fn wait(&self) {
        loop {
            match self.limiter.check() {
                Ok(()) => return,
                Err(not_until) => {
                    let wait = not_until.wait_time_from(governor::clock::Clock::now(&self.clock));
                    trace!("Global rate limit: waiting {:?}", wait);
                    self.clock.0.sleep(wait).await;
                }
            }
        }
    }
}
