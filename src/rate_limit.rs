//! Reload rate limiting.
//!
//! A smooth token bucket: permits are issued at a steady rate, and up to
//! one second of unused capacity is banked for bursts after idle periods.
//! Callers reserve the next free slot under a lock and sleep outside it,
//! so concurrent callers are admitted in reservation order.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

/// Seconds of idle capacity the bucket can bank.
const MAX_BURST_SECONDS: f64 = 1.0;

/// Slowest accepted rate: one permit a year.
pub const MIN_RATE: f64 = 1.0 / (365.0 * 24.0 * 60.0 * 60.0);

/// A rate that cannot drive a limiter.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
#[error("rate must be a finite number of permits per second, at least one per year (got {0})")]
pub struct InvalidRate(pub f64);

/// Validate a rate and return the interval between permits.
pub fn check_rate(permits_per_second: f64) -> Result<Duration, InvalidRate> {
    if !(permits_per_second.is_finite() && permits_per_second >= MIN_RATE) {
        return Err(InvalidRate(permits_per_second));
    }
    Duration::try_from_secs_f64(1.0 / permits_per_second)
        .map_err(|_| InvalidRate(permits_per_second))
}

/// Token accounting. Only touched with the limiter's lock held.
#[derive(Debug)]
struct Bucket {
    rate: f64,
    stored_permits: f64,
    max_permits: f64,
    stable_interval: Duration,
    /// Earliest moment the next permit can be handed out.
    next_free: Instant,
}

impl Bucket {
    fn new(rate: f64, interval: Duration, now: Instant) -> Self {
        let mut bucket = Self {
            rate,
            stored_permits: 0.0,
            max_permits: 0.0,
            stable_interval: Duration::ZERO,
            next_free: now,
        };
        bucket.set_rate(rate, interval, now);
        bucket
    }

    /// Bank permits for time spent idle since `next_free`.
    fn resync(&mut self, now: Instant) {
        if now > self.next_free {
            let idle = now.duration_since(self.next_free).as_secs_f64();
            let earned = idle / self.stable_interval.as_secs_f64();
            self.stored_permits = (self.stored_permits + earned).min(self.max_permits);
            self.next_free = now;
        }
    }

    fn set_rate(&mut self, rate: f64, interval: Duration, now: Instant) {
        self.resync(now);
        let old_max = self.max_permits;
        self.rate = rate;
        self.stable_interval = interval;
        self.max_permits = rate * MAX_BURST_SECONDS;
        self.stored_permits = if old_max == 0.0 {
            0.0
        } else {
            self.stored_permits * self.max_permits / old_max
        };
    }

    /// Reserve one permit and return the moment it becomes usable.
    fn reserve(&mut self, now: Instant) -> Instant {
        self.resync(now);
        let moment = self.next_free;
        let from_store = self.stored_permits.min(1.0);
        let fresh = 1.0 - from_store;
        // Past the clock's range the schedule stays pinned at its furthest point.
        if let Some(next) = self.next_free.checked_add(self.stable_interval.mul_f64(fresh)) {
            self.next_free = next;
        }
        self.stored_permits -= from_store;
        moment
    }
}

/// Thread-safe permit issuer shared by every reload in the process.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a limiter issuing `permits_per_second` permits.
    ///
    /// The first permit is available immediately.
    pub fn new(permits_per_second: f64) -> Result<Self, InvalidRate> {
        let interval = check_rate(permits_per_second)?;
        Ok(Self {
            bucket: Mutex::new(Bucket::new(permits_per_second, interval, Instant::now())),
        })
    }

    /// Create a limiter already wrapped for sharing.
    pub fn shared(permits_per_second: f64) -> Result<Arc<Self>, InvalidRate> {
        Self::new(permits_per_second).map(Arc::new)
    }

    // Accounting is plain numbers, so a panic elsewhere cannot leave it torn.
    fn lock(&self) -> MutexGuard<'_, Bucket> {
        self.bucket.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current rate in permits per second.
    pub fn rate(&self) -> f64 {
        self.lock().rate
    }

    /// Change the rate. Banked permits are scaled to the new burst size.
    pub fn set_rate(&self, permits_per_second: f64) -> Result<(), InvalidRate> {
        let interval = check_rate(permits_per_second)?;
        self.lock().set_rate(permits_per_second, interval, Instant::now());
        Ok(())
    }

    /// Acquire one permit, waiting at most `timeout`.
    ///
    /// Returns `false` without consuming anything if the permit could not
    /// be granted within `timeout`. A zero timeout never sleeps.
    pub fn try_acquire(&self, timeout: Duration) -> bool {
        let now = Instant::now();
        let wait = {
            let mut bucket = self.lock();
            if let Some(latest) = now.checked_add(timeout) {
                if bucket.next_free > latest {
                    return false;
                }
            }
            bucket.reserve(now).saturating_duration_since(now)
        };

        if !wait.is_zero() {
            debug!(wait_ms = wait.as_millis() as u64, "Waiting for reload permit");
            thread::sleep(wait);
        }
        true
    }

    /// Acquire one permit, waiting as long as needed. Returns the time spent waiting.
    pub fn acquire(&self) -> Duration {
        let now = Instant::now();
        let wait = self.lock().reserve(now).saturating_duration_since(now);
        if !wait.is_zero() {
            thread::sleep(wait);
        }
        wait
    }

    /// Get current stats.
    pub fn stats(&self) -> RateLimitStats {
        let bucket = self.lock();
        RateLimitStats {
            permits_per_second: bucket.rate,
            stored_permits: bucket.stored_permits,
            max_permits: bucket.max_permits,
        }
    }
}

/// Rate limit statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitStats {
    pub permits_per_second: f64,
    pub stored_permits: f64,
    pub max_permits: f64,
}

/// Whether reloads are gated, and by which shared limiter.
#[derive(Debug, Clone, Default)]
pub enum ReloadLimit {
    /// Every reload proceeds immediately.
    #[default]
    Unlimited,
    /// Reloads need a permit from this limiter.
    Limited(Arc<RateLimiter>),
}

impl ReloadLimit {
    /// Gate reloads with a fresh limiter at `permits_per_second`.
    pub fn per_second(permits_per_second: f64) -> Result<Self, InvalidRate> {
        RateLimiter::shared(permits_per_second).map(Self::Limited)
    }

    /// Gate reloads from an optional rate; `None` disables limiting.
    pub fn from_rate(permits_per_second: Option<f64>) -> Result<Self, InvalidRate> {
        match permits_per_second {
            Some(rate) => Self::per_second(rate),
            None => Ok(Self::Unlimited),
        }
    }

    /// Check if reloads are rate limited.
    pub fn is_limited(&self) -> bool {
        matches!(self, Self::Limited(_))
    }
}

impl From<Arc<RateLimiter>> for ReloadLimit {
    fn from(limiter: Arc<RateLimiter>) -> Self {
        Self::Limited(limiter)
    }
}
