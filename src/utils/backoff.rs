use rand::Rng;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct ReconnectCfg {
    /// Quick retries right after a drop.
    pub fast_attempts: u32,
    pub fast_delay: Duration,

    /// Exponential part.
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,

    /// Upper bound of the random jitter added to every exponential delay.
    pub jitter: Duration,
}

impl Default for ReconnectCfg {
    fn default() -> Self {
        Self {
            fast_attempts: 3,
            fast_delay: Duration::from_millis(10),
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
            jitter: Duration::from_millis(20),
        }
    }
}

/// Reconnect pacing for a transport peer.
///
/// The owner asks `ready()` on each poll turn; when it is not ready yet the
/// owner simply waits out the rest of its poll interval.
#[derive(Debug)]
pub struct Backoff {
    cfg: ReconnectCfg,
    attempt: u32,
    next_at: Option<Instant>,
}

impl Backoff {
    pub fn new(cfg: ReconnectCfg) -> Self {
        Self {
            cfg,
            attempt: 0,
            next_at: None,
        }
    }

    #[inline]
    pub fn on_success(&mut self) {
        self.attempt = 0;
        self.next_at = None;
    }

    /// Record a failed attempt and schedule the next one.
    pub fn on_failure(&mut self) -> Duration {
        let delay = self.next_delay();
        self.next_at = Some(Instant::now() + delay);
        delay
    }

    /// Time left before the next attempt is allowed.
    #[inline]
    pub fn remaining(&self) -> Duration {
        match self.next_at {
            Some(at) => at.saturating_duration_since(Instant::now()),
            None => Duration::ZERO,
        }
    }

    #[inline]
    pub fn ready(&self) -> bool {
        self.remaining().is_zero()
    }

    #[inline]
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    fn next_delay(&mut self) -> Duration {
        if self.attempt < self.cfg.fast_attempts {
            self.attempt += 1;
            return self.cfg.fast_delay;
        }

        let exp = self.cfg.base_delay.as_secs_f64()
            * self
                .cfg
                .factor
                .powi((self.attempt - self.cfg.fast_attempts) as i32);
        let capped = Duration::from_secs_f64(exp.min(self.cfg.max_delay.as_secs_f64()));
        self.attempt = self.attempt.saturating_add(1);

        let jitter_ms = self.cfg.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return capped;
        }
        let jitter = rand::thread_rng().gen_range(0..=jitter_ms);
        (capped + Duration::from_millis(jitter)).min(self.cfg.max_delay)
    }
}
