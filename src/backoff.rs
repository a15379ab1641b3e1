/*
 * Copyright Stalwart Labs Ltd. See the COPYING
 * file at the top-level directory of this distribution.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::time::Duration;

use rand::Rng;

/// Retry schedule.
pub trait Backoff: Send + Sync {
    /// Returns the delay before attempt `attempt` (0-based), or `None`
    /// once no attempts remain.
    fn next(&self, attempt: u32) -> Option<Duration>;
}

/// A single attempt with no retries.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleAttempt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jitter {
    /// Uniform in `[0, delay]`.
    Full,
    /// Uniform in `[delay / 2, delay]`.
    Half,
    /// Exactly `delay`.
    None,
}

/// Exponential backoff: `base * 2^(attempt - 1)`, capped at `max`, with
/// jitter applied.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    attempts: u32,
    base: Duration,
    max: Duration,
    jitter: Jitter,
}

impl Backoff for SingleAttempt {
    fn next(&self, attempt: u32) -> Option<Duration> {
        (attempt == 0).then_some(Duration::ZERO)
    }
}

impl ExponentialBackoff {
    /// `attempts` is the total number of tries, at least one. A zero `max`
    /// disables the cap.
    pub fn new(attempts: u32, base: Duration, max: Duration, jitter: Jitter) -> Self {
        ExponentialBackoff {
            attempts: attempts.max(1),
            base,
            max,
            jitter,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    fn delay(&self, attempt: u32) -> Duration {
        let delay = 1u32
            .checked_shl(attempt - 1)
            .and_then(|factor| self.base.checked_mul(factor))
            .unwrap_or(Duration::MAX);
        if !self.max.is_zero() && delay > self.max {
            self.max
        } else {
            delay
        }
    }
}

impl Backoff for ExponentialBackoff {
    fn next(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.attempts {
            return None;
        } else if attempt == 0 {
            return Some(Duration::ZERO);
        }

        let delay = self.delay(attempt);
        let nanos = u64::try_from(delay.as_nanos()).unwrap_or(u64::MAX);
        let mut rng = rand::thread_rng();
        Some(match self.jitter {
            Jitter::Full => Duration::from_nanos(rng.gen_range(0..=nanos)),
            Jitter::Half => {
                let half = nanos / 2;
                Duration::from_nanos(half + rng.gen_range(0..=nanos - half))
            }
            Jitter::None => delay,
        })
    }
}

impl<T: Backoff + ?Sized> Backoff for std::sync::Arc<T> {
    fn next(&self, attempt: u32) -> Option<Duration> {
        (**self).next(attempt)
    }
}
