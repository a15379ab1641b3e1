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

use std::{
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use tokio::time::Instant;

/// Continuously refilled token bucket, safe to share between tasks.
#[derive(Debug)]
pub struct TokenBucket {
    rate: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last: Instant,
}

impl TokenBucket {
    /// Creates a bucket refilled at `rate` tokens per second holding at
    /// most `burst` tokens. It starts full. Non-positive values fall back
    /// to one.
    pub fn new(rate: f64, burst: u32) -> Self {
        let rate = if rate > 0.0 && rate.is_finite() {
            rate
        } else {
            1.0
        };
        let burst = f64::from(burst.max(1));
        TokenBucket {
            rate,
            burst,
            state: Mutex::new(BucketState {
                tokens: burst,
                last: Instant::now(),
            }),
        }
    }

    /// Waits until a token is available and takes it.
    pub async fn wait(&self) {
        loop {
            let deficit = match self.take() {
                Ok(()) => return,
                Err(deficit) => deficit,
            };
            tokio::time::sleep(deficit.max(Duration::from_millis(1))).await;
        }
    }

    /// Takes a token without waiting.
    pub fn try_acquire(&self) -> bool {
        self.take().is_ok()
    }

    /// Refills the bucket and takes one token, or returns how long until
    /// one is available.
    fn take(&self) -> Result<(), Duration> {
        let mut state = self.lock();
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last).as_secs_f64();
        state.last = now;
        state.tokens = (state.tokens + elapsed * self.rate).min(self.burst);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - state.tokens) / self.rate))
        }
    }

    fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }
}
