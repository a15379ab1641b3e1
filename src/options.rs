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

use std::sync::Arc;

#[cfg(feature = "dkim")]
use crate::dkim::DkimConfig;
use crate::{Backoff, ConnPool, Hooks, SmtpConnection, TokenBucket};

/// Per-send settings. Built fresh for every call; the pool, rate limiter
/// and hooks are shared handles.
#[derive(Clone, Default)]
pub struct SendConfig {
    pub list_unsubscribe: Option<String>,
    pub backoff: Option<Arc<dyn Backoff>>,
    pub rate_limit: Option<Arc<TokenBucket>>,
    pub pool: Option<Arc<ConnPool<SmtpConnection>>>,
    pub hooks: Option<Arc<Hooks>>,
    #[cfg(feature = "dkim")]
    pub dkim: Option<DkimConfig>,
}

impl SendConfig {
    pub fn new() -> Self {
        SendConfig::default()
    }

    /// Sets the `List-Unsubscribe` header value.
    pub fn with_list_unsubscribe(mut self, value: impl Into<String>) -> Self {
        self.list_unsubscribe = Some(value.into());
        self
    }

    /// Retries transient failures following `backoff`.
    pub fn with_retry(mut self, backoff: impl Backoff + 'static) -> Self {
        self.backoff = Some(Arc::new(backoff));
        self
    }

    /// Waits for a token from `bucket` before sending.
    pub fn with_rate_limit(mut self, bucket: Arc<TokenBucket>) -> Self {
        self.rate_limit = Some(bucket);
        self
    }

    /// Reuses connections from `pool`.
    pub fn with_pool(mut self, pool: Arc<ConnPool<SmtpConnection>>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<Hooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Signs the message with DKIM.
    #[cfg(feature = "dkim")]
    pub fn with_dkim(mut self, dkim: DkimConfig) -> Self {
        self.dkim = Some(dkim);
        self
    }
}

impl std::fmt::Debug for SendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("SendConfig");
        debug
            .field("list_unsubscribe", &self.list_unsubscribe)
            .field("backoff", &self.backoff.is_some())
            .field("rate_limit", &self.rate_limit)
            .field("pool", &self.pool.is_some())
            .field("hooks", &self.hooks);
        #[cfg(feature = "dkim")]
        debug.field("dkim", &self.dkim);
        debug.finish()
    }
}
