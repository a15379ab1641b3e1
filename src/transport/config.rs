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

use std::{fmt::Debug, time::Duration};

use crate::SmtpClientBuilder;

/// SMTP server settings.
#[derive(Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// EHLO name. Defaults to the local hostname.
    pub local_name: Option<String>,
    /// Applied to each attempt when the context carries no deadline.
    pub timeout: Duration,
    pub start_tls: bool,
    pub implicit_tls: bool,
    pub allow_invalid_certs: bool,
    /// Idle connections kept by the mailer's pool. Zero disables pooling.
    pub pool_max_idle: usize,
    pub pool_idle_ttl: Duration,
}

impl SmtpConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        SmtpConfig {
            host: host.into(),
            port,
            username: String::new(),
            password: String::new(),
            local_name: None,
            timeout: Duration::from_secs(30),
            start_tls: false,
            implicit_tls: false,
            allow_invalid_certs: false,
            pool_max_idle: 0,
            pool_idle_ttl: Duration::ZERO,
        }
    }

    /// Authenticates with these credentials when the server offers AUTH.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn start_tls(mut self, start_tls: bool) -> Self {
        self.start_tls = start_tls;
        self
    }

    pub fn implicit_tls(mut self, implicit_tls: bool) -> Self {
        self.implicit_tls = implicit_tls;
        self
    }

    pub fn allow_invalid_certs(mut self) -> Self {
        self.allow_invalid_certs = true;
        self
    }

    pub fn helo_host(mut self, local_name: impl Into<String>) -> Self {
        self.local_name = Some(local_name.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Keeps up to `max_idle` connections open for `idle_ttl` between
    /// sends. A zero TTL selects the pool default.
    pub fn pool(mut self, max_idle: usize, idle_ttl: Duration) -> Self {
        self.pool_max_idle = max_idle;
        self.pool_idle_ttl = idle_ttl;
        self
    }

    pub fn to_builder(&self) -> SmtpClientBuilder {
        let mut builder = SmtpClientBuilder::new(self.host.clone(), self.port)
            .implicit_tls(self.implicit_tls)
            .start_tls(self.start_tls);
        if !self.timeout.is_zero() {
            builder = builder.timeout(self.timeout);
        }
        if self.allow_invalid_certs {
            builder = builder.allow_invalid_certs();
        }
        if !self.username.is_empty() && !self.password.is_empty() {
            builder = builder.credentials((self.username.as_str(), self.password.as_str()));
        }
        if let Some(local_name) = self.local_name.as_deref().filter(|name| !name.is_empty()) {
            builder = builder.helo_host(local_name);
        }
        builder
    }
}

impl Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("local_name", &self.local_name)
            .field("timeout", &self.timeout)
            .field("start_tls", &self.start_tls)
            .field("implicit_tls", &self.implicit_tls)
            .field("allow_invalid_certs", &self.allow_invalid_certs)
            .field("pool_max_idle", &self.pool_max_idle)
            .field("pool_idle_ttl", &self.pool_idle_ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::SmtpConfig;

    #[test]
    fn smtp_config_builder() {
        let config = SmtpConfig::new("smtp.example.com", 587)
            .credentials("john", "p4ssw0rd")
            .start_tls(true)
            .helo_host("client.example.com")
            .timeout(Duration::from_secs(10));
        assert!(!format!("{config:?}").contains("p4ssw0rd"));

        let builder = config.to_builder();
        assert_eq!(builder.addr, "smtp.example.com:587");
        assert_eq!(builder.tls_hostname, "smtp.example.com");
        assert_eq!(builder.local_host, "client.example.com");
        assert_eq!(builder.timeout, Duration::from_secs(10));
        assert!(builder.start_tls && !builder.tls_implicit);
        assert_eq!(builder.credentials.as_ref().unwrap().username(), "john");

        // Incomplete credentials are ignored.
        let builder = SmtpConfig::new("smtp.example.com", 465)
            .implicit_tls(true)
            .credentials("john", "")
            .to_builder();
        assert!(builder.credentials.is_none());
        assert!(builder.tls_implicit);
    }
}
