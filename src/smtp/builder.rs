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

use smtp_proto::{EhloResponse, EXT_AUTH, EXT_START_TLS};
use tokio::net::TcpStream;

use crate::{Credentials, Error, SmtpClient, SmtpClientBuilder};

use super::{stream::MailStream, tls::build_tls_connector, AssertReply, Stage};

impl SmtpClientBuilder {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        let hostname = hostname.into();
        SmtpClientBuilder {
            addr: format!("{hostname}:{port}"),
            timeout: Duration::from_secs(60 * 60),
            tls_connector: build_tls_connector(false),
            tls_hostname: hostname,
            tls_implicit: false,
            start_tls: false,
            credentials: None,
            local_host: gethostname::gethostname()
                .to_str()
                .unwrap_or("[127.0.0.1]")
                .to_string(),
        }
    }

    /// Allow invalid TLS certificates
    pub fn allow_invalid_certs(mut self) -> Self {
        self.tls_connector = build_tls_connector(true);
        self
    }

    /// Start the connection in TLS
    pub fn implicit_tls(mut self, tls_implicit: bool) -> Self {
        self.tls_implicit = tls_implicit;
        self
    }

    /// Upgrade with STARTTLS when the server offers it
    pub fn start_tls(mut self, start_tls: bool) -> Self {
        self.start_tls = start_tls;
        self
    }

    /// Authenticate when the server advertises AUTH
    pub fn credentials(mut self, credentials: impl Into<Credentials>) -> Self {
        self.credentials = Some(credentials.into());
        self
    }

    /// Set the EHLO hostname
    pub fn helo_host(mut self, host: impl Into<String>) -> Self {
        self.local_host = host.into();
        self
    }

    /// Sets the SMTP connection timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Dials the server and runs the session up to the point where it
    /// is ready to accept an envelope.
    pub async fn connect(&self) -> crate::Result<SmtpClient<MailStream>> {
        tokio::time::timeout(self.timeout, async {
            let client = SmtpClient {
                stream: TcpStream::connect(&self.addr)
                    .await
                    .map_err(|err| Error::at(Stage::Connect)(err.into()))?,
                timeout: self.timeout,
                capabilities: EhloResponse::default(),
            };

            let mut client = if self.tls_implicit {
                let mut client = client
                    .into_tls(&self.tls_connector, &self.tls_hostname)
                    .await
                    .map_err(Error::at(Stage::Connect))?;
                client.greeting().await?;
                client
                    .ehlo(&self.local_host)
                    .await
                    .map_err(Error::at(Stage::Ehlo))?;
                client
            } else {
                let mut client = client;
                client.greeting().await?;
                client
                    .ehlo(&self.local_host)
                    .await
                    .map_err(Error::at(Stage::Ehlo))?;

                if self.start_tls && client.capabilities.has_capability(EXT_START_TLS) {
                    log::debug!("Upgrading connection to {} with STARTTLS", self.addr);
                    let mut client = client
                        .start_tls(&self.tls_connector, &self.tls_hostname)
                        .await
                        .map_err(Error::at(Stage::StartTls))?;
                    client
                        .ehlo(&self.local_host)
                        .await
                        .map_err(Error::at(Stage::Ehlo))?;
                    client
                } else {
                    SmtpClient {
                        stream: MailStream::Basic(client.stream),
                        timeout: client.timeout,
                        capabilities: client.capabilities,
                    }
                }
            };

            if let Some(credentials) = &self.credentials {
                if client.capabilities.has_capability(EXT_AUTH) {
                    client
                        .authenticate(credentials)
                        .await
                        .map_err(Error::at(Stage::Auth))?;
                }
            }

            Ok(client)
        })
        .await
        .map_err(|_| crate::Error::Timeout)?
    }
}

impl<T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin> SmtpClient<T> {
    async fn greeting(&mut self) -> crate::Result<()> {
        self.read()
            .await
            .and_then(|reply| reply.assert_positive_completion())
            .map_err(Error::at(Stage::Greeting))
    }
}
