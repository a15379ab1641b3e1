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

use std::fmt::{Debug, Display};

use base64::{engine::general_purpose::STANDARD, Engine};
use smtp_proto::{AUTH_LOGIN, AUTH_PLAIN};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::SmtpClient;

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    secret: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    InvalidChallenge,
}

/// Authentication mechanisms in order of preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    /// Challenge-Response Authentication Mechanism (CRAM)
    #[cfg(feature = "cram-md5")]
    CramMD5,

    /// Login
    Login,

    /// Plain
    Plain,
}

impl Mechanism {
    fn preference() -> impl Iterator<Item = Mechanism> {
        #[cfg(feature = "cram-md5")]
        let strongest = Some(Mechanism::CramMD5);
        #[cfg(not(feature = "cram-md5"))]
        let strongest = None;

        strongest
            .into_iter()
            .chain([Mechanism::Login, Mechanism::Plain])
    }

    fn flag(&self) -> u64 {
        match self {
            #[cfg(feature = "cram-md5")]
            Mechanism::CramMD5 => smtp_proto::AUTH_CRAM_MD5,
            Mechanism::Login => AUTH_LOGIN,
            Mechanism::Plain => AUTH_PLAIN,
        }
    }
}

impl Display for Mechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "cram-md5")]
            Mechanism::CramMD5 => write!(f, "CRAM-MD5"),
            Mechanism::Login => write!(f, "LOGIN"),
            Mechanism::Plain => write!(f, "PLAIN"),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidChallenge => write!(f, "Invalid challenge received"),
        }
    }
}

impl From<Error> for crate::Error {
    fn from(err: Error) -> Self {
        crate::Error::Auth(err)
    }
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl<T: Into<String>, U: Into<String>> From<(T, U)> for Credentials {
    fn from((username, secret): (T, U)) -> Self {
        Credentials::new(username, secret)
    }
}

impl Credentials {
    /// Creates a new `Credentials` instance.
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Credentials {
        Credentials {
            username: username.into(),
            secret: secret.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Encodes the client response to a (possibly empty) base64 challenge.
    pub(crate) fn encode(&self, mechanism: Mechanism, challenge: &str) -> crate::Result<String> {
        let response = match mechanism {
            Mechanism::Plain => format!("\u{0}{}\u{0}{}", self.username, self.secret),
            Mechanism::Login => {
                let challenge = STANDARD.decode(challenge.trim())?;
                let prompt = String::from_utf8_lossy(&challenge).to_ascii_lowercase();
                // Servers disagree on the exact wording of the prompts.
                if prompt.starts_with("user name") || prompt.starts_with("username") {
                    self.username.clone()
                } else if prompt.starts_with("password") {
                    self.secret.clone()
                } else {
                    return Err(Error::InvalidChallenge.into());
                }
            }
            #[cfg(feature = "cram-md5")]
            Mechanism::CramMD5 => {
                let mut secret_opad: Vec<u8> = vec![0x5c; 64];
                let mut secret_ipad: Vec<u8> = vec![0x36; 64];

                let key = if self.secret.len() <= 64 {
                    self.secret.as_bytes().to_vec()
                } else {
                    md5::compute(self.secret.as_bytes()).to_vec()
                };
                for (pos, byte) in key.iter().enumerate() {
                    secret_opad[pos] = *byte ^ 0x5c;
                    secret_ipad[pos] = *byte ^ 0x36;
                }

                secret_ipad.extend_from_slice(&STANDARD.decode(challenge.trim())?);
                secret_opad.extend_from_slice(&md5::compute(&secret_ipad).0);

                format!("{} {:x}", self.username, md5::compute(&secret_opad))
            }
        };

        Ok(STANDARD.encode(response.as_bytes()))
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> SmtpClient<T> {
    /// Authenticates with the strongest mechanism both sides support.
    /// A `535` reply stops the negotiation, any other rejection moves
    /// on to the next mechanism.
    pub async fn authenticate(&mut self, credentials: &Credentials) -> crate::Result<()> {
        let advertised = self.capabilities.auth_mechanisms;
        let mut last_reply = None;

        for mechanism in Mechanism::preference().filter(|m| (advertised & m.flag()) != 0) {
            log::debug!("Authenticating as {} using {mechanism}", credentials.username);
            match self.auth(mechanism, credentials).await {
                Ok(_) => return Ok(()),
                Err(crate::Error::UnexpectedReply(reply)) => {
                    let is_final = reply.code == 535;
                    last_reply = Some(reply);
                    if is_final {
                        break;
                    }
                }
                Err(err) => return Err(err),
            }
        }

        match last_reply {
            Some(reply) => Err(crate::Error::AuthenticationFailed(reply)),
            None => Err(crate::Error::UnsupportedAuthMechanism),
        }
    }

    async fn auth(&mut self, mechanism: Mechanism, credentials: &Credentials) -> crate::Result<()> {
        let mut reply = if mechanism == Mechanism::Plain {
            self.cmd(format!("AUTH PLAIN {}\r\n", credentials.encode(mechanism, "")?).as_bytes())
                .await?
        } else {
            self.cmd(format!("AUTH {mechanism}\r\n").as_bytes()).await?
        };

        for _ in 0..3 {
            match reply.code {
                334 => {
                    reply = self
                        .cmd(format!("{}\r\n", credentials.encode(mechanism, &reply.message)?).as_bytes())
                        .await?;
                }
                235 => return Ok(()),
                _ => return Err(crate::Error::UnexpectedReply(reply)),
            }
        }

        Err(crate::Error::UnexpectedReply(reply))
    }
}
