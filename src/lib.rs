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

//! # mail-dispatch
//!
//! _mail-dispatch_ is a Rust library to build, sign and deliver e-mail messages over SMTP
//! with resilience controls. It includes the following features:
//!
//! - Generates **e-mail** messages conforming to the Internet Message Format standard (_RFC 5322_).
//! - **MIME** multipart bodies (_RFC 2045 - 2046_) with quoted-printable text parts and base64 attachments,
//!   including inline resources referenced by `Content-ID`.
//! - DomainKeys Identified Mail (**DKIM**) Signatures (_RFC 6376_) using relaxed/relaxed canonicalization
//!   and RSA-SHA256.
//! - Simple Mail Transfer Protocol (**SMTP**; _RFC 5321_) delivery over implicit TLS or **STARTTLS** (_RFC 3207_),
//!   with authentication (_RFC 4954_).
//! - Connection pooling with idle expiry and `NOOP` health probes.
//! - Exponential backoff with full or half jitter, retrying only transient failures.
//! - Token bucket rate limiting.
//! - Full async (requires Tokio).
//!
//! ## Usage Example
//!
//! Send a message through a relay, retrying transient failures and throttling to 5 messages per second:
//!
//! ```rust
//!     let mailer = Mailer::new(
//!         SmtpConfig::new("smtp.example.com", 587)
//!             .credentials("john", "p4ssw0rd")
//!             .start_tls(true),
//!     );
//!     let limiter = Arc::new(TokenBucket::new(5.0, 10));
//!
//!     let message = Message::new(Address::new("john@example.com").name("John Doe"))
//!         .to(Address::new("jane@example.com"))
//!         .subject("Hi!")
//!         .html_body("<h1>Hello, world!</h1>")
//!         .text_body("Hello world!");
//!
//!     mailer
//!         .send(
//!             &Context::new(),
//!             message,
//!             SendConfig::new()
//!                 .with_retry(ExponentialBackoff::new(4, Duration::from_millis(500), Duration::from_secs(5), Jitter::Full))
//!                 .with_rate_limit(limiter),
//!         )
//!         .await
//!         .unwrap();
//! ```
//!
//! ## Testing
//!
//! To run the testsuite:
//!
//! ```bash
//!  $ cargo test --all-features
//! ```
//!
//! ## License
//!
//! Licensed under either of
//!
//!  * Apache License, Version 2.0 ([LICENSE-APACHE](LICENSE-APACHE) or <http://www.apache.org/licenses/LICENSE-2.0>)
//!  * MIT license ([LICENSE-MIT](LICENSE-MIT) or <http://opensource.org/licenses/MIT>)
//!
//! at your option.
//!

pub mod backoff;
pub mod context;
#[cfg(feature = "dkim")]
pub mod dkim;
pub mod hooks;
pub mod message;
pub mod mime;
pub mod options;
pub mod pool;
pub mod ratelimit;
pub mod smtp;
pub mod template;
pub mod transport;

use std::{fmt::Display, time::Duration};

use smtp_proto::{EhloResponse, Response};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector;

pub use backoff::{Backoff, ExponentialBackoff, Jitter};
pub use context::Context;
pub use hooks::Hooks;
pub use message::{address::Address, headers::Headers, Attachment, Message};
pub use options::SendConfig;
pub use pool::ConnPool;
pub use ratelimit::TokenBucket;
pub use smtp::auth::Credentials;
pub use transport::{config::SmtpConfig, Mailer, SmtpConnection};

#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// TLS error
    Tls(Box<rustls::Error>),

    /// Base64 decode error
    Base64(base64::DecodeError),

    /// SMTP authentication error.
    Auth(smtp::auth::Error),

    /// DKIM signing error
    #[cfg(feature = "dkim")]
    Dkim(dkim::Error),

    /// Failure parsing SMTP reply
    UnparseableReply,

    /// Unexpected SMTP reply.
    UnexpectedReply(Response<String>),

    /// SMTP authentication failure.
    AuthenticationFailed(Response<String>),

    /// Invalid TLS name provided.
    InvalidTLSName,

    /// Missing message sender.
    MissingMailFrom,

    /// Missing message recipients.
    MissingRcptTo,

    /// Message has no text body, HTML body or attachment.
    MissingBody,

    /// The address could not be parsed.
    InvalidAddress(String),

    /// Template rendering failed.
    Template(String),

    /// The server does no support any of the available authentication methods.
    UnsupportedAuthMechanism,

    /// Connection timeout.
    Timeout,

    /// A protocol step failed.
    Command {
        stage: smtp::Stage,
        source: Box<Error>,
    },

    /// The retry policy ran out of attempts.
    Exhausted {
        attempts: u32,
        last: Option<Box<Error>>,
    },

    /// The ambient context was cancelled.
    Cancelled,

    /// The ambient context deadline expired.
    DeadlineExceeded,
}

pub type Result<T> = std::result::Result<T, Error>;

/// SMTP client session.
pub struct SmtpClient<T: AsyncRead + AsyncWrite> {
    pub stream: T,
    pub timeout: Duration,
    pub capabilities: EhloResponse<String>,
}

/// Dials and prepares SMTP sessions.
#[derive(Clone)]
pub struct SmtpClientBuilder {
    pub addr: String,
    pub timeout: Duration,
    pub tls_connector: TlsConnector,
    pub tls_hostname: String,
    pub tls_implicit: bool,
    pub start_tls: bool,
    pub credentials: Option<Credentials>,
    pub local_host: String,
}

impl Error {
    /// Returns the innermost error, looking through stage context.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Command { source, .. } => source.root_cause(),
            Error::Exhausted {
                last: Some(last), ..
            } => last.root_cause(),
            _ => self,
        }
    }

    /// Whether a retry of the same send is likely to succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Command { source, .. } => source.is_transient(),
            Error::DeadlineExceeded | Error::Timeout => true,
            Error::UnexpectedReply(reply) | Error::AuthenticationFailed(reply) => {
                (400..=499).contains(&reply.code)
            }
            Error::Io(err) => match err.kind() {
                std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::UnexpectedEof
                | std::io::ErrorKind::Interrupted => true,
                _ => is_transient_message(&err.to_string()),
            },
            _ => false,
        }
    }

    pub(crate) fn at(stage: smtp::Stage) -> impl FnOnce(Error) -> Error {
        move |err| match err {
            Error::Cancelled | Error::DeadlineExceeded => err,
            err => Error::Command {
                stage,
                source: Box::new(err),
            },
        }
    }
}

/// Substring heuristics over human readable error text, kept for errors
/// that carry no reply code or I/O kind.
pub fn is_transient_message(message: &str) -> bool {
    if message.contains(" 4") || message.contains("4xx") {
        return true;
    }
    let message = message.to_ascii_lowercase();
    [
        "timeout",
        "temporarily",
        "try again",
        "connection reset",
        "broken pipe",
    ]
    .iter()
    .any(|needle| message.contains(needle))
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Tls(err) => Some(err.as_ref()),
            Error::Base64(err) => Some(err),
            Error::Command { source, .. } => Some(source.as_ref()),
            Error::Exhausted {
                last: Some(last), ..
            } => Some(last.as_ref()),
            _ => None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Tls(e) => write!(f, "TLS error: {e}"),
            Error::Base64(e) => write!(f, "Base64 decode error: {e}"),
            Error::Auth(e) => write!(f, "SMTP authentication error: {e}"),
            #[cfg(feature = "dkim")]
            Error::Dkim(e) => write!(f, "DKIM signing error: {e}"),
            Error::UnparseableReply => write!(f, "Unparseable SMTP reply"),
            Error::UnexpectedReply(e) => write!(f, "Unexpected reply: {} {}", e.code, e.message),
            Error::AuthenticationFailed(e) => {
                write!(f, "Authentication failed: {} {}", e.code, e.message)
            }
            Error::InvalidTLSName => write!(f, "Invalid TLS name provided"),
            Error::MissingMailFrom => write!(f, "Missing message sender"),
            Error::MissingRcptTo => write!(f, "Missing message recipients"),
            Error::MissingBody => write!(f, "Missing message body or attachments"),
            Error::InvalidAddress(e) => write!(f, "Invalid address: {e}"),
            Error::Template(e) => write!(f, "Template error: {e}"),
            Error::UnsupportedAuthMechanism => write!(
                f,
                "The server does no support any of the available authentication methods"
            ),
            Error::Timeout => write!(f, "Connection timeout"),
            Error::Command { stage, source } => write!(f, "smtp {stage}: {source}"),
            Error::Exhausted {
                attempts,
                last: Some(last),
            } => write!(f, "send attempts exhausted after {attempts} tries: {last}"),
            Error::Exhausted { attempts, .. } => {
                write!(f, "send attempts exhausted after {attempts} tries")
            }
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::DeadlineExceeded => write!(f, "Deadline exceeded"),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Error::Base64(err)
    }
}
