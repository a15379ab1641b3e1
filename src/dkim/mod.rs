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

use std::fmt::Display;

pub mod canonicalize;
pub mod signature;

/// Headers signed when no explicit list is configured.
pub const DEFAULT_HEADERS: [&str; 7] = [
    "from",
    "to",
    "subject",
    "date",
    "mime-version",
    "content-type",
    "message-id",
];

#[derive(Debug)]
pub enum Error {
    MissingParameters,
    NoPemBlock,
    UnsupportedKeyType(String),
    Pkcs1(rsa::pkcs1::Error),
    Pkcs8(rsa::pkcs8::Error),
    RSA(rsa::errors::Error),
}

/// DKIM signing parameters: signing domain, selector, PEM encoded RSA
/// private key (PKCS#1 or PKCS#8) and the ordered list of headers to sign.
#[derive(Clone, Default)]
pub struct DkimConfig {
    pub domain: String,
    pub selector: String,
    pub private_key: String,
    pub headers: Vec<String>,
}

pub struct Signature {
    d: String,
    s: String,
    b: String,
    bh: String,
    h: Vec<String>,
    t: u64,
}

impl DkimConfig {
    pub fn new(
        domain: impl Into<String>,
        selector: impl Into<String>,
        private_key: impl Into<String>,
    ) -> Self {
        DkimConfig {
            domain: domain.into(),
            selector: selector.into(),
            private_key: private_key.into(),
            headers: Vec::new(),
        }
    }

    /// Sets the headers to sign, in signing order.
    pub fn headers<T: Into<String>>(mut self, headers: impl IntoIterator<Item = T>) -> Self {
        self.headers = headers.into_iter().map(Into::into).collect();
        self
    }
}

impl std::fmt::Debug for DkimConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DkimConfig")
            .field("domain", &self.domain)
            .field("selector", &self.selector)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl From<Error> for crate::Error {
    fn from(err: Error) -> Self {
        crate::Error::Dkim(err)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::MissingParameters => write!(f, "Incomplete DKIM configuration"),
            Error::NoPemBlock => write!(f, "No PEM block found"),
            Error::UnsupportedKeyType(label) => write!(f, "Unsupported key type: {label}"),
            Error::Pkcs1(err) => write!(f, "PKCS#1 error: {err}"),
            Error::Pkcs8(err) => write!(f, "PKCS#8 error: {err}"),
            Error::RSA(err) => write!(f, "RSA error: {err}"),
        }
    }
}
