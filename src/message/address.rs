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

use crate::mime::encode::encoded_word;

/// Whether `mailbox` can be written between the angle brackets of a
/// `MAIL FROM` or `RCPT TO` command.
pub fn is_valid_mailbox(mailbox: &str) -> bool {
    !mailbox
        .chars()
        .any(|ch| ch.is_control() || matches!(ch, '<' | '>'))
}

/// A mailbox with an optional display name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Address {
    pub name: Option<String>,
    pub email: String,
}

impl Address {
    pub fn new(email: impl Into<String>) -> Self {
        Address {
            name: None,
            email: email.into(),
        }
    }

    /// Sets the display name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.name = if name.trim().is_empty() {
            None
        } else {
            Some(name)
        };
        self
    }

    pub fn is_empty(&self) -> bool {
        self.email.trim().is_empty()
    }

    /// Rejects addresses that would break out of an SMTP command line or
    /// a header field.
    pub fn check(&self) -> crate::Result<()> {
        let name_ok = self
            .name
            .as_deref()
            .map_or(true, |name| !name.contains(['\r', '\n']));
        if name_ok && is_valid_mailbox(self.email.trim()) {
            Ok(())
        } else {
            Err(crate::Error::InvalidAddress(self.email.escape_debug().to_string()))
        }
    }

    /// Parses a single address such as `Ada Lovelace <ada@example.com>`.
    #[cfg(feature = "parser")]
    pub fn parse(input: &str) -> crate::Result<Address> {
        let mut addresses = parse_addresses(input)?;
        if addresses.len() == 1 {
            Ok(addresses.remove(0))
        } else {
            Err(crate::Error::InvalidAddress(input.to_string()))
        }
    }

    /// Parses address strings, each of which may hold a comma separated
    /// list. Group syntax is flattened.
    #[cfg(feature = "parser")]
    pub fn parse_list<'x>(inputs: impl IntoIterator<Item = &'x str>) -> crate::Result<Vec<Address>> {
        let mut addresses = Vec::new();
        for input in inputs {
            if !input.trim().is_empty() {
                addresses.extend(parse_addresses(input)?);
            }
        }
        Ok(addresses)
    }
}

#[cfg(feature = "parser")]
fn parse_addresses(input: &str) -> crate::Result<Vec<Address>> {
    use mail_parser::{Addr, MessageParser};

    let invalid = || crate::Error::InvalidAddress(input.to_string());
    if input.contains(['\r', '\n']) {
        return Err(invalid());
    }

    let raw = format!("To: {input}\r\n\r\n");
    let message = MessageParser::default()
        .parse(raw.as_bytes())
        .ok_or_else(invalid)?;
    let to_address = |addr: &Addr<'_>| {
        let email = addr.address.as_deref().map(str::trim).unwrap_or_default();
        let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
        if local.is_empty() || domain.is_empty() || email.contains(char::is_whitespace) {
            return Err(invalid());
        }
        Ok(Address::new(email).name(addr.name.as_deref().unwrap_or_default()))
    };

    match message.to().ok_or_else(invalid)? {
        mail_parser::Address::List(list) => list.iter().map(to_address).collect(),
        mail_parser::Address::Group(groups) => groups
            .iter()
            .flat_map(|group| group.addresses.iter())
            .map(to_address)
            .collect(),
    }
}

impl Display for Address {
    /// Bare mailbox without a name, `"Name" <mailbox>` for ASCII names and
    /// an encoded word for anything else.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) if name.is_ascii() => {
                f.write_str("\"")?;
                for ch in name.chars() {
                    if ch == '"' || ch == '\\' {
                        f.write_str("\\")?;
                    }
                    write!(f, "{ch}")?;
                }
                write!(f, "\" <{}>", self.email)
            }
            Some(name) => write!(f, "{} <{}>", encoded_word(name), self.email),
            None => f.write_str(&self.email),
        }
    }
}

impl From<&str> for Address {
    fn from(email: &str) -> Self {
        Address::new(email)
    }
}

impl From<String> for Address {
    fn from(email: String) -> Self {
        Address::new(email)
    }
}

impl<N: Into<String>, E: Into<String>> From<(N, E)> for Address {
    fn from((name, email): (N, E)) -> Self {
        Address::new(email).name(name)
    }
}
