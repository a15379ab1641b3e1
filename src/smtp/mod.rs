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

use smtp_proto::Response;

pub mod auth;
pub mod builder;
pub mod client;
pub mod ehlo;
pub mod envelope;
pub mod stream;
pub mod tls;

/// Protocol step an error was raised from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Connect,
    Greeting,
    Ehlo,
    StartTls,
    Auth,
    Reset,
    MailFrom,
    RcptTo,
    Data,
    Quit,
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Stage::Connect => "dial",
            Stage::Greeting => "greeting",
            Stage::Ehlo => "EHLO",
            Stage::StartTls => "STARTTLS",
            Stage::Auth => "auth",
            Stage::Reset => "RSET",
            Stage::MailFrom => "MAIL FROM",
            Stage::RcptTo => "RCPT TO",
            Stage::Data => "DATA",
            Stage::Quit => "QUIT",
        })
    }
}

pub trait AssertReply: Sized {
    fn is_positive_completion(&self) -> bool;
    fn assert_positive_completion(self) -> crate::Result<()>;
    fn assert_code(self, code: u16) -> crate::Result<()>;
}

impl AssertReply for Response<String> {
    /// Returns `true` if the reply is a positive completion.
    #[inline(always)]
    fn is_positive_completion(&self) -> bool {
        (200..=299).contains(&self.code)
    }

    /// Returns Ok if the reply has the specified severity.
    #[inline(always)]
    fn assert_positive_completion(self) -> crate::Result<()> {
        if (200..=299).contains(&self.code) {
            Ok(())
        } else {
            Err(crate::Error::UnexpectedReply(self))
        }
    }

    /// Returns Ok if the reply returned the expected code.
    #[inline(always)]
    fn assert_code(self, code: u16) -> crate::Result<()> {
        if self.code == code {
            Ok(())
        } else {
            Err(crate::Error::UnexpectedReply(self))
        }
    }
}
