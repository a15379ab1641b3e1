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

use tokio::io::{AsyncRead, AsyncWrite};

use crate::{message::address::is_valid_mailbox, Error, SmtpClient};

use super::{AssertReply, Stage};

impl<T: AsyncRead + AsyncWrite + Unpin> SmtpClient<T> {
    /// Sends a MAIL FROM command to the server.
    pub async fn mail_from(&mut self, addr: &str) -> crate::Result<()> {
        self.cmd(format!("MAIL FROM:<{}>\r\n", command_mailbox(addr)?).as_bytes())
            .await?
            .assert_positive_completion()
    }

    /// Sends a RCPT TO command to the server.
    pub async fn rcpt_to(&mut self, addr: &str) -> crate::Result<()> {
        self.cmd(format!("RCPT TO:<{}>\r\n", command_mailbox(addr)?).as_bytes())
            .await?
            .assert_positive_completion()
    }

    /// Sends a DATA command to the server.
    pub async fn data(&mut self, message: impl AsRef<[u8]>) -> crate::Result<()> {
        self.cmd(b"DATA\r\n").await?.assert_code(354)?;
        tokio::time::timeout(self.timeout, async {
            // Write message
            self.write_message(message.as_ref()).await?;
            self.read().await
        })
        .await
        .map_err(|_| crate::Error::Timeout)??
        .assert_positive_completion()
    }

    /// Runs a complete envelope: one MAIL FROM, one RCPT TO per recipient
    /// and the DATA transfer. Any rejection aborts the transaction.
    pub async fn send_envelope<'x>(
        &mut self,
        mail_from: &str,
        rcpt_to: impl IntoIterator<Item = &'x str>,
        message: &[u8],
    ) -> crate::Result<()> {
        self.mail_from(mail_from)
            .await
            .map_err(crate::Error::at(Stage::MailFrom))?;
        for rcpt in rcpt_to {
            log::trace!("RCPT TO:<{rcpt}>");
            self.rcpt_to(rcpt)
                .await
                .map_err(crate::Error::at(Stage::RcptTo))?;
        }
        self.data(message).await.map_err(crate::Error::at(Stage::Data))
    }

    /// Sends a NOOP command to the server.
    pub async fn noop(&mut self) -> crate::Result<()> {
        self.cmd(b"NOOP\r\n").await?.assert_positive_completion()
    }

    /// Sends a RSET command to the server.
    pub async fn rset(&mut self) -> crate::Result<()> {
        self.cmd(b"RSET\r\n").await?.assert_positive_completion()
    }

    /// Sends a QUIT command to the server.
    pub async fn quit(mut self) -> crate::Result<()> {
        self.cmd(b"QUIT\r\n").await?.assert_positive_completion()
    }
}

fn command_mailbox(addr: &str) -> crate::Result<&str> {
    if is_valid_mailbox(addr) {
        Ok(addr)
    } else {
        Err(Error::InvalidAddress(addr.escape_debug().to_string()))
    }
}
