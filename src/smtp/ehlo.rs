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

use smtp_proto::{
    response::parser::{ResponseReceiver, MAX_RESPONSE_LENGTH as MAX_REPONSE_LENGTH},
    EhloResponse,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Error, SmtpClient};

impl<T: AsyncRead + AsyncWrite + Unpin> SmtpClient<T> {
    /// Sends EHLO and replaces the stored capabilities with the ones the
    /// server advertises.
    pub async fn ehlo(&mut self, hostname: &str) -> crate::Result<()> {
        self.capabilities = tokio::time::timeout(self.timeout, async {
            self.stream
                .write_all(format!("EHLO {hostname}\r\n").as_bytes())
                .await?;
            self.stream.flush().await?;
            self.read_ehlo().await
        })
        .await
        .map_err(|_| Error::Timeout)??;
        Ok(())
    }

    /// Reads a multi-line EHLO reply. A non-250 reply is returned as
    /// [`Error::UnexpectedReply`].
    pub async fn read_ehlo(&mut self) -> crate::Result<EhloResponse<String>> {
        let mut buf = vec![0u8; 1024];
        let mut pending = Vec::new();

        loop {
            let br = self.stream.read(&mut buf).await?;
            if br == 0 || pending.len() + br >= MAX_REPONSE_LENGTH {
                return Err(Error::UnparseableReply);
            }
            pending.extend_from_slice(&buf[..br]);

            // Partial replies are parsed again from the start once more
            // bytes arrive.
            let mut iter = pending.iter();
            match EhloResponse::parse(&mut iter) {
                Ok(reply) => return Ok(reply),
                Err(smtp_proto::Error::NeedsMoreData { .. }) => (),
                Err(smtp_proto::Error::InvalidResponse { code }) => {
                    match ResponseReceiver::from_code(code).parse(&mut iter) {
                        Ok(reply) => return Err(Error::UnexpectedReply(reply)),
                        Err(smtp_proto::Error::NeedsMoreData { .. }) => (),
                        Err(_) => return Err(Error::UnparseableReply),
                    }
                }
                Err(_) => return Err(Error::UnparseableReply),
            }
        }
    }
}
