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

use smtp_proto::{response::parser::ResponseReceiver, Response};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Error, SmtpClient};

impl<T: AsyncRead + AsyncWrite + Unpin> SmtpClient<T> {
    /// Reads one (possibly multi-line) reply.
    pub(crate) async fn read(&mut self) -> crate::Result<Response<String>> {
        let mut buf = vec![0u8; 1024];
        let mut parser = ResponseReceiver::default();

        loop {
            let br = self.stream.read(&mut buf).await?;
            if br == 0 {
                return Err(Error::UnparseableReply);
            }

            match parser.parse(&mut buf[..br].iter()) {
                Ok(reply) => return Ok(reply),
                Err(smtp_proto::Error::NeedsMoreData { .. }) => (),
                Err(_) => return Err(Error::UnparseableReply),
            }
        }
    }

    /// Sends a command and waits for its reply.
    pub async fn cmd(&mut self, cmd: impl AsRef<[u8]>) -> crate::Result<Response<String>> {
        tokio::time::timeout(self.timeout, async {
            self.stream.write_all(cmd.as_ref()).await?;
            self.stream.flush().await?;
            self.read().await
        })
        .await
        .map_err(|_| Error::Timeout)?
    }

    /// Writes a message body after DATA was accepted. Lines starting with
    /// a dot get an extra dot (RFC 5321 section 4.5.2) and the body is
    /// closed with the end of data marker.
    pub async fn write_message(&mut self, message: &[u8]) -> tokio::io::Result<()> {
        let mut start = 0;
        for pos in line_leading_dots(message) {
            self.stream.write_all(&message[start..pos]).await?;
            self.stream.write_all(b".").await?;
            start = pos;
        }
        self.stream.write_all(&message[start..]).await?;

        let terminator: &[u8] = if message.is_empty() || message.ends_with(b"\r\n") {
            b".\r\n"
        } else {
            b"\r\n.\r\n"
        };
        self.stream.write_all(terminator).await?;
        self.stream.flush().await
    }
}

fn line_leading_dots(message: &[u8]) -> impl Iterator<Item = usize> + '_ {
    message
        .iter()
        .enumerate()
        .filter(move |(pos, byte)| {
            **byte == b'.' && (*pos == 0 || message[..*pos].ends_with(b"\r\n"))
        })
        .map(|(pos, _)| pos)
}
