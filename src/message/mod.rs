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

use std::{
    fmt::Debug,
    io::{Cursor, Read},
};

pub mod address;
pub mod headers;

use self::{address::Address, headers::Headers};

/// An e-mail message description.
#[derive(Debug, Default)]
pub struct Message {
    pub from: Address,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub bcc: Vec<Address>,
    pub subject: String,
    pub text_body: Option<Vec<u8>>,
    pub html_body: Option<Vec<u8>>,
    pub attachments: Vec<Attachment>,
    pub headers: Headers,
    pub tracking_id: Option<String>,
}

/// A file attached to a message. Attachments with a content identifier
/// are emitted inline so they can be referenced from the HTML body.
pub struct Attachment {
    pub filename: String,
    pub content_type: Option<String>,
    pub content_id: Option<String>,
    pub(crate) reader: Box<dyn Read + Send>,
}

impl Message {
    /// Create a new message
    pub fn new(from: impl Into<Address>) -> Self {
        Message {
            from: from.into(),
            ..Default::default()
        }
    }

    /// Set the sender of the message.
    pub fn from(mut self, address: impl Into<Address>) -> Self {
        self.from = address.into();
        self
    }

    /// Add a primary recipient.
    pub fn to(mut self, address: impl Into<Address>) -> Self {
        self.to.push(address.into());
        self
    }

    /// Add a copy recipient.
    pub fn cc(mut self, address: impl Into<Address>) -> Self {
        self.cc.push(address.into());
        self
    }

    /// Add a blind copy recipient.
    pub fn bcc(mut self, address: impl Into<Address>) -> Self {
        self.bcc.push(address.into());
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn text_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.text_body = Some(body.into());
        self
    }

    pub fn html_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.html_body = Some(body.into());
        self
    }

    pub fn attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Adds an extra header. `From`, `To`, `Cc`, `Subject`, `Date` and
    /// `MIME-Version` are always overwritten at build time.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn tracking_id(mut self, tracking_id: impl Into<String>) -> Self {
        self.tracking_id = Some(tracking_id.into());
        self
    }

    /// Checks that the message has a well formed sender, at least one
    /// recipient and some non-empty content.
    pub fn validate(&self) -> crate::Result<()> {
        if self.from.is_empty() {
            return Err(crate::Error::MissingMailFrom);
        }
        self.from.check()?;

        let mut has_recipients = false;
        for address in self.to.iter().chain(&self.cc).chain(&self.bcc) {
            if !address.is_empty() {
                address.check()?;
                has_recipients = true;
            }
        }
        if !has_recipients {
            return Err(crate::Error::MissingRcptTo);
        }

        let has_body = |body: &Option<Vec<u8>>| body.as_ref().is_some_and(|b| !b.is_empty());
        if !has_body(&self.text_body) && !has_body(&self.html_body) && self.attachments.is_empty() {
            Err(crate::Error::MissingBody)
        } else {
            Ok(())
        }
    }

    /// Envelope recipients: primary, copy and blind copy mailboxes in
    /// that order.
    pub fn recipients(&self) -> impl Iterator<Item = &str> {
        self.to
            .iter()
            .chain(self.cc.iter())
            .chain(self.bcc.iter())
            .filter(|addr| !addr.is_empty())
            .map(|addr| addr.email.trim())
    }
}

impl Attachment {
    /// Creates an attachment from in-memory contents.
    pub fn new(filename: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        Attachment::from_reader(filename, Cursor::new(contents.into()))
    }

    /// Creates an attachment whose contents are read once, at build time.
    pub fn from_reader(filename: impl Into<String>, reader: impl Read + Send + 'static) -> Self {
        Attachment {
            filename: filename.into(),
            content_type: None,
            content_id: None,
            reader: Box::new(reader),
        }
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Marks the attachment as an inline resource referenced by `cid:`.
    pub fn content_id(mut self, content_id: impl Into<String>) -> Self {
        self.content_id = Some(content_id.into());
        self
    }

    pub fn is_inline(&self) -> bool {
        self.content_id.is_some()
    }
}

impl Debug for Attachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attachment")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("content_id", &self.content_id)
            .finish_non_exhaustive()
    }
}
