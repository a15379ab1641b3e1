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
    io::Read,
    time::{SystemTime, UNIX_EPOCH},
};

use rand::Rng;

use crate::{
    message::{address::Address, headers::Headers},
    Attachment, Context, Message, SendConfig,
};

use self::encode::{
    base64_wrapped, header_text, make_boundary, quoted_filename, quoted_printable, write_header,
};

pub mod encode;

const TEXT_PLAIN: &str = "text/plain; charset=\"UTF-8\"";
const TEXT_HTML: &str = "text/html; charset=\"UTF-8\"";
const QUOTED_PRINTABLE: &str = "quoted-printable";

/// Builds the wire payload of a message: the header block, a blank line
/// and the encoded body. The message is validated first. When the send
/// configuration carries DKIM settings, a `DKIM-Signature` header over the
/// final headers and body is placed at the top of the header block.
pub fn build(
    context: &mut Context,
    mut message: Message,
    config: &SendConfig,
) -> crate::Result<Vec<u8>> {
    message.validate()?;

    let hooks = config.hooks.as_deref();
    if let Some(hooks) = hooks {
        hooks.build_start(context, &message);
    }

    let result = build_payload(&mut message, config);

    if let Some(hooks) = hooks {
        match &result {
            Ok(payload) => hooks.build_done(context, &message, payload.len(), None),
            Err(err) => hooks.build_done(context, &message, 0, Some(err)),
        }
    }
    if let Ok(payload) = &result {
        log::trace!("Built message payload of {} bytes", payload.len());
    }

    result
}

fn build_payload(message: &mut Message, config: &SendConfig) -> crate::Result<Vec<u8>> {
    let mut headers = message_headers(message, config);

    let mut body = Vec::new();
    let text = message.text_body.as_deref().filter(|body| !body.is_empty());
    let html = message.html_body.as_deref().filter(|body| !body.is_empty());

    if !message.attachments.is_empty() {
        let boundary = make_boundary();
        headers.remove("Content-Transfer-Encoding");
        headers.insert(
            "Content-Type",
            format!("multipart/mixed; boundary=\"{boundary}\""),
        );

        if text.is_some() || html.is_some() {
            let alternative = make_boundary();
            body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
            write_header(
                "Content-Type",
                &format!("multipart/alternative; boundary=\"{alternative}\""),
                &mut body,
            );
            body.extend_from_slice(b"\r\n");
            write_alternative(&alternative, text, html, &mut body);
        }
        for attachment in message.attachments.iter_mut() {
            body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
            write_attachment(attachment, &mut body)?;
        }
        body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    } else if text.is_some() && html.is_some() {
        let boundary = make_boundary();
        headers.remove("Content-Transfer-Encoding");
        headers.insert(
            "Content-Type",
            format!("multipart/alternative; boundary=\"{boundary}\""),
        );
        write_alternative(&boundary, text, html, &mut body);
    } else if let Some(html) = html {
        headers.insert("Content-Type", TEXT_HTML);
        headers.insert("Content-Transfer-Encoding", QUOTED_PRINTABLE);
        quoted_printable(html, &mut body);
    } else {
        headers.insert("Content-Type", TEXT_PLAIN);
        headers.insert("Content-Transfer-Encoding", QUOTED_PRINTABLE);
        quoted_printable(text.unwrap_or_default(), &mut body);
    }

    #[cfg(feature = "dkim")]
    if let Some(dkim) = &config.dkim {
        let signature = dkim.sign(&headers, &body)?;
        headers.insert_first("DKIM-Signature", signature);
    }

    let mut payload = Vec::with_capacity(body.len() + 1024);
    for (name, value) in headers.iter() {
        write_header(name, value, &mut payload);
    }
    payload.extend_from_slice(b"\r\n");
    payload.extend_from_slice(&body);

    Ok(payload)
}

/// Copies the caller's headers and sets the ones derived from the message.
fn message_headers(message: &Message, config: &SendConfig) -> Headers {
    let mut headers = message.headers.clone();
    headers.remove("Bcc");

    if let Some(list_unsubscribe) = config
        .list_unsubscribe
        .as_deref()
        .filter(|value| !value.trim().is_empty())
    {
        headers.insert("List-Unsubscribe", list_unsubscribe);
    }

    headers.insert("From", message.from.to_string());
    for (name, addresses) in [("To", &message.to), ("Cc", &message.cc)] {
        let value = join_addresses(addresses);
        if !value.is_empty() {
            headers.insert(name, value);
        }
    }

    let subject = header_text(&message.subject);
    if !subject.is_empty() {
        headers.insert("Subject", subject);
    }
    headers.insert("Date", chrono::Utc::now().to_rfc2822());
    headers.insert("MIME-Version", "1.0");

    if let Some(tracking_id) = message.tracking_id.as_deref() {
        let tracking_id = header_text(tracking_id);
        if !tracking_id.is_empty() {
            headers.insert("X-Tracking-ID", tracking_id);
        }
    }
    if !headers.contains("Message-ID") {
        headers.insert("Message-ID", message_id(&message.from));
    }

    headers
}

fn join_addresses(addresses: &[Address]) -> String {
    addresses
        .iter()
        .filter(|addr| !addr.is_empty())
        .map(|addr| addr.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// `<timestamp-and-random-hex@sender-domain>`
fn message_id(from: &Address) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let random: [u8; 12] = rand::thread_rng().gen();
    let random = random
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<String>();
    let domain = from
        .email
        .trim()
        .rsplit_once('@')
        .map(|(_, domain)| domain)
        .filter(|domain| !domain.is_empty())
        .unwrap_or("localhost");

    format!("<{nanos:x}{random}@{domain}>")
}

fn write_alternative(
    boundary: &str,
    text: Option<&[u8]>,
    html: Option<&[u8]>,
    out: &mut Vec<u8>,
) {
    for (content_type, body) in [(TEXT_PLAIN, text), (TEXT_HTML, html)] {
        if let Some(body) = body {
            out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
            write_header("Content-Type", content_type, out);
            write_header("Content-Transfer-Encoding", QUOTED_PRINTABLE, out);
            out.extend_from_slice(b"\r\n");
            quoted_printable(body, out);
        }
    }
    out.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
}

fn write_attachment(attachment: &mut Attachment, out: &mut Vec<u8>) -> crate::Result<()> {
    let mut contents = Vec::new();
    attachment.reader.read_to_end(&mut contents)?;

    write_header(
        "Content-Type",
        attachment
            .content_type
            .as_deref()
            .map(str::trim)
            .filter(|content_type| !content_type.is_empty())
            .unwrap_or("application/octet-stream"),
        out,
    );
    write_header("Content-Transfer-Encoding", "base64", out);
    let filename = quoted_filename(&attachment.filename);
    match attachment.content_id.as_deref() {
        Some(content_id) => {
            write_header("Content-Disposition", &format!("inline; filename={filename}"), out);
            write_header("Content-ID", &format!("<{}>", header_text(content_id)), out);
        }
        None => {
            write_header(
                "Content-Disposition",
                &format!("attachment; filename={filename}"),
                out,
            );
        }
    }
    out.extend_from_slice(b"\r\n");
    base64_wrapped(&contents, out);

    Ok(())
}
