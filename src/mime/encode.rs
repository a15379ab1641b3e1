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

use base64::{engine::general_purpose::STANDARD, Engine};
use rand::Rng;

const HEX: &[u8; 16] = b"0123456789ABCDEF";

/// Maximum header line length before folding.
pub const HEADER_LINE_LIMIT: usize = 78;

/// Quoted-printable encodes `input` (RFC 2045 section 6.7). Line breaks
/// become CRLF, soft breaks keep lines within 76 columns and the output
/// always ends with CRLF.
pub fn quoted_printable(input: &[u8], out: &mut Vec<u8>) {
    let mut col = 0;
    for &byte in input {
        match byte {
            b'\r' => continue,
            b'\n' => {
                out.extend_from_slice(b"\r\n");
                col = 0;
                continue;
            }
            _ => (),
        }

        let escape = byte == b'=' || !(32..=126).contains(&byte);
        let len = if escape { 3 } else { 1 };
        if col + len > 75 {
            out.extend_from_slice(b"=\r\n");
            col = 0;
        }
        if escape {
            out.extend_from_slice(&[b'=', HEX[(byte >> 4) as usize], HEX[(byte & 0x0f) as usize]]);
        } else {
            out.push(byte);
        }
        col += len;
    }
    out.extend_from_slice(b"\r\n");
}

/// Base64 encodes `input` in lines of at most 76 characters, each one
/// terminated by CRLF.
pub fn base64_wrapped(input: &[u8], out: &mut Vec<u8>) {
    // 57 input bytes encode to exactly 76 characters.
    for chunk in input.chunks(57) {
        out.extend_from_slice(STANDARD.encode(chunk).as_bytes());
        out.extend_from_slice(b"\r\n");
    }
}

/// Encodes text as one or more RFC 2047 `B` encoded words separated by
/// spaces. Each word stays below the 75 character limit.
pub fn encoded_word(text: &str) -> String {
    let mut words = Vec::new();
    let mut start = 0;
    let mut end = 0;
    for (pos, ch) in text.char_indices() {
        if pos + ch.len_utf8() - start > 45 {
            words.push(&text[start..end]);
            start = pos;
        }
        end = pos + ch.len_utf8();
    }
    if start < text.len() {
        words.push(&text[start..]);
    }

    words
        .into_iter()
        .map(|word| format!("=?UTF-8?B?{}?=", STANDARD.encode(word)))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Prepares free text for a header value: control characters are removed
/// and non-ASCII text is emitted as encoded words.
pub fn header_text(text: &str) -> String {
    let text: String = text.chars().filter(|ch| !ch.is_control()).collect();
    if text.is_ascii() {
        text
    } else {
        encoded_word(&text)
    }
}

/// Quotes a filename for `Content-Disposition`.
pub fn quoted_filename(filename: &str) -> String {
    let filename = header_text(filename);
    let mut quoted = String::with_capacity(filename.len() + 2);
    quoted.push('"');
    for ch in filename.chars() {
        if ch == '"' || ch == '\\' {
            quoted.push('\\');
        }
        quoted.push(ch);
    }
    quoted.push('"');
    quoted
}

/// Writes `name: value` followed by CRLF, folding at whitespace when the
/// line would exceed [`HEADER_LINE_LIMIT`]. A word longer than the limit
/// is written unbroken on its own line.
pub fn write_header(name: &str, value: &str, out: &mut Vec<u8>) {
    let value: String = value.chars().filter(|ch| !matches!(ch, '\r' | '\n')).collect();

    out.extend_from_slice(name.as_bytes());
    out.push(b':');
    if name.len() + 2 + value.len() <= HEADER_LINE_LIMIT {
        out.push(b' ');
        out.extend_from_slice(value.as_bytes());
    } else {
        let mut line_len = name.len() + 1;
        let mut words_in_line = 0;
        for word in value.split_ascii_whitespace() {
            if words_in_line > 0 && line_len + 1 + word.len() > HEADER_LINE_LIMIT {
                out.extend_from_slice(b"\r\n");
                line_len = 0;
                words_in_line = 0;
            }
            out.push(b' ');
            out.extend_from_slice(word.as_bytes());
            line_len += 1 + word.len();
            words_in_line += 1;
        }
    }
    out.extend_from_slice(b"\r\n");
}

/// Generates a random multipart boundary. The `=_` prefix cannot occur in
/// quoted-printable or base64 output.
pub fn make_boundary() -> String {
    format!("=_{:032x}", rand::thread_rng().gen::<u128>())
}

#[cfg(test)]
pub(crate) mod test {
    use base64::{engine::general_purpose::STANDARD, Engine};

    use super::{
        base64_wrapped, encoded_word, header_text, quoted_filename, quoted_printable,
        write_header, HEADER_LINE_LIMIT,
    };

    /// Decodes quoted-printable text produced by [`quoted_printable`].
    pub(crate) fn decode_quoted_printable(input: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(input.len());
        let mut pos = 0;
        while pos < input.len() {
            match input[pos] {
                b'=' if input[pos + 1..].starts_with(b"\r\n") => pos += 3,
                b'=' => {
                    let hex = std::str::from_utf8(&input[pos + 1..pos + 3]).unwrap();
                    out.push(u8::from_str_radix(hex, 16).unwrap());
                    pos += 3;
                }
                b'\r' if input[pos + 1..].starts_with(b"\n") => {
                    out.push(b'\n');
                    pos += 2;
                }
                byte => {
                    out.push(byte);
                    pos += 1;
                }
            }
        }
        out
    }

    #[test]
    fn encode_quoted_printable() {
        for (input, expected) in [
            ("hello\nworld", "hello\r\nworld\r\n"),
            ("hello\r\nworld", "hello\r\nworld\r\n"),
            ("a=b", "a=3Db\r\n"),
            ("tab\there", "tab=09here\r\n"),
            ("café", "caf=C3=A9\r\n"),
            ("", "\r\n"),
        ] {
            let mut out = Vec::new();
            quoted_printable(input.as_bytes(), &mut out);
            assert_eq!(String::from_utf8(out).unwrap(), expected, "{input:?}");
        }
    }

    #[test]
    fn quoted_printable_soft_breaks() {
        for input in [
            "A".repeat(200),
            "=".repeat(100),
            "é".repeat(60),
            format!("{}\n{}", "x".repeat(80), "y".repeat(10)),
        ] {
            let mut out = Vec::new();
            quoted_printable(input.as_bytes(), &mut out);

            let encoded = String::from_utf8(out.clone()).unwrap();
            assert!(encoded.contains("=\r\n"), "{encoded:?}");
            for line in encoded.split("\r\n") {
                assert!(line.len() <= 76, "{line:?}");
            }

            let mut expected = input.into_bytes();
            expected.push(b'\n');
            assert_eq!(decode_quoted_printable(&out), expected);
        }
    }

    #[test]
    fn encode_base64_wrapped() {
        let input = (0..=255u8).collect::<Vec<_>>();
        let mut out = Vec::new();
        base64_wrapped(&input, &mut out);

        let encoded = String::from_utf8(out).unwrap();
        assert!(encoded.ends_with("\r\n"));
        let lines = encoded.trim_end().split("\r\n").collect::<Vec<_>>();
        assert!(lines.iter().all(|line| line.len() <= 76));
        assert_eq!(lines[0].len(), 76);
        assert_eq!(STANDARD.decode(lines.concat()).unwrap(), input);
    }

    #[test]
    fn encode_words() {
        assert_eq!(encoded_word("Jöhn Dœ"), "=?UTF-8?B?SsO2aG4gRMWT?=");
        assert_eq!(header_text("Hello\r\n world\x07"), "Hello world");
        assert_eq!(header_text("¡Hola!"), "=?UTF-8?B?wqFIb2xhIQ==?=");
        assert_eq!(quoted_filename("report \"q3\".pdf"), "\"report \\\"q3\\\".pdf\"");

        let long = "ñ".repeat(60);
        let words = encoded_word(&long);
        assert_eq!(words.split(' ').count(), 3);
        assert!(words.split(' ').all(|word| word.len() <= 75));
    }

    #[test]
    fn fold_headers() {
        let mut out = Vec::new();
        write_header("Subject", "Hi", &mut out);
        assert_eq!(out, b"Subject: Hi\r\n");

        let mut out = Vec::new();
        write_header("Subject", &"word ".repeat(30), &mut out);
        let folded = String::from_utf8(out).unwrap();
        assert!(folded.starts_with("Subject: word"));
        assert!(folded.ends_with("word\r\n"));
        let lines = folded.trim_end().split("\r\n").collect::<Vec<_>>();
        assert!(lines.len() > 1);
        assert!(lines.iter().all(|line| line.len() <= HEADER_LINE_LIMIT));
        assert!(lines[1..].iter().all(|line| line.starts_with(' ')));

        // Unbreakable words are kept whole.
        let mut out = Vec::new();
        let token = "x".repeat(100);
        write_header("References", &format!("<a@b> {token}"), &mut out);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            format!("References: <a@b>\r\n {token}\r\n")
        );

        // Line breaks in values never start a new header.
        let mut out = Vec::new();
        write_header("X-Note", "a\r\nBcc: evil@example.com", &mut out);
        assert_eq!(out, b"X-Note: aBcc: evil@example.com\r\n");
    }
}
