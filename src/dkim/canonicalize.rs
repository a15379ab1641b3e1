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

//! Relaxed canonicalization (RFC 6376, sections 3.4.2 and 3.4.4).

/// Canonicalizes a message body. Line endings become CRLF, trailing
/// whitespace is removed, whitespace runs collapse to one space and
/// trailing empty lines are dropped. An empty body yields a single CRLF.
pub fn relaxed_body(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 2);
    let body = body.strip_suffix(b"\n").unwrap_or(body);

    for line in body.split(|&byte| byte == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        compress_wsp(line, &mut out);
        while out.last().map_or(false, |&byte| byte == b' ') {
            out.pop();
        }
        out.extend_from_slice(b"\r\n");
    }

    while out.ends_with(b"\r\n\r\n") {
        out.truncate(out.len() - 2);
    }

    out
}

/// Canonicalizes a header field as `name:value`, without line terminator.
pub fn relaxed_header(name: &str, value: &str) -> String {
    let mut out = Vec::with_capacity(name.len() + value.len() + 1);
    out.extend(name.trim().bytes().map(|byte| byte.to_ascii_lowercase()));
    out.push(b':');

    let unfolded = value.replace("\r\n", "").replace('\n', "");
    compress_wsp(unfolded.trim().as_bytes(), &mut out);

    String::from_utf8_lossy(&out).into_owned()
}

fn compress_wsp(line: &[u8], out: &mut Vec<u8>) {
    let mut in_space = false;
    for &byte in line {
        if byte == b' ' || byte == b'\t' {
            if !in_space {
                out.push(b' ');
                in_space = true;
            }
        } else {
            out.push(byte);
            in_space = false;
        }
    }
}
