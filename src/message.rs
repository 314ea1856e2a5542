//! Message header parsing and validation
//!
//! The posting path needs three things from a raw article: the sender
//! address, the target newsgroups, and the message-id. The inbound monitor
//! additionally needs the decoded text of every MIME part of a reply so the
//! confirmation scanner can pattern-match it. Header folding, comma lists
//! and transfer decoding follow RFC 5322/5536/2045.

use crate::error::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::collections::HashMap;

/// Split a raw message at the first blank line
///
/// Returns the header block and the body. A message without a separator is
/// all headers.
pub fn split_message(raw: &[u8]) -> (&[u8], &[u8]) {
    if let Some(pos) = find_subslice(raw, b"\r\n\r\n") {
        return (&raw[..pos], &raw[pos + 4..]);
    }
    if let Some(pos) = find_subslice(raw, b"\n\n") {
        return (&raw[..pos], &raw[pos + 2..]);
    }
    (raw, b"")
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Unfold a header value by collapsing continuation line breaks to spaces
fn unfold_header(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    let mut prev_was_newline = false;

    for ch in value.chars() {
        match ch {
            '\r' => {}
            '\n' => prev_was_newline = true,
            ' ' | '\t' if prev_was_newline => {
                if !result.ends_with(' ') {
                    result.push(' ');
                }
                prev_was_newline = false;
            }
            _ => {
                if prev_was_newline {
                    result.push(' ');
                }
                result.push(ch);
                prev_was_newline = false;
            }
        }
    }

    result.trim().to_string()
}

/// Parse a header block into a lowercase-name map
///
/// The first occurrence of a field wins. Continuation lines (leading
/// whitespace) extend the previous field.
pub fn parse_header_block(text: &str) -> HashMap<String, String> {
    fn commit(name: Option<String>, value: &str, map: &mut HashMap<String, String>) {
        if let Some(name) = name {
            map.entry(name.to_lowercase())
                .or_insert_with(|| unfold_header(value));
        }
    }

    let mut headers = HashMap::new();
    let mut current_name: Option<String> = None;
    let mut current_value = String::new();

    for line in text.lines() {
        if line.is_empty() {
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            current_value.push('\n');
            current_value.push_str(line);
        } else {
            commit(current_name.take(), &current_value, &mut headers);
            if let Some(colon) = line.find(':') {
                current_name = Some(line[..colon].trim().to_string());
                current_value = line[colon + 1..].trim_start().to_string();
            }
        }
    }
    commit(current_name, &current_value, &mut headers);

    headers
}

/// Comma-separated header list (Newsgroups and friends)
pub fn parse_comma_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// The headers the posting pipeline cares about
#[derive(Debug, Clone, Default)]
pub struct PostHeaders {
    /// Raw From field value
    pub from: Option<String>,
    /// Parsed Newsgroups list
    pub newsgroups: Vec<String>,
    /// Client-supplied message-id
    pub message_id: Option<String>,
}

impl PostHeaders {
    /// Parse the posting-relevant headers out of a raw article
    pub fn parse(raw: &[u8]) -> Self {
        let (header_block, _) = split_message(raw);
        let headers = parse_header_block(&String::from_utf8_lossy(header_block));

        Self {
            from: headers.get("from").cloned(),
            newsgroups: headers
                .get("newsgroups")
                .map(|v| parse_comma_list(v))
                .unwrap_or_default(),
            message_id: headers.get("message-id").cloned(),
        }
    }

    /// The bare sender address extracted from the From field
    pub fn from_address(&self) -> Option<String> {
        self.from.as_deref().and_then(extract_address)
    }
}

/// Extract the addr-spec from a From-style field value
///
/// Handles `Display Name <local@domain>`, bare `local@domain`, and comments
/// around the address. Quoting inside the local part is left untouched.
pub fn extract_address(value: &str) -> Option<String> {
    // Angle-bracket form wins when present
    if let Some(open) = value.rfind('<') {
        let rest = &value[open + 1..];
        let close = rest.find('>')?;
        let addr = rest[..close].trim();
        return (!addr.is_empty()).then(|| addr.to_string());
    }

    // Bare form: first token containing an @
    value
        .split_whitespace()
        .find(|tok| tok.contains('@'))
        .map(|tok| tok.trim_matches(|c| c == '(' || c == ')' || c == ',').to_string())
        .filter(|addr| !addr.is_empty())
}

/// Validate a Message-ID header value
///
/// Message-IDs have the shape `<local-part@domain>`: angle brackets, exactly
/// one `@`, both sides non-empty, no whitespace or control characters.
pub fn validate_message_id(message_id: &str) -> Result<()> {
    if message_id.len() < 5 {
        return Err(Error::MalformedArticle("Message-ID too short".to_string()));
    }
    if !message_id.starts_with('<') || !message_id.ends_with('>') {
        return Err(Error::MalformedArticle(
            "Message-ID must be enclosed in angle brackets".to_string(),
        ));
    }

    let content = &message_id[1..message_id.len() - 1];
    let at_count = content.matches('@').count();
    if at_count != 1 {
        return Err(Error::MalformedArticle(format!(
            "Message-ID must contain exactly one @ sign, found {}",
            at_count
        )));
    }

    let (local, domain) = content.split_once('@').unwrap_or((content, ""));
    if local.is_empty() || domain.is_empty() {
        return Err(Error::MalformedArticle(
            "Message-ID local-part and domain must be non-empty".to_string(),
        ));
    }
    if content.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(Error::MalformedArticle(
            "Message-ID cannot contain whitespace or control characters".to_string(),
        ));
    }

    Ok(())
}

/// Validate a newsgroup name
///
/// Names are dot-separated components of lowercase letters, digits, `+`,
/// `-` and `_`, with no empty components.
pub fn validate_newsgroup_name(newsgroup: &str) -> Result<()> {
    if newsgroup.is_empty() {
        return Err(Error::MalformedArticle(
            "Newsgroup name cannot be empty".to_string(),
        ));
    }
    if newsgroup.starts_with('.') || newsgroup.ends_with('.') {
        return Err(Error::MalformedArticle(
            "Newsgroup name cannot start or end with a dot".to_string(),
        ));
    }

    for component in newsgroup.split('.') {
        if component.is_empty() {
            return Err(Error::MalformedArticle(
                "Newsgroup name cannot have empty components".to_string(),
            ));
        }
        for ch in component.chars() {
            if !(ch.is_ascii_lowercase()
                || ch.is_ascii_digit()
                || ch == '+'
                || ch == '-'
                || ch == '_')
            {
                return Err(Error::MalformedArticle(format!(
                    "Invalid character '{}' in newsgroup name",
                    ch
                )));
            }
        }
    }

    Ok(())
}

/// Nesting bound for multipart recursion
const MAX_MIME_DEPTH: usize = 8;

/// Decoded text of every MIME part of a message
///
/// Single-part messages yield one element. Multipart messages are split on
/// their boundary and each leaf part is transfer-decoded (base64 and
/// quoted-printable; anything else passes through). Undecodable parts fall
/// back to a lossy passthrough rather than being dropped, so the scanner
/// still sees their raw text.
pub fn text_parts(raw: &[u8]) -> Vec<String> {
    let mut parts = Vec::new();
    collect_parts(raw, 0, &mut parts);
    parts
}

fn collect_parts(raw: &[u8], depth: usize, out: &mut Vec<String>) {
    let (header_block, body) = split_message(raw);
    let headers = parse_header_block(&String::from_utf8_lossy(header_block));

    let content_type = headers.get("content-type").map(String::as_str).unwrap_or("");
    if depth < MAX_MIME_DEPTH
        && content_type.to_ascii_lowercase().contains("multipart/")
        && let Some(boundary) = boundary_param(content_type)
    {
        for part in split_multipart(body, &boundary) {
            collect_parts(part, depth + 1, out);
        }
        return;
    }

    let encoding = headers
        .get("content-transfer-encoding")
        .map(|v| v.trim().to_ascii_lowercase())
        .unwrap_or_default();
    out.push(decode_transfer(body, &encoding));
}

/// Extract the boundary parameter from a Content-Type value
fn boundary_param(content_type: &str) -> Option<String> {
    for param in content_type.split(';').skip(1) {
        let (name, value) = param.split_once('=')?;
        if name.trim().eq_ignore_ascii_case("boundary") {
            let value = value.trim().trim_matches('"');
            return (!value.is_empty()).then(|| value.to_string());
        }
    }
    None
}

/// Split a multipart body on its boundary, dropping preamble and epilogue
fn split_multipart<'a>(body: &'a [u8], boundary: &str) -> Vec<&'a [u8]> {
    let delimiter = format!("--{}", boundary);
    let mut parts = Vec::new();

    let text = body;
    let mut offset = 0;
    let mut starts = Vec::new();
    while let Some(pos) = find_subslice(&text[offset..], delimiter.as_bytes()) {
        starts.push(offset + pos);
        offset += pos + delimiter.len();
    }

    for pair in starts.windows(2) {
        let start = pair[0] + delimiter.len();
        let chunk = &text[start..pair[1]];
        // The close-delimiter "--boundary--" ends the list
        if text[pair[0]..].starts_with(format!("{}--", delimiter).as_bytes()) {
            break;
        }
        parts.push(trim_crlf(chunk));
    }
    parts
}

fn trim_crlf(data: &[u8]) -> &[u8] {
    let mut start = 0;
    while start < data.len() && (data[start] == b'\r' || data[start] == b'\n') {
        start += 1;
    }
    let mut end = data.len();
    while end > start && (data[end - 1] == b'\r' || data[end - 1] == b'\n') {
        end -= 1;
    }
    &data[start..end]
}

/// Decode a part body per its Content-Transfer-Encoding
fn decode_transfer(body: &[u8], encoding: &str) -> String {
    match encoding {
        "base64" => {
            let compact: Vec<u8> = body
                .iter()
                .copied()
                .filter(|b| !b.is_ascii_whitespace())
                .collect();
            match STANDARD.decode(&compact) {
                Ok(decoded) => String::from_utf8_lossy(&decoded).into_owned(),
                Err(_) => String::from_utf8_lossy(body).into_owned(),
            }
        }
        "quoted-printable" => decode_quoted_printable(body),
        _ => String::from_utf8_lossy(body).into_owned(),
    }
}

/// Quoted-printable decoding: `=XX` escapes and `=` soft line breaks
fn decode_quoted_printable(body: &[u8]) -> String {
    let mut decoded = Vec::with_capacity(body.len());
    let mut i = 0;
    while i < body.len() {
        if body[i] == b'=' {
            // Soft break: "=\r\n" or "=\n"
            if body.get(i + 1) == Some(&b'\r') && body.get(i + 2) == Some(&b'\n') {
                i += 3;
                continue;
            }
            if body.get(i + 1) == Some(&b'\n') {
                i += 2;
                continue;
            }
            if i + 2 < body.len()
                && let (Some(high), Some(low)) = (hex_val(body[i + 1]), hex_val(body[i + 2]))
            {
                decoded.push(high << 4 | low);
                i += 3;
                continue;
            }
        }
        decoded.push(body[i]);
        i += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'A'..=b'F' => Some(b - b'A' + 10),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}
