//! Confirmation extraction from inbound mail
//!
//! Replies quote the tagged lines from the confirmation mail. Extraction is
//! keyed: first the per-message marker is located by the fixed correlation
//! UUID, then the token and address patterns are matched against that same
//! marker, so unrelated text resembling the pattern cannot produce a false
//! pair.

use crate::mailer::compose::VALIDATION_UUID;
use crate::message;
use regex::Regex;
use std::sync::LazyLock;
use tracing::trace;

/// A confirmed (address, token) pair extracted from a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    /// Address the sender claims
    pub email: String,
    /// Token quoted back from the confirmation mail
    pub token: String,
}

static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(\S+):{}", regex::escape(VALIDATION_UUID)))
        .expect("marker pattern is valid")
});

/// Scan one decoded text for the tagged confirmation lines
pub fn scan_text(text: &str) -> Option<Confirmation> {
    let marker = MARKER_RE.captures(text)?.get(1)?.as_str();

    let token_re = Regex::new(&format!(r"{}:t:(\S+)", regex::escape(marker))).ok()?;
    let token = token_re.captures(text)?.get(1)?.as_str();

    let email_re = Regex::new(&format!(r"{}:e:(\S+)", regex::escape(marker))).ok()?;
    let email = email_re.captures(text)?.get(1)?.as_str();

    trace!("extracted confirmation for {}", email);
    Some(Confirmation {
        email: email.to_string(),
        token: token.to_string(),
    })
}

/// Scan every MIME part of a raw message for a confirmation
pub fn scan_message(raw: &[u8]) -> Option<Confirmation> {
    message::text_parts(raw)
        .iter()
        .find_map(|part| scan_text(part))
}
