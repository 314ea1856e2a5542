//! Confirmation mail generation
//!
//! The body carries three machine-parseable lines keyed on a per-message
//! marker so the inbound monitor can re-extract the (address, token) pair
//! from a quoted reply:
//!
//! ```text
//! mail type:      <marker>:<fixed correlation uuid>
//! secret token:   <marker>:t:<token>
//! e-mail address: <marker>:e:<address>
//! ```
//!
//! Only those three lines are load-bearing; the surrounding prose is
//! instructions for the human recipient.

use crate::validations::urlsafe_token;
use chrono::Utc;

/// Fixed correlation UUID identifying sender-validation mails
pub const VALIDATION_UUID: &str = "8ce7db75-31c1-4308-974e-0971c19fa158";

/// Random bytes in the per-message marker
const MARKER_SIZE: usize = 16;

/// Build a confirmation message for `to` carrying `token`
///
/// Returns the full RFC 5322 message bytes, CRLF line endings throughout.
pub fn confirmation_mail(from: &str, to: &str, token: &str) -> Vec<u8> {
    confirmation_mail_with_marker(from, to, token, &urlsafe_token(MARKER_SIZE))
}

/// Composition with an explicit marker, split out for testing
fn confirmation_mail_with_marker(from: &str, to: &str, token: &str, marker: &str) -> Vec<u8> {
    let date = Utc::now().to_rfc2822();
    let body = format!(
        "Please confirm your e-mail address\r\n\
\r\n\
You, or someone that passes for you, is trying to send a message using the\r\n\
e-mail address: {to}\r\n\
\r\n\
If you are not the author of the message, you can ignore this e-mail and the\r\n\
original message will be ignored.\r\n\
\r\n\
If you are the author of the message, you need to reply to this message to\r\n\
confirm you are the sender. If not, the message is going to be discarded.\r\n\
\r\n\
\r\n\
------------------------------------------------------------\r\n\
Please keep the following text in your reply:\r\n\
\r\n\
mail type:      {marker}:{uuid}\r\n\
secret token:   {marker}:t:{token}\r\n\
e-mail address: {marker}:e:{to}\r\n\
------------------------------------------------------------\r\n",
        to = to,
        marker = marker,
        uuid = VALIDATION_UUID,
        token = token,
    );

    format!(
        "From: {from}\r\n\
To: {to}\r\n\
Date: {date}\r\n\
Subject: Please confirm your e-mail address\r\n\
Content-Type: text/plain\r\n\
\r\n\
{body}"
    )
    .into_bytes()
}
