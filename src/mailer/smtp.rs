//! Outbound mail submission (SMTP)
//!
//! A minimal submission client: EHLO, STARTTLS upgrade, AUTH PLAIN, then
//! MAIL/RCPT/DATA with dot-stuffing. Every failure along the way surfaces
//! as [`Error::DeliveryFailed`], which the posting pipeline treats as a
//! posting failure.

use crate::config::MailConfig;
use crate::error::{Error, Result};
use crate::mailer::tls;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
const REPLY_TIMEOUT: Duration = Duration::from_secs(60);

/// Submit `message` to `recipients` through the configured account
///
/// # Errors
///
/// Returns [`Error::DeliveryFailed`] on any transport, protocol or
/// authentication error.
pub async fn send(config: &MailConfig, message: &[u8], recipients: &[&str]) -> Result<()> {
    submit(config, message, recipients)
        .await
        .map_err(|err| match err {
            Error::DeliveryFailed(_) => err,
            other => Error::DeliveryFailed(other.to_string()),
        })
}

async fn submit(config: &MailConfig, message: &[u8], recipients: &[&str]) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.smtp_port);
    debug!("connecting to SMTP server {}", addr);

    let tcp = timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
        .await
        .map_err(|_| Error::Timeout)??;
    tcp.set_nodelay(true)?;

    let mut plain = BufReader::new(tcp);
    expect_reply(&mut plain, 220).await?;
    command(&mut plain, "EHLO newsmill", 250).await?;
    command(&mut plain, "STARTTLS", 220).await?;

    let tls_stream = tls::upgrade(plain.into_inner(), &config.host, config.allow_insecure_tls).await?;
    let mut stream = BufReader::new(tls_stream);
    debug!("SMTP TLS established");

    command(&mut stream, "EHLO newsmill", 250).await?;

    // AUTH PLAIN with initial response: \0user\0pass
    let password = config.load_password()?;
    let credentials = format!("\0{}\0{}", config.username(), password);
    let auth = format!("AUTH PLAIN {}", STANDARD.encode(credentials));
    command(&mut stream, &auth, 235)
        .await
        .map_err(|err| Error::AuthFailed(err.to_string()))?;
    debug!("SMTP authenticated as {}", config.username());

    command(&mut stream, &format!("MAIL FROM:<{}>", config.address), 250).await?;
    for recipient in recipients {
        write_line(&mut stream, &format!("RCPT TO:<{}>", recipient)).await?;
        let (code, text) = read_reply(&mut stream).await?;
        if code != 250 && code != 251 {
            return Err(Error::MailProtocol(format!(
                "RCPT TO:<{}> rejected: {} {}",
                recipient, code, text
            )));
        }
    }

    command(&mut stream, "DATA", 354).await?;
    stream.write_all(&dot_stuff(message)).await?;
    stream.write_all(b".\r\n").await?;
    stream.flush().await?;
    expect_reply(&mut stream, 250).await?;

    // Best-effort close; the message is already accepted
    if write_line(&mut stream, "QUIT").await.is_ok() {
        let _ = read_reply(&mut stream).await;
    }

    debug!("confirmation mail accepted for {:?}", recipients);
    Ok(())
}

/// Send one command and require a specific reply code
async fn command<S>(stream: &mut S, line: &str, expected: u16) -> Result<()>
where
    S: AsyncBufRead + AsyncWrite + Unpin,
{
    write_line(stream, line).await?;
    expect_reply(stream, expected).await
}

async fn write_line<S: AsyncWrite + Unpin>(stream: &mut S, line: &str) -> Result<()> {
    trace!("smtp >: {}", line.split_whitespace().next().unwrap_or(""));
    stream.write_all(line.as_bytes()).await?;
    stream.write_all(b"\r\n").await?;
    stream.flush().await?;
    Ok(())
}

async fn expect_reply<S: AsyncBufRead + Unpin>(stream: &mut S, expected: u16) -> Result<()> {
    let (code, text) = read_reply(stream).await?;
    if code != expected {
        return Err(Error::MailProtocol(format!(
            "expected {}, got {} {}",
            expected, code, text
        )));
    }
    Ok(())
}

/// Read one (possibly multiline) SMTP reply
async fn read_reply<S: AsyncBufRead + Unpin>(stream: &mut S) -> Result<(u16, String)> {
    let mut code = 0u16;
    let mut text = String::new();

    loop {
        let mut line = String::new();
        let n = timeout(REPLY_TIMEOUT, stream.read_line(&mut line))
            .await
            .map_err(|_| Error::Timeout)??;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }
        let line = line.trim_end();
        trace!("smtp <: {}", line);

        if line.len() < 3 {
            return Err(Error::InvalidResponse(line.to_string()));
        }
        code = line[..3]
            .parse()
            .map_err(|_| Error::InvalidResponse(line.to_string()))?;
        text = line.get(4..).unwrap_or("").to_string();

        // "250-..." continues a multiline reply, "250 ..." or "250" ends it
        if line.as_bytes().get(3) != Some(&b'-') {
            break;
        }
    }

    Ok((code, text))
}

/// Prefix a leading dot on every line that starts with one (RFC 5321 4.5.2)
/// and guarantee the payload ends with CRLF so the terminator stands alone
fn dot_stuff(message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() + 16);
    let mut at_line_start = true;
    for &byte in message {
        if at_line_start && byte == b'.' {
            out.push(b'.');
        }
        out.push(byte);
        at_line_start = byte == b'\n';
    }
    if !out.ends_with(b"\r\n") {
        out.extend_from_slice(b"\r\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dot_stuffing() {
        assert_eq!(dot_stuff(b"plain\r\n"), b"plain\r\n");
        assert_eq!(dot_stuff(b".leading\r\n"), b"..leading\r\n");
        assert_eq!(dot_stuff(b"a\r\n.b\r\n"), b"a\r\n..b\r\n");
        // Terminator line is protected
        assert_eq!(dot_stuff(b"a\r\n.\r\n"), b"a\r\n..\r\n");
    }

    #[test]
    fn test_dot_stuff_appends_final_crlf() {
        assert_eq!(dot_stuff(b"no newline"), b"no newline\r\n");
    }

    #[tokio::test]
    async fn test_read_reply_multiline() {
        let input: &[u8] = b"250-first\r\n250-second\r\n250 done\r\n";
        let mut reader = BufReader::new(input);
        let (code, text) = read_reply(&mut reader).await.unwrap();
        assert_eq!(code, 250);
        assert_eq!(text, "done");
    }

    #[tokio::test]
    async fn test_read_reply_single() {
        let input: &[u8] = b"220 mail.example.com ready\r\n";
        let mut reader = BufReader::new(input);
        let (code, text) = read_reply(&mut reader).await.unwrap();
        assert_eq!(code, 220);
        assert_eq!(text, "mail.example.com ready");
    }

    #[tokio::test]
    async fn test_read_reply_closed_connection() {
        let input: &[u8] = b"";
        let mut reader = BufReader::new(input);
        assert!(matches!(
            read_reply(&mut reader).await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_read_reply_garbage() {
        let input: &[u8] = b"not a reply\r\n";
        let mut reader = BufReader::new(input);
        assert!(matches!(
            read_reply(&mut reader).await,
            Err(Error::InvalidResponse(_))
        ));
    }
}
