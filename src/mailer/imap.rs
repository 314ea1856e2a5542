//! Inbound mailbox client (IMAP4rev1 subset)
//!
//! Speaks just enough IMAP for the monitor: STARTTLS, LOGIN, SELECT,
//! FETCH with literal parsing, STORE of the `\Deleted` flag, EXPUNGE,
//! IDLE (RFC 2177) and LOGOUT. Commands are tagged `a1`, `a2`, ...;
//! untagged `*` lines are collected per command.

use crate::config::MailConfig;
use crate::error::{Error, Result};
use crate::mailer::tls;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum continuous IDLE suspension; the RFC 2177 advice is to re-issue
/// the command before the server's 30-minute autologout
const IDLE_MAX: Duration = Duration::from_secs(29 * 60);

/// Authenticated IMAP session owning its transport exclusively
pub(crate) struct ImapClient {
    stream: BufReader<TlsStream<TcpStream>>,
    tag_seq: u32,
    idle_supported: bool,
}

impl ImapClient {
    /// Connect, upgrade to TLS, authenticate and probe capabilities
    pub async fn connect(config: &MailConfig) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.imap_port);
        debug!("connecting to IMAP server {}", addr);

        let tcp = timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| Error::Timeout)??;
        tcp.set_nodelay(true)?;

        let mut plain = BufReader::new(tcp);
        let greeting = read_raw_line(&mut plain).await?;
        if !greeting.starts_with("* OK") {
            return Err(Error::InvalidResponse(greeting));
        }

        // STARTTLS before anything sensitive crosses the wire
        plain.write_all(b"a0 STARTTLS\r\n").await?;
        plain.flush().await?;
        loop {
            let line = read_raw_line(&mut plain).await?;
            if is_tagged("a0", &line) {
                if !line[3..].trim_start().starts_with("OK") {
                    return Err(Error::Tls(format!("STARTTLS refused: {}", line)));
                }
                break;
            }
        }

        let tls_stream =
            tls::upgrade(plain.into_inner(), &config.host, config.allow_insecure_tls).await?;
        debug!("IMAP TLS established");

        let mut client = Self {
            stream: BufReader::new(tls_stream),
            tag_seq: 0,
            idle_supported: false,
        };

        let caps = client.run_command("CAPABILITY").await?;
        client.idle_supported = caps.iter().any(|line| {
            line.split_whitespace()
                .any(|word| word.eq_ignore_ascii_case("IDLE"))
        });
        if !client.idle_supported {
            warn!("IMAP server does not advertise IDLE, falling back to polling");
        }

        let login = format!(
            "LOGIN {} {}",
            quote(config.username()),
            quote(&config.load_password()?)
        );
        client
            .run_command(&login)
            .await
            .map_err(|err| Error::AuthFailed(err.to_string()))?;
        debug!("IMAP logged in as {}", config.username());

        Ok(client)
    }

    /// Whether the server supports IDLE
    pub fn idle_supported(&self) -> bool {
        self.idle_supported
    }

    /// Select INBOX, returning the message count
    pub async fn select_inbox(&mut self) -> Result<u32> {
        let untagged = self.run_command("SELECT INBOX").await?;
        Ok(untagged
            .iter()
            .find_map(|line| parse_exists(line))
            .unwrap_or(0))
    }

    /// Fetch every message in `1:count` as raw bytes
    pub async fn fetch_all(&mut self, count: u32) -> Result<Vec<Vec<u8>>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        debug!("fetching messages 1:{}", count);

        let tag = self.next_tag();
        self.send_line(&format!("{} FETCH 1:{} (BODY[])", tag, count))
            .await?;

        let mut messages = Vec::new();
        loop {
            let line = self.read_line().await?;
            if is_tagged(&tag, &line) {
                check_tagged_ok(&tag, &line, "FETCH")?;
                break;
            }
            if line.starts_with("* ") && line.contains("FETCH") {
                let Some(size) = literal_size(&line) else {
                    continue;
                };
                let mut body = vec![0u8; size];
                timeout(RESPONSE_TIMEOUT, self.stream.read_exact(&mut body))
                    .await
                    .map_err(|_| Error::Timeout)??;
                messages.push(body);

                // Consume the remainder of the FETCH response
                loop {
                    let rest = self.read_line().await?;
                    if rest == ")" || is_tagged(&tag, &rest) {
                        if is_tagged(&tag, &rest) {
                            check_tagged_ok(&tag, &rest, "FETCH")?;
                            return Ok(messages);
                        }
                        break;
                    }
                }
            }
        }
        Ok(messages)
    }

    /// Flag messages `1:count` as deleted
    pub async fn mark_all_deleted(&mut self, count: u32) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        self.run_command(&format!("STORE 1:{} +FLAGS.SILENT (\\Deleted)", count))
            .await?;
        Ok(())
    }

    /// Compact the mailbox, removing flagged messages
    pub async fn expunge(&mut self) -> Result<()> {
        self.run_command("EXPUNGE").await?;
        Ok(())
    }

    /// Suspend until the mailbox changes, the cycle expires, or cancellation
    ///
    /// Returns `Some(count)` when an EXISTS update arrived and `None` when
    /// the cycle ended without one (timeout or cancellation). The suspension
    /// is bounded: the command is re-issued by the caller each cycle.
    pub async fn idle(&mut self, cancel: &CancellationToken) -> Result<Option<u32>> {
        let tag = self.next_tag();
        self.send_line(&format!("{} IDLE", tag)).await?;

        // Wait for the continuation; servers may emit untagged updates first
        let mut pending = None;
        loop {
            let line = self.read_line().await?;
            if line.starts_with('+') {
                break;
            }
            if is_tagged(&tag, &line) {
                return Err(Error::MailProtocol(format!("IDLE refused: {}", line)));
            }
            if let Some(count) = parse_exists(&line) {
                pending = Some(count);
            }
        }
        if pending.is_some() {
            return self.finish_idle(&tag, pending).await;
        }

        trace!("IMAP idling");
        let expiry = tokio::time::Instant::now() + IDLE_MAX;
        loop {
            // Resolve the wait first so the stream borrow ends before the
            // DONE/drain exchange below needs it again
            let event = tokio::select! {
                _ = cancel.cancelled() => None,
                _ = tokio::time::sleep_until(expiry) => None,
                line = read_raw_line(&mut self.stream) => Some(line?),
            };
            let Some(line) = event else {
                return self.finish_idle(&tag, None).await;
            };
            if let Some(count) = parse_exists(&line) {
                debug!("IMAP mailbox update, {} messages", count);
                return self.finish_idle(&tag, Some(count)).await;
            }
            if line.starts_with("* BYE") {
                return Err(Error::ConnectionClosed);
            }
        }
    }

    /// Poll for changes when IDLE is unsupported
    pub async fn noop(&mut self) -> Result<Option<u32>> {
        let untagged = self.run_command("NOOP").await?;
        Ok(untagged.iter().find_map(|line| parse_exists(line)))
    }

    /// Terminate the session; the caller bounds this with a timeout
    pub async fn logout(&mut self) -> Result<()> {
        self.run_command("LOGOUT").await?;
        Ok(())
    }

    /// End an IDLE cycle and drain up to the tagged completion
    async fn finish_idle(&mut self, tag: &str, found: Option<u32>) -> Result<Option<u32>> {
        self.send_line("DONE").await?;
        let mut found = found;
        loop {
            let line = self.read_line().await?;
            if is_tagged(tag, &line) {
                check_tagged_ok(tag, &line, "IDLE")?;
                return Ok(found);
            }
            if let Some(count) = parse_exists(&line) {
                found = Some(count);
            }
        }
    }

    /// Run one tagged command, collecting untagged lines until completion
    async fn run_command(&mut self, command: &str) -> Result<Vec<String>> {
        let tag = self.next_tag();
        self.send_line(&format!("{} {}", tag, command)).await?;

        let mut untagged = Vec::new();
        loop {
            let line = self.read_line().await?;
            if is_tagged(&tag, &line) {
                let verb = command.split_whitespace().next().unwrap_or(command);
                check_tagged_ok(&tag, &line, verb)?;
                return Ok(untagged);
            }
            untagged.push(line);
        }
    }

    fn next_tag(&mut self) -> String {
        self.tag_seq += 1;
        format!("a{}", self.tag_seq)
    }

    async fn send_line(&mut self, line: &str) -> Result<()> {
        trace!("imap >: {}", line.split_whitespace().take(2).collect::<Vec<_>>().join(" "));
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.write_all(b"\r\n").await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String> {
        timeout(RESPONSE_TIMEOUT, read_raw_line(&mut self.stream))
            .await
            .map_err(|_| Error::Timeout)?
    }
}

/// Read one CRLF-terminated line without a timeout bound
async fn read_raw_line<S: AsyncBufRead + Unpin>(stream: &mut S) -> Result<String> {
    let mut line = String::new();
    let n = stream.read_line(&mut line).await?;
    if n == 0 {
        return Err(Error::ConnectionClosed);
    }
    let line = line.trim_end().to_string();
    trace!("imap <: {}", line);
    Ok(line)
}

/// `<tag> OK ...` succeeds; NO/BAD fail
fn check_tagged_ok(tag: &str, line: &str, verb: &str) -> Result<()> {
    let status = line[tag.len()..].trim_start();
    if status.starts_with("OK") {
        return Ok(());
    }
    Err(Error::MailProtocol(format!("{} failed: {}", verb, status)))
}

fn is_tagged(tag: &str, line: &str) -> bool {
    line.starts_with(tag) && line.as_bytes().get(tag.len()) == Some(&b' ')
}

/// Parse `* <n> EXISTS`
fn parse_exists(line: &str) -> Option<u32> {
    let mut words = line.split_whitespace();
    if words.next() != Some("*") {
        return None;
    }
    let count: u32 = words.next()?.parse().ok()?;
    words
        .next()
        .filter(|w| w.eq_ignore_ascii_case("EXISTS"))
        .map(|_| count)
}

/// Quote a LOGIN argument, escaping backslashes and double quotes
fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}

/// Trailing `{N}` literal announcement on a FETCH line
fn literal_size(line: &str) -> Option<usize> {
    let line = line.trim_end();
    if !line.ends_with('}') {
        return None;
    }
    let open = line.rfind('{')?;
    line[open + 1..line.len() - 1].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_exists() {
        assert_eq!(parse_exists("* 12 EXISTS"), Some(12));
        assert_eq!(parse_exists("* 0 exists"), Some(0));
        assert_eq!(parse_exists("* 12 RECENT"), None);
        assert_eq!(parse_exists("a1 OK done"), None);
        assert_eq!(parse_exists("* CAPABILITY IMAP4rev1"), None);
    }

    #[test]
    fn test_is_tagged() {
        assert!(is_tagged("a1", "a1 OK done"));
        assert!(!is_tagged("a1", "a10 OK done"));
        assert!(!is_tagged("a1", "* 1 EXISTS"));
    }

    #[test]
    fn test_literal_size() {
        assert_eq!(literal_size("* 1 FETCH (BODY[] {42}"), Some(42));
        assert_eq!(literal_size("* 1 FETCH (BODY[] NIL)"), None);
        assert_eq!(literal_size("* 1 FETCH (BODY[] {bad}"), None);
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("plain"), "\"plain\"");
        assert_eq!(quote("pa\"ss"), "\"pa\\\"ss\"");
        assert_eq!(quote("back\\slash"), "\"back\\\\slash\"");
    }

    #[test]
    fn test_check_tagged_ok() {
        assert!(check_tagged_ok("a1", "a1 OK done", "SELECT").is_ok());
        assert!(check_tagged_ok("a1", "a1 NO denied", "SELECT").is_err());
        assert!(check_tagged_ok("a1", "a1 BAD syntax", "SELECT").is_err());
    }
}
