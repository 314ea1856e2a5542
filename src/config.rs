//! Mail account configuration
//!
//! Both the outbound notifier (SMTP submission) and the inbound monitor
//! (IMAP) authenticate against the same account on the same mail host.

use crate::error::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Default SMTP submission port
pub const DEFAULT_SMTP_PORT: u16 = 587;

/// Default IMAP port (STARTTLS is negotiated after connecting)
pub const DEFAULT_IMAP_PORT: u16 = 143;

/// NOOP polling cadence when the server does not support IDLE
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Mail account configuration
///
/// # Example
///
/// ```
/// use newsmill::MailConfig;
///
/// let config = MailConfig::new("mail.example.com", "news@example.com", "secret");
/// assert_eq!(config.smtp_port, 587);
/// assert_eq!(config.username(), "news@example.com");
/// ```
#[must_use]
#[derive(Debug, Clone)]
pub struct MailConfig {
    /// Mail server hostname (shared by SMTP and IMAP)
    pub host: String,

    /// SMTP submission port (typically 587)
    pub smtp_port: u16,

    /// IMAP port (typically 143; the session is upgraded via STARTTLS)
    pub imap_port: u16,

    /// Mailbox address; used as the From address of confirmation mails
    /// and as the login name when `username` is unset
    pub address: String,

    /// Login name override
    pub username: Option<String>,

    /// Password given inline
    pub password: Option<String>,

    /// File to read the password from (trailing whitespace is trimmed)
    pub password_file: Option<PathBuf>,

    /// Accept self-signed certificates on STARTTLS upgrades
    ///
    /// **Security Warning:** disables certificate validation. Only use
    /// for testing or with servers you trust on a secure network.
    pub allow_insecure_tls: bool,

    /// Polling cadence for the IDLE fallback
    pub poll_interval: Duration,
}

impl MailConfig {
    /// Create a configuration with default ports and an inline password
    pub fn new(
        host: impl Into<String>,
        address: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            smtp_port: DEFAULT_SMTP_PORT,
            imap_port: DEFAULT_IMAP_PORT,
            address: address.into(),
            username: None,
            password: Some(password.into()),
            password_file: None,
            allow_insecure_tls: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// The login name: the explicit username if set, the mailbox address otherwise
    pub fn username(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.address)
    }

    /// Resolve the account password
    ///
    /// An inline password wins over a password file. Trailing whitespace
    /// read from a file is trimmed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthFailed`] when no password source is configured,
    /// or [`Error::Io`] when the password file cannot be read.
    pub fn load_password(&self) -> Result<String> {
        if let Some(pass) = &self.password {
            return Ok(pass.clone());
        }
        if let Some(path) = &self.password_file {
            let raw = std::fs::read_to_string(path)?;
            return Ok(raw.trim_end().to_string());
        }
        Err(Error::AuthFailed("no mail password configured".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_new_defaults() {
        let config = MailConfig::new("mail.example.com", "news@example.com", "pass");
        assert_eq!(config.host, "mail.example.com");
        assert_eq!(config.smtp_port, 587);
        assert_eq!(config.imap_port, 143);
        assert!(!config.allow_insecure_tls);
    }

    #[test]
    fn test_username_defaults_to_address() {
        let mut config = MailConfig::new("mail.example.com", "news@example.com", "pass");
        assert_eq!(config.username(), "news@example.com");
        config.username = Some("login".to_string());
        assert_eq!(config.username(), "login");
    }

    #[test]
    fn test_inline_password() {
        let config = MailConfig::new("mail.example.com", "news@example.com", "secret");
        assert_eq!(config.load_password().unwrap(), "secret");
    }

    #[test]
    fn test_password_file_trimmed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "from-file").unwrap();

        let mut config = MailConfig::new("mail.example.com", "news@example.com", "");
        config.password = None;
        config.password_file = Some(file.path().to_path_buf());
        assert_eq!(config.load_password().unwrap(), "from-file");
    }

    #[test]
    fn test_missing_password_is_an_error() {
        let mut config = MailConfig::new("mail.example.com", "news@example.com", "");
        config.password = None;
        assert!(config.load_password().is_err());
    }
}
