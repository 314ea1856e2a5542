//! E-mail round-trip machinery
//!
//! The outbound half composes confirmation mails and submits them over
//! SMTP; the inbound half monitors the account's mailbox over IMAP and
//! feeds extracted confirmations to the Validation Store.

pub mod compose;
mod imap;
pub mod monitor;
pub mod scan;
mod smtp;
mod tls;

pub use monitor::InboundMonitor;

use crate::config::MailConfig;
use crate::error::Result;
use crate::validations::ValidationStore;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Outbound confirmation sender
///
/// The posting pipeline depends on this seam rather than on a concrete
/// transport, so tests can observe notifications without a mail server.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Compose and deliver a confirmation for `to` carrying `token`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::DeliveryFailed`] on any transport or
    /// authentication error; the posting pipeline treats that as a posting
    /// failure.
    async fn send_confirmation(&self, to: &str, token: &str) -> Result<()>;
}

/// SMTP-backed notifier bound to one mail account
pub struct Mailer {
    config: Arc<MailConfig>,
}

impl Mailer {
    /// Mailer for the configured account
    pub fn new(config: Arc<MailConfig>) -> Self {
        Self { config }
    }

    /// Spawnable monitor for the same account
    pub fn monitor(&self, validations: Arc<ValidationStore>) -> InboundMonitor {
        InboundMonitor::new(self.config.clone(), validations)
    }
}

#[async_trait]
impl Notifier for Mailer {
    async fn send_confirmation(&self, to: &str, token: &str) -> Result<()> {
        let message = compose::confirmation_mail(&self.config.address, to, token);
        smtp::send(&self.config, &message, &[to]).await?;
        debug!("sent confirmation mail to {}", to);
        Ok(())
    }
}
