//! Inbound mailbox monitor
//!
//! One long-lived task for the process lifetime. The outer loop is a
//! supervised retry: any transport failure tears the session down, is
//! logged, and is followed by an immediate reconnect; only cancellation
//! ends the loop. Within a session the monitor drains queued mail, then
//! alternates between idling and fetching. Every fetched message is
//! scanned, flagged deleted and expunged whether or not it matched.

use crate::config::MailConfig;
use crate::error::Result;
use crate::mailer::imap::ImapClient;
use crate::mailer::scan;
use crate::validations::ValidationStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Bound on the LOGOUT exchange at shutdown; past it the transport is
/// dropped anyway
const LOGOUT_TIMEOUT: Duration = Duration::from_secs(1);

/// Supervised IMAP monitor feeding confirmations to the Validation Store
pub struct InboundMonitor {
    config: Arc<MailConfig>,
    validations: Arc<ValidationStore>,
}

impl InboundMonitor {
    /// Monitor for the configured mailbox
    pub fn new(config: Arc<MailConfig>, validations: Arc<ValidationStore>) -> Self {
        Self {
            config,
            validations,
        }
    }

    /// Run until cancelled, reconnecting through every transport failure
    pub async fn run(self, cancel: CancellationToken) {
        let mut first = true;
        while !cancel.is_cancelled() {
            if !first {
                info!("reconnecting IMAP...");
            }
            first = false;

            match ImapClient::connect(&self.config).await {
                Ok(client) => {
                    if let Err(err) = self.session(client, &cancel).await {
                        error!("IMAP session error: {}", err);
                    }
                }
                Err(err) => {
                    error!("IMAP connect error: {}", err);
                    // Don't hot-loop against a dead server while still
                    // reacting promptly to cancellation
                    let _ = timeout(Duration::from_secs(1), cancel.cancelled()).await;
                }
            }
        }
        info!("stopped IMAP monitor");
    }

    /// One connected session: drain, then idle/fetch until failure or cancel
    async fn session(&self, mut client: ImapClient, cancel: &CancellationToken) -> Result<()> {
        let result = self.session_loop(&mut client, cancel).await;

        debug!("disconnecting IMAP...");
        match timeout(LOGOUT_TIMEOUT, client.logout()).await {
            Ok(Ok(())) => debug!("IMAP logged out"),
            Ok(Err(err)) => warn!("IMAP logout failed: {}", err),
            Err(_) => warn!("IMAP logout timed out, closing transport"),
        }
        result
    }

    async fn session_loop(&self, client: &mut ImapClient, cancel: &CancellationToken) -> Result<()> {
        // Mail that queued up while we were away is handled before idling
        let mut pending = client.select_inbox().await?;

        while !cancel.is_cancelled() {
            if pending > 0 {
                self.drain(client, pending).await?;
            }
            pending = 0;

            let update = if client.idle_supported() {
                client.idle(cancel).await?
            } else {
                let interval = self.config.poll_interval;
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                client.noop().await?
            };
            if let Some(count) = update {
                pending = count;
            }
        }
        Ok(())
    }

    /// Fetch, scan, flag and expunge one batch
    async fn drain(&self, client: &mut ImapClient, count: u32) -> Result<()> {
        let messages = client.fetch_all(count).await?;
        debug!("IMAP received {} message(s)", messages.len());

        for raw in &messages {
            match scan::scan_message(raw) {
                Some(confirmation) => {
                    info!(
                        "IMAP received validation for {} with token",
                        confirmation.email
                    );
                    if let Err(err) = self
                        .validations
                        .received_token(&confirmation.email, &confirmation.token)
                    {
                        // Unmatched confirmations are discarded, not retried
                        warn!("confirmation rejected for {}: {}", confirmation.email, err);
                    }
                }
                None => debug!("discarding message without confirmation"),
            }
        }

        // The whole batch is deleted regardless of matches
        client.mark_all_deleted(count).await?;
        client.expunge().await?;
        Ok(())
    }
}
