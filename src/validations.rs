//! Sender validation tokens
//!
//! Every posting attempt issues an opaque random token bound to the sender's
//! e-mail address. The token travels out in a confirmation mail and comes
//! back through the inbound monitor; a confirmation is only accepted when
//! the token was actually issued to the claiming address, and a token is
//! matched at most once.

use crate::error::{Error, Result};
use crate::store::keys::{
    EMAIL_TOKEN_PREFIX, TOKEN_EMAIL_PREFIX, TOKEN_EXPIRE_PREFIX, decode_str_key, encode_str_key,
};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use rand::RngCore;
use rocksdb::{Direction, IteratorMode, Options, TransactionDB, TransactionDBOptions};
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Validation database name under the data directory
pub const VALIDATIONS_DB_NAME: &str = "validations.db";

/// Random bytes per validation token
pub const TOKEN_SIZE: usize = 32;

/// Tokens older than this many hours are garbage-collected by the sweeper
pub const TOKEN_TTL_HOURS: i64 = 48;

/// Cadence of the background expiry sweep
const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Separator inside an address's outstanding-token list
const TOKEN_SEP: &str = " ";

/// Generate a URL-safe random token of `size` random bytes
pub(crate) fn urlsafe_token(size: usize) -> String {
    let mut data = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut data);
    URL_SAFE_NO_PAD.encode(data)
}

/// Token index mapping e-mail ⇄ outstanding validation tokens
pub struct ValidationStore {
    db: TransactionDB,
}

impl ValidationStore {
    /// Open (or create) the validation index under `data_dir`
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = TransactionDB::open(
            &opts,
            &TransactionDBOptions::default(),
            data_dir.join(VALIDATIONS_DB_NAME),
        )?;

        debug!("opened validation index at {}", data_dir.display());
        Ok(Self { db })
    }

    /// Issue a fresh token for `email`
    ///
    /// The token is appended to the address's outstanding list and the
    /// reverse mapping plus issue timestamp are recorded, all in one
    /// transaction.
    pub fn generate_token(&self, email: &str) -> Result<String> {
        let token = urlsafe_token(TOKEN_SIZE);

        let txn = self.db.transaction();
        let email_key = encode_str_key(EMAIL_TOKEN_PREFIX, email);

        let mut tokens = match txn.get_for_update(&email_key, true)? {
            Some(raw) => split_token_list(&raw),
            None => Vec::new(),
        };
        tokens.push(token.clone());

        txn.put(&email_key, tokens.join(TOKEN_SEP))?;
        txn.put(encode_str_key(TOKEN_EMAIL_PREFIX, &token), email)?;
        txn.put(
            encode_str_key(TOKEN_EXPIRE_PREFIX, &token),
            Utc::now().to_rfc3339(),
        )?;
        txn.commit()?;

        debug!("issued validation token for {}", email);
        Ok(token)
    }

    /// Record an inbound confirmation of `token` for `email`
    ///
    /// The token-to-email binding is verified before the confirmation is
    /// accepted; a successful confirmation consumes the token so it can
    /// never match twice.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownToken`] when the token was never issued (or was
    /// already consumed); [`Error::TokenMismatch`] when it was issued to a
    /// different address.
    pub fn received_token(&self, email: &str, token: &str) -> Result<()> {
        let txn = self.db.transaction();

        let token_key = encode_str_key(TOKEN_EMAIL_PREFIX, token);
        let issued_to = txn
            .get_for_update(&token_key, true)?
            .ok_or(Error::UnknownToken)?;
        if issued_to != email.as_bytes() {
            return Err(Error::TokenMismatch(email.to_string()));
        }

        txn.delete(&token_key)?;
        txn.delete(encode_str_key(TOKEN_EXPIRE_PREFIX, token))?;
        remove_from_list(&txn, email, token)?;
        txn.commit()?;

        info!("confirmed sender address {}", email);
        Ok(())
    }

    /// Delete every token issued before `cutoff`
    ///
    /// Each swept token is removed from all three mappings (expiry record,
    /// reverse mapping, and the owning address's outstanding list) so the
    /// index cannot drift. Returns the number of tokens swept.
    pub fn sweep_expired(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut expired = Vec::new();
        for item in self.db.iterator(IteratorMode::From(
            TOKEN_EXPIRE_PREFIX.as_bytes(),
            Direction::Forward,
        )) {
            let (key, value) = item?;
            if !key.starts_with(TOKEN_EXPIRE_PREFIX.as_bytes()) {
                break;
            }
            let token = match decode_str_key(TOKEN_EXPIRE_PREFIX, &key) {
                Ok(token) => token,
                Err(_) => continue,
            };
            let issued = match DateTime::parse_from_rfc3339(&String::from_utf8_lossy(&value)) {
                Ok(ts) => ts.with_timezone(&Utc),
                Err(_) => {
                    warn!("token with undecodable issue time, sweeping");
                    expired.push(token);
                    continue;
                }
            };
            if issued < cutoff {
                expired.push(token);
            }
        }

        for token in &expired {
            let txn = self.db.transaction();
            let token_key = encode_str_key(TOKEN_EMAIL_PREFIX, token);
            if let Some(email) = txn.get_for_update(&token_key, true)? {
                remove_from_list(&txn, &String::from_utf8_lossy(&email), token)?;
                txn.delete(&token_key)?;
            }
            txn.delete(encode_str_key(TOKEN_EXPIRE_PREFIX, token))?;
            txn.commit()?;
        }

        if !expired.is_empty() {
            info!("swept {} expired validation tokens", expired.len());
        }
        Ok(expired.len())
    }

    /// Outstanding tokens for an address, oldest first
    pub fn outstanding_tokens(&self, email: &str) -> Result<Vec<String>> {
        match self.db.get(encode_str_key(EMAIL_TOKEN_PREFIX, email))? {
            Some(raw) => Ok(split_token_list(&raw)),
            None => Ok(Vec::new()),
        }
    }
}

impl std::fmt::Debug for ValidationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationStore").finish_non_exhaustive()
    }
}

/// Remove `token` from `email`'s outstanding list inside `txn`
fn remove_from_list(
    txn: &rocksdb::Transaction<'_, TransactionDB>,
    email: &str,
    token: &str,
) -> Result<()> {
    let email_key = encode_str_key(EMAIL_TOKEN_PREFIX, email);
    let Some(raw) = txn.get_for_update(&email_key, true)? else {
        return Ok(());
    };
    let tokens: Vec<String> = split_token_list(&raw)
        .into_iter()
        .filter(|t| t != token)
        .collect();
    if tokens.is_empty() {
        txn.delete(&email_key)?;
    } else {
        txn.put(&email_key, tokens.join(TOKEN_SEP))?;
    }
    Ok(())
}

/// Split a stored token list, dropping empty fragments
fn split_token_list(raw: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(raw)
        .split(TOKEN_SEP)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Periodic expiry sweep, cancelled with the process
pub async fn sweep_loop(store: std::sync::Arc<ValidationStore>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(SWEEP_INTERVAL) => {
                let cutoff = Utc::now() - chrono::Duration::hours(TOKEN_TTL_HOURS);
                if let Err(err) = store.sweep_expired(cutoff) {
                    warn!("token sweep failed: {}", err);
                }
            }
        }
    }
    debug!("token sweeper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urlsafe_token_length_and_charset() {
        let token = urlsafe_token(TOKEN_SIZE);
        // 32 bytes → 43 base64 characters without padding
        assert_eq!(token.len(), 43);
        assert!(
            token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn test_split_token_list_drops_empty_fragments() {
        assert_eq!(split_token_list(b"a b"), vec!["a", "b"]);
        assert_eq!(split_token_list(b" a  b "), vec!["a", "b"]);
        assert!(split_token_list(b"").is_empty());
    }
}
