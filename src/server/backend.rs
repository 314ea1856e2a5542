//! Backend capability surface and the posting pipeline
//!
//! The protocol session drives the service exclusively through the
//! [`Backend`] trait: group listing and lookup, article retrieval by number
//! or message-id, posting, and (always-allowed) authentication.
//! [`StoreBackend`] implements it over the two stores and the outbound
//! notifier.

use crate::error::{Error, Result};
use crate::mailer::Notifier;
use crate::message::{self, PostHeaders};
use crate::store::{ArticleStore, Group};
use crate::validations::ValidationStore;
use async_trait::async_trait;
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, info};

/// Capability surface consumed by the protocol layer
#[async_trait]
pub trait Backend: Send + Sync {
    /// Enumerate groups, bounded by `max` when given
    async fn list_groups(&self, max: Option<usize>) -> Result<Vec<Group>>;

    /// Look up one group
    ///
    /// # Errors
    ///
    /// [`Error::NoSuchGroup`] when the name was never posted to.
    async fn group(&self, name: &str) -> Result<Group>;

    /// Article content and message-id for a `(group, number)` slot
    ///
    /// # Errors
    ///
    /// [`Error::NoSuchGroup`] for an unknown group,
    /// [`Error::InvalidArticleNumber`] for a number with no entry.
    async fn article_by_number(&self, group: &str, number: i64) -> Result<(Vec<u8>, String)>;

    /// Article content and number for a `(group, message-id)` pair
    ///
    /// # Errors
    ///
    /// [`Error::NoSuchGroup`] for an unknown group,
    /// [`Error::InvalidMessageId`] for a message-id with no entry.
    async fn article_by_message_id(&self, group: &str, msgid: &str) -> Result<(Vec<u8>, i64)>;

    /// Run the posting pipeline on a raw article
    ///
    /// # Errors
    ///
    /// [`Error::PostingFailed`] for unusable articles or per-group commit
    /// failures, [`Error::DeliveryFailed`] when the confirmation mail could
    /// not be sent (the article is not committed in that case).
    async fn post(&self, raw: &[u8]) -> Result<()>;

    /// Check credentials; this design enforces no real authorization
    async fn authenticate(&self, user: &str, pass: &str) -> Result<()>;
}

/// Backend over the article store, validation store and notifier
pub struct StoreBackend {
    articles: Arc<ArticleStore>,
    validations: Arc<ValidationStore>,
    notifier: Arc<dyn Notifier>,
}

impl StoreBackend {
    /// Wire the stores and the notifier together
    pub fn new(
        articles: Arc<ArticleStore>,
        validations: Arc<ValidationStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            articles,
            validations,
            notifier,
        }
    }
}

#[async_trait]
impl Backend for StoreBackend {
    async fn list_groups(&self, max: Option<usize>) -> Result<Vec<Group>> {
        let mut groups = self.articles.list_groups()?;
        if let Some(max) = max {
            groups.truncate(max);
        }
        Ok(groups)
    }

    async fn group(&self, name: &str) -> Result<Group> {
        self.articles.get_group(name)
    }

    async fn article_by_number(&self, group: &str, number: i64) -> Result<(Vec<u8>, String)> {
        match self.articles.get_article_by_number(group, number)? {
            Some((mut content, msgid)) => {
                let mut data = Vec::new();
                content.read_to_end(&mut data)?;
                Ok((data, msgid))
            }
            None => Err(Error::InvalidArticleNumber),
        }
    }

    async fn article_by_message_id(&self, group: &str, msgid: &str) -> Result<(Vec<u8>, i64)> {
        match self.articles.get_article_by_message_id(group, msgid)? {
            Some((mut content, number)) => {
                let mut data = Vec::new();
                content.read_to_end(&mut data)?;
                Ok((data, number))
            }
            None => Err(Error::InvalidMessageId),
        }
    }

    async fn post(&self, raw: &[u8]) -> Result<()> {
        let headers = PostHeaders::parse(raw);

        let groups = headers.newsgroups.clone();
        if groups.is_empty() {
            return Err(Error::PostingFailed(
                "Newsgroups header absent".to_string(),
            ));
        }
        for name in &groups {
            message::validate_newsgroup_name(name)
                .map_err(|err| Error::PostingFailed(err.to_string()))?;
        }

        let message_id = match headers.message_id {
            Some(id) => {
                message::validate_message_id(&id)
                    .map_err(|err| Error::PostingFailed(err.to_string()))?;
                id
            }
            None => {
                let generated = format!("<{}@newsmill>", uuid::Uuid::new_v4());
                debug!("article without Message-ID, generated {}", generated);
                generated
            }
        };

        let sender = headers.from_address().ok_or_else(|| {
            Error::PostingFailed("no sender address in From header".to_string())
        })?;

        // Identity check: issue a token and notify the claimed sender.
        // A failed delivery aborts the post before anything is committed.
        let token = self.validations.generate_token(&sender)?;
        self.notifier.send_confirmation(&sender, &token).await?;

        let outcome = self.articles.post(&groups, &message_id, raw)?;
        if !outcome.failed.is_empty() {
            let failed: Vec<&str> = outcome.failed.iter().map(|(g, _)| g.as_str()).collect();
            return Err(Error::PostingFailed(format!(
                "posting failed for groups: {}",
                failed.join(", ")
            )));
        }

        info!(
            "accepted {} from {} into {} group(s)",
            message_id,
            sender,
            outcome.committed.len()
        );
        Ok(())
    }

    async fn authenticate(&self, user: &str, _pass: &str) -> Result<()> {
        debug!("authenticated session user {}", user);
        Ok(())
    }
}
