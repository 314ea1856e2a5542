#![doc = include_str!("../README.md")]

/// Mail account configuration
pub mod config;
mod error;
/// Outbound confirmation mails and the inbound mailbox monitor
pub mod mailer;
/// Message header parsing and validation
pub mod message;
/// NNTP listener, sessions and the backend capability surface
pub mod server;
/// Content-addressed article storage with per-group indices
pub mod store;
/// Sender validation tokens
pub mod validations;

pub use config::MailConfig;
pub use error::{Error, Result};
pub use mailer::{InboundMonitor, Mailer, Notifier};
pub use server::{Backend, Server, Session, StoreBackend};
pub use store::{ArticleStore, Group, PostOutcome, PostedArticle};
pub use validations::ValidationStore;
