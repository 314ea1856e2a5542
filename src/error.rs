//! Error types for the article service

use thiserror::Error;

/// Storage, mail transport and protocol errors
#[derive(Error, Debug)]
pub enum Error {
    /// IO error during network or blob operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS error during secure session establishment
    #[error("TLS error: {0}")]
    Tls(String),

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,

    /// Unparseable response from a mail server
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Mail server rejected a command
    #[error("Mail protocol error: {0}")]
    MailProtocol(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// No such newsgroup
    #[error("No such group: {0}")]
    NoSuchGroup(String),

    /// No article with that number
    #[error("Invalid article number")]
    InvalidArticleNumber,

    /// No article with that message-id
    #[error("Invalid message-id")]
    InvalidMessageId,

    /// Posting failed
    #[error("Posting failed: {0}")]
    PostingFailed(String),

    /// A posted message is missing required headers or malformed
    #[error("Malformed article: {0}")]
    MalformedArticle(String),

    /// Embedded index unreadable or unwritable
    #[error("Storage unavailable: {0}")]
    Storage(String),

    /// Outbound confirmation could not be delivered
    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    /// A stored key does not carry the expected prefix
    #[error("Mismatched key prefix")]
    PrefixMismatch,

    /// A confirmation token was never issued or is already consumed
    #[error("Unknown validation token")]
    UnknownToken,

    /// A confirmation token is bound to a different address
    #[error("Token not issued to {0}")]
    TokenMismatch(String),

    /// Connection closed unexpectedly
    #[error("Connection closed")]
    ConnectionClosed,

    /// UTF-8 decoding error
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;
