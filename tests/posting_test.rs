//! Posting pipeline tests
//!
//! Drives `StoreBackend::post` with a recording notifier: the pipeline must
//! issue a token, notify the claimed sender, and only then commit the
//! article; a failed delivery aborts the post.

use async_trait::async_trait;
use newsmill::{ArticleStore, Backend, Error, Notifier, Result, StoreBackend, ValidationStore};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Records confirmations instead of speaking SMTP
#[derive(Default)]
struct StubNotifier {
    sent: Mutex<Vec<(String, String)>>,
    fail: bool,
}

#[async_trait]
impl Notifier for StubNotifier {
    async fn send_confirmation(&self, to: &str, token: &str) -> Result<()> {
        if self.fail {
            return Err(Error::DeliveryFailed("stub transport down".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), token.to_string()));
        Ok(())
    }
}

struct Fixture {
    _dir: TempDir,
    articles: Arc<ArticleStore>,
    validations: Arc<ValidationStore>,
    notifier: Arc<StubNotifier>,
    backend: StoreBackend,
}

fn fixture(failing_notifier: bool) -> Fixture {
    let dir = TempDir::new().unwrap();
    let articles = Arc::new(ArticleStore::open(dir.path()).unwrap());
    let validations = Arc::new(ValidationStore::open(dir.path()).unwrap());
    let notifier = Arc::new(StubNotifier {
        fail: failing_notifier,
        ..StubNotifier::default()
    });
    let backend = StoreBackend::new(
        articles.clone(),
        validations.clone(),
        notifier.clone(),
    );
    Fixture {
        _dir: dir,
        articles,
        validations,
        notifier,
        backend,
    }
}

const ARTICLE: &[u8] = b"From: Alice <alice@example.com>\r\n\
Newsgroups: alt.test,comp.misc\r\n\
Message-ID: <pipeline@test>\r\n\
Subject: hi\r\n\
\r\n\
article body\r\n";

#[tokio::test]
async fn test_post_commits_and_notifies() {
    let fx = fixture(false);
    fx.backend.post(ARTICLE).await.unwrap();

    // The sender got exactly one confirmation carrying an outstanding token
    let sent = fx.notifier.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    let (to, token) = &sent[0];
    assert_eq!(to, "alice@example.com");
    assert_eq!(
        fx.validations
            .outstanding_tokens("alice@example.com")
            .unwrap(),
        vec![token.clone()]
    );

    // Both groups carry the article under the supplied message-id
    for group in ["alt.test", "comp.misc"] {
        let (_, number) = fx
            .articles
            .get_article_by_message_id(group, "<pipeline@test>")
            .unwrap()
            .unwrap();
        assert_eq!(number, 1);
    }
}

#[tokio::test]
async fn test_post_without_newsgroups_fails_early() {
    let fx = fixture(false);
    let raw = b"From: alice@example.com\r\nMessage-ID: <x@y>\r\n\r\nbody\r\n";

    let err = fx.backend.post(raw).await.unwrap_err();
    assert!(matches!(err, Error::PostingFailed(_)));

    // Nothing was notified or stored
    assert!(fx.notifier.sent.lock().unwrap().is_empty());
    assert!(fx.articles.list_groups().unwrap().is_empty());
}

#[tokio::test]
async fn test_post_without_sender_fails() {
    let fx = fixture(false);
    let raw = b"Newsgroups: alt.test\r\nMessage-ID: <x@y>\r\n\r\nbody\r\n";

    let err = fx.backend.post(raw).await.unwrap_err();
    assert!(matches!(err, Error::PostingFailed(_)));
    assert!(fx.articles.list_groups().unwrap().is_empty());
}

#[tokio::test]
async fn test_post_rejects_invalid_group_name() {
    let fx = fixture(false);
    let raw = b"From: a@b\r\nNewsgroups: Not.Valid\r\nMessage-ID: <x@y>\r\n\r\nbody\r\n";

    let err = fx.backend.post(raw).await.unwrap_err();
    assert!(matches!(err, Error::PostingFailed(_)));
}

#[tokio::test]
async fn test_delivery_failure_aborts_commit() {
    let fx = fixture(true);

    let err = fx.backend.post(ARTICLE).await.unwrap_err();
    assert!(matches!(err, Error::DeliveryFailed(_)));

    // The article was not committed
    assert!(fx.articles.list_groups().unwrap().is_empty());
    assert!(matches!(
        fx.backend.group("alt.test").await,
        Err(Error::NoSuchGroup(_))
    ));
}

#[tokio::test]
async fn test_post_generates_message_id_when_absent() {
    let fx = fixture(false);
    let raw = b"From: a@b.example\r\nNewsgroups: alt.gen\r\nSubject: x\r\n\r\nbody\r\n";

    fx.backend.post(raw).await.unwrap();

    let (_, msgid) = fx
        .articles
        .get_article_by_number("alt.gen", 1)
        .unwrap()
        .unwrap();
    assert!(msgid.starts_with('<') && msgid.ends_with("@newsmill>"));
}

#[tokio::test]
async fn test_backend_lookup_errors() {
    let fx = fixture(false);
    fx.backend.post(ARTICLE).await.unwrap();

    assert!(matches!(
        fx.backend.article_by_number("alt.test", 99).await,
        Err(Error::InvalidArticleNumber)
    ));
    assert!(matches!(
        fx.backend.article_by_message_id("alt.test", "<nope@x>").await,
        Err(Error::InvalidMessageId)
    ));
    assert!(matches!(
        fx.backend.article_by_number("unknown.group", 1).await,
        Err(Error::NoSuchGroup(_))
    ));

    let (data, msgid) = fx.backend.article_by_number("alt.test", 1).await.unwrap();
    assert_eq!(data, ARTICLE);
    assert_eq!(msgid, "<pipeline@test>");
}
