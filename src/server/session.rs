//! Per-connection NNTP session
//!
//! Greets the client, then reads and dispatches one command per line until
//! QUIT, disconnect, idle timeout or process shutdown. All storage and
//! posting work goes through the [`Backend`] trait.

use crate::error::{Error, Result};
use crate::server::backend::Backend;
use crate::server::proto::{self, ArticleRef, Command, ListKeyword, codes};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Idle client timeout; a session silent this long is closed
const COMMAND_TIMEOUT: Duration = Duration::from_secs(600);

/// Timeout for each line of an article being posted
const POST_LINE_TIMEOUT: Duration = Duration::from_secs(60);

/// Upper bound on a posted article
const MAX_POST_SIZE: usize = 8 * 1024 * 1024;

/// Whether the command loop keeps going
enum LoopAction {
    Continue,
    Quit,
}

/// One client connection
///
/// Generic over the transport so sessions can be driven over any duplex
/// stream, not just sockets.
pub struct Session<S> {
    stream: BufReader<S>,
    backend: Arc<dyn Backend>,
    current_group: Option<String>,
    pending_user: Option<String>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Session<S> {
    /// Session over an accepted connection
    pub fn new(stream: S, backend: Arc<dyn Backend>) -> Self {
        Self {
            stream: BufReader::new(stream),
            backend,
            current_group: None,
            pending_user: None,
        }
    }

    /// Serve the connection until it ends
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        self.write_status(codes::READY_POSTING_ALLOWED, "newsmill ready - posting allowed")
            .await?;

        loop {
            let line = {
                let read = read_command_line(&mut self.stream);
                tokio::select! {
                    _ = cancel.cancelled() => None,
                    line = read => Some(line),
                }
            };
            let Some(line) = line else {
                debug!("session closing on shutdown");
                break;
            };
            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(Error::Timeout) => {
                    debug!("session idle timeout");
                    break;
                }
                Err(err) => return Err(err),
            };

            match self.dispatch(&line).await? {
                LoopAction::Continue => {}
                LoopAction::Quit => break,
            }
        }
        Ok(())
    }

    async fn dispatch(&mut self, line: &str) -> Result<LoopAction> {
        match proto::parse_command(line) {
            Command::Capabilities => {
                self.write_status(codes::CAPABILITY_LIST, "Capability list:")
                    .await?;
                self.write_lines(&[
                    "VERSION 2",
                    "READER",
                    "POST",
                    "AUTHINFO USER",
                    "LIST ACTIVE NEWSGROUPS",
                    "IMPLEMENTATION newsmill",
                ])
                .await?;
            }
            Command::ModeReader => {
                self.write_status(codes::READY_POSTING_ALLOWED, "Posting allowed")
                    .await?;
            }
            Command::AuthinfoUser(user) => {
                self.pending_user = Some(user);
                self.write_status(codes::AUTH_CONTINUE, "Enter password")
                    .await?;
            }
            Command::AuthinfoPass(pass) => match self.pending_user.take() {
                Some(user) => {
                    self.backend.authenticate(&user, &pass).await?;
                    self.write_status(codes::AUTH_ACCEPTED, "Authentication accepted")
                        .await?;
                }
                None => {
                    self.write_status(codes::AUTH_OUT_OF_SEQUENCE, "AUTHINFO USER first")
                        .await?;
                }
            },
            Command::List(keyword) => self.handle_list(keyword).await?,
            Command::Group(name) => self.handle_group(&name).await?,
            Command::Article(article) => self.handle_article(article).await?,
            Command::Post => self.handle_post().await?,
            Command::Quit => {
                self.write_status(codes::CLOSING_CONNECTION, "Closing connection")
                    .await?;
                return Ok(LoopAction::Quit);
            }
            Command::Syntax(verb) => {
                self.write_status(codes::COMMAND_SYNTAX_ERROR, &format!("Bad {} syntax", verb))
                    .await?;
            }
            Command::Unknown(_) => {
                self.write_status(codes::COMMAND_NOT_RECOGNIZED, "Command not recognized")
                    .await?;
            }
        }
        Ok(LoopAction::Continue)
    }

    async fn handle_list(&mut self, keyword: ListKeyword) -> Result<()> {
        let groups = match self.backend.list_groups(None).await {
            Ok(groups) => groups,
            Err(err) => {
                warn!("LIST failed: {}", err);
                return self
                    .write_status(codes::INTERNAL_FAULT, "internal fault")
                    .await;
            }
        };

        self.write_status(codes::LIST_INFORMATION_FOLLOWS, "Newsgroups follow")
            .await?;
        for group in &groups {
            let line = match keyword {
                ListKeyword::Active => {
                    format!("{} {} {} y", group.name, group.high, group.low)
                }
                ListKeyword::Newsgroups => format!("{}\t{}", group.name, group.description),
            };
            self.write_line(&line).await?;
        }
        self.write_line(".").await?;
        self.flush().await
    }

    async fn handle_group(&mut self, name: &str) -> Result<()> {
        match self.backend.group(name).await {
            Ok(group) => {
                self.current_group = Some(group.name.clone());
                let message =
                    format!("{} {} {} {}", group.count, group.low, group.high, group.name);
                self.write_status(codes::GROUP_SELECTED, &message).await
            }
            Err(Error::NoSuchGroup(_)) => {
                self.write_status(codes::NO_SUCH_GROUP, "No such newsgroup")
                    .await
            }
            Err(err) => {
                warn!("GROUP {} failed: {}", name, err);
                self.write_status(codes::INTERNAL_FAULT, "internal fault")
                    .await
            }
        }
    }

    async fn handle_article(&mut self, article: ArticleRef) -> Result<()> {
        let Some(group) = self.current_group.clone() else {
            return self
                .write_status(codes::NO_GROUP_SELECTED, "No newsgroup selected")
                .await;
        };

        let looked_up = match &article {
            ArticleRef::Number(number) => self
                .backend
                .article_by_number(&group, *number)
                .await
                .map(|(data, msgid)| (data, *number, msgid)),
            ArticleRef::MessageId(msgid) => self
                .backend
                .article_by_message_id(&group, msgid)
                .await
                .map(|(data, number)| (data, number, msgid.clone())),
        };

        match looked_up {
            Ok((data, number, msgid)) => {
                self.write_status(
                    codes::ARTICLE_FOLLOWS,
                    &format!("{} {} article", number, msgid),
                )
                .await?;
                self.stream.write_all(&proto::dot_stuff_block(&data)).await?;
                self.write_line(".").await?;
                self.flush().await
            }
            Err(Error::NoSuchGroup(_)) => {
                self.current_group = None;
                self.write_status(codes::NO_SUCH_GROUP, "No such newsgroup")
                    .await
            }
            Err(Error::InvalidArticleNumber) => {
                self.write_status(codes::NO_SUCH_ARTICLE_NUMBER, "No article with that number")
                    .await
            }
            Err(Error::InvalidMessageId) => {
                self.write_status(codes::NO_SUCH_ARTICLE_ID, "No article with that message-id")
                    .await
            }
            Err(err) => {
                warn!("ARTICLE in {} failed: {}", group, err);
                self.write_status(codes::INTERNAL_FAULT, "internal fault")
                    .await
            }
        }
    }

    async fn handle_post(&mut self) -> Result<()> {
        self.write_status(
            codes::SEND_ARTICLE,
            "Send article to be posted. End with <CR-LF>.<CR-LF>",
        )
        .await?;

        let raw = match self.read_article_body().await {
            Ok(raw) => raw,
            Err(Error::PostingFailed(reason)) => {
                return self.write_status(codes::POSTING_FAILED, &reason).await;
            }
            Err(err) => return Err(err),
        };

        match self.backend.post(&raw).await {
            Ok(()) => {
                self.write_status(codes::ARTICLE_POSTED, "Article received OK")
                    .await
            }
            Err(err) => {
                // DeliveryFailed, PostingFailed and storage faults all
                // surface as a failed posting attempt
                warn!("posting failed: {}", err);
                self.write_status(codes::POSTING_FAILED, &format!("Posting failed: {}", err))
                    .await
            }
        }
    }

    /// Read a dot-terminated article, removing dot-stuffing
    async fn read_article_body(&mut self) -> Result<Vec<u8>> {
        let mut raw = Vec::new();
        let mut oversize = false;
        loop {
            let mut line = String::new();
            let n = timeout(POST_LINE_TIMEOUT, self.stream.read_line(&mut line))
                .await
                .map_err(|_| Error::Timeout)??;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            let trimmed = line.trim_end_matches(['\r', '\n']);
            if trimmed == "." {
                break;
            }
            if raw.len() > MAX_POST_SIZE {
                // Keep consuming until the terminator, then reject
                oversize = true;
                continue;
            }
            raw.extend_from_slice(proto::strip_byte_stuffing(trimmed).as_bytes());
            raw.extend_from_slice(b"\r\n");
        }
        if oversize {
            return Err(Error::PostingFailed("Article too large".to_string()));
        }
        Ok(raw)
    }

    async fn write_status(&mut self, code: u16, message: &str) -> Result<()> {
        self.stream
            .write_all(proto::format_status(code, message).as_bytes())
            .await?;
        self.flush().await
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.write_all(b"\r\n").await?;
        Ok(())
    }

    async fn write_lines(&mut self, lines: &[&str]) -> Result<()> {
        for line in lines {
            self.write_line(line).await?;
        }
        self.write_line(".").await?;
        self.flush().await
    }

    async fn flush(&mut self) -> Result<()> {
        self.stream.flush().await?;
        Ok(())
    }
}

/// Read one command line; `Ok(None)` means the peer disconnected
async fn read_command_line<S: AsyncBufRead + Unpin>(stream: &mut S) -> Result<Option<String>> {
    let mut line = String::new();
    let n = timeout(COMMAND_TIMEOUT, stream.read_line(&mut line))
        .await
        .map_err(|_| Error::Timeout)??;
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end().to_string()))
}
