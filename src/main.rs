//! Process entry point: flag parsing, logging setup, store opening, task
//! wiring and signal-driven shutdown.

use clap::Parser;
use newsmill::config::{DEFAULT_IMAP_PORT, DEFAULT_POLL_INTERVAL, DEFAULT_SMTP_PORT};
use newsmill::validations::sweep_loop;
use newsmill::{ArticleStore, Backend, MailConfig, Mailer, Server, StoreBackend, ValidationStore};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "newsmill", version, about = "NNTP article server with e-mail sender validation")]
struct Cli {
    /// Data directory for the article index, blobs and validation index
    #[arg(long, env = "NEWSMILL_DATA", value_name = "DIR")]
    data: PathBuf,

    /// Listen address for the NNTP server
    #[arg(long, default_value = "0.0.0.0:119", value_name = "ADDR")]
    listen_nntp: String,

    /// Mail server hostname (shared by SMTP and IMAP)
    #[arg(long, value_name = "HOST")]
    mail_host: String,

    /// SMTP submission port
    #[arg(long, default_value_t = DEFAULT_SMTP_PORT)]
    smtp_port: u16,

    /// IMAP port
    #[arg(long, default_value_t = DEFAULT_IMAP_PORT)]
    imap_port: u16,

    /// Mailbox address used as the confirmation From address
    #[arg(long, env = "NEWSMILL_MAIL_ADDRESS", value_name = "ADDR")]
    mail_address: String,

    /// Mail login name when it differs from the mailbox address
    #[arg(long, value_name = "USER")]
    mail_user: Option<String>,

    /// Mail password given inline
    #[arg(long, env = "NEWSMILL_MAIL_PASSWORD", value_name = "PASS")]
    mail_password: Option<String>,

    /// File to read the mail password from
    #[arg(long, value_name = "FILE")]
    mail_password_file: Option<PathBuf>,

    /// Accept self-signed certificates from the mail server
    #[arg(long)]
    insecure_mail_tls: bool,

    /// Log filter (e.g. "info", "newsmill=debug")
    #[arg(long, default_value = "info", value_name = "FILTER")]
    log_level: String,
}

impl Cli {
    fn mail_config(&self) -> MailConfig {
        MailConfig {
            host: self.mail_host.clone(),
            smtp_port: self.smtp_port,
            imap_port: self.imap_port,
            address: self.mail_address.clone(),
            username: self.mail_user.clone(),
            password: self.mail_password.clone(),
            password_file: self.mail_password_file.clone(),
            allow_insecure_tls: self.insecure_mail_tls,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level)
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_default();
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(err) = run(cli).await {
        error!("fatal: {}", err);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> newsmill::Result<()> {
    // Storage-open failures are the only startup errors fatal to the process
    let articles = Arc::new(ArticleStore::open(&cli.data)?);
    let validations = Arc::new(ValidationStore::open(&cli.data)?);

    let mail_config = Arc::new(cli.mail_config());
    let mailer = Arc::new(Mailer::new(mail_config.clone()));
    let backend: Arc<dyn Backend> =
        Arc::new(StoreBackend::new(articles, validations.clone(), mailer.clone()));

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let monitor = tokio::spawn(mailer.monitor(validations.clone()).run(cancel.clone()));
    let sweeper = tokio::spawn(sweep_loop(validations, cancel.clone()));

    let server = Server::new(cli.listen_nntp, backend);
    let result = server.run(cancel.clone()).await;

    // Whether the server stopped on shutdown or on a bind failure, every
    // background task is stopped and awaited before the process exits
    cancel.cancel();
    let _ = monitor.await;
    let _ = sweeper.await;

    result
}

/// Cancel the process token on SIGINT or SIGTERM
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(err) => {
                    error!("cannot install SIGTERM handler: {}", err);
                    let _ = ctrl_c.await;
                    info!("received interrupt, shutting down");
                    cancel.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = ctrl_c => info!("received interrupt, shutting down"),
                _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("received interrupt, shutting down");
        }

        cancel.cancel();
    });
}
