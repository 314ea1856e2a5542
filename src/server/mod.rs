//! NNTP listener
//!
//! Accepts connections and runs each as an independent session task sharing
//! the backend handle. Shutdown is cooperative: cancellation stops the
//! accept loop first, then in-flight sessions are awaited before `run`
//! returns, so no task is abandoned mid-transaction.

pub mod backend;
pub mod proto;
pub mod session;

pub use backend::{Backend, StoreBackend};
pub use session::Session;

use crate::error::{Error, Result};
use session::Session;
use std::net::ToSocketAddrs;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

/// Listen backlog
const LISTEN_BACKLOG: i32 = 128;

/// NNTP server bound to one listen address
pub struct Server {
    listen_addr: String,
    backend: Arc<dyn Backend>,
}

impl Server {
    /// Server serving `backend` on `listen_addr`
    pub fn new(listen_addr: impl Into<String>, backend: Arc<dyn Backend>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            backend,
        }
    }

    /// Accept and serve connections until cancelled
    ///
    /// # Errors
    ///
    /// Returns an error when the listen address cannot be bound; accept
    /// failures afterwards are logged and survived.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let listener = bind_listener(&self.listen_addr)?;
        info!("started NNTP server on {}", self.listen_addr);

        let tracker = TaskTracker::new();
        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, peer)) => {
                    debug!("accepted connection from {}", peer);
                    if let Err(err) = stream.set_nodelay(true) {
                        debug!("set_nodelay failed for {}: {}", peer, err);
                    }
                    let backend = self.backend.clone();
                    let session_cancel = cancel.clone();
                    tracker.spawn(async move {
                        let session = Session::new(stream, backend);
                        match session.run(session_cancel).await {
                            Ok(()) => debug!("session {} closed", peer),
                            Err(err) => debug!("session {} ended: {}", peer, err),
                        }
                    });
                }
                Err(err) => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    error!("cannot accept connection: {}", err);
                }
            }
        }

        info!("closing NNTP server, waiting for client connections...");
        tracker.close();
        tracker.wait().await;
        info!("client connections closed");
        Ok(())
    }
}

/// Bind the listen socket with address reuse and a nonblocking handle
fn bind_listener(addr: &str) -> Result<TcpListener> {
    use socket2::{Domain, Protocol, Socket, Type};

    let socket_addr = addr
        .to_socket_addrs()
        .map_err(|err| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("cannot resolve listen address {}: {}", addr, err),
            ))
        })?
        .next()
        .ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("no address resolved for {}", addr),
            ))
        })?;

    let domain = if socket_addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&socket_addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    socket.set_nonblocking(true)?;

    Ok(TcpListener::from_std(socket.into())?)
}
