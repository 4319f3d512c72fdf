//! TLS listener and per-connection serving.
//!
//! The listener accepts TCP, completes the rustls handshake (where the
//! revocation hook runs), extracts the peer identity from the negotiated
//! client certificate, and serves the HTTP router over the connection with
//! the identity attached as an extension. Serving each connection manually
//! is what makes the peer certificate visible to handlers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Extension;
use axum::Router;
use hyper::body::Incoming;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;
use tracing::{debug, info, warn};

use cachet_pki::PeerIdentity;

use crate::error::ServerError;
use crate::handlers::{self, AppState, ClientCert};

/// How long in-flight connections get to drain after shutdown is signalled.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// The bound relay listener.
pub struct Server {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    state: Arc<AppState>,
}

impl Server {
    pub async fn bind(
        addr: SocketAddr,
        tls: Arc<rustls::ServerConfig>,
        state: Arc<AppState>,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, acceptor: TlsAcceptor::from(tls), state })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` fires, then drain in-flight
    /// connections bounded by the grace period.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ServerError> {
        let router = handlers::router(Arc::clone(&self.state));
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (tcp, remote) = match accepted {
                        Ok(pair) => pair,
                        Err(err) => {
                            warn!(error = %err, "Accept failed");
                            continue;
                        }
                    };

                    let acceptor = self.acceptor.clone();
                    let router = router.clone();
                    connections.spawn(async move {
                        if let Err(err) = serve_connection(tcp, remote, acceptor, router).await {
                            debug!(remote = %remote, error = %err, "Connection closed with error");
                        }
                    });

                    // Reap connections that already finished.
                    while connections.try_join_next().is_some() {}
                }
                _ = shutdown.changed() => break,
            }
        }

        info!(in_flight = connections.len(), "Draining connections");
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(remaining = connections.len(), "Grace period elapsed; aborting remaining connections");
            connections.shutdown().await;
        }

        Ok(())
    }
}

async fn serve_connection(
    tcp: TcpStream,
    remote: SocketAddr,
    acceptor: TlsAcceptor,
    router: Router,
) -> Result<(), ServerError> {
    let tls = acceptor
        .accept(tcp)
        .await
        .map_err(|e| ServerError::Transport(format!("TLS handshake with {remote}: {e}")))?;

    let (_, connection) = tls.get_ref();
    let identity = match connection.peer_certificates().and_then(|certs| certs.first()) {
        Some(der) => Some(
            PeerIdentity::from_der(der.as_ref())
                .map_err(|e| ServerError::Transport(format!("peer certificate: {e}")))?,
        ),
        None => None,
    };

    match &identity {
        Some(id) => debug!(remote = %remote, serial = %id.serial, subject = %id.subject, "Client authenticated"),
        None => debug!(remote = %remote, "Unauthenticated connection (bootstrap only)"),
    }

    let app = router.layer(Extension(ClientCert(identity)));
    let service = hyper::service::service_fn(move |request: Request<Incoming>| {
        app.clone().oneshot(request)
    });

    hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
        .serve_connection_with_upgrades(TokioIo::new(tls), service)
        .await
        .map_err(|e| ServerError::Transport(e.to_string()))?;

    Ok(())
}
