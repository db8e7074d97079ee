//! TLS-terminated HTTP serving with per-connection peer identity.
//!
//! axum's plain `serve` cannot expose the client certificate, so each
//! service runs this accept loop instead: handshake, extract the peer leaf,
//! and serve the router with the identity injected as a request extension.

use crate::api::ApiResponse;
use crate::metrics::MetricsAggregator;
use crate::tls::{peer_identity_from_der, PeerIdentity};
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json, Router};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::service::TowerToHyperService;
use rustls::ServerConfig;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

/// The authenticated peer of the current connection, if the listener
/// required client certificates. Injected as a request extension on every
/// request of the connection.
#[derive(Debug, Clone)]
pub struct ConnectionPeer(pub Option<PeerIdentity>);

/// Accept TLS connections forever and serve `router` on each.
///
/// Handshake failures (bad chain, no client certificate where required) are
/// logged and the connection dropped; they never reach the HTTP layer.
pub async fn serve(
    listener: TcpListener,
    tls: Arc<ServerConfig>,
    router: Router,
) -> std::io::Result<()> {
    let acceptor = TlsAcceptor::from(tls);
    loop {
        let (tcp, remote_addr) = listener.accept().await?;
        let acceptor = acceptor.clone();
        let router = router.clone();

        tokio::spawn(async move {
            let stream = match acceptor.accept(tcp).await {
                Ok(stream) => stream,
                Err(e) => {
                    debug!(%remote_addr, error = %e, "TLS handshake failed");
                    return;
                }
            };

            let peer = stream
                .get_ref()
                .1
                .peer_certificates()
                .and_then(|certs| certs.first())
                .and_then(|der| peer_identity_from_der(der).ok());

            let service = TowerToHyperService::new(router.layer(Extension(ConnectionPeer(peer))));
            if let Err(e) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                .serve_connection_with_upgrades(TokioIo::new(stream), service)
                .await
            {
                debug!(%remote_addr, error = %e, "connection closed with error");
            }
        });
    }
}

/// Peer authentication failures surfaced at the HTTP layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// No client certificate on the connection.
    MissingCertificate,
    /// Certificate chain verified but the Subject Organization is not the
    /// expected upstream identity.
    WrongOrganization,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::MissingCertificate => {
                (StatusCode::UNAUTHORIZED, "Client certificate required.")
            }
            Self::WrongOrganization => (
                StatusCode::FORBIDDEN,
                "Client certificate not authorized for this service.",
            ),
        };
        (status, Json(ApiResponse::failure(message))).into_response()
    }
}

/// State for [`require_peer_org`].
#[derive(Clone)]
pub struct OrgPolicy {
    pub expected_org: Arc<str>,
}

impl OrgPolicy {
    pub fn new(expected_org: &str) -> Self {
        Self {
            expected_org: Arc::from(expected_org),
        }
    }
}

/// Middleware enforcing organization pinning on the inbound peer.
///
/// Every accepted and rejected peer is audit-logged by identity (CN, O,
/// serial); the request payload is never read here, so a rejection happens
/// before any body bytes are consumed.
pub async fn require_peer_org(
    State(policy): State<OrgPolicy>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let peer = request
        .extensions()
        .get::<ConnectionPeer>()
        .and_then(|p| p.0.clone());

    match peer {
        None => {
            warn!("audit: rejected connection without client certificate");
            Err(AuthError::MissingCertificate)
        }
        Some(identity) if identity.organization != *policy.expected_org => {
            warn!(peer = %identity, expected = %policy.expected_org,
                "audit: rejected peer with wrong organization");
            Err(AuthError::WrongOrganization)
        }
        Some(identity) => {
            info!(peer = %identity, "audit: accepted mTLS peer");
            Ok(next.run(request).await)
        }
    }
}

/// Decrements the active-connection gauge when dropped, so the gauge stays
/// accurate on every exit path including panics unwinding through a handler.
struct ActiveConnectionGuard(Arc<MetricsAggregator>);

impl Drop for ActiveConnectionGuard {
    fn drop(&mut self) {
        self.0.update_active_connections(-1);
    }
}

/// Middleware recording request counters, latency, and the active-connection
/// gauge. Only the method, normalised path, and status class are recorded --
/// never request content.
pub async fn track_requests(
    State(aggregator): State<Arc<MetricsAggregator>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    aggregator.update_active_connections(1);
    let _guard = ActiveConnectionGuard(aggregator.clone());

    let start = Instant::now();
    let response = next.run(request).await;
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

    aggregator.increment_request(&method, &path, response.status().as_u16());
    aggregator.record_duration_ms(elapsed_ms);

    response
}
