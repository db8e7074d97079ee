//! mTLS forwarding client for the next pipeline hop.
//!
//! Used by the hub (toward the switch) and the switch (toward the vault).
//! Transport failures are categorised into distinct kinds so callers can map
//! them to 502/503/504 without ever echoing the raw error string downstream.

use crate::api::{ApiResponse, RegisterRequest};
use crate::tls::TlsSetupError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::error::Error as _;
use std::time::Duration;
use thiserror::Error;
use tracing::error;

/// Client timeout for one outbound hop.
const HOP_TIMEOUT: Duration = Duration::from_secs(30);

/// The next hop's structured reply, relayed verbatim by the caller.
#[derive(Debug)]
pub struct UpstreamReply {
    pub status: StatusCode,
    pub body: ApiResponse,
}

/// Categorised failure of an outbound hop.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream refused the connection")]
    Refused,

    #[error("upstream timed out")]
    Timeout,

    #[error("upstream TLS or certificate failure")]
    Tls,

    #[error("upstream transport failure")]
    Transport,

    #[error("upstream returned an unparseable response")]
    BadResponse,
}

impl UpstreamError {
    /// Stable description used for the `errors_total` metric label.
    pub fn metric_label(&self) -> &'static str {
        match self {
            Self::Refused => "upstream connection refused",
            Self::Timeout => "upstream timeout",
            Self::Tls => "upstream tls failure",
            Self::Transport => "upstream transport failure",
            Self::BadResponse => "upstream bad response",
        }
    }
}

impl IntoResponse for UpstreamError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Refused => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Upstream service is unavailable. Please try again later.",
            ),
            Self::Timeout => (
                StatusCode::GATEWAY_TIMEOUT,
                "Upstream service timeout. Please try again later.",
            ),
            Self::Tls => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Security certificate validation failed. Please contact administrator.",
            ),
            Self::Transport | Self::BadResponse => (
                StatusCode::BAD_GATEWAY,
                "Unable to reach upstream service. Please try again later.",
            ),
        };
        (status, Json(ApiResponse::failure(message))).into_response()
    }
}

/// An mTLS client pinned to one upstream service.
#[derive(Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    endpoint: String,
}

impl UpstreamClient {
    /// Build a client around a preconfigured rustls config (chain validation
    /// against the private CA plus organization pinning, see [`crate::tls`]).
    pub fn new(tls: rustls::ClientConfig, endpoint: String) -> Result<Self, TlsSetupError> {
        let client = reqwest::Client::builder()
            .use_preconfigured_tls(tls)
            .timeout(HOP_TIMEOUT)
            .build()
            .map_err(|e| TlsSetupError::Config(e.to_string()))?;
        Ok(Self { client, endpoint })
    }

    /// Forward a registration request verbatim and return the structured
    /// reply. The full transport error is logged here; callers only see the
    /// category.
    pub async fn forward(&self, request: &RegisterRequest) -> Result<UpstreamReply, UpstreamError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                let kind = classify_transport_error(&e);
                error!(endpoint = %self.endpoint, error = %e, "upstream request failed");
                kind
            })?;

        let status = response.status();
        let body: ApiResponse = response.json().await.map_err(|e| {
            error!(endpoint = %self.endpoint, error = %e, "unparseable upstream response");
            UpstreamError::BadResponse
        })?;

        Ok(UpstreamReply { status, body })
    }
}

/// Walk the error source chain looking for structured causes: I/O error
/// kinds for refused/reset connections, rustls errors for TLS failures.
fn classify_transport_error(e: &reqwest::Error) -> UpstreamError {
    if e.is_timeout() {
        return UpstreamError::Timeout;
    }

    let mut source = e.source();
    while let Some(err) = source {
        if err.downcast_ref::<rustls::Error>().is_some() {
            return UpstreamError::Tls;
        }
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            // rustls surfaces handshake failures as InvalidData-wrapped
            // io::Error; unwrap one level to spot them.
            if io
                .get_ref()
                .map(|inner| inner.is::<rustls::Error>())
                .unwrap_or(false)
            {
                return UpstreamError::Tls;
            }
            return match io.kind() {
                std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted => UpstreamError::Refused,
                std::io::ErrorKind::TimedOut => UpstreamError::Timeout,
                _ => UpstreamError::Transport,
            };
        }
        source = err.source();
    }

    if e.is_connect() {
        UpstreamError::Refused
    } else {
        UpstreamError::Transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_map_to_spec_status_codes() {
        let cases = [
            (UpstreamError::Refused, StatusCode::SERVICE_UNAVAILABLE),
            (UpstreamError::Timeout, StatusCode::GATEWAY_TIMEOUT),
            (UpstreamError::Tls, StatusCode::INTERNAL_SERVER_ERROR),
            (UpstreamError::Transport, StatusCode::BAD_GATEWAY),
            (UpstreamError::BadResponse, StatusCode::BAD_GATEWAY),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn metric_labels_classify_into_closed_vocabulary() {
        use crate::metrics::classify_error_type;
        assert_eq!(
            classify_error_type(UpstreamError::Refused.metric_label()),
            "connection"
        );
        assert_eq!(
            classify_error_type(UpstreamError::Timeout.metric_label()),
            "timeout"
        );
        assert_eq!(
            classify_error_type(UpstreamError::Tls.metric_label()),
            "tls"
        );
    }
}
