//! # Structured Error Types
//!
//! This module defines the closed set of error kinds produced by the
//! measurement core. Every fallible operation in `transport`, `catalog`,
//! `geo`, `latency`, `throughput`, and `config_table` returns
//! `Result<T, SpeedTestError>` so callers can match on kind rather than
//! parse messages; the façade and the CLI shell collapse this into
//! `anyhow::Result` at their boundary.

use thiserror::Error;

/// The reason a network operation did not complete.
#[derive(Debug, Error)]
pub enum NetworkErrorKind {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("protocol violation: {0}")]
    Protocol(String),
}

/// Error kinds produced by the measurement core.
///
/// Each variant corresponds to one entry in the error-handling design:
/// a network failure, an empty catalog, an unreachable candidate set, a
/// throughput measurement that moved no bytes or exceeded its failure
/// ratio, a malformed wire document, or an invalid user-supplied server.
#[derive(Debug, Error)]
pub enum SpeedTestError {
    #[error("network error against {url}: {source}")]
    NetworkError {
        url: String,
        #[source]
        source: NetworkErrorKind,
    },

    #[error("server catalog is empty")]
    CatalogEmpty,

    #[error("no candidate server was reachable")]
    NoServerReachable,

    #[error("measurement failed: {0}")]
    MeasurementFailed(String),

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("invalid server configuration: {0}")]
    ConfigError(String),
}

impl SpeedTestError {
    pub fn network(url: impl Into<String>, source: NetworkErrorKind) -> Self {
        SpeedTestError::NetworkError {
            url: url.into(),
            source,
        }
    }

    pub fn timeout(url: impl Into<String>, after: std::time::Duration) -> Self {
        SpeedTestError::NetworkError {
            url: url.into(),
            source: NetworkErrorKind::Timeout(after),
        }
    }
}

impl From<reqwest::Error> for SpeedTestError {
    fn from(err: reqwest::Error) -> Self {
        let url = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        if err.is_timeout() {
            SpeedTestError::timeout(url, std::time::Duration::default())
        } else if is_tls_error(&err) {
            SpeedTestError::network(url, NetworkErrorKind::Tls(err.to_string()))
        } else {
            SpeedTestError::network(url, NetworkErrorKind::Protocol(err.to_string()))
        }
    }
}

/// `reqwest` has no dedicated `is_tls()` predicate; a TLS handshake
/// failure surfaces as a connect error whose source chain mentions the
/// TLS layer (rustls rejecting a certificate, a name mismatch, an
/// unsupported protocol version). Walking the `source()` chain for
/// that wording is the same heuristic `reqwest`-based tools fall back
/// to absent a structured variant.
fn is_tls_error(err: &reqwest::Error) -> bool {
    err.is_connect() && error_chain_mentions_tls(err)
}

fn error_chain_mentions_tls(err: &dyn std::error::Error) -> bool {
    let mut cause = err;
    loop {
        let text = cause.to_string().to_ascii_lowercase();
        if text.contains("tls") || text.contains("certificate") {
            return true;
        }
        match cause.source() {
            Some(next) => cause = next,
            None => return false,
        }
    }
}


pub type Result<T> = std::result::Result<T, SpeedTestError>;
