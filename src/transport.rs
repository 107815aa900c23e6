//! # HTTP/HTTPS Transport
//!
//! Exchanges a single HTTP request and response over a persistent
//! connection, with TLS negotiated transparently by scheme.
//!
//! Connection reuse across requests is delegated to `reqwest`'s
//! internal per-host pool: cloning a `Transport` clones a handle to the
//! same pool, so a worker that holds one `Transport` for its lifetime
//! gets the "persistent connection" contract for free without manual
//! socket bookkeeping. That pooling is also why this module does not
//! surface per-phase (connect/first-byte/last-byte) timing: a pooled
//! connection's second and later requests never pay a connect cost at
//! all, and `reqwest`'s client API does not expose a hook between
//! connect-complete and response-headers-received without bypassing
//! its connection manager entirely. Callers that need a round-trip
//! duration (the latency prober, the throughput driver) take their own
//! `Instant` immediately around the call instead; that single
//! wall-clock span is exactly what both need; see the design ledger.

use std::time::Duration;

use reqwest::{Body, Client};

use crate::error::{NetworkErrorKind, Result, SpeedTestError};

/// The status and body returned by a completed request.
pub struct RawResponse {
    pub status: reqwest::StatusCode,
    pub body: Vec<u8>,
}

/// A persistent-connection-capable HTTP/HTTPS client.
///
/// Parameterised only by TLS capability through the URL scheme; there
/// is no separate HTTP-vs-HTTPS type hierarchy (see the design note on
/// eliminating transport inheritance).
#[derive(Clone)]
pub struct Transport {
    client: Client,
}

impl Transport {
    /// Builds a transport with the given per-request deadline.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| {
                SpeedTestError::network("<client-builder>", NetworkErrorKind::Protocol(e.to_string()))
            })?;
        Ok(Self { client })
    }

    pub fn with_default_timeout() -> Result<Self> {
        Self::new(crate::defaults::REQUEST_TIMEOUT)
    }

    /// Issues a GET request and reads the full body.
    pub async fn get(&self, url: &str) -> Result<RawResponse> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(SpeedTestError::from)?;
        let status = response.status();

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        use futures::StreamExt;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(SpeedTestError::from)?;
            body.extend_from_slice(&chunk);
        }

        Ok(RawResponse { status, body })
    }

    /// Issues a GET request but discards the body, returning only the
    /// byte count consumed. Used by the throughput download driver so
    /// large bodies are never buffered in memory.
    pub async fn get_discard(&self, url: &str) -> Result<(reqwest::StatusCode, u64)> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(SpeedTestError::from)?;
        let status = response.status();

        let mut total = 0u64;
        let mut stream = response.bytes_stream();
        use futures::StreamExt;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(SpeedTestError::from)?;
            total += chunk.len() as u64;
        }

        Ok((status, total))
    }

    /// Issues a POST with an exact `Content-Length`, streaming the body
    /// from an owned byte buffer so the caller controls exactly what is
    /// sent (see the upload protocol in the throughput driver).
    pub async fn post(&self, url: &str, body: Vec<u8>) -> Result<RawResponse> {
        let content_length = body.len() as u64;
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .header("Content-Length", content_length)
            .body(Body::from(body))
            .send()
            .await
            .map_err(SpeedTestError::from)?;
        let status = response.status();

        Ok(RawResponse {
            status,
            body: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_against_loopback_echo_reports_status_and_body() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let body = b"hello";
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.write_all(body).await;
                let _ = socket.shutdown().await;
            }
        });

        let transport = Transport::with_default_timeout().unwrap();
        let url = format!("http://{}/", addr);
        let response = transport.get(&url).await.unwrap();
        assert_eq!(response.status, reqwest::StatusCode::OK);
        assert_eq!(response.body, b"hello");
    }
}
