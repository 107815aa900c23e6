//! # Latency Prober
//!
//! Selects the best throughput-server candidate by round-trip latency,
//! and produces the jitter and packet-loss series used as quality
//! metrics. Every probe series follows the same small state machine
//! per probe: `Idle -> Sent -> (Received | Timeout)`, with a single
//! reconnect allowed mid-series before the series is abandoned and
//! whatever was collected is reported.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{NetworkErrorKind, Result, SpeedTestError};
use crate::geo::RankedServer;
use crate::transport::Transport;

/// Default per-probe deadline; a probe that exceeds this counts as a
/// loss (jitter series) or a drop (packet-loss series).
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// A function-like progress capability invoked once per completed
/// unit of work. It holds no state of its own; any shared state a
/// caller closes over must be synchronised by the caller. `Arc`-backed
/// so the same capability can be cheaply cloned into every worker task
/// a throughput driver spawns.
pub type ProgressCallback = Arc<dyn Fn(bool) + Send + Sync>;

fn server_root(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// Whether a probe failure is a genuine connection-level fault (I/O or
/// TLS) rather than an ordinary per-probe timeout. Only the former
/// should consume a series' one-shot reconnect budget; a timeout is
/// just one lost/dropped sample and the series continues toward its
/// full sample count.
fn is_connection_fault(err: &SpeedTestError) -> bool {
    matches!(
        err,
        SpeedTestError::NetworkError {
            source: NetworkErrorKind::Io(_) | NetworkErrorKind::Tls(_),
            ..
        }
    )
}

async fn probe_latency_once(transport: &Transport, server_root: &str) -> Result<Duration> {
    let url = format!("{server_root}/latency.txt");
    let start = Instant::now();
    let response = timeout(DEFAULT_PROBE_TIMEOUT, transport.get(&url))
        .await
        .map_err(|_| SpeedTestError::timeout(url.clone(), DEFAULT_PROBE_TIMEOUT))??;
    if !response.status.is_success() {
        return Err(SpeedTestError::network(
            url,
            NetworkErrorKind::Protocol(format!("status {}", response.status)),
        ));
    }
    Ok(start.elapsed())
}

/// Mean of the fastest `K = N/2` of `N` round-trip samples.
fn mean_of_fastest_half(mut samples: Vec<Duration>) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    samples.sort();
    let k = (samples.len() / 2).max(1);
    let fastest = &samples[..k];
    let total_ms: f64 = fastest.iter().map(|d| d.as_secs_f64() * 1000.0).sum();
    Some(total_ms / fastest.len() as f64)
}

/// Probes up to `sample_size` candidates (in ranker order) with
/// `probe_count` lightweight requests each, and returns the candidate
/// whose mean-of-fastest-half latency is lowest.
///
/// Invokes `progress` with `true` for each candidate that completed at
/// least one probe without a transport error, `false` for a candidate
/// whose every probe failed. Fails with `NoServerReachable` if every
/// candidate fails.
pub async fn best_server(
    transport: &Transport,
    candidates: &[RankedServer],
    sample_size: usize,
    probe_count: usize,
    progress: Option<&ProgressCallback>,
) -> Result<RankedServer> {
    let mut best: Option<(RankedServer, f64)> = None;

    for candidate in candidates.iter().take(sample_size) {
        let root = server_root(&candidate.record.url);
        let mut samples = Vec::with_capacity(probe_count);
        for _ in 0..probe_count {
            if let Ok(rtt) = probe_latency_once(transport, &root).await {
                samples.push(rtt);
            }
        }

        let succeeded = !samples.is_empty();
        if let Some(cb) = progress {
            cb(succeeded);
        }
        if !succeeded {
            continue;
        }

        let mean_ms = mean_of_fastest_half(samples).expect("non-empty samples");
        let is_better = match &best {
            Some((_, current_best)) => mean_ms < *current_best,
            None => true,
        };
        if is_better {
            let mut chosen = candidate.clone();
            chosen.latency_ms = Some(mean_ms);
            best = Some((chosen, mean_ms));
        }
    }

    best.map(|(server, _)| server)
        .ok_or(SpeedTestError::NoServerReachable)
}

/// Issues `samples` sequential probes against one server over a
/// persistent connection and returns the mean absolute difference
/// between consecutive round-trip times, in milliseconds.
pub async fn jitter(transport: &Transport, server: &RankedServer, samples: usize) -> Result<f64> {
    let root = server_root(&server.record.url);
    let mut rtts = Vec::with_capacity(samples);
    let mut reconnect_attempted = false;
    let mut attempted = 0usize;

    while attempted < samples {
        attempted += 1;
        match probe_latency_once(transport, &root).await {
            Ok(rtt) => rtts.push(rtt.as_secs_f64() * 1000.0),
            Err(ref e) if !is_connection_fault(e) => {
                // An ordinary timeout is one lost sample; the series
                // continues toward its full sample count.
            }
            Err(_) if !reconnect_attempted => {
                reconnect_attempted = true;
            }
            Err(_) => break,
        }
    }

    if rtts.len() < 2 {
        return Ok(0.0);
    }

    let diffs: Vec<f64> = rtts.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
    Ok(diffs.iter().sum::<f64>() / diffs.len() as f64)
}

/// Opens a TCP connection to the quality endpoint and issues `samples`
/// probes per the server's text ping protocol, returning the integer
/// percentage of non-responses.
///
/// The handshake (open connection, send `HI\n`, then one
/// newline-terminated ping per sample, counting newline-terminated
/// replies) is a best-effort reconstruction of an undocumented wire
/// protocol; see the design ledger for the reasoning.
pub async fn packet_loss(quality_endpoint: &str, samples: usize) -> Result<u32> {
    let mut stream = connect_quality(quality_endpoint).await?;
    let mut lost = 0u32;
    let mut reconnect_attempted = false;

    for i in 0..samples {
        match ping_once(&mut stream).await {
            Ok(()) => {}
            Err(ref e) if !is_connection_fault(e) => {
                // An ordinary timeout is one dropped probe; the series
                // continues toward its full sample count.
                lost += 1;
            }
            Err(_) if !reconnect_attempted => {
                reconnect_attempted = true;
                match connect_quality(quality_endpoint).await {
                    Ok(new_stream) => {
                        stream = new_stream;
                        if ping_once(&mut stream).await.is_err() {
                            lost += 1;
                        }
                    }
                    Err(_) => {
                        // Second connection-level failure aborts the
                        // series; count the remainder as lost and
                        // report what was collected.
                        lost += (samples - i) as u32;
                        break;
                    }
                }
            }
            Err(_) => {
                // A second connection-level failure after the
                // one-shot reconnect budget was already spent.
                lost += (samples - i) as u32;
                break;
            }
        }
    }

    Ok(((lost as f64 / samples as f64) * 100.0).round() as u32)
}

async fn connect_quality(endpoint: &str) -> Result<TcpStream> {
    let stream = timeout(DEFAULT_PROBE_TIMEOUT, TcpStream::connect(endpoint))
        .await
        .map_err(|_| SpeedTestError::timeout(endpoint.to_string(), DEFAULT_PROBE_TIMEOUT))?
        .map_err(|e| SpeedTestError::network(endpoint.to_string(), NetworkErrorKind::Io(e)))?;
    Ok(stream)
}

async fn ping_once(stream: &mut TcpStream) -> Result<()> {
    timeout(DEFAULT_PROBE_TIMEOUT, async {
        stream.write_all(b"HI\n").await?;
        let mut buf = [0u8; 64];
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed",
            ));
        }
        Ok(())
    })
    .await
    .map_err(|_| SpeedTestError::timeout("<quality>", DEFAULT_PROBE_TIMEOUT))?
    .map_err(|e| SpeedTestError::network("<quality>", NetworkErrorKind::Io(e)))
}
