//! Download-only throughput scenario against a loopback harness that
//! rate-limits its aggregate output to a known link speed, verifying
//! the driver's reported throughput lands within tolerance of that
//! known rate regardless of how many concurrent connections the
//! driver opens against it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use speedtest_rs::config_table::{TestProfile, UploadBodyStyle};
use speedtest_rs::throughput::{run_throughput, Direction};
use speedtest_rs::transport::Transport;

/// Bytes per second the mock server paces its *combined* output to
/// across every open connection, simulating a single 100 Mbit/s link
/// shared by all of the driver's worker connections
/// (100_000_000 / 8 = 12_500_000 bytes/sec).
const RATE_BYTES_PER_SEC: f64 = 12_500_000.0;
const CHUNK_SIZE: usize = 64_000;

/// A global leaky-bucket shared by every connection the mock server
/// accepts, so concurrency on the client side cannot inflate the
/// simulated link's aggregate rate.
struct LinkPacer {
    start: Instant,
    bytes_sent: AtomicU64,
    rate_bytes_per_sec: f64,
}

impl LinkPacer {
    fn new(rate_bytes_per_sec: f64) -> Self {
        Self {
            start: Instant::now(),
            bytes_sent: AtomicU64::new(0),
            rate_bytes_per_sec,
        }
    }

    async fn pace(&self, chunk_len: usize) {
        let sent_total = self.bytes_sent.fetch_add(chunk_len as u64, Ordering::SeqCst) + chunk_len as u64;
        let target_elapsed = sent_total as f64 / self.rate_bytes_per_sec;
        let actual_elapsed = self.start.elapsed().as_secs_f64();
        if target_elapsed > actual_elapsed {
            tokio::time::sleep(Duration::from_secs_f64(target_elapsed - actual_elapsed)).await;
        }
    }
}

async fn spawn_rate_limited_download_server(body_len: usize) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let pacer = Arc::new(LinkPacer::new(RATE_BYTES_PER_SEC));

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let pacer = Arc::clone(&pacer);
            tokio::spawn(async move {
                use tokio::io::{AsyncReadExt, AsyncWriteExt};
                let mut buf = [0u8; 4096];
                loop {
                    if socket.read(&mut buf).await.unwrap_or(0) == 0 {
                        break;
                    }
                    let resp = format!("HTTP/1.1 200 OK\r\nContent-Length: {body_len}\r\n\r\n");
                    if socket.write_all(resp.as_bytes()).await.is_err() {
                        break;
                    }

                    let mut sent = 0usize;
                    let chunk = vec![b'd'; CHUNK_SIZE];
                    while sent < body_len {
                        let take = (body_len - sent).min(CHUNK_SIZE);
                        pacer.pace(take).await;
                        if socket.write_all(&chunk[..take]).await.is_err() {
                            return;
                        }
                        sent += take;
                    }
                }
            });
        }
    });
    addr
}

#[tokio::test]
async fn download_throughput_matches_rate_limited_link_within_tolerance() {
    let body_len = 1_000_000usize;
    let addr = spawn_rate_limited_download_server(body_len).await;

    let transport = Transport::with_default_timeout().unwrap();
    let profile = TestProfile {
        label: "fake-100mbit",
        concurrency: 4,
        payload_sizes: vec![body_len as u64],
        repetitions: 20,
        min_duration_ms: 0,
        max_duration_ms: 5_000,
        upload_body_style: UploadBodyStyle::FormPrefixedFiller,
    };

    let server_root = format!("http://{addr}");
    let result = run_throughput(&transport, &server_root, &profile, Direction::Download, None)
        .await
        .unwrap();

    let expected_mbps = 100.0;
    let tolerance = expected_mbps * 0.10;
    assert!(
        (result.mbit_per_sec - expected_mbps).abs() <= tolerance,
        "expected ~{expected_mbps} Mbit/s within 10%, got {}",
        result.mbit_per_sec
    );
}
