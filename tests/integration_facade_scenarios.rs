//! End-to-end scenarios for the speed-test façade (`speedtest::run`)
//! against hand-rolled loopback HTTP harnesses, mirroring the concrete
//! scenarios enumerated for the measurement core.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use speedtest_rs::error::SpeedTestError;
use speedtest_rs::speedtest::{self, RunOptions};

/// A minimal 200-OK route table keyed by request path. Any
/// `/random<N>x<N>.jpg` path not explicitly listed falls back to a
/// fixed-size wildcard body, so the façade's preflight probe and
/// adaptive-profile download requests are served without having to
/// enumerate every payload size the configurator might choose.
type Routes = Arc<HashMap<&'static str, Vec<u8>>>;

const DOWNLOAD_WILDCARD_SIZE: usize = 64_000;

async fn spawn_mock_server(routes: Routes) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            let routes = Arc::clone(&routes);
            tokio::spawn(handle_connection(socket, routes));
        }
    });
    addr
}

async fn handle_connection(mut socket: tokio::net::TcpStream, routes: Routes) {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    loop {
        let mut buf = vec![0u8; 8192];
        let n = match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        let request = String::from_utf8_lossy(&buf[..n]);
        let Some(first_line) = request.lines().next() else {
            return;
        };
        let path = first_line
            .split_whitespace()
            .nth(1)
            .unwrap_or("/")
            .split('?')
            .next()
            .unwrap_or("/")
            .to_string();

        // Drain any request body (Content-Length) before responding so
        // the client sees a clean response on this persistent connection.
        if let Some(len) = content_length(&request) {
            let headers_end = request.find("\r\n\r\n").map(|i| i + 4).unwrap_or(n);
            let already_read = n.saturating_sub(headers_end);
            let mut remaining = len.saturating_sub(already_read);
            let mut drain = vec![0u8; 4096];
            while remaining > 0 {
                let take = remaining.min(drain.len());
                match socket.read(&mut drain[..take]).await {
                    Ok(0) | Err(_) => break,
                    Ok(r) => remaining = remaining.saturating_sub(r),
                }
            }
        }

        let is_wildcard_download = path.starts_with("/random") && path.ends_with(".jpg");
        let body = routes
            .get(path.as_str())
            .cloned()
            .or_else(|| is_wildcard_download.then(|| vec![b'd'; DOWNLOAD_WILDCARD_SIZE]));

        match body {
            Some(body) => {
                let resp = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n",
                    body.len()
                );
                if socket.write_all(resp.as_bytes()).await.is_err() {
                    return;
                }
                if socket.write_all(&body).await.is_err() {
                    return;
                }
            }
            None => {
                let resp = b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n";
                if socket.write_all(resp).await.is_err() {
                    return;
                }
            }
        }
    }
}

fn content_length(request: &str) -> Option<usize> {
    request
        .lines()
        .find(|l| l.to_ascii_lowercase().starts_with("content-length:"))
        .and_then(|l| l.split(':').nth(1))
        .and_then(|v| v.trim().parse().ok())
}

fn routes(pairs: Vec<(&'static str, Vec<u8>)>) -> Routes {
    Arc::new(pairs.into_iter().collect())
}

fn client_info_xml() -> Vec<u8> {
    br#"<client ip="203.0.113.7" lat="40.0" lon="-75.0" isp="Test ISP"/>"#.to_vec()
}

/// Scenario 1: latency-only run against a user-supplied server skips
/// catalog discovery, quality, and throughput entirely.
#[tokio::test]
async fn latency_only_run_against_user_supplied_server() {
    let config_addr =
        spawn_mock_server(routes(vec![("/speedtest-config.php", client_info_xml())])).await;

    let test_server_addr =
        spawn_mock_server(routes(vec![("/latency.txt", b"ok".to_vec())])).await;

    let options = RunOptions {
        latency_only: true,
        test_server: Some(test_server_addr.to_string()),
        config_base_url: Some(format!("http://{config_addr}")),
        ..Default::default()
    };

    let report = speedtest::run(&options, None, None).await.unwrap();

    let client_info = report.client_info.expect("client info present");
    assert_eq!(client_info.ip_address, "203.0.113.7");
    assert_eq!(client_info.isp, "Test ISP");
    assert_eq!(
        report.test_server_host.as_deref(),
        Some(test_server_addr.to_string().as_str())
    );
    assert!(report.latency_ms.is_some());
    assert!(report.jitter_ms.is_some());
    // Latency-only exits before quality or throughput run.
    assert!(report.packet_loss_pct.is_none());
    assert!(report.download_mbps.is_none());
    assert!(report.upload_mbps.is_none());
}

/// Scenario 3: an empty throughput catalog (every mirror returns zero
/// usable `<server>` entries) is reported as `CatalogEmpty`, not a
/// generic network failure.
#[tokio::test]
async fn empty_throughput_catalog_fails_with_catalog_empty() {
    let config_addr = spawn_mock_server(routes(vec![
        ("/speedtest-config.php", client_info_xml()),
        ("/speedtest-servers-static.php", b"<servers/>".to_vec()),
        ("/speedtest-servers.php", b"<servers/>".to_vec()),
    ]))
    .await;

    let options = RunOptions {
        config_base_url: Some(format!("http://{config_addr}")),
        ..Default::default()
    };

    let err = speedtest::run(&options, None, None).await.unwrap_err();
    assert!(matches!(err, SpeedTestError::CatalogEmpty));
}

/// Scenario 4: an empty quality catalog is absorbed silently; the
/// download phase still proceeds and the run still succeeds.
#[tokio::test]
async fn empty_quality_catalog_is_absorbed_and_download_still_runs() {
    let server_addr =
        spawn_mock_server(routes(vec![("/latency.txt", b"ok".to_vec())])).await;

    let config_addr = spawn_mock_server(routes(vec![
        ("/speedtest-config.php", client_info_xml()),
        (
            "/speedtest-quality-servers.php",
            b"<servers/>".to_vec(),
        ),
    ]))
    .await;

    let options = RunOptions {
        download_only: true,
        test_server: Some(server_addr.to_string()),
        config_base_url: Some(format!("http://{config_addr}")),
        ..Default::default()
    };

    let report = speedtest::run(&options, None, None).await.unwrap();
    assert!(report.packet_loss_pct.is_none());
    assert!(report.quality_server_host.is_none());
    assert!(report.download_mbps.is_some());
    assert!(report.upload_mbps.is_none());
}
