//! # Throughput Driver
//!
//! The concurrent saturation engine for download and upload. A shared,
//! bounded queue is pre-seeded with `sizeof(sizes) * repetitions`
//! work items; `concurrency` workers each hold one persistent
//! connection and pull items from the queue until it is empty or the
//! driver's stop flag is observed. The only shared mutable state on
//! the hot path is a byte counter and a stop flag, both atomic.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::config_table::TestProfile;
use crate::error::{Result, SpeedTestError};
use crate::latency::ProgressCallback;
use crate::transport::Transport;

/// Which direction the driver saturates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Download,
    Upload,
}

/// The outcome of one throughput measurement.
#[derive(Debug, Clone, Copy)]
pub struct ThroughputResult {
    pub mbit_per_sec: f64,
    pub total_bytes: u64,
    pub elapsed: Duration,
}

/// A request deemed to have failed inside the driver counts toward
/// this ratio; above it, the whole measurement fails.
const MAX_FAILURE_RATIO: f64 = 0.5;

struct WorkerOutcome {
    bytes: u64,
    attempts: u64,
    failures: u64,
    first_start: Option<Instant>,
    last_end: Option<Instant>,
}

fn build_queue(profile: &TestProfile) -> VecDeque<u64> {
    let mut queue = VecDeque::with_capacity(profile.payload_sizes.len() * profile.repetitions);
    for &size in &profile.payload_sizes {
        for _ in 0..profile.repetitions {
            queue.push_back(size);
        }
    }
    queue
}

/// Builds the upload body: a `content1=` key prefix followed by
/// printable ASCII filler so the total length is exactly `size` bytes.
fn build_upload_body(size: u64) -> Vec<u8> {
    const PREFIX: &[u8] = b"content1=";
    let size = size as usize;
    if size <= PREFIX.len() {
        return PREFIX[..size.min(PREFIX.len())].to_vec();
    }
    let mut body = Vec::with_capacity(size);
    body.extend_from_slice(PREFIX);
    let filler_len = size - PREFIX.len();
    let mut rng = rand::thread_rng();
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    body.extend((0..filler_len).map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())]));
    body
}

async fn run_one_download(transport: &Transport, server_root: &str, size: u64) -> Result<u64> {
    let url = format!("{server_root}/random{size}x{size}.jpg");
    let (status, bytes) = transport.get_discard(&url).await?;
    if !status.is_success() {
        return Err(SpeedTestError::MeasurementFailed(format!(
            "download request returned status {status}"
        )));
    }
    Ok(bytes)
}

async fn run_one_upload(transport: &Transport, server_root: &str, size: u64) -> Result<u64> {
    let url = format!("{server_root}/upload.php");
    let body = build_upload_body(size);
    let content_length = body.len() as u64;
    let response = transport.post(&url, body).await?;
    if !response.status.is_success() {
        return Err(SpeedTestError::MeasurementFailed(format!(
            "upload request returned status {}",
            response.status
        )));
    }
    Ok(content_length)
}

async fn worker_loop(
    transport: Transport,
    server_root: String,
    direction: Direction,
    queue: Arc<Mutex<VecDeque<u64>>>,
    byte_counter: Arc<AtomicU64>,
    stop_flag: Arc<AtomicBool>,
    progress: Option<ProgressCallback>,
) -> WorkerOutcome {
    let mut outcome = WorkerOutcome {
        bytes: 0,
        attempts: 0,
        failures: 0,
        first_start: None,
        last_end: None,
    };

    loop {
        if stop_flag.load(Ordering::Relaxed) {
            break;
        }
        let size = {
            let mut guard = queue.lock().expect("throughput queue poisoned");
            guard.pop_front()
        };
        let Some(size) = size else {
            break;
        };

        let start = Instant::now();
        if outcome.first_start.is_none() {
            outcome.first_start = Some(start);
        }

        let result = match direction {
            Direction::Download => run_one_download(&transport, &server_root, size).await,
            Direction::Upload => run_one_upload(&transport, &server_root, size).await,
        };
        let end = Instant::now();
        outcome.last_end = Some(end);
        outcome.attempts += 1;

        match result {
            Ok(bytes) => {
                outcome.bytes += bytes;
                byte_counter.fetch_add(bytes, Ordering::Relaxed);
                if let Some(cb) = &progress {
                    cb(true);
                }
            }
            Err(_) => {
                outcome.failures += 1;
                if let Some(cb) = &progress {
                    cb(false);
                }
            }
        }
    }

    outcome
}

/// Runs the throughput driver to completion: releases `profile.concurrency`
/// workers against a pre-seeded queue, stops at the earlier of queue
/// exhaustion or `profile.max_duration_ms`, and converts the aggregate
/// byte count and wall-clock window into a throughput result.
pub async fn run_throughput(
    transport: &Transport,
    server_root: &str,
    profile: &TestProfile,
    direction: Direction,
    progress: Option<ProgressCallback>,
) -> Result<ThroughputResult> {
    let queue = Arc::new(Mutex::new(build_queue(profile)));
    let byte_counter = Arc::new(AtomicU64::new(0));
    let stop_flag = Arc::new(AtomicBool::new(false));

    let global_start = Instant::now();
    let max_duration = Duration::from_millis(profile.max_duration_ms);

    let mut handles = Vec::with_capacity(profile.concurrency);
    for _ in 0..profile.concurrency {
        let transport = transport.clone();
        let server_root = server_root.to_string();
        let queue = Arc::clone(&queue);
        let byte_counter = Arc::clone(&byte_counter);
        let stop_flag = Arc::clone(&stop_flag);
        let progress = progress.clone();
        handles.push(tokio::spawn(worker_loop(
            transport,
            server_root,
            direction,
            queue,
            byte_counter,
            stop_flag,
            progress,
        )));
    }

    // Watch the deadline independently of worker progress so the stop
    // flag is raised even if every worker is mid-request.
    let watchdog_stop = Arc::clone(&stop_flag);
    let watchdog = tokio::spawn(async move {
        tokio::time::sleep(max_duration).await;
        watchdog_stop.store(true, Ordering::Relaxed);
    });

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        if let Ok(outcome) = handle.await {
            outcomes.push(outcome);
        }
    }
    stop_flag.store(true, Ordering::Relaxed);
    watchdog.abort();

    let total_bytes = byte_counter.load(Ordering::Relaxed);
    let total_attempts: u64 = outcomes.iter().map(|o| o.attempts).sum();
    let total_failures: u64 = outcomes.iter().map(|o| o.failures).sum();

    if total_attempts > 0 {
        let failure_ratio = total_failures as f64 / total_attempts as f64;
        if failure_ratio > MAX_FAILURE_RATIO {
            return Err(SpeedTestError::MeasurementFailed(format!(
                "failure ratio {:.2} exceeded {:.2}",
                failure_ratio, MAX_FAILURE_RATIO
            )));
        }
    }

    if total_bytes == 0 {
        return Err(SpeedTestError::MeasurementFailed(
            "no bytes were transferred".to_string(),
        ));
    }

    let worker_start = outcomes
        .iter()
        .filter_map(|o| o.first_start)
        .min()
        .unwrap_or(global_start);
    let worker_end = outcomes
        .iter()
        .filter_map(|o| o.last_end)
        .max()
        .unwrap_or(global_start);
    let elapsed = worker_end.saturating_duration_since(worker_start);
    let elapsed_seconds = elapsed.as_secs_f64().max(f64::EPSILON);

    let mbit_per_sec = (total_bytes as f64 * 8.0) / (elapsed_seconds * 1_000_000.0);

    Ok(ThroughputResult {
        mbit_per_sec,
        total_bytes,
        elapsed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_body_has_exact_length_and_content1_prefix() {
        let body = build_upload_body(1024);
        assert_eq!(body.len(), 1024);
        assert!(body.starts_with(b"content1="));
    }

    #[test]
    fn upload_body_shorter_than_prefix_is_truncated_safely() {
        let body = build_upload_body(4);
        assert_eq!(body.len(), 4);
    }

    #[test]
    fn queue_is_seeded_with_sizes_times_repetitions() {
        let profile = TestProfile {
            label: "test",
            concurrency: 2,
            payload_sizes: vec![100, 200, 300],
            repetitions: 4,
            min_duration_ms: 0,
            max_duration_ms: 1000,
            upload_body_style: crate::config_table::UploadBodyStyle::FormPrefixedFiller,
        };
        let queue = build_queue(&profile);
        assert_eq!(queue.len(), 12);
    }

    #[tokio::test]
    async fn download_against_loopback_reports_conserved_bytes() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let body_len = 5000usize;

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    use tokio::io::{AsyncReadExt, AsyncWriteExt};
                    let mut buf = [0u8; 1024];
                    loop {
                        if socket.read(&mut buf).await.unwrap_or(0) == 0 {
                            break;
                        }
                        let body = vec![b'a'; body_len];
                        let resp = format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n",
                            body.len()
                        );
                        if socket.write_all(resp.as_bytes()).await.is_err() {
                            break;
                        }
                        if socket.write_all(&body).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        let transport = Transport::with_default_timeout().unwrap();
        let profile = TestProfile {
            label: "test",
            concurrency: 2,
            payload_sizes: vec![body_len as u64],
            repetitions: 2,
            min_duration_ms: 0,
            max_duration_ms: 5000,
            upload_body_style: crate::config_table::UploadBodyStyle::FormPrefixedFiller,
        };
        let server_root = format!("http://{addr}");
        let result = run_throughput(&transport, &server_root, &profile, Direction::Download, None)
            .await
            .unwrap();

        assert_eq!(result.total_bytes, (body_len * 4) as u64);
        assert!(result.mbit_per_sec > 0.0);
    }

    #[tokio::test]
    async fn throughput_fails_when_no_bytes_move() {
        let transport = Transport::with_default_timeout().unwrap();
        let profile = TestProfile {
            label: "test",
            concurrency: 1,
            payload_sizes: vec![100],
            repetitions: 1,
            min_duration_ms: 0,
            max_duration_ms: 200,
            upload_body_style: crate::config_table::UploadBodyStyle::FormPrefixedFiller,
        };
        // Nothing listens on this port; every request fails.
        let server_root = "http://127.0.0.1:1".to_string();
        let result =
            run_throughput(&transport, &server_root, &profile, Direction::Download, None).await;
        assert!(result.is_err());
    }
}
