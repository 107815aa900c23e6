//! # Speedtest-rs
//!
//! A Speedtest.net-compatible Internet speed test measurement engine:
//! server discovery and geo-ranking, latency/jitter/packet-loss
//! probing, and a concurrent throughput driver for download and
//! upload, sequenced by a single façade.

pub mod catalog;
pub mod cli;
pub mod config_table;
pub mod error;
pub mod geo;
pub mod latency;
pub mod speedtest;
pub mod throughput;
pub mod transport;

pub use catalog::{CatalogClient, ClientInfo, ServerRecord};
pub use error::{SpeedTestError, Result};
pub use geo::RankedServer;
pub use speedtest::{run, RunOptions, RunReport};

/// The current version of the speed test engine.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values for the measurement core. Every
/// constant here is sourced by exactly one module rather than
/// re-declared locally, so the two can never drift apart.
pub mod defaults {
    use std::time::Duration;

    /// Default per-request network timeout, used by
    /// `transport::Transport::with_default_timeout`.
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

    /// Number of candidates probed by `latency::best_server` when
    /// selecting the throughput server.
    pub const BEST_SERVER_SAMPLE_SIZE: usize = 10;

    /// Number of candidates probed by `latency::best_server` when
    /// selecting the quality/ping server.
    pub const BEST_QUALITY_SERVER_SAMPLE_SIZE: usize = 5;

    /// Probes per candidate during `latency::best_server` selection.
    pub const LATENCY_PROBE_COUNT: usize = 3;

    /// Sequential probes used by `latency::jitter`.
    pub const JITTER_SAMPLES: usize = 20;

    /// Probes used by `latency::packet_loss` against the quality endpoint.
    pub const PACKET_LOSS_SAMPLES: usize = 80;

    /// Minimum server protocol version accepted from a catalog, used by
    /// `catalog::CatalogClient`.
    pub const MIN_SERVER_VERSION: u32 = 1;
}
