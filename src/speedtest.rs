//! # Speed-Test Façade
//!
//! Sequences the catalog client, geo-ranker, latency prober, adaptive
//! configurator, and throughput driver into one full run, honouring
//! the operation flags an external shell supplies. This is the only
//! module the CLI shell calls into; every other module in the
//! measurement core is private to this crate's public surface through
//! this façade.

use tracing::{info, warn};

use crate::catalog::{CatalogClient, ClientInfo, ServerRecord};
use crate::config_table::{self, TestProfile};
use crate::defaults::{
    BEST_QUALITY_SERVER_SAMPLE_SIZE, BEST_SERVER_SAMPLE_SIZE, JITTER_SAMPLES, LATENCY_PROBE_COUNT,
    PACKET_LOSS_SAMPLES,
};
use crate::error::SpeedTestError;
use crate::geo::{self, RankedServer};
use crate::latency::{self, ProgressCallback};
use crate::throughput::{self, Direction};
use crate::transport::Transport;

const DEFAULT_BASE_URL: &str = "https://www.speedtest.net";

/// Which subset of the full run the external shell requested.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub latency_only: bool,
    pub quality_only: bool,
    pub download_only: bool,
    pub upload_only: bool,
    pub share: bool,
    pub test_server: Option<String>,
    pub ping_server: Option<String>,
    /// Overrides the `speedtest.net`-compatible infrastructure base URL
    /// the catalog client fetches against. `None` uses the production
    /// endpoint; test harnesses point this at a loopback server so the
    /// façade can be exercised end-to-end without live network access.
    pub config_base_url: Option<String>,
}

/// A capability that turns a completed run into a share-image URL.
/// Generation itself is an external collaborator (§1); the façade only
/// knows how to call it.
pub type ShareUrlGenerator = Box<dyn Fn(&RunReport) -> Option<String> + Send + Sync>;

/// The complete set of measurements produced by one run, in the same
/// shape the text-mode `KEY=VALUE` shell renders from.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub client_info: Option<ClientInfo>,
    pub test_server_host: Option<String>,
    pub test_server_distance_km: Option<f64>,
    pub latency_ms: Option<f64>,
    pub jitter_ms: Option<f64>,
    pub quality_server_host: Option<String>,
    pub quality_server_distance_km: Option<f64>,
    pub packet_loss_pct: Option<u32>,
    pub download_mbps: Option<f64>,
    pub upload_mbps: Option<f64>,
    pub image_url: Option<String>,
}

/// Validates a user-supplied `host:port` string (the `--test-server`/
/// `--ping-server` flags) before it is ever turned into a manual
/// `ServerRecord` or dialled. Malformed input — no port, an empty
/// host, or a non-numeric/out-of-range port — is a configuration
/// mistake, not a network failure, so it is reported as `ConfigError`
/// up front rather than surfacing as an opaque connect failure later.
fn validate_host_port(value: &str) -> Result<(), SpeedTestError> {
    let (host, port) = value.rsplit_once(':').ok_or_else(|| {
        SpeedTestError::ConfigError(format!("expected host:port, got '{value}'"))
    })?;
    if host.is_empty() {
        return Err(SpeedTestError::ConfigError(format!(
            "expected host:port, got '{value}'"
        )));
    }
    port.parse::<u16>()
        .map_err(|_| SpeedTestError::ConfigError(format!("invalid port in '{value}'")))?;
    Ok(())
}

fn manual_server(host_port: &str) -> ServerRecord {
    ServerRecord {
        url: format!("http://{host_port}"),
        host: host_port.to_string(),
        name: host_port.to_string(),
        country: String::new(),
        sponsor: String::new(),
        lat: 0.0,
        lon: 0.0,
        id: host_port.to_string(),
        quality_endpoint: Some(host_port.to_string()),
    }
}

/// Sequences a full run: client info, server selection, latency and
/// jitter, quality selection and packet loss, preflight and adaptive
/// configuration, download and upload, and (optionally) a share URL.
pub async fn run(
    options: &RunOptions,
    progress: Option<&ProgressCallback>,
    share_generator: Option<&ShareUrlGenerator>,
) -> Result<RunReport, SpeedTestError> {
    if let Some(host_port) = options.test_server.as_deref() {
        validate_host_port(host_port)?;
    }
    if let Some(host_port) = options.ping_server.as_deref() {
        validate_host_port(host_port)?;
    }

    let transport = Transport::with_default_timeout()?;
    let base_url = options.config_base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
    let catalog_client = CatalogClient::new(transport.clone(), base_url);
    let mut report = RunReport::default();

    // 1. client_info — always.
    let client_info = catalog_client.fetch_client_info().await?;
    report.client_info = Some(client_info.clone());

    // 2. Server selection (throughput).
    let throughput_server = select_throughput_server(
        &transport,
        &catalog_client,
        &client_info,
        options.test_server.as_deref(),
        progress,
    )
    .await?;
    report.test_server_host = Some(throughput_server.record.host.clone());
    report.test_server_distance_km = Some(throughput_server.distance_km);

    // 3. Latency and jitter — always.
    let server_root = throughput_server.record.url.trim_end_matches('/').to_string();
    let latency_ms = throughput_server.latency_ms.unwrap_or(0.0);
    report.latency_ms = Some(latency_ms);
    let jitter_ms = latency::jitter(&transport, &throughput_server, JITTER_SAMPLES).await?;
    report.jitter_ms = Some(jitter_ms);

    // 4. Optional early exit if only latency is requested.
    if options.latency_only {
        return Ok(report);
    }

    // 5. Server selection (quality) and packet loss — absorbed on failure.
    run_quality_phase(&transport, &catalog_client, &client_info, options, progress, &mut report)
        .await;

    if options.quality_only {
        return Ok(report);
    }

    // 6. Preflight download and configurator.
    let preflight_profile = config_table::preflight_profile();
    let preflight = throughput::run_throughput(
        &transport,
        &server_root,
        &preflight_profile,
        Direction::Download,
        None,
    )
    .await?;
    let (download_profile, upload_profile) = config_table::configure(preflight.mbit_per_sec);
    info!(
        "selected profile '{}' from preflight estimate {:.2} Mbit/s",
        download_profile.label, preflight.mbit_per_sec
    );

    // 7. Download driver, unless the caller asked for upload only.
    if !options.upload_only {
        let result = run_direction(
            &transport,
            &server_root,
            &download_profile,
            Direction::Download,
            progress,
        )
        .await?;
        report.download_mbps = Some(result.mbit_per_sec);
    }

    if options.download_only {
        return Ok(report);
    }

    // 8. Upload driver, unless the caller asked for download only.
    let result = run_direction(
        &transport,
        &server_root,
        &upload_profile,
        Direction::Upload,
        progress,
    )
    .await?;
    report.upload_mbps = Some(result.mbit_per_sec);

    // 9. Optional share-image URL generation via the external collaborator.
    if options.share {
        if let Some(generator) = share_generator {
            report.image_url = generator(&report);
        }
    }

    Ok(report)
}

async fn select_throughput_server(
    transport: &Transport,
    catalog_client: &CatalogClient,
    client_info: &ClientInfo,
    test_server: Option<&str>,
    progress: Option<&ProgressCallback>,
) -> Result<RankedServer, SpeedTestError> {
    if let Some(host_port) = test_server {
        let record = manual_server(host_port);
        let distance_km = geo::haversine_km(client_info.lat, client_info.lon, record.lat, record.lon);
        let mut candidate = RankedServer {
            record,
            distance_km,
            latency_ms: None,
        };
        let mean_ms = probe_single(transport, &candidate).await?;
        candidate.latency_ms = Some(mean_ms);
        return Ok(candidate);
    }

    let catalog = catalog_client.fetch_throughput_catalog().await?;
    if catalog.is_empty() {
        return Err(SpeedTestError::CatalogEmpty);
    }
    let ranked = geo::rank_by_distance(client_info.lat, client_info.lon, catalog);
    latency::best_server(
        transport,
        &ranked,
        BEST_SERVER_SAMPLE_SIZE,
        LATENCY_PROBE_COUNT,
        progress,
    )
    .await
}

async fn probe_single(transport: &Transport, candidate: &RankedServer) -> Result<f64, SpeedTestError> {
    let ranked = std::slice::from_ref(candidate);
    let probed = latency::best_server(transport, ranked, 1, LATENCY_PROBE_COUNT, None).await?;
    Ok(probed.latency_ms.unwrap_or(0.0))
}

/// Mirrors `select_throughput_server`'s `best_server` selection one-for-one
/// for the quality/ping endpoint: probes up to `BEST_QUALITY_SERVER_SAMPLE_SIZE`
/// of the ranked quality catalog's nearest candidates for latency and picks
/// the lowest, rather than taking the single nearest-by-distance entry.
async fn select_quality_server(
    transport: &Transport,
    catalog_client: &CatalogClient,
    client_info: &ClientInfo,
    progress: Option<&ProgressCallback>,
) -> Result<ServerRecord, SpeedTestError> {
    let catalog = catalog_client.fetch_quality_catalog().await?;
    if catalog.is_empty() {
        return Err(SpeedTestError::CatalogEmpty);
    }
    let ranked = geo::rank_by_distance(client_info.lat, client_info.lon, catalog);
    let best = latency::best_server(
        transport,
        &ranked,
        BEST_QUALITY_SERVER_SAMPLE_SIZE,
        LATENCY_PROBE_COUNT,
        progress,
    )
    .await?;
    Ok(best.record)
}

async fn run_quality_phase(
    transport: &Transport,
    catalog_client: &CatalogClient,
    client_info: &ClientInfo,
    options: &RunOptions,
    progress: Option<&ProgressCallback>,
    report: &mut RunReport,
) {
    let quality_server = if let Some(host_port) = options.ping_server.as_deref() {
        Some(manual_server(host_port))
    } else {
        match select_quality_server(transport, catalog_client, client_info, progress).await {
            Ok(record) => Some(record),
            Err(SpeedTestError::CatalogEmpty) => {
                warn!("quality catalog is empty; skipping packet-loss measurement");
                None
            }
            Err(e) => {
                warn!("quality server selection failed: {e}; skipping packet-loss measurement");
                None
            }
        }
    };

    let Some(server) = quality_server else {
        return;
    };

    let distance_km = geo::haversine_km(client_info.lat, client_info.lon, server.lat, server.lon);
    report.quality_server_host = Some(
        server
            .quality_endpoint
            .clone()
            .unwrap_or_else(|| server.host.clone()),
    );
    report.quality_server_distance_km = Some(distance_km);

    let Some(endpoint) = server.quality_endpoint.clone() else {
        warn!("quality server has no ping endpoint; skipping packet-loss measurement");
        return;
    };

    match latency::packet_loss(&endpoint, PACKET_LOSS_SAMPLES).await {
        Ok(pct) => report.packet_loss_pct = Some(pct),
        Err(e) => warn!("packet-loss measurement failed: {e}"),
    }
}

async fn run_direction(
    transport: &Transport,
    server_root: &str,
    profile: &TestProfile,
    direction: Direction,
    progress: Option<&ProgressCallback>,
) -> Result<throughput::ThroughputResult, SpeedTestError> {
    throughput::run_throughput(transport, server_root, profile, direction, progress.cloned())
        .await
}
