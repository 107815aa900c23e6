//! # Adaptive Configurator
//!
//! Maps a single preflight download-throughput estimate to a labelled
//! `TestProfile` for both directions. The mapping table is a
//! process-wide immutable value — a plain constant slice, no
//! initialisation-order concerns — consumed by a pure lookup function
//! so that, for a given preflight value, the same profile is returned
//! every time.

/// How the upload body's bytes are generated once its total length is
/// fixed by the profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadBodyStyle {
    /// A `content1=` key prefix followed by printable ASCII filler so
    /// the exact `Content-Length` is reached without accidental
    /// compression of an all-zero or fully-random body at
    /// intermediate proxies.
    FormPrefixedFiller,
}

/// A fully-specified test configuration for one direction
/// (download or upload).
#[derive(Debug, Clone, PartialEq)]
pub struct TestProfile {
    pub label: &'static str,
    pub concurrency: usize,
    /// Ordered payload sizes, in bytes.
    pub payload_sizes: Vec<u64>,
    pub repetitions: usize,
    pub min_duration_ms: u64,
    pub max_duration_ms: u64,
    pub upload_body_style: UploadBodyStyle,
}

const KB: u64 = 1000;

/// Number of repetitions per configured payload size. Not specified by
/// the wire contract; chosen so each size contributes a comparable
/// share of the measurement window across the small/medium/large
/// profiles below.
const REPETITIONS: usize = 4;

struct ProfileRow {
    max_preflight_mbps: Option<f64>,
    label: &'static str,
    download_sizes_kb: &'static [u64],
    download_concurrency: usize,
    upload_sizes_kb: &'static [u64],
    upload_concurrency: usize,
    max_duration_ms: u64,
}

const PROFILE_TABLE: &[ProfileRow] = &[
    ProfileRow {
        max_preflight_mbps: Some(4.0),
        label: "dial-up / DSL",
        download_sizes_kb: &[350, 500, 750, 1000, 1500, 2000],
        download_concurrency: 2,
        upload_sizes_kb: &[32, 64, 128, 256, 512, 1024],
        upload_concurrency: 2,
        max_duration_ms: 20_000,
    },
    ProfileRow {
        max_preflight_mbps: Some(30.0),
        label: "fast DSL / cable",
        download_sizes_kb: &[1500, 2000, 3000, 4000, 6000],
        download_concurrency: 4,
        upload_sizes_kb: &[256, 512, 1024],
        upload_concurrency: 4,
        max_duration_ms: 20_000,
    },
    ProfileRow {
        max_preflight_mbps: None, // > 30 Mbit/s, the open-ended top tier
        label: "fibre / enterprise",
        download_sizes_kb: &[4000, 8000, 16000, 24000, 32000],
        download_concurrency: 8,
        upload_sizes_kb: &[1024, 4096, 8192],
        upload_concurrency: 8,
        max_duration_ms: 30_000,
    },
];

/// The fixed, low-cost profile used to obtain the preflight download
/// estimate that `configure` then consumes. Not user-configurable.
pub fn preflight_profile() -> TestProfile {
    TestProfile {
        label: "preflight",
        concurrency: 2,
        payload_sizes: vec![500 * KB],
        repetitions: 1,
        min_duration_ms: 0,
        max_duration_ms: 2_000,
        upload_body_style: UploadBodyStyle::FormPrefixedFiller,
    }
}

/// Maps a preflight download throughput estimate (Mbit/s) to a
/// `(download_profile, upload_profile)` pair. Deterministic: the same
/// input always yields the same profiles.
pub fn configure(preflight_mbps: f64) -> (TestProfile, TestProfile) {
    let row = PROFILE_TABLE
        .iter()
        .find(|row| match row.max_preflight_mbps {
            Some(ceiling) => preflight_mbps < ceiling,
            None => true,
        })
        .expect("PROFILE_TABLE has an open-ended final row");

    let download = TestProfile {
        label: row.label,
        concurrency: row.download_concurrency,
        payload_sizes: row.download_sizes_kb.iter().map(|kb| kb * KB).collect(),
        repetitions: REPETITIONS,
        min_duration_ms: 0,
        max_duration_ms: row.max_duration_ms,
        upload_body_style: UploadBodyStyle::FormPrefixedFiller,
    };
    let upload = TestProfile {
        label: row.label,
        concurrency: row.upload_concurrency,
        payload_sizes: row.upload_sizes_kb.iter().map(|kb| kb * KB).collect(),
        repetitions: REPETITIONS,
        min_duration_ms: 0,
        max_duration_ms: row.max_duration_ms,
        upload_body_style: UploadBodyStyle::FormPrefixedFiller,
    };
    (download, upload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_preflight_selects_dial_up_profile() {
        let (download, _upload) = configure(1.0);
        assert_eq!(download.label, "dial-up / DSL");
        assert_eq!(download.concurrency, 2);
    }

    #[test]
    fn mid_preflight_selects_cable_profile() {
        let (download, upload) = configure(15.0);
        assert_eq!(download.label, "fast DSL / cable");
        assert_eq!(upload.concurrency, 4);
    }

    #[test]
    fn high_preflight_selects_enterprise_profile() {
        let (download, upload) = configure(500.0);
        assert_eq!(download.label, "fibre / enterprise");
        assert_eq!(download.concurrency, 8);
        assert_eq!(upload.concurrency, 8);
    }

    #[test]
    fn boundary_values_are_exclusive_on_the_low_side() {
        let (below, _) = configure(3.999);
        let (at, _) = configure(4.0);
        assert_eq!(below.label, "dial-up / DSL");
        assert_eq!(at.label, "fast DSL / cable");
    }

    #[test]
    fn configuration_is_deterministic() {
        let a = configure(12.3);
        let b = configure(12.3);
        assert_eq!(a, b);
    }
}
