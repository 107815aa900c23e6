//! # Geo-ranker
//!
//! Orders catalog entries by great-circle distance from the client's
//! reported coordinates, using the haversine formula. Distance is the
//! only thing this module computes; it does not probe latency (see
//! `latency`).

use crate::catalog::ServerRecord;

/// Mean radius of the Earth in kilometres, matching the constant used
/// by the upstream measurement infrastructure.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A catalog entry annotated with its distance from the client.
#[derive(Debug, Clone)]
pub struct RankedServer {
    pub record: ServerRecord,
    pub distance_km: f64,
    /// Filled in by the latency prober once the candidate has been
    /// probed; `None` before probing.
    pub latency_ms: Option<f64>,
}

/// Great-circle distance between two `(lat, lon)` points in degrees,
/// via the haversine formula.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1, lon1, lat2, lon2) = (
        lat1.to_radians(),
        lon1.to_radians(),
        lat2.to_radians(),
        lon2.to_radians(),
    );
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_KM * c
}

/// Ranks a catalog by ascending distance from `(client_lat, client_lon)`.
///
/// Ties are broken by catalog order (Rust's sort is stable), matching
/// the distance-monotonicity property: the result is sorted
/// non-decreasing by `haversine(client, .)`.
pub fn rank_by_distance(
    client_lat: f64,
    client_lon: f64,
    catalog: Vec<ServerRecord>,
) -> Vec<RankedServer> {
    let mut ranked: Vec<RankedServer> = catalog
        .into_iter()
        .map(|record| {
            let distance_km = haversine_km(client_lat, client_lon, record.lat, record.lon);
            RankedServer {
                record,
                distance_km,
                latency_ms: None,
            }
        })
        .collect();
    ranked.sort_by(|a, b| {
        a.distance_km
            .partial_cmp(&b.distance_km)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, lat: f64, lon: f64) -> ServerRecord {
        ServerRecord {
            url: format!("http://{id}.example/"),
            host: format!("{id}.example:8080"),
            name: id.to_string(),
            country: "US".to_string(),
            sponsor: "test".to_string(),
            lat,
            lon,
            id: id.to_string(),
            quality_endpoint: None,
        }
    }

    #[test]
    fn same_point_has_zero_distance() {
        assert!(haversine_km(40.0, -75.0, 40.0, -75.0) < 1e-6);
    }

    #[test]
    fn distance_is_symmetric() {
        let d1 = haversine_km(40.0, -75.0, 51.5, -0.1);
        let d2 = haversine_km(51.5, -0.1, 40.0, -75.0);
        assert!((d1 - d2).abs() < 1e-9);
    }

    #[test]
    fn ranking_is_sorted_non_decreasing_by_distance() {
        let catalog = vec![
            record("far", 51.5, -0.1),
            record("near", 40.01, -75.0),
            record("mid", 45.0, -75.0),
        ];
        let ranked = rank_by_distance(40.0, -75.0, catalog);
        let distances: Vec<f64> = ranked.iter().map(|r| r.distance_km).collect();
        let mut sorted = distances.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(distances, sorted);
        assert_eq!(ranked[0].record.id, "near");
    }

    #[test]
    fn stable_under_ties() {
        let catalog = vec![record("a", 40.0, -75.0), record("b", 40.0, -75.0)];
        let ranked = rank_by_distance(40.0, -75.0, catalog);
        assert_eq!(ranked[0].record.id, "a");
        assert_eq!(ranked[1].record.id, "b");
    }
}
