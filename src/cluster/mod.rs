//! Deterministic spatial aggregation.
//!
//! Pure function of its inputs: identical point lists (including order),
//! zoom and viewport always yield identical cluster assignments, synthetic
//! centers and ids. Grid buckets are keyed in a `BTreeMap` so output order
//! never depends on hash-map iteration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::ClusterConfig;

/// Flat input point (agent or marker).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClusterPoint {
    pub id: String,
    pub lon: f64,
    pub lat: f64,
}

/// Viewport bounds in degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl Bounds {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    fn expanded(&self, margin_lon: f64, margin_lat: f64) -> Self {
        Self {
            west: self.west - margin_lon,
            south: self.south - margin_lat,
            east: self.east + margin_lon,
            north: self.north + margin_lat,
        }
    }

    fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.west && lon <= self.east && lat >= self.south && lat <= self.north
    }
}

/// Output feature: either a pass-through singleton or a synthetic cluster.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClusterFeature {
    /// Singletons keep their original identity; clusters derive theirs
    /// from the sorted member ids, so equal membership always yields the
    /// same id (stable highlighting downstream).
    pub id: String,
    pub lon: f64,
    pub lat: f64,
    pub cluster: bool,
    pub point_count: usize,
    pub members: Vec<String>,
}

/// Group points into clusters for the given zoom and viewport.
///
/// Inclusion rule: points inside `bounds` expanded by
/// `margin_fraction` of the viewport span on each edge take part in
/// clustering; everything further out is excluded. The margin avoids
/// clusters popping in and out right at the viewport boundary.
pub fn cluster(
    points: &[ClusterPoint],
    zoom: f64,
    bounds: Bounds,
    cfg: &ClusterConfig,
) -> Vec<ClusterFeature> {
    let margin_lon = (bounds.east - bounds.west) * cfg.margin_fraction;
    let margin_lat = (bounds.north - bounds.south) * cfg.margin_fraction;
    let visible = bounds.expanded(margin_lon, margin_lat);

    // Cell size in degrees for a radius expressed in screen pixels against
    // a 512px world tile (the supercluster convention).
    let zoom = zoom.clamp(cfg.min_zoom, cfg.max_zoom);
    let cell = 360.0 * cfg.radius_px / (512.0 * 2f64.powf(zoom));

    let mut buckets: BTreeMap<(i64, i64), Vec<&ClusterPoint>> = BTreeMap::new();
    for point in points {
        if !visible.contains(point.lon, point.lat) {
            continue;
        }
        let key = (
            (point.lon / cell).floor() as i64,
            (point.lat / cell).floor() as i64,
        );
        buckets.entry(key).or_default().push(point);
    }

    let mut features = Vec::with_capacity(buckets.len());
    for members in buckets.into_values() {
        if let [point] = members.as_slice() {
            features.push(ClusterFeature {
                id: point.id.clone(),
                lon: point.lon,
                lat: point.lat,
                cluster: false,
                point_count: 1,
                members: vec![point.id.clone()],
            });
            continue;
        }

        let count = members.len();
        let lon = members.iter().map(|p| p.lon).sum::<f64>() / count as f64;
        let lat = members.iter().map(|p| p.lat).sum::<f64>() / count as f64;
        let mut ids: Vec<String> = members.iter().map(|p| p.id.clone()).collect();
        ids.sort();
        features.push(ClusterFeature {
            id: format!("cluster-{}", ids.join("+")),
            lon,
            lat,
            cluster: true,
            point_count: count,
            members: ids,
        });
    }
    features
}
