//! Spatial math along a waypoint polyline.
//!
//! Everything here is pure and deterministic so simulator runs can be
//! reproduced exactly in tests.

use serde::{Deserialize, Serialize};

use crate::models::Waypoint;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A position in degrees with altitude above ground.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
    pub altitude_m: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64, altitude_m: f64) -> Self {
        Self { lat, lon, altitude_m }
    }
}

impl From<&Waypoint> for GeoPoint {
    fn from(wp: &Waypoint) -> Self {
        Self::new(wp.latitude, wp.longitude, wp.altitude_m)
    }
}

/// Great-circle distance in meters between two lat/lon pairs.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();
    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Horizontal distance in meters between two points (altitude ignored).
pub fn distance(a: &GeoPoint, b: &GeoPoint) -> f64 {
    haversine_distance(a.lat, a.lon, b.lat, b.lon)
}

/// Initial bearing from `a` to `b` in degrees, normalized to [0, 360).
pub fn bearing(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();

    let deg = y.atan2(x).to_degrees().rem_euclid(360.0);
    // rem_euclid can return 360.0 for tiny negative inputs
    if deg >= 360.0 {
        0.0
    } else {
        deg
    }
}

/// Linear interpolation in lat/lon/altitude space. `t` is clamped to [0, 1].
///
/// Not geodesically exact, which is fine at field scale.
pub fn interpolate(a: &GeoPoint, b: &GeoPoint, t: f64) -> GeoPoint {
    let t = t.clamp(0.0, 1.0);
    GeoPoint {
        lat: a.lat + (b.lat - a.lat) * t,
        lon: a.lon + (b.lon - a.lon) * t,
        altitude_m: a.altitude_m + (b.altitude_m - a.altitude_m) * t,
    }
}

/// Segment lengths between consecutive waypoints, in order.
pub fn segment_lengths(waypoints: &[Waypoint]) -> Vec<f64> {
    waypoints
        .windows(2)
        .map(|pair| distance(&GeoPoint::from(&pair[0]), &GeoPoint::from(&pair[1])))
        .collect()
}

/// Sum of segment distances from the first waypoint to the last.
///
/// There is no implicit return leg.
pub fn total_distance(waypoints: &[Waypoint]) -> f64 {
    segment_lengths(waypoints).iter().sum()
}
