//! Field survey waypoint patterns.

use agcs_core::models::Waypoint;

const METERS_PER_DEG_LAT: f64 = 111_320.0;
const MIN_SPACING_M: f64 = 1.0;

/// Rectangular field anchored at its south-west corner.
#[derive(Debug, Clone, Copy)]
pub struct SurveyArea {
    pub origin_lat: f64,
    pub origin_lon: f64,
    /// East-west extent.
    pub width_m: f64,
    /// North-south extent.
    pub height_m: f64,
    /// Distance between adjacent passes.
    pub spacing_m: f64,
    pub altitude_m: f64,
}

/// Shift a position by a local north/east offset (flat-earth approximation).
pub fn offset_position(lat: f64, lon: f64, north_m: f64, east_m: f64) -> (f64, f64) {
    let dlat = north_m / METERS_PER_DEG_LAT;
    let dlon = east_m / (METERS_PER_DEG_LAT * lat.to_radians().cos());
    (lat + dlat, lon + dlon)
}

/// Lawnmower pattern: north-south passes stepping east, alternating
/// direction. Two waypoints per pass.
pub fn serpentine(area: &SurveyArea) -> Vec<Waypoint> {
    let spacing = area.spacing_m.max(MIN_SPACING_M);
    let width = area.width_m.max(0.0);
    let height = area.height_m.max(0.0);
    let passes = (width / spacing).floor() as usize + 1;

    let mut waypoints = Vec::with_capacity(passes * 2);
    for pass in 0..passes {
        let east = (pass as f64 * spacing).min(width);
        let (first, second) = if pass % 2 == 0 {
            (0.0, height)
        } else {
            (height, 0.0)
        };

        for north in [first, second] {
            let (lat, lon) = offset_position(area.origin_lat, area.origin_lon, north, east);
            waypoints.push(Waypoint {
                sequence: waypoints.len() as u32,
                latitude: lat,
                longitude: lon,
                altitude_m: area.altitude_m,
                action: None,
                duration_s: 0.0,
            });
        }
    }
    waypoints
}
