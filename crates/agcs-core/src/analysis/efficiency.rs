//! Planned versus flown path comparison.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;
use crate::models::{Insight, InsightKind, MissionId, TelemetrySample, Waypoint};
use crate::path::{haversine_distance, total_distance};

pub const MIN_EFFICIENCY_SAMPLES: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightEfficiency {
    /// planned / flown distance as a percentage, capped at 100.
    pub path_efficiency: f64,
    pub planned_distance_m: f64,
    pub actual_distance_m: f64,
    pub average_speed_ms: f64,
    /// 100 minus the speed variance, floored at 0.
    pub speed_consistency: f64,
    pub data_points: usize,
}

impl FlightEfficiency {
    pub fn into_insight(self, mission_id: MissionId, timestamp: DateTime<Utc>) -> Insight {
        let message = format!(
            "Path efficiency {:.1}%, average speed {:.1} m/s",
            self.path_efficiency, self.average_speed_ms
        );
        Insight {
            mission_id,
            timestamp,
            kind: InsightKind::FlightEfficiency,
            confidence: (self.data_points as f64 / 100.0).clamp(0.1, 0.9),
            is_alert: false,
            message,
            data: serde_json::to_value(&self).unwrap_or_default(),
        }
    }
}

pub fn analyze_efficiency(
    samples: &[TelemetrySample],
    waypoints: &[Waypoint],
) -> Result<FlightEfficiency, AnalysisError> {
    if samples.len() < MIN_EFFICIENCY_SAMPLES || waypoints.len() < 2 {
        return Err(AnalysisError::InsufficientData {
            samples: samples.len(),
            reason: format!(
                "efficiency analysis needs {} samples and 2 waypoints",
                MIN_EFFICIENCY_SAMPLES
            ),
        });
    }

    let planned_distance_m = total_distance(waypoints);
    let actual_distance_m: f64 = samples
        .windows(2)
        .map(|pair| haversine_distance(pair[0].lat, pair[0].lon, pair[1].lat, pair[1].lon))
        .sum();

    let path_efficiency = if actual_distance_m > 0.0 {
        (planned_distance_m / actual_distance_m * 100.0).min(100.0)
    } else {
        0.0
    };

    let n = samples.len() as f64;
    let average_speed_ms = samples.iter().map(|s| s.speed_ms).sum::<f64>() / n;
    let variance = samples
        .iter()
        .map(|s| (s.speed_ms - average_speed_ms).powi(2))
        .sum::<f64>()
        / n;

    Ok(FlightEfficiency {
        path_efficiency,
        planned_distance_m,
        actual_distance_m,
        average_speed_ms,
        speed_consistency: (100.0 - variance).max(0.0),
        data_points: samples.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::test_support::sample;

    fn wp(sequence: u32, lon: f64) -> Waypoint {
        Waypoint {
            sequence,
            latitude: 0.0,
            longitude: lon,
            altitude_m: 30.0,
            action: None,
            duration_s: 0.0,
        }
    }

    #[test]
    fn straight_flight_is_fully_efficient() {
        let waypoints = vec![wp(1, 0.0), wp(2, 0.001)];
        let samples: Vec<_> = (0..=10)
            .map(|i| {
                let mut s = sample(i, 90.0);
                s.lat = 0.0;
                s.lon = 0.0001 * i as f64;
                s
            })
            .collect();

        let result = analyze_efficiency(&samples, &waypoints).unwrap();
        assert!((result.path_efficiency - 100.0).abs() < 1e-6);
        assert!((result.actual_distance_m - result.planned_distance_m).abs() < 1e-6);
        assert_eq!(result.average_speed_ms, 5.0);
        assert_eq!(result.speed_consistency, 100.0);
    }

    #[test]
    fn detour_lowers_efficiency() {
        let waypoints = vec![wp(1, 0.0), wp(2, 0.001)];
        let samples: Vec<_> = (0..=10)
            .map(|i| {
                let mut s = sample(i, 90.0);
                s.lat = if i % 2 == 0 { 0.0 } else { 0.0005 };
                s.lon = 0.0001 * i as f64;
                s
            })
            .collect();
        let result = analyze_efficiency(&samples, &waypoints).unwrap();
        assert!(result.path_efficiency < 50.0);
    }

    #[test]
    fn needs_enough_samples() {
        let waypoints = vec![wp(1, 0.0), wp(2, 0.001)];
        let samples: Vec<_> = (0..3).map(|i| sample(i, 90.0)).collect();
        assert!(analyze_efficiency(&samples, &waypoints).is_err());
    }
}
