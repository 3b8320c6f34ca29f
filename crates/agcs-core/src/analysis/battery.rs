//! Battery drain prediction by linear regression over flight time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;
use crate::models::{Insight, InsightKind, MissionId, TelemetrySample};

pub const RESERVE_PERCENT: f64 = 10.0;
pub const MAX_REMAINING_MINUTES: f64 = 120.0;
const MIN_CONFIDENCE: f64 = 0.1;
const MAX_CONFIDENCE: f64 = 0.9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryPrediction {
    /// Percent per minute; positive while draining.
    pub drain_rate: f64,
    /// Minutes until the reserve is reached, capped.
    pub remaining_minutes: f64,
    pub current_battery: f64,
    pub confidence: f64,
    pub recommendations: Vec<String>,
    pub data_points: usize,
}

impl BatteryPrediction {
    pub fn is_critical(&self) -> bool {
        self.remaining_minutes < 10.0
    }

    pub fn into_insight(self, mission_id: MissionId, timestamp: DateTime<Utc>) -> Insight {
        let message = format!(
            "{:.1} min to {:.0}% reserve at {:.2}%/min",
            self.remaining_minutes, RESERVE_PERCENT, self.drain_rate
        );
        Insight {
            mission_id,
            timestamp,
            kind: InsightKind::BatteryPrediction,
            confidence: self.confidence,
            is_alert: self.is_critical(),
            message,
            data: serde_json::to_value(&self).unwrap_or_default(),
        }
    }
}

/// Fit `battery_percent` against minutes since the first sample.
///
/// Samples are expected in timestamp order.
pub fn predict_battery_drain(samples: &[TelemetrySample]) -> Result<BatteryPrediction, AnalysisError> {
    if samples.len() < 2 {
        return Err(AnalysisError::InsufficientData {
            samples: samples.len(),
            reason: "battery prediction needs at least 2 samples".into(),
        });
    }

    let start = samples[0].timestamp;
    let points: Vec<(f64, f64)> = samples
        .iter()
        .map(|s| {
            let minutes = (s.timestamp - start).num_milliseconds() as f64 / 60_000.0;
            (minutes, s.battery_percent)
        })
        .collect();

    let n = points.len() as f64;
    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;
    let sxx: f64 = points.iter().map(|(x, _)| (x - mean_x).powi(2)).sum();
    if sxx <= 0.0 {
        return Err(AnalysisError::InsufficientData {
            samples: samples.len(),
            reason: "samples span zero time".into(),
        });
    }
    let sxy: f64 = points.iter().map(|(x, y)| (x - mean_x) * (y - mean_y)).sum();
    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;

    let ss_tot: f64 = points.iter().map(|(_, y)| (y - mean_y).powi(2)).sum();
    let ss_res: f64 = points
        .iter()
        .map(|(x, y)| (y - (intercept + slope * x)).powi(2))
        .sum();
    let r_squared = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 1.0 };

    let drain_rate = -slope;
    let current_battery = samples[samples.len() - 1].battery_percent;
    let remaining_minutes = if drain_rate > 0.0 {
        ((current_battery - RESERVE_PERCENT).max(0.0) / drain_rate).min(MAX_REMAINING_MINUTES)
    } else {
        MAX_REMAINING_MINUTES
    };

    let mut recommendations = Vec::new();
    if remaining_minutes < 10.0 {
        recommendations.push("Return to base immediately".to_string());
    } else if remaining_minutes < 20.0 {
        recommendations.push("Consider returning to base soon".to_string());
    } else if drain_rate > 2.0 {
        recommendations.push("High battery consumption detected".to_string());
    }

    Ok(BatteryPrediction {
        drain_rate,
        remaining_minutes,
        current_battery,
        confidence: r_squared.clamp(MIN_CONFIDENCE, MAX_CONFIDENCE),
        recommendations,
        data_points: samples.len(),
    })
}
