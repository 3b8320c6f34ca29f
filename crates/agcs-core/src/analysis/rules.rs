//! Threshold rules for anomaly detection. Always available.

use serde::{Deserialize, Serialize};

use super::{DetectionMethod, Detector, Verdict, NOMINAL_CONFIDENCE};
use crate::models::TelemetrySample;

const CONFIDENCE_SPAN: f64 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnomalyThresholds {
    pub low_battery_percent: f64,
    /// Fix types below this are degraded (3 = 3D fix).
    pub min_gps_fix: u8,
    pub speed_deviation_ms: f64,
    pub min_satellites: u8,
    pub max_altitude_m: f64,
}

impl Default for AnomalyThresholds {
    fn default() -> Self {
        Self {
            low_battery_percent: 15.0,
            min_gps_fix: 3,
            speed_deviation_ms: 3.0,
            min_satellites: 6,
            max_altitude_m: 150.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedDetector {
    thresholds: AnomalyThresholds,
}

impl RuleBasedDetector {
    pub fn new(thresholds: AnomalyThresholds) -> Self {
        Self { thresholds }
    }
}

/// Map how far past a threshold a value is (0 = at threshold, 1 = fully) to
/// a confidence in [0.5, 0.9].
fn breach_confidence(ratio: f64) -> f64 {
    let ratio = if ratio.is_finite() { ratio.clamp(0.0, 1.0) } else { 1.0 };
    NOMINAL_CONFIDENCE + CONFIDENCE_SPAN * ratio
}

impl Detector for RuleBasedDetector {
    fn evaluate(&self, sample: &TelemetrySample, commanded_speed_ms: Option<f64>) -> Verdict {
        let t = &self.thresholds;
        let mut breaches: Vec<(&str, f64)> = Vec::new();

        if sample.battery_percent < t.low_battery_percent {
            let ratio = (t.low_battery_percent - sample.battery_percent) / t.low_battery_percent;
            breaches.push(("Low battery", ratio));
        }

        if sample.gps_fix_type < t.min_gps_fix {
            let ratio = f64::from(t.min_gps_fix - sample.gps_fix_type) / f64::from(t.min_gps_fix);
            breaches.push(("GPS fix degraded", ratio));
        }

        if let Some(commanded) = commanded_speed_ms {
            let deviation = (sample.speed_ms - commanded).abs();
            if deviation > t.speed_deviation_ms {
                let ratio = (deviation - t.speed_deviation_ms) / t.speed_deviation_ms;
                breaches.push(("Speed deviation", ratio));
            }
        }

        if sample.satellites_visible < t.min_satellites {
            let ratio =
                f64::from(t.min_satellites - sample.satellites_visible) / f64::from(t.min_satellites);
            breaches.push(("Insufficient GPS satellites", ratio));
        }

        if sample.altitude_m > t.max_altitude_m {
            let ratio = (sample.altitude_m - t.max_altitude_m) / t.max_altitude_m;
            breaches.push(("Altitude too high", ratio));
        }

        let confidence = breaches
            .iter()
            .map(|(_, ratio)| breach_confidence(*ratio))
            .fold(NOMINAL_CONFIDENCE, f64::max);

        Verdict {
            is_anomaly: !breaches.is_empty(),
            confidence,
            anomalies: breaches.into_iter().map(|(name, _)| name.to_string()).collect(),
            method: DetectionMethod::RuleBased,
            score: None,
        }
    }

    fn method(&self) -> DetectionMethod {
        DetectionMethod::RuleBased
    }
}
