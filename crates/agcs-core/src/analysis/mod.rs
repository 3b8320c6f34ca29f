//! Telemetry analysis: anomaly detection, battery prediction and flight efficiency.
//!
//! Everything here is synchronous and side-effect free. The server runs it on
//! its own task so the publish path never waits for analysis.

pub mod battery;
pub mod efficiency;
pub mod forest;
pub mod rules;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::models::{Insight, InsightKind, MissionId, TelemetrySample};

pub use battery::{predict_battery_drain, BatteryPrediction};
pub use efficiency::{analyze_efficiency, FlightEfficiency};
pub use forest::{ForestParams, IsolationForest};
pub use rules::{AnomalyThresholds, RuleBasedDetector};

/// Confidence reported when no anomaly was found.
pub const NOMINAL_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    RuleBased,
    Learned,
}

/// Result of scoring a single sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub is_anomaly: bool,
    pub confidence: f64,
    pub anomalies: Vec<String>,
    pub method: DetectionMethod,
    /// Isolation score in (0, 1]; only set by the learned detector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl Verdict {
    pub fn message(&self) -> String {
        if self.anomalies.is_empty() {
            "Nominal".to_string()
        } else {
            self.anomalies.join("; ")
        }
    }

    pub fn into_insight(self, mission_id: MissionId, timestamp: DateTime<Utc>) -> Insight {
        let message = self.message();
        let data = serde_json::json!({
            "anomalies": self.anomalies,
            "method": self.method,
            "score": self.score,
        });
        Insight {
            mission_id,
            timestamp,
            kind: InsightKind::Anomaly,
            confidence: self.confidence,
            is_alert: self.is_anomaly,
            message,
            data,
        }
    }
}

/// Anomaly detection strategy.
pub trait Detector: Send + Sync {
    /// Score one sample. `commanded_speed_ms` enables the speed deviation rule.
    fn evaluate(&self, sample: &TelemetrySample, commanded_speed_ms: Option<f64>) -> Verdict;

    fn method(&self) -> DetectionMethod;
}

/// Isolation-forest scoring layered on top of the rules.
pub struct LearnedDetector {
    rules: RuleBasedDetector,
    model: Arc<IsolationForest>,
}

impl LearnedDetector {
    pub fn new(rules: RuleBasedDetector, model: Arc<IsolationForest>) -> Self {
        Self { rules, model }
    }
}

impl Detector for LearnedDetector {
    fn evaluate(&self, sample: &TelemetrySample, commanded_speed_ms: Option<f64>) -> Verdict {
        let mut verdict = self.rules.evaluate(sample, commanded_speed_ms);
        let score = self.model.score(&forest::features(sample));

        if self.model.is_outlier(score) {
            verdict.anomalies.push("Anomalous flight pattern".to_string());
            let learned_confidence = score.clamp(NOMINAL_CONFIDENCE, 1.0);
            verdict.confidence = if verdict.is_anomaly {
                verdict.confidence.max(learned_confidence)
            } else {
                learned_confidence
            };
            verdict.is_anomaly = true;
        }

        verdict.method = DetectionMethod::Learned;
        verdict.score = Some(score);
        verdict
    }

    fn method(&self) -> DetectionMethod {
        DetectionMethod::Learned
    }
}

/// Learned detector when a trained model exists, otherwise the rules alone.
pub fn select_detector(
    thresholds: AnomalyThresholds,
    model: Option<Arc<IsolationForest>>,
) -> Box<dyn Detector> {
    let rules = RuleBasedDetector::new(thresholds);
    match model {
        Some(model) => Box::new(LearnedDetector::new(rules, model)),
        None => Box::new(rules),
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::sample;
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn trained_model() -> Arc<IsolationForest> {
        let mut rng = StdRng::seed_from_u64(3);
        let data: Vec<_> = (0..200)
            .map(|i| {
                let mut s = sample(i, 90.0 - i as f64 * 0.01);
                s.altitude_m += rng.random_range(-1.0..1.0);
                s.speed_ms += rng.random_range(-0.3..0.3);
                s.roll_deg = rng.random_range(-1.0..1.0);
                s.pitch_deg += rng.random_range(-1.0..1.0);
                forest::features(&s)
            })
            .collect();
        Arc::new(IsolationForest::fit(&data, ForestParams::default()).unwrap())
    }

    #[test]
    fn selects_rules_without_model() {
        let detector = select_detector(AnomalyThresholds::default(), None);
        assert_eq!(detector.method(), DetectionMethod::RuleBased);

        let verdict = detector.evaluate(&sample(0, 90.0), Some(5.0));
        assert!(!verdict.is_anomaly);
        assert_eq!(verdict.confidence, NOMINAL_CONFIDENCE);
    }

    #[test]
    fn learned_detector_flags_outliers_and_keeps_rules() {
        let detector = select_detector(AnomalyThresholds::default(), Some(trained_model()));
        assert_eq!(detector.method(), DetectionMethod::Learned);

        let mut outlier = sample(0, 12.0);
        outlier.altitude_m = 120.0;
        outlier.speed_ms = 14.0;
        outlier.roll_deg = 25.0;
        let verdict = detector.evaluate(&outlier, None);
        assert!(verdict.is_anomaly);
        assert!(verdict.anomalies.iter().any(|a| a == "Low battery"));
        let nominal = detector.evaluate(&sample(100, 89.0), None);
        assert!(verdict.score.unwrap() > nominal.score.unwrap());
        assert!((0.5..=1.0).contains(&verdict.confidence));
    }

    #[test]
    fn verdict_becomes_alert_insight() {
        let detector = RuleBasedDetector::default();
        let verdict = detector.evaluate(&sample(0, 5.0), None);
        let insight = verdict.into_insight(9, Utc::now());
        assert_eq!(insight.kind, InsightKind::Anomaly);
        assert!(insight.is_alert);
        assert_eq!(insight.mission_id, 9);
        assert!(insight.message.contains("Low battery"));
    }
}
