//! Isolation forest over telemetry feature vectors.
//!
//! Outliers are isolated by fewer random splits than inliers. The anomaly
//! score is `2^(-E[h(x)] / c(n))`: close to 1 for outliers, around 0.5 or
//! below for normal points.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;
use crate::models::TelemetrySample;

pub const FEATURE_COUNT: usize = 7;

pub type Features = [f64; FEATURE_COUNT];

const EULER_GAMMA: f64 = 0.577_215_664_9;

/// altitude, speed, battery, roll, pitch, gps fix, satellites
pub fn features(sample: &TelemetrySample) -> Features {
    [
        sample.altitude_m,
        sample.speed_ms,
        sample.battery_percent,
        sample.roll_deg,
        sample.pitch_deg,
        f64::from(sample.gps_fix_type),
        f64::from(sample.satellites_visible),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub trees: usize,
    pub sample_size: usize,
    /// Scores above this are outliers.
    pub threshold: f64,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            trees: 100,
            sample_size: 256,
            threshold: 0.6,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        value: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: Vec<Node>,
    subsample: usize,
    threshold: f64,
    training_size: usize,
}

impl IsolationForest {
    pub fn fit(data: &[Features], params: ForestParams) -> Result<Self, AnalysisError> {
        if data.len() < 2 {
            return Err(AnalysisError::InsufficientData {
                samples: data.len(),
                reason: "isolation forest needs at least 2 samples".into(),
            });
        }

        let mut rng = StdRng::seed_from_u64(params.seed);
        let subsample = params.sample_size.clamp(2, data.len());
        let height_limit = (subsample as f64).log2().ceil() as usize;

        let trees = (0..params.trees.max(1))
            .map(|_| {
                let mut points: Vec<Features> = index::sample(&mut rng, data.len(), subsample)
                    .into_iter()
                    .map(|i| data[i])
                    .collect();
                grow(&mut points, 0, height_limit, &mut rng)
            })
            .collect();

        Ok(Self {
            trees,
            subsample,
            threshold: params.threshold,
            training_size: data.len(),
        })
    }

    pub fn score(&self, x: &Features) -> f64 {
        let mean_path = self
            .trees
            .iter()
            .map(|tree| path_length(tree, x, 0))
            .sum::<f64>()
            / self.trees.len() as f64;
        2f64.powf(-mean_path / average_path_length(self.subsample))
    }

    pub fn is_outlier(&self, score: f64) -> bool {
        score > self.threshold
    }

    pub fn training_size(&self) -> usize {
        self.training_size
    }
}

fn grow(points: &mut [Features], depth: usize, height_limit: usize, rng: &mut StdRng) -> Node {
    if depth >= height_limit || points.len() <= 1 {
        return Node::Leaf { size: points.len() };
    }

    let splittable: Vec<(usize, f64, f64)> = (0..FEATURE_COUNT)
        .filter_map(|f| {
            let (lo, hi) = points
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| (lo.min(p[f]), hi.max(p[f])));
            (hi > lo).then_some((f, lo, hi))
        })
        .collect();

    if splittable.is_empty() {
        return Node::Leaf { size: points.len() };
    }

    let (feature, lo, hi) = splittable[rng.random_range(0..splittable.len())];
    let value = rng.random_range(lo..hi);

    // partition in place: [< value | >= value]
    let mut mid = 0;
    for i in 0..points.len() {
        if points[i][feature] < value {
            points.swap(i, mid);
            mid += 1;
        }
    }
    let (left, right) = points.split_at_mut(mid);

    Node::Split {
        feature,
        value,
        left: Box::new(grow(left, depth + 1, height_limit, rng)),
        right: Box::new(grow(right, depth + 1, height_limit, rng)),
    }
}

fn path_length(node: &Node, x: &Features, depth: usize) -> f64 {
    match node {
        Node::Leaf { size } => depth as f64 + average_path_length(*size),
        Node::Split {
            feature,
            value,
            left,
            right,
        } => {
            if x[*feature] < *value {
                path_length(left, x, depth + 1)
            } else {
                path_length(right, x, depth + 1)
            }
        }
    }
}

/// Average path length of an unsuccessful BST search over `n` points.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(n: usize, seed: u64) -> Vec<Features> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                [
                    30.0 + rng.random_range(-1.0..1.0),
                    5.0 + rng.random_range(-0.5..0.5),
                    80.0 + rng.random_range(-2.0..2.0),
                    rng.random_range(-1.0..1.0),
                    -2.5 + rng.random_range(-1.0..1.0),
                    3.0,
                    12.0 + rng.random_range(-1.0..1.0_f64).round(),
                ]
            })
            .collect()
    }

    #[test]
    fn outlier_scores_above_inlier() {
        let params = ForestParams {
            threshold: 0.55,
            ..ForestParams::default()
        };
        let forest = IsolationForest::fit(&cluster(300, 1), params).unwrap();
        let inlier = [30.0, 5.0, 80.0, 0.0, -2.5, 3.0, 12.0];
        let outlier = [140.0, 18.0, 20.0, 30.0, 15.0, 1.0, 4.0];

        let inlier_score = forest.score(&inlier);
        let outlier_score = forest.score(&outlier);
        assert!(outlier_score > inlier_score + 0.1);
        assert!(inlier_score < 0.5);
        assert!(forest.is_outlier(outlier_score));
        assert!(!forest.is_outlier(inlier_score));
        assert!(outlier_score <= 1.0 && inlier_score > 0.0);
    }

    #[test]
    fn same_seed_same_scores() {
        let data = cluster(120, 9);
        let a = IsolationForest::fit(&data, ForestParams::default()).unwrap();
        let b = IsolationForest::fit(&data, ForestParams::default()).unwrap();
        let x = [35.0, 6.0, 70.0, 2.0, 0.0, 3.0, 10.0];
        assert_eq!(a.score(&x), b.score(&x));
        assert_eq!(a.training_size(), 120);
    }

    #[test]
    fn refuses_tiny_training_set() {
        assert!(IsolationForest::fit(&cluster(1, 0), ForestParams::default()).is_err());
    }

    #[test]
    fn average_path_length_matches_known_values() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        assert!((average_path_length(256) - 10.24).abs() < 0.01);
    }
}
