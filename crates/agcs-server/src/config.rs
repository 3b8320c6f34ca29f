//! Server configuration from environment.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use agcs_core::analysis::AnomalyThresholds;
use agcs_core::simulation::{JitterSettings, SimulationParams};

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_path: String,
    pub database_max_connections: u32,
    /// Emit JSON log lines instead of the human-readable format.
    pub log_json: bool,

    /// Wall-clock period between simulator ticks.
    pub tick: Duration,
    /// Simulated seconds per wall-clock second.
    pub time_scale: f64,
    pub simulation: SimulationParams,

    pub observer_queue_capacity: usize,
    pub observer_idle: Duration,
    pub heartbeat_interval: Duration,

    pub thresholds: AnomalyThresholds,
    pub analysis_queue_capacity: usize,
    pub model_min_samples: usize,
    pub battery_prediction_every: usize,
    pub alert_cooldown: Duration,

    pub persist_queue_capacity: usize,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Like `env_or`, but zero, negative and non-finite values fall back to the
/// default.
fn positive_or(key: &str, default: f64) -> f64 {
    let value: f64 = env_or(key, default);
    if value.is_finite() && value > 0.0 {
        value
    } else {
        default
    }
}

impl Config {
    pub fn from_env() -> Self {
        let thresholds = AnomalyThresholds {
            speed_deviation_ms: env_or("AGCS_SPEED_DEVIATION_MS", 3.0),
            ..AnomalyThresholds::default()
        };

        Self {
            server_port: env_or("AGCS_PORT", 3000),
            database_path: env::var("AGCS_DATABASE_PATH")
                .unwrap_or_else(|_| "data/agcs.db".to_string()),
            database_max_connections: env_or("AGCS_DATABASE_MAX_CONNECTIONS", 5),
            log_json: env::var("AGCS_LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),

            tick: Duration::from_millis(env_or::<u64>("AGCS_TICK_MS", 100).max(1)),
            time_scale: positive_or("AGCS_TIME_SCALE", 1.0),
            simulation: SimulationParams {
                battery_drain_rate: env_or("AGCS_BATTERY_DRAIN_RATE", 0.5),
                battery_floor_percent: 10.0,
                jitter: JitterSettings {
                    heading_deg: env_or("AGCS_JITTER_HEADING_DEG", 2.0),
                    attitude_deg: env_or("AGCS_JITTER_ATTITUDE_DEG", 1.0),
                    satellites: env_or("AGCS_JITTER_SATELLITES", 1),
                },
                seed: env::var("AGCS_SIM_SEED").ok().and_then(|s| s.parse().ok()),
            },

            observer_queue_capacity: env_or::<usize>("AGCS_OBSERVER_QUEUE", 256).max(1),
            observer_idle: Duration::from_secs(env_or("AGCS_OBSERVER_IDLE_SECS", 30)),
            heartbeat_interval: Duration::from_secs(env_or::<u64>("AGCS_HEARTBEAT_SECS", 10).max(1)),

            thresholds,
            analysis_queue_capacity: env_or::<usize>("AGCS_ANALYSIS_QUEUE", 1024).max(1),
            model_min_samples: env_or("AGCS_MODEL_MIN_SAMPLES", 50),
            battery_prediction_every: env_or::<usize>("AGCS_BATTERY_PREDICTION_EVERY", 50).max(1),
            alert_cooldown: Duration::from_secs(env_or("AGCS_ALERT_COOLDOWN_SECS", 10)),

            persist_queue_capacity: env_or::<usize>("AGCS_PERSIST_QUEUE", 4096).max(1),
        }
    }

    /// Simulated seconds covered by one tick.
    pub fn sim_dt_s(&self) -> f64 {
        self.tick.as_secs_f64() * self.time_scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_environment() {
        let config = Config::from_env();
        if env::var("AGCS_TICK_MS").is_err() && env::var("AGCS_TIME_SCALE").is_err() {
            assert!((config.sim_dt_s() - 0.1).abs() < 1e-12);
        }
        if env::var("AGCS_OBSERVER_QUEUE").is_err() {
            assert_eq!(config.observer_queue_capacity, 256);
        }
        assert!(config.persist_queue_capacity >= 1);
        assert!(config.time_scale > 0.0);
    }

    #[test]
    fn non_positive_values_fall_back_to_default() {
        for (key, raw) in [
            ("AGCS_TEST_SCALE_ZERO", "0"),
            ("AGCS_TEST_SCALE_NEGATIVE", "-2.5"),
            ("AGCS_TEST_SCALE_NAN", "NaN"),
            ("AGCS_TEST_SCALE_JUNK", "fast"),
        ] {
            env::set_var(key, raw);
            assert_eq!(positive_or(key, 1.0), 1.0, "{}={}", key, raw);
        }
        env::set_var("AGCS_TEST_SCALE_OK", "20");
        assert_eq!(positive_or("AGCS_TEST_SCALE_OK", 1.0), 20.0);
    }
}
