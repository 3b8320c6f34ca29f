//! Flight simulation along a mission's waypoints.
//!
//! The simulator is a plain state machine advanced by [`FlightSimulator::step`];
//! the server drives it from a timer. Given the same Δt sequence it always
//! produces the same path, distance and progress. Only the reported sensor
//! jitter is random.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::MissionError;
use crate::models::{Mission, MissionId, TelemetrySample};
use crate::path::{bearing, interpolate, segment_lengths, GeoPoint};

const BASE_SATELLITES: u8 = 12;
const MIN_SATELLITES: i16 = 6;
const MAX_SATELLITES: i16 = 20;
const MAX_PITCH_DEG: f64 = 10.0;

/// Magnitudes of the uniform noise added to reported sensor values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JitterSettings {
    pub heading_deg: f64,
    pub attitude_deg: f64,
    pub satellites: u8,
}

impl JitterSettings {
    pub fn none() -> Self {
        Self {
            heading_deg: 0.0,
            attitude_deg: 0.0,
            satellites: 0,
        }
    }
}

impl Default for JitterSettings {
    fn default() -> Self {
        Self {
            heading_deg: 2.0,
            attitude_deg: 1.0,
            satellites: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationParams {
    /// Battery drain in percent per minute of flight.
    pub battery_drain_rate: f64,
    /// The simulator never reports a battery below this level.
    pub battery_floor_percent: f64,
    pub jitter: JitterSettings,
    /// Fixed RNG seed for reproducible jitter.
    pub seed: Option<u64>,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            battery_drain_rate: 0.5,
            battery_floor_percent: 10.0,
            jitter: JitterSettings::default(),
            seed: None,
        }
    }
}

/// Exact simulator position along the route.
///
/// Restoring a simulator from its snapshot continues the same path with no
/// teleport and no double-counted distance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimSnapshot {
    /// Index of the last waypoint reached; the target is the next one.
    pub current_waypoint_index: usize,
    /// Fraction of the current segment already flown.
    pub segment_fraction: f64,
    /// Sum of fully completed segment lengths.
    pub completed_distance_m: f64,
    /// Simulated flight time.
    pub elapsed_s: f64,
    pub finished: bool,
}

/// Outcome of one simulator tick.
#[derive(Debug, Clone)]
pub struct SimStep {
    pub sample: TelemetrySample,
    pub progress: f64,
    pub waypoint_index: usize,
    pub distance_traveled_m: f64,
    /// Set when this tick snapped onto a waypoint.
    pub waypoint_reached: Option<usize>,
    pub finished: bool,
}

pub struct FlightSimulator {
    mission_id: MissionId,
    points: Vec<GeoPoint>,
    segments: Vec<f64>,
    total_distance_m: f64,
    speed_ms: f64,
    params: SimulationParams,
    index: usize,
    fraction: f64,
    completed_distance_m: f64,
    elapsed_s: f64,
    finished: bool,
    last_heading_deg: f64,
    rng: StdRng,
}

impl FlightSimulator {
    /// Create a simulator positioned on the first waypoint.
    pub fn new(mission: &Mission, params: SimulationParams) -> Result<Self, MissionError> {
        if mission.waypoints.len() < 2 {
            return Err(MissionError::InsufficientWaypoints {
                count: mission.waypoints.len(),
            });
        }
        if !(mission.speed_ms.is_finite() && mission.speed_ms > 0.0) {
            return Err(MissionError::InvalidMission(format!(
                "speed_ms must be positive, got {}",
                mission.speed_ms
            )));
        }

        let points: Vec<GeoPoint> = mission.waypoints.iter().map(GeoPoint::from).collect();
        let segments = segment_lengths(&mission.waypoints);
        let total_distance_m = segments.iter().sum();
        let last_heading_deg = bearing(&points[0], &points[1]);
        let rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };

        Ok(Self {
            mission_id: mission.id,
            points,
            segments,
            total_distance_m,
            speed_ms: mission.speed_ms,
            params,
            index: 0,
            fraction: 0.0,
            completed_distance_m: 0.0,
            elapsed_s: 0.0,
            finished: false,
            last_heading_deg,
            rng,
        })
    }

    /// Recreate a simulator at a previously captured position.
    pub fn from_snapshot(
        mission: &Mission,
        params: SimulationParams,
        snapshot: SimSnapshot,
    ) -> Result<Self, MissionError> {
        let mut sim = Self::new(mission, params)?;
        let last = sim.points.len() - 1;
        if snapshot.current_waypoint_index > last
            || (!snapshot.finished && snapshot.current_waypoint_index == last)
            || !(0.0..=1.0).contains(&snapshot.segment_fraction)
        {
            return Err(MissionError::InvalidMission(format!(
                "snapshot does not fit mission {}",
                mission.id
            )));
        }

        sim.index = snapshot.current_waypoint_index;
        sim.fraction = snapshot.segment_fraction;
        sim.completed_distance_m = snapshot.completed_distance_m;
        sim.elapsed_s = snapshot.elapsed_s;
        sim.finished = snapshot.finished;
        if !sim.finished {
            sim.last_heading_deg = bearing(&sim.position(), &sim.points[sim.index + 1]);
        }
        Ok(sim)
    }

    pub fn snapshot(&self) -> SimSnapshot {
        SimSnapshot {
            current_waypoint_index: self.index,
            segment_fraction: self.fraction,
            completed_distance_m: self.completed_distance_m,
            elapsed_s: self.elapsed_s,
            finished: self.finished,
        }
    }

    pub fn mission_id(&self) -> MissionId {
        self.mission_id
    }

    pub fn total_distance_m(&self) -> f64 {
        self.total_distance_m
    }

    pub fn current_waypoint_index(&self) -> usize {
        self.index
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn elapsed_s(&self) -> f64 {
        self.elapsed_s
    }

    /// Current interpolated position.
    pub fn position(&self) -> GeoPoint {
        if self.finished || self.index + 1 >= self.points.len() {
            return self.points[self.points.len() - 1];
        }
        interpolate(&self.points[self.index], &self.points[self.index + 1], self.fraction)
    }

    /// Cumulative path distance: completed segments plus the partial one.
    pub fn distance_traveled_m(&self) -> f64 {
        if self.finished {
            return self.completed_distance_m;
        }
        self.completed_distance_m + self.fraction * self.segments[self.index]
    }

    pub fn progress(&self) -> f64 {
        if self.total_distance_m <= 0.0 {
            return if self.finished { 100.0 } else { 0.0 };
        }
        (self.distance_traveled_m() / self.total_distance_m * 100.0).min(100.0)
    }

    pub fn battery_percent(&self) -> f64 {
        let elapsed_min = self.elapsed_s / 60.0;
        (100.0 - elapsed_min * self.params.battery_drain_rate).max(self.params.battery_floor_percent)
    }

    /// Advance the simulation by `dt_s` simulated seconds.
    pub fn step(&mut self, dt_s: f64, timestamp: DateTime<Utc>) -> SimStep {
        let dt_s = dt_s.max(0.0);
        let previous_altitude = self.position().altitude_m;
        let mut waypoint_reached = None;

        if !self.finished {
            self.elapsed_s += dt_s;
            let distance_step = self.speed_ms * dt_s;
            let segment = self.segments[self.index];
            let remaining = segment * (1.0 - self.fraction);

            if remaining <= distance_step {
                self.completed_distance_m += segment;
                self.fraction = 0.0;
                self.index += 1;
                waypoint_reached = Some(self.index);
                if self.index >= self.points.len() - 1 {
                    self.finished = true;
                }
            } else {
                self.fraction = (self.fraction + distance_step / segment).min(1.0);
            }
        }

        let position = self.position();
        if !self.finished {
            let target = &self.points[self.index + 1];
            if position.lat != target.lat || position.lon != target.lon {
                self.last_heading_deg = bearing(&position, target);
            }
        }

        let speed_ms = if self.finished && waypoint_reached.is_none() {
            0.0
        } else {
            self.speed_ms
        };
        let vertical_speed_ms = if dt_s > 0.0 {
            (position.altitude_m - previous_altitude) / dt_s
        } else {
            0.0
        };

        let sample = self.sample_at(position, speed_ms, vertical_speed_ms, timestamp);

        SimStep {
            sample,
            progress: self.progress(),
            waypoint_index: self.index,
            distance_traveled_m: self.distance_traveled_m(),
            waypoint_reached,
            finished: self.finished,
        }
    }

    fn sample_at(
        &mut self,
        position: GeoPoint,
        speed_ms: f64,
        vertical_speed_ms: f64,
        timestamp: DateTime<Utc>,
    ) -> TelemetrySample {
        let jitter = self.params.jitter;
        let heading_deg =
            (self.last_heading_deg + noise(&mut self.rng, jitter.heading_deg)).rem_euclid(360.0);
        let roll_deg = noise(&mut self.rng, jitter.attitude_deg);
        let pitch_deg = -(speed_ms * 0.5).min(MAX_PITCH_DEG) + noise(&mut self.rng, jitter.attitude_deg);

        let spread = jitter.satellites as i16;
        let satellite_offset = if spread > 0 {
            self.rng.random_range(-spread..=spread)
        } else {
            0
        };
        let satellites_visible =
            (BASE_SATELLITES as i16 + satellite_offset).clamp(MIN_SATELLITES, MAX_SATELLITES) as u8;

        TelemetrySample {
            mission_id: self.mission_id,
            timestamp,
            lat: position.lat,
            lon: position.lon,
            altitude_m: position.altitude_m,
            speed_ms,
            battery_percent: self.battery_percent(),
            heading_deg,
            roll_deg,
            pitch_deg,
            yaw_deg: heading_deg,
            gps_fix_type: 3,
            satellites_visible,
            ground_speed_ms: Some(speed_ms),
            vertical_speed_ms: Some(vertical_speed_ms),
        }
    }
}

fn noise(rng: &mut StdRng, magnitude: f64) -> f64 {
    if magnitude > 0.0 {
        rng.random_range(-magnitude..=magnitude)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MissionStatus, Waypoint};
    use crate::path::total_distance;

    fn mission(points: &[(f64, f64)], speed_ms: f64) -> Mission {
        Mission {
            id: 7,
            name: "test".into(),
            status: MissionStatus::Running,
            altitude_m: 30.0,
            speed_ms,
            waypoints: points
                .iter()
                .enumerate()
                .map(|(i, (lat, lon))| Waypoint {
                    sequence: i as u32 + 1,
                    latitude: *lat,
                    longitude: *lon,
                    altitude_m: 30.0,
                    action: None,
                    duration_s: 0.0,
                })
                .collect(),
            current_waypoint_index: 0,
            progress: 0.0,
            distance_traveled_m: 0.0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            sim_snapshot: None,
        }
    }

    fn quiet() -> SimulationParams {
        SimulationParams {
            jitter: JitterSettings::none(),
            seed: Some(42),
            ..SimulationParams::default()
        }
    }

    fn run_to_end(sim: &mut FlightSimulator, dt: f64) -> Vec<SimStep> {
        let mut steps = Vec::new();
        for _ in 0..1_000_000 {
            let step = sim.step(dt, Utc::now());
            let done = step.finished;
            steps.push(step);
            if done {
                break;
            }
        }
        steps
    }

    #[test]
    fn rejects_single_waypoint() {
        let m = mission(&[(0.0, 0.0)], 5.0);
        assert!(matches!(
            FlightSimulator::new(&m, quiet()),
            Err(MissionError::InsufficientWaypoints { count: 1 })
        ));
    }

    #[test]
    fn completes_with_exact_total_distance() {
        let routes: Vec<(Vec<(f64, f64)>, f64)> = vec![
            (vec![(0.0, 0.0), (0.0, 0.001), (0.0, 0.002)], 5.0),
            (vec![(40.7128, -74.006), (40.7130, -74.0058), (40.7132, -74.0056), (40.7128, -74.006)], 12.0),
            (vec![(51.5, -0.12), (51.5, -0.12), (51.501, -0.121)], 0.7),
        ];

        for (points, speed) in routes {
            let m = mission(&points, speed);
            let mut sim = FlightSimulator::new(&m, quiet()).unwrap();
            let steps = run_to_end(&mut sim, 0.1);
            let last = steps.last().unwrap();

            assert!(last.finished);
            assert_eq!(last.progress, 100.0);
            assert_eq!(last.waypoint_index, points.len() - 1);
            assert!((last.distance_traveled_m - total_distance(&m.waypoints)).abs() < 1e-9);
        }
    }

    #[test]
    fn progress_is_monotonic() {
        let m = mission(&[(0.0, 0.0), (0.0, 0.001), (0.001, 0.001)], 5.0);
        let mut sim = FlightSimulator::new(&m, quiet()).unwrap();
        let steps = run_to_end(&mut sim, 0.1);
        for pair in steps.windows(2) {
            assert!(pair[1].progress >= pair[0].progress);
            assert!(pair[1].distance_traveled_m >= pair[0].distance_traveled_m);
        }
    }

    #[test]
    fn snapshot_restore_matches_uninterrupted_run() {
        let points = [(0.0, 0.0), (0.0, 0.001), (0.0, 0.002)];
        let m = mission(&points, 5.0);

        let mut straight = FlightSimulator::new(&m, quiet()).unwrap();
        let straight_steps = run_to_end(&mut straight, 0.1);

        let mut first = FlightSimulator::new(&m, quiet()).unwrap();
        for _ in 0..137 {
            first.step(0.1, Utc::now());
        }
        let snapshot = first.snapshot();
        let before = first.position();

        let mut resumed = FlightSimulator::from_snapshot(&m, quiet(), snapshot).unwrap();
        assert_eq!(resumed.position(), before);
        assert_eq!(resumed.distance_traveled_m(), first.distance_traveled_m());

        let resumed_steps = run_to_end(&mut resumed, 0.1);
        assert_eq!(137 + resumed_steps.len(), straight_steps.len());
        assert_eq!(resumed.position(), straight.position());
        assert_eq!(resumed.distance_traveled_m(), straight.distance_traveled_m());
        assert_eq!(resumed.elapsed_s(), straight.elapsed_s());
    }

    #[test]
    fn battery_drains_linearly_and_floors() {
        let m = mission(&[(0.0, 0.0), (0.0, 1.0)], 1.0);
        let params = SimulationParams {
            battery_drain_rate: 2.0,
            ..quiet()
        };
        let mut sim = FlightSimulator::new(&m, params).unwrap();

        let step = sim.step(60.0, Utc::now());
        assert!((step.sample.battery_percent - 98.0).abs() < 1e-9);

        for _ in 0..100 {
            sim.step(60.0, Utc::now());
        }
        assert_eq!(sim.battery_percent(), 10.0);
    }

    #[test]
    fn heading_follows_route() {
        let m = mission(&[(0.0, 0.0), (0.0, 0.001), (0.001, 0.001)], 5.0);
        let mut sim = FlightSimulator::new(&m, quiet()).unwrap();
        let first = sim.step(0.1, Utc::now());
        assert!((first.sample.heading_deg - 90.0).abs() < 1e-6);

        let steps = run_to_end(&mut sim, 0.1);
        let northbound = steps
            .iter()
            .find(|s| s.waypoint_index == 1 && !s.finished)
            .unwrap();
        assert!(northbound.sample.heading_deg.abs() < 1e-6);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let m = mission(&[(0.0, 0.0), (0.0, 0.01)], 5.0);
        let params = SimulationParams {
            jitter: JitterSettings {
                heading_deg: 2.0,
                attitude_deg: 1.0,
                satellites: 2,
            },
            seed: Some(7),
            ..SimulationParams::default()
        };
        let mut sim = FlightSimulator::new(&m, params).unwrap();
        for _ in 0..200 {
            let s = sim.step(0.1, Utc::now()).sample;
            let dh = (s.heading_deg - 90.0 + 180.0).rem_euclid(360.0) - 180.0;
            assert!(dh.abs() <= 2.0 + 1e-9);
            assert!(s.roll_deg.abs() <= 1.0 + 1e-9);
            assert!((10..=14).contains(&s.satellites_visible));
        }
    }

    #[test]
    fn finished_simulator_stays_put() {
        let m = mission(&[(0.0, 0.0), (0.0, 0.0001)], 50.0);
        let mut sim = FlightSimulator::new(&m, quiet()).unwrap();
        let step = sim.step(1.0, Utc::now());
        assert!(step.finished);
        let again = sim.step(1.0, Utc::now());
        assert_eq!(again.distance_traveled_m, step.distance_traveled_m);
        assert_eq!(again.sample.speed_ms, 0.0);
        assert_eq!(sim.elapsed_s(), 1.0);
    }
}
