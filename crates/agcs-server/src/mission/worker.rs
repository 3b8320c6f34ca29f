//! Per-mission simulation worker.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, SubsecRound, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use uuid::Uuid;

use agcs_core::error::MissionError;
use agcs_core::simulation::{FlightSimulator, SimSnapshot};

use super::machine::{MissionStateMachine, ProgressOutcome};
use crate::backoff::RetryBackoff;

const COMPLETION_RETRY_CEILING: Duration = Duration::from_secs(5);

pub(crate) enum WorkerControl {
    Pause(oneshot::Sender<SimSnapshot>),
    Resume(oneshot::Sender<()>),
    Stop(oneshot::Sender<SimSnapshot>),
}

/// Drive one mission's simulator until it finishes or is stopped.
///
/// The worker owns its simulator exclusively. Control messages win over a
/// pending tick, so a pause or stop is observed before the next step.
pub(crate) async fn run_mission_worker(
    machine: Arc<MissionStateMachine>,
    mut sim: FlightSimulator,
    run_id: Uuid,
    mut control: mpsc::Receiver<WorkerControl>,
    start: oneshot::Receiver<()>,
) {
    let mission_id = sim.mission_id();
    let settings = *machine.settings();

    if start.await.is_err() {
        return;
    }

    let mut ticker = interval(settings.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut paused = false;
    let mut last_timestamp: Option<DateTime<Utc>> = None;
    let mut completion_retry: Option<RetryBackoff> = None;

    loop {
        tokio::select! {
            biased;

            msg = control.recv() => match msg {
                Some(WorkerControl::Pause(ack)) => {
                    paused = true;
                    let _ = ack.send(sim.snapshot());
                    tracing::debug!(mission_id, "Worker paused");
                }
                Some(WorkerControl::Resume(ack)) => {
                    paused = false;
                    ticker.reset();
                    let _ = ack.send(());
                    tracing::debug!(mission_id, "Worker resumed");
                }
                Some(WorkerControl::Stop(ack)) => {
                    let _ = ack.send(sim.snapshot());
                    tracing::debug!(mission_id, "Worker stopped");
                    break;
                }
                None => break,
            },

            _ = ticker.tick(), if !paused => {
                if sim.is_finished() {
                    // Route flown; only the completion write is outstanding.
                    let retry = completion_retry
                        .get_or_insert_with(|| RetryBackoff::new(settings.tick, COMPLETION_RETRY_CEILING));
                    if !retry.ready() {
                        continue;
                    }
                    match report(&machine, &sim).await {
                        Ok(ProgressOutcome::Recorded) => {
                            tracing::warn!(mission_id, "Route finished without completing the mission");
                            break;
                        }
                        Ok(ProgressOutcome::Completed) | Ok(ProgressOutcome::Ignored) => break,
                        Err(err) => {
                            let delay = retry.record_failure();
                            tracing::warn!(
                                mission_id,
                                failures = retry.failures(),
                                "Mission completion not saved: {} (retrying in {:?})",
                                err,
                                delay
                            );
                        }
                    }
                    continue;
                }

                let timestamp = next_timestamp(&mut last_timestamp);
                let step = sim.step(settings.dt_s, timestamp);

                machine.channel().publish(step.sample);
                if let Some(index) = step.waypoint_reached {
                    machine.record_waypoint(mission_id, index);
                }

                match report(&machine, &sim).await {
                    Ok(ProgressOutcome::Recorded) if step.finished => {
                        tracing::warn!(mission_id, "Route finished without completing the mission");
                        break;
                    }
                    Ok(ProgressOutcome::Recorded) => {}
                    Ok(ProgressOutcome::Completed) | Ok(ProgressOutcome::Ignored) => break,
                    Err(err) => {
                        tracing::warn!(mission_id, "Progress report failed: {}", err);
                    }
                }
            }
        }
    }

    machine.deregister_worker(mission_id, run_id);
}

async fn report(
    machine: &MissionStateMachine,
    sim: &FlightSimulator,
) -> Result<ProgressOutcome, MissionError> {
    machine
        .report_progress(
            sim.mission_id(),
            sim.progress(),
            sim.current_waypoint_index(),
            sim.distance_traveled_m(),
            Some(sim.snapshot()),
        )
        .await
}

/// Wall-clock timestamps, strictly increasing at storage precision.
fn next_timestamp(last: &mut Option<DateTime<Utc>>) -> DateTime<Utc> {
    let mut timestamp = Utc::now().trunc_subsecs(6);
    if let Some(previous) = *last {
        if timestamp <= previous {
            timestamp = previous + ChronoDuration::microseconds(1);
        }
    }
    *last = Some(timestamp);
    timestamp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_strictly_increase() {
        let mut last = None;
        let mut previous = next_timestamp(&mut last);
        for _ in 0..1000 {
            let next = next_timestamp(&mut last);
            assert!(next > previous);
            previous = next;
        }
    }
}
