//! CLI tool to replay a mission route as an external drone link.
//!
//! Flies the mission's waypoints locally and pushes each sample and its
//! route progress to the server, either over REST or through the mission's
//! stream socket. The mission must already be running.
//!
//! Usage:
//!   cargo run -p agcs-cli --bin send_telemetry -- --mission 1 --rate 5

use std::time::Duration;

use agcs_core::protocol::ProgressReport;
use agcs_core::simulation::{FlightSimulator, SimulationParams};
use agcs_sdk::AgcsClient;
use chrono::Utc;
use clap::Parser;
use tokio::time;

/// Send drone-link telemetry for an existing mission
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// AGCS Server URL
    #[arg(long, default_value = "http://localhost:3000")]
    url: String,

    /// Mission id
    #[arg(long)]
    mission: i64,

    /// Update rate in Hz
    #[arg(long, default_value_t = 2.0)]
    rate: f64,

    /// Simulated seconds per real second
    #[arg(long, default_value_t = 1.0)]
    time_scale: f64,

    /// Battery drain in percent per minute
    #[arg(long, default_value_t = 0.5)]
    drain: f64,

    /// Send through the WebSocket stream instead of REST
    #[arg(long)]
    stream: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    if !(args.rate > 0.0 && args.time_scale > 0.0) {
        anyhow::bail!("rate and time-scale must be positive");
    }

    println!("Connecting to AGCS Server at {}...", args.url);
    let client = AgcsClient::new(&args.url);
    let mission = client.get_mission(args.mission).await?;

    let params = SimulationParams {
        battery_drain_rate: args.drain,
        ..SimulationParams::default()
    };
    let mut sim = FlightSimulator::new(&mission, params)?;
    let mut socket = if args.stream {
        Some(client.connect_stream(mission.id).await?)
    } else {
        None
    };

    println!("Replaying mission {} '{}'", mission.id, mission.name);
    println!(
        "  Waypoints: {}, Route: {:.0}m, Speed: {}m/s",
        mission.waypoints.len(),
        sim.total_distance_m(),
        mission.speed_ms
    );
    println!("  Update rate: {}Hz, Time scale: {}x", args.rate, args.time_scale);
    println!();

    let period = Duration::from_secs_f64(1.0 / args.rate);
    let dt_s = period.as_secs_f64() * args.time_scale;
    let mut interval = time::interval(period);
    let mut sent = 0u64;

    while !sim.is_finished() {
        interval.tick().await;
        let step = sim.step(dt_s, Utc::now());

        let report = ProgressReport {
            progress: step.progress,
            waypoint_index: step.waypoint_index,
            distance_traveled_m: step.distance_traveled_m,
        };
        let result = match socket.as_mut() {
            Some(stream) => match stream.send_telemetry(step.sample.clone()).await {
                Ok(()) => stream.send_progress(report).await,
                Err(e) => Err(e),
            },
            None => match client.send_telemetry(mission.id, &step.sample).await {
                Ok(()) => client.report_progress(mission.id, &report).await.map(|_| ()),
                Err(e) => Err(e),
            },
        };
        if let Err(e) = result {
            eprintln!("Failed to send sample: {}", e);
            continue;
        }
        sent += 1;

        if let Some(index) = step.waypoint_reached {
            println!("Reached waypoint {}", index);
        }
        println!(
            "[{:>4}] ({:.6}, {:.6}) progress={:.1}% battery={:.1}%",
            sent,
            step.sample.lat,
            step.sample.lon,
            step.progress,
            step.sample.battery_percent
        );
    }

    if let Some(stream) = socket {
        stream.close().await.ok();
    }
    println!();
    println!("Sent {} samples", sent);

    match client.battery_prediction(mission.id).await {
        Ok(prediction) => println!(
            "Battery: {:.1}% draining {:.2}%/min, {:.1} min remaining",
            prediction.current_battery, prediction.drain_rate, prediction.remaining_minutes
        ),
        Err(e) => eprintln!("Battery prediction unavailable: {}", e),
    }

    Ok(())
}
