//! CLI tool to plan a field survey, start it and watch the live stream.
//!
//! Usage:
//!   cargo run -p agcs-cli --bin run_mission -- --width 120 --spacing 30

use agcs_cli::{serpentine, SurveyArea};
use agcs_core::models::CreateMissionRequest;
use agcs_core::path::total_distance;
use agcs_core::protocol::StreamMessage;
use agcs_sdk::AgcsClient;
use clap::Parser;

/// Plan and fly a lawnmower survey over a rectangular field
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// AGCS Server URL
    #[arg(long, default_value = "http://localhost:3000")]
    url: String,

    /// Mission name
    #[arg(long, default_value = "Field survey")]
    name: String,

    /// South-west corner latitude
    #[arg(long, default_value_t = 36.7378)]
    lat: f64,

    /// South-west corner longitude
    #[arg(long, default_value_t = -119.7871)]
    lon: f64,

    /// Field width (east-west) in meters
    #[arg(long, default_value_t = 100.0)]
    width: f64,

    /// Field height (north-south) in meters
    #[arg(long, default_value_t = 200.0)]
    height: f64,

    /// Distance between passes in meters
    #[arg(long, default_value_t = 25.0)]
    spacing: f64,

    /// Altitude in meters
    #[arg(long, default_value_t = 30.0)]
    altitude: f64,

    /// Commanded speed in m/s
    #[arg(long, default_value_t = 8.0)]
    speed: f64,

    /// Print every telemetry sample instead of every 10th
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let client = AgcsClient::new(&args.url);

    let waypoints = serpentine(&SurveyArea {
        origin_lat: args.lat,
        origin_lon: args.lon,
        width_m: args.width,
        height_m: args.height,
        spacing_m: args.spacing,
        altitude_m: args.altitude,
    });
    println!(
        "Planned {} waypoints, {:.0}m route",
        waypoints.len(),
        total_distance(&waypoints)
    );

    let mission = client
        .create_mission(&CreateMissionRequest {
            name: args.name.clone(),
            altitude_m: args.altitude,
            speed_ms: args.speed,
            waypoints,
        })
        .await?;
    println!("Created mission {} '{}'", mission.id, mission.name);

    // Subscribe before starting so the first samples are not missed.
    let mut stream = client.connect_stream(mission.id).await?;
    let started = client.start(mission.id).await?;
    println!("Mission {} is {}", started.id, started.status);
    println!();

    let mut samples = 0u64;
    while let Some(msg) = stream.next_message().await? {
        match msg {
            StreamMessage::Telemetry { data, .. } => {
                samples += 1;
                if args.verbose || samples % 10 == 1 {
                    println!(
                        "[{}] ({:.6}, {:.6}) alt={:.1}m speed={:.1}m/s battery={:.1}%",
                        data.timestamp.format("%H:%M:%S%.3f"),
                        data.lat,
                        data.lon,
                        data.altitude_m,
                        data.speed_ms,
                        data.battery_percent
                    );
                }
            }
            StreamMessage::MissionUpdate { data, .. } => {
                println!(
                    "Mission {}: {:.1}% waypoint={} distance={:.0}m{}",
                    data.status,
                    data.progress,
                    data.current_waypoint_index,
                    data.distance_traveled_m,
                    data.message
                        .as_deref()
                        .map(|m| format!(" ({})", m))
                        .unwrap_or_default()
                );
                if data.status.is_terminal() {
                    break;
                }
            }
            StreamMessage::Alert { data, .. } => {
                println!(
                    "ALERT [{}] {} (confidence {:.2})",
                    data.kind.as_str(), data.message, data.confidence
                );
            }
            StreamMessage::Error { message, .. } => eprintln!("Stream error: {}", message),
            StreamMessage::Pong { .. } => {}
        }
    }
    stream.close().await.ok();

    println!();
    println!("Received {} telemetry samples", samples);
    match client.efficiency(mission.id).await {
        Ok(report) => println!(
            "Efficiency: path {:.1}%, avg speed {:.2}m/s, consistency {:.1}",
            report.path_efficiency, report.average_speed_ms, report.speed_consistency
        ),
        Err(e) => eprintln!("Efficiency unavailable: {}", e),
    }

    Ok(())
}
