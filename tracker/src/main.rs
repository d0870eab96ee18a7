use std::{fs::File, io::BufReader, path::PathBuf, time::Duration};

use clap::{Parser, Subcommand};
use shared::DangerZone;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tracker::{
    route_from_gpx, GpxReplayProvider, LiveTrackingOrchestrator, PositionSource, TrackerError,
    TrackingCallbacks, TrackingConfig,
};

#[derive(Debug, Parser)]
#[command(author, version, about = "Live location monitoring and geofence evaluation")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Replay a recorded GPX track through the tracking pipeline
    Replay {
        /// GPX file whose track points are emitted as live fixes
        #[arg(long)]
        track: PathBuf,
        /// GPX file with the planned route to monitor for deviations
        #[arg(long)]
        route: Option<PathBuf>,
        /// JSON array of danger zones
        #[arg(long)]
        zones: Option<PathBuf>,
        /// Tracking configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Delay between replayed fixes
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tracker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Replay {
            track,
            route,
            zones,
            config,
            interval_ms,
        } => replay(track, route, zones, config, Duration::from_millis(interval_ms)).await?,
    }
    Ok(())
}

async fn replay(
    track: PathBuf,
    route: Option<PathBuf>,
    zones: Option<PathBuf>,
    config: Option<PathBuf>,
    interval: Duration,
) -> Result<(), TrackerError> {
    let config = match config {
        Some(path) => TrackingConfig::from_path(&path)?,
        None => TrackingConfig::default(),
    };

    let provider = GpxReplayProvider::from_path(&track, interval)?;
    tracing::info!("replaying {} fixes from {:?}", provider.len(), track);
    let tracker = LiveTrackingOrchestrator::new(PositionSource::new(provider), config);

    if let Some(path) = route {
        let points = route_from_gpx(BufReader::new(File::open(&path)?))?;
        tracker.arm_route_default(points);
    }
    if let Some(path) = zones {
        let zones: Vec<DangerZone> = serde_json::from_reader(BufReader::new(File::open(&path)?))
            .map_err(|e| TrackerError::Input(format!("invalid danger zones in {path:?}: {e}")))?;
        tracing::info!("loaded {} danger zones", zones.len());
        tracker.set_danger_zones(zones);
    }

    tracker.evaluator().subscribe(|event| {
        tracing::info!(
            "geofence {} {:?} at ({:.6}, {:.6})",
            event.geofence_id,
            event.event_type,
            event.position.lat,
            event.position.lng
        );
    });

    let handle = tracker.start(
        TrackingCallbacks::new()
            .on_location(|sample| {
                tracing::debug!(
                    "fix ({:.6}, {:.6}) heading {:?}",
                    sample.coordinate.lat,
                    sample.coordinate.lng,
                    sample.heading_degrees
                );
            })
            .on_error(|err| tracing::warn!("location error: {err}")),
    );
    handle.finished().await;

    if let Some(last) = tracker.last_sample() {
        tracing::info!(
            "replay finished at ({:.6}, {:.6}), route state {:?}",
            last.coordinate.lat,
            last.coordinate.lng,
            tracker.route_state()
        );
    }
    Ok(())
}
