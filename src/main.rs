// src/main.rs

mod config;
mod dataset;
mod error;
mod features;
mod occupancy;
mod oracle;
#[cfg(feature = "video")]
mod overlay;
mod pipeline;
mod speed;
mod tracking;
mod types;
mod video_processor;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use features::FeatureExtractor;
use pipeline::{LogSink, PipelineEvent, PipelineOrchestrator, RenderSink};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use types::Config;

/// Status line cadence for the log sink, in frames.
const LOG_EVERY_FRAMES: u64 = 250;

#[derive(Parser)]
#[command(name = "lane-speed-monitor")]
#[command(about = "Track vehicles across a fixed cell grid and estimate their speed", long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true, default_value = "config.yaml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Track vehicles and log trips with speeds
    Track {
        /// Directory of frames, or a video file (requires the `video` feature)
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Export per-cell feature vectors for training the anomaly oracle
    Dataset {
        #[arg(short, long)]
        input: PathBuf,

        /// Defaults to `video.output_dir` from the configuration
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(&cli.config)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "lane_speed_monitor={},ort=warn",
            config.logging.level
        ))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
    config.apply_env_overrides();

    info!("🚗 Lane Speed Monitor starting");
    info!("✓ Configuration loaded from {}", cli.config);

    let outcome = match &cli.command {
        Command::Track { input } => run_tracking(&config, input).await,
        Command::Dataset { input, output } => run_dataset(&config, input, output.as_deref()),
    };

    if let Err(e) = &outcome {
        error!("❌ {:#}", e);
    }
    outcome
}

async fn run_tracking(config: &Config, input: &Path) -> Result<()> {
    let mut source = video_processor::open_source(input, &config.video)?;
    let (width, height) = source.dimensions();
    let geometry = config
        .validate(width, height)
        .context("Configuration does not fit the input frames")?;

    info!(
        "Grid: {} lane(s), {} columns of {}x{} px, cooldown {:.0}ms, threshold {:.3}",
        geometry.lanes.len(),
        geometry.columns,
        geometry.cell_width,
        geometry.cell_height,
        config.tracking.cooldown_ms,
        config.occupancy.threshold
    );

    let oracle = oracle::build_oracle(&config.oracle)?;

    let mut sinks: Vec<Box<dyn RenderSink>> = vec![Box::new(LogSink::new(LOG_EVERY_FRAMES))];
    #[cfg(feature = "video")]
    if config.video.save_annotated {
        sinks.push(Box::new(overlay::OverlayWriter::new(
            &config.video.output_dir,
            input,
            geometry.clone(),
            source.fps(),
        )?));
    }

    let mut pipeline: Option<PipelineOrchestrator> = None;

    while source.has_next() {
        let Some(frame) = source.next_frame()? else {
            break;
        };

        let pipeline = pipeline.get_or_insert_with(|| {
            PipelineOrchestrator::new(config, geometry.clone(), oracle.clone(), frame.timestamp_ms)
        });

        let report = pipeline.process_frame(&frame).await?;
        for sink in sinks.iter_mut() {
            sink.render(&frame, &report)?;
        }

        for event in pipeline.drain_events() {
            log_event(pipeline, event);
        }
    }

    for sink in sinks.iter_mut() {
        sink.finish()?;
    }

    let Some(pipeline) = pipeline else {
        warn!("No frames were read from {}", input.display());
        return Ok(());
    };

    let summary = pipeline.finish();
    info!("\n========================================");
    info!("✓ Stream finished");
    for lane in &summary.lanes {
        info!(
            "  {:<12} trips: {:>4}  in flight at end: {}  last: {}",
            lane.name,
            lane.trips,
            lane.in_flight,
            pipeline.speed_estimator().format(lane.last_speed)
        );
    }
    if summary.in_flight_at_end > 0 {
        warn!(
            "{} vehicle(s) were still in the window at end of stream and were not counted",
            summary.in_flight_at_end
        );
    }
    info!("========================================\n");
    for trip in pipeline.trips() {
        debug!(
            "trip lane={} vehicle={} start={:.0}ms end={:.0}ms",
            trip.lane, trip.vehicle, trip.start_ms, trip.end_ms
        );
    }
    info!("📊 Metrics: {}", serde_json::to_string(&summary)?);

    Ok(())
}

fn log_event(pipeline: &PipelineOrchestrator, event: PipelineEvent) {
    match event {
        PipelineEvent::VehicleEntered {
            lane,
            vehicle,
            timestamp_ms,
        } => {
            info!("➡️  {} entered lane {} at {:.0}ms", vehicle, lane, timestamp_ms);
        }
        PipelineEvent::TripCompleted { trip, speed } => {
            let lane_name = pipeline
                .geometry()
                .lanes
                .get(trip.lane)
                .map_or("?", |l| l.name.as_str());
            info!(
                "🏁 {} {} | {:.0}ms → {:.0}ms ({:.0}ms) | {}",
                lane_name,
                trip.vehicle,
                trip.start_ms,
                trip.end_ms,
                trip.elapsed_ms(),
                pipeline.speed_estimator().format(speed)
            );
        }
        // Already logged where it happened
        PipelineEvent::OracleFailure { .. } => {}
    }
}

fn run_dataset(config: &Config, input: &Path, output: Option<&Path>) -> Result<()> {
    let mut source = video_processor::open_source(input, &config.video)?;
    let (width, height) = source.dimensions();
    let geometry = config
        .validate(width, height)
        .context("Configuration does not fit the input frames")?;

    let extractor = FeatureExtractor::new(geometry);
    let output_dir = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(&config.video.output_dir));

    info!(
        "Exporting features: every {} frame(s), up to {} frames",
        config.dataset.sample_every, config.dataset.max_frames
    );

    let summary = dataset::export_features(source.as_mut(), &extractor, &config.dataset, &output_dir)?;
    info!("📊 Dataset: {}", serde_json::to_string(&summary)?);
    Ok(())
}
