//! Analyse a LIDAR UDP capture into classified object tracks.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use kerb_offline::{
    load_params, JsonRegionStore, PcapPipeline, PcapSource, PipelineConfig,
};
use kerb_types::SensorExtrinsics;
use pandar_parse::TimestampMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
enum TimeModeArg {
    /// Capture time from the pcap record header.
    System,
    /// The sensor's embedded packet time.
    #[default]
    Packet,
    /// Embedded time interpolated per firing.
    Interpolated,
}

impl From<TimeModeArg> for TimestampMode {
    fn from(arg: TimeModeArg) -> Self {
        match arg {
            TimeModeArg::System => TimestampMode::SystemTime,
            TimeModeArg::Packet => TimestampMode::PacketHeaderTime,
            TimeModeArg::Interpolated => TimestampMode::PerShotInterpolated,
        }
    }
}

#[derive(Debug, Parser)]
#[command(version, about = "Offline LIDAR capture analysis")]
struct Cli {
    /// Capture file to analyse.
    pcap: PathBuf,

    /// UDP destination port the sensor publishes on.
    #[arg(long, default_value_t = 2368)]
    port: u16,

    /// Sensor identity for regions and training output.
    #[arg(long, default_value = "pandar40-0")]
    sensor_id: String,

    /// Sensor mounting pose: "x,y,z,yaw_deg".
    #[arg(long)]
    extrinsics: Option<String>,

    /// TOML parameter file; missing sections use defaults.
    #[arg(long)]
    params: Option<PathBuf>,

    /// Directory for persisted background regions.
    #[arg(long)]
    region_store: Option<PathBuf>,

    /// Write per-frame foreground training blobs here.
    #[arg(long)]
    training_out: Option<PathBuf>,

    /// Write the track summary JSON here instead of stdout.
    #[arg(long)]
    tracks_out: Option<PathBuf>,

    /// How point timestamps are assigned.
    #[arg(long, value_enum, default_value = "packet")]
    time_mode: TimeModeArg,
}

fn parse_extrinsics(pose: &str) -> color_eyre::Result<SensorExtrinsics> {
    let parts: Vec<f64> = pose
        .split(',')
        .map(|p| p.trim().parse())
        .collect::<Result<_, _>>()?;
    if parts.len() != 4 {
        color_eyre::eyre::bail!("expected x,y,z,yaw_deg; got {pose:?}");
    }
    Ok(SensorExtrinsics {
        x_m: parts[0],
        y_m: parts[1],
        z_m: parts[2],
        yaw_deg: parts[3],
    })
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::registry()
        .with(fmt::layer().compact())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = PipelineConfig::new(cli.sensor_id.clone());
    config.timestamp_mode = cli.time_mode.into();
    if let Some(pose) = cli.extrinsics.as_deref() {
        config.extrinsics = parse_extrinsics(pose)?;
    }
    if let Some(path) = cli.params.as_deref() {
        config.params = load_params(path)?;
        info!(path = %path.display(), "loaded analysis parameters");
    }

    let store = cli.region_store.as_ref().map(JsonRegionStore::new);
    let mut pipeline = PcapPipeline::new(
        config,
        store.as_ref().map(|s| s as &dyn kerb_background::RegionStore),
    );
    if let Some(path) = cli.training_out.as_ref() {
        let sink = BufWriter::new(File::create(path)?);
        pipeline = pipeline.with_training_sink(Box::new(sink));
    }

    let mut source = PcapSource::open(&cli.pcap, cli.port)?;
    pipeline.run(&mut source)?;

    let summaries = pipeline.track_summaries();
    match cli.tracks_out.as_ref() {
        Some(path) => {
            let mut out = BufWriter::new(File::create(path)?);
            serde_json::to_writer_pretty(&mut out, &summaries)?;
            out.flush()?;
        }
        None => {
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            serde_json::to_writer_pretty(&mut out, &summaries)?;
            writeln!(out)?;
        }
    }

    let stats = pipeline.stats().summary();
    let timers = pipeline.stage_timers();
    info!(
        packets = stats.packets,
        parse_errors = stats.parse_errors,
        frames = stats.frames,
        foreground = stats.foreground_points,
        background = stats.background_points,
        clustering_ms = timers.clustering_ns() / 1_000_000,
        tracking_ms = timers.tracking_ns() / 1_000_000,
        classification_ms = timers.classification_ns() / 1_000_000,
        "run complete"
    );
    Ok(())
}
