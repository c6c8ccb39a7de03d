//! MargaNav fusion node.
//!
//! Replays a recorder log through the GNSS/INS filter and writes the
//! state, covariance, residual and turn-segment traces.
//!
//! # Usage
//!
//! ```bash
//! marga-nav --input drive.log --output-dir output/
//! marga-nav --config marga.toml --online
//! ```

use std::path::{Path, PathBuf};

use clap::Parser;
use nalgebra::Vector3;

use marga_nav::io::pipeline::Event;
use marga_nav::{
    read_events, Eskf, GeoProjector, MargaConfig, OfflineRunner, OnlinePipeline, ReportSinks,
    Result, RunSummary, TurnTable,
};

#[derive(Parser)]
#[command(name = "marga-nav")]
#[command(about = "GNSS/INS integrated navigation over a recorder log")]
struct Args {
    /// Input log file
    #[arg(short, long)]
    input: PathBuf,

    /// Optional TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output directory for the report files
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Antenna installation yaw (degrees), overrides the config
    #[arg(long)]
    antenna_angle: Option<f64>,

    /// Antenna offset x (meters), overrides the config
    #[arg(long)]
    antenna_pos_x: Option<f64>,

    /// Antenna offset y (meters), overrides the config
    #[arg(long)]
    antenna_pos_y: Option<f64>,

    /// Constant offset added to GNSS timestamps (seconds)
    #[arg(long)]
    gnss_time_offset: Option<f64>,

    /// Drive the online reorder pipeline instead of the offline sort
    #[arg(long)]
    online: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Err(e) = run(&args) {
        log::error!("fatal: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => {
            let config = MargaConfig::load(path)?;
            log::info!("loaded configuration from {}", path.display());
            config
        }
        None => MargaConfig::default(),
    };

    // CLI overrides
    if let Some(angle) = args.antenna_angle {
        config.antenna.angle_deg = angle;
    }
    if let Some(x) = args.antenna_pos_x {
        config.antenna.offset_x = x;
    }
    if let Some(y) = args.antenna_pos_y {
        config.antenna.offset_y = y;
    }
    if let Some(offset) = args.gnss_time_offset {
        config.pipeline.gnss_time_offset = offset;
    }
    let output_dir = args
        .output_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.output.dir));

    log::info!("marga-nav starting");
    log::info!("  input: {}", args.input.display());
    log::info!("  output: {}", output_dir.display());
    log::info!(
        "  antenna: angle {:.2} deg, offset ({:.2}, {:.2}) m",
        config.antenna.angle_deg,
        config.antenna.offset_x,
        config.antenna.offset_y
    );
    log::info!(
        "  mode: {}",
        if args.online { "online" } else { "offline" }
    );

    let eskf = build_filter(&config);
    let projector = GeoProjector::new(config.antenna.to_antenna_config());
    let sinks = ReportSinks::create(&output_dir)?;

    let summary = if args.online {
        run_online(&args.input, eskf, projector, &config, sinks)?
    } else {
        let events = read_events(&args.input)?;
        log::info!("loaded {} events", events.len());
        let mut runner = OfflineRunner::new(
            eskf,
            projector,
            config.pipeline.clone(),
            config.turning.clone(),
            sinks,
        );
        runner.run(events)?
    };

    log::info!(
        "done: {} imu integrated, {} gnss applied ({} position-only), {} dropped",
        summary.imu_integrated,
        summary.gnss_applied,
        summary.gnss_position_only,
        summary.gnss_dropped
    );
    Ok(())
}

fn build_filter(config: &MargaConfig) -> Eskf {
    let mut eskf = Eskf::new(config.filter.clone());
    eskf.set_initial(
        config.filter.clone(),
        Vector3::from(config.init.gyro_bias),
        Vector3::from(config.init.accel_bias),
        Vector3::from(config.init.gravity),
    );
    eskf
}

/// Drive the online pipeline with events in file order, as a stand-in
/// for live sensor streams.
fn run_online(
    input: &Path,
    eskf: Eskf,
    projector: GeoProjector,
    config: &MargaConfig,
    sinks: ReportSinks,
) -> Result<RunSummary> {
    let mut pipeline = OnlinePipeline::new(
        eskf,
        projector,
        config.pipeline.clone(),
        TurnTable::empty(),
        sinks,
    );
    for event in marga_nav::LogReader::open(input)? {
        match event? {
            Event::Imu(imu) => pipeline.on_imu(&imu)?,
            Event::Gnss(fix) => pipeline.on_gnss(&fix)?,
            Event::Odom(odom) => pipeline.on_odom(&odom),
            Event::Misalignment(m) => {
                log::info!(
                    "recorder misalignment at {:.3}: pitch {:.2} deg, heading {:.2} deg",
                    m.t,
                    m.pitch_deg,
                    m.heading_deg
                );
            }
        }
    }
    pipeline.finish()
}
