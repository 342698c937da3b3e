use std::{
    path::{Path, PathBuf},
    time::Instant,
};

use clap::Parser;
use log::LevelFilter;
use planar_track::io::{FrameRecord, TrackReport, TrackerConfig};
use planar_track::raster::{load_rgba_frame, ImageRasterizer};
use planar_track::{Capabilities, TargetTracker};
use planar_track_core::TemplateSource;

#[derive(Parser)]
#[command(name = "planar-track")]
#[command(about = "Track a planar reference image through a sequence of frames")]
struct Cli {
    /// JSON run configuration
    #[arg(long, value_name = "FILE", conflicts_with_all = ["template", "frames"])]
    config: Option<PathBuf>,

    /// Reference image path or URL
    #[arg(long, value_name = "IMAGE", requires = "frames")]
    template: Option<String>,

    /// Frame images in playback order
    #[arg(value_name = "FRAME")]
    frames: Vec<String>,

    /// Processing width (overrides the config)
    #[arg(long)]
    width: Option<u32>,

    /// Processing height (overrides the config)
    #[arg(long)]
    height: Option<u32>,

    /// Write a JSON report of the whole run here
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,

    /// Log level for the stderr logger (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info", value_parser = parse_level)]
    log_level: LevelFilter,

    /// Emit logs through `tracing` as JSON lines
    #[cfg(feature = "tracing")]
    #[arg(long)]
    json_logs: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Cli::parse();
    init_logging(&args)?;

    let (mut cfg, config_path) = match (&args.config, &args.template) {
        (Some(path), _) => (TrackerConfig::load_json(path)?, Some(path.as_path())),
        (None, Some(template)) => (TrackerConfig::new(template.clone(), args.frames.clone()), None),
        (None, None) => return Err("either --config or --template is required".into()),
    };
    if let Some(w) = args.width {
        cfg.proc_width = w;
    }
    if let Some(h) = args.height {
        cfg.proc_height = h;
    }
    cfg.validate()?;

    let report = run(&cfg, config_path)?;
    let out = args
        .report
        .clone()
        .or_else(|| cfg.output_path.as_ref().map(|_| cfg.output_path()));
    if let Some(path) = out {
        report.write_json(&path)?;
        log::info!("wrote report JSON to {}", path.display());
    }
    log::info!(
        "target found in {}/{} frames",
        report.detected_frames(),
        report.frames.len()
    );
    Ok(())
}

fn init_logging(args: &Cli) -> Result<(), log::SetLoggerError> {
    #[cfg(feature = "tracing")]
    if args.json_logs {
        let directive = args.log_level.as_str().to_ascii_lowercase();
        planar_track_core::init_tracing(planar_track_core::TraceFormat::Json, &directive);
        return Ok(());
    }
    planar_track_core::init_stderr_logger(args.log_level)
}

fn parse_level(s: &str) -> Result<LevelFilter, String> {
    s.parse::<LevelFilter>()
        .map_err(|_| format!("unknown level `{s}`; expected off, error, warn, info, debug or trace"))
}

#[cfg(feature = "http")]
fn template_source() -> Result<Box<dyn TemplateSource + Send>, Box<dyn std::error::Error>> {
    Ok(Box::new(planar_track::raster::HttpTemplateSource::new()?))
}

#[cfg(not(feature = "http"))]
fn template_source() -> Result<Box<dyn TemplateSource + Send>, Box<dyn std::error::Error>> {
    Ok(Box::new(planar_track::raster::FileTemplateSource::new()))
}

fn run(
    cfg: &TrackerConfig,
    config_path: Option<&Path>,
) -> Result<TrackReport, Box<dyn std::error::Error>> {
    let caps = Capabilities::from_params(
        &cfg.build_providers(),
        Box::new(ImageRasterizer::default()),
        template_source()?,
    );
    let mut tracker = TargetTracker::new(cfg.build_params(), caps);
    let mut report = TrackReport::new(cfg, config_path);

    let template = tracker.init(&cfg.template, cfg.proc_width, cfg.proc_height)?;
    report.template_size = Some([template.width(), template.height()]);

    let start = Instant::now();
    let interval = cfg.frame_interval();
    for (index, path) in cfg.frames.iter().enumerate() {
        let frame = match load_rgba_frame(path) {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("{path}: {err}");
                report.frames.push(FrameRecord {
                    index,
                    path: path.clone(),
                    report: None,
                    error: Some(err.to_string()),
                });
                continue;
            }
        };
        let frame_report = tracker.process_frame_at(&frame, start + interval * index as u32);
        println!("{}", serde_json::to_string(&frame_report.result)?);
        report.frames.push(FrameRecord {
            index,
            path: path.clone(),
            report: Some(frame_report),
            error: None,
        });
    }
    Ok(report)
}
