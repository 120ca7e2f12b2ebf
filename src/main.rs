// Runs the shot detector over a directory of recorded frames and prints every
// shot it finds. `RUST_LOG=debug` shows per-frame decisions.

use clap::Parser;
use laser_vision::{
    DetectionConfig, ImageSequenceSource, LaserColor, LogReporter, SectorGrid, Session,
    SessionStatus, SharedConfig, Shot,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about = "Find laser shots in a recorded frame sequence")]
struct Args {
    /// Directory of still images, played back in file-name order
    frames_dir: PathBuf,
    /// Detection settings in TOML; defaults apply to every missing field
    config: Option<PathBuf>,
    /// Override the detection threshold
    #[arg(long)]
    threshold: Option<f32>,
    /// Ignore flashes of this color (red or green)
    #[arg(long, value_parser = parse_color)]
    ignore_color: Option<LaserColor>,
    /// Enable debug mode and write candidate maps into this directory
    #[arg(long)]
    debug_dump: Option<PathBuf>,
}

fn parse_color(value: &str) -> Result<LaserColor, String> {
    match value.to_ascii_lowercase().as_str() {
        "red" => Ok(LaserColor::Red),
        "green" => Ok(LaserColor::Green),
        other => Err(format!("unknown laser color '{other}'")),
    }
}

fn print_shot(shot: Shot) {
    println!("{shot}");
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match DetectionConfig::load(path) {
            Ok(config) => config,
            Err(err) => {
                log::error!("{}: {err}", path.display());
                return ExitCode::from(2);
            }
        },
        None => DetectionConfig::default(),
    };
    if let Some(threshold) = args.threshold {
        config.detection_threshold = threshold;
    }
    if args.ignore_color.is_some() {
        config = config.with_ignored_color(args.ignore_color);
    }
    if args.debug_dump.is_some() {
        config = config.with_debug(true);
    }

    let shared = match SharedConfig::new(config) {
        Ok(shared) => Arc::new(shared),
        Err(err) => {
            log::error!("{err}");
            return ExitCode::from(2);
        }
    };
    let base = shared.base();
    let grid = match SectorGrid::new(base.sector_rows, base.sector_columns) {
        Ok(grid) => Arc::new(grid),
        Err(err) => {
            log::error!("{err}");
            return ExitCode::from(2);
        }
    };

    let source = ImageSequenceSource::new(&args.frames_dir);
    let session = match &args.debug_dump {
        Some(directory) => Session::start_with_debug_dump(
            source,
            shared.clone(),
            grid,
            Arc::new(print_shot),
            Arc::new(LogReporter),
            directory,
        ),
        None => Session::start(
            source,
            shared.clone(),
            grid,
            Arc::new(print_shot),
            Arc::new(LogReporter),
        ),
    };
    let session = match session {
        Ok(session) => session,
        Err(err) => {
            log::error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let status = session.wait_for_completion().await;
    log::info!("{} frames processed", session.frames_processed());
    match status {
        SessionStatus::Completed | SessionStatus::Stopped => ExitCode::SUCCESS,
        SessionStatus::Failed(_) | SessionStatus::Running => ExitCode::FAILURE,
    }
}
