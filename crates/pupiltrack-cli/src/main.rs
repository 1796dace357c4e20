//! pupiltrack CLI: track the pupil and corneal reflection through a frame sequence.

use clap::{Args, Parser, Subcommand};
use image::GrayImage;
use pupiltrack::{
    process_stream, prefilter_names, EyeTracker, FrameSource, StreamOutput, StreamRange,
    TrackError, TrackerConfig,
};
use serde::Serialize;
use std::path::{Path, PathBuf};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "pupiltrack")]
#[command(about = "Locate the pupil and corneal reflection in eye-video frames")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Track every frame of an image sequence.
    Track(CliTrackArgs),

    /// Print the registered prefilter names.
    Prefilters,

    /// Print the default configuration as JSON.
    DefaultConfig,
}

#[derive(Debug, Clone, Args)]
struct CliTrackArgs {
    /// Directory of PNG/JPEG frames; file names sort into frame order.
    #[arg(long)]
    frames: PathBuf,

    /// Tracker configuration (JSON). Defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output directory, created if missing.
    #[arg(long)]
    out: PathBuf,

    /// First frame index to process (overrides the config).
    #[arg(long)]
    start_frame: Option<usize>,

    /// Exclusive end frame index (overrides the config).
    #[arg(long)]
    stop_frame: Option<usize>,

    /// Process every n-th frame (overrides the config).
    #[arg(long)]
    frame_step: Option<usize>,
}

impl CliTrackArgs {
    fn stream_range(&self, base: &StreamRange) -> StreamRange {
        StreamRange {
            start_frame: self.start_frame.unwrap_or(base.start_frame),
            stop_frame: self.stop_frame.or(base.stop_frame),
            frame_step: self.frame_step.unwrap_or(base.frame_step),
        }
    }
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Track(args) => run_track(&args),
        Commands::Prefilters => {
            for name in prefilter_names() {
                println!("{name}");
            }
            Ok(())
        }
        Commands::DefaultConfig => {
            println!("{}", serde_json::to_string_pretty(&TrackerConfig::default())?);
            Ok(())
        }
    }
}

// ── frame source ───────────────────────────────────────────────────────

/// Frames stored as individual image files in one directory.
struct ImageDirSource {
    paths: Vec<PathBuf>,
    shape: (u32, u32),
}

impl ImageDirSource {
    fn open(dir: &Path) -> CliResult<Self> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase())
                .is_some_and(|e| matches!(e.as_str(), "png" | "jpg" | "jpeg"));
            if is_image {
                paths.push(path);
            }
        }
        paths.sort();

        let first = paths.first().ok_or_else(|| -> CliError {
            format!("no PNG/JPEG frames in {}", dir.display()).into()
        })?;
        let probe = load_gray(first)?;
        Ok(Self {
            shape: (probe.height(), probe.width()),
            paths,
        })
    }
}

fn load_gray(path: &Path) -> pupiltrack::Result<GrayImage> {
    image::open(path)
        .map(|img| img.to_luma8())
        .map_err(|e| TrackError::FrameSource(format!("{}: {e}", path.display())))
}

impl FrameSource for ImageDirSource {
    fn frame_shape(&self) -> (u32, u32) {
        self.shape
    }

    fn frame_count(&self) -> usize {
        self.paths.len()
    }

    fn read_frame(&mut self, index: usize) -> pupiltrack::Result<Option<GrayImage>> {
        self.paths.get(index).map(|p| load_gray(p)).transpose()
    }
}

// ── track ──────────────────────────────────────────────────────────────

/// Index of everything written for one run.
#[derive(Serialize)]
struct RunSummary<'a> {
    frames_dir: &'a Path,
    config: &'a TrackerConfig,
    stream: &'a StreamRange,
    frame_indices: &'a [usize],
    pupil_found_ratio: f64,
    cr_found_ratio: f64,
    pupil_params: PathBuf,
    cr_params: PathBuf,
    mean_frame: PathBuf,
    pupil_density: PathBuf,
    cr_density: PathBuf,
}

fn run_track(args: &CliTrackArgs) -> CliResult<()> {
    let config = match &args.config {
        Some(path) => {
            tracing::info!("Loading config: {}", path.display());
            TrackerConfig::from_json_file(path)?
        }
        None => TrackerConfig::default(),
    };
    let range = args.stream_range(&config.stream);
    let mut tracker = EyeTracker::from_config(&config)?;

    tracing::info!("Reading frames from {}", args.frames.display());
    let mut source = ImageDirSource::open(&args.frames)?;
    let (h, w) = source.frame_shape();
    tracing::info!("{} frames of {}x{}", source.frame_count(), w, h);

    let output = process_stream(&mut tracker, &mut source, &range, None)?;

    std::fs::create_dir_all(&args.out)?;
    write_outputs(args, &config, &range, &output)?;
    tracing::info!("Results written to {}", args.out.display());
    Ok(())
}

fn write_outputs(
    args: &CliTrackArgs,
    config: &TrackerConfig,
    range: &StreamRange,
    output: &StreamOutput,
) -> CliResult<()> {
    let out = |name: &str| args.out.join(name);

    let pupil_params = out("pupil_params.json");
    std::fs::write(&pupil_params, serde_json::to_string_pretty(&output.pupil)?)?;
    let cr_params = out("cr_params.json");
    std::fs::write(&cr_params, serde_json::to_string_pretty(&output.cr)?)?;

    let mean_frame = out("mean_frame.png");
    output.mean_frame.to_gray().save(&mean_frame)?;
    let pupil_density = out("pupil_density.png");
    output.pupil_density.to_gray().save(&pupil_density)?;
    let cr_density = out("cr_density.png");
    output.cr_density.to_gray().save(&cr_density)?;

    let (pupil_found_ratio, cr_found_ratio) = output.found_ratio();
    tracing::info!(
        "Tracked {} frames: pupil found {:.1}%, cr found {:.1}%",
        output.len(),
        100.0 * pupil_found_ratio,
        100.0 * cr_found_ratio,
    );

    let summary = RunSummary {
        frames_dir: &args.frames,
        config,
        stream: range,
        frame_indices: &output.frame_indices,
        pupil_found_ratio,
        cr_found_ratio,
        pupil_params,
        cr_params,
        mean_frame,
        pupil_density,
        cr_density,
    };
    std::fs::write(out("output.json"), serde_json::to_string_pretty(&summary)?)?;
    Ok(())
}
