use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser};
use dialoguer::FuzzySelect;
use indicatif::{ProgressBar, ProgressStyle};
use reelscii::{
    load_config, precompute, AppConfig, AsciiFrame, AudioSink, Command, DeviceClass, DirectoryRecorder, FfmpegConfig,
    FfmpegSource, FfplayAudio, FrameSink, FrameStore, MediaSource, NullAudio, PlaybackDriver, Progress, QualityTier,
};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

#[derive(Parser, Debug)]
#[command(version, about = "Play videos as ASCII art in the terminal.")]
struct Args {
    /// Input video file
    input: Option<PathBuf>,

    /// Quality tier: low, medium, high or ultra
    #[arg(long)]
    tier: Option<QualityTier>,

    /// Output columns (clamped to 60-200)
    #[arg(long)]
    width: Option<u32>,

    /// Output rows (clamped to 20-80)
    #[arg(long)]
    height: Option<u32>,

    /// Target frames per second
    #[arg(long)]
    fps: Option<u32>,

    /// Treat this machine as a constrained device (longer timeouts, more retries)
    #[arg(long, default_value_t = false)]
    constrained: bool,

    /// Enable local contrast enhancement
    #[arg(long, default_value_t = false)]
    contrast: bool,

    /// Keep the output resolution fixed
    #[arg(long, default_value_t = false)]
    no_adaptive: bool,

    /// Render every frame before playing
    #[arg(long, default_value_t = false)]
    precompute: bool,

    /// Do not read or write stored precomputed sequences
    #[arg(long, default_value_t = false)]
    no_store: bool,

    /// Record displayed frames into this directory
    #[arg(long)]
    record: Option<PathBuf>,

    /// Print the frame at this time (seconds) and exit
    #[arg(long)]
    snapshot: Option<f64>,

    /// With --snapshot, also save the sampled image as PNG
    #[arg(long, default_value_t = false)]
    keep_images: bool,

    /// Play without sound
    #[arg(long, default_value_t = false)]
    no_audio: bool,

    /// Config file (JSON or TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

enum Start {
    Live(FfmpegSource),
    Precomputed(Vec<AsciiFrame>),
}

/// Draws frames in place using ANSI escapes.
struct TerminalSink {
    out: io::Stdout,
}

impl TerminalSink {
    fn new() -> Self {
        let mut out = io::stdout();
        let _ = write!(out, "\x1b[?25l\x1b[2J");
        let _ = out.flush();
        Self { out }
    }
}

/// Home the cursor, draw `frame`, then erase whatever a larger previous frame left below it.
fn render(frame: &AsciiFrame) -> String {
    format!("\x1b[H{}\x1b[K\x1b[J", frame.lines().join("\x1b[K\n"))
}

impl FrameSink for TerminalSink {
    fn show(&mut self, frame: &AsciiFrame) {
        let mut lock = self.out.lock();
        let _ = write!(lock, "{}", render(frame));
        let _ = lock.flush();
    }

    fn clear(&mut self) {
        let _ = write!(self.out, "\x1b[2J\x1b[H");
        let _ = self.out.flush();
    }
}

impl Drop for TerminalSink {
    fn drop(&mut self) {
        let _ = write!(self.out, "\x1b[?25h");
        let _ = self.out.flush();
    }
}

/// Filter used when `RUST_LOG` is unset. Stays at `warn` by default so log
/// lines on stderr do not overwrite the frames drawn on the same terminal.
fn default_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

fn init_tracing(verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level(verbose)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn apply_overrides(config: &mut AppConfig, args: &Args) {
    if let Some(tier) = args.tier {
        config.tier = tier;
    }
    if args.width.is_some() {
        config.width = args.width;
    }
    if args.height.is_some() {
        config.height = args.height;
    }
    if args.fps.is_some() {
        config.fps = args.fps;
    }
    if args.constrained {
        config.device = DeviceClass::Constrained;
    }
    if args.contrast {
        config.contrast_enhance = true;
    }
    if args.no_adaptive {
        config.adaptive_quality = false;
    }
}

fn find_media_files() -> Vec<String> {
    WalkDir::new(".")
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path().is_file()
                && e.path()
                    .extension()
                    .is_some_and(|ext| matches!(ext.to_str(), Some("mp4" | "mkv" | "mov" | "avi" | "webm")))
        })
        .map(|e| e.path().to_string_lossy().to_string())
        .collect()
}

fn choose_input() -> Result<PathBuf> {
    let files = find_media_files();
    if files.is_empty() {
        return Err(anyhow!("No media files found in current directory."));
    }
    let selection = FuzzySelect::with_theme(&dialoguer::theme::ColorfulTheme::default())
        .with_prompt("Choose a video")
        .default(0)
        .items(&files)
        .interact()?;
    Ok(PathBuf::from(&files[selection]))
}

fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}

/// Forward Ctrl-C and simple line commands from stdin to the driver.
fn spawn_command_sources(tx: mpsc::UnboundedSender<Command>) {
    let ctrl_c = tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = ctrl_c.send(Command::Quit);
        }
    });
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let command = match line.trim() {
                "p" | " " | "" => Command::TogglePause,
                "s" => Command::Stop,
                "r" => Command::StartRecording,
                "R" => Command::StopRecording,
                "q" => Command::Quit,
                _ => continue,
            };
            if tx.send(command).is_err() || command == Command::Quit {
                break;
            }
        }
    });
}

async fn run_snapshot(config: &AppConfig, source: FfmpegSource, time: f64, keep_images: bool) -> Result<()> {
    let mut pipeline = config.pipeline();
    pipeline.attach(source);
    let (frame, buffer) = pipeline.snapshot(time).await.context("taking snapshot")?;
    println!("{}", frame);
    if keep_images {
        let path = PathBuf::from(format!("snapshot_{:.2}.png", time));
        buffer
            .as_image()
            .save(&path)
            .with_context(|| format!("saving {}", path.display()))?;
        info!(path = %path.display(), "saved snapshot image");
    }
    Ok(())
}

async fn precomputed_frames(config: &AppConfig, source: FfmpegSource, use_store: bool) -> Result<Vec<AsciiFrame>> {
    let settings = config.settings();
    let identity = source.identity();
    let store = config.store_dir().filter(|_| use_store).map(FrameStore::new);
    if let Some(stored) = store.as_ref().and_then(|s| s.load(&identity, &settings)) {
        info!(frames = stored.frames.len(), "using stored sequence");
        return Ok(stored.frames);
    }

    let mut pipeline = config.pipeline();
    pipeline.attach(source);
    let pb = progress_bar();
    let bar = pb.clone();
    let frames = precompute(&mut pipeline, move |progress: Progress| {
        bar.set_length(progress.total as u64);
        bar.set_position(progress.completed as u64);
        bar.set_message(progress.message);
    })
    .await?;
    pb.finish_with_message("Done");

    if let Some(store) = &store {
        if let Err(e) = store.save(&identity, &settings, &frames) {
            warn!(error = %e, "not storing sequence");
        }
    }
    Ok(frames)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let mut config = match &args.config {
        Some(path) => AppConfig::from_file(path)?,
        None => load_config()?,
    };
    apply_overrides(&mut config, &args);

    let input = match &args.input {
        Some(p) => p.clone(),
        None => choose_input()?,
    };
    let ffmpeg = FfmpegConfig::default();
    let source = FfmpegSource::open(&input, ffmpeg.clone())
        .await
        .with_context(|| format!("opening {}", input.display()))?;

    if let Some(time) = args.snapshot {
        return run_snapshot(&config, source, time, args.keep_images).await;
    }

    let audio: Box<dyn AudioSink> = if args.no_audio {
        Box::new(NullAudio::default())
    } else {
        Box::new(FfplayAudio::new(input.clone(), &ffmpeg))
    };

    let start = if args.precompute {
        Start::Precomputed(precomputed_frames(&config, source, !args.no_store).await?)
    } else {
        Start::Live(source)
    };

    let mut driver: PlaybackDriver<FfmpegSource> =
        PlaybackDriver::new(config.pipeline(), Box::new(TerminalSink::new()), audio);
    if let Some(dir) = &args.record {
        driver = driver.with_recorder(Box::new(DirectoryRecorder::new(dir.clone())));
    }

    match start {
        Start::Precomputed(frames) => driver.play_precomputed(frames, config.settings().frame_rate)?,
        Start::Live(source) => {
            driver.load(source).await?;
            driver.play_live()?;
        }
    }
    if args.record.is_some() {
        driver.start_recording()?;
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    spawn_command_sources(tx);
    driver.run(&mut rx).await?;

    let info = driver.playback_info();
    info!(
        frames_displayed = info.frames_displayed,
        blank_frames = info.blank_frames,
        settings = %info.settings,
        "playback finished"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_level() {
        assert_eq!(default_level(0), "warn");
        assert_eq!(default_level(1), "info");
        assert_eq!(default_level(4), "debug");
    }

    #[test]
    fn test_render_erases_leftovers() {
        let frame = AsciiFrame::from_lines(vec!["ab".to_string(), "cd".to_string()]);
        let out = render(&frame);
        assert_eq!(out, "\x1b[Hab\x1b[K\ncd\x1b[K\x1b[J");
    }
}
