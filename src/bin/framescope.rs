use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use framescope::{
    AspectRatio, ExportOptions, FfmpegLogLevel, NoOverlay, OperationOptions, PixelFormat,
    ProgressCallback, ProgressInfo, ReadRequest, SessionOptions, VideoCodec, VideoInfo,
    VideoSession,
};

const CLI_AFTER_HELP: &str = "Examples:\n  framescope info input.mp4 --json\n  framescope frame input.mp4 --at 00:00:12.5 --out frame.png\n  framescope cache input.mp4 --start 10 --end 14 --progress\n  framescope export input.mp4 --out slow.mp4 --start 10 --end 14 --interval 200\n  framescope completions zsh > _framescope";

#[derive(Debug, Parser)]
#[command(
    name = "framescope",
    version,
    about = "Inspect, scrub and export video with frame-accurate timestamps",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Parser, Clone, Default)]
struct GlobalOptions {
    /// Show additional logging output.
    #[arg(long)]
    verbose: bool,

    /// Show a progress bar for cache loads and exports.
    #[arg(long)]
    progress: bool,

    /// Allow overwriting existing output files.
    #[arg(long)]
    overwrite: bool,

    /// FFmpeg log level (quiet, panic, fatal, error, warning, info, verbose, debug, trace).
    #[arg(long)]
    log_level: Option<String>,

    /// Pixel format of decoded frames (bgra8, rgba8, rgb8).
    #[arg(long)]
    pixel_format: Option<String>,

    /// Aspect-ratio policy (auto, 4:3, 16:9, square).
    #[arg(long)]
    aspect: Option<String>,

    /// Deinterlace decoded frames.
    #[arg(long)]
    deinterlace: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CodecArg {
    H264,
    H265,
    Mpeg4,
}

impl From<CodecArg> for VideoCodec {
    fn from(codec: CodecArg) -> Self {
        match codec {
            CodecArg::H264 => VideoCodec::H264,
            CodecArg::H265 => VideoCodec::H265,
            CodecArg::Mpeg4 => VideoCodec::Mpeg4,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print what the session found out about a video.
    #[command(
        about = "Print video information",
        visible_alias = "probe",
        after_help = "Examples:\n  framescope info input.mp4\n  framescope info input.mp4 --json"
    )]
    Info {
        /// Input video path.
        input: PathBuf,

        /// Output as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Decode one frame and save it as an image.
    #[command(
        about = "Save a single frame",
        after_help = "Examples:\n  framescope frame input.mp4 --at 75 --out frame.png\n  framescope frame input.mp4 --at 00:01:15.5 --out frame.jpg"
    )]
    Frame {
        /// Input video path.
        input: PathBuf,
        /// Position, in seconds or [hh:]mm:ss[.fff] from the start of the video.
        #[arg(long, default_value = "0")]
        at: String,
        /// Output image path.
        #[arg(long)]
        out: PathBuf,
    },

    /// Load a range into memory and report on the cache.
    #[command(
        about = "Load a range into the frame cache",
        after_help = "Examples:\n  framescope cache input.mp4 --start 10 --end 14\n  framescope cache input.mp4 --start 0:10 --end 0:20 --max-seconds 30 --progress"
    )]
    Cache {
        /// Input video path.
        input: PathBuf,
        /// Range start.
        #[arg(long, default_value = "0")]
        start: String,
        /// Range end.
        #[arg(long)]
        end: String,
        /// Refuse ranges longer than this many seconds.
        #[arg(long, default_value_t = 60.0)]
        max_seconds: f64,
        /// Refuse ranges that would take more memory than this.
        #[arg(long, default_value_t = 2048)]
        max_megabytes: u64,
    },

    /// Re-encode a range to a video file.
    #[command(
        about = "Export a range to a video file",
        after_help = "Examples:\n  framescope export input.mp4 --out clip.mp4\n  framescope export input.mp4 --out slow.avi --start 10 --end 12 --interval 300 --codec mpeg4"
    )]
    Export {
        /// Input video path.
        input: PathBuf,
        /// Output video path. The container follows the extension.
        #[arg(long)]
        out: PathBuf,
        /// Range start (defaults to the beginning).
        #[arg(long)]
        start: Option<String>,
        /// Range end (defaults to the end).
        #[arg(long)]
        end: Option<String>,
        /// Playback interval of each frame in milliseconds.
        #[arg(long, default_value_t = 40.0)]
        interval: f64,
        /// Output codec.
        #[arg(long, value_enum, default_value = "mpeg4")]
        codec: CodecArg,
        /// Hold key frames instead of slowing down every frame.
        #[arg(long)]
        paused: bool,
        /// Decode the range into memory before exporting.
        #[arg(long)]
        cache: bool,
        /// Copy the video's analysis metadata next to the output.
        #[arg(long)]
        with_metadata: bool,
    },

    /// Generate shell completion scripts.
    #[command(
        about = "Generate shell completions",
        after_help = "Examples:\n  framescope completions bash > framescope.bash\n  framescope completions zsh > _framescope"
    )]
    Completions {
        /// Shell to generate completions for.
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn parse_timecode(value: &str) -> Result<Duration, Box<dyn std::error::Error>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("time value cannot be empty".into());
    }

    if let Ok(seconds) = trimmed.parse::<f64>() {
        return Ok(Duration::from_secs_f64(seconds.max(0.0)));
    }

    let parts: Vec<&str> = trimmed.split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return Err(format!("invalid time format: {trimmed}").into());
    }

    let (hours, minutes, seconds_str) = if parts.len() == 3 {
        (parts[0].parse::<u64>()?, parts[1].parse::<u64>()?, parts[2])
    } else {
        (0_u64, parts[0].parse::<u64>()?, parts[1])
    };

    let seconds = seconds_str.parse::<f64>()?;
    let total_seconds = (hours as f64 * 3600.0) + (minutes as f64 * 60.0) + seconds;
    Ok(Duration::from_secs_f64(total_seconds.max(0.0)))
}

/// Native timestamp of a position measured from the start of the video.
fn timestamp_at(info: &VideoInfo, position: Duration) -> i64 {
    info.first_timestamp + info.duration_to_timestamps(position)
}

fn parse_position(info: &VideoInfo, value: &str) -> Result<i64, Box<dyn std::error::Error>> {
    Ok(timestamp_at(info, parse_timecode(value)?))
}

fn parse_pixel_format(value: &str) -> Option<PixelFormat> {
    match value.to_ascii_lowercase().as_str() {
        "bgra8" | "bgra" => Some(PixelFormat::Bgra8),
        "rgba8" | "rgba" => Some(PixelFormat::Rgba8),
        "rgb8" | "rgb" => Some(PixelFormat::Rgb8),
        _ => None,
    }
}

fn parse_aspect_ratio(value: &str) -> Option<AspectRatio> {
    match value.to_ascii_lowercase().as_str() {
        "auto" => Some(AspectRatio::AutoDetect),
        "4:3" | "4x3" => Some(AspectRatio::Force4x3),
        "16:9" | "16x9" => Some(AspectRatio::Force16x9),
        "square" | "1:1" => Some(AspectRatio::ForceSquarePixels),
        _ => None,
    }
}

fn parse_log_level(value: &str) -> Option<FfmpegLogLevel> {
    match value.to_ascii_lowercase().as_str() {
        "quiet" => Some(FfmpegLogLevel::Quiet),
        "panic" => Some(FfmpegLogLevel::Panic),
        "fatal" => Some(FfmpegLogLevel::Fatal),
        "error" => Some(FfmpegLogLevel::Error),
        "warning" | "warn" => Some(FfmpegLogLevel::Warning),
        "info" => Some(FfmpegLogLevel::Info),
        "verbose" => Some(FfmpegLogLevel::Verbose),
        "debug" => Some(FfmpegLogLevel::Debug),
        "trace" => Some(FfmpegLogLevel::Trace),
        _ => None,
    }
}

fn ensure_writable_path(path: &Path, overwrite: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        if overwrite {
            eprintln!(
                "{} {}",
                "warning:".yellow().bold(),
                format!("overwriting {}", path.display()).yellow()
            );
        } else {
            return Err(format!(
                "output already exists: {} (use --overwrite to replace)",
                path.display()
            )
            .into());
        }
    }
    Ok(())
}

fn session_options(global: &GlobalOptions) -> Result<SessionOptions, Box<dyn std::error::Error>> {
    let mut options = SessionOptions::new().with_deinterlace(global.deinterlace);

    if let Some(pixel_str) = &global.pixel_format {
        let pixel = parse_pixel_format(pixel_str)
            .ok_or(format!("unsupported --pixel-format: {pixel_str}"))?;
        options = options.with_pixel_format(pixel);
    }

    if let Some(aspect_str) = &global.aspect {
        let aspect = parse_aspect_ratio(aspect_str)
            .ok_or(format!("unsupported --aspect: {aspect_str}"))?;
        options = options.with_aspect_ratio(aspect);
    }

    Ok(options)
}

fn operation_options(global: &GlobalOptions, message: &'static str) -> OperationOptions {
    let options = OperationOptions::new();
    if global.progress {
        options.with_progress(Arc::new(TerminalProgress::new(message)))
    } else {
        options
    }
}

fn open_session(
    input: &Path,
    global: &GlobalOptions,
) -> Result<VideoSession, Box<dyn std::error::Error>> {
    let mut session = VideoSession::new(session_options(global)?);
    session.load(input)?;
    if global.verbose {
        let info = session.info()?;
        eprintln!(
            "opened {} ({}x{} decoded as {}x{}, {:.3} fps via {:?})",
            input.display(),
            info.width,
            info.height,
            info.decoding_width,
            info.decoding_height,
            info.frames_per_second,
            info.frame_rate_method,
        );
    }
    Ok(session)
}

fn apply_global_options(global: &GlobalOptions) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(level) = &global.log_level {
        let parsed = parse_log_level(level).ok_or(format!("unsupported --log-level: {level}"))?;
        framescope::set_ffmpeg_log_level(parsed);
    } else if global.verbose {
        framescope::set_ffmpeg_log_level(framescope::ffmpeg_level_for(log::LevelFilter::Debug));
    } else {
        framescope::set_ffmpeg_log_level(framescope::ffmpeg_level_for(log::LevelFilter::Error));
    }
    Ok(())
}

struct TerminalProgress {
    bar: ProgressBar,
}

impl TerminalProgress {
    fn new(message: &'static str) -> Self {
        let bar = ProgressBar::new(0);
        if let Ok(style) =
            ProgressStyle::with_template("{spinner:.green} {bar:40.cyan/blue} {pos}/{len} {msg}")
        {
            bar.set_style(style.progress_chars("##-"));
        }
        bar.set_message(message);
        Self { bar }
    }
}

impl ProgressCallback for TerminalProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        if let Some(total) = info.total {
            self.bar.set_length(total.max(info.current));
        }
        self.bar.set_position(info.current);
    }
}

impl Drop for TerminalProgress {
    fn drop(&mut self) {
        self.bar.finish_and_clear();
    }
}

fn print_info(session: &VideoSession, input: &Path, as_json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let info = session.info()?;
    let metadata = session.metadata_text()?;
    if as_json {
        let payload = json!({
            "path": input.display().to_string(),
            "file_size": info.file_size,
            "container": info.container_format,
            "codec": info.codec_name,
            "width": info.width,
            "height": info.height,
            "decoding_width": info.decoding_width,
            "decoding_height": info.decoding_height,
            "pixel_aspect_ratio": info.pixel_aspect_ratio,
            "fps": info.frames_per_second,
            "fps_reliable": info.frame_rate_reliable,
            "fps_method": format!("{:?}", info.frame_rate_method),
            "frame_interval_ms": info.frame_interval_ms,
            "timestamps_per_second": info.timestamps_per_second,
            "average_timestamps_per_frame": info.average_timestamps_per_frame,
            "first_timestamp": info.first_timestamp,
            "duration_timestamps": info.duration_timestamps,
            "duration_seconds": info.duration().as_secs_f64(),
            "estimated_frames": info.estimate_frame_count(info.first_timestamp, None),
            "is_mpeg2": info.is_mpeg2,
            "has_metadata": metadata.is_some(),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("File: {} ({} bytes)", input.display(), info.file_size);
        println!("Container: {}  Codec: {}", info.container_format, info.codec_name);
        println!(
            "Size: {}x{} (decoded as {}x{}, pixel aspect {:.4})",
            info.width, info.height, info.decoding_width, info.decoding_height,
            info.pixel_aspect_ratio,
        );
        let reliability = if info.frame_rate_reliable {
            "reliable".green()
        } else {
            "estimated".yellow()
        };
        println!(
            "Frame rate: {:.3} fps [{}, {:?}]",
            info.frames_per_second, reliability, info.frame_rate_method,
        );
        println!(
            "Duration: {:.3}s ({} timestamps, {:.0} per second, {} per frame)",
            info.duration().as_secs_f64(),
            info.duration_timestamps,
            info.timestamps_per_second,
            info.average_timestamps_per_frame,
        );
        println!("First timestamp: {}", info.first_timestamp);
        if let Some(text) = metadata {
            println!("Metadata: {} bytes", text.len());
        }
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    apply_global_options(&cli.global)?;

    match cli.command {
        Commands::Info { input, json } => {
            let session = open_session(&input, &cli.global)?;
            print_info(&session, &input, json)?;
        }
        Commands::Frame { input, at, out } => {
            ensure_writable_path(&out, cli.global.overwrite)?;
            let mut session = open_session(&input, &cli.global)?;
            let target = parse_position(session.info()?, &at)?;
            let bitmap = session.read_frame(ReadRequest::Seek(target))?;
            bitmap.save(&out)?;
            let timestamp = session.selection()?.current_timestamp;
            if cli.global.verbose {
                eprintln!("requested {target}, decoded {timestamp}");
            }
            println!("{} {} (timestamp {timestamp})", "saved".green().bold(), out.display());
        }
        Commands::Cache {
            input,
            start,
            end,
            max_seconds,
            max_megabytes,
        } => {
            let mut session = open_session(&input, &cli.global)?;
            let info = session.info()?;
            let start = parse_position(info, &start)?;
            let end = parse_position(info, &end)?;
            if start > end {
                return Err("--start must be <= --end".into());
            }
            let max_bytes = max_megabytes.saturating_mul(1024 * 1024);
            if !session.can_extract_to_memory(start, end, max_seconds, max_bytes)? {
                return Err(format!(
                    "range [{start}, {end}] exceeds {max_seconds}s or {max_megabytes} MB"
                )
                .into());
            }

            let options = operation_options(&cli.global, "caching");
            let count = session.extract_to_memory(start, end, false, &options)?;
            let cache_bytes = session.cache().map_or(0, |cache| cache.byte_size());
            println!(
                "{} {}",
                "success:".green().bold(),
                format!("Cached {count} frame(s), {:.1} MB", cache_bytes as f64 / 1_048_576.0)
                    .green()
            );
            if let Some(cache) = session.cache() {
                if let (Some(first), Some(last)) = (cache.first_timestamp(), cache.last_timestamp()) {
                    println!("Range: [{first}, {last}]");
                }
            }
        }
        Commands::Export {
            input,
            out,
            start,
            end,
            interval,
            codec,
            paused,
            cache,
            with_metadata,
        } => {
            ensure_writable_path(&out, cli.global.overwrite)?;
            let mut session = open_session(&input, &cli.global)?;
            let info = session.info()?;
            let start = start
                .map(|value| parse_position(info, &value))
                .transpose()?
                .unwrap_or(info.first_timestamp);
            let end = end
                .map(|value| parse_position(info, &value))
                .transpose()?
                .unwrap_or(info.first_timestamp + info.duration_timestamps);
            if start > end {
                return Err("--start must be <= --end".into());
            }

            let mut export = ExportOptions::new()
                .with_frame_interval(interval)
                .with_paused(paused)
                .with_range(start, end)
                .with_codec(codec.into());
            if with_metadata {
                if let Some(text) = session.metadata_text()? {
                    export = export.with_metadata(text);
                }
            }

            if cache {
                let options = operation_options(&cli.global, "caching");
                session.extract_to_memory(start, end, false, &options)?;
            }

            let options = operation_options(&cli.global, "exporting");
            let summary = session.save(&out, &export, &mut NoOverlay, &options)?;
            if summary.frames_failed > 0 {
                eprintln!(
                    "{} {}",
                    "warning:".yellow().bold(),
                    format!("{} frame(s) could not be written", summary.frames_failed).yellow()
                );
            }
            if summary.frames_written == 0 {
                eprintln!(
                    "{} {}",
                    "warning:".yellow().bold(),
                    format!("no frame selected, {} was not created", out.display()).yellow()
                );
            } else {
                println!(
                    "{} {}",
                    "success:".green().bold(),
                    format!("Wrote {} frame(s) to {}", summary.frames_written, out.display())
                        .green()
                );
            }
        }
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "framescope", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}
