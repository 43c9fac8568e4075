//! FFmpeg console verbosity.
//!
//! Everything `framescope` itself reports goes through the [`log`] facade.
//! FFmpeg prints to stderr on its own, so its level is set separately here;
//! [`ffmpeg_level_for`] keeps both in step when an application configures a
//! single `log` filter.
//!
//! ```no_run
//! use framescope::{FfmpegLogLevel, ffmpeg_level_for, set_ffmpeg_log_level};
//!
//! set_ffmpeg_log_level(FfmpegLogLevel::Quiet);
//! set_ffmpeg_log_level(ffmpeg_level_for(log::LevelFilter::Debug));
//! ```

use ffmpeg_next::util::log::Level;
use log::LevelFilter;

/// FFmpeg's own log levels, quietest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FfmpegLogLevel {
    /// No output.
    Quiet,
    /// Conditions that abort the process.
    Panic,
    /// Unrecoverable errors.
    Fatal,
    /// Recoverable errors.
    Error,
    /// Warnings, FFmpeg's default.
    Warning,
    /// Informational messages.
    Info,
    /// Verbose informational messages.
    Verbose,
    /// Debugging messages.
    Debug,
    /// Everything.
    Trace,
}

impl FfmpegLogLevel {
    fn to_ffmpeg_level(self) -> Level {
        match self {
            FfmpegLogLevel::Quiet => Level::Quiet,
            FfmpegLogLevel::Panic => Level::Panic,
            FfmpegLogLevel::Fatal => Level::Fatal,
            FfmpegLogLevel::Error => Level::Error,
            FfmpegLogLevel::Warning => Level::Warning,
            FfmpegLogLevel::Info => Level::Info,
            FfmpegLogLevel::Verbose => Level::Verbose,
            FfmpegLogLevel::Debug => Level::Debug,
            FfmpegLogLevel::Trace => Level::Trace,
        }
    }

    fn from_ffmpeg_level(level: Level) -> Self {
        match level {
            Level::Quiet => FfmpegLogLevel::Quiet,
            Level::Panic => FfmpegLogLevel::Panic,
            Level::Fatal => FfmpegLogLevel::Fatal,
            Level::Error => FfmpegLogLevel::Error,
            Level::Warning => FfmpegLogLevel::Warning,
            Level::Info => FfmpegLogLevel::Info,
            Level::Verbose => FfmpegLogLevel::Verbose,
            Level::Debug => FfmpegLogLevel::Debug,
            Level::Trace => FfmpegLogLevel::Trace,
        }
    }
}

/// Nearest FFmpeg level for a `log` filter.
///
/// FFmpeg's `info` chatter is much noisier than ours, so `Info` maps to
/// FFmpeg warnings and `Debug` to FFmpeg info.
pub fn ffmpeg_level_for(filter: LevelFilter) -> FfmpegLogLevel {
    match filter {
        LevelFilter::Off => FfmpegLogLevel::Quiet,
        LevelFilter::Error => FfmpegLogLevel::Error,
        LevelFilter::Warn | LevelFilter::Info => FfmpegLogLevel::Warning,
        LevelFilter::Debug => FfmpegLogLevel::Info,
        LevelFilter::Trace => FfmpegLogLevel::Debug,
    }
}

/// Set FFmpeg's console verbosity. Does not affect the `log` facade.
pub fn set_ffmpeg_log_level(level: FfmpegLogLevel) {
    ffmpeg_next::util::log::set_level(level.to_ffmpeg_level());
}

/// Current FFmpeg console verbosity, if it maps to a known level.
pub fn get_ffmpeg_log_level() -> Option<FfmpegLogLevel> {
    ffmpeg_next::util::log::get_level()
        .ok()
        .map(FfmpegLogLevel::from_ffmpeg_level)
}
