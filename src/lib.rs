//! # framescope
//!
//! Frame-accurate video decoding sessions for analysis tools, powered by
//! FFmpeg via the [`ffmpeg-next`](https://crates.io/crates/ffmpeg-next) crate.
//!
//! A [`VideoSession`] opens a file, picks its best video stream, estimates a
//! trustworthy frame rate and duration, and turns the decoder's packets into
//! a monotonic timeline even when the container's timestamps are missing or
//! out of order. On top of that timeline it offers:
//!
//! - **Frame reads**: absolute seeks and relative steps, with a single
//!   corrective re-seek when the demuxer lands past the target
//! - **Analysis mode**: a selection decoded once into memory and then
//!   scrubbed without touching the decoder; narrowing or extending the
//!   selection reuses what is already cached
//! - **Export**: the session (or its cache) re-encoded to a video file
//!   through an overlay renderer, with slow-motion pacing by frame
//!   duplication
//! - **Progress & cancellation** for cache loads and exports
//!
//! ## Quick Start
//!
//! ```no_run
//! use framescope::{OperationOptions, ReadRequest, VideoSession};
//!
//! let mut session = VideoSession::open("input.mp4").unwrap();
//! let info = session.info().unwrap().clone();
//! println!("{}x{} @ {:.3} fps", info.width, info.height, info.frames_per_second);
//!
//! let one_second = info.timestamps_per_second as i64;
//! session.read_frame(ReadRequest::Seek(info.first_timestamp + one_second)).unwrap();
//!
//! let cached = session
//!     .extract_to_memory(info.first_timestamp, info.first_timestamp + 2 * one_second, false,
//!         &OperationOptions::default())
//!     .unwrap();
//! println!("{cached} frames in memory");
//! ```
//!
//! ## Requirements
//!
//! FFmpeg development libraries must be installed on your system.

pub mod bitmap;
pub mod cache;
pub mod configuration;
pub mod decoder;
pub mod error;
pub mod estimator;
pub mod export;
pub mod ffmpeg_decoder;
pub mod logging;
pub mod metadata;
pub mod progress;
pub mod reconcile;
pub mod seek;
pub mod selector;
pub mod session;
pub mod writer;

pub use bitmap::{Bitmap, FrameView};
pub use cache::{DecodedFrame, FrameCache, ImportPlan, ImportStrategy, plan_import};
pub use configuration::{AspectRatio, OperationOptions, PixelFormat, ScalingQuality, SessionOptions};
pub use decoder::{ConversionTarget, DecodeStep, SeekRequest, VideoDecoder};
pub use error::FramescopeError;
pub use estimator::{EstimationMethod, FrameRateEstimate, FrameRateEvidence, estimate_frame_rate};
pub use export::{ExportOptions, ExportSummary, FramePacing, FrameRenderer, FrameSink, NoOverlay};
pub use ffmpeg_decoder::FfmpegDecoder;
pub use logging::{FfmpegLogLevel, ffmpeg_level_for, get_ffmpeg_log_level, set_ffmpeg_log_level};
pub use metadata::VideoInfo;
pub use progress::{CancellationToken, OperationType, ProgressCallback, ProgressInfo};
pub use reconcile::{PacketTimestamps, TimestampReconciler};
pub use seek::{SeekOutcome, seek_and_correct};
pub use selector::{MediaKind, StreamDescriptor, select_best_stream};
pub use session::{PrimarySelection, ReadRequest, VideoSession};
pub use writer::{VideoCodec, VideoFileWriter};

pub use ffmpeg_next::Rational;
