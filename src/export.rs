//! Exporting a session to a video file.
//!
//! Frames come from the cache in analysis mode and from the decoder
//! otherwise. Each one is copied, handed to a [`FrameRenderer`] for overlay
//! drawing, then written to a [`FrameSink`] as many times as the
//! [`FramePacing`] requires.
//!
//! # Example
//!
//! ```no_run
//! use framescope::{ExportOptions, FramescopeError, NoOverlay, OperationOptions, VideoSession};
//!
//! let mut session = VideoSession::open("input.mp4")?;
//! let summary = session.save(
//!     "output.mp4",
//!     &ExportOptions::new().with_frame_interval(100.0),
//!     &mut NoOverlay,
//!     &OperationOptions::default(),
//! )?;
//! println!("{} frames written", summary.frames_written);
//! # Ok::<(), FramescopeError>(())
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use crate::bitmap::Bitmap;
use crate::configuration::OperationOptions;
use crate::decoder::VideoDecoder;
use crate::error::FramescopeError;
use crate::progress::{OperationType, ProgressTracker};
use crate::session::{ReadRequest, VideoSession};
use crate::writer::{VideoCodec, VideoFileWriter};

/// Output interval used when none is requested.
pub const DEFAULT_FRAME_INTERVAL_MS: f64 = 40.0;

/// Longest interval a player is expected to hold a single frame for.
const MAX_OUTPUT_INTERVAL_MS: f64 = 125.0;

/// Options for [`VideoSession::save`].
#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub(crate) frame_interval_ms: f64,
    pub(crate) keyframes_only: bool,
    pub(crate) paused: bool,
    pub(crate) flush_overlay: bool,
    pub(crate) metadata: Option<String>,
    pub(crate) range: Option<(i64, i64)>,
    pub(crate) codec: VideoCodec,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            frame_interval_ms: DEFAULT_FRAME_INTERVAL_MS,
            keyframes_only: false,
            paused: false,
            flush_overlay: false,
            metadata: None,
            range: None,
            codec: VideoCodec::default(),
        }
    }
}

impl ExportOptions {
    /// Default options: 40 ms per frame, every frame, MPEG-4.
    pub fn new() -> Self {
        Self::default()
    }

    /// Playback interval of the exported video, in milliseconds.
    #[must_use]
    pub fn with_frame_interval(mut self, interval_ms: f64) -> Self {
        self.frame_interval_ms = interval_ms;
        self
    }

    /// Only write frames the renderer reports as key frames.
    #[must_use]
    pub fn with_keyframes_only(mut self, keyframes_only: bool) -> Self {
        self.keyframes_only = keyframes_only;
        self
    }

    /// Hold key frames on screen instead of slowing down every frame.
    #[must_use]
    pub fn with_paused(mut self, paused: bool) -> Self {
        self.paused = paused;
        self
    }

    /// Passed through to the renderer.
    #[must_use]
    pub fn with_flush_overlay(mut self, flush: bool) -> Self {
        self.flush_overlay = flush;
        self
    }

    /// Analysis metadata written alongside the video.
    #[must_use]
    pub fn with_metadata(mut self, text: impl Into<String>) -> Self {
        self.metadata = Some(text.into());
        self
    }

    /// Export only `[start, end]` (native timestamps).
    #[must_use]
    pub fn with_range(mut self, start: i64, end: i64) -> Self {
        self.range = Some((start, end));
        self
    }

    /// Output codec.
    #[must_use]
    pub fn with_codec(mut self, codec: VideoCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Pacing for a source with frames `source_interval_ms` apart.
    pub fn pacing(&self, source_interval_ms: f64) -> FramePacing {
        FramePacing::compute(self.frame_interval_ms, source_interval_ms, self.paused)
    }
}

/// How often each source frame is written, and at what interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FramePacing {
    /// Interval between two written frames, in milliseconds.
    pub output_interval_ms: f64,
    /// Copies written per source frame.
    pub duplication: u32,
}

impl FramePacing {
    /// Work out the pacing for a requested interval.
    ///
    /// Slow exports are emulated by duplicating frames so that no single
    /// frame lasts longer than 125 ms. In paused mode the output keeps the
    /// source interval and only key frames are duplicated.
    pub fn compute(target_interval_ms: f64, source_interval_ms: f64, paused: bool) -> Self {
        if target_interval_ms <= 0.0 {
            return Self {
                output_interval_ms: DEFAULT_FRAME_INTERVAL_MS,
                duplication: 1,
            };
        }

        if paused {
            let factor = if source_interval_ms > 0.0 {
                (target_interval_ms / source_interval_ms).floor().max(1.0)
            } else {
                1.0
            };
            let output_interval_ms = if source_interval_ms > 0.0 {
                source_interval_ms
            } else {
                DEFAULT_FRAME_INTERVAL_MS
            };
            return Self {
                output_interval_ms,
                duplication: factor as u32,
            };
        }

        let factor = (target_interval_ms / MAX_OUTPUT_INTERVAL_MS).ceil().max(1.0);
        Self {
            output_interval_ms: target_interval_ms / factor,
            duplication: factor as u32,
        }
    }
}

/// Draws overlays on exported frames.
///
/// Returns the distance in frames to the nearest key frame; `0` marks a key
/// frame.
pub trait FrameRenderer {
    /// Draw on `bitmap`, the frame at `timestamp`.
    fn render(&mut self, bitmap: &mut Bitmap, timestamp: i64, flush: bool, paused: bool) -> i64;
}

impl<F> FrameRenderer for F
where
    F: FnMut(&mut Bitmap, i64, bool, bool) -> i64,
{
    fn render(&mut self, bitmap: &mut Bitmap, timestamp: i64, flush: bool, paused: bool) -> i64 {
        self(bitmap, timestamp, flush, paused)
    }
}

/// Leaves frames untouched and reports every frame as a key frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOverlay;

impl FrameRenderer for NoOverlay {
    fn render(&mut self, _: &mut Bitmap, _: i64, _: bool, _: bool) -> i64 {
        0
    }
}

/// Destination of an export.
pub trait FrameSink {
    /// Store the analysis metadata. Called at most once, before any frame.
    fn write_metadata(&mut self, text: &str) -> Result<(), FramescopeError>;

    /// Append one frame.
    fn write_frame(&mut self, bitmap: &Bitmap) -> Result<(), FramescopeError>;

    /// Flush and close. Called exactly once per export, even after a failure.
    fn finish(&mut self) -> Result<(), FramescopeError>;

    /// Files created so far, removed when the export is cancelled.
    fn output_paths(&self) -> Vec<PathBuf> {
        Vec::new()
    }
}

/// Counters reported by an export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportSummary {
    /// Frames written to the sink, duplicates included.
    pub frames_written: u64,
    /// Single writes that failed and were skipped.
    pub frames_failed: u64,
    /// Source frames dropped because they were not key frames.
    pub frames_skipped: u64,
}

struct Exporter<'a, S: ?Sized, R: ?Sized> {
    sink: &'a mut S,
    renderer: &'a mut R,
    export: &'a ExportOptions,
    pacing: FramePacing,
    summary: ExportSummary,
    tracker: ProgressTracker,
    options: &'a OperationOptions,
}

impl<S, R> Exporter<'_, S, R>
where
    S: FrameSink + ?Sized,
    R: FrameRenderer + ?Sized,
{
    fn emit(&mut self, mut bitmap: Bitmap, timestamp: i64) -> Result<(), FramescopeError> {
        let key_distance = self.renderer.render(
            &mut bitmap,
            timestamp,
            self.export.flush_overlay,
            self.export.paused,
        );
        let is_key = key_distance == 0;

        if self.export.keyframes_only && !is_key {
            log::trace!("skipping non-key frame {timestamp}");
            self.summary.frames_skipped += 1;
        } else if self.pacing.duplication <= 1 || (self.export.paused && !is_key) {
            match self.sink.write_frame(&bitmap) {
                Ok(()) => self.summary.frames_written += 1,
                Err(error) => {
                    log::warn!("frame {timestamp} not written: {error}");
                    self.summary.frames_failed += 1;
                }
            }
        } else {
            for _ in 0..self.pacing.duplication {
                self.sink.write_frame(&bitmap).map_err(write_error)?;
                self.summary.frames_written += 1;
            }
        }

        self.tracker.advance(Some(timestamp));
        if self.options.is_cancelled() {
            return Err(FramescopeError::Cancelled);
        }
        Ok(())
    }
}

impl<D: VideoDecoder> VideoSession<D> {
    /// Export the session to a video file.
    ///
    /// In analysis mode the cached frames are written; otherwise the range
    /// (the whole video by default) is decoded frame by frame. A cancelled
    /// export deletes what it wrote.
    ///
    /// # Errors
    ///
    /// - [`FramescopeError::MovieNotLoaded`] without a loaded file.
    /// - [`FramescopeError::ReadingError`] if a frame cannot be decoded.
    /// - [`FramescopeError::VideoWriteError`] / [`FramescopeError::VideoEncodeError`]
    ///   if the output cannot be written.
    /// - [`FramescopeError::Cancelled`] if the token fires.
    pub fn save<P, R>(
        &mut self,
        path: P,
        export: &ExportOptions,
        renderer: &mut R,
        options: &OperationOptions,
    ) -> Result<ExportSummary, FramescopeError>
    where
        P: AsRef<Path>,
        R: FrameRenderer + ?Sized,
    {
        let pacing = export.pacing(self.info()?.frame_interval_ms);
        let mut writer = VideoFileWriter::new(path, export.codec, pacing.output_interval_ms)
            .with_companion_extension(self.options().companion_extension());

        let result = self.save_to_sink(&mut writer, export, renderer, options);
        if let Err(FramescopeError::Cancelled) = result {
            for path in writer.output_paths() {
                match fs::remove_file(&path) {
                    Ok(()) => log::debug!("removed partial output {}", path.display()),
                    Err(error) => log::warn!("cannot remove {}: {error}", path.display()),
                }
            }
        }
        result
    }

    /// Export the session to any [`FrameSink`].
    ///
    /// The sink is expected to play frames at
    /// [`ExportOptions::pacing`]`.output_interval_ms`.
    pub fn save_to_sink<S, R>(
        &mut self,
        sink: &mut S,
        export: &ExportOptions,
        renderer: &mut R,
        options: &OperationOptions,
    ) -> Result<ExportSummary, FramescopeError>
    where
        S: FrameSink + ?Sized,
        R: FrameRenderer + ?Sized,
    {
        let result = self.export_frames(sink, export, renderer, options);
        let finished = sink.finish();
        let summary = result?;
        finished?;
        log::info!(
            "Export done: {} written, {} failed, {} skipped",
            summary.frames_written,
            summary.frames_failed,
            summary.frames_skipped
        );
        Ok(summary)
    }

    fn export_frames<S, R>(
        &mut self,
        sink: &mut S,
        export: &ExportOptions,
        renderer: &mut R,
        options: &OperationOptions,
    ) -> Result<ExportSummary, FramescopeError>
    where
        S: FrameSink + ?Sized,
        R: FrameRenderer + ?Sized,
    {
        let loaded = self.loaded_mut()?;
        let info = &loaded.info;
        let pacing = export.pacing(info.frame_interval_ms);
        let (start, end) = export.range.unwrap_or((
            info.first_timestamp,
            info.first_timestamp.saturating_add(info.duration_timestamps),
        ));
        log::debug!(
            "export pacing: {} copies at {:.2}ms, range [{start}, {end}]",
            pacing.duplication,
            pacing.output_interval_ms
        );

        if let Some(text) = export.metadata.as_deref().filter(|text| !text.is_empty()) {
            sink.write_metadata(text)?;
        }

        let analysis_mode = loaded.selection.analysis_mode;
        let total = if analysis_mode {
            loaded
                .cache
                .frames()
                .iter()
                .filter(|frame| export.range.is_none() || (start..=end).contains(&frame.timestamp))
                .count() as u64
        } else {
            info.estimate_frame_count(start, Some(end)).max(0) as u64
        };

        let mut exporter = Exporter {
            sink,
            renderer,
            export,
            pacing,
            summary: ExportSummary::default(),
            tracker: ProgressTracker::new(
                options.progress.clone(),
                OperationType::Export,
                Some(total),
                options.batch_size,
            ),
            options,
        };

        if analysis_mode {
            let frames = loaded
                .cache
                .frames()
                .iter()
                .filter(|frame| export.range.is_none() || (start..=end).contains(&frame.timestamp));
            for frame in frames {
                exporter.emit(frame.bitmap.clone(), frame.timestamp)?;
            }
        } else {
            let mut request = ReadRequest::Seek(start);
            loop {
                match loaded.read_decoded(request) {
                    Ok(()) => {}
                    Err(FramescopeError::FrameNotRead) => break,
                    Err(error) => return Err(FramescopeError::ReadingError(error.to_string())),
                }
                let timestamp = loaded.selection.current_timestamp;
                let Some(bitmap) = loaded.displayed.clone() else {
                    return Err(FramescopeError::ReadingError(format!(
                        "no picture at {timestamp}"
                    )));
                };
                exporter.emit(bitmap, timestamp)?;
                if timestamp >= end {
                    break;
                }
                request = ReadRequest::Relative(1);
            }
        }

        exporter.tracker.finish();
        Ok(exporter.summary)
    }
}

fn write_error(error: FramescopeError) -> FramescopeError {
    match error {
        FramescopeError::VideoWriteError(reason) => FramescopeError::VideoWriteError(reason),
        other => FramescopeError::VideoWriteError(other.to_string()),
    }
}
