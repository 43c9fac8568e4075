//! Video sessions.
//!
//! A [`VideoSession`] owns one loaded file and turns it into a frame-accurate
//! timeline. In normal mode every read drives the decoder: seeks go through
//! the overshoot corrector and every decoded packet through the timestamp
//! reconciler. In analysis mode a selection has been decoded into a
//! [`FrameCache`] and reads are served from memory.
//!
//! # Example
//!
//! ```no_run
//! use framescope::{FramescopeError, ReadRequest, VideoSession};
//!
//! let mut session = VideoSession::open("input.mp4")?;
//! let one_second = session.info()?.timestamps_per_second as i64;
//! session.read_frame(ReadRequest::Seek(one_second))?;
//! session.read_frame(ReadRequest::Relative(1))?;
//! if let Some(bitmap) = session.current_bitmap() {
//!     bitmap.save("frame.png")?;
//! }
//! # Ok::<(), FramescopeError>(())
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use crate::bitmap::Bitmap;
use crate::cache::{DecodedFrame, FrameCache, ImportPlan, ImportStrategy, plan_import};
use crate::configuration::{AspectRatio, OperationOptions, PixelFormat, SessionOptions};
use crate::decoder::{ConversionTarget, VideoDecoder};
use crate::error::FramescopeError;
use crate::ffmpeg_decoder::FfmpegDecoder;
use crate::metadata::VideoInfo;
use crate::progress::{OperationType, ProgressTracker};
use crate::reconcile::TimestampReconciler;
use crate::selector;
use crate::seek::seek_and_correct;

/// Which frame [`VideoSession::read_frame`] should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadRequest {
    /// The first frame at or after an absolute native timestamp.
    Seek(i64),
    /// A number of frames away from the current one. Negative deltas seek
    /// backwards; zero and positive deltas decode forward (at least one frame).
    Relative(i64),
}

/// Position of the session on its timeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrimarySelection {
    /// Whether reads are served from the frame cache.
    pub analysis_mode: bool,
    /// Index of the displayed frame in the cache (analysis mode only).
    pub current_frame: usize,
    /// Reconciled timestamp of the displayed frame.
    pub current_timestamp: i64,
    /// Number of cached frames (analysis mode only).
    pub duration_frames: usize,
}

pub(crate) struct LoadedVideo<D> {
    pub(crate) decoder: D,
    pub(crate) info: VideoInfo,
    pub(crate) path: Option<PathBuf>,
    pub(crate) pixel_format: PixelFormat,
    pub(crate) reconciler: TimestampReconciler,
    pub(crate) cache: FrameCache,
    pub(crate) selection: PrimarySelection,
    pub(crate) displayed: Option<Bitmap>,
    pub(crate) metadata: Option<String>,
}

/// A decoding session over one video file.
pub struct VideoSession<D: VideoDecoder = FfmpegDecoder> {
    options: SessionOptions,
    pub(crate) loaded: Option<LoadedVideo<D>>,
}

impl VideoSession<FfmpegDecoder> {
    /// Open a file with default options.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, FramescopeError> {
        let mut session = Self::new(SessionOptions::default());
        session.load(path)?;
        Ok(session)
    }

    /// Load a file, replacing whatever was loaded before.
    ///
    /// On failure the session is left unloaded.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<(), FramescopeError> {
        self.unload();
        let path = path.as_ref();
        let (decoder, info) = FfmpegDecoder::open(path, &self.options)?;
        self.install(decoder, info, Some(path.to_path_buf()));
        Ok(())
    }
}

impl<D: VideoDecoder> VideoSession<D> {
    /// Create an empty session.
    pub fn new(options: SessionOptions) -> Self {
        Self {
            options,
            loaded: None,
        }
    }

    /// Load an already opened decoder.
    ///
    /// The decoding geometry is recomputed from `info` so that it always
    /// matches its aspect-ratio policy.
    pub fn load_with(&mut self, decoder: D, info: VideoInfo) {
        self.unload();
        self.install(decoder, info, None);
    }

    fn install(&mut self, decoder: D, mut info: VideoInfo, path: Option<PathBuf>) {
        info.apply_aspect_ratio(info.aspect_ratio);
        let mut loaded = LoadedVideo {
            reconciler: TimestampReconciler::new(info.average_timestamps_per_frame),
            decoder,
            info,
            path,
            pixel_format: self.options.pixel_format,
            cache: FrameCache::new(),
            selection: PrimarySelection::default(),
            displayed: None,
            metadata: None,
        };
        loaded.metadata = loaded.load_metadata(&self.options.companion_extension);
        self.loaded = Some(loaded);
    }

    /// Release the loaded file. Calling this on an empty session does nothing.
    pub fn unload(&mut self) {
        if let Some(loaded) = self.loaded.take() {
            log::debug!(
                "Unloading video ({} cached frames)",
                loaded.cache.len()
            );
        }
    }

    /// Whether a file is loaded.
    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    /// Options the session was created with.
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub(crate) fn loaded(&self) -> Result<&LoadedVideo<D>, FramescopeError> {
        self.loaded.as_ref().ok_or(FramescopeError::MovieNotLoaded)
    }

    pub(crate) fn loaded_mut(&mut self) -> Result<&mut LoadedVideo<D>, FramescopeError> {
        self.loaded.as_mut().ok_or(FramescopeError::MovieNotLoaded)
    }

    /// Information about the loaded video.
    pub fn info(&self) -> Result<&VideoInfo, FramescopeError> {
        Ok(&self.loaded()?.info)
    }

    /// Current position on the timeline.
    pub fn selection(&self) -> Result<&PrimarySelection, FramescopeError> {
        Ok(&self.loaded()?.selection)
    }

    /// The frame cache, empty outside analysis mode.
    pub fn cache(&self) -> Option<&FrameCache> {
        self.loaded.as_ref().map(|loaded| &loaded.cache)
    }

    /// The bitmap of the current frame, if one has been produced.
    pub fn current_bitmap(&self) -> Option<&Bitmap> {
        self.loaded.as_ref().and_then(|loaded| loaded.displayed.as_ref())
    }

    /// Analysis metadata, from the embedded stream or the companion file.
    pub fn metadata_text(&self) -> Result<Option<&str>, FramescopeError> {
        Ok(self.loaded()?.metadata.as_deref())
    }

    /// Decode (or fetch from the cache) the requested frame and make it current.
    ///
    /// # Errors
    ///
    /// - [`FramescopeError::MovieNotLoaded`] without a loaded file.
    /// - [`FramescopeError::MemoryNotAllocated`] if the decoder reports no picture size.
    /// - [`FramescopeError::FrameNotRead`] at the end of the stream.
    /// - [`FramescopeError::ImageNotConverted`] if the picture cannot be
    ///   converted even with square pixels; the current bitmap is cleared.
    pub fn read_frame(&mut self, request: ReadRequest) -> Result<&Bitmap, FramescopeError> {
        let loaded = self.loaded_mut()?;
        if loaded.selection.analysis_mode {
            loaded.read_cached(request);
        } else {
            loaded.read_decoded(request)?;
        }
        loaded
            .displayed
            .as_ref()
            .ok_or_else(|| FramescopeError::ImageNotConverted("no picture".to_string()))
    }

    /// Whether `[start, end]` is small enough to be cached.
    ///
    /// The span must last more than zero and at most `max_seconds` seconds,
    /// and its estimated bitmap memory must not exceed `max_bytes`.
    pub fn can_extract_to_memory(
        &self,
        start: i64,
        end: i64,
        max_seconds: f64,
        max_bytes: u64,
    ) -> Result<bool, FramescopeError> {
        let loaded = self.loaded()?;
        let info = &loaded.info;
        let span = end.saturating_sub(start);
        let seconds = info.timestamps_to_seconds(span);
        let frame_bytes =
            Bitmap::buffer_size(info.decoding_width, info.decoding_height, loaded.pixel_format)
                as u64;
        let total_frames = info.estimate_frame_count(start, Some(end)) as u64;
        let estimated = frame_bytes.saturating_mul(total_frames);

        log::debug!(
            "cache eligibility: {seconds:.2}s (max {max_seconds}), {estimated} bytes (max {max_bytes})"
        );
        Ok(seconds > 0.0 && seconds <= max_seconds && estimated <= max_bytes)
    }

    /// Work out how the cache must change to hold `[start, end]`.
    ///
    /// Trimming happens immediately. When no decoding is needed the session
    /// stays in analysis mode on the trimmed cache.
    pub fn prepare_selection(
        &mut self,
        start: i64,
        end: i64,
        force_reload: bool,
    ) -> Result<ImportPlan, FramescopeError> {
        let loaded = self.loaded_mut()?;
        if start > end {
            return Err(FramescopeError::InvalidRange { start, end });
        }
        let plan = plan_import(
            &mut loaded.cache,
            loaded.selection.analysis_mode && !force_reload,
            start,
            end,
            loaded.info.average_timestamps_per_frame,
        );
        match plan.strategy {
            ImportStrategy::Complete => loaded.leave_analysis_mode(),
            ImportStrategy::Reduction => loaded.enter_analysis_mode(),
            ImportStrategy::InsertionBefore | ImportStrategy::InsertionAfter => {}
        }
        Ok(plan)
    }

    /// Decode `[start, end]` into the frame cache and switch to analysis mode.
    ///
    /// Frames already cached are reused: a narrower range only trims, and a
    /// range reaching further on one side only decodes the missing part.
    /// Returns the number of cached frames.
    ///
    /// A picture that fails to convert ends the load early: the frames cached
    /// before it are kept and the session still enters analysis mode.
    ///
    /// # Errors
    ///
    /// - [`FramescopeError::Cancelled`] if the token fires; the cache is discarded.
    /// - [`FramescopeError::FrameNotRead`] if no frame could be decoded.
    /// - [`FramescopeError::InvalidRange`] if `start > end`.
    pub fn extract_to_memory(
        &mut self,
        start: i64,
        end: i64,
        force_reload: bool,
        options: &OperationOptions,
    ) -> Result<usize, FramescopeError> {
        let plan = self.prepare_selection(start, end, force_reload)?;
        let loaded = self.loaded_mut()?;
        if !plan.needs_decoding() {
            log::debug!("selection reduced to {} cached frames", loaded.cache.len());
            return Ok(loaded.cache.len());
        }

        loaded.selection.analysis_mode = false;
        match loaded.import_frames(&plan, options) {
            Ok(ImportOutcome::Completed) if !loaded.cache.is_empty() => {
                loaded.enter_analysis_mode();
                log::info!(
                    "Cached {} frames ({} bytes)",
                    loaded.cache.len(),
                    loaded.cache.byte_size()
                );
                Ok(loaded.cache.len())
            }
            Ok(ImportOutcome::Completed) => {
                log::warn!("no frame decoded in [{}, {}]", plan.start, plan.end);
                loaded.leave_analysis_mode();
                loaded.displayed = None;
                Err(FramescopeError::FrameNotRead)
            }
            Ok(ImportOutcome::Cancelled) => {
                log::info!("cache load cancelled");
                loaded.leave_analysis_mode();
                Err(FramescopeError::Cancelled)
            }
            Err(error) => {
                loaded.leave_analysis_mode();
                Err(error)
            }
        }
    }

    /// Drop the cache and return to decoding mode.
    pub fn exit_analysis_mode(&mut self) -> Result<(), FramescopeError> {
        self.loaded_mut()?.leave_analysis_mode();
        Ok(())
    }

    /// Timestamp of a timeline position.
    ///
    /// In analysis mode `position` is a cache index (clamped); otherwise it
    /// already is a timestamp and is returned unchanged.
    pub fn timestamp_for_position(&self, position: i64) -> Result<i64, FramescopeError> {
        let loaded = self.loaded()?;
        if loaded.selection.analysis_mode {
            let index = loaded.cache.clamp_index(position);
            Ok(loaded.cache.get(index).map_or(position, |frame| frame.timestamp))
        } else {
            Ok(position)
        }
    }

    /// Frame number of a timestamp.
    ///
    /// In analysis mode this is the index of the first cached frame at or
    /// after `timestamp`; otherwise an estimate from the average frame spacing.
    pub fn frame_number_for_timestamp(&self, timestamp: i64) -> Result<usize, FramescopeError> {
        let loaded = self.loaded()?;
        if loaded.selection.analysis_mode {
            return Ok(loaded.cache.frame_number_for(timestamp));
        }
        let info = &loaded.info;
        if info.average_timestamps_per_frame <= 0 {
            return Ok(0);
        }
        let offset = timestamp.saturating_sub(info.first_timestamp);
        Ok((offset / info.average_timestamps_per_frame).max(0) as usize)
    }

    /// Switch the aspect-ratio policy.
    ///
    /// Cached frames no longer match the new size, so analysis mode is left.
    pub fn change_aspect_ratio(&mut self, policy: AspectRatio) -> Result<(), FramescopeError> {
        let loaded = self.loaded_mut()?;
        if loaded.info.aspect_ratio == policy {
            return Ok(());
        }
        loaded.info.apply_aspect_ratio(policy);
        if !loaded.cache.is_empty() {
            log::debug!("aspect ratio changed, discarding cached frames");
            loaded.leave_analysis_mode();
        }
        Ok(())
    }

    /// Enable or disable deinterlacing for subsequently decoded frames.
    pub fn set_deinterlace(&mut self, deinterlace: bool) -> Result<(), FramescopeError> {
        self.loaded_mut()?.info.deinterlace = deinterlace;
        Ok(())
    }
}

impl<D: VideoDecoder> Drop for VideoSession<D> {
    fn drop(&mut self) {
        self.unload();
    }
}

pub(crate) enum ImportOutcome {
    Completed,
    Cancelled,
}

impl<D: VideoDecoder> LoadedVideo<D> {
    fn load_metadata(&mut self, companion_extension: &str) -> Option<String> {
        match self.decoder.read_embedded_metadata() {
            Ok(Some(text)) => return Some(text),
            Ok(None) => {}
            Err(error) => log::warn!("embedded metadata could not be read: {error}"),
        }

        let path = self.path.as_deref()?;
        let companion = selector::find_companion_metadata(path, companion_extension)?;
        match fs::read_to_string(&companion) {
            Ok(text) => {
                log::debug!("metadata read from {}", companion.display());
                Some(text)
            }
            Err(error) => {
                log::warn!("companion file {} unreadable: {error}", companion.display());
                None
            }
        }
    }

    pub(crate) fn conversion_target(&self) -> ConversionTarget {
        ConversionTarget {
            width: self.info.decoding_width,
            height: self.info.decoding_height,
            format: self.pixel_format,
            quality: self.info.scaling_quality,
            deinterlace: self.info.deinterlace,
        }
    }

    /// Decode until the next picture completes and return its timestamp.
    fn decode_until_completed(&mut self) -> Result<i64, FramescopeError> {
        loop {
            let step = self
                .decoder
                .decode_next()?
                .ok_or(FramescopeError::FrameNotRead)?;
            if let Some(timestamp) = self.reconciler.observe(step.timestamps, step.completed) {
                return Ok(timestamp);
            }
        }
    }

    fn read_cached(&mut self, request: ReadRequest) {
        let index = match request {
            ReadRequest::Seek(timestamp) => self.cache.frame_number_for(timestamp),
            ReadRequest::Relative(delta) => self
                .cache
                .clamp_index((self.selection.current_frame as i64).saturating_add(delta)),
        };
        if let Some(frame) = self.cache.get(index) {
            self.selection.current_frame = index;
            self.selection.current_timestamp = frame.timestamp;
            self.displayed = Some(frame.bitmap.clone());
        }
    }

    pub(crate) fn read_decoded(&mut self, request: ReadRequest) -> Result<(), FramescopeError> {
        let (width, height) = self.decoder.source_dimensions();
        if width == 0 || height == 0 {
            return Err(FramescopeError::MemoryNotAllocated);
        }

        let average = self.info.average_timestamps_per_frame;
        let target = match request {
            ReadRequest::Seek(timestamp) => timestamp.max(0),
            ReadRequest::Relative(delta) if delta < 0 => self
                .selection
                .current_timestamp
                .saturating_add(delta.saturating_mul(average))
                .max(0),
            ReadRequest::Relative(delta) if self.decoder_on_displayed_frame() => {
                for _ in 0..delta.max(1) {
                    self.decode_until_completed()?;
                }
                return self.present_current();
            }
            ReadRequest::Relative(delta) => {
                log::debug!(
                    "decoder at {} but displayed frame is {}, seeking",
                    self.reconciler.current(),
                    self.selection.current_timestamp
                );
                self.selection
                    .current_timestamp
                    .saturating_add(delta.max(1).saturating_mul(average))
            }
        };

        let timestamps_per_second = self.info.timestamps_per_second.round() as i64;
        seek_and_correct(
            &mut self.decoder,
            &mut self.reconciler,
            timestamps_per_second,
            target,
        )?;
        while self.reconciler.current() < target {
            self.decode_until_completed()?;
        }
        self.present_current()
    }

    /// Whether stepping forward can continue from the decoder's position.
    ///
    /// Cache reads move the display without the decoder, so after analysis
    /// mode the two can disagree until the next seek.
    fn decoder_on_displayed_frame(&self) -> bool {
        self.displayed.is_none()
            || self.reconciler.last_decoded() == Some(self.selection.current_timestamp)
    }

    /// Make the picture the decoder holds the current frame.
    fn present_current(&mut self) -> Result<(), FramescopeError> {
        self.selection.current_timestamp = self.reconciler.current();
        match self.convert_with_fallback() {
            Ok(bitmap) => {
                self.displayed = Some(bitmap);
                Ok(())
            }
            Err(error) => {
                self.displayed = None;
                Err(error)
            }
        }
    }

    fn convert_current(&mut self) -> Result<Bitmap, FramescopeError> {
        let target = self.conversion_target();
        self.decoder.convert(&target)?.to_bitmap()
    }

    /// Convert the current picture; on failure with anamorphic pixels, fall
    /// back to square pixels and try once more.
    pub(crate) fn convert_with_fallback(&mut self) -> Result<Bitmap, FramescopeError> {
        match self.convert_current() {
            Ok(bitmap) => Ok(bitmap),
            Err(FramescopeError::MemoryNotAllocated) => Err(FramescopeError::MemoryNotAllocated),
            Err(error)
                if self.info.pixel_aspect_ratio != 1.0
                    && self.info.aspect_ratio != AspectRatio::ForceSquarePixels =>
            {
                log::warn!("conversion failed ({error}), retrying with square pixels");
                self.info.apply_aspect_ratio(AspectRatio::ForceSquarePixels);
                self.convert_current().map_err(|error| {
                    log::error!("conversion failed with square pixels: {error}");
                    not_converted(error)
                })
            }
            Err(error) => {
                log::error!("conversion failed: {error}");
                Err(not_converted(error))
            }
        }
    }

    pub(crate) fn import_frames(
        &mut self,
        plan: &ImportPlan,
        options: &OperationOptions,
    ) -> Result<ImportOutcome, FramescopeError> {
        let estimate = self.info.estimate_frame_count(plan.start, Some(plan.end)).max(0) as u64;
        let mut tracker = ProgressTracker::new(
            options.progress.clone(),
            OperationType::CacheLoad,
            Some(estimate),
            options.batch_size,
        );
        let (old_start, old_end) = plan.previous_bounds.unwrap_or((i64::MIN, i64::MAX));
        log::debug!(
            "importing [{}, {}] with {:?}, about {estimate} frames",
            plan.start,
            plan.end,
            plan.strategy
        );

        let timestamps_per_second = self.info.timestamps_per_second.round() as i64;
        let mut timestamp = match seek_and_correct(
            &mut self.decoder,
            &mut self.reconciler,
            timestamps_per_second,
            plan.start,
        ) {
            Ok(outcome) => outcome.first_timestamp,
            Err(FramescopeError::FrameNotRead) => return Ok(ImportOutcome::Completed),
            Err(error) => return Err(error),
        };

        let mut prepended = 0;
        loop {
            if timestamp > plan.end {
                break;
            }
            if timestamp >= plan.start {
                let bitmap = match self.convert_current() {
                    Ok(bitmap) => bitmap,
                    Err(error) => {
                        log::error!("conversion error during import at {timestamp}: {error}");
                        break;
                    }
                };
                let frame = DecodedFrame { timestamp, bitmap };

                match plan.strategy {
                    ImportStrategy::InsertionBefore if timestamp < old_start => {
                        self.cache.insert(prepended, frame);
                        prepended += 1;
                    }
                    ImportStrategy::InsertionAfter if timestamp > old_end => self.cache.push(frame),
                    ImportStrategy::Complete => self.cache.push(frame),
                    _ => log::debug!("frame {timestamp} already cached, skipping"),
                }

                tracker.advance(Some(timestamp));
                if options.is_cancelled() {
                    tracker.finish();
                    return Ok(ImportOutcome::Cancelled);
                }
                if timestamp >= plan.end {
                    break;
                }
            } else {
                log::trace!("discarding pre-roll frame {timestamp}");
            }

            timestamp = match self.decode_until_completed() {
                Ok(timestamp) => timestamp,
                Err(FramescopeError::FrameNotRead) => break,
                Err(error) => return Err(error),
            };
        }

        tracker.finish();
        Ok(ImportOutcome::Completed)
    }

    fn enter_analysis_mode(&mut self) {
        let index = self.cache.frame_number_for(self.selection.current_timestamp);
        self.selection.analysis_mode = true;
        self.selection.duration_frames = self.cache.len();
        self.selection.current_frame = index;
        if let Some(frame) = self.cache.get(index) {
            self.selection.current_timestamp = frame.timestamp;
            self.displayed = Some(frame.bitmap.clone());
        }
    }

    pub(crate) fn leave_analysis_mode(&mut self) {
        self.cache.clear();
        self.selection.analysis_mode = false;
        self.selection.duration_frames = 0;
        self.selection.current_frame = 0;
    }
}

fn not_converted(error: FramescopeError) -> FramescopeError {
    match error {
        FramescopeError::ImageNotConverted(reason) => FramescopeError::ImageNotConverted(reason),
        other => FramescopeError::ImageNotConverted(other.to_string()),
    }
}
