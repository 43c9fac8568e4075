//! In-memory frame cache for analysis mode.
//!
//! A selection of the video is decoded once into owned bitmaps so that
//! scrubbing through it never touches the decoder again. When the selection
//! changes, [`plan_import`] works out the cheapest way to get from the old
//! cache to the new one: trim it, extend it on one side, or start over.

use crate::bitmap::Bitmap;

/// One decoded, owned frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    /// Reconciled timestamp of the picture.
    pub timestamp: i64,
    /// Converted pixels.
    pub bitmap: Bitmap,
}

/// Ordered frames with strictly increasing timestamps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameCache {
    frames: Vec<DecodedFrame>,
}

impl FrameCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether the cache holds no frame.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// All frames in timestamp order.
    pub fn frames(&self) -> &[DecodedFrame] {
        &self.frames
    }

    /// Frame at `index`.
    pub fn get(&self, index: usize) -> Option<&DecodedFrame> {
        self.frames.get(index)
    }

    /// Timestamp of the first frame.
    pub fn first_timestamp(&self) -> Option<i64> {
        self.frames.first().map(|frame| frame.timestamp)
    }

    /// Timestamp of the last frame.
    pub fn last_timestamp(&self) -> Option<i64> {
        self.frames.last().map(|frame| frame.timestamp)
    }

    /// Index of the first frame at or after `timestamp`, clamped to the last frame.
    ///
    /// Returns 0 for an empty cache.
    pub fn frame_number_for(&self, timestamp: i64) -> usize {
        let index = self.frames.partition_point(|frame| frame.timestamp < timestamp);
        index.min(self.frames.len().saturating_sub(1))
    }

    /// Clamp a frame index into the cache.
    pub fn clamp_index(&self, index: i64) -> usize {
        let last = self.frames.len().saturating_sub(1) as i64;
        index.clamp(0, last) as usize
    }

    pub(crate) fn push(&mut self, frame: DecodedFrame) {
        self.frames.push(frame);
    }

    pub(crate) fn insert(&mut self, index: usize, frame: DecodedFrame) {
        let index = index.min(self.frames.len());
        self.frames.insert(index, frame);
    }

    /// Drop frames after `end`. Returns how many were removed.
    pub(crate) fn trim_after(&mut self, end: i64) -> usize {
        let keep = self.frames.partition_point(|frame| frame.timestamp <= end);
        let removed = self.frames.len() - keep;
        self.frames.truncate(keep);
        removed
    }

    /// Drop frames before `start`. Returns how many were removed.
    pub(crate) fn trim_before(&mut self, start: i64) -> usize {
        let drop = self.frames.partition_point(|frame| frame.timestamp < start);
        self.frames.drain(..drop);
        drop
    }

    pub(crate) fn clear(&mut self) {
        self.frames.clear();
    }

    /// Total pixel bytes held by the cache.
    pub fn byte_size(&self) -> usize {
        self.frames.iter().map(|frame| frame.bitmap.data().len()).sum()
    }
}

/// How a new selection is obtained from the existing cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStrategy {
    /// Discard the cache and decode the whole selection.
    Complete,
    /// The trimmed cache already covers the selection; nothing to decode.
    Reduction,
    /// Decode frames before the cached ones and prepend them.
    InsertionBefore,
    /// Decode frames after the cached ones and append them.
    InsertionAfter,
}

/// Output of [`plan_import`]: what to decode, and how to merge it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportPlan {
    /// Chosen strategy.
    pub strategy: ImportStrategy,
    /// Start of the range to decode.
    pub start: i64,
    /// End of the range to decode.
    pub end: i64,
    /// First and last cached timestamps before any trimming, when the cache was reused.
    pub previous_bounds: Option<(i64, i64)>,
}

impl ImportPlan {
    fn complete(start: i64, end: i64) -> Self {
        Self {
            strategy: ImportStrategy::Complete,
            start,
            end,
            previous_bounds: None,
        }
    }

    /// Whether executing the plan needs the decoder.
    pub fn needs_decoding(&self) -> bool {
        self.strategy != ImportStrategy::Reduction
    }
}

/// Decide how to load `[start, end]` given the current cache.
///
/// Frames outside the new range are trimmed first, then at most one
/// expansion direction is chosen, compared against the bounds the cache had
/// before trimming: after if `end` reaches at least one frame past the old
/// end, otherwise before if `start` reaches at least one frame before the
/// old start. Expanding on both sides at once is not supported; a second
/// call picks up the other side.
///
/// The cache is cleared for a complete reload, including when trimming
/// leaves nothing to build on.
pub fn plan_import(
    cache: &mut FrameCache,
    reuse_cache: bool,
    start: i64,
    end: i64,
    average_timestamps_per_frame: i64,
) -> ImportPlan {
    let bounds = cache.first_timestamp().zip(cache.last_timestamp());
    let Some((old_start, old_end)) = bounds.filter(|_| reuse_cache) else {
        cache.clear();
        log::debug!("preparing complete import of [{start}, {end}]");
        return ImportPlan::complete(start, end);
    };

    log::debug!(
        "preparing import: cached [{old_start}, {old_end}], requested [{start}, {end}]"
    );

    if end < old_end {
        let removed = cache.trim_after(end);
        log::debug!("trimmed {removed} frames after {end}");
    }
    if start > old_start {
        let removed = cache.trim_before(start);
        log::debug!("trimmed {removed} frames before {start}");
    }

    if cache.is_empty() {
        log::debug!("requested range does not overlap the cache, reloading");
        return ImportPlan::complete(start, end);
    }

    let plan = |strategy, start, end| ImportPlan {
        strategy,
        start,
        end,
        previous_bounds: Some((old_start, old_end)),
    };

    if end >= old_end.saturating_add(average_timestamps_per_frame) {
        log::debug!("frames will be appended after {old_end}");
        plan(ImportStrategy::InsertionAfter, old_end, end)
    } else if start <= old_start.saturating_sub(average_timestamps_per_frame) {
        log::debug!("frames will be prepended before {old_start}");
        plan(ImportStrategy::InsertionBefore, start, old_start)
    } else {
        plan(ImportStrategy::Reduction, start, end)
    }
}
