//! Progress reporting and cancellation support.
//!
//! Long operations ([`VideoSession::extract_to_memory`](crate::VideoSession::extract_to_memory)
//! and [`VideoSession::save`](crate::VideoSession::save)) report their progress
//! through a [`ProgressCallback`] and poll a [`CancellationToken`] once per
//! frame. Both travel inside [`OperationOptions`](crate::OperationOptions).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use framescope::{
//!     FramescopeError, OperationOptions, ProgressCallback, ProgressInfo, VideoSession,
//! };
//!
//! struct PrintProgress;
//!
//! impl ProgressCallback for PrintProgress {
//!     fn on_progress(&self, info: &ProgressInfo) {
//!         if let Some(pct) = info.percentage {
//!             println!("[{:?}] {pct:.1}% complete", info.operation);
//!         }
//!     }
//! }
//!
//! let mut session = VideoSession::open("input.mp4")?;
//! let options = OperationOptions::new().with_progress(Arc::new(PrintProgress));
//! let end = session.info()?.duration_timestamps / 2;
//! session.extract_to_memory(0, end, false, &options)?;
//! # Ok::<(), FramescopeError>(())
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::{Duration, Instant};

/// The kind of operation currently in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum OperationType {
    /// Decoding a range of frames into the in-memory cache.
    CacheLoad,
    /// Re-encoding a range of frames into an output file.
    Export,
}

/// A snapshot of operation progress.
///
/// Delivered to [`ProgressCallback::on_progress`] at a cadence controlled
/// by [`OperationOptions::with_batch_size`](crate::OperationOptions::with_batch_size).
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// What kind of work is being performed.
    pub operation: OperationType,
    /// How much work has been done so far (frames, or timestamps for linear export).
    pub current: u64,
    /// Total work expected, if known ahead of time. This is an estimate
    /// for cache loads and may be exceeded.
    pub total: Option<u64>,
    /// Completion percentage (0.0 – 100.0), if `total` is known.
    pub percentage: Option<f32>,
    /// Wall-clock time elapsed since the operation started.
    pub elapsed: Duration,
    /// Estimated time remaining, based on current throughput.
    pub estimated_remaining: Option<Duration>,
    /// Native timestamp of the frame that was just processed.
    pub current_timestamp: Option<i64>,
}

/// Trait for receiving progress updates during long operations.
///
/// Implementations must be [`Send`] and [`Sync`] so a UI thread can own the
/// callback while a worker thread drives the session.
///
/// Progress callbacks are **infallible**. They observe but cannot halt
/// the operation; use [`CancellationToken`] for cooperative cancellation.
pub trait ProgressCallback: Send + Sync {
    /// Called at regular intervals during an operation.
    fn on_progress(&self, info: &ProgressInfo);
}

/// A no-op implementation that discards all progress notifications.
///
/// This is the default when no callback is configured.
pub(crate) struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_progress(&self, _info: &ProgressInfo) {}
}

/// Cooperative cancellation token backed by an [`AtomicBool`].
///
/// Clone this token and share it between threads; call [`cancel`](CancellationToken::cancel)
/// from any thread to request cancellation. The cache loader and the export
/// loop check [`is_cancelled`](CancellationToken::is_cancelled) after each frame.
///
/// # Example
///
/// ```
/// use framescope::CancellationToken;
///
/// let token = CancellationToken::new();
/// assert!(!token.is_cancelled());
///
/// token.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new, non-cancelled token.
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation.
    ///
    /// All clones of this token will observe the cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Internal helper that tracks progress timing and emits callbacks.
pub(crate) struct ProgressTracker {
    callback: Arc<dyn ProgressCallback>,
    operation: OperationType,
    total: Option<u64>,
    current: u64,
    batch_size: u64,
    start_time: Instant,
    updates_since_last_report: u64,
}

impl ProgressTracker {
    pub(crate) fn new(
        callback: Arc<dyn ProgressCallback>,
        operation: OperationType,
        total: Option<u64>,
        batch_size: u64,
    ) -> Self {
        Self {
            callback,
            operation,
            total,
            current: 0,
            batch_size: batch_size.max(1),
            start_time: Instant::now(),
            updates_since_last_report: 0,
        }
    }

    /// Record one completed frame and fire the callback if the batch
    /// threshold is reached.
    pub(crate) fn advance(&mut self, timestamp: Option<i64>) {
        let next = self.current + 1;
        self.update(next, timestamp);
    }

    /// Set the absolute amount of work done and fire the callback if the
    /// batch threshold is reached.
    pub(crate) fn update(&mut self, current: u64, timestamp: Option<i64>) {
        self.current = current;
        self.updates_since_last_report += 1;

        if self.updates_since_last_report >= self.batch_size {
            self.report(timestamp);
            self.updates_since_last_report = 0;
        }
    }

    /// Unconditionally emit a final progress report.
    pub(crate) fn finish(&mut self) {
        self.report(None);
    }

    fn report(&self, timestamp: Option<i64>) {
        let elapsed = self.start_time.elapsed();

        let percentage = self
            .total
            .filter(|&t| t > 0)
            .map(|t| ((self.current as f32 / t as f32) * 100.0).min(100.0));

        let estimated_remaining = if self.current > 0 {
            self.total.map(|t| {
                let remaining = t.saturating_sub(self.current);
                elapsed.mul_f64(remaining as f64 / self.current as f64)
            })
        } else {
            None
        };

        let info = ProgressInfo {
            operation: self.operation,
            current: self.current,
            total: self.total,
            percentage,
            elapsed,
            estimated_remaining,
            current_timestamp: timestamp,
        };

        self.callback.on_progress(&info);
    }
}
