//! Seek with a single overshoot correction.
//!
//! Demuxer seeks are approximate: with a backward bias they usually land on
//! the key frame before the target, but broken indexes or open-GOP streams
//! can land after it. When the first picture decoded after a seek is already
//! past the target, the seek is retried once from four seconds earlier.

use crate::decoder::{SeekRequest, VideoDecoder};
use crate::error::FramescopeError;
use crate::reconcile::TimestampReconciler;

/// How far back the corrective seek goes, in seconds.
pub const CORRECTION_SECONDS: i64 = 4;

/// Result of [`seek_and_correct`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekOutcome {
    /// Reconciled timestamp of the first picture accepted after the seek.
    pub first_timestamp: i64,
    /// Number of corrective seeks issued (0 or 1).
    pub corrections: u32,
}

/// Seek near `target`, flush, and decode up to the first completed picture.
///
/// Every decode step goes through `reconciler`, so on return its current
/// timestamp is that of the picture the decoder now holds.
///
/// # Errors
///
/// [`FramescopeError::FrameNotRead`] if the stream ends before a picture
/// completes; decoder errors are propagated.
pub fn seek_and_correct<D>(
    decoder: &mut D,
    reconciler: &mut TimestampReconciler,
    timestamps_per_second: i64,
    target: i64,
) -> Result<SeekOutcome, FramescopeError>
where
    D: VideoDecoder + ?Sized,
{
    log::debug!("seeking to {target}");
    seek_and_flush(
        decoder,
        reconciler,
        SeekRequest {
            min: 0,
            target,
            max: target.saturating_add(timestamps_per_second),
        },
    );

    let mut corrections = 0;
    loop {
        let step = decoder.decode_next()?.ok_or(FramescopeError::FrameNotRead)?;
        let Some(timestamp) = reconciler.observe(step.timestamps, step.completed) else {
            continue;
        };

        if corrections == 0 && target >= 0 && timestamp > target {
            let forced =
                target.saturating_sub(timestamps_per_second.saturating_mul(CORRECTION_SECONDS));
            log::debug!(
                "seek overshot: landed at {timestamp} for target {target}, seeking back to {forced}"
            );
            corrections += 1;
            seek_and_flush(
                decoder,
                reconciler,
                SeekRequest {
                    min: forced.min(0),
                    target: forced,
                    max: forced,
                },
            );
            continue;
        }

        return Ok(SeekOutcome {
            first_timestamp: timestamp,
            corrections,
        });
    }
}

fn seek_and_flush<D>(decoder: &mut D, reconciler: &mut TimestampReconciler, request: SeekRequest)
where
    D: VideoDecoder + ?Sized,
{
    if let Err(error) = decoder.seek(request) {
        log::warn!("seek to {} failed, decoding from current position: {error}", request.target);
    }
    decoder.flush();
    reconciler.discard_pending();
}
