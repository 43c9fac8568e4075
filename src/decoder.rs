//! The decoding backend seen by a session.
//!
//! [`VideoDecoder`] is the narrow surface the session logic needs from a
//! demuxer/decoder pair: step the decoder one packet at a time, seek, flush,
//! and convert the last completed picture. [`FfmpegDecoder`](crate::FfmpegDecoder)
//! is the real implementation; tests drive the session with scripted ones.

use crate::bitmap::FrameView;
use crate::configuration::{PixelFormat, ScalingQuality};
use crate::error::FramescopeError;
use crate::reconcile::PacketTimestamps;

/// Outcome of feeding one packet of the selected stream to the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeStep {
    /// Timestamps of the packet that was fed.
    pub timestamps: PacketTimestamps,
    /// Whether a picture came out of the decoder.
    pub completed: bool,
}

impl DecodeStep {
    /// A step that produced a picture.
    pub fn completed(timestamps: PacketTimestamps) -> Self {
        Self {
            timestamps,
            completed: true,
        }
    }

    /// A step where the decoder kept the packet buffered.
    pub fn buffering(timestamps: PacketTimestamps) -> Self {
        Self {
            timestamps,
            completed: false,
        }
    }
}

/// A backward-biased seek in native timestamps.
///
/// The demuxer lands on a key frame in `[min, max]`, preferring the closest
/// one at or before `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekRequest {
    /// Lowest acceptable position.
    pub min: i64,
    /// Desired position.
    pub target: i64,
    /// Highest acceptable position.
    pub max: i64,
}

/// Size, layout and filtering for converting a decoded picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionTarget {
    /// Output width.
    pub width: u32,
    /// Output height.
    pub height: u32,
    /// Output pixel format.
    pub format: PixelFormat,
    /// Interpolation.
    pub quality: ScalingQuality,
    /// Deinterlace at native size before rescaling.
    pub deinterlace: bool,
}

/// A demuxer/decoder pair bound to one video stream.
pub trait VideoDecoder {
    /// Read the next packet of the video stream and feed it to the decoder.
    ///
    /// Returns `Ok(None)` once the stream is exhausted and every buffered
    /// picture has been delivered.
    fn decode_next(&mut self) -> Result<Option<DecodeStep>, FramescopeError>;

    /// Reposition the demuxer.
    fn seek(&mut self, request: SeekRequest) -> Result<(), FramescopeError>;

    /// Drop every picture and packet held inside the decoder.
    fn flush(&mut self);

    /// Native size of decoded pictures.
    fn source_dimensions(&self) -> (u32, u32);

    /// Convert the most recently completed picture.
    ///
    /// The view borrows a buffer that the next call overwrites. A failed
    /// deinterlace falls back to the interlaced picture; a failed rescale is
    /// an error.
    fn convert(&mut self, target: &ConversionTarget) -> Result<FrameView<'_>, FramescopeError>;

    /// Text of the embedded metadata stream, if the file has one.
    ///
    /// Implementations must leave the demuxer positioned at the start of the
    /// stream.
    fn read_embedded_metadata(&mut self) -> Result<Option<String>, FramescopeError> {
        Ok(None)
    }
}
