//! Per-file video information.
//!
//! [`VideoInfo`] is filled once at load time from the stream selector and the
//! estimator, and afterwards only changes through explicit requests to switch
//! the aspect-ratio policy or the deinterlace flag.

use std::time::Duration;

use ffmpeg_next::Rational;

use crate::configuration::{AspectRatio, ScalingQuality};
use crate::estimator::EstimationMethod;

/// Everything the session knows about the loaded video stream.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    /// Size of the media file in bytes.
    pub file_size: u64,
    /// Container format short name (e.g. `"mov,mp4,m4a,3gp,3g2,mj2"`).
    pub container_format: String,
    /// Decoder name (e.g. `"h264"`).
    pub codec_name: String,
    /// Native picture width in pixels.
    pub width: u32,
    /// Native picture height in pixels.
    pub height: u32,
    /// Width of display bitmaps, always a multiple of 4.
    pub decoding_width: u32,
    /// Height of display bitmaps, derived from the active aspect-ratio policy.
    pub decoding_height: u32,
    /// Pixel aspect ratio (1.0 for square pixels).
    pub pixel_aspect_ratio: f64,
    /// Sample aspect ratio as stored in the file.
    pub sample_aspect_ratio: Rational,
    /// Estimated frames per second.
    pub frames_per_second: f64,
    /// Whether the frame rate came from a trustworthy source.
    pub frame_rate_reliable: bool,
    /// Which estimation rule produced the frame rate.
    pub frame_rate_method: EstimationMethod,
    /// Interval between two frames in milliseconds.
    pub frame_interval_ms: f64,
    /// Playable duration in native timestamps.
    pub duration_timestamps: i64,
    /// Timestamp of the first frame.
    pub first_timestamp: i64,
    /// Native timestamps per second.
    pub timestamps_per_second: f64,
    /// Average native timestamps between two frames.
    pub average_timestamps_per_frame: i64,
    /// Whether decoded pictures are deinterlaced before rescaling.
    pub deinterlace: bool,
    /// Whether the stream is MPEG-2 video.
    pub is_mpeg2: bool,
    /// Interpolation used when rescaling.
    pub scaling_quality: ScalingQuality,
    /// Active aspect-ratio policy.
    pub aspect_ratio: AspectRatio,
}

impl VideoInfo {
    /// Width rounded up to the next multiple of 4.
    pub fn decoding_width_for(width: u32) -> u32 {
        width.div_ceil(4) * 4
    }

    /// Display height for a decoding width under a given policy.
    pub fn decoding_height_for(
        policy: AspectRatio,
        decoding_width: u32,
        height: u32,
        pixel_aspect_ratio: f64,
    ) -> u32 {
        match policy {
            AspectRatio::Force4x3 => decoding_width * 3 / 4,
            AspectRatio::Force16x9 => decoding_width * 9 / 16,
            AspectRatio::ForceSquarePixels => height,
            AspectRatio::AutoDetect => {
                if pixel_aspect_ratio > 0.0 {
                    (height as f64 / pixel_aspect_ratio) as u32
                } else {
                    height
                }
            }
        }
    }

    /// Switch the aspect-ratio policy and recompute the decoding size.
    pub fn apply_aspect_ratio(&mut self, policy: AspectRatio) {
        self.aspect_ratio = policy;
        self.decoding_width = Self::decoding_width_for(self.width);
        self.decoding_height = Self::decoding_height_for(
            policy,
            self.decoding_width,
            self.height,
            self.pixel_aspect_ratio,
        );
        log::debug!(
            "image geometry {:?}: {}x{} -> {}x{}",
            policy,
            self.width,
            self.height,
            self.decoding_width,
            self.decoding_height
        );
    }

    /// Seconds covered by a number of native timestamps.
    pub fn timestamps_to_seconds(&self, timestamps: i64) -> f64 {
        if self.timestamps_per_second <= 0.0 {
            return 0.0;
        }
        timestamps as f64 / self.timestamps_per_second
    }

    /// Native timestamps covering a duration.
    pub fn duration_to_timestamps(&self, duration: Duration) -> i64 {
        (duration.as_secs_f64() * self.timestamps_per_second).round() as i64
    }

    /// Playable duration.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.timestamps_to_seconds(self.duration_timestamps).max(0.0))
    }

    /// Approximate number of frames between `start` and `end`.
    ///
    /// `None` for `end` means "until the end of the stream".
    pub fn estimate_frame_count(&self, start: i64, end: Option<i64>) -> i64 {
        if self.average_timestamps_per_frame <= 0 {
            return 0;
        }
        let span = match end {
            Some(end) => end.saturating_sub(start),
            None => self.duration_timestamps.saturating_sub(start),
        };
        (span / self.average_timestamps_per_frame).max(0)
    }
}
