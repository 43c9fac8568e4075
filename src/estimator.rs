//! Frame-rate, duration and pixel-aspect estimation.
//!
//! Container and codec metadata disagree or lie often enough that no single
//! field can be trusted for the frame rate. [`estimate_frame_rate`] walks a
//! fixed chain of sources and reports which one it settled on, together with
//! whether the result should be trusted for frame-exact arithmetic.

use ffmpeg_next::Rational;

/// Microseconds per second, the unit of container durations and start times.
pub const TIME_BASE_MICROS: i64 = 1_000_000;

/// Frame rate used when no source gives a plausible value.
pub const FALLBACK_FRAMES_PER_SECOND: f64 = 25.0;

/// Inverted time bases at or above this value describe timestamp units, not frame rates.
const TIME_BASE_RATE_CEILING: f64 = 1000.0;

/// Which rule of the estimation chain produced the frame rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimationMethod {
    /// The demuxer's own average frame rate.
    AverageFrameRate,
    /// Frame count divided by container duration.
    FrameCountOverDuration,
    /// Inverted stream time base.
    StreamTimeBase,
    /// Inverted codec time base.
    CodecTimeBase,
    /// A 30000 or 25000 time base recognised as an NTSC-style rate.
    NtscSpecialCase,
    /// Nothing usable; forced to 25 fps.
    Fallback,
}

/// Raw values gathered from the container and codec for the estimation chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRateEvidence {
    /// Average frame rate reported by the demuxer (`0/0` when unknown).
    pub average_frame_rate: Rational,
    /// Number of frames reported by the stream header, `0` when unknown.
    pub stream_frame_count: i64,
    /// Container duration in microseconds, `0` or negative when unknown.
    pub container_duration_micros: i64,
    /// Time base of the video stream.
    pub stream_time_base: Rational,
    /// Time base of the codec context.
    pub codec_time_base: Rational,
    /// Codec ticks per frame (2 for field-based codecs).
    pub ticks_per_frame: i32,
}

impl Default for FrameRateEvidence {
    fn default() -> Self {
        Self {
            average_frame_rate: Rational::new(0, 0),
            stream_frame_count: 0,
            container_duration_micros: 0,
            stream_time_base: Rational::new(0, 0),
            codec_time_base: Rational::new(0, 0),
            ticks_per_frame: 1,
        }
    }
}

/// Result of [`estimate_frame_rate`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameRateEstimate {
    /// Frames per second.
    pub frames_per_second: f64,
    /// `false` only when the fallback rate was forced.
    pub reliable: bool,
    /// The rule that produced the value.
    pub method: EstimationMethod,
}

fn is_well_formed(rational: Rational) -> bool {
    rational.numerator() != 0 && rational.denominator() != 0
}

/// `den / num` of a time base, i.e. the number of ticks per second.
fn inverted(rational: Rational) -> Option<f64> {
    is_well_formed(rational)
        .then(|| rational.denominator() as f64 / rational.numerator() as f64)
}

fn per_tick(value: f64, ticks_per_frame: i32) -> f64 {
    if ticks_per_frame > 1 {
        value / ticks_per_frame as f64
    } else {
        value
    }
}

/// Walk the estimation chain and return the first rule that fires.
///
/// The order is: demuxer average rate, frame count over duration, stream
/// time base, codec time base, the 30000/25000 special cases, then 25 fps.
/// Only the last rule yields an unreliable estimate.
pub fn estimate_frame_rate(evidence: &FrameRateEvidence) -> FrameRateEstimate {
    let reliable = |frames_per_second, method| FrameRateEstimate {
        frames_per_second,
        reliable: true,
        method,
    };

    if is_well_formed(evidence.average_frame_rate) {
        let rate = f64::from(evidence.average_frame_rate);
        if rate > 0.0 {
            log::debug!("frame rate from demuxer average: {rate}");
            return reliable(rate, EstimationMethod::AverageFrameRate);
        }
    }

    if evidence.stream_frame_count > 0 && evidence.container_duration_micros > 0 {
        let rate = evidence.stream_frame_count as f64 * TIME_BASE_MICROS as f64
            / evidence.container_duration_micros as f64;
        let rate = per_tick(rate, evidence.ticks_per_frame);
        log::debug!("frame rate from frame count and duration: {rate}");
        return reliable(rate, EstimationMethod::FrameCountOverDuration);
    }

    let stream_rate = inverted(evidence.stream_time_base);
    if let Some(rate) = stream_rate.filter(|&rate| rate < TIME_BASE_RATE_CEILING) {
        let rate = per_tick(rate, evidence.ticks_per_frame);
        log::debug!("frame rate from stream time base: {rate}");
        return reliable(rate, EstimationMethod::StreamTimeBase);
    }

    let codec_rate = inverted(evidence.codec_time_base);
    if let Some(rate) = codec_rate.filter(|&rate| rate < TIME_BASE_RATE_CEILING) {
        let rate = per_tick(rate, evidence.ticks_per_frame);
        log::debug!("frame rate from codec time base: {rate}");
        return reliable(rate, EstimationMethod::CodecTimeBase);
    }

    match codec_rate.or(stream_rate) {
        Some(rate) if rate == 30000.0 => {
            log::debug!("frame rate special case 30000:1, using 29.97");
            reliable(29.97, EstimationMethod::NtscSpecialCase)
        }
        Some(rate) if rate == 25000.0 => {
            log::debug!("frame rate special case 25000:1, using 24.975");
            reliable(24.975, EstimationMethod::NtscSpecialCase)
        }
        _ => {
            log::warn!(
                "frame rate could not be estimated, forcing {FALLBACK_FRAMES_PER_SECOND} fps"
            );
            FrameRateEstimate {
                frames_per_second: FALLBACK_FRAMES_PER_SECOND,
                reliable: false,
                method: EstimationMethod::Fallback,
            }
        }
    }
}

/// Native timestamps per second for a stream time base.
///
/// Returns `None` for a malformed time base.
pub fn timestamps_per_second(stream_time_base: Rational) -> Option<f64> {
    inverted(stream_time_base)
}

/// Average number of native timestamps between two frames.
pub fn average_timestamps_per_frame(timestamps_per_second: f64, frames_per_second: f64) -> i64 {
    if frames_per_second <= 0.0 {
        return 0;
    }
    (timestamps_per_second / frames_per_second).round() as i64
}

/// Container duration converted to native timestamps, `0` when unknown.
pub fn duration_in_timestamps(container_duration_micros: i64, timestamps_per_second: f64) -> i64 {
    if container_duration_micros <= 0 {
        return 0;
    }
    (container_duration_micros as f64 / TIME_BASE_MICROS as f64 * timestamps_per_second) as i64
}

/// Container start time converted to native timestamps, `0` when not positive.
pub fn first_timestamp(container_start_micros: i64, timestamps_per_second: f64) -> i64 {
    if container_start_micros <= 0 {
        return 0;
    }
    (container_start_micros as f64 / TIME_BASE_MICROS as f64 * timestamps_per_second) as i64
}

/// Pixel aspect ratio from the sample aspect ratio field.
///
/// MPEG-2 streams store the display aspect ratio in that field, so the pixel
/// ratio is derived from the frame size, falling back to the raw ratio when
/// the derived one would be narrower than square.
pub fn pixel_aspect_ratio(sample_aspect_ratio: Rational, width: u32, height: u32, is_mpeg2: bool) -> f64 {
    let numerator = sample_aspect_ratio.numerator();
    let denominator = sample_aspect_ratio.denominator();
    if numerator == 0 || denominator == 0 || numerator == denominator {
        return 1.0;
    }

    let ratio = numerator as f64 / denominator as f64;
    if !is_mpeg2 || width == 0 {
        return ratio;
    }

    let derived = height as f64 * ratio / width as f64;
    if derived < 1.0 {
        ratio
    } else {
        derived
    }
}
