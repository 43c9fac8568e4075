//! Scripted decoder shared by the session-level tests.
//!
//! The synthetic stream has one packet per picture and timestamps
//! `index * spacing`. Seeks land on the last key frame at or before the
//! target unless an overshoot is armed.
//!
//! By default packets arrive in display order and each one completes its own
//! picture. With [`ScriptedDecoder::with_reordering`] every 25-picture group
//! is closed and coded I P B B: display `0 1 2 3 4 5 6` is sent as
//! `0 3 1 2 6 4 5`, the decoder holds one picture back, and the last one
//! comes out of a drain step with no timestamps. B packets carry a DTS equal
//! to their PTS, anchors a smaller one.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use framescope::{
    AspectRatio, ConversionTarget, DecodeStep, EstimationMethod, FramescopeError, FrameView,
    PacketTimestamps, Rational, ScalingQuality, SeekRequest, VideoDecoder, VideoInfo,
};

pub const TIMESTAMPS_PER_SECOND: i64 = 1000;
pub const SPACING: i64 = 40;
pub const KEYFRAME_INTERVAL: usize = 25;

/// What the decoder was asked to do, inspectable after the session took ownership.
#[derive(Debug, Default)]
pub struct DecoderLog {
    pub packets: usize,
    pub seeks: Vec<SeekRequest>,
    pub flushes: usize,
}

pub struct ScriptedDecoder {
    timestamps: Vec<i64>,
    decode_order: Vec<usize>,
    reordering: bool,
    missing_b_pts: bool,
    held: BTreeSet<usize>,
    position: usize,
    current: Option<usize>,
    width: u32,
    height: u32,
    overshoots: usize,
    fail_height: Option<u32>,
    fail_frame: Option<usize>,
    metadata: Option<String>,
    buffer: Vec<u8>,
    log: Rc<RefCell<DecoderLog>>,
}

impl ScriptedDecoder {
    pub fn new(frame_count: usize) -> Self {
        Self {
            timestamps: (0..frame_count as i64).map(|index| index * SPACING).collect(),
            decode_order: (0..frame_count).collect(),
            reordering: false,
            missing_b_pts: false,
            held: BTreeSet::new(),
            position: 0,
            current: None,
            width: 64,
            height: 48,
            overshoots: 0,
            fail_height: None,
            fail_frame: None,
            metadata: None,
            buffer: Vec::new(),
            log: Rc::new(RefCell::new(DecoderLog::default())),
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// The next `count` seeks land on the key frame after the target.
    pub fn with_overshoots(mut self, count: usize) -> Self {
        self.overshoots = count;
        self
    }

    /// Conversions to this output height fail.
    pub fn failing_at_height(mut self, height: u32) -> Self {
        self.fail_height = Some(height);
        self
    }

    /// Send each key-frame group in I P B B order with a one-picture delay.
    ///
    /// `frame_count` should be a multiple of the key-frame interval so that
    /// every group is complete.
    pub fn with_reordering(mut self) -> Self {
        self.reordering = true;
        self.decode_order = (0..self.timestamps.len())
            .step_by(KEYFRAME_INTERVAL)
            .flat_map(|start| {
                let end = (start + KEYFRAME_INTERVAL).min(self.timestamps.len());
                std::iter::once(start).chain(
                    (start + 3..end)
                        .step_by(3)
                        .flat_map(|anchor| [anchor, anchor - 2, anchor - 1]),
                )
            })
            .collect();
        self
    }

    /// B packets carry only a DTS.
    pub fn with_missing_b_pts(mut self) -> Self {
        self.missing_b_pts = true;
        self
    }

    /// Converting this picture fails.
    pub fn failing_at_frame(mut self, index: usize) -> Self {
        self.fail_frame = Some(index);
        self
    }

    pub fn with_metadata(mut self, text: &str) -> Self {
        self.metadata = Some(text.to_string());
        self
    }

    pub fn log(&self) -> Rc<RefCell<DecoderLog>> {
        Rc::clone(&self.log)
    }

    /// Matching video information: 25 fps on a millisecond clock.
    pub fn info(&self) -> VideoInfo {
        let mut info = VideoInfo {
            file_size: 0,
            container_format: "scripted".to_string(),
            codec_name: "scripted".to_string(),
            width: self.width,
            height: self.height,
            decoding_width: 0,
            decoding_height: 0,
            pixel_aspect_ratio: 1.0,
            sample_aspect_ratio: Rational::new(1, 1),
            frames_per_second: 25.0,
            frame_rate_reliable: true,
            frame_rate_method: EstimationMethod::AverageFrameRate,
            frame_interval_ms: 40.0,
            duration_timestamps: self.timestamps.len() as i64 * SPACING,
            first_timestamp: 0,
            timestamps_per_second: TIMESTAMPS_PER_SECOND as f64,
            average_timestamps_per_frame: SPACING,
            deinterlace: false,
            is_mpeg2: false,
            scaling_quality: ScalingQuality::Bilinear,
            aspect_ratio: AspectRatio::AutoDetect,
        };
        info.apply_aspect_ratio(AspectRatio::AutoDetect);
        info
    }

    fn keyframe_at_or_before(&self, target: i64) -> usize {
        let last = self
            .timestamps
            .iter()
            .rposition(|&timestamp| timestamp <= target)
            .unwrap_or(0);
        last - last % KEYFRAME_INTERVAL
    }
}

    fn is_b_picture(index: usize) -> bool {
        (index % KEYFRAME_INTERVAL) % 3 != 0
    }

    fn packet_timestamps(&self, position: usize, index: usize) -> PacketTimestamps {
        let pts = self.timestamps[index];
        if !self.reordering {
            return PacketTimestamps::new(pts, pts);
        }
        let dts = (position as i64 - 1) * SPACING;
        if self.missing_b_pts && Self::is_b_picture(index) {
            PacketTimestamps::dts_only(dts)
        } else {
            PacketTimestamps::new(dts, pts)
        }
    }

    /// Release the earliest held picture.
    fn output(&mut self) -> Option<usize> {
        let index = self.held.pop_first()?;
        self.current = Some(index);
        Some(index)
    }
}

impl VideoDecoder for ScriptedDecoder {
    fn decode_next(&mut self) -> Result<Option<DecodeStep>, FramescopeError> {
        let delay = usize::from(self.reordering);
        let Some(&index) = self.decode_order.get(self.position) else {
            // Drain whatever the decoder still holds.
            return Ok(self
                .output()
                .map(|_| DecodeStep::completed(PacketTimestamps::none())));
        };

        let timestamps = self.packet_timestamps(self.position, index);
        self.position += 1;
        self.log.borrow_mut().packets += 1;
        self.held.insert(index);
        if self.held.len() > delay {
            self.output();
            Ok(Some(DecodeStep::completed(timestamps)))
        } else {
            Ok(Some(DecodeStep::buffering(timestamps)))
        }
    }

    fn seek(&mut self, request: SeekRequest) -> Result<(), FramescopeError> {
        self.log.borrow_mut().seeks.push(request);
        let mut index = self.keyframe_at_or_before(request.target);
        if self.overshoots > 0 && index + KEYFRAME_INTERVAL < self.timestamps.len() {
            self.overshoots -= 1;
            index += KEYFRAME_INTERVAL;
        }
        self.position = index;
        self.current = None;
        self.held.clear();
        Ok(())
    }

    fn flush(&mut self) {
        self.log.borrow_mut().flushes += 1;
        self.held.clear();
    }

    fn source_dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn convert(&mut self, target: &ConversionTarget) -> Result<FrameView<'_>, FramescopeError> {
        let index = self
            .current
            .ok_or_else(|| FramescopeError::ImageNotConverted("nothing decoded".into()))?;
        if self.fail_frame == Some(index) {
            return Err(FramescopeError::ImageNotConverted(format!(
                "picture {index} is corrupt"
            )));
        }
        if self.fail_height == Some(target.height) {
            return Err(FramescopeError::ImageNotConverted(format!(
                "cannot scale to height {}",
                target.height
            )));
        }
        let stride = target.width as usize * target.format.bytes_per_pixel();
        self.buffer.clear();
        self.buffer
            .resize(stride * target.height as usize, (index % 256) as u8);
        Ok(FrameView {
            width: target.width,
            height: target.height,
            stride,
            format: target.format,
            data: &self.buffer,
        })
    }

    fn read_embedded_metadata(&mut self) -> Result<Option<String>, FramescopeError> {
        Ok(self.metadata.clone())
    }
}

/// A session over a scripted stream of `frame_count` pictures.
pub fn scripted_session(
    decoder: ScriptedDecoder,
) -> (framescope::VideoSession<ScriptedDecoder>, Rc<RefCell<DecoderLog>>) {
    let log = decoder.log();
    let info = decoder.info();
    let mut session = framescope::VideoSession::new(framescope::SessionOptions::default());
    session.load_with(decoder, info);
    (session, log)
}
