//! Incremental video file writer used by the export pipeline.
//!
//! [`VideoFileWriter`] opens the container and the encoder lazily when the
//! first frame arrives, so its size always matches what the session renders.
//! Frames are stamped on a millisecond clock at a fixed output interval.

use std::fs;
use std::path::{Path, PathBuf};

use ffmpeg_next::codec::Id;
use ffmpeg_next::codec::context::Context as CodecContext;
use ffmpeg_next::encoder::video::Encoder as VideoEncoder;
use ffmpeg_next::format::context::Output;
use ffmpeg_next::format::{Flags as FormatFlags, Pixel};
use ffmpeg_next::frame::Video as VideoFrame;
use ffmpeg_next::software::scaling::{Context as ScalingContext, Flags as ScalingFlags};
use ffmpeg_next::{Packet, Rational};
use image::imageops::FilterType;

use crate::bitmap::Bitmap;
use crate::error::FramescopeError;
use crate::export::FrameSink;

/// Encoder time base: one tick per millisecond.
const WRITER_TIME_BASE: Rational = Rational(1, 1000);

/// Supported output video codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoCodec {
    /// H.264 / AVC.
    H264,
    /// H.265 / HEVC.
    H265,
    /// MPEG-4 Part 2. Available in every FFmpeg build.
    #[default]
    Mpeg4,
}

impl VideoCodec {
    fn to_codec_id(self) -> Id {
        match self {
            VideoCodec::H264 => Id::H264,
            VideoCodec::H265 => Id::HEVC,
            VideoCodec::Mpeg4 => Id::MPEG4,
        }
    }
}

struct EncoderState {
    output: Output,
    encoder: VideoEncoder,
    stream_index: usize,
    stream_time_base: Rational,
    scaler: ScalingContext,
    source: VideoFrame,
    width: u32,
    height: u32,
}

/// Writes bitmaps to a video file, one [`write_frame`](FrameSink::write_frame)
/// at a time.
///
/// The container is chosen from the output extension. Metadata text goes to
/// a companion file next to the output. The encoder opens on the first frame,
/// so finishing an export that selected no frame succeeds without creating
/// the video file.
pub struct VideoFileWriter {
    path: PathBuf,
    codec: VideoCodec,
    frame_interval_ms: f64,
    companion_extension: String,
    metadata_path: Option<PathBuf>,
    state: Option<EncoderState>,
    frames_written: u64,
    finished: bool,
}

impl VideoFileWriter {
    /// Prepare a writer. Nothing touches the disk until the first frame.
    pub fn new<P: AsRef<Path>>(path: P, codec: VideoCodec, frame_interval_ms: f64) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            codec,
            frame_interval_ms: if frame_interval_ms > 0.0 {
                frame_interval_ms
            } else {
                40.0
            },
            companion_extension: "kva".to_string(),
            metadata_path: None,
            state: None,
            frames_written: 0,
            finished: false,
        }
    }

    /// Extension of the companion metadata file.
    #[must_use]
    pub fn with_companion_extension(mut self, extension: impl Into<String>) -> Self {
        self.companion_extension = extension.into();
        self
    }

    /// Output video path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Frames handed to the encoder so far.
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    fn open(&self, width: u32, height: u32) -> Result<EncoderState, FramescopeError> {
        // YUV 4:2:0 needs even dimensions.
        let width = (width + 1) & !1;
        let height = (height + 1) & !1;
        let codec_id = self.codec.to_codec_id();

        log::info!(
            "Writing {}x{} video to {:?} (codec={:?}, interval={:.2}ms)",
            width,
            height,
            self.path,
            self.codec,
            self.frame_interval_ms,
        );

        ffmpeg_next::init()
            .map_err(|e| FramescopeError::VideoWriteError(format!("FFmpeg initialisation failed: {e}")))?;
        let mut output = ffmpeg_next::format::output(&self.path)
            .map_err(|e| FramescopeError::VideoWriteError(format!("cannot open output: {e}")))?;
        let needs_global_header = output.format().flags().contains(FormatFlags::GLOBAL_HEADER);

        let encoder_codec = ffmpeg_next::encoder::find(codec_id).ok_or_else(|| {
            FramescopeError::VideoEncodeError(format!("codec {codec_id:?} not available"))
        })?;

        let mut stream = output
            .add_stream(encoder_codec)
            .map_err(|e| FramescopeError::VideoWriteError(format!("cannot add stream: {e}")))?;
        let stream_index = stream.index();

        let mut encoder = CodecContext::from_parameters(stream.parameters())
            .map_err(|e| {
                FramescopeError::VideoEncodeError(format!("cannot create codec context: {e}"))
            })?
            .encoder()
            .video()
            .map_err(|e| {
                FramescopeError::VideoEncodeError(format!("cannot open video encoder: {e}"))
            })?;

        encoder.set_width(width);
        encoder.set_height(height);
        encoder.set_format(Pixel::YUV420P);
        encoder.set_time_base(WRITER_TIME_BASE);
        encoder.set_frame_rate(Some(Rational::from(1000.0 / self.frame_interval_ms)));

        if needs_global_header {
            unsafe {
                (*encoder.as_mut_ptr()).flags |=
                    ffmpeg_sys_next::AV_CODEC_FLAG_GLOBAL_HEADER as i32;
            }
        }

        let opened = encoder
            .open_as(encoder_codec)
            .map_err(|e| FramescopeError::VideoEncodeError(format!("cannot open encoder: {e}")))?;
        stream.set_parameters(&opened);
        stream.set_time_base(WRITER_TIME_BASE);

        output
            .write_header()
            .map_err(|e| FramescopeError::VideoWriteError(format!("cannot write header: {e}")))?;

        // The muxer may have picked its own time base while writing the header.
        let stream_time_base = output
            .stream(stream_index)
            .map(|stream| stream.time_base())
            .ok_or_else(|| FramescopeError::VideoWriteError("output stream vanished".into()))?;

        let scaler = ScalingContext::get(
            Pixel::RGB24,
            width,
            height,
            Pixel::YUV420P,
            width,
            height,
            ScalingFlags::BILINEAR,
        )
        .map_err(|e| FramescopeError::VideoWriteError(format!("cannot create scaler: {e}")))?;

        Ok(EncoderState {
            output,
            encoder: opened,
            stream_index,
            stream_time_base,
            scaler,
            source: VideoFrame::new(Pixel::RGB24, width, height),
            width,
            height,
        })
    }
}

impl EncoderState {
    fn load_pixels(&mut self, bitmap: &Bitmap) -> Result<(), FramescopeError> {
        let (width, height) = (self.width, self.height);
        let rgb = if bitmap.width() != width || bitmap.height() != height {
            bitmap
                .to_image()?
                .resize_exact(width, height, FilterType::Triangle)
                .to_rgb8()
                .into_raw()
        } else {
            bitmap.to_rgb24()
        };

        let stride = self.source.stride(0);
        let row_len = width as usize * 3;
        let destination = self.source.data_mut(0);
        for y in 0..height as usize {
            let src_start = y * row_len;
            let dst_start = y * stride;
            destination[dst_start..dst_start + row_len]
                .copy_from_slice(&rgb[src_start..src_start + row_len]);
        }
        Ok(())
    }

    fn encode(&mut self, pts: i64) -> Result<(), FramescopeError> {
        let mut converted = VideoFrame::empty();
        self.scaler
            .run(&self.source, &mut converted)
            .map_err(|e| FramescopeError::VideoWriteError(format!("scaling failed: {e}")))?;
        converted.set_pts(Some(pts));

        self.encoder
            .send_frame(&converted)
            .map_err(|e| FramescopeError::VideoEncodeError(format!("send_frame failed: {e}")))?;
        self.drain_packets()
    }

    fn drain_packets(&mut self) -> Result<(), FramescopeError> {
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(WRITER_TIME_BASE, self.stream_time_base);
            packet
                .write_interleaved(&mut self.output)
                .map_err(|e| FramescopeError::VideoWriteError(format!("write packet failed: {e}")))?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), FramescopeError> {
        self.encoder
            .send_eof()
            .map_err(|e| FramescopeError::VideoEncodeError(format!("send_eof failed: {e}")))?;
        self.drain_packets()?;
        self.output
            .write_trailer()
            .map_err(|e| FramescopeError::VideoWriteError(format!("cannot write trailer: {e}")))
    }
}

impl FrameSink for VideoFileWriter {
    fn write_metadata(&mut self, text: &str) -> Result<(), FramescopeError> {
        let companion = self.path.with_extension(&self.companion_extension);
        fs::write(&companion, text)
            .map_err(|e| FramescopeError::VideoWriteError(format!("cannot write metadata: {e}")))?;
        log::debug!("metadata written to {}", companion.display());
        self.metadata_path = Some(companion);
        Ok(())
    }

    fn write_frame(&mut self, bitmap: &Bitmap) -> Result<(), FramescopeError> {
        if self.finished {
            return Err(FramescopeError::VideoWriteError("writer already finished".into()));
        }
        if self.state.is_none() {
            self.state = Some(self.open(bitmap.width(), bitmap.height())?);
        }
        let pts = (self.frames_written as f64 * self.frame_interval_ms).round() as i64;
        let Some(state) = self.state.as_mut() else {
            return Err(FramescopeError::VideoWriteError("encoder not open".into()));
        };
        state.load_pixels(bitmap)?;
        state.encode(pts)?;
        self.frames_written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), FramescopeError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        match &mut self.state {
            Some(state) => {
                state.close()?;
                log::info!("Wrote {} frames to {:?}", self.frames_written, self.path);
                Ok(())
            }
            None => {
                log::warn!("no frames written, {:?} not created", self.path);
                Ok(())
            }
        }
    }

    fn output_paths(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if self.state.is_some() {
            paths.push(self.path.clone());
        }
        paths.extend(self.metadata_path.iter().cloned());
        paths
    }
}
