//! FFmpeg-backed [`VideoDecoder`].
//!
//! Opening a file runs the whole load sequence: probe the container, pick
//! the video stream with the most frames, find and open its decoder, and
//! estimate frame rate, duration and pixel aspect ratio. Decoding then
//! proceeds one packet per [`VideoDecoder::decode_next`] call so that the
//! session sees exactly which packet completed which picture.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use ffmpeg_next::codec::Id;
use ffmpeg_next::codec::context::Context as CodecContext;
use ffmpeg_next::decoder::Video as VideoStreamDecoder;
use ffmpeg_next::filter::Graph as FilterGraph;
use ffmpeg_next::format::context::Input;
use ffmpeg_next::format::Pixel;
use ffmpeg_next::frame::Video as VideoFrame;
use ffmpeg_next::media::Type;
use ffmpeg_next::software::scaling::{Context as ScalingContext, Flags as ScalingFlags};
use ffmpeg_next::{Error as FfmpegError, Packet, Rational};
use ffmpeg_sys_next::{AVPixelFormat, AVSEEK_FLAG_BACKWARD};

use crate::bitmap::FrameView;
use crate::configuration::SessionOptions;
use crate::decoder::{ConversionTarget, DecodeStep, SeekRequest, VideoDecoder};
use crate::error::FramescopeError;
use crate::estimator::{
    self, FrameRateEvidence, average_timestamps_per_frame, duration_in_timestamps,
    estimate_frame_rate, first_timestamp, pixel_aspect_ratio,
};
use crate::metadata::VideoInfo;
use crate::reconcile::PacketTimestamps;
use crate::selector::{self, MediaKind, StreamDescriptor};

/// Decoder for the main video stream of a media file.
pub struct FfmpegDecoder {
    input: Input,
    decoder: VideoStreamDecoder,
    stream_index: usize,
    metadata_stream_index: Option<usize>,
    first_timestamp: i64,
    picture: VideoFrame,
    incoming: VideoFrame,
    converted: VideoFrame,
    scaler: Option<(ScalerKey, ScalingContext)>,
    end_of_stream: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ScalerKey {
    source_format: Pixel,
    source_width: u32,
    source_height: u32,
    target_format: Pixel,
    target_width: u32,
    target_height: u32,
    flags: ScalingFlags,
}

impl FfmpegDecoder {
    /// Open `path` and prepare its main video stream for decoding.
    ///
    /// # Errors
    ///
    /// - [`FramescopeError::FileNotOpened`] if the file cannot be opened or probed.
    /// - [`FramescopeError::StreamInfoNotFound`] if the time base or duration is unusable.
    /// - [`FramescopeError::VideoStreamNotFound`] if there is no video stream.
    /// - [`FramescopeError::CodecNotFound`] / [`FramescopeError::CodecNotOpened`]
    ///   if the decoder is unavailable or fails to open.
    pub fn open<P: AsRef<Path>>(
        path: P,
        options: &SessionOptions,
    ) -> Result<(Self, VideoInfo), FramescopeError> {
        let path = path.as_ref();
        log::debug!("Opening video file: {}", path.display());

        ffmpeg_next::init().map_err(|error| FramescopeError::FileNotOpened {
            path: path.to_path_buf(),
            reason: format!("FFmpeg initialisation failed: {error}"),
        })?;

        let file_size = fs::metadata(path)
            .map_err(|error| FramescopeError::FileNotOpened {
                path: path.to_path_buf(),
                reason: error.to_string(),
            })?
            .len();

        let input =
            ffmpeg_next::format::input(&path).map_err(|error| FramescopeError::FileNotOpened {
                path: path.to_path_buf(),
                reason: error.to_string(),
            })?;

        let streams = describe_streams(&input);
        for stream in &streams {
            log::debug!(
                "stream #{}: {:?}, {} frames",
                stream.index,
                stream.kind,
                stream.frame_count
            );
        }

        let metadata_stream_index = selector::find_metadata_stream(&streams);
        let stream_index = selector::select_best_stream(&streams, MediaKind::Video)
            .ok_or(FramescopeError::VideoStreamNotFound)?;

        let stream = input
            .stream(stream_index)
            .ok_or(FramescopeError::VideoStreamNotFound)?;
        let parameters = stream.parameters();
        let codec_id = parameters.id();
        let is_mpeg2 = codec_id == Id::MPEG2VIDEO;
        let stream_time_base = stream.time_base();
        let average_frame_rate = stream.avg_frame_rate();
        let stream_frame_count = stream.frames();

        let codec = ffmpeg_next::decoder::find(codec_id)
            .ok_or_else(|| FramescopeError::CodecNotFound(format!("{codec_id:?}")))?;
        let decoder = CodecContext::from_parameters(parameters)
            .and_then(|context| context.decoder().open_as(codec))
            .and_then(|opened| opened.video())
            .map_err(|error| FramescopeError::CodecNotOpened(error.to_string()))?;

        let timestamps_per_second = estimator::timestamps_per_second(stream_time_base)
            .ok_or_else(|| {
                FramescopeError::StreamInfoNotFound(format!(
                    "invalid stream time base {stream_time_base}"
                ))
            })?;

        let codec_time_base = unsafe { Rational::from((*decoder.as_ptr()).time_base) };
        let container_start_micros = unsafe { (*input.as_ptr()).start_time };
        let container_duration_micros = input.duration();

        let duration_timestamps =
            duration_in_timestamps(container_duration_micros, timestamps_per_second);
        if duration_timestamps <= 0 {
            return Err(FramescopeError::StreamInfoNotFound(
                "container does not report a duration".to_string(),
            ));
        }

        if path
            .extension()
            .is_some_and(|extension| extension.eq_ignore_ascii_case("vob"))
        {
            log::debug!("VOB container: reported duration may be inaccurate");
        }

        let estimate = estimate_frame_rate(&FrameRateEvidence {
            average_frame_rate,
            stream_frame_count,
            container_duration_micros,
            stream_time_base,
            codec_time_base,
            ticks_per_frame: ticks_per_frame(codec_id),
        });

        let width = decoder.width();
        let height = decoder.height();
        let sample_aspect_ratio = decoder.aspect_ratio();
        let pixel_aspect_ratio = pixel_aspect_ratio(sample_aspect_ratio, width, height, is_mpeg2);
        let first_timestamp = first_timestamp(container_start_micros, timestamps_per_second);

        let mut info = VideoInfo {
            file_size,
            container_format: input.format().name().to_string(),
            codec_name: codec.name().to_string(),
            width,
            height,
            decoding_width: 0,
            decoding_height: 0,
            pixel_aspect_ratio,
            sample_aspect_ratio,
            frames_per_second: estimate.frames_per_second,
            frame_rate_reliable: estimate.reliable,
            frame_rate_method: estimate.method,
            frame_interval_ms: 1000.0 / estimate.frames_per_second,
            duration_timestamps,
            first_timestamp,
            timestamps_per_second,
            average_timestamps_per_frame: average_timestamps_per_frame(
                timestamps_per_second,
                estimate.frames_per_second,
            ),
            deinterlace: options.deinterlace,
            is_mpeg2,
            scaling_quality: options.scaling_quality,
            aspect_ratio: options.aspect_ratio,
        };
        info.apply_aspect_ratio(options.aspect_ratio);

        log::info!(
            "Opened {} ({}x{}, {:.3} fps{}, {} timestamps)",
            path.display(),
            width,
            height,
            info.frames_per_second,
            if info.frame_rate_reliable { "" } else { ", unreliable" },
            info.duration_timestamps
        );

        let decoder = Self {
            input,
            decoder,
            stream_index,
            metadata_stream_index,
            first_timestamp,
            picture: VideoFrame::empty(),
            incoming: VideoFrame::empty(),
            converted: VideoFrame::empty(),
            scaler: None,
            end_of_stream: false,
        };

        Ok((decoder, info))
    }

    /// Index of the selected video stream in the container.
    pub fn stream_index(&self) -> usize {
        self.stream_index
    }

    /// Pull one picture out of the decoder, if it has one ready.
    fn receive_picture(&mut self) -> Result<bool, FramescopeError> {
        match self.decoder.receive_frame(&mut self.incoming) {
            Ok(()) => {
                std::mem::swap(&mut self.picture, &mut self.incoming);
                Ok(true)
            }
            Err(FfmpegError::Eof) => Ok(false),
            Err(FfmpegError::Other { errno }) if errno == ffmpeg_next::error::EAGAIN => Ok(false),
            Err(error) => Err(error.into()),
        }
    }

    fn raw_seek(&mut self, request: SeekRequest) -> Result<(), FramescopeError> {
        let result = unsafe {
            ffmpeg_sys_next::avformat_seek_file(
                self.input.as_mut_ptr(),
                self.stream_index as i32,
                request.min,
                request.target,
                request.max,
                AVSEEK_FLAG_BACKWARD as i32,
            )
        };
        if result < 0 {
            return Err(FfmpegError::from(result).into());
        }
        Ok(())
    }

    fn deinterlace_picture(&self) -> Result<VideoFrame, FramescopeError> {
        let picture = &self.picture;
        let mut graph = FilterGraph::new();

        let buffer_args = format!(
            "video_size={}x{}:pix_fmt={}:time_base=1/1:pixel_aspect=1/1",
            picture.width(),
            picture.height(),
            AVPixelFormat::from(picture.format()) as i32,
        );

        let buffer = ffmpeg_next::filter::find("buffer").ok_or_else(|| {
            FramescopeError::FilterGraphError("FFmpeg 'buffer' filter not found".to_string())
        })?;
        let buffersink = ffmpeg_next::filter::find("buffersink").ok_or_else(|| {
            FramescopeError::FilterGraphError("FFmpeg 'buffersink' filter not found".to_string())
        })?;

        graph
            .add(&buffer, "in", &buffer_args)
            .map_err(|e| FramescopeError::FilterGraphError(format!("buffer filter: {e}")))?;
        graph
            .add(&buffersink, "out", "")
            .map_err(|e| FramescopeError::FilterGraphError(format!("buffersink filter: {e}")))?;
        graph
            .output("in", 0)
            .and_then(|parser| parser.input("out", 0))
            .and_then(|parser| parser.parse("yadif=mode=send_frame:parity=auto:deint=all"))
            .map_err(|e| FramescopeError::FilterGraphError(format!("yadif: {e}")))?;
        graph
            .validate()
            .map_err(|e| FramescopeError::FilterGraphError(format!("validation: {e}")))?;

        let mut source = graph
            .get("in")
            .ok_or_else(|| FramescopeError::FilterGraphError("missing source".to_string()))?;
        source
            .source()
            .add(picture)
            .map_err(|e| FramescopeError::FilterGraphError(format!("feed: {e}")))?;
        source
            .source()
            .flush()
            .map_err(|e| FramescopeError::FilterGraphError(format!("flush: {e}")))?;

        let mut deinterlaced = VideoFrame::empty();
        graph
            .get("out")
            .ok_or_else(|| FramescopeError::FilterGraphError("missing sink".to_string()))?
            .sink()
            .frame(&mut deinterlaced)
            .map_err(|e| FramescopeError::FilterGraphError(format!("drain: {e}")))?;
        Ok(deinterlaced)
    }
}

impl VideoDecoder for FfmpegDecoder {
    fn decode_next(&mut self) -> Result<Option<DecodeStep>, FramescopeError> {
        // A packet can release more than one picture; hand those out first.
        if self.receive_picture()? {
            return Ok(Some(DecodeStep::completed(PacketTimestamps::none())));
        }
        if self.end_of_stream {
            return Ok(None);
        }

        loop {
            let mut packet = Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) => {
                    if packet.stream() != self.stream_index {
                        continue;
                    }
                    let timestamps = PacketTimestamps {
                        dts: packet.dts(),
                        pts: packet.pts(),
                    };
                    if let Err(error) = self.decoder.send_packet(&packet) {
                        log::warn!("decoder rejected packet at {:?}: {error}", timestamps.dts);
                        return Ok(Some(DecodeStep::buffering(timestamps)));
                    }
                    let completed = self.receive_picture()?;
                    return Ok(Some(DecodeStep {
                        timestamps,
                        completed,
                    }));
                }
                Err(FfmpegError::Eof) => {
                    log::debug!("end of stream reached, draining decoder");
                    self.end_of_stream = true;
                    self.decoder.send_eof()?;
                    if self.receive_picture()? {
                        return Ok(Some(DecodeStep::completed(PacketTimestamps::none())));
                    }
                    return Ok(None);
                }
                Err(FfmpegError::Other { errno }) if errno == ffmpeg_next::error::EAGAIN => {
                    continue;
                }
                Err(error) => {
                    log::warn!("failed to read packet: {error}");
                    return Err(FramescopeError::FrameNotRead);
                }
            }
        }
    }

    fn seek(&mut self, request: SeekRequest) -> Result<(), FramescopeError> {
        self.raw_seek(request)
    }

    fn flush(&mut self) {
        self.decoder.flush();
        self.end_of_stream = false;
    }

    fn source_dimensions(&self) -> (u32, u32) {
        (self.decoder.width(), self.decoder.height())
    }

    fn convert(&mut self, target: &ConversionTarget) -> Result<FrameView<'_>, FramescopeError> {
        if self.picture.width() == 0 || self.picture.height() == 0 {
            return Err(FramescopeError::MemoryNotAllocated);
        }
        if target.width == 0 || target.height == 0 {
            return Err(FramescopeError::MemoryNotAllocated);
        }

        let deinterlaced = if target.deinterlace {
            match self.deinterlace_picture() {
                Ok(frame) => Some(frame),
                Err(error) => {
                    log::warn!("deinterlacing failed, using interlaced picture: {error}");
                    None
                }
            }
        } else {
            None
        };
        let source = deinterlaced.as_ref().unwrap_or(&self.picture);

        let key = ScalerKey {
            source_format: source.format(),
            source_width: source.width(),
            source_height: source.height(),
            target_format: target.format.to_ffmpeg_pixel(),
            target_width: target.width,
            target_height: target.height,
            flags: target.quality.to_scaling_flags(),
        };

        if self.scaler.as_ref().is_none_or(|(cached, _)| *cached != key) {
            let context = ScalingContext::get(
                key.source_format,
                key.source_width,
                key.source_height,
                key.target_format,
                key.target_width,
                key.target_height,
                key.flags,
            )
            .map_err(|e| FramescopeError::ImageNotConverted(format!("cannot create scaler: {e}")))?;
            self.scaler = Some((key, context));
            self.converted = VideoFrame::empty();
        }

        let Some((_, scaler)) = self.scaler.as_mut() else {
            return Err(FramescopeError::ImageNotConverted("no scaler".to_string()));
        };
        scaler
            .run(source, &mut self.converted)
            .map_err(|e| FramescopeError::ImageNotConverted(format!("scaling failed: {e}")))?;

        Ok(FrameView {
            width: target.width,
            height: target.height,
            stride: self.converted.stride(0),
            format: target.format,
            data: self.converted.data(0),
        })
    }

    fn read_embedded_metadata(&mut self) -> Result<Option<String>, FramescopeError> {
        let Some(metadata_index) = self.metadata_stream_index else {
            return Ok(None);
        };

        let mut text = None;
        loop {
            let mut packet = Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) if packet.stream() == metadata_index => {
                    text = packet.data().map(|data| {
                        String::from_utf8_lossy(data)
                            .trim_end_matches('\0')
                            .to_string()
                    });
                    break;
                }
                Ok(()) => continue,
                Err(FfmpegError::Eof) => break,
                Err(error) => return Err(error.into()),
            }
        }

        let first = self.first_timestamp;
        self.raw_seek(SeekRequest {
            min: 0,
            target: first,
            max: first,
        })?;
        self.flush();
        log::debug!(
            "embedded metadata: {}",
            if text.is_some() { "found" } else { "absent" }
        );
        Ok(text)
    }
}

fn describe_streams(input: &Input) -> Vec<StreamDescriptor> {
    input
        .streams()
        .map(|stream| {
            let parameters = stream.parameters();
            let kind = match parameters.medium() {
                Type::Video => MediaKind::Video,
                Type::Audio => MediaKind::Audio,
                Type::Subtitle => MediaKind::Subtitle,
                _ => MediaKind::Other,
            };
            let tags: HashMap<String, String> = stream
                .metadata()
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect();
            StreamDescriptor {
                index: stream.index(),
                kind,
                frame_count: stream.frames(),
                codec_is_text: parameters.id() == Id::TEXT,
                tags,
            }
        })
        .collect()
}

/// Field-coded codecs count two ticks per frame in their time base.
fn ticks_per_frame(codec_id: Id) -> i32 {
    match codec_id {
        Id::H264 | Id::MPEG1VIDEO | Id::MPEG2VIDEO => 2,
        _ => 1,
    }
}
