//! Error types for the `framescope` crate.
//!
//! This module defines [`FramescopeError`], the unified error type returned by
//! every fallible operation in the crate. Load failures, decode failures and
//! export failures are all reported through the same enum so that callers can
//! match on the exact cause without juggling several error types.

use std::{io::Error as IoError, path::PathBuf};

use ffmpeg_next::Error as FfmpegError;
use image::ImageError;
use thiserror::Error;

/// The unified error type for all `framescope` operations.
///
/// Every public method that can fail returns `Result<T, FramescopeError>`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FramescopeError {
    /// The media file could not be opened by the demuxer.
    #[error("Failed to open media file at {path}: {reason}")]
    FileNotOpened {
        /// Path that was passed to [`crate::VideoSession::load`].
        path: PathBuf,
        /// Underlying reason the open failed.
        reason: String,
    },

    /// Stream information could not be probed, or the duration is unknown.
    #[error("Stream information not found: {0}")]
    StreamInfoNotFound(String),

    /// The file does not contain a video stream.
    #[error("No video stream found in file")]
    VideoStreamNotFound,

    /// No decoder is available for the video codec.
    #[error("No decoder available for codec {0}")]
    CodecNotFound(String),

    /// The decoder was found but could not be opened.
    #[error("Failed to open decoder: {0}")]
    CodecNotOpened(String),

    /// An operation that needs a loaded file was called on an empty session.
    #[error("No movie is loaded")]
    MovieNotLoaded,

    /// The decoder reached the end of the stream, or a packet could not be read.
    #[error("Frame could not be read")]
    FrameNotRead,

    /// The decoder reported zero-sized pictures, so no output buffer can be sized.
    #[error("Frame buffer could not be allocated")]
    MemoryNotAllocated,

    /// A decoded picture could not be converted into a display bitmap.
    #[error("Image could not be converted: {0}")]
    ImageNotConverted(String),

    /// A frame could not be read while exporting.
    #[error("Error while reading frames for export: {0}")]
    ReadingError(String),

    /// A range's start value is greater than its end value.
    #[error("Invalid range: start ({start}) must not be greater than end ({end})")]
    InvalidRange {
        /// The start of the range, in native timestamps.
        start: i64,
        /// The end of the range, in native timestamps.
        end: i64,
    },

    /// The operation was cancelled via a [`CancellationToken`](crate::CancellationToken).
    #[error("Operation cancelled")]
    Cancelled,

    /// The output encoder could not be created or opened.
    #[error("Video encoding error: {0}")]
    VideoEncodeError(String),

    /// Writing to the output file failed.
    #[error("Video write error: {0}")]
    VideoWriteError(String),

    /// FFmpeg filter graph setup or processing failed.
    #[error("Filter graph error: {0}")]
    FilterGraphError(String),

    /// An error originating from the FFmpeg libraries.
    #[error("FFmpeg error: {0}")]
    FfmpegError(String),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    IoError(#[from] IoError),

    /// An error from the `image` crate while saving a bitmap.
    #[error("Image processing error: {0}")]
    ImageError(#[from] ImageError),
}

impl From<FfmpegError> for FramescopeError {
    fn from(error: FfmpegError) -> Self {
        FramescopeError::FfmpegError(error.to_string())
    }
}
