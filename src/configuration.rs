//! Session and operation configuration.
//!
//! [`SessionOptions`] fixes how a session turns decoded pictures into display
//! bitmaps (aspect-ratio policy, deinterlacing, output pixel format, scaling
//! quality). [`OperationOptions`] is a builder that threads progress
//! callbacks and cancellation tokens through the long-running operations
//! without polluting every function signature.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use framescope::{
//!     AspectRatio, CancellationToken, OperationOptions, ProgressCallback, ProgressInfo,
//!     SessionOptions,
//! };
//!
//! struct LogProgress;
//! impl ProgressCallback for LogProgress {
//!     fn on_progress(&self, info: &ProgressInfo) {
//!         println!("{:?}: {} done", info.operation, info.current);
//!     }
//! }
//!
//! let session_options = SessionOptions::new()
//!     .with_aspect_ratio(AspectRatio::ForceSquarePixels)
//!     .with_deinterlace(true);
//!
//! let token = CancellationToken::new();
//! let options = OperationOptions::new()
//!     .with_progress(Arc::new(LogProgress))
//!     .with_cancellation(token.clone())
//!     .with_batch_size(10);
//! ```

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling::Flags as ScalingFlags;

use crate::progress::{CancellationToken, NoOpProgress, ProgressCallback};

/// Output pixel format of display bitmaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelFormat {
    /// 8-bit BGRA (32 bpp), the layout most UI toolkits blit directly. This is the default.
    #[default]
    Bgra8,
    /// 8-bit RGBA (32 bpp).
    Rgba8,
    /// 8-bit RGB (24 bpp).
    Rgb8,
}

impl PixelFormat {
    /// Number of bytes used by one pixel.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra8 | PixelFormat::Rgba8 => 4,
            PixelFormat::Rgb8 => 3,
        }
    }

    /// Map to the corresponding FFmpeg pixel format constant.
    pub(crate) fn to_ffmpeg_pixel(self) -> Pixel {
        match self {
            PixelFormat::Bgra8 => Pixel::BGRA,
            PixelFormat::Rgba8 => Pixel::RGBA,
            PixelFormat::Rgb8 => Pixel::RGB24,
        }
    }
}

/// Policy used to derive the display height from the decoding width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AspectRatio {
    /// Honor the pixel aspect ratio reported by the file.
    #[default]
    AutoDetect,
    /// Display at 4:3 regardless of the file.
    Force4x3,
    /// Display at 16:9 regardless of the file.
    Force16x9,
    /// Treat pixels as square and keep the native height.
    ForceSquarePixels,
}

/// Interpolation used when rescaling decoded pictures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScalingQuality {
    /// Fast bilinear. This is the default and what playback wants.
    #[default]
    FastBilinear,
    /// Bilinear.
    Bilinear,
    /// Bicubic.
    Bicubic,
    /// Lanczos, the sharpest and slowest.
    Lanczos,
}

impl ScalingQuality {
    pub(crate) fn to_scaling_flags(self) -> ScalingFlags {
        match self {
            ScalingQuality::FastBilinear => ScalingFlags::FAST_BILINEAR,
            ScalingQuality::Bilinear => ScalingFlags::BILINEAR,
            ScalingQuality::Bicubic => ScalingFlags::BICUBIC,
            ScalingQuality::Lanczos => ScalingFlags::LANCZOS,
        }
    }
}

/// Settings that stay fixed for the lifetime of a loaded file.
///
/// The aspect-ratio policy and the deinterlace flag are only the initial
/// values; both can be changed on a loaded session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub(crate) aspect_ratio: AspectRatio,
    pub(crate) deinterlace: bool,
    pub(crate) pixel_format: PixelFormat,
    pub(crate) scaling_quality: ScalingQuality,
    pub(crate) companion_extension: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionOptions {
    /// Create options with default settings.
    ///
    /// Defaults: auto-detected aspect ratio, no deinterlacing, BGRA output,
    /// fast bilinear scaling, companion metadata extension `kva`.
    pub fn new() -> Self {
        Self {
            aspect_ratio: AspectRatio::AutoDetect,
            deinterlace: false,
            pixel_format: PixelFormat::Bgra8,
            scaling_quality: ScalingQuality::FastBilinear,
            companion_extension: "kva".to_string(),
        }
    }

    /// Set the initial aspect-ratio policy.
    #[must_use]
    pub fn with_aspect_ratio(mut self, aspect_ratio: AspectRatio) -> Self {
        self.aspect_ratio = aspect_ratio;
        self
    }

    /// Enable or disable deinterlacing of decoded pictures.
    #[must_use]
    pub fn with_deinterlace(mut self, deinterlace: bool) -> Self {
        self.deinterlace = deinterlace;
        self
    }

    /// Set the pixel format of display bitmaps.
    #[must_use]
    pub fn with_pixel_format(mut self, format: PixelFormat) -> Self {
        self.pixel_format = format;
        self
    }

    /// Set the interpolation used when rescaling.
    #[must_use]
    pub fn with_scaling_quality(mut self, quality: ScalingQuality) -> Self {
        self.scaling_quality = quality;
        self
    }

    /// Set the file extension of companion metadata files (without the dot).
    #[must_use]
    pub fn with_companion_extension(mut self, extension: impl Into<String>) -> Self {
        self.companion_extension = extension.into();
        self
    }

    /// The initial aspect-ratio policy.
    pub fn aspect_ratio(&self) -> AspectRatio {
        self.aspect_ratio
    }

    /// The pixel format of display bitmaps.
    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// The extension used to look up companion metadata files.
    pub fn companion_extension(&self) -> &str {
        &self.companion_extension
    }
}

/// Configuration for long-running operations.
///
/// Carries the progress callback, the cancellation token and the reporting
/// cadence. A default-constructed value reports nothing and never cancels.
#[derive(Clone)]
pub struct OperationOptions {
    /// Progress callback. Defaults to a no-op.
    pub(crate) progress: Arc<dyn ProgressCallback>,
    /// Cancellation token. `None` means never cancelled.
    pub(crate) cancellation: Option<CancellationToken>,
    /// How often to fire the progress callback (every N frames).
    pub(crate) batch_size: u64,
}

impl Debug for OperationOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("OperationOptions")
            .field("has_progress", &true)
            .field("has_cancellation", &self.cancellation.is_some())
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl Default for OperationOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationOptions {
    /// Create options with default settings.
    ///
    /// Defaults: no progress callback, no cancellation, batch size 1.
    pub fn new() -> Self {
        Self {
            progress: Arc::new(NoOpProgress),
            cancellation: None,
            batch_size: 1,
        }
    }

    /// Attach a progress callback.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    /// Attach a cancellation token.
    ///
    /// When the token is cancelled, the running operation stops after the
    /// current frame and returns [`FramescopeError::Cancelled`](crate::FramescopeError::Cancelled).
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Set how often the progress callback fires.
    ///
    /// A value of 1 means every frame. Clamped to a minimum of 1.
    #[must_use]
    pub fn with_batch_size(mut self, size: u64) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Whether the attached token (if any) has been cancelled.
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}
