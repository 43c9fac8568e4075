//! Display bitmaps.
//!
//! A decoder converts each picture into a scratch buffer that it reuses for
//! the next one, so conversion hands out a borrowed [`FrameView`]. Anything
//! that must outlive the next decode call (the displayed frame, cached
//! frames, export copies) takes an owned [`Bitmap`] through
//! [`FrameView::to_bitmap`].

use std::path::Path;

use image::{DynamicImage, RgbImage, RgbaImage};

use crate::configuration::PixelFormat;
use crate::error::FramescopeError;

/// Borrowed pixels of the most recently converted picture.
///
/// Rows are `stride` bytes apart; the stride may include padding.
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Bytes between the starts of two consecutive rows.
    pub stride: usize,
    /// Pixel layout.
    pub format: PixelFormat,
    /// Pixel bytes, at least `stride * (height - 1) + width * bpp` long.
    pub data: &'a [u8],
}

impl FrameView<'_> {
    /// Deep-copy the pixels into an owned, tightly packed bitmap.
    ///
    /// # Errors
    ///
    /// [`FramescopeError::ImageNotConverted`] if the view is empty or its
    /// buffer is shorter than its geometry claims.
    pub fn to_bitmap(&self) -> Result<Bitmap, FramescopeError> {
        Bitmap::from_view(self)
    }
}

/// An owned, tightly packed picture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
}

impl Bitmap {
    /// A zero-filled bitmap.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            data: vec![0; Self::buffer_size(width, height, format)],
        }
    }

    /// Wrap existing tightly packed pixels.
    ///
    /// # Errors
    ///
    /// [`FramescopeError::ImageNotConverted`] if `data` does not hold exactly
    /// `width * height` pixels.
    pub fn from_raw(
        width: u32,
        height: u32,
        format: PixelFormat,
        data: Vec<u8>,
    ) -> Result<Self, FramescopeError> {
        let expected = Self::buffer_size(width, height, format);
        if data.len() != expected {
            return Err(FramescopeError::ImageNotConverted(format!(
                "expected {expected} bytes for {width}x{height}, got {}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    /// Copy a borrowed view, dropping any row padding.
    pub fn from_view(view: &FrameView<'_>) -> Result<Self, FramescopeError> {
        if view.width == 0 || view.height == 0 {
            return Err(FramescopeError::ImageNotConverted(
                "picture has no pixels".to_string(),
            ));
        }

        let row_length = view.width as usize * view.format.bytes_per_pixel();
        if view.stride < row_length {
            return Err(FramescopeError::ImageNotConverted(format!(
                "stride {} is shorter than a row of {row_length} bytes",
                view.stride
            )));
        }

        let height = view.height as usize;
        let required = view.stride * (height - 1) + row_length;
        if view.data.len() < required {
            return Err(FramescopeError::ImageNotConverted(format!(
                "buffer holds {} bytes, picture needs {required}",
                view.data.len()
            )));
        }

        let data = if view.stride == row_length {
            view.data[..row_length * height].to_vec()
        } else {
            let mut buffer = Vec::with_capacity(row_length * height);
            for row in 0..height {
                let row_start = row * view.stride;
                buffer.extend_from_slice(&view.data[row_start..row_start + row_length]);
            }
            buffer
        };

        Ok(Self {
            width: view.width,
            height: view.height,
            format: view.format,
            data,
        })
    }

    /// Bytes needed for a tightly packed picture.
    pub fn buffer_size(width: u32, height: u32, format: PixelFormat) -> usize {
        width as usize * height as usize * format.bytes_per_pixel()
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Pixel layout.
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Bytes per row.
    pub fn stride(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    /// Pixel bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable pixel bytes, for overlay rendering.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Borrow the pixels as a view.
    pub fn as_view(&self) -> FrameView<'_> {
        FrameView {
            width: self.width,
            height: self.height,
            stride: self.stride(),
            format: self.format,
            data: &self.data,
        }
    }

    /// Convert to an [`image::DynamicImage`].
    pub fn to_image(&self) -> Result<DynamicImage, FramescopeError> {
        let invalid =
            || FramescopeError::ImageNotConverted("bitmap buffer has the wrong size".to_string());
        match self.format {
            PixelFormat::Bgra8 => {
                let mut rgba = self.data.clone();
                for pixel in rgba.chunks_exact_mut(4) {
                    pixel.swap(0, 2);
                }
                RgbaImage::from_raw(self.width, self.height, rgba)
                    .map(DynamicImage::ImageRgba8)
                    .ok_or_else(invalid)
            }
            PixelFormat::Rgba8 => RgbaImage::from_raw(self.width, self.height, self.data.clone())
                .map(DynamicImage::ImageRgba8)
                .ok_or_else(invalid),
            PixelFormat::Rgb8 => RgbImage::from_raw(self.width, self.height, self.data.clone())
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(invalid),
        }
    }

    /// Save to an image file; the format follows the extension.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), FramescopeError> {
        self.to_image()?.save(path)?;
        Ok(())
    }

    /// Convert to tightly packed RGB24, the layout the encoder consumes.
    pub(crate) fn to_rgb24(&self) -> Vec<u8> {
        match self.format {
            PixelFormat::Rgb8 => self.data.clone(),
            PixelFormat::Rgba8 => self
                .data
                .chunks_exact(4)
                .flat_map(|pixel| [pixel[0], pixel[1], pixel[2]])
                .collect(),
            PixelFormat::Bgra8 => self
                .data
                .chunks_exact(4)
                .flat_map(|pixel| [pixel[2], pixel[1], pixel[0]])
                .collect(),
        }
    }
}
