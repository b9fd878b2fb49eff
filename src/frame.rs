//! Shared frame buffer.
//!
//! One RGB24 frame owned by the control loop. Every iteration overwrites it in
//! place with the bytes just captured; the classifier and the preview widget
//! both read from it. There is no double buffering.

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};

/// Bytes per RGB24 pixel.
pub const RGB_CHANNELS: usize = 3;

/// Header describing the frame to an image widget.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub width: u32,
    pub height: u32,
    pub data_size: usize,
}

pub struct FrameBuffer {
    image: RgbImage,
    /// Number of frames copied in so far.
    generation: u64,
}

impl FrameBuffer {
    /// Allocate a zeroed `width` x `height` RGB24 buffer.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbImage::new(width, height),
            generation: 0,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn len(&self) -> usize {
        self.image.as_raw().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Overwrite the buffer with the first `len()` bytes of `pixels`.
    ///
    /// Captured buffers may carry trailing padding; a source shorter than one
    /// frame is an error.
    pub fn copy_from(&mut self, pixels: &[u8]) -> Result<()> {
        let expected = self.len();
        let src = pixels.get(..expected).ok_or_else(|| {
            anyhow!(
                "captured frame holds {} bytes, expected at least {}",
                pixels.len(),
                expected
            )
        })?;
        let dst: &mut [u8] = &mut self.image;
        dst.copy_from_slice(src);
        self.generation += 1;
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<&Rgb<u8>> {
        self.image.get_pixel_checked(x, y)
    }

    pub fn descriptor(&self) -> ImageDescriptor {
        ImageDescriptor {
            width: self.width(),
            height: self.height(),
            data_size: self.len(),
        }
    }
}
