//! Renderer module for SyncPlayer
//!
//! This module holds the display side of the engine: the display sink
//! boundary, the decoded frame type, orientation normalization, and the
//! presentation clock that decides when a buffered frame becomes current.

use crate::utils::error::Result;

// Export submodules
pub mod frame;
pub mod orientation;

// Re-export main types
pub use frame::{PresentationClock, PresentationStats};
pub use orientation::{normalize, Rotation};

/// Display sink trait: the GPU/texture side of the engine
///
/// The sink only ever receives packed RGB24 rows; it is invoked once per
/// promoted frame from the render tick thread.
pub trait DisplaySink {
    /// Upload a packed RGB24 frame and return the handle it is displayed through
    ///
    /// # Arguments
    ///
    /// * `pixels` - Packed rows, `width * height * 3` bytes
    /// * `width` - Frame width in pixels
    /// * `height` - Frame height in pixels
    fn upload(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<TextureHandle>;
}

/// Opaque handle returned by a display sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u64);

/// Decoded video frame, packed RGB24
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    /// Interleaved RGB bytes, rows packed without padding
    pub pixels: Vec<u8>,

    /// Presentation timestamp in seconds
    pub pts: f64,

    /// Frame width
    pub width: u32,

    /// Frame height
    pub height: u32,
}

/// Bytes per pixel of [`VideoFrame::pixels`]
pub const BYTES_PER_PIXEL: usize = 3;

impl VideoFrame {
    /// Build a frame, checking the buffer matches the dimensions
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, pts: f64) -> Result<Self> {
        let expected = width as usize * height as usize * BYTES_PER_PIXEL;
        if pixels.len() != expected {
            return Err(crate::utils::error::SyncPlayerError::decode_error(format!(
                "frame buffer holds {} bytes, {}x{} RGB needs {}",
                pixels.len(),
                width,
                height,
                expected
            )));
        }

        Ok(Self { pixels, pts, width, height })
    }

    /// Size of the pixel buffer in bytes
    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }

    /// RGB value at (x, y)
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        Some([self.pixels[offset], self.pixels[offset + 1], self.pixels[offset + 2]])
    }
}

/// Display sink that accepts and discards frames
///
/// Used by the command line front end, which has no window.
#[derive(Debug, Default)]
pub struct HeadlessDisplay {
    uploads: u64,
    last_size: Option<(u32, u32)>,
}

impl HeadlessDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of frames uploaded so far
    pub fn uploads(&self) -> u64 {
        self.uploads
    }

    /// Dimensions of the last uploaded frame
    pub fn last_size(&self) -> Option<(u32, u32)> {
        self.last_size
    }
}

impl DisplaySink for HeadlessDisplay {
    fn upload(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<TextureHandle> {
        log::trace!("Headless upload {}x{} ({} bytes)", width, height, pixels.len());
        self.uploads += 1;
        self.last_size = Some((width, height));
        Ok(TextureHandle(self.uploads))
    }
}
