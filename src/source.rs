//! Media source abstraction and the pixel buffers it produces.

use image::RgbaImage;
use std::sync::Arc;

use crate::error::SampleError;

/// How much of a source's data is available at the current position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReadyState {
    HaveNothing,
    HaveMetadata,
    HaveCurrentData,
    HaveFutureData,
    HaveEnoughData,
}

/// A decodable video handle.
///
/// Methods take `&self`: a source is a shared handle whose playback cursor
/// can be moved by both the sampler and the playback driver. Implementations
/// use interior mutability and must not hold borrows across `.await`.
#[allow(async_fn_in_trait)]
pub trait MediaSource {
    /// Identity used to key persisted frame sequences (e.g. a file path).
    fn identity(&self) -> String;

    /// Duration in seconds.
    fn duration(&self) -> f64;

    /// Natural `(width, height)` of the video in pixels.
    fn natural_size(&self) -> (u32, u32);

    fn ready_state(&self) -> ReadyState;

    /// `false` once the underlying handle has been invalidated.
    fn is_valid(&self) -> bool {
        true
    }

    /// Current playback position in seconds.
    fn current_time(&self) -> f64;

    /// Place the cursor at `time` without decoding anything.
    ///
    /// The playback driver uses this to keep the cursor at the playback
    /// position, so sampling the current frame never needs a restore seek.
    fn set_current_time(&self, time: f64);

    /// Move the cursor to `time`; resolves when the seek has completed.
    ///
    /// Dropping the returned future abandons the seek.
    async fn seek(&self, time: f64) -> Result<(), SampleError>;

    /// Render the frame at the cursor scaled to exactly `width` x `height`.
    fn draw(&self, width: u32, height: u32) -> Result<RgbaImage, SampleError>;

    /// Ask the source to reload after a stall. Best effort.
    fn reload(&self) {}
}

/// Immutable RGBA frame, cheap to clone.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    image: Arc<RgbaImage>,
}

impl PixelBuffer {
    pub fn new(image: RgbaImage) -> Self {
        Self { image: Arc::new(image) }
    }

    /// Build from raw RGBA bytes; `None` if the length is not `width * height * 4`.
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        RgbaImage::from_raw(width, height, data).map(Self::new)
    }

    /// Uniform buffer filled with one color.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        Self::new(RgbaImage::from_pixel(width, height, image::Rgba(rgba)))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn as_image(&self) -> &RgbaImage {
        &self.image
    }

    /// Raw samples, row-major, 4 bytes per pixel.
    pub fn as_bytes(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_state_ordering() {
        assert!(ReadyState::HaveNothing < ReadyState::HaveMetadata);
        assert!(ReadyState::HaveMetadata < ReadyState::HaveCurrentData);
        assert!(ReadyState::HaveFutureData < ReadyState::HaveEnoughData);
    }

    #[test]
    fn test_from_raw_checks_length() {
        assert!(PixelBuffer::from_raw(2, 2, vec![0; 16]).is_some());
        assert!(PixelBuffer::from_raw(2, 2, vec![0; 15]).is_none());
    }

    #[test]
    fn test_clone_shares_samples() {
        let a = PixelBuffer::solid(4, 3, [10, 20, 30, 255]);
        let b = a.clone();
        assert_eq!(a, b);
        assert_eq!(b.as_bytes().len(), 4 * 3 * 4);
        assert!(!b.is_empty());
    }
}
