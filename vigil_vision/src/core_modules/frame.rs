// THEORY:
// The `Frame` is the unit of data that flows through the whole engine. It is a
// "dumb" data container: an image plus the little bit of identity the pipeline
// needs (a sequence number and a capture instant).
//
// Key architectural principles:
// 1.  **Read-Only Sharing**: The pixel buffer sits behind an `Arc`, so the frame
//     window, the display sink and the classifier can all hold the same frame
//     without copying it. Annotation always produces a new frame.
// 2.  **Validated at the Boundary**: Raw buffers from a capture device are checked
//     once, in `from_raw`. Anything past that point can trust the dimensions and
//     the channel layout.
// 3.  **Channel Order is Data**: Capture libraries disagree on RGB vs BGR. The
//     engine does not convert; it records the order so that drawing colors and
//     classifier input stay consistent with the source.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use image::RgbImage;

use crate::error::FrameError;

/// Byte order of the three color channels in a frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PixelOrder {
    #[default]
    Rgb,
    Bgr,
}

impl PixelOrder {
    /// Reorders an RGB triple into this frame's channel order.
    pub fn encode(self, rgb: [u8; 3]) -> [u8; 3] {
        match self {
            PixelOrder::Rgb => rgb,
            PixelOrder::Bgr => [rgb[2], rgb[1], rgb[0]],
        }
    }
}

/// A single video frame, 8 bits per channel, three channels.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Monotonic sequence number assigned by the source.
    pub id: u64,
    /// When the frame was acquired.
    pub captured_at: Instant,
    /// Channel order of `image`.
    pub order: PixelOrder,
    image: Arc<RgbImage>,
}

impl Frame {
    pub fn new(id: u64, image: RgbImage, order: PixelOrder) -> Self {
        Self {
            id,
            captured_at: Instant::now(),
            order,
            image: Arc::new(image),
        }
    }

    /// Builds a frame from an interleaved buffer. Three channels are taken as-is;
    /// four channels have their alpha dropped.
    pub fn from_raw(
        id: u64,
        width: u32,
        height: u32,
        channels: u8,
        bytes: &[u8],
        order: PixelOrder,
    ) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::Empty);
        }
        if channels != 3 && channels != 4 {
            return Err(FrameError::UnsupportedChannels(channels));
        }
        let expected = width as usize * height as usize * channels as usize;
        if bytes.len() != expected {
            return Err(FrameError::BufferSize {
                width,
                height,
                channels,
                expected,
                actual: bytes.len(),
            });
        }

        let data = if channels == 3 {
            bytes.to_vec()
        } else {
            bytes
                .chunks_exact(4)
                .flat_map(|px| [px[0], px[1], px[2]])
                .collect()
        };
        let image = RgbImage::from_raw(width, height, data).ok_or(FrameError::BufferSize {
            width,
            height,
            channels,
            expected,
            actual: bytes.len(),
        })?;
        Ok(Self::new(id, image, order))
    }

    pub fn with_captured_at(mut self, captured_at: Instant) -> Self {
        self.captured_at = captured_at;
        self
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Raw interleaved bytes in `order`.
    pub fn as_bytes(&self) -> &[u8] {
        self.image.as_raw()
    }

    /// Returns a frame with the same identity but different pixels.
    pub fn with_image(&self, image: RgbImage) -> Self {
        Self {
            id: self.id,
            captured_at: self.captured_at,
            order: self.order,
            image: Arc::new(image),
        }
    }
}

/// A sliding window over the most recent frames, sized to the classifier's
/// sequence length.
#[derive(Debug, Clone)]
pub struct FrameWindow {
    capacity: usize,
    frames: VecDeque<Frame>,
}

impl FrameWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            frames: VecDeque::with_capacity(capacity + 1),
        }
    }

    /// Appends a frame, evicting the oldest once the window is at capacity.
    pub fn push(&mut self, frame: Frame) {
        if self.capacity == 0 {
            return;
        }
        self.frames.push_back(frame);
        if self.frames.len() > self.capacity {
            self.frames.pop_front();
        }
    }

    pub fn is_full(&self) -> bool {
        self.capacity > 0 && self.frames.len() == self.capacity
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The buffered frames, oldest first.
    pub fn frames(&mut self) -> &[Frame] {
        self.frames.make_contiguous()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_raw_accepts_three_and_four_channels() {
        let rgb = Frame::from_raw(0, 2, 1, 3, &[1, 2, 3, 4, 5, 6], PixelOrder::Bgr).unwrap();
        assert_eq!(rgb.dimensions(), (2, 1));
        assert_eq!(rgb.as_bytes(), &[1, 2, 3, 4, 5, 6]);
        assert_eq!(rgb.order, PixelOrder::Bgr);

        let rgba =
            Frame::from_raw(1, 2, 1, 4, &[1, 2, 3, 255, 4, 5, 6, 255], PixelOrder::Rgb).unwrap();
        assert_eq!(rgba.as_bytes(), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn from_raw_rejects_malformed_buffers() {
        assert_eq!(
            Frame::from_raw(0, 2, 2, 1, &[0; 4], PixelOrder::Rgb).unwrap_err(),
            FrameError::UnsupportedChannels(1)
        );
        assert!(matches!(
            Frame::from_raw(0, 2, 2, 3, &[0; 11], PixelOrder::Rgb).unwrap_err(),
            FrameError::BufferSize {
                expected: 12,
                actual: 11,
                ..
            }
        ));
        assert_eq!(
            Frame::from_raw(0, 0, 2, 3, &[], PixelOrder::Rgb).unwrap_err(),
            FrameError::Empty
        );
    }

    #[test]
    fn window_keeps_the_most_recent_frames_in_order() {
        let mut window = FrameWindow::new(3);
        for id in 0..5 {
            window.push(Frame::new(id, RgbImage::new(1, 1), PixelOrder::Rgb));
            assert_eq!(window.is_full(), id >= 2);
        }
        let ids: Vec<u64> = window.frames().iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![2, 3, 4]);

        window.clear();
        assert!(window.is_empty());
        assert!(!window.is_full());
    }

    #[test]
    fn bgr_encoding_swaps_red_and_blue() {
        assert_eq!(PixelOrder::Bgr.encode([255, 0, 0]), [0, 0, 255]);
        assert_eq!(PixelOrder::Rgb.encode([255, 0, 0]), [255, 0, 0]);
    }
}
