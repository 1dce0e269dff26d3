// THEORY:
// The `ForegroundExtractor` is the temporal layer of the motion pipeline. Like a
// grid of tiny statisticians, it keeps a learned "normal" value for every pixel of
// the scene and flags the pixels whose current value is a statistical outlier.
//
// Key architectural principles:
// 1.  **Per-Pixel Adaptive Model**: Each pixel holds a running mean and variance of
//     its luminance. A pixel is foreground when its squared deviation from the mean
//     exceeds `var_threshold` times its variance. Low thresholds catch subtle motion
//     and noise alike; high thresholds are calm but miss small movements.
// 2.  **Rolling Memory**: The learning rate is `1 / min(2n, history)`. Early frames
//     are absorbed quickly so the model settles, after which the model behaves like a
//     window of the last `history` frames. Every pixel learns on every frame, so a
//     stationary object slowly melts into the background.
// 3.  **No Shadow Class**: Shadows are not modelled as a separate class. A shadow is
//     either foreground or it is not; it never becomes a second, detached region.
// 4.  **Owned Session State**: One extractor belongs to one session. Frame
//     dimensions are fixed by the first frame; a different size afterwards is a
//     hard error rather than a silent re-seed. Switching sources means `reset()`.
// 5.  **Mask Cleanup**: The raw mask is eroded (speckle removal) and then dilated a
//     little more than it was eroded, so surviving blobs grow slightly and nearby
//     fragments of one object tend to fuse before contour extraction.

use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{dilate, erode};

use crate::config::MotionConfig;
use crate::core_modules::frame::{Frame, PixelOrder};
use crate::error::ForegroundError;

pub const FOREGROUND: u8 = 255;
pub const BACKGROUND: u8 = 0;

const INITIAL_VARIANCE: f32 = 15.0;
const MIN_VARIANCE: f32 = 4.0;
const MAX_VARIANCE: f32 = 5.0 * INITIAL_VARIANCE;

/// The learned statistics for every pixel of one scene.
#[derive(Debug, Clone)]
struct BackgroundModel {
    width: u32,
    height: u32,
    /// Running mean luminance, row-major.
    mean: Vec<f32>,
    /// Running luminance variance, row-major.
    variance: Vec<f32>,
    /// Frames absorbed since the model was seeded.
    frames_seen: u32,
}

impl BackgroundModel {
    fn seed(width: u32, height: u32, luma: Vec<f32>) -> Self {
        let len = luma.len();
        Self {
            width,
            height,
            mean: luma,
            variance: vec![INITIAL_VARIANCE; len],
            frames_seen: 1,
        }
    }

    fn learning_rate(&self, history: u32) -> f32 {
        let horizon = self.frames_seen.saturating_mul(2).min(history).max(1);
        1.0 / horizon as f32
    }

    /// Classifies every pixel against the model, then folds the frame into it.
    fn classify_and_learn(&mut self, luma: &[f32], var_threshold: f32, history: u32) -> Vec<u8> {
        let alpha = self.learning_rate(history);
        let mut mask = Vec::with_capacity(luma.len());
        for ((value, mean), variance) in luma
            .iter()
            .zip(self.mean.iter_mut())
            .zip(self.variance.iter_mut())
        {
            let deviation = value - *mean;
            let squared = deviation * deviation;
            mask.push(if squared > var_threshold * *variance {
                FOREGROUND
            } else {
                BACKGROUND
            });

            *mean += alpha * deviation;
            *variance = (*variance + alpha * (squared - *variance)).clamp(MIN_VARIANCE, MAX_VARIANCE);
        }
        self.frames_seen = self.frames_seen.saturating_add(1);
        mask
    }
}

/// Maintains the background model of one session and turns frames into masks.
pub struct ForegroundExtractor {
    history: u32,
    var_threshold: f32,
    erode_iterations: u8,
    dilate_iterations: u8,
    model: Option<BackgroundModel>,
}

impl ForegroundExtractor {
    pub fn new(config: &MotionConfig) -> Self {
        Self {
            history: config.history,
            var_threshold: config.var_threshold,
            erode_iterations: config.erode_iterations,
            dilate_iterations: config.dilate_iterations,
            model: None,
        }
    }

    /// Raw foreground mask plus erosion/dilation cleanup. Same dimensions as `frame`.
    pub fn apply(&mut self, frame: &Frame) -> Result<GrayImage, ForegroundError> {
        let raw = self.subtract(frame)?;
        Ok(clean_mask(&raw, self.erode_iterations, self.dilate_iterations))
    }

    /// Background subtraction only, without morphological cleanup.
    pub fn subtract(&mut self, frame: &Frame) -> Result<GrayImage, ForegroundError> {
        let (width, height) = frame.dimensions();
        let luma = luminance(frame);

        let model = match self.model.as_mut() {
            None => {
                self.model = Some(BackgroundModel::seed(width, height, luma));
                return Ok(GrayImage::new(width, height));
            }
            Some(model) => model,
        };

        if (model.width, model.height) != (width, height) {
            return Err(ForegroundError::DimensionMismatch {
                expected: (model.width, model.height),
                actual: (width, height),
            });
        }

        let mask = model.classify_and_learn(&luma, self.var_threshold, self.history);
        // Length is width*height by construction.
        Ok(GrayImage::from_raw(width, height, mask).unwrap_or_else(|| GrayImage::new(width, height)))
    }

    /// Forgets the learned scene; the next frame seeds a fresh model.
    pub fn reset(&mut self) {
        self.model = None;
    }

    pub fn is_seeded(&self) -> bool {
        self.model.is_some()
    }

    /// Dimensions the model was seeded with, if any.
    pub fn model_dimensions(&self) -> Option<(u32, u32)> {
        self.model.as_ref().map(|m| (m.width, m.height))
    }
}

/// Erodes with a 3x3 cross `erode_iterations` times, then dilates `dilate_iterations` times.
pub fn clean_mask(mask: &GrayImage, erode_iterations: u8, dilate_iterations: u8) -> GrayImage {
    let eroded = if erode_iterations > 0 {
        erode(mask, Norm::L1, erode_iterations)
    } else {
        mask.clone()
    };
    if dilate_iterations > 0 {
        dilate(&eroded, Norm::L1, dilate_iterations)
    } else {
        eroded
    }
}

/// Counts the foreground pixels of a mask.
pub fn foreground_pixels(mask: &GrayImage) -> usize {
    mask.pixels().filter(|p| p.0[0] == FOREGROUND).count()
}

/// Rec. 601 luma for every pixel, honoring the frame's channel order.
fn luminance(frame: &Frame) -> Vec<f32> {
    let (r, b) = match frame.order {
        PixelOrder::Rgb => (0, 2),
        PixelOrder::Bgr => (2, 0),
    };
    frame
        .as_bytes()
        .chunks_exact(3)
        .map(|px| 0.299 * px[r] as f32 + 0.587 * px[1] as f32 + 0.114 * px[b] as f32)
        .collect()
}
