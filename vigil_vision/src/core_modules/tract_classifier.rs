#![cfg(feature = "backend-tract")]

use image::RgbImage;
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::config::{ClassifierConfig, PerformanceMode};
use crate::core_modules::classifier::{
    ClassificationResult, FrameClassifier, Label, check_sequence_length,
};
use crate::core_modules::frame::{Frame, PixelOrder};
use crate::error::ClassifierError;

/// Sequence classifier running a local ONNX model through tract.
///
/// The model takes one `[1, K, H, W, 3]` tensor of `f32` pixels in `[0, 1]` and
/// returns one probability per class, in the order of `classes`.
pub struct OnnxClassifier {
    model: TypedRunnableModel<TypedModel>,
    classes: Vec<Label>,
    sequence_length: usize,
    width: u32,
    height: u32,
    resize_factor: f32,
    /// Channel order the model was trained on.
    input_order: PixelOrder,
}

impl OnnxClassifier {
    pub fn load(config: &ClassifierConfig) -> Result<Self, ClassifierError> {
        let classes = config
            .classes
            .iter()
            .map(|name| name.parse::<Label>())
            .collect::<Result<Vec<_>, _>>()?;

        let path = &config.model_path;
        let shape = tvec!(
            1,
            config.sequence_length,
            config.input_height as usize,
            config.input_width as usize,
            3
        );
        let model = tract_onnx::onnx()
            .model_for_path(path)
            .map_err(|e| load_error(format!("{}: {e}", path.display())))?
            .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), shape))
            .map_err(|e| load_error(format!("input fact: {e}")))?
            .into_optimized()
            .map_err(|e| load_error(format!("optimize: {e}")))?
            .into_runnable()
            .map_err(|e| load_error(format!("runnable: {e}")))?;

        tracing::info!(model = %path.display(), sequence_length = config.sequence_length, "loaded ONNX classifier");

        Ok(Self {
            model,
            classes,
            sequence_length: config.sequence_length,
            width: config.input_width,
            height: config.input_height,
            resize_factor: PerformanceMode::default().settings().resize_factor,
            input_order: PixelOrder::Bgr,
        })
    }

    pub fn with_input_order(mut self, order: PixelOrder) -> Self {
        self.input_order = order;
        self
    }

    /// Downscales by the performance factor, then fits the model input size.
    fn prepare(&self, frame: &Frame) -> RgbImage {
        let image = frame.image();
        let scaled;
        let source = if self.resize_factor < 1.0 {
            let w = ((image.width() as f32 * self.resize_factor) as u32).max(1);
            let h = ((image.height() as f32 * self.resize_factor) as u32).max(1);
            scaled = imageops::resize(image, w, h, FilterType::Triangle);
            &scaled
        } else {
            image
        };
        imageops::resize(source, self.width, self.height, FilterType::Triangle)
    }

    fn build_input(&self, frames: &[Frame]) -> Tensor {
        let prepared: Vec<(RgbImage, bool)> = frames
            .iter()
            .map(|f| (self.prepare(f), f.order != self.input_order))
            .collect();

        let input = tract_ndarray::Array5::from_shape_fn(
            (
                1,
                prepared.len(),
                self.height as usize,
                self.width as usize,
                3,
            ),
            |(_, index, y, x, channel)| {
                let (image, swap) = &prepared[index];
                let channel = if *swap { 2 - channel } else { channel };
                image.get_pixel(x as u32, y as u32).0[channel] as f32 / 255.0
            },
        );
        input.into_tensor()
    }

    fn interpret(&self, outputs: TVec<TValue>) -> Result<ClassificationResult, ClassifierError> {
        let output = outputs
            .first()
            .ok_or_else(|| ClassifierError::Inference("model produced no outputs".into()))?;
        let scores = output
            .to_array_view::<f32>()
            .map_err(|e| ClassifierError::Inference(format!("output tensor was not f32: {e}")))?;
        if scores.len() != self.classes.len() {
            return Err(ClassifierError::Inference(format!(
                "model returned {} scores for {} classes",
                scores.len(),
                self.classes.len()
            )));
        }

        let (best, confidence) = scores
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |acc, (i, score)| {
                if score > acc.1 { (i, score) } else { acc }
            });
        ClassificationResult::new(self.classes[best], confidence)
    }
}

impl FrameClassifier for OnnxClassifier {
    fn name(&self) -> &str {
        "tract-onnx"
    }

    fn sequence_length(&self) -> usize {
        self.sequence_length
    }

    fn predict(&mut self, frames: &[Frame]) -> Result<ClassificationResult, ClassifierError> {
        check_sequence_length(self.sequence_length, frames)?;
        let input = self.build_input(frames);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .map_err(|e| ClassifierError::Inference(e.to_string()))?;
        self.interpret(outputs)
    }

    fn set_performance_mode(&mut self, mode: PerformanceMode) {
        self.resize_factor = mode.settings().resize_factor;
    }
}

fn load_error(reason: String) -> ClassifierError {
    ClassifierError::Load(reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_model_is_a_load_error() {
        let config = ClassifierConfig {
            model_path: "does/not/exist.onnx".into(),
            ..ClassifierConfig::default()
        };
        let err = OnnxClassifier::load(&config).err().unwrap();
        assert!(matches!(err, ClassifierError::Load(_)));
        assert_eq!(err.severity(), crate::error::ErrorSeverity::ConfigurationInvalid);
    }

    #[test]
    fn unknown_class_names_are_refused_before_loading() {
        let config = ClassifierConfig {
            classes: vec!["Violence".into(), "Fighting".into()],
            ..ClassifierConfig::default()
        };
        assert_eq!(
            OnnxClassifier::load(&config).err().unwrap(),
            ClassifierError::UnknownLabel("Fighting".into())
        );
    }
}
