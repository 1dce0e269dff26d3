// THEORY:
// `pipeline` exposes detection as one synchronous call per frame. A caller with
// its own loop (or the background worker) hands in a frame and gets back regions,
// an annotated copy and the alert verdict, without wiring the layers itself.
//
// Per frame, in order:
// 1.  **Temporal Analysis**: the `ForegroundExtractor` updates the background model
//     and yields a cleaned mask.
// 2.  **Spatial Grouping**: the `RegionConsolidator` turns the mask into a
//     de-duplicated `RegionSet`.
// 3.  **Sequence Classification**: the frame joins a sliding window; once the window
//     holds exactly K frames, the classifier (if any) labels it.
// 4.  **Behavioral Analysis**: the `AlertStateMachine` folds the label into a stable
//     alert flag. A classifier failure skips this stage and keeps the state.
// 5.  **Annotation**: the regions are drawn on a copy of the frame, colored by the
//     alert flag as it stands after this frame.
//
// A malformed frame (one that does not fit the background model) fails the whole
// call; there is no partial result.

use std::time::Instant;

use crate::config::{MotionConfig, VigilConfig};
use crate::core_modules::annotate::draw_motion_regions;
use crate::core_modules::foreground::ForegroundExtractor;
use crate::core_modules::frame::FrameWindow;
use crate::core_modules::region_consolidator::RegionConsolidator;
use crate::error::{ClassifierError, ForegroundError, PipelineError};

// Types that appear in `process_frame` signatures and reports.
pub use crate::core_modules::alert_state::{
    AlertOutcome, AlertPhase, AlertState, AlertStateMachine, ManualOverride, OutcomeSource,
};
pub use crate::core_modules::bounding_box::{BoundingBox, RegionSet};
pub use crate::core_modules::classifier::{ClassificationResult, FrameClassifier, Label};
pub use crate::core_modules::frame::{Frame, PixelOrder};

/// Foreground extraction plus region consolidation: frame in, regions out.
pub struct MotionDetector {
    extractor: ForegroundExtractor,
    consolidator: RegionConsolidator,
}

impl MotionDetector {
    pub fn new(config: &MotionConfig) -> Self {
        Self {
            extractor: ForegroundExtractor::new(config),
            consolidator: RegionConsolidator::new(config),
        }
    }

    pub fn detect(&mut self, frame: &Frame) -> Result<RegionSet, ForegroundError> {
        let mask = self.extractor.apply(frame)?;
        Ok(self.consolidator.consolidate(&mask))
    }

    /// Forgets the background; required when the source changes.
    pub fn reset(&mut self) {
        self.extractor.reset();
    }
}

/// Everything one call to `process_frame` produced.
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// The frame with its regions drawn (or the frame itself when drawing is off).
    pub annotated: Frame,
    pub regions: RegionSet,
    /// Set when the classifier ran on this frame.
    pub prediction: Option<Result<AlertOutcome, ClassifierError>>,
    /// Set when the alert flag changed on this frame without a classification,
    /// because a cooldown or a manual override ran out.
    pub expiry: Option<AlertOutcome>,
    /// The effective alert flag after this frame.
    pub is_violence: bool,
}

/// Owns one session's detection state: background model, frame window and alerts.
pub struct DetectionPipeline {
    motion: MotionDetector,
    window: FrameWindow,
    alerts: AlertStateMachine,
    show_boxes: bool,
}

impl DetectionPipeline {
    /// `sequence_length` is the classifier's window size K.
    pub fn new(config: &VigilConfig, sequence_length: usize) -> Self {
        Self {
            motion: MotionDetector::new(&config.motion),
            window: FrameWindow::new(sequence_length),
            alerts: AlertStateMachine::new(&config.alert),
            show_boxes: config.worker.show_motion_boxes,
        }
    }

    pub fn process_frame(
        &mut self,
        frame: Frame,
        classifier: Option<&mut dyn FrameClassifier>,
        now: Instant,
    ) -> Result<CycleReport, PipelineError> {
        // Stage 1 & 2: Temporal Analysis and Spatial Grouping
        let regions = self.motion.detect(&frame)?;

        // Stage 3: Sequence Classification
        self.window.push(frame.clone());
        let prediction = match classifier {
            Some(classifier) if self.window.is_full() => {
                let result = classifier.predict(self.window.frames());
                // Stage 4: Behavioral Analysis
                let outcome = self.alerts.record(result, now);
                match &outcome {
                    Ok(o) => tracing::debug!(
                        frame = frame.id,
                        label = %o.label,
                        confidence = o.confidence,
                        phase = ?o.phase,
                        "window classified"
                    ),
                    Err(e) => tracing::warn!(frame = frame.id, error = %e, "classification failed"),
                }
                Some(outcome)
            }
            _ => None,
        };

        let expiry = match prediction {
            Some(Ok(_)) => None,
            _ => self.alerts.poll(now),
        };

        // Stage 5: Annotation
        let is_violence = self.alerts.is_violence_at(now);
        let annotated = if self.show_boxes && !regions.is_empty() {
            draw_motion_regions(&frame, &regions, is_violence)
        } else {
            frame
        };

        Ok(CycleReport {
            annotated,
            regions,
            prediction,
            expiry,
            is_violence,
        })
    }

    pub fn trigger_violence(&mut self, now: Instant) -> AlertOutcome {
        self.alerts.trigger_violence(now)
    }

    pub fn trigger_non_violence(&mut self, now: Instant) -> AlertOutcome {
        self.alerts.trigger_non_violence(now)
    }

    pub fn set_show_boxes(&mut self, show: bool) {
        self.show_boxes = show;
    }

    pub fn show_boxes(&self) -> bool {
        self.show_boxes
    }

    pub fn alert_state(&self, now: Instant) -> AlertState {
        self.alerts.snapshot(now)
    }

    /// Clears the background model, the frame window and the alert state.
    pub fn reset(&mut self) {
        self.motion.reset();
        self.window.clear();
        self.alerts.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::time::Duration;

    const SIZE: u32 = 120;

    /// Returns the same answer for every window and counts its calls.
    struct Fixed {
        answer: Result<ClassificationResult, ClassifierError>,
        k: usize,
        calls: usize,
    }

    impl FrameClassifier for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn sequence_length(&self) -> usize {
            self.k
        }

        fn predict(&mut self, frames: &[Frame]) -> Result<ClassificationResult, ClassifierError> {
            crate::core_modules::classifier::check_sequence_length(self.k, frames)?;
            self.calls += 1;
            self.answer.clone()
        }
    }

    fn frame(id: u64, square_at: Option<u32>) -> Frame {
        let mut img = RgbImage::from_pixel(SIZE, SIZE, Rgb([40, 40, 40]));
        if let Some(x0) = square_at {
            for y in 30..80 {
                for x in x0..x0 + 50 {
                    img.put_pixel(x, y, Rgb([230, 230, 230]));
                }
            }
        }
        Frame::new(id, img, PixelOrder::Rgb)
    }

    fn config() -> VigilConfig {
        let mut config = VigilConfig::default();
        config.alert.min_consecutive_violent_frames = 3;
        config
    }

    #[test]
    fn moving_object_is_boxed_and_outlined() {
        let mut pipeline = DetectionPipeline::new(&config(), 4);
        let t0 = Instant::now();
        for id in 0..10 {
            let report = pipeline.process_frame(frame(id, None), None, t0).unwrap();
            assert!(report.regions.is_empty());
        }
        let report = pipeline.process_frame(frame(10, Some(20)), None, t0).unwrap();
        assert_eq!(report.regions.len(), 1);
        let region = report.regions[0];
        assert!(region.x() <= 20 && region.x() + region.width() >= 70);
        assert!(!report.is_violence);
        assert_eq!(
            *report.annotated.image().get_pixel(region.x(), region.y() + 5),
            Rgb([0, 255, 0])
        );
    }

    #[test]
    fn classifier_runs_only_on_full_windows() {
        let mut pipeline = DetectionPipeline::new(&config(), 4);
        let mut classifier = Fixed {
            answer: ClassificationResult::new(Label::Violence, 0.9),
            k: 4,
            calls: 0,
        };
        let t0 = Instant::now();
        for id in 0..3 {
            let report = pipeline
                .process_frame(frame(id, None), Some(&mut classifier), t0)
                .unwrap();
            assert!(report.prediction.is_none());
        }
        let mut raised = false;
        for id in 3..6 {
            let t = t0 + Duration::from_millis(id * 30);
            let report = pipeline
                .process_frame(frame(id, None), Some(&mut classifier), t)
                .unwrap();
            let outcome = report.prediction.unwrap().unwrap();
            raised |= outcome.alert_started;
            assert_eq!(report.is_violence, outcome.is_violence);
        }
        assert_eq!(classifier.calls, 3);
        assert!(raised);
    }

    #[test]
    fn classifier_failure_keeps_the_alert_state() {
        let mut pipeline = DetectionPipeline::new(&config(), 1);
        let t0 = Instant::now();
        let mut good = Fixed {
            answer: ClassificationResult::new(Label::Violence, 0.9),
            k: 1,
            calls: 0,
        };
        pipeline.process_frame(frame(0, None), Some(&mut good), t0).unwrap();
        pipeline.process_frame(frame(1, None), Some(&mut good), t0).unwrap();
        let before = pipeline.alert_state(t0);

        let mut broken = Fixed {
            answer: Err(ClassifierError::Inference("tensor shape".into())),
            k: 1,
            calls: 0,
        };
        let report = pipeline.process_frame(frame(2, None), Some(&mut broken), t0).unwrap();
        assert!(matches!(report.prediction, Some(Err(ClassifierError::Inference(_)))));
        assert_eq!(pipeline.alert_state(t0), before);
        assert_eq!(before.violence_run_length, 2);
    }

    #[test]
    fn malformed_frame_fails_the_cycle() {
        let mut pipeline = DetectionPipeline::new(&config(), 4);
        let t0 = Instant::now();
        pipeline.process_frame(frame(0, None), None, t0).unwrap();
        let small = Frame::new(1, RgbImage::new(10, 10), PixelOrder::Rgb);
        let err = pipeline.process_frame(small, None, t0).unwrap_err();
        assert_eq!(err.severity(), crate::error::ErrorSeverity::SessionFatal);
    }

    #[test]
    fn manual_trigger_expiry_is_reported_without_a_classifier() {
        let mut pipeline = DetectionPipeline::new(&config(), 4);
        let t0 = Instant::now();
        let outcome = pipeline.trigger_violence(t0);
        assert!(outcome.alert_started);

        let report = pipeline.process_frame(frame(0, None), None, t0 + Duration::from_secs(1)).unwrap();
        assert!(report.is_violence);
        assert!(report.expiry.is_none());

        let report = pipeline.process_frame(frame(1, None), None, t0 + Duration::from_secs(3)).unwrap();
        assert!(!report.is_violence);
        assert!(report.expiry.unwrap().alert_cleared);
    }

    #[test]
    fn hidden_boxes_leave_the_frame_untouched() {
        let mut pipeline = DetectionPipeline::new(&config(), 4);
        pipeline.set_show_boxes(false);
        let t0 = Instant::now();
        for id in 0..10 {
            pipeline.process_frame(frame(id, None), None, t0).unwrap();
        }
        let moving = frame(10, Some(20));
        let report = pipeline.process_frame(moving.clone(), None, t0).unwrap();
        assert!(!report.regions.is_empty());
        assert_eq!(report.annotated.as_bytes(), moving.as_bytes());
    }

    #[test]
    fn reset_accepts_a_new_source_size() {
        let mut pipeline = DetectionPipeline::new(&config(), 4);
        let t0 = Instant::now();
        pipeline.process_frame(frame(0, None), None, t0).unwrap();
        pipeline.reset();
        let small = Frame::new(1, RgbImage::new(10, 10), PixelOrder::Rgb);
        assert!(pipeline.process_frame(small, None, t0).is_ok());
    }
}
