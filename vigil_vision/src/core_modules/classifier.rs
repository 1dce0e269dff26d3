// THEORY:
// The classifier is an external collaborator: the engine only knows that, given a
// window of exactly K consecutive frames, something answers "Violence" or
// "NonViolence" with a confidence. Keeping it behind a trait lets the worker run a
// real model, a scripted test double, or no classifier at all (motion only).

use std::fmt;
use std::str::FromStr;

use crate::config::PerformanceMode;
use crate::core_modules::frame::Frame;
use crate::error::ClassifierError;

/// The two classes a window of frames can be assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    Violence,
    NonViolence,
}

impl Label {
    pub fn as_str(self) -> &'static str {
        match self {
            Label::Violence => "Violence",
            Label::NonViolence => "NonViolence",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Label {
    type Err = ClassifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Violence" => Ok(Label::Violence),
            "NonViolence" => Ok(Label::NonViolence),
            other => Err(ClassifierError::UnknownLabel(other.to_string())),
        }
    }
}

/// One answer from the classifier for one window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassificationResult {
    pub label: Label,
    /// Always within `[0, 1]`.
    pub confidence: f32,
}

impl ClassificationResult {
    pub fn new(label: Label, confidence: f32) -> Result<Self, ClassifierError> {
        if !(0.0..=1.0).contains(&confidence) {
            // NaN fails `contains` as well.
            return Err(ClassifierError::InvalidConfidence(confidence));
        }
        Ok(Self { label, confidence })
    }

    /// `Violence` with a confidence strictly above `threshold`.
    pub fn is_qualifying(&self, threshold: f32) -> bool {
        self.label == Label::Violence && self.confidence > threshold
    }
}

/// A sequence classifier over fixed-length frame windows.
pub trait FrameClassifier: Send {
    /// Backend identifier, for logs.
    fn name(&self) -> &str;

    /// The exact number of frames `predict` expects.
    fn sequence_length(&self) -> usize;

    /// Classifies one window, oldest frame first.
    fn predict(&mut self, frames: &[Frame]) -> Result<ClassificationResult, ClassifierError>;

    /// Lets the backend trade accuracy for speed. Ignored by default.
    fn set_performance_mode(&mut self, _mode: PerformanceMode) {}

    /// Optional warm-up hook, run once before the first window.
    fn warm_up(&mut self) -> Result<(), ClassifierError> {
        Ok(())
    }
}

/// Rejects a window whose length differs from what the model was built for.
pub fn check_sequence_length(expected: usize, frames: &[Frame]) -> Result<(), ClassifierError> {
    if frames.len() != expected {
        return Err(ClassifierError::WrongSequenceLength {
            expected,
            actual: frames.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_round_trip_through_their_names() {
        for label in [Label::Violence, Label::NonViolence] {
            assert_eq!(label.to_string().parse::<Label>().unwrap(), label);
        }
        assert_eq!(
            "violence".parse::<Label>().unwrap_err(),
            ClassifierError::UnknownLabel("violence".into())
        );
    }

    #[test]
    fn confidence_must_be_a_probability() {
        assert!(ClassificationResult::new(Label::Violence, 0.0).is_ok());
        assert!(ClassificationResult::new(Label::Violence, 1.0).is_ok());
        assert!(ClassificationResult::new(Label::Violence, 1.01).is_err());
        assert!(ClassificationResult::new(Label::Violence, -0.1).is_err());
        assert!(ClassificationResult::new(Label::Violence, f32::NAN).is_err());
    }

    #[test]
    fn qualifying_needs_violence_above_the_threshold() {
        let at = ClassificationResult::new(Label::Violence, 0.5).unwrap();
        let above = ClassificationResult::new(Label::Violence, 0.51).unwrap();
        let calm = ClassificationResult::new(Label::NonViolence, 0.99).unwrap();
        assert!(!at.is_qualifying(0.5));
        assert!(above.is_qualifying(0.5));
        assert!(!calm.is_qualifying(0.5));
    }

    #[test]
    fn sequence_length_is_checked_exactly() {
        assert!(check_sequence_length(0, &[]).is_ok());
        assert_eq!(
            check_sequence_length(16, &[]).unwrap_err(),
            ClassifierError::WrongSequenceLength {
                expected: 16,
                actual: 0
            }
        );
    }
}
