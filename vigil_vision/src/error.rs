// THEORY:
// Every failure the engine can produce is sorted into exactly one of three buckets,
// because the worker loop has exactly three reactions to a failure:
//
// 1.  **Recoverable**: skip what this cycle was doing, keep all state, carry on with
//     the next frame (a classifier hiccup on one window).
// 2.  **SessionFatal**: stop the loop and report (a frame the background model cannot
//     digest, a dead capture device).
// 3.  **ConfigurationInvalid**: refuse to start at all.
//
// Each concern owns its own error enum so call sites stay precise, and `PipelineError`
// folds them together for the worker, carrying the severity with it.

use thiserror::Error;

/// How the worker loop must react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Skip the current cycle's state update and continue with the next frame.
    Recoverable,
    /// Stop the session; the caller must restart with a consistent source.
    SessionFatal,
    /// Refuse to start.
    ConfigurationInvalid,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("unsupported channel count {0} (expected 3 or 4)")]
    UnsupportedChannels(u8),
    #[error("frame buffer holds {actual} bytes, expected {expected} for {width}x{height}x{channels}")]
    BufferSize {
        width: u32,
        height: u32,
        channels: u8,
        expected: usize,
        actual: usize,
    },
    #[error("frame has zero width or height")]
    Empty,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ForegroundError {
    #[error("frame is {actual:?} but the background model was built for {expected:?}")]
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClassifierError {
    #[error("expected a sequence of {expected} frames, got {actual}")]
    WrongSequenceLength { expected: usize, actual: usize },
    #[error("unknown class label {0:?}")]
    UnknownLabel(String),
    #[error("confidence {0} is outside [0, 1]")]
    InvalidConfidence(f32),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("failed to load model: {0}")]
    Load(String),
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open video source {identifier:?}: {reason}")]
    Open { identifier: String, reason: String },
    #[error("video source is not open")]
    NotOpen,
    #[error("failed to read frame: {0}")]
    Read(String),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// The union of everything that can go wrong inside one detection session.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Foreground(#[from] ForegroundError),
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("no tokio runtime available to host the detection worker")]
    NoRuntime,
}

impl ClassifierError {
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ClassifierError::Load(_) => ErrorSeverity::ConfigurationInvalid,
            _ => ErrorSeverity::Recoverable,
        }
    }
}

impl PipelineError {
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            PipelineError::Frame(_) | PipelineError::Foreground(_) | PipelineError::Source(_) => {
                ErrorSeverity::SessionFatal
            }
            PipelineError::Classifier(e) => e.severity(),
            PipelineError::Config(_) | PipelineError::NoRuntime => {
                ErrorSeverity::ConfigurationInvalid
            }
        }
    }
}
