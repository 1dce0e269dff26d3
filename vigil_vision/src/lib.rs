// THEORY:
// `vigil_vision` turns a stream of camera frames into motion regions and a
// debounced violence alert. Everything a front end (the tester binary, a desktop
// shell) needs is reachable from here.
//
// Two levels of API are offered:
// - `pipeline::DetectionPipeline`: synchronous, one call per frame, for callers that
//   already own a loop.
// - `worker::DetectionWorker`: a background session over a `FrameSource`, talking to
//   the caller only through commands and events.
//
// The building blocks in `core_modules` stay public so that each layer can be used
// and tested on its own, but most consumers only need the re-exports below.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod worker;

pub use crate::config::{PerformanceMode, VigilConfig};
pub use crate::core_modules::classifier::{ClassificationResult, FrameClassifier, Label};
pub use crate::core_modules::frame::{Frame, PixelOrder};
pub use crate::core_modules::source::{FrameSource, MemorySource};
#[cfg(feature = "backend-tract")]
pub use crate::core_modules::tract_classifier::OnnxClassifier;
pub use crate::error::{ErrorSeverity, PipelineError};
pub use crate::pipeline::{CycleReport, DetectionPipeline, MotionDetector};
pub use crate::worker::{
    CancellationToken, DetectionWorker, ExitReason, SessionSummary, WorkerCommand, WorkerEvent,
    WorkerHandle,
};
