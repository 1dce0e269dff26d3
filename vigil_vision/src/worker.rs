// THEORY:
// The `worker` module runs one detection session in the background, off the thread
// that owns the user interface. It is the only concurrent part of the engine.
//
// Key architectural principles:
// 1.  **Exclusive Ownership**: The session loop owns the source, the classifier and
//     the `DetectionPipeline` (background model, frame window, alert state). Nothing
//     else can touch them while the loop runs, so no locks are needed.
// 2.  **Queued Commands In**: Manual triggers and toggles from the control side are
//     sent as `WorkerCommand`s over an unbounded channel and drained once per
//     iteration. This is the only cross-thread write path.
// 3.  **Fire-and-Forget Events Out**: Frames, predictions, alert edges, log lines and
//     errors leave as `WorkerEvent`s on an unbounded channel. The loop never waits
//     for a consumer; a dropped receiver is simply ignored.
// 4.  **Cooperative Cancellation**: A shared atomic token is checked once per
//     iteration. Stopping completes the in-flight iteration, then the loop releases
//     the source itself and resets the pipeline. `stop().await` returns only after
//     all of that has happened, so the source is never released while in use.
// 5.  **Blocking Work on a Blocking Thread**: Frame reads and inference block, so the
//     loop runs under `spawn_blocking` on the caller's tokio runtime.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{PerformanceMode, ProcessingSettings, VigilConfig};
use crate::core_modules::alert_state::AlertOutcome;
use crate::core_modules::classifier::FrameClassifier;
use crate::core_modules::frame::Frame;
use crate::core_modules::source::FrameSource;
use crate::error::{ErrorSeverity, PipelineError, SourceError};
use crate::logging::LogEvent;
use crate::pipeline::{CycleReport, DetectionPipeline};

/// Requests from the control side, applied at the start of the next iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WorkerCommand {
    TriggerViolence,
    TriggerNonViolence,
    SetShowBoxes(bool),
    SetAlertSound(bool),
    SetPerformanceMode(PerformanceMode),
    /// Playback multiplier; above 1.0 extra frames are skipped on top of the mode's skip.
    SetPlaybackSpeed(f32),
}

/// Notifications to the display, alert and log sinks.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// An annotated frame ready for display.
    FrameReady(Frame),
    /// The emitted label for a classified window or a manual trigger.
    PredictionReady(AlertOutcome),
    /// The effective alert flag changed.
    AlertChanged(bool),
    PlayAlertSound,
    Log(LogEvent),
    Error {
        message: String,
        severity: ErrorSeverity,
    },
    /// The source has no more frames (`reason` is `None`) or failed.
    StreamEnded { reason: Option<String> },
}

/// Frame rate assumed for sources that do not report one.
pub const FALLBACK_FPS: f64 = 30.0;

/// Extra frames to discard per read so playback runs `speed` times faster:
/// `floor((speed - 1) * fps / 10)`, never negative. Slower-than-real-time speeds
/// skip nothing.
pub fn playback_skip(speed: f32, fps: f64) -> u32 {
    let skip = (f64::from(speed) - 1.0) * fps / 10.0;
    if skip.is_finite() && skip > 0.0 {
        skip.floor() as u32
    } else {
        0
    }
}

/// Shared stop flag, checked once per loop iteration.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why a session loop ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ExitReason {
    Cancelled,
    EndOfStream,
    SourceFailed(String),
    /// A frame the pipeline could not digest.
    Fatal(String),
    /// The loop thread panicked.
    Aborted(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub frames_processed: u64,
    pub predictions: u64,
    pub exit: ExitReason,
}

/// Control side of a running session.
pub struct WorkerHandle {
    commands: mpsc::UnboundedSender<WorkerCommand>,
    cancel: CancellationToken,
    join: JoinHandle<SessionSummary>,
}

impl WorkerHandle {
    /// Queues a command. Returns `false` once the loop has exited.
    pub fn send(&self, command: WorkerCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn trigger_violence(&self) -> bool {
        self.send(WorkerCommand::TriggerViolence)
    }

    pub fn trigger_non_violence(&self) -> bool {
        self.send(WorkerCommand::TriggerNonViolence)
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Requests cancellation and waits for the loop to release its source.
    pub async fn stop(self) -> SessionSummary {
        self.cancel.cancel();
        self.wait().await
    }

    /// Waits for the loop to exit on its own, e.g. after `StreamEnded`.
    pub async fn wait(self) -> SessionSummary {
        match self.join.await {
            Ok(summary) => summary,
            Err(e) => {
                tracing::error!(error = %e, "detection loop aborted");
                SessionSummary {
                    frames_processed: 0,
                    predictions: 0,
                    exit: ExitReason::Aborted(e.to_string()),
                }
            }
        }
    }
}

pub struct DetectionWorker;

impl DetectionWorker {
    /// Validates the configuration, opens the source and starts the session loop
    /// on the current tokio runtime. Any failure here means the session never
    /// started.
    pub fn start(
        mut source: Box<dyn FrameSource>,
        identifier: &str,
        mut classifier: Option<Box<dyn FrameClassifier>>,
        config: &VigilConfig,
    ) -> Result<(WorkerHandle, mpsc::UnboundedReceiver<WorkerEvent>), PipelineError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| PipelineError::NoRuntime)?;

        let mode = config.worker.performance_mode;
        let sequence_length = match classifier.as_mut() {
            Some(classifier) => {
                classifier.warm_up()?;
                classifier.set_performance_mode(mode);
                classifier.sequence_length()
            }
            None => config.classifier.sequence_length,
        };

        source.open(identifier)?;
        let source_fps = source.fps().filter(|fps| *fps > 0.0).unwrap_or(FALLBACK_FPS);
        tracing::info!(
            source = identifier,
            classifier = classifier.as_ref().map(|c| c.name()).unwrap_or("none"),
            mode = mode.as_str(),
            fps = source_fps,
            "detection session starting"
        );

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let session = SessionLoop {
            source,
            classifier,
            pipeline: DetectionPipeline::new(config, sequence_length),
            commands: command_rx,
            events: event_tx,
            cancel: cancel.clone(),
            settings: mode.settings(),
            playback_speed: config.worker.playback_speed,
            source_fps,
            alert_sound: config.alert.alert_sound_enabled,
            loop_sleep: config.worker.loop_sleep(),
            frames_processed: 0,
            predictions: 0,
        };
        let join = runtime.spawn_blocking(move || session.run());

        Ok((
            WorkerHandle {
                commands: command_tx,
                cancel,
                join,
            },
            event_rx,
        ))
    }
}

struct SessionLoop {
    source: Box<dyn FrameSource>,
    classifier: Option<Box<dyn FrameClassifier>>,
    pipeline: DetectionPipeline,
    commands: mpsc::UnboundedReceiver<WorkerCommand>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    cancel: CancellationToken,
    settings: ProcessingSettings,
    playback_speed: f32,
    source_fps: f64,
    alert_sound: bool,
    loop_sleep: Duration,
    frames_processed: u64,
    predictions: u64,
}

impl SessionLoop {
    fn run(mut self) -> SessionSummary {
        self.log("Detection started");

        let exit = loop {
            if self.cancel.is_cancelled() {
                break ExitReason::Cancelled;
            }
            self.drain_commands();

            let frame = match self.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    tracing::info!("video source reached end of stream");
                    self.emit(WorkerEvent::StreamEnded { reason: None });
                    break ExitReason::EndOfStream;
                }
                Err(e) => {
                    tracing::error!(error = %e, "video source failed");
                    self.emit(WorkerEvent::StreamEnded {
                        reason: Some(e.to_string()),
                    });
                    break ExitReason::SourceFailed(e.to_string());
                }
            };

            let classifier = self
                .classifier
                .as_mut()
                .map(|c| c.as_mut() as &mut dyn FrameClassifier);
            match self.pipeline.process_frame(frame, classifier, Instant::now()) {
                Ok(report) => self.publish(report),
                Err(e) => {
                    let severity = e.severity();
                    tracing::error!(error = %e, ?severity, "frame rejected");
                    self.emit(WorkerEvent::Error {
                        message: format!("Worker error: {e}"),
                        severity,
                    });
                    if severity != ErrorSeverity::Recoverable {
                        break ExitReason::Fatal(e.to_string());
                    }
                }
            }

            std::thread::sleep(self.loop_sleep);
        };

        self.source.release();
        self.pipeline.reset();
        self.log("Detection stopped");
        tracing::info!(
            frames = self.frames_processed,
            predictions = self.predictions,
            ?exit,
            "detection session finished"
        );

        SessionSummary {
            frames_processed: self.frames_processed,
            predictions: self.predictions,
            exit,
        }
    }

    /// Reads `skip + 1` frames and keeps the last one, where `skip` combines the
    /// performance mode and the playback speed.
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        let skip = self.settings.frame_skip + playback_skip(self.playback_speed, self.source_fps);
        let mut latest = None;
        for _ in 0..=skip {
            match self.source.next_frame()? {
                Some(frame) => latest = Some(frame),
                None => break,
            }
        }
        Ok(latest)
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            tracing::debug!(?command, "applying command");
            match command {
                WorkerCommand::TriggerViolence => {
                    let outcome = self.pipeline.trigger_violence(Instant::now());
                    self.log("Manual violence detection triggered");
                    self.emit(WorkerEvent::PredictionReady(outcome));
                    self.on_outcome(&outcome);
                }
                WorkerCommand::TriggerNonViolence => {
                    let outcome = self.pipeline.trigger_non_violence(Instant::now());
                    self.log("Manual non-violence state triggered");
                    self.emit(WorkerEvent::PredictionReady(outcome));
                    self.on_outcome(&outcome);
                }
                WorkerCommand::SetShowBoxes(show) => self.pipeline.set_show_boxes(show),
                WorkerCommand::SetAlertSound(enabled) => self.alert_sound = enabled,
                WorkerCommand::SetPerformanceMode(mode) => {
                    self.settings = mode.settings();
                    if let Some(classifier) = self.classifier.as_mut() {
                        classifier.set_performance_mode(mode);
                    }
                    self.log(format!("Performance mode changed to {}", mode.as_str()));
                }
                WorkerCommand::SetPlaybackSpeed(speed) => {
                    if speed.is_finite() && speed > 0.0 {
                        self.playback_speed = speed;
                        self.log(format!("Playback speed changed to {speed:.1}x"));
                    } else {
                        tracing::warn!(speed, "ignoring invalid playback speed");
                    }
                }
            }
        }
    }

    fn publish(&mut self, report: CycleReport) {
        self.frames_processed += 1;
        self.emit(WorkerEvent::FrameReady(report.annotated));

        match report.prediction {
            Some(Ok(outcome)) => {
                self.predictions += 1;
                self.emit(WorkerEvent::PredictionReady(outcome));
                self.on_outcome(&outcome);
            }
            Some(Err(e)) => self.emit(WorkerEvent::Error {
                message: format!("Detection error: {e}"),
                severity: e.severity(),
            }),
            None => {}
        }

        if let Some(outcome) = report.expiry {
            self.emit(WorkerEvent::PredictionReady(outcome));
            self.on_outcome(&outcome);
        }
    }

    fn on_outcome(&mut self, outcome: &AlertOutcome) {
        if outcome.alert_started {
            self.emit(WorkerEvent::AlertChanged(true));
            self.log(format!(
                "Violence detected (Confidence: {:.2})",
                outcome.confidence
            ));
            if self.alert_sound {
                self.emit(WorkerEvent::PlayAlertSound);
            }
        }
        if outcome.alert_cleared {
            self.emit(WorkerEvent::AlertChanged(false));
            self.log("Alert cleared");
        }
    }

    fn log(&self, message: impl Into<String>) {
        self.emit(WorkerEvent::Log(LogEvent::now(message)));
    }

    fn emit(&self, event: WorkerEvent) {
        // A closed receiver only means nobody is listening any more.
        let _ = self.events.send(event);
    }
}
