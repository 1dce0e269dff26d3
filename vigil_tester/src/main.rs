use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use vigil_vision::logging::init_logging;
use vigil_vision::{
    DetectionWorker, ExitReason, FrameClassifier, SessionSummary, VigilConfig, WorkerEvent,
};

mod capture;
mod controls;

use capture::{OpenCvSource, VideoSink, list_cameras};
use controls::{Control, HELP, KeyMap, spawn_stdin_reader};

#[derive(Parser, Debug)]
#[command(author, version, about = "Runs a detection session on a camera or video file")]
struct Args {
    /// Camera index (e.g. `0`) or path to a video file.
    #[arg(required_unless_present = "list_cameras")]
    input: Option<String>,
    /// Print the cameras that can be opened and exit.
    #[arg(long)]
    list_cameras: bool,
    /// Playback speed multiplier, overriding `worker.playback_speed`.
    #[arg(long)]
    speed: Option<f32>,
    /// Optional output video for the annotated stream.
    #[arg(long)]
    output: Option<String>,
    /// Frame rate of the output video.
    #[arg(long, default_value_t = 30.0)]
    output_fps: f64,
    /// TOML configuration file (defaults to ./vigil.toml when present).
    #[arg(long)]
    config: Option<PathBuf>,
    /// ONNX model, overriding `classifier.model_path`.
    #[arg(long)]
    model: Option<PathBuf>,
    /// Run motion detection only, without a classifier.
    #[arg(long)]
    motion_only: bool,
}

/// Indices probed by `--list-cameras`.
const CAMERA_PROBE_LIMIT: i32 = 2;

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Argument Parsing & Setup ---
    let args = Args::parse();
    let mut config = VigilConfig::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(speed) = args.speed {
        config.worker.playback_speed = speed;
    }
    init_logging(&config.logging);

    if args.list_cameras {
        let cameras = list_cameras(CAMERA_PROBE_LIMIT);
        if cameras.is_empty() {
            println!("No cameras found.");
        }
        for camera in cameras {
            println!("{camera}");
        }
        return Ok(());
    }
    let input = args
        .input
        .clone()
        .context("an input camera index or video path is required")?;

    // --- 2. Classifier & Video I/O Initialization ---
    let classifier = if args.motion_only {
        None
    } else {
        build_classifier(&args, &config)?
    };
    let mut sink = args
        .output
        .as_ref()
        .map(|path| VideoSink::new(path.clone(), args.output_fps));

    // --- 3. Detection Session ---
    let (handle, mut events) = DetectionWorker::start(
        Box::new(OpenCvSource::default()),
        &input,
        classifier,
        &config,
    )
    .with_context(|| format!("starting detection on {input}"))?;

    eprintln!("{HELP}");
    let mut controls = spawn_stdin_reader(KeyMap::new(
        config.worker.show_motion_boxes,
        config.alert.alert_sound_enabled,
        config.worker.playback_speed,
    ));

    // --- 4. Main Event Loop ---
    // The event channel closes once the worker has exited and released the source.
    let mut quitting = false;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => handle_event(event, sink.as_mut()),
                None => break,
            },
            Some(control) = controls.recv(), if !quitting => match control {
                Control::Command(command) => {
                    handle.send(command);
                }
                Control::Quit => {
                    quitting = true;
                    handle.cancellation_token().cancel();
                }
            },
        }
    }

    let summary = handle.wait().await;
    report(&summary, sink.as_ref());
    match summary.exit {
        ExitReason::SourceFailed(reason) | ExitReason::Fatal(reason) | ExitReason::Aborted(reason) => {
            Err(anyhow::anyhow!("detection session failed: {reason}"))
        }
        ExitReason::Cancelled | ExitReason::EndOfStream => Ok(()),
    }
}

fn handle_event(event: WorkerEvent, sink: Option<&mut VideoSink>) {
    match event {
        WorkerEvent::FrameReady(frame) => {
            if let Some(sink) = sink {
                if let Err(e) = sink.write(&frame) {
                    tracing::error!(error = %e, path = sink.path(), "failed to write frame");
                }
            }
        }
        WorkerEvent::PredictionReady(outcome) => {
            tracing::debug!(label = %outcome.label, confidence = outcome.confidence, "prediction");
        }
        WorkerEvent::AlertChanged(active) => {
            println!("ALERT {}", if active { "ON" } else { "OFF" });
        }
        WorkerEvent::PlayAlertSound => {
            let mut stdout = std::io::stdout();
            let _ = stdout.write_all(b"\x07");
            let _ = stdout.flush();
        }
        WorkerEvent::Log(line) => println!("{line}"),
        WorkerEvent::Error { message, severity } => {
            eprintln!("Error ({severity:?}): {message}");
        }
        WorkerEvent::StreamEnded { reason } => match reason {
            Some(reason) => eprintln!("Stream ended: {reason}"),
            None => println!("Stream ended."),
        },
    }
}

fn report(summary: &SessionSummary, sink: Option<&VideoSink>) {
    println!(
        "Processed {} frames, {} predictions ({:?}).",
        summary.frames_processed, summary.predictions, summary.exit
    );
    if let Some(sink) = sink {
        println!(
            "Wrote {} frames to {}",
            sink.frames_written(),
            sink.path()
        );
    }
}

#[cfg(feature = "backend-tract")]
fn build_classifier(args: &Args, config: &VigilConfig) -> Result<Option<Box<dyn FrameClassifier>>> {
    let mut classifier_config = config.classifier.clone();
    if let Some(model) = &args.model {
        classifier_config.model_path = model.clone();
    }
    let classifier = vigil_vision::OnnxClassifier::load(&classifier_config).with_context(|| {
        format!(
            "loading classifier from {}",
            classifier_config.model_path.display()
        )
    })?;
    Ok(Some(Box::new(classifier)))
}

#[cfg(not(feature = "backend-tract"))]
fn build_classifier(args: &Args, _config: &VigilConfig) -> Result<Option<Box<dyn FrameClassifier>>> {
    if args.model.is_some() {
        tracing::warn!("built without the `backend-tract` feature; ignoring --model");
    }
    tracing::warn!("no classifier backend compiled in, running motion detection only");
    Ok(None)
}
