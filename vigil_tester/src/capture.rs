use opencv::{
    core::{self, Mat, Scalar},
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoWriter},
};
use vigil_vision::core_modules::source::FrameSource;
use vigil_vision::error::SourceError;
use vigil_vision::{Frame, PixelOrder};

/// Camera index or video file, read through OpenCV. Frames come out in BGR order.
#[derive(Default)]
pub struct OpenCvSource {
    capture: Option<VideoCapture>,
    buffer: Mat,
    next_id: u64,
}

impl FrameSource for OpenCvSource {
    fn open(&mut self, identifier: &str) -> Result<(), SourceError> {
        let open_error = |reason: String| SourceError::Open {
            identifier: identifier.to_string(),
            reason,
        };

        // A bare integer is a camera index, anything else a file or stream URL.
        let capture = match identifier.parse::<i32>() {
            Ok(index) => VideoCapture::new(index, videoio::CAP_ANY),
            Err(_) => VideoCapture::from_file(identifier, videoio::CAP_ANY),
        }
        .map_err(|e| open_error(e.to_string()))?;

        if !capture.is_opened().map_err(|e| open_error(e.to_string()))? {
            return Err(open_error("device could not be opened".to_string()));
        }
        self.capture = Some(capture);
        self.next_id = 0;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        let capture = self.capture.as_mut().ok_or(SourceError::NotOpen)?;
        let grabbed = capture
            .read(&mut self.buffer)
            .map_err(|e| SourceError::Read(e.to_string()))?;
        if !grabbed || self.buffer.empty() {
            return Ok(None);
        }

        let bytes = self
            .buffer
            .data_bytes()
            .map_err(|e| SourceError::Read(e.to_string()))?;
        let frame = Frame::from_raw(
            self.next_id,
            self.buffer.cols() as u32,
            self.buffer.rows() as u32,
            self.buffer.channels() as u8,
            bytes,
            PixelOrder::Bgr,
        )?;
        self.next_id += 1;
        Ok(Some(frame))
    }

    fn release(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            if let Err(e) = capture.release() {
                tracing::warn!(error = %e, "failed to release capture device");
            }
        }
    }

    fn fps(&self) -> Option<f64> {
        // Cameras often report 0; the worker falls back to a default then.
        let fps = self.capture.as_ref()?.get(videoio::CAP_PROP_FPS).ok()?;
        (fps > 0.0).then_some(fps)
    }
}

/// A camera index that opened and, when it delivered a frame, its resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraInfo {
    pub index: i32,
    pub resolution: Option<(i32, i32)>,
}

impl std::fmt::Display for CameraInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self.index {
            0 => "Default Camera".to_string(),
            i => format!("Camera {i}"),
        };
        match self.resolution {
            Some((w, h)) => write!(f, "{}: {name} ({w}x{h})", self.index),
            None => write!(f, "{}: {name}", self.index),
        }
    }
}

/// Probes camera indices `0..limit`. Probing opens each device, so the limit
/// stays small.
pub fn list_cameras(limit: i32) -> Vec<CameraInfo> {
    let mut found = Vec::new();
    for index in 0..limit {
        let mut capture = match VideoCapture::new(index, videoio::CAP_ANY) {
            Ok(capture) => capture,
            Err(e) => {
                tracing::debug!(index, error = %e, "camera probe failed");
                continue;
            }
        };
        if !capture.is_opened().unwrap_or(false) {
            continue;
        }
        let mut frame = Mat::default();
        let grabbed = capture.read(&mut frame).unwrap_or(false) && !frame.empty();
        let resolution = grabbed.then(|| (frame.cols(), frame.rows()));
        found.push(CameraInfo { index, resolution });
        if let Err(e) = capture.release() {
            tracing::warn!(index, error = %e, "failed to release probed camera");
        }
    }
    found
}

/// Writes annotated frames to a video file. The writer is created on the first
/// frame, once the frame size is known.
pub struct VideoSink {
    path: String,
    fps: f64,
    writer: Option<VideoWriter>,
    written: u64,
}

impl VideoSink {
    pub fn new(path: impl Into<String>, fps: f64) -> Self {
        Self {
            path: path.into(),
            fps,
            writer: None,
            written: 0,
        }
    }

    pub fn write(&mut self, frame: &Frame) -> opencv::Result<()> {
        let (width, height) = frame.dimensions();

        let mut mat = Mat::new_rows_cols_with_default(
            height as i32,
            width as i32,
            core::CV_8UC3,
            Scalar::all(0.0),
        )?;
        mat.data_bytes_mut()?.copy_from_slice(frame.as_bytes());
        if frame.order == PixelOrder::Rgb {
            let mut bgr = Mat::default();
            imgproc::cvt_color(&mat, &mut bgr, imgproc::COLOR_RGB2BGR, 0)?;
            mat = bgr;
        }

        if self.writer.is_none() {
            let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')?;
            self.writer = Some(VideoWriter::new(
                &self.path,
                fourcc,
                self.fps,
                core::Size::new(width as i32, height as i32),
                true,
            )?);
        }
        if let Some(writer) = self.writer.as_mut() {
            writer.write(&mat)?;
        }
        self.written += 1;
        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.written
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}
