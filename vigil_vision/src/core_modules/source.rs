// THEORY:
// The video source is the other external collaborator. The engine asks it for one
// frame at a time and treats `Ok(None)` as a clean end of stream. A device error is
// distinct from end of stream; both stop the session, but only the latter is
// "normal". Implementations own their device handle; the worker releases it exactly
// once, after its last read.

use std::collections::VecDeque;

use crate::core_modules::frame::Frame;
use crate::error::SourceError;

pub trait FrameSource: Send {
    /// Opens a camera index, file path or stream URL.
    fn open(&mut self, identifier: &str) -> Result<(), SourceError>;

    /// The next frame, or `Ok(None)` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError>;

    /// Releases the underlying device. Safe to call more than once.
    fn release(&mut self);

    /// Native frame rate, when the device reports one.
    fn fps(&self) -> Option<f64> {
        None
    }
}

/// Replays frames held in memory. Used for tests and for replaying decoded clips.
#[derive(Debug, Default)]
pub struct MemorySource {
    pending: VecDeque<Frame>,
    opened: Option<String>,
    released: bool,
    /// Fail with a read error after this many frames, to simulate a dying device.
    fail_after: Option<usize>,
    served: usize,
    fps: Option<f64>,
}

impl MemorySource {
    pub fn new(frames: impl IntoIterator<Item = Frame>) -> Self {
        Self {
            pending: frames.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn failing_after(mut self, frames: usize) -> Self {
        self.fail_after = Some(frames);
        self
    }

    /// Reports `fps` as the clip's native frame rate.
    pub fn with_fps(mut self, fps: f64) -> Self {
        self.fps = Some(fps);
        self
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Identifier passed to the last successful `open`.
    pub fn identifier(&self) -> Option<&str> {
        self.opened.as_deref()
    }
}

impl FrameSource for MemorySource {
    fn open(&mut self, identifier: &str) -> Result<(), SourceError> {
        if identifier.is_empty() {
            return Err(SourceError::Open {
                identifier: identifier.to_string(),
                reason: "empty identifier".to_string(),
            });
        }
        self.opened = Some(identifier.to_string());
        self.released = false;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        if self.opened.is_none() || self.released {
            return Err(SourceError::NotOpen);
        }
        if self.fail_after.is_some_and(|limit| self.served >= limit) {
            return Err(SourceError::Read("simulated device failure".to_string()));
        }
        let frame = self.pending.pop_front();
        if frame.is_some() {
            self.served += 1;
        }
        Ok(frame)
    }

    fn release(&mut self) {
        self.released = true;
    }

    fn fps(&self) -> Option<f64> {
        self.fps
    }
}
