use std::io::BufRead;
use std::thread;

use tokio::sync::mpsc;
use vigil_vision::{PerformanceMode, WorkerCommand};

pub const HELP: &str = "commands: v = trigger violence, n = trigger non-violence, \
b = toggle boxes, s = toggle alert sound, 1/2/3 = performance/balanced/quality, \
+/- = playback speed, q = quit";

const MIN_SPEED: f32 = 0.5;
const MAX_SPEED: f32 = 2.0;
const SPEED_STEP: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Control {
    Command(WorkerCommand),
    Quit,
}

/// Operator keys, one per line, with the toggles tracked locally.
pub struct KeyMap {
    show_boxes: bool,
    alert_sound: bool,
    speed: f32,
}

impl KeyMap {
    pub fn new(show_boxes: bool, alert_sound: bool, speed: f32) -> Self {
        Self {
            show_boxes,
            alert_sound,
            speed: speed.clamp(MIN_SPEED, MAX_SPEED),
        }
    }

    /// Steps the speed by one notch, rounded to one decimal to avoid drift.
    fn step_speed(&mut self, delta: f32) -> Control {
        let next = ((self.speed + delta) * 10.0).round() / 10.0;
        self.speed = next.clamp(MIN_SPEED, MAX_SPEED);
        Control::Command(WorkerCommand::SetPlaybackSpeed(self.speed))
    }

    pub fn interpret(&mut self, line: &str) -> Option<Control> {
        let control = match line.trim() {
            "v" => Control::Command(WorkerCommand::TriggerViolence),
            "n" => Control::Command(WorkerCommand::TriggerNonViolence),
            "b" => {
                self.show_boxes = !self.show_boxes;
                Control::Command(WorkerCommand::SetShowBoxes(self.show_boxes))
            }
            "s" => {
                self.alert_sound = !self.alert_sound;
                Control::Command(WorkerCommand::SetAlertSound(self.alert_sound))
            }
            "1" => Control::Command(WorkerCommand::SetPerformanceMode(PerformanceMode::Performance)),
            "2" => Control::Command(WorkerCommand::SetPerformanceMode(PerformanceMode::Balanced)),
            "3" => Control::Command(WorkerCommand::SetPerformanceMode(PerformanceMode::Quality)),
            "+" => self.step_speed(SPEED_STEP),
            "-" => self.step_speed(-SPEED_STEP),
            "q" => Control::Quit,
            _ => return None,
        };
        Some(control)
    }
}

/// Reads stdin on a plain thread; stdin reads block and never yield to tokio.
pub fn spawn_stdin_reader(mut keys: KeyMap) -> mpsc::UnboundedReceiver<Control> {
    let (tx, rx) = mpsc::unbounded_channel();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            match keys.interpret(&line) {
                Some(control) => {
                    if tx.send(control).is_err() {
                        break;
                    }
                }
                None => eprintln!("{HELP}"),
            }
        }
    });
    rx
}
