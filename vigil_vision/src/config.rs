//! Startup configuration.
//!
//! Loaded from an optional TOML file with environment overrides layered on top.
//! Env format: `VIGIL__SECTION__KEY` (double underscore separators), e.g.
//! `VIGIL__ALERT__COOLDOWN_SECONDS=5`.
//!
//! The engine only ever reads this; nothing in the core writes configuration back.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::core_modules::classifier::Label;
use crate::error::ConfigError;

const DEFAULT_CONFIG_NAME: &str = "vigil";
const ENV_PREFIX: &str = "VIGIL";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VigilConfig {
    #[serde(default)]
    pub motion: MotionConfig,
    #[serde(default)]
    pub alert: AlertConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Tunables for the Foreground Extractor and the Region Consolidator.
#[derive(Debug, Clone, Deserialize)]
pub struct MotionConfig {
    /// Number of frames the background model effectively remembers.
    #[serde(default = "default_history")]
    pub history: u32,
    /// Squared-deviation multiple of the pixel variance above which a pixel is foreground.
    /// Lower is more sensitive.
    #[serde(default = "default_var_threshold")]
    pub var_threshold: f32,
    #[serde(default = "default_erode_iterations")]
    pub erode_iterations: u8,
    #[serde(default = "default_dilate_iterations")]
    pub dilate_iterations: u8,
    /// Blobs with fewer foreground pixels than this never become regions.
    #[serde(default = "default_min_motion_area")]
    pub min_motion_area: u32,
    /// One-sided overlap ratio above which a smaller box is suppressed by a larger one.
    #[serde(default = "default_overlap_suppression_threshold")]
    pub overlap_suppression_threshold: f64,
}

fn default_history() -> u32 {
    50
}
fn default_var_threshold() -> f32 {
    32.0
}
fn default_erode_iterations() -> u8 {
    2
}
fn default_dilate_iterations() -> u8 {
    3
}
fn default_min_motion_area() -> u32 {
    1000
}
fn default_overlap_suppression_threshold() -> f64 {
    0.3
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            history: default_history(),
            var_threshold: default_var_threshold(),
            erode_iterations: default_erode_iterations(),
            dilate_iterations: default_dilate_iterations(),
            min_motion_area: default_min_motion_area(),
            overlap_suppression_threshold: default_overlap_suppression_threshold(),
        }
    }
}

/// Tunables for the Alert State Machine.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertConfig {
    #[serde(default = "default_violence_activation_confidence")]
    pub violence_activation_confidence: f32,
    #[serde(default = "default_min_consecutive_violent_frames")]
    pub min_consecutive_violent_frames: u32,
    /// Wall-clock seconds without a qualifying result before an alert stands down.
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: f64,
    #[serde(default = "default_manual_violence_persist_seconds")]
    pub manual_violence_persist_seconds: f64,
    #[serde(default = "default_manual_non_violence_persist_seconds")]
    pub manual_non_violence_persist_seconds: f64,
    #[serde(default = "default_alert_sound_enabled")]
    pub alert_sound_enabled: bool,
}

fn default_violence_activation_confidence() -> f32 {
    0.5
}
fn default_min_consecutive_violent_frames() -> u32 {
    15
}
fn default_cooldown_seconds() -> f64 {
    3.0
}
fn default_manual_violence_persist_seconds() -> f64 {
    3.0
}
fn default_manual_non_violence_persist_seconds() -> f64 {
    1.0
}
fn default_alert_sound_enabled() -> bool {
    true
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            violence_activation_confidence: default_violence_activation_confidence(),
            min_consecutive_violent_frames: default_min_consecutive_violent_frames(),
            cooldown_seconds: default_cooldown_seconds(),
            manual_violence_persist_seconds: default_manual_violence_persist_seconds(),
            manual_non_violence_persist_seconds: default_manual_non_violence_persist_seconds(),
            alert_sound_enabled: default_alert_sound_enabled(),
        }
    }
}

impl AlertConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.cooldown_seconds)
    }

    pub fn manual_violence_persist(&self) -> Duration {
        Duration::from_secs_f64(self.manual_violence_persist_seconds)
    }

    pub fn manual_non_violence_persist(&self) -> Duration {
        Duration::from_secs_f64(self.manual_non_violence_persist_seconds)
    }
}

/// Trade-off between throughput and fidelity, selectable at runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceMode {
    Performance,
    #[default]
    Balanced,
    Quality,
}

/// What a performance mode means for the capture loop and the classifier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessingSettings {
    /// Frames read and discarded before each processed frame.
    pub frame_skip: u32,
    /// Downscale applied to frames before classifier preprocessing.
    pub resize_factor: f32,
}

impl PerformanceMode {
    pub fn settings(self) -> ProcessingSettings {
        match self {
            PerformanceMode::Performance => ProcessingSettings {
                frame_skip: 2,
                resize_factor: 0.5,
            },
            PerformanceMode::Balanced => ProcessingSettings {
                frame_skip: 1,
                resize_factor: 0.75,
            },
            PerformanceMode::Quality => ProcessingSettings {
                frame_skip: 0,
                resize_factor: 1.0,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PerformanceMode::Performance => "Performance",
            PerformanceMode::Balanced => "Balanced",
            PerformanceMode::Quality => "Quality",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Pause between loop iterations, caps CPU usage.
    #[serde(default = "default_loop_sleep_ms")]
    pub loop_sleep_ms: u64,
    #[serde(default)]
    pub performance_mode: PerformanceMode,
    #[serde(default = "default_show_motion_boxes")]
    pub show_motion_boxes: bool,
    /// Playback multiplier for recorded video. Speeds above 1.0 skip frames.
    #[serde(default = "default_playback_speed")]
    pub playback_speed: f32,
}

fn default_loop_sleep_ms() -> u64 {
    10
}
fn default_show_motion_boxes() -> bool {
    true
}
fn default_playback_speed() -> f32 {
    1.0
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            loop_sleep_ms: default_loop_sleep_ms(),
            performance_mode: PerformanceMode::default(),
            show_motion_boxes: default_show_motion_boxes(),
            playback_speed: default_playback_speed(),
        }
    }
}

impl WorkerConfig {
    pub fn loop_sleep(&self) -> Duration {
        Duration::from_millis(self.loop_sleep_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,
    #[serde(default = "default_sequence_length")]
    pub sequence_length: usize,
    #[serde(default = "default_input_size")]
    pub input_width: u32,
    #[serde(default = "default_input_size")]
    pub input_height: u32,
    /// Class names in model output order.
    #[serde(default = "default_classes")]
    pub classes: Vec<String>,
}

fn default_model_path() -> PathBuf {
    PathBuf::from("models/violence_detection.onnx")
}
fn default_sequence_length() -> usize {
    16
}
fn default_input_size() -> u32 {
    64
}
fn default_classes() -> Vec<String> {
    vec!["NonViolence".to_string(), "Violence".to_string()]
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            sequence_length: default_sequence_length(),
            input_width: default_input_size(),
            input_height: default_input_size(),
            classes: default_classes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// When set, logs are also written to a daily rolling file in this directory.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_dir: None,
        }
    }
}

impl VigilConfig {
    /// Load configuration from a TOML file plus environment variable overrides.
    ///
    /// Search order:
    ///   1. `path` if given (must exist), else `./vigil.toml` if present
    ///   2. Environment variables: `VIGIL__MOTION__MIN_MOTION_AREA`, etc.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_NAME).required(false),
        };
        let settings = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let cfg: VigilConfig = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse configuration from TOML text, without environment overrides.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: VigilConfig = config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let m = &self.motion;
        if m.history == 0 {
            return Err(invalid("motion.history", "must be at least 1"));
        }
        if !(m.var_threshold.is_finite() && m.var_threshold > 0.0) {
            return Err(invalid("motion.var_threshold", "must be a positive number"));
        }
        if !(m.overlap_suppression_threshold > 0.0 && m.overlap_suppression_threshold <= 1.0) {
            return Err(invalid(
                "motion.overlap_suppression_threshold",
                "must be in (0, 1]",
            ));
        }

        let a = &self.alert;
        if !(0.0..=1.0).contains(&a.violence_activation_confidence) {
            return Err(invalid(
                "alert.violence_activation_confidence",
                "must be in [0, 1]",
            ));
        }
        if a.min_consecutive_violent_frames == 0 {
            return Err(invalid(
                "alert.min_consecutive_violent_frames",
                "must be at least 1",
            ));
        }
        for (field, seconds) in [
            ("alert.cooldown_seconds", a.cooldown_seconds),
            ("alert.manual_violence_persist_seconds", a.manual_violence_persist_seconds),
            (
                "alert.manual_non_violence_persist_seconds",
                a.manual_non_violence_persist_seconds,
            ),
        ] {
            // Rejects NaN, negatives and values too large for a `Duration`.
            if Duration::try_from_secs_f64(seconds).is_err() {
                return Err(invalid(field, "must be a representable non-negative number of seconds"));
            }
        }

        let speed = self.worker.playback_speed;
        if !(speed.is_finite() && speed > 0.0) {
            return Err(invalid("worker.playback_speed", "must be a positive multiplier"));
        }

        let c = &self.classifier;
        if c.sequence_length == 0 {
            return Err(invalid("classifier.sequence_length", "must be at least 1"));
        }
        if c.input_width == 0 || c.input_height == 0 {
            return Err(invalid("classifier.input_width", "input size must be non-zero"));
        }
        if c.classes.is_empty() {
            return Err(invalid("classifier.classes", "must list at least one class"));
        }
        if let Some(bad) = c.classes.iter().find(|name| name.parse::<Label>().is_err()) {
            return Err(invalid(
                "classifier.classes",
                &format!("unknown class {bad:?}"),
            ));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_tunables() {
        let cfg = VigilConfig::default();
        cfg.validate().expect("defaults must validate");
        assert_eq!(cfg.motion.min_motion_area, 1000);
        assert_eq!(cfg.motion.overlap_suppression_threshold, 0.3);
        assert_eq!(cfg.alert.min_consecutive_violent_frames, 15);
        assert_eq!(cfg.alert.cooldown(), Duration::from_secs(3));
        assert_eq!(cfg.alert.manual_violence_persist(), Duration::from_secs(3));
        assert_eq!(cfg.alert.manual_non_violence_persist(), Duration::from_secs(1));
        assert_eq!(cfg.worker.performance_mode, PerformanceMode::Balanced);
        assert_eq!(cfg.worker.playback_speed, 1.0);
    }

    #[test]
    fn partial_toml_keeps_remaining_defaults() {
        let cfg = VigilConfig::from_toml_str(
            r#"
            [alert]
            violence_activation_confidence = 0.65
            cooldown_seconds = 5.0

            [worker]
            performance_mode = "quality"
            "#,
        )
        .expect("valid config");
        assert_eq!(cfg.alert.violence_activation_confidence, 0.65);
        assert_eq!(cfg.alert.cooldown(), Duration::from_secs(5));
        assert_eq!(cfg.alert.min_consecutive_violent_frames, 15);
        assert_eq!(cfg.worker.performance_mode, PerformanceMode::Quality);
        assert_eq!(cfg.motion.history, 50);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let err = VigilConfig::from_toml_str("[alert]\nviolence_activation_confidence = 1.5\n")
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "alert.violence_activation_confidence",
                ..
            }
        ));

        let err = VigilConfig::from_toml_str("[motion]\noverlap_suppression_threshold = 0.0\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));

        let err = VigilConfig::from_toml_str("[classifier]\nclasses = [\"Fight\"]\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "classifier.classes",
                ..
            }
        ));
    }

    #[test]
    fn unrepresentable_durations_are_rejected() {
        let err = VigilConfig::from_toml_str("[alert]\ncooldown_seconds = 1e20\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "alert.cooldown_seconds",
                ..
            }
        ));

        let err = VigilConfig::from_toml_str("[alert]\nmanual_violence_persist_seconds = -1.0\n")
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "alert.manual_violence_persist_seconds",
                ..
            }
        ));

        let mut cfg = VigilConfig::default();
        cfg.alert.manual_non_violence_persist_seconds = f64::INFINITY;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_reads_explicit_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("tempfile");
        writeln!(file, "[motion]\nmin_motion_area = 600").expect("write");
        let cfg = VigilConfig::load(Some(file.path())).expect("load");
        assert_eq!(cfg.motion.min_motion_area, 600);
    }

    #[test]
    fn load_fails_for_missing_explicit_file() {
        let err = VigilConfig::load(Some(Path::new("/nonexistent/vigil.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }

    #[test]
    fn performance_modes_map_to_processing_settings() {
        assert_eq!(PerformanceMode::Performance.settings().frame_skip, 2);
        assert_eq!(PerformanceMode::Balanced.settings().resize_factor, 0.75);
        assert_eq!(PerformanceMode::Quality.settings().frame_skip, 0);
    }
}
