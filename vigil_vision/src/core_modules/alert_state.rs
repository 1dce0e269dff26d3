// THEORY:
// The `AlertStateMachine` is the behavioral layer of the engine. Where the tracker of
// a motion engine gives blobs object permanence, this gives the classifier's verdicts
// *temporal* permanence: a single noisy window never raises an alarm, and a single
// calm window never silences one.
//
// Key architectural principles:
// 1.  **Leaky Accumulation**: Every qualifying window (Violence above the activation
//     confidence) adds one to a run-length counter; every other window subtracts one,
//     floored at zero. Brief gaps therefore slow the rise without restarting it.
// 2.  **Lifecycle**:
//     - **Idle**: counter at zero, nothing to report.
//     - **Rising**: evidence is accumulating but has not reached
//       `min_consecutive_violent_frames`.
//     - **Alerting**: the threshold was met. The alert holds until `cooldown` of
//       wall-clock time has passed since the last qualifying window, then the machine
//       drops straight back to Idle with a zeroed counter.
// 3.  **Operator Overrides**: A manual trigger is an overlay with its own persistence
//     window. While it is active it decides the emitted label (with confidence 1.0)
//     and the alert flag. The automatic bookkeeping keeps running underneath, so
//     authority returns to the classifier seamlessly when the window ends. A manual
//     "non-violence" also wipes the automatic state.
// 4.  **Edges, not Levels**: Each outcome carries `alert_started`/`alert_cleared`
//     edges of the effective alert flag. Callers play a sound on the rising edge
//     only, never once per alerting frame.
// 5.  **Time is an Argument**: Every method takes `now`. The machine never reads
//     the clock itself, which keeps it deterministic under test.

use std::time::{Duration, Instant};

use crate::config::AlertConfig;
use crate::core_modules::classifier::{ClassificationResult, Label};
use crate::error::ClassifierError;

/// The automatic lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlertPhase {
    #[default]
    Idle,
    Rising,
    Alerting,
}

/// Who decided the emitted label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeSource {
    Classifier,
    Manual,
}

/// An operator override and when it was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManualOverride {
    pub kind: Label,
    pub since: Instant,
}

/// What the machine emits for one cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertOutcome {
    pub label: Label,
    pub confidence: f32,
    pub is_violence: bool,
    pub phase: AlertPhase,
    pub source: OutcomeSource,
    /// The effective alert flag went from false to true on this cycle.
    pub alert_started: bool,
    /// The effective alert flag went from true to false on this cycle.
    pub alert_cleared: bool,
}

/// A read-only view of the machine at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertState {
    pub is_violence: bool,
    pub violence_run_length: u32,
    pub last_violence_at: Option<Instant>,
    pub manual_override: Option<ManualOverride>,
}

pub struct AlertStateMachine {
    activation_confidence: f32,
    min_consecutive: u32,
    cooldown: Duration,
    violence_persist: Duration,
    non_violence_persist: Duration,

    phase: AlertPhase,
    run_length: u32,
    last_violence_at: Option<Instant>,
    /// Confidence of the most recent qualifying window, reported while alerting.
    last_violence_confidence: f32,
    last_result: Option<ClassificationResult>,
    manual: Option<ManualOverride>,
    /// The `is_violence` value of the last emitted outcome.
    emitted_violence: bool,
}

impl AlertStateMachine {
    pub fn new(config: &AlertConfig) -> Self {
        Self {
            activation_confidence: config.violence_activation_confidence,
            min_consecutive: config.min_consecutive_violent_frames,
            cooldown: config.cooldown(),
            violence_persist: config.manual_violence_persist(),
            non_violence_persist: config.manual_non_violence_persist(),
            phase: AlertPhase::Idle,
            run_length: 0,
            last_violence_at: None,
            last_violence_confidence: 0.0,
            last_result: None,
            manual: None,
            emitted_violence: false,
        }
    }

    /// Folds one classification into the machine and returns what to emit.
    pub fn update(&mut self, result: &ClassificationResult, now: Instant) -> AlertOutcome {
        self.expire(now);
        self.last_result = Some(*result);

        let qualifying = result.is_qualifying(self.activation_confidence);
        match self.phase {
            AlertPhase::Alerting => {
                if qualifying {
                    self.run_length = self.run_length.saturating_add(1);
                    self.last_violence_at = Some(now);
                    self.last_violence_confidence = result.confidence;
                }
            }
            AlertPhase::Idle | AlertPhase::Rising => {
                if qualifying {
                    self.run_length = self.run_length.saturating_add(1);
                    if self.run_length >= self.min_consecutive {
                        self.phase = AlertPhase::Alerting;
                        self.last_violence_at = Some(now);
                        self.last_violence_confidence = result.confidence;
                        tracing::info!(run_length = self.run_length, "violence alert raised");
                    } else {
                        self.phase = AlertPhase::Rising;
                    }
                } else {
                    self.run_length = self.run_length.saturating_sub(1);
                    self.phase = if self.run_length > 0 {
                        AlertPhase::Rising
                    } else {
                        AlertPhase::Idle
                    };
                }
            }
        }

        self.emit(now)
    }

    /// Like `update`, but takes the classifier's raw answer. An error leaves every
    /// piece of state untouched and is handed back to the caller.
    pub fn record(
        &mut self,
        result: Result<ClassificationResult, ClassifierError>,
        now: Instant,
    ) -> Result<AlertOutcome, ClassifierError> {
        let result = result?;
        Ok(self.update(&result, now))
    }

    /// Operator says "violence": alert immediately for the persistence window.
    pub fn trigger_violence(&mut self, now: Instant) -> AlertOutcome {
        self.expire(now);
        self.manual = Some(ManualOverride {
            kind: Label::Violence,
            since: now,
        });
        tracing::info!("manual violence override");
        self.emit(now)
    }

    /// Operator says "non-violence": silence the alert and restart the automatic
    /// path from a clean state.
    pub fn trigger_non_violence(&mut self, now: Instant) -> AlertOutcome {
        self.expire(now);
        self.manual = Some(ManualOverride {
            kind: Label::NonViolence,
            since: now,
        });
        self.phase = AlertPhase::Idle;
        self.run_length = 0;
        tracing::info!("manual non-violence override");
        self.emit(now)
    }

    /// Advances time without a classification. Returns an outcome only when the
    /// effective alert flag changed (cooldown or override expiry).
    pub fn poll(&mut self, now: Instant) -> Option<AlertOutcome> {
        self.expire(now);
        if self.is_violence_at(now) != self.emitted_violence {
            Some(self.emit(now))
        } else {
            None
        }
    }

    pub fn is_violence_at(&self, now: Instant) -> bool {
        match self.active_override(now) {
            Some(ManualOverride { kind, .. }) => kind == Label::Violence,
            None => self.automatic_violence(now),
        }
    }

    pub fn snapshot(&self, now: Instant) -> AlertState {
        AlertState {
            is_violence: self.is_violence_at(now),
            violence_run_length: self.run_length,
            last_violence_at: self.last_violence_at,
            manual_override: self.active_override(now),
        }
    }

    pub fn phase(&self) -> AlertPhase {
        self.phase
    }

    pub fn run_length(&self) -> u32 {
        self.run_length
    }

    /// Back to the initial state, as at the start of a session.
    pub fn reset(&mut self) {
        self.phase = AlertPhase::Idle;
        self.run_length = 0;
        self.last_violence_at = None;
        self.last_violence_confidence = 0.0;
        self.last_result = None;
        self.manual = None;
        self.emitted_violence = false;
    }

    fn persist_window(&self, kind: Label) -> Duration {
        match kind {
            Label::Violence => self.violence_persist,
            Label::NonViolence => self.non_violence_persist,
        }
    }

    fn active_override(&self, now: Instant) -> Option<ManualOverride> {
        self.manual
            .filter(|m| now.saturating_duration_since(m.since) < self.persist_window(m.kind))
    }

    fn cooldown_elapsed(&self, now: Instant) -> bool {
        match self.last_violence_at {
            Some(at) => now.saturating_duration_since(at) >= self.cooldown,
            None => true,
        }
    }

    fn automatic_violence(&self, now: Instant) -> bool {
        self.phase == AlertPhase::Alerting && !self.cooldown_elapsed(now)
    }

    /// Applies every time-based transition due at `now`.
    fn expire(&mut self, now: Instant) {
        if self.manual.is_some() && self.active_override(now).is_none() {
            tracing::debug!("manual override expired");
            self.manual = None;
        }
        if self.phase == AlertPhase::Alerting && self.cooldown_elapsed(now) {
            self.phase = AlertPhase::Idle;
            self.run_length = 0;
            tracing::info!("violence alert cleared after cooldown");
        }
    }

    fn emit(&mut self, now: Instant) -> AlertOutcome {
        let is_violence = self.is_violence_at(now);
        let (label, confidence, source) = match self.active_override(now) {
            Some(m) => (m.kind, 1.0, OutcomeSource::Manual),
            None if self.automatic_violence(now) => (
                Label::Violence,
                self.last_violence_confidence,
                OutcomeSource::Classifier,
            ),
            None => match self.last_result {
                Some(r) => (r.label, r.confidence, OutcomeSource::Classifier),
                None => (Label::NonViolence, 0.0, OutcomeSource::Classifier),
            },
        };

        let alert_started = is_violence && !self.emitted_violence;
        let alert_cleared = !is_violence && self.emitted_violence;
        self.emitted_violence = is_violence;

        AlertOutcome {
            label,
            confidence,
            is_violence,
            phase: self.phase,
            source,
            alert_started,
            alert_cleared,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: u32 = 15;

    fn machine() -> AlertStateMachine {
        AlertStateMachine::new(&AlertConfig::default())
    }

    fn violent(confidence: f32) -> ClassificationResult {
        ClassificationResult::new(Label::Violence, confidence).unwrap()
    }

    fn calm() -> ClassificationResult {
        ClassificationResult::new(Label::NonViolence, 0.9).unwrap()
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    /// Feeds `n` qualifying windows 10 ms apart starting at `t0`; returns the time of
    /// the last one and its outcome.
    fn feed_violence(m: &mut AlertStateMachine, t0: Instant, n: u32) -> (Instant, AlertOutcome) {
        let mut last = None;
        for i in 0..n {
            let t = t0 + ms(10 * i as u64);
            last = Some((t, m.update(&violent(0.9), t)));
        }
        last.unwrap()
    }

    #[test]
    fn one_short_of_the_run_never_alerts() {
        let mut m = machine();
        let t0 = Instant::now();
        let (t, out) = feed_violence(&mut m, t0, MIN - 1);
        assert_eq!(out.phase, AlertPhase::Rising);
        assert!(!out.is_violence);

        let out = m.update(&calm(), t + ms(10));
        assert_ne!(out.phase, AlertPhase::Alerting);
        assert!(!out.is_violence);
        assert_eq!(m.run_length(), MIN - 2);
    }

    #[test]
    fn alerts_exactly_when_the_run_reaches_the_threshold() {
        let mut m = machine();
        let t0 = Instant::now();
        for i in 0..MIN {
            let out = m.update(&violent(0.8), t0 + ms(10 * i as u64));
            let reached = i + 1 == MIN;
            assert_eq!(out.phase == AlertPhase::Alerting, reached, "window {i}");
            assert_eq!(out.alert_started, reached, "window {i}");
        }
        let snap = m.snapshot(t0 + ms(10 * (MIN as u64 - 1)));
        assert!(snap.is_violence);
        assert_eq!(snap.violence_run_length, MIN);
        assert_eq!(snap.last_violence_at, Some(t0 + ms(10 * (MIN as u64 - 1))));
    }

    #[test]
    fn confidence_at_the_activation_threshold_does_not_count() {
        let mut m = machine();
        let t0 = Instant::now();
        for i in 0..MIN * 2 {
            m.update(&violent(0.5), t0 + ms(i as u64));
        }
        assert_eq!(m.phase(), AlertPhase::Idle);
        assert_eq!(m.run_length(), 0);
    }

    #[test]
    fn gaps_leak_the_counter_instead_of_resetting_it() {
        let mut m = machine();
        let t0 = Instant::now();
        let (t, _) = feed_violence(&mut m, t0, 10);
        m.update(&calm(), t + ms(10));
        m.update(&calm(), t + ms(20));
        assert_eq!(m.run_length(), 8);
        assert_eq!(m.phase(), AlertPhase::Rising);

        // Seven more qualifying windows reach fifteen.
        let (_, out) = feed_violence(&mut m, t + ms(30), 7);
        assert_eq!(out.phase, AlertPhase::Alerting);
    }

    #[test]
    fn counter_floors_at_zero() {
        let mut m = machine();
        let t0 = Instant::now();
        for i in 0..5 {
            m.update(&calm(), t0 + ms(i));
        }
        assert_eq!(m.run_length(), 0);
        assert_eq!(m.phase(), AlertPhase::Idle);
    }

    #[test]
    fn alert_holds_until_the_cooldown_has_fully_elapsed() {
        let mut m = machine();
        let (last, _) = feed_violence(&mut m, Instant::now(), MIN);

        for offset in [ms(100), ms(1500), ms(2999)] {
            let out = m.update(&calm(), last + offset);
            assert!(out.is_violence, "cleared early at {offset:?}");
            assert_eq!(out.phase, AlertPhase::Alerting);
            assert_eq!(out.label, Label::Violence);
            assert!((out.confidence - 0.9).abs() < f32::EPSILON);
        }

        let out = m.update(&calm(), last + ms(3000));
        assert!(!out.is_violence);
        assert!(out.alert_cleared);
        assert_eq!(out.phase, AlertPhase::Idle);
        assert_eq!(out.label, Label::NonViolence);
        assert_eq!(m.run_length(), 0);
    }

    #[test]
    fn qualifying_windows_while_alerting_extend_the_alert() {
        let mut m = machine();
        let (last, _) = feed_violence(&mut m, Instant::now(), MIN);
        m.update(&violent(0.7), last + ms(2000));
        let out = m.update(&calm(), last + ms(4000));
        assert!(out.is_violence);
        assert!(m.poll(last + ms(4999)).is_none());
        let cleared = m.poll(last + ms(5000)).unwrap();
        assert!(cleared.alert_cleared);
        assert_eq!(m.phase(), AlertPhase::Idle);
    }

    #[test]
    fn manual_violence_overrides_the_classifier_and_expires() {
        let mut m = machine();
        let t0 = Instant::now();
        let out = m.trigger_violence(t0);
        assert!(out.is_violence);
        assert!(out.alert_started);
        assert_eq!(out.confidence, 1.0);
        assert_eq!(out.source, OutcomeSource::Manual);

        let out = m.update(&calm(), t0 + ms(1000));
        assert!(out.is_violence);
        assert_eq!(out.label, Label::Violence);
        assert_eq!(out.confidence, 1.0);
        assert!(!out.alert_started);

        let out = m.update(&calm(), t0 + ms(3000));
        assert!(!out.is_violence);
        assert!(out.alert_cleared);
        assert_eq!(out.source, OutcomeSource::Classifier);
        assert!(m.snapshot(t0 + ms(3000)).manual_override.is_none());
    }

    #[test]
    fn manual_override_expiry_is_noticed_without_classifications() {
        let mut m = machine();
        let t0 = Instant::now();
        m.trigger_violence(t0);
        assert!(m.poll(t0 + ms(2999)).is_none());
        let out = m.poll(t0 + ms(3000)).unwrap();
        assert!(out.alert_cleared);
        assert!(m.poll(t0 + ms(3001)).is_none());
    }

    #[test]
    fn manual_non_violence_silences_and_resets_automatic_state() {
        let mut m = machine();
        let (last, _) = feed_violence(&mut m, Instant::now(), MIN);

        let out = m.trigger_non_violence(last + ms(10));
        assert!(!out.is_violence);
        assert!(out.alert_cleared);
        assert_eq!(out.label, Label::NonViolence);
        assert_eq!(out.confidence, 1.0);
        assert_eq!(m.phase(), AlertPhase::Idle);
        assert_eq!(m.run_length(), 0);

        // Automatic bookkeeping continues underneath the override.
        let out = m.update(&violent(0.9), last + ms(500));
        assert_eq!(out.label, Label::NonViolence);
        assert_eq!(m.run_length(), 1);

        // After the one second window the classifier speaks again.
        let out = m.update(&violent(0.9), last + ms(1010));
        assert_eq!(out.source, OutcomeSource::Classifier);
        assert_eq!(out.label, Label::Violence);
        assert!(!out.is_violence);
    }

    #[test]
    fn classifier_errors_leave_state_untouched() {
        let mut m = machine();
        let t0 = Instant::now();
        let (t, _) = feed_violence(&mut m, t0, 5);
        let before = m.snapshot(t);

        let err = m
            .record(Err(ClassifierError::Inference("model crashed".into())), t + ms(10))
            .unwrap_err();
        assert_eq!(err, ClassifierError::Inference("model crashed".into()));
        assert_eq!(m.snapshot(t), before);
        assert_eq!(m.phase(), AlertPhase::Rising);
    }

    #[test]
    fn reset_restores_the_initial_state() {
        let mut m = machine();
        let t0 = Instant::now();
        feed_violence(&mut m, t0, MIN);
        m.trigger_violence(t0);
        m.reset();
        assert_eq!(
            m.snapshot(t0),
            AlertState {
                is_violence: false,
                violence_run_length: 0,
                last_violence_at: None,
                manual_override: None,
            }
        );
        assert!(m.poll(t0).is_none());
    }
}
