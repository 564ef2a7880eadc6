//! The control thread: controller in, steering/throttle out, and the
//! start/stop/exit buttons that drive every capture worker.

use std::{
    ops::{Deref, DerefMut},
    thread::sleep,
    time::Duration,
};

use serde::Serialize;

use crate::{
    config::{ControllerConfig, STEERING_DOMAIN, THROTTLE_DOMAIN},
    data_saver::{CSVFile, CsvRow, DataFile},
    devices::{servo::neutral_steering, Actuator, ControllerInput},
    harness::WorkerReport,
    reading::{unix_now, ControllerSnapshot, SensorKind},
    signal::{LoggingGroup, StopSignal},
    Result,
};

/// Linear rescale of `num` from `[in_min, in_max]` to `[out_min, out_max]`,
/// rounded to 3 decimals.
pub fn num_to_range(num: f64, in_min: f64, in_max: f64, out_min: f64, out_max: f64) -> f64 {
    let v = out_min + (num - in_min) / (in_max - in_min) * (out_max - out_min);
    (v * 1000.0).round() / 1000.0
}

/// What one actuator update asks for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Command {
    /// degrees
    pub steering: f64,
    pub throttle: f64,
}

impl Command {
    pub fn neutral() -> Self {
        Self {
            steering: neutral_steering(),
            throttle: 0.0,
        }
    }
}

/// Maps a controller state to an actuator command.
#[derive(Debug, Clone)]
pub struct Mapping {
    max_steering: f64,
    throttle_scale: f64,
    steering_input: (f64, f64),
    throttle_input: (f64, f64),
}

impl From<&ControllerConfig> for Mapping {
    fn from(c: &ControllerConfig) -> Self {
        Self {
            max_steering: c.max_steering,
            throttle_scale: c.throttle_scale,
            steering_input: c.steering_input,
            throttle_input: c.throttle_input,
        }
    }
}

impl Mapping {
    /// Stick x scaled to `±max_steering`.
    pub fn raw_steering(&self, s: &ControllerSnapshot) -> f64 {
        let x = f64::from(s.left_stick[0]);
        num_to_range(x, -1.0, 1.0, -self.max_steering, self.max_steering)
    }

    /// Left trigger drives forward, right trigger backward.
    pub fn raw_throttle(&self, s: &ControllerSnapshot) -> f64 {
        f64::from(s.triggers[0] - s.triggers[1]) * self.throttle_scale
    }

    pub fn command(&self, s: &ControllerSnapshot) -> Command {
        let (si_min, si_max) = self.steering_input;
        let (ti_min, ti_max) = self.throttle_input;
        Command {
            steering: num_to_range(
                self.raw_steering(s),
                si_min,
                si_max,
                STEERING_DOMAIN.0,
                STEERING_DOMAIN.1,
            ),
            throttle: num_to_range(
                self.raw_throttle(s),
                ti_min,
                ti_max,
                THROTTLE_DOMAIN.0,
                THROTTLE_DOMAIN.1,
            ),
        }
    }
}

/// One controller CSV row: the command sent and the inputs it came from.
#[derive(Debug, Clone, Copy)]
pub struct ControllerLogEntry {
    pub command: Command,
    pub triggers: [f32; 2],
    pub left_stick: [f32; 2],
    pub right_stick: [f32; 2],
    pub dpad: [i8; 2],
}

impl ControllerLogEntry {
    pub fn new(command: Command, s: &ControllerSnapshot) -> Self {
        Self {
            command,
            triggers: s.triggers,
            left_stick: s.left_stick,
            right_stick: s.right_stick,
            dpad: s.dpad,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ControllerRow {
    timestamp: f64,
    steering: f64,
    throttle: f64,
    left_trigger: f32,
    right_trigger: f32,
    left_stick_x: f32,
    left_stick_y: f32,
    right_stick_x: f32,
    right_stick_y: f32,
    dpad_x: i8,
    dpad_y: i8,
}

impl CsvRow for ControllerLogEntry {
    const HEADER: &'static [&'static str] = &[
        "timestamp",
        "steering",
        "throttle",
        "left_trigger",
        "right_trigger",
        "left_stick_x",
        "left_stick_y",
        "right_stick_x",
        "right_stick_y",
        "dpad_x",
        "dpad_y",
    ];
    type Row = ControllerRow;

    fn row(&self, timestamp: f64) -> ControllerRow {
        ControllerRow {
            timestamp,
            steering: self.command.steering,
            throttle: self.command.throttle,
            left_trigger: self.triggers[0],
            right_trigger: self.triggers[1],
            left_stick_x: self.left_stick[0],
            left_stick_y: self.left_stick[1],
            right_stick_x: self.right_stick[0],
            right_stick_y: self.right_stick[1],
            dpad_x: self.dpad[0],
            dpad_y: self.dpad[1],
        }
    }
}

/// Owns the actuator and parks it (wheels straight, throttle off) when
/// dropped, whichever way the control thread ends.
pub struct NeutralGuard<A: Actuator>(A);

impl<A: Actuator> NeutralGuard<A> {
    pub fn new(actuator: A) -> Self {
        Self(actuator)
    }
}

impl<A: Actuator> Deref for NeutralGuard<A> {
    type Target = A;

    fn deref(&self) -> &A {
        &self.0
    }
}

impl<A: Actuator> DerefMut for NeutralGuard<A> {
    fn deref_mut(&mut self) -> &mut A {
        &mut self.0
    }
}

impl<A: Actuator> Drop for NeutralGuard<A> {
    fn drop(&mut self) {
        let n = Command::neutral();
        if let Err(e) = self.0.set_throttle(n.throttle) {
            log::error!("neutral throttle: {e}");
        }
        if let Err(e) = self.0.set_steering_angle(n.steering) {
            log::error!("neutral steering: {e}");
        }
        log::info!("Actuator set to neutral");
    }
}

/// Result of one control iteration's button handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    /// No mode button held.
    Drive,
    Started,
    AlreadyLogging,
    Stopped,
    AlreadyIdle,
    Exit,
}

pub struct ControlWorker<C, A: Actuator> {
    controller: C,
    actuator: NeutralGuard<A>,
    group: LoggingGroup,
    stop: StopSignal,
    mapping: Mapping,
    start_button: usize,
    stop_button: usize,
    exit_button: usize,
    poll_interval: Duration,
    logging: bool,
    log_file: Option<CSVFile<ControllerLogEntry>>,
}

impl<C, A> ControlWorker<C, A>
where
    C: ControllerInput,
    A: Actuator,
{
    pub fn new(
        controller: C,
        actuator: A,
        group: LoggingGroup,
        stop: StopSignal,
        config: &ControllerConfig,
    ) -> Self {
        Self {
            controller,
            actuator: NeutralGuard::new(actuator),
            group,
            stop,
            mapping: Mapping::from(config),
            start_button: config.start_button,
            stop_button: config.stop_button,
            exit_button: config.exit_button,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            logging: false,
            log_file: None,
        }
    }

    /// Also log controller state and commands while data collection is on.
    pub fn with_log_file(mut self, file: CSVFile<ControllerLogEntry>) -> Self {
        self.log_file = Some(file);
        self
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    pub fn log_records(&self) -> u64 {
        self.log_file.as_ref().map_or(0, |f| f.records())
    }

    /// One iteration: pump the controller, handle the first held mode
    /// button, then command the actuator. On `Exit` no command is sent.
    pub fn step(&mut self) -> Result<ControlAction> {
        self.controller.update()?;
        let state = self.controller.snapshot();

        let action = if state.pressed(self.start_button) {
            if self.logging {
                log::info!("Data collection already in progress");
                ControlAction::AlreadyLogging
            } else {
                log::info!("Starting data collection");
                self.logging = true;
                self.group.set_all(true);
                ControlAction::Started
            }
        } else if state.pressed(self.stop_button) {
            if self.logging {
                log::info!("Stopping data collection");
                self.logging = false;
                self.group.set_all(false);
                ControlAction::Stopped
            } else {
                log::info!("Data collection already not in progress");
                ControlAction::AlreadyIdle
            }
        } else if state.pressed(self.exit_button) {
            log::info!("Exiting program");
            self.stop.trigger();
            return Ok(ControlAction::Exit);
        } else {
            ControlAction::Drive
        };

        let command = self.mapping.command(state);
        log::trace!(
            "Mapped throttle: {}, Mapped steering: {}",
            command.throttle,
            command.steering
        );
        self.actuator.set_steering_angle(command.steering)?;
        self.actuator.set_throttle(command.throttle)?;

        if self.logging {
            if let Some(file) = self.log_file.as_mut() {
                let entry = ControllerLogEntry::new(command, state);
                file.record(unix_now(), &entry)?;
            }
        }
        Ok(action)
    }

    pub fn run(mut self) -> WorkerReport {
        log::info!("Controller thread started");
        log::info!(
            "Press button {} to start, {} to stop data collection, {} to exit",
            self.start_button,
            self.stop_button,
            self.exit_button
        );
        let mut error = None;
        while !self.stop.is_set() {
            match self.step() {
                Ok(ControlAction::Exit) => break,
                Ok(_) => {}
                Err(e) => {
                    log::error!("Controller thread error: {e}");
                    error = Some(e.to_string());
                    break;
                }
            }
            if !self.poll_interval.is_zero() {
                sleep(self.poll_interval);
            }
        }
        if let Some(file) = self.log_file.as_mut() {
            if let Err(e) = file.end() {
                error.get_or_insert_with(|| e.to_string());
            }
        }
        let records = self.log_records();
        log::info!("Controller thread finished, {records} rows logged");
        WorkerReport {
            name: "controller".into(),
            kind: SensorKind::Controller,
            records,
            dropped: 0,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{STEERING_INPUT_RANGE, THROTTLE_INPUT_RANGE},
        devices::mock::{RecordingActuator, ScriptedController},
        signal::LoggingSwitch,
    };
    use approx::assert_relative_eq;

    fn snapshot(f: impl FnOnce(&mut ControllerSnapshot)) -> ControllerSnapshot {
        let mut s = ControllerSnapshot::new(15);
        f(&mut s);
        s
    }

    fn press(button: usize) -> ControllerSnapshot {
        snapshot(|s| s.buttons[button] = true)
    }

    fn worker(
        script: Vec<ControllerSnapshot>,
        group: LoggingGroup,
        stop: StopSignal,
    ) -> (ControlWorker<ScriptedController, RecordingActuator>, RecordingActuator) {
        let actuator = RecordingActuator::new();
        let config = ControllerConfig {
            poll_interval_ms: 0,
            ..Default::default()
        };
        let w = ControlWorker::new(
            ScriptedController::new(script, 15),
            actuator.clone(),
            group,
            stop,
            &config,
        );
        (w, actuator)
    }

    #[test]
    fn test_num_to_range_endpoints() {
        let (lo, hi) = STEERING_INPUT_RANGE;
        assert_eq!(num_to_range(-81.0, lo, hi, 0.0, 180.0), 0.0);
        assert_eq!(num_to_range(0.0, lo, hi, 0.0, 180.0), 90.0);
        assert_eq!(num_to_range(81.0, lo, hi, 0.0, 180.0), 180.0);

        let (lo, hi) = THROTTLE_INPUT_RANGE;
        assert_eq!(num_to_range(-4.1, lo, hi, -1.0, 1.0), -1.0);
        assert_eq!(num_to_range(0.0, lo, hi, -1.0, 1.0), 0.0);
        assert_eq!(num_to_range(4.1, lo, hi, -1.0, 1.0), 1.0);
    }

    #[test]
    fn test_num_to_range_monotonic_and_bounded() {
        let mut last = f64::NEG_INFINITY;
        for i in 0..=1620 {
            let x = -81.0 + i as f64 * 0.1;
            let y = num_to_range(x, -81.0, 81.0, 0.0, 180.0);
            assert!(y >= last);
            assert!((0.0..=180.0).contains(&y));
            last = y;
        }
        assert_eq!(num_to_range(1.0 / 3.0, 0.0, 1.0, 0.0, 1.0), 0.333);
    }

    #[test]
    fn test_mapping_full_deflection_stays_in_domain() {
        let m = Mapping::from(&ControllerConfig::default());
        let c = m.command(&snapshot(|s| {
            s.left_stick[0] = 1.0;
            s.triggers[0] = 1.0;
        }));
        assert_relative_eq!(c.steering, 178.889);
        assert_relative_eq!(c.throttle, 0.976);

        let c = m.command(&snapshot(|s| {
            s.left_stick[0] = -1.0;
            s.triggers[1] = 1.0;
        }));
        assert_relative_eq!(c.steering, 1.111);
        assert_relative_eq!(c.throttle, -0.976);

        assert_eq!(m.command(&ControllerSnapshot::new(15)), Command::neutral());
    }

    #[test]
    fn test_start_is_idempotent() {
        let switch = LoggingSwitch::new(false);
        let mut group = LoggingGroup::new();
        group.add("imu", switch.clone());

        let script = vec![press(7), press(7), ControllerSnapshot::new(15), press(7)];
        let (mut w, _) = worker(script, group, StopSignal::new());

        assert_eq!(w.step().unwrap(), ControlAction::Started);
        assert!(switch.is_enabled());
        assert_eq!(w.step().unwrap(), ControlAction::AlreadyLogging);
        assert_eq!(w.step().unwrap(), ControlAction::Drive);
        assert_eq!(w.step().unwrap(), ControlAction::AlreadyLogging);
        assert!(switch.is_enabled());
    }

    #[test]
    fn test_start_takes_precedence_over_stop() {
        let switch = LoggingSwitch::new(false);
        let mut group = LoggingGroup::new();
        group.add("imu", switch.clone());

        let both = snapshot(|s| {
            s.buttons[7] = true;
            s.buttons[6] = true;
        });
        let script = vec![press(6), both.clone(), both, press(6), press(6)];
        let (mut w, _) = worker(script, group, StopSignal::new());

        assert_eq!(w.step().unwrap(), ControlAction::AlreadyIdle);
        assert_eq!(w.step().unwrap(), ControlAction::Started);
        assert_eq!(w.step().unwrap(), ControlAction::AlreadyLogging);
        assert_eq!(w.step().unwrap(), ControlAction::Stopped);
        assert!(!switch.is_enabled());
        assert_eq!(w.step().unwrap(), ControlAction::AlreadyIdle);
    }

    #[test]
    fn test_log_file_has_one_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("controller.csv");
        let file = CSVFile::create(&path).unwrap();

        let script = vec![
            ControllerSnapshot::new(15),
            press(7),
            snapshot(|s| s.left_stick[0] = 0.5),
            press(7),
            press(6),
            ControllerSnapshot::new(15),
            press(7),
        ];
        let (w, _) = worker(script, LoggingGroup::new(), StopSignal::new());
        let mut w = w.with_log_file(file);
        for _ in 0..7 {
            w.step().unwrap();
        }
        // rows for steps 2, 3, 4 and 7
        assert_eq!(w.log_records(), 4);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], ControllerLogEntry::HEADER.join(","));
        assert_eq!(
            lines.iter().filter(|l| l.starts_with("timestamp")).count(),
            1
        );
        for line in &lines[1..] {
            assert_eq!(line.split(',').count(), ControllerLogEntry::HEADER.len());
        }
    }

    #[test]
    fn test_exit_sets_stop_and_parks_actuator() {
        let stop = StopSignal::new();
        let script = vec![
            snapshot(|s| {
                s.left_stick[0] = 1.0;
                s.triggers[0] = 1.0;
            }),
            press(8),
        ];
        let (w, actuator) = worker(script, LoggingGroup::new(), stop.clone());
        let report = w.run();

        assert!(stop.is_set());
        assert!(report.error.is_none());
        assert_eq!(report.kind, SensorKind::Controller);
        let history = actuator.history();
        assert_eq!(history[1], (178.889, 0.976));
        assert_eq!(history.last(), Some(&(90.0, 0.0)));
    }

    #[test]
    fn test_controller_error_parks_actuator() {
        let actuator = RecordingActuator::new();
        let drive = snapshot(|s| s.triggers[1] = 1.0);
        let controller = ScriptedController::new(vec![drive], 15).fail_at(3);
        let config = ControllerConfig {
            poll_interval_ms: 0,
            ..Default::default()
        };
        let w = ControlWorker::new(
            controller,
            actuator.clone(),
            LoggingGroup::new(),
            StopSignal::new(),
            &config,
        );
        let report = w.run();

        assert!(report.error.unwrap().contains("injected failure"));
        let history = actuator.history();
        assert!(history.contains(&(90.0, -0.976)));
        assert_eq!(history.last(), Some(&(90.0, 0.0)));
    }
}
