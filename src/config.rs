//! Harness configuration.
//!
//! Every section is optional in the TOML file; anything left out falls back to
//! the values the car was originally tuned with. `Config::validate` runs once at
//! startup so the workers never re-check widths or ranges per record.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Samples per scan from the Hokuyo LX (270° at 0.25° steps).
pub const LIDAR_SCAN_WIDTH: usize = 1081;

/// Button slots reported by the Xbox pad through the joystick API.
pub const CONTROLLER_BUTTONS: usize = 15;

/// Axis slots reported by the Xbox pad through the joystick API.
pub const CONTROLLER_AXES: usize = 8;

/// Positional servo domain, degrees.
pub const STEERING_DOMAIN: (f64, f64) = (0.0, 180.0);

/// Continuous servo domain.
pub const THROTTLE_DOMAIN: (f64, f64) = (-1.0, 1.0);

/// Logical steering range the scaled stick value is mapped from.
pub const STEERING_INPUT_RANGE: (f64, f64) = (-81.0, 81.0);

/// Logical throttle range the combined trigger value is mapped from.
pub const THROTTLE_INPUT_RANGE: (f64, f64) = (-4.1, 4.1);

pub const DEFAULT_CONFIG_PATH: &str = "slugmobile.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub output: OutputConfig,
    pub logging: LoggingConfig,
    pub controller: ControllerConfig,
    pub actuator: ActuatorConfig,
    pub imu: ImuConfig,
    pub lidar: LidarConfig,
    pub camera: CameraConfig,
    pub event_camera: EventCameraConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { dir: "data".into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter for env_logger; RUST_LOG still wins.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub device: String,
    pub button_count: usize,
    pub start_button: usize,
    pub stop_button: usize,
    pub exit_button: usize,
    pub steering_axis: usize,
    pub left_trigger_axis: usize,
    pub right_trigger_axis: usize,
    pub left_stick_y_axis: usize,
    pub right_stick_x_axis: usize,
    pub right_stick_y_axis: usize,
    pub dpad_x_axis: usize,
    pub dpad_y_axis: usize,
    /// Stick full deflection, in logical steering units.
    pub max_steering: f64,
    /// Full trigger pull, in logical throttle units.
    pub throttle_scale: f64,
    pub steering_input: (f64, f64),
    pub throttle_input: (f64, f64),
    pub poll_interval_ms: u64,
    /// Write the controller CSV while logging is on.
    pub record: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            device: "/dev/input/js0".into(),
            button_count: CONTROLLER_BUTTONS,
            // xpad START and BACK
            start_button: 7,
            stop_button: 6,
            exit_button: 8,
            steering_axis: 0,
            left_stick_y_axis: 1,
            left_trigger_axis: 2,
            right_stick_x_axis: 3,
            right_stick_y_axis: 4,
            right_trigger_axis: 5,
            dpad_x_axis: 6,
            dpad_y_axis: 7,
            max_steering: 80.0,
            throttle_scale: 4.0,
            steering_input: STEERING_INPUT_RANGE,
            throttle_input: THROTTLE_INPUT_RANGE,
            poll_interval_ms: 10,
            record: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorConfig {
    pub i2c_bus: String,
    pub address: u16,
    pub frequency_hz: f64,
    pub steering_channel: u8,
    pub throttle_channel: u8,
    pub min_pulse_us: f64,
    pub max_pulse_us: f64,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            i2c_bus: "/dev/i2c-1".into(),
            address: 0x60,
            frequency_hz: 50.0,
            steering_channel: 0,
            throttle_channel: 1,
            min_pulse_us: 750.0,
            max_pulse_us: 2250.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImuConfig {
    pub enabled: bool,
    pub i2c_bus: String,
    pub address: u16,
    pub interval_ms: u64,
}

impl Default for ImuConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            i2c_bus: "/dev/i2c-1".into(),
            address: 0x68,
            interval_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LidarConfig {
    pub enabled: bool,
    pub address: String,
    pub scan_width: usize,
    pub interval_ms: u64,
}

impl Default for LidarConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: "192.168.0.10:10940".into(),
            scan_width: LIDAR_SCAN_WIDTH,
            interval_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub enabled: bool,
    pub index: usize,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Integer shrink factor for the gray copy, 1 keeps full size.
    pub downsample: u32,
    pub interval_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            index: 0,
            width: 640,
            height: 480,
            fps: 30,
            downsample: 1,
            interval_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventCameraConfig {
    pub enabled: bool,
    /// EVT 2.0 stream: a device node or a recorded `.raw` file.
    pub path: String,
    pub interval_ms: u64,
}

impl Default for EventCameraConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "/dev/prophesee0".into(),
            interval_ms: 0,
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            log::info!("Using config: {}", path.display());
            Self::from_file(path)
        } else {
            log::info!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        let c = &self.controller;
        check_range("controller.steering_input", c.steering_input)?;
        check_range("controller.throttle_input", c.throttle_input)?;

        // the scaled stick/trigger value must stay inside the declared input
        // range, otherwise the mapped command leaves the servo domain
        if c.max_steering <= 0.0 || c.max_steering > c.steering_input.1.min(-c.steering_input.0) {
            return Err(Error::Config(format!(
                "controller.max_steering {} outside steering input {:?}",
                c.max_steering, c.steering_input
            )));
        }
        if c.throttle_scale <= 0.0 || c.throttle_scale > c.throttle_input.1.min(-c.throttle_input.0)
        {
            return Err(Error::Config(format!(
                "controller.throttle_scale {} outside throttle input {:?}",
                c.throttle_scale, c.throttle_input
            )));
        }

        if c.button_count == 0 {
            return Err(Error::Config("controller.button_count must be > 0".into()));
        }
        for (name, index) in [
            ("start_button", c.start_button),
            ("stop_button", c.stop_button),
            ("exit_button", c.exit_button),
        ] {
            if index >= c.button_count {
                return Err(Error::Config(format!(
                    "controller.{name} {index} >= button_count {}",
                    c.button_count
                )));
            }
        }
        for (name, index) in [
            ("steering_axis", c.steering_axis),
            ("left_stick_y_axis", c.left_stick_y_axis),
            ("left_trigger_axis", c.left_trigger_axis),
            ("right_trigger_axis", c.right_trigger_axis),
            ("right_stick_x_axis", c.right_stick_x_axis),
            ("right_stick_y_axis", c.right_stick_y_axis),
            ("dpad_x_axis", c.dpad_x_axis),
            ("dpad_y_axis", c.dpad_y_axis),
        ] {
            if index >= CONTROLLER_AXES {
                return Err(Error::Config(format!(
                    "controller.{name} {index} >= {CONTROLLER_AXES}"
                )));
            }
        }

        let a = &self.actuator;
        if a.frequency_hz <= 0.0 || a.min_pulse_us <= 0.0 || a.min_pulse_us >= a.max_pulse_us {
            return Err(Error::Config(format!(
                "actuator pulse {}..{} us at {} Hz",
                a.min_pulse_us, a.max_pulse_us, a.frequency_hz
            )));
        }
        if a.max_pulse_us >= 1_000_000.0 / a.frequency_hz {
            return Err(Error::Config(format!(
                "actuator.max_pulse_us {} exceeds the PWM period",
                a.max_pulse_us
            )));
        }
        if a.steering_channel > 15 || a.throttle_channel > 15 || a.steering_channel == a.throttle_channel
        {
            return Err(Error::Config(format!(
                "actuator channels {} / {}",
                a.steering_channel, a.throttle_channel
            )));
        }

        if self.lidar.scan_width == 0 {
            return Err(Error::Config("lidar.scan_width must be > 0".into()));
        }
        if self.camera.downsample == 0 {
            return Err(Error::Config("camera.downsample must be >= 1".into()));
        }
        let any_sensor = self.camera.enabled
            || self.imu.enabled
            || self.lidar.enabled
            || self.event_camera.enabled;
        if !any_sensor && !self.controller.record {
            return Err(Error::Config("nothing to record".into()));
        }
        Ok(())
    }
}

fn check_range(name: &str, (min, max): (f64, f64)) -> Result<()> {
    if !(min.is_finite() && max.is_finite() && min < max) {
        return Err(Error::Config(format!("{name} ({min}, {max}) is empty")));
    }
    Ok(())
}
