use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// A sample type produced by one kind of sensor. The set of implementors is
/// the closed union of readings the harness records.
pub trait SensorReading: Send + 'static {
    const KIND: SensorKind;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Camera,
    Imu,
    Lidar,
    EventCamera,
    Controller,
}

impl SensorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Camera => "camera",
            SensorKind::Imu => "imu",
            SensorKind::Lidar => "lidar",
            SensorKind::EventCamera => "event_camera",
            SensorKind::Controller => "controller",
        }
    }
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Packed RGB8 image, row major.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImuSample {
    /// µT
    pub magn: Vector3<f32>,
    /// °/s
    pub gyro: Vector3<f32>,
    /// m/s²
    pub accel: Vector3<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LidarScan {
    /// Unix seconds at which the scan was received.
    pub timestamp: f64,
    /// Ranges in millimetres, one per step.
    pub ranges: Vec<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub x: i32,
    pub y: i32,
    /// 1 brighter, 0 darker
    pub polarity: i32,
    /// sensor clock, µs
    pub t: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerSnapshot {
    /// left, right; 0 released .. 1 fully pulled
    pub triggers: [f32; 2],
    pub left_stick: [f32; 2],
    pub right_stick: [f32; 2],
    pub dpad: [i8; 2],
    pub buttons: Vec<bool>,
}

impl ControllerSnapshot {
    pub fn new(button_count: usize) -> Self {
        Self {
            triggers: [0.0; 2],
            left_stick: [0.0; 2],
            right_stick: [0.0; 2],
            dpad: [0; 2],
            buttons: vec![false; button_count],
        }
    }

    /// Out-of-range indices read as released.
    pub fn pressed(&self, button: usize) -> bool {
        self.buttons.get(button).copied().unwrap_or(false)
    }
}

/// Wall clock as fractional unix seconds.
pub fn unix_now() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) * 1e-6
}

impl SensorReading for Frame {
    const KIND: SensorKind = SensorKind::Camera;
}

impl SensorReading for ImuSample {
    const KIND: SensorKind = SensorKind::Imu;
}

impl SensorReading for LidarScan {
    const KIND: SensorKind = SensorKind::Lidar;
}

impl SensorReading for Event {
    const KIND: SensorKind = SensorKind::EventCamera;
}

impl SensorReading for ControllerSnapshot {
    const KIND: SensorKind = SensorKind::Controller;
}
