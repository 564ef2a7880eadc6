//! Hardware adapters. The harness only talks to the traits below; each
//! submodule is one concrete device.

use crate::{
    reading::{ControllerSnapshot, SensorReading},
    Result,
};

pub mod event_camera;
pub mod hokuyo;
pub mod imu;
pub mod joystick;
pub mod mock;
pub mod servo;
#[cfg(feature = "usb-camera")]
pub mod usb_camera;

/// A sensor polled by one capture thread.
pub trait Sensor: Send {
    type Reading: SensorReading;

    /// Blocks until the next reading is available.
    fn read(&mut self) -> Result<Self::Reading>;
}

impl<S: Sensor + ?Sized> Sensor for Box<S> {
    type Reading = S::Reading;

    fn read(&mut self) -> Result<Self::Reading> {
        (**self).read()
    }
}

/// Steering servo plus throttle, owned by the control thread.
pub trait Actuator: Send {
    /// Degrees, 0..=180.
    fn set_steering_angle(&mut self, angle: f64) -> Result<()>;
    /// -1..=1.
    fn set_throttle(&mut self, throttle: f64) -> Result<()>;
    fn steering_angle(&self) -> f64;
    fn throttle(&self) -> f64;
}

impl<A: Actuator + ?Sized> Actuator for Box<A> {
    fn set_steering_angle(&mut self, angle: f64) -> Result<()> {
        (**self).set_steering_angle(angle)
    }

    fn set_throttle(&mut self, throttle: f64) -> Result<()> {
        (**self).set_throttle(throttle)
    }

    fn steering_angle(&self) -> f64 {
        (**self).steering_angle()
    }

    fn throttle(&self) -> f64 {
        (**self).throttle()
    }
}

/// Game controller with a cached state.
pub trait ControllerInput: Send {
    /// Drains pending input events without blocking.
    fn update(&mut self) -> Result<()>;
    fn snapshot(&self) -> &ControllerSnapshot;
}

impl<C: ControllerInput + ?Sized> ControllerInput for Box<C> {
    fn update(&mut self) -> Result<()> {
        (**self).update()
    }

    fn snapshot(&self) -> &ControllerSnapshot {
        (**self).snapshot()
    }
}
