//! Steering servo and ESC on a PCA9685 16-channel PWM board (the Adafruit
//! servo kit at 0x60).

use std::{thread::sleep, time::Duration};

use embedded_hal::i2c::I2c;
use linux_embedded_hal::I2cdev;

use crate::{
    config::{ActuatorConfig, STEERING_DOMAIN, THROTTLE_DOMAIN},
    devices::{imu::i2c_err, Actuator},
    Error, Result,
};

const REG_MODE1: u8 = 0x00;
const REG_PRESCALE: u8 = 0xFE;
const REG_LED0_ON_L: u8 = 0x06;

const MODE1_SLEEP: u8 = 0x10;
const MODE1_AUTO_INCREMENT: u8 = 0x20;
const MODE1_RESTART: u8 = 0x80;

const OSCILLATOR_HZ: f64 = 25_000_000.0;
const STEPS: f64 = 4096.0;

pub struct Pca9685<I> {
    i2c: I,
    address: u8,
    frequency_hz: f64,
}

impl<I: I2c> Pca9685<I> {
    pub fn new(i2c: I, address: u8, frequency_hz: f64) -> Result<Self> {
        let mut pca = Self {
            i2c,
            address,
            frequency_hz,
        };
        pca.set_frequency(frequency_hz)?;
        Ok(pca)
    }

    /// Output frequency after prescaler rounding.
    pub fn frequency(&self) -> f64 {
        self.frequency_hz
    }

    fn set_frequency(&mut self, frequency_hz: f64) -> Result<()> {
        let prescale = ((OSCILLATOR_HZ / STEPS / frequency_hz).round() - 1.0).clamp(3.0, 255.0) as u8;
        let old_mode = self.read_reg(REG_MODE1)?;
        // prescaler is only writable while the oscillator sleeps
        self.write_reg(REG_MODE1, (old_mode & !MODE1_RESTART) | MODE1_SLEEP)?;
        self.write_reg(REG_PRESCALE, prescale)?;
        self.write_reg(REG_MODE1, old_mode)?;
        sleep(Duration::from_millis(5));
        self.write_reg(REG_MODE1, old_mode | MODE1_RESTART | MODE1_AUTO_INCREMENT)?;
        self.frequency_hz = OSCILLATOR_HZ / STEPS / (f64::from(prescale) + 1.0);
        log::debug!(
            "PCA9685 {:#04x}: prescale {prescale}, {:.3} Hz",
            self.address,
            self.frequency_hz
        );
        Ok(())
    }

    pub fn set_pulse_us(&mut self, channel: u8, pulse_us: f64) -> Result<()> {
        if channel > 15 {
            return Err(Error::InvalidParameter(format!("pwm channel {channel}")));
        }
        let off = (pulse_us * 1e-6 * self.frequency_hz * STEPS)
            .round()
            .clamp(0.0, STEPS - 1.0) as u16;
        let [off_l, off_h] = off.to_le_bytes();
        self.i2c
            .write(
                self.address,
                &[REG_LED0_ON_L + 4 * channel, 0, 0, off_l, off_h],
            )
            .map_err(i2c_err)
    }

    fn write_reg(&mut self, reg: u8, value: u8) -> Result<()> {
        self.i2c.write(self.address, &[reg, value]).map_err(i2c_err)
    }

    fn read_reg(&mut self, reg: u8) -> Result<u8> {
        let mut v = [0u8];
        self.i2c
            .write_read(self.address, &[reg], &mut v)
            .map_err(i2c_err)?;
        Ok(v[0])
    }
}

/// The car: a positional steering servo and a continuous-rotation throttle
/// sharing one pulse range.
pub struct SlugMobile<I> {
    pca: Pca9685<I>,
    steering_channel: u8,
    throttle_channel: u8,
    min_pulse_us: f64,
    max_pulse_us: f64,
    steering_angle: f64,
    throttle: f64,
}

impl SlugMobile<I2cdev> {
    pub fn open(config: &ActuatorConfig) -> Result<Self> {
        let i2c = I2cdev::new(&config.i2c_bus)
            .map_err(|e| Error::device(&config.i2c_bus, format!("{e:?}")))?;
        let address = u8::try_from(config.address)
            .map_err(|_| Error::InvalidParameter(format!("i2c address {:#x}", config.address)))?;
        Self::new(Pca9685::new(i2c, address, config.frequency_hz)?, config)
    }
}

impl<I: I2c + Send> SlugMobile<I> {
    pub fn new(pca: Pca9685<I>, config: &ActuatorConfig) -> Result<Self> {
        let mut car = Self {
            pca,
            steering_channel: config.steering_channel,
            throttle_channel: config.throttle_channel,
            min_pulse_us: config.min_pulse_us,
            max_pulse_us: config.max_pulse_us,
            steering_angle: 0.0,
            throttle: 0.0,
        };
        car.set_steering_angle(neutral_steering())?;
        car.set_throttle(0.0)?;
        Ok(car)
    }

    fn pulse(&self, fraction: f64) -> f64 {
        self.min_pulse_us + fraction * (self.max_pulse_us - self.min_pulse_us)
    }
}

pub fn neutral_steering() -> f64 {
    (STEERING_DOMAIN.0 + STEERING_DOMAIN.1) / 2.0
}

impl<I: I2c + Send> Actuator for SlugMobile<I> {
    fn set_steering_angle(&mut self, angle: f64) -> Result<()> {
        let (lo, hi) = STEERING_DOMAIN;
        if !(lo..=hi).contains(&angle) {
            return Err(Error::InvalidParameter(format!(
                "steering angle {angle} outside {lo}..={hi}"
            )));
        }
        let pulse = self.pulse((angle - lo) / (hi - lo));
        self.pca.set_pulse_us(self.steering_channel, pulse)?;
        self.steering_angle = angle;
        Ok(())
    }

    fn set_throttle(&mut self, throttle: f64) -> Result<()> {
        let (lo, hi) = THROTTLE_DOMAIN;
        if !(lo..=hi).contains(&throttle) {
            return Err(Error::InvalidParameter(format!(
                "throttle {throttle} outside {lo}..={hi}"
            )));
        }
        let pulse = self.pulse((throttle - lo) / (hi - lo));
        self.pca.set_pulse_us(self.throttle_channel, pulse)?;
        self.throttle = throttle;
        Ok(())
    }

    fn steering_angle(&self) -> f64 {
        self.steering_angle
    }

    fn throttle(&self) -> f64 {
        self.throttle
    }
}
