//! DFRobot BMX160 9-axis IMU on the Pi's I²C bus.

use std::{thread::sleep, time::Duration};

use embedded_hal::i2c::I2c;
use linux_embedded_hal::I2cdev;
use nalgebra::Vector3;

use crate::{devices::Sensor, reading::ImuSample, Error, Result};

const CHIP_ID: u8 = 0xD8;

const REG_CHIP_ID: u8 = 0x00;
const REG_DATA: u8 = 0x04;
const REG_ACC_RANGE: u8 = 0x41;
const REG_GYR_RANGE: u8 = 0x43;
const REG_MAG_CONF: u8 = 0x44;
const REG_MAG_IF_0: u8 = 0x4C;
const REG_MAG_IF_1: u8 = 0x4D;
const REG_MAG_IF_2: u8 = 0x4E;
const REG_MAG_IF_3: u8 = 0x4F;
const REG_CMD: u8 = 0x7E;

const CMD_SOFT_RESET: u8 = 0xB6;
const CMD_ACC_NORMAL: u8 = 0x11;
const CMD_GYR_NORMAL: u8 = 0x15;
const CMD_MAG_NORMAL: u8 = 0x19;

const ACC_RANGE_2G: u8 = 0x03;
const GYR_RANGE_250DPS: u8 = 0x03;

const MAGN_UT_PER_LSB: f32 = 0.3;
const GYRO_DPS_PER_LSB: f32 = 250.0 / 32768.0;
const ACCEL_MS2_PER_LSB: f32 = 2.0 * 9.80665 / 32768.0;

/// mag xyz, rhall, gyro xyz, accel xyz
const DATA_LEN: usize = 20;

#[allow(clippy::upper_case_acronyms)]
pub struct IMU<I> {
    i2c: I,
    address: u8,
    buf: [u8; DATA_LEN],
}

impl IMU<I2cdev> {
    pub fn open(bus: &str, address: u16) -> Result<Self> {
        let i2c = I2cdev::new(bus).map_err(|e| Error::device(bus, format!("{e:?}")))?;
        let address = u8::try_from(address)
            .map_err(|_| Error::InvalidParameter(format!("i2c address {address:#x}")))?;
        Self::new(i2c, address)
    }
}

impl<I: I2c> IMU<I> {
    /// Resets the chip, checks its id and brings all three sensors up.
    pub fn new(i2c: I, address: u8) -> Result<Self> {
        let mut imu = Self {
            i2c,
            address,
            buf: [0; DATA_LEN],
        };
        imu.init()?;
        Ok(imu)
    }

    fn init(&mut self) -> Result<()> {
        self.write_reg(REG_CMD, CMD_SOFT_RESET)?;
        sleep(Duration::from_millis(15));

        let id = self.read_reg(REG_CHIP_ID)?;
        if id != CHIP_ID {
            return Err(Error::device(
                "bmx160",
                format!("chip id {id:#04x}, expected {CHIP_ID:#04x}"),
            ));
        }

        // magnetometer sits behind the BMX160's secondary interface
        self.write_reg(REG_MAG_IF_0, 0x80)?;
        sleep(Duration::from_millis(50));
        for (reg, value) in [
            (REG_MAG_IF_3, 0x01),
            (REG_MAG_IF_2, 0x4B),
            (REG_MAG_IF_3, 0x04),
            (REG_MAG_IF_2, 0x51),
            (REG_MAG_IF_3, 0x0E),
            (REG_MAG_IF_2, 0x52),
            (REG_MAG_IF_3, 0x02),
            (REG_MAG_IF_2, 0x4C),
            (REG_MAG_IF_1, 0x42),
            (REG_MAG_CONF, 0x08),
            (REG_MAG_IF_0, 0x03),
        ] {
            self.write_reg(reg, value)?;
        }
        sleep(Duration::from_millis(50));

        self.write_reg(REG_CMD, CMD_ACC_NORMAL)?;
        sleep(Duration::from_millis(50));
        self.write_reg(REG_CMD, CMD_GYR_NORMAL)?;
        sleep(Duration::from_millis(100));
        self.write_reg(REG_CMD, CMD_MAG_NORMAL)?;
        sleep(Duration::from_millis(10));

        self.write_reg(REG_ACC_RANGE, ACC_RANGE_2G)?;
        self.write_reg(REG_GYR_RANGE, GYR_RANGE_250DPS)?;
        log::info!("BMX160 ready at {:#04x}", self.address);
        Ok(())
    }

    pub fn read_sample(&mut self) -> Result<ImuSample> {
        self.i2c
            .write_read(self.address, &[REG_DATA], &mut self.buf)
            .map_err(i2c_err)?;
        Ok(parse_sample(&self.buf))
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

impl<I: I2c + Send> Sensor for IMU<I> {
    type Reading = ImuSample;

    fn read(&mut self) -> Result<ImuSample> {
        self.read_sample()
    }
}

pub(crate) fn i2c_err<E: embedded_hal::i2c::Error>(e: E) -> Error {
    Error::I2c(format!("{:?}", e.kind()))
}

fn parse_sample(buf: &[u8; DATA_LEN]) -> ImuSample {
    let word = |i: usize| f32::from(i16::from_le_bytes([buf[i], buf[i + 1]]));
    ImuSample {
        magn: Vector3::new(word(0), word(2), word(4)) * MAGN_UT_PER_LSB,
        // 6..8 is the hall resistance, unused
        gyro: Vector3::new(word(8), word(10), word(12)) * GYRO_DPS_PER_LSB,
        accel: Vector3::new(word(14), word(16), word(18)) * ACCEL_MS2_PER_LSB,
    }
}
