//! Synthetic devices for bench runs without the car, and for tests.

use std::{
    collections::HashMap,
    f32::consts::TAU,
    sync::{Arc, Mutex, MutexGuard},
    thread::sleep,
    time::Duration,
};

use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, Operation, SevenBitAddress};
use nalgebra::Vector3;

use crate::{
    devices::{Actuator, ControllerInput, Sensor},
    reading::{unix_now, ControllerSnapshot, Event, Frame, ImuSample, LidarScan, SensorReading},
    Error, Result,
};

/// Sensor driven by a closure receiving the 1-based read count.
pub struct FnSensor<R, F> {
    reads: u64,
    f: F,
    _r: std::marker::PhantomData<fn() -> R>,
}

impl<R, F> FnSensor<R, F>
where
    R: SensorReading,
    F: FnMut(u64) -> Result<R> + Send,
{
    pub fn new(f: F) -> Self {
        Self {
            reads: 0,
            f,
            _r: std::marker::PhantomData,
        }
    }
}

impl<R, F> Sensor for FnSensor<R, F>
where
    R: SensorReading,
    F: FnMut(u64) -> Result<R> + Send,
{
    type Reading = R;

    fn read(&mut self) -> Result<R> {
        self.reads += 1;
        (self.f)(self.reads)
    }
}

pub struct MockImu {
    n: u64,
    period: Duration,
}

impl MockImu {
    pub fn new(period: Duration) -> Self {
        Self { n: 0, period }
    }
}

impl Sensor for MockImu {
    type Reading = ImuSample;

    fn read(&mut self) -> Result<ImuSample> {
        sleep(self.period);
        self.n += 1;
        let phase = self.n as f32 * 0.01 * TAU;
        Ok(ImuSample {
            magn: Vector3::new(phase.cos() * 25.0, phase.sin() * 25.0, -40.0),
            gyro: Vector3::new(0.0, 0.0, phase.sin() * 30.0),
            accel: Vector3::new(phase.cos() * 0.5, phase.sin() * 0.5, 9.80665),
        })
    }
}

/// Stand-in for the Hokuyo: a room-sized ellipse seen from its middle.
pub struct MockLidar {
    n: u64,
    width: usize,
    period: Duration,
}

impl MockLidar {
    pub fn new(width: usize, period: Duration) -> Self {
        Self {
            n: 0,
            width,
            period,
        }
    }
}

impl Sensor for MockLidar {
    type Reading = LidarScan;

    fn read(&mut self) -> Result<LidarScan> {
        sleep(self.period);
        self.n += 1;
        let wobble = (self.n as f32 * 0.05).sin() * 50.0;
        let ranges = (0..self.width)
            .map(|i| {
                let angle = i as f32 / self.width as f32 * TAU * 0.75;
                let (a, b) = (4000.0, 2500.0);
                let r = a * b / ((b * angle.cos()).powi(2) + (a * angle.sin()).powi(2)).sqrt();
                r + wobble
            })
            .collect();
        Ok(LidarScan {
            timestamp: unix_now(),
            ranges,
        })
    }
}

/// An edge sweeping across a 640x480 sensor.
pub struct MockEventCamera {
    n: u64,
    period: Duration,
}

impl MockEventCamera {
    pub fn new(period: Duration) -> Self {
        Self { n: 0, period }
    }
}

impl Sensor for MockEventCamera {
    type Reading = Event;

    fn read(&mut self) -> Result<Event> {
        sleep(self.period);
        self.n += 1;
        Ok(Event {
            x: (self.n % 640) as i32,
            y: ((self.n / 640) % 480) as i32,
            polarity: (self.n % 2) as i32,
            t: (self.n * self.period.as_micros().max(1) as u64) as i64,
        })
    }
}

pub struct MockCamera {
    n: u64,
    width: u32,
    height: u32,
    period: Duration,
}

impl MockCamera {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            n: 0,
            width,
            height,
            period: Duration::from_secs_f64(1.0 / f64::from(fps.max(1))),
        }
    }
}

impl Sensor for MockCamera {
    type Reading = Frame;

    fn read(&mut self) -> Result<Frame> {
        sleep(self.period);
        self.n += 1;
        let mut rgb = Vec::with_capacity((self.width * self.height * 3) as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                rgb.push(((x + self.n as u32) % 256) as u8);
                rgb.push((y % 256) as u8);
                rgb.push(((x + y) % 256) as u8);
            }
        }
        Ok(Frame {
            width: self.width,
            height: self.height,
            rgb,
        })
    }
}

/// Replays a fixed list of controller states, one per `update`. After the
/// script runs out it either starts over or holds the last state.
pub struct ScriptedController {
    script: Vec<ControllerSnapshot>,
    pos: usize,
    cycle: bool,
    loop_start: usize,
    updates: usize,
    fail_at: Option<usize>,
    current: ControllerSnapshot,
}

impl ScriptedController {
    pub fn new(script: Vec<ControllerSnapshot>, button_count: usize) -> Self {
        Self {
            script,
            pos: 0,
            cycle: false,
            loop_start: 0,
            updates: 0,
            fail_at: None,
            current: ControllerSnapshot::new(button_count),
        }
    }

    pub fn cycling(mut self) -> Self {
        self.cycle = true;
        self
    }

    /// Make the `n`th `update` (1-based) fail.
    pub fn fail_at(mut self, n: usize) -> Self {
        self.fail_at = Some(n);
        self
    }

    /// Presses `start_button` once, then sweeps the steering stick and
    /// pulses the right trigger.
    pub fn bench_drive(button_count: usize, start_button: usize) -> Self {
        let mut script = Vec::with_capacity(401);
        let mut first = ControllerSnapshot::new(button_count);
        if let Some(b) = first.buttons.get_mut(start_button) {
            *b = true;
        }
        script.push(first);
        for i in 0..400 {
            let phase = i as f32 / 400.0 * TAU;
            let mut s = ControllerSnapshot::new(button_count);
            s.left_stick[0] = phase.sin();
            s.triggers[1] = (phase.cos() * 0.5 + 0.5) * 0.3;
            script.push(s);
        }
        Self {
            loop_start: 1,
            ..Self::new(script, button_count).cycling()
        }
    }
}

impl ControllerInput for ScriptedController {
    fn update(&mut self) -> Result<()> {
        self.updates += 1;
        if self.fail_at == Some(self.updates) {
            return Err(Error::device("scripted controller", "injected failure"));
        }
        if let Some(s) = self.script.get(self.pos) {
            self.current = s.clone();
        }
        self.pos += 1;
        if self.cycle && self.pos >= self.script.len() {
            self.pos = self.loop_start;
        }
        Ok(())
    }

    fn snapshot(&self) -> &ControllerSnapshot {
        &self.current
    }
}

/// Actuator that keeps every command it receives.
#[derive(Clone, Default)]
pub struct RecordingActuator {
    log: Arc<Mutex<Vec<(f64, f64)>>>,
    steering: f64,
    throttle: f64,
}

impl RecordingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(steering, throttle)` after every command.
    pub fn history(&self) -> Vec<(f64, f64)> {
        lock(&self.log).clone()
    }
}

impl Actuator for RecordingActuator {
    fn set_steering_angle(&mut self, angle: f64) -> Result<()> {
        self.steering = angle;
        lock(&self.log).push((self.steering, self.throttle));
        Ok(())
    }

    fn set_throttle(&mut self, throttle: f64) -> Result<()> {
        self.throttle = throttle;
        lock(&self.log).push((self.steering, self.throttle));
        Ok(())
    }

    fn steering_angle(&self) -> f64 {
        self.steering
    }

    fn throttle(&self) -> f64 {
        self.throttle
    }
}

/// In-memory I²C bus with auto-incrementing register files per address.
#[derive(Clone, Default)]
pub struct MockI2c {
    inner: Arc<Mutex<MockI2cInner>>,
}

#[derive(Default)]
struct MockI2cInner {
    regs: HashMap<u8, [u8; 256]>,
    pointer: HashMap<u8, u8>,
    writes: Vec<(u8, Vec<u8>)>,
    fail_next: bool,
}

impl MockI2c {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_registers(&self, address: u8, start: u8, values: &[u8]) {
        let mut inner = lock(&self.inner);
        let regs = inner.regs.entry(address).or_insert([0; 256]);
        for (i, v) in values.iter().enumerate() {
            regs[start.wrapping_add(i as u8) as usize] = *v;
        }
    }

    pub fn register(&self, address: u8, reg: u8) -> u8 {
        lock(&self.inner)
            .regs
            .get(&address)
            .map_or(0, |r| r[reg as usize])
    }

    /// Every write transfer, in order.
    pub fn writes(&self) -> Vec<(u8, Vec<u8>)> {
        lock(&self.inner).writes.clone()
    }

    pub fn fail_next(&self) {
        lock(&self.inner).fail_next = true;
    }
}

impl ErrorType for MockI2c {
    type Error = ErrorKind;
}

impl I2c<SevenBitAddress> for MockI2c {
    fn transaction(
        &mut self,
        address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> std::result::Result<(), Self::Error> {
        let mut inner = lock(&self.inner);
        if inner.fail_next {
            inner.fail_next = false;
            return Err(ErrorKind::Other);
        }
        for op in operations {
            match op {
                Operation::Write(bytes) => {
                    inner.writes.push((address, bytes.to_vec()));
                    let Some((&reg, data)) = bytes.split_first() else {
                        continue;
                    };
                    let regs = inner.regs.entry(address).or_insert([0; 256]);
                    for (i, v) in data.iter().enumerate() {
                        regs[reg.wrapping_add(i as u8) as usize] = *v;
                    }
                    inner.pointer.insert(address, reg);
                }
                Operation::Read(buf) => {
                    let reg = inner.pointer.get(&address).copied().unwrap_or(0);
                    let regs = inner.regs.get(&address).copied().unwrap_or([0; 256]);
                    for (i, b) in buf.iter_mut().enumerate() {
                        *b = regs[reg.wrapping_add(i as u8) as usize];
                    }
                }
            }
        }
        Ok(())
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
