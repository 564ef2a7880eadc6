//! Xbox pad through the Linux joystick API (`/dev/input/jsN`).
//!
//! A reader thread blocks on the device and forwards raw events over a
//! channel; `update` only drains that channel so the control loop never
//! waits on the pad.

use std::{
    fs::File,
    io::Read,
    thread,
};

use crossbeam::channel::{unbounded, Receiver, TryRecvError};

use crate::{
    config::ControllerConfig,
    devices::ControllerInput,
    reading::ControllerSnapshot,
    Error, Result,
};

const JS_EVENT_BUTTON: u8 = 0x01;
const JS_EVENT_AXIS: u8 = 0x02;
const JS_EVENT_INIT: u8 = 0x80;

/// `struct js_event` from `linux/joystick.h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JsEvent {
    pub time_ms: u32,
    pub value: i16,
    pub kind: u8,
    pub number: u8,
}

impl JsEvent {
    pub const SIZE: usize = 8;

    pub fn from_bytes(buf: &[u8; Self::SIZE]) -> Self {
        Self {
            time_ms: u32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]),
            value: i16::from_ne_bytes([buf[4], buf[5]]),
            kind: buf[6],
            number: buf[7],
        }
    }

    pub fn is_button(&self) -> bool {
        self.kind & !JS_EVENT_INIT == JS_EVENT_BUTTON
    }

    pub fn is_axis(&self) -> bool {
        self.kind & !JS_EVENT_INIT == JS_EVENT_AXIS
    }

    /// Synthetic event the driver sends on open to report initial state.
    pub fn is_init(&self) -> bool {
        self.kind & JS_EVENT_INIT != 0
    }
}

/// Which axis number feeds which snapshot field.
#[derive(Debug, Clone)]
pub struct AxisLayout {
    steering: u8,
    left_stick_y: u8,
    right_stick_x: u8,
    right_stick_y: u8,
    left_trigger: u8,
    right_trigger: u8,
    dpad_x: u8,
    dpad_y: u8,
}

impl From<&ControllerConfig> for AxisLayout {
    fn from(c: &ControllerConfig) -> Self {
        // indices are bounded by Config::validate
        let ax = |i: usize| i as u8;
        Self {
            steering: ax(c.steering_axis),
            left_stick_y: ax(c.left_stick_y_axis),
            right_stick_x: ax(c.right_stick_x_axis),
            right_stick_y: ax(c.right_stick_y_axis),
            left_trigger: ax(c.left_trigger_axis),
            right_trigger: ax(c.right_trigger_axis),
            dpad_x: ax(c.dpad_x_axis),
            dpad_y: ax(c.dpad_y_axis),
        }
    }
}

impl AxisLayout {
    pub fn apply(&self, state: &mut ControllerSnapshot, ev: &JsEvent) {
        if ev.is_button() {
            if let Some(b) = state.buttons.get_mut(ev.number as usize) {
                *b = ev.value != 0;
            }
            return;
        }
        if !ev.is_axis() {
            return;
        }
        let v = (f32::from(ev.value) / 32767.0).clamp(-1.0, 1.0);
        // triggers rest at -1 and read 1 fully pulled
        let trigger = (v + 1.0) / 2.0;
        match ev.number {
            n if n == self.steering => state.left_stick[0] = v,
            n if n == self.left_stick_y => state.left_stick[1] = v,
            n if n == self.right_stick_x => state.right_stick[0] = v,
            n if n == self.right_stick_y => state.right_stick[1] = v,
            n if n == self.left_trigger => state.triggers[0] = trigger,
            n if n == self.right_trigger => state.triggers[1] = trigger,
            n if n == self.dpad_x => state.dpad[0] = ev.value.signum() as i8,
            // the hat reports up as negative; store up as +1
            n if n == self.dpad_y => state.dpad[1] = -ev.value.signum() as i8,
            _ => {}
        }
    }
}

pub struct Joystick {
    rx: Receiver<Result<JsEvent>>,
    layout: AxisLayout,
    state: ControllerSnapshot,
    raw: Vec<JsEvent>,
    keep_raw: bool,
}

impl Joystick {
    pub fn open(config: &ControllerConfig) -> Result<Self> {
        let mut dev = File::open(&config.device).map_err(|e| {
            Error::device(
                &config.device,
                format!("No controller found! Please connect an Xbox controller. ({e})"),
            )
        })?;
        log::info!("Detected controller at {}", config.device);

        let (tx, rx) = unbounded();
        thread::Builder::new()
            .name("joystick-reader".into())
            .spawn(move || {
                let mut buf = [0u8; JsEvent::SIZE];
                loop {
                    let msg = dev
                        .read_exact(&mut buf)
                        .map(|_| JsEvent::from_bytes(&buf))
                        .map_err(Error::from);
                    let failed = msg.is_err();
                    if tx.send(msg).is_err() || failed {
                        break;
                    }
                }
            })?;

        Ok(Self {
            rx,
            layout: AxisLayout::from(config),
            state: ControllerSnapshot::new(config.button_count),
            raw: Vec::new(),
            keep_raw: false,
        })
    }

    /// Also keep the raw events drained by each `update`, for mapping tools.
    pub fn keep_raw_events(mut self) -> Self {
        self.keep_raw = true;
        self
    }

    pub fn raw_events(&self) -> &[JsEvent] {
        &self.raw
    }
}

impl ControllerInput for Joystick {
    fn update(&mut self) -> Result<()> {
        self.raw.clear();
        loop {
            match self.rx.try_recv() {
                Ok(Ok(ev)) => {
                    self.layout.apply(&mut self.state, &ev);
                    if self.keep_raw {
                        self.raw.push(ev);
                    }
                }
                Ok(Err(e)) => return Err(e),
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Disconnected) => return Err(Error::ChannelRecv),
            }
        }
    }

    fn snapshot(&self) -> &ControllerSnapshot {
        &self.state
    }
}
