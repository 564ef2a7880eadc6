//! Flags shared between the control thread and the capture threads.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// One-way latch asking every thread to finish. Once set it stays set.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Per-worker "logging enabled" bit. The worker reads it before every write,
/// the control thread flips it.
#[derive(Debug, Clone, Default)]
pub struct LoggingSwitch(Arc<AtomicBool>);

impl LoggingSwitch {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Ordered handles to every capture worker's switch, built by the harness
/// before anything starts.
#[derive(Debug, Clone, Default)]
pub struct LoggingGroup {
    members: Vec<(String, LoggingSwitch)>,
}

impl LoggingGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, switch: LoggingSwitch) {
        self.members.push((name.into(), switch));
    }

    pub fn set_all(&self, enabled: bool) {
        for (name, switch) in &self.members {
            log::debug!("{name}: logging {}", if enabled { "on" } else { "off" });
            switch.set(enabled);
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|(name, _)| name.as_str())
    }
}
