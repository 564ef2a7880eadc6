mod errors;
pub use errors::{Error, Result};

pub mod config;
pub mod reading;
pub mod signal;

pub mod data_saver;
pub mod devices;

pub mod capture;
pub mod control;
pub mod harness;

pub mod session;
