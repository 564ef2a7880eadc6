//! Press buttons and move sticks to find their joystick indices.

use std::{thread::sleep, time::Duration};

use clap::Parser;
use slugmobile::{
    config::{Config, DEFAULT_CONFIG_PATH},
    devices::{joystick::Joystick, ControllerInput},
    signal::StopSignal,
    Error, Result,
};

#[derive(Parser, Debug)]
#[command(version, about = "Print controller button and axis indices", long_about = None)]
struct Args {
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: std::path::PathBuf,

    /// Overrides `controller.device`
    #[arg(short, long)]
    device: Option<String>,

    /// Print axis motion too
    #[arg(long)]
    axes: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = Config::load_or_default(&args.config)?.controller;
    if let Some(device) = args.device {
        config.device = device;
    }
    let mut pad = Joystick::open(&config)?.keep_raw_events();

    let stop = StopSignal::new();
    let ctrlc_stop = stop.clone();
    ctrlc::set_handler(move || ctrlc_stop.trigger())
        .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {e}")))?;

    println!("Press each button on the controller to see its mapping...");
    println!("Press Ctrl+C to exit");
    while !stop.is_set() {
        pad.update()?;
        for ev in pad.raw_events().iter().filter(|e| !e.is_init()) {
            if ev.is_button() && ev.value != 0 {
                println!("Button {} was pressed", ev.number);
            } else if ev.is_axis() && args.axes {
                println!("Axis {} -> {}", ev.number, ev.value);
            }
        }
        sleep(Duration::from_millis(100));
    }
    println!("\nExiting button test...");
    Ok(())
}
