//! Logs the BMX160 straight to CSV until Ctrl-C.

use std::{path::PathBuf, time::Duration};

use clap::Parser;
use slugmobile::{
    capture::CaptureWorker,
    config::ImuConfig,
    data_saver::CSVFile,
    devices::{imu::IMU, mock::MockImu, Sensor},
    reading::ImuSample,
    signal::StopSignal,
    Error, Result,
};

#[derive(Parser, Debug)]
#[command(version, about = "Standalone IMU to CSV logger", long_about = None)]
struct Args {
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Pause between samples
    #[arg(long, default_value_t = 10)]
    interval_ms: u64,

    #[arg(long, default_value_t = ImuConfig::default().i2c_bus)]
    bus: String,

    #[arg(long, default_value_t = ImuConfig::default().address)]
    address: u16,

    /// Synthetic samples instead of the I²C device
    #[arg(long)]
    mock: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let output = args
        .output
        .unwrap_or_else(|| PathBuf::from(format!("imu_data_{}.csv", chrono::Utc::now().timestamp())));
    let imu: Box<dyn Sensor<Reading = ImuSample>> = if args.mock {
        Box::new(MockImu::new(Duration::ZERO))
    } else {
        Box::new(IMU::open(&args.bus, args.address)?)
    };
    let file = CSVFile::<ImuSample>::create(&output)?;
    log::info!("Writing {}", output.display());

    let stop = StopSignal::new();
    let ctrlc_stop = stop.clone();
    ctrlc::set_handler(move || ctrlc_stop.trigger())
        .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {e}")))?;

    let worker = CaptureWorker::new("imu", imu, file, stop)
        .with_interval(Duration::from_millis(args.interval_ms));
    worker.switch().set(true);
    let report = worker.run();
    println!("{} samples written to {}", report.records, output.display());
    match report.error {
        Some(e) => Err(Error::Other(e)),
        None => Ok(()),
    }
}
