//! Records Hokuyo scans to the `.dat` format, or dumps a recording.

use std::{fs::File, io::BufReader, path::PathBuf, time::Duration};

use clap::{Parser, Subcommand};
use slugmobile::{
    capture::CaptureWorker,
    config::{LidarConfig, LIDAR_SCAN_WIDTH},
    data_saver::{read_lidar_dat, LidarDatFile},
    devices::{hokuyo::Hokuyo, mock::MockLidar, Sensor},
    reading::LidarScan,
    signal::StopSignal,
    Error, Result,
};

#[derive(Parser, Debug)]
#[command(version, about = "Hokuyo ranging logger and .dat reader", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Ranges per scan
    #[arg(long, global = true, default_value_t = LIDAR_SCAN_WIDTH)]
    width: usize,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Record scans until Ctrl-C
    Record {
        file: PathBuf,

        #[arg(long, default_value_t = LidarConfig::default().address)]
        address: String,

        /// Fake scans instead of the sensor
        #[arg(long)]
        mock: bool,
    },
    /// Print one summary line per scan
    Dump {
        file: PathBuf,

        /// Also print every range
        #[arg(long)]
        full: bool,
    },
}

fn record(file: PathBuf, address: &str, mock: bool, width: usize) -> Result<()> {
    let lidar: Box<dyn Sensor<Reading = LidarScan>> = if mock {
        Box::new(MockLidar::new(width, Duration::from_millis(25)))
    } else {
        Box::new(Hokuyo::connect(address, width)?)
    };
    let dat = LidarDatFile::create(&file, width)?;

    let stop = StopSignal::new();
    let ctrlc_stop = stop.clone();
    ctrlc::set_handler(move || {
        log::info!("Interrupted. Closing file and exiting.");
        ctrlc_stop.trigger();
    })
    .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {e}")))?;

    log::info!("Recording LIDAR data to {}...", file.display());
    let worker = CaptureWorker::new("lidar", lidar, dat, stop);
    worker.switch().set(true);
    let report = worker.run();
    println!(
        "{} scans written, {} skipped, file closed.",
        report.records, report.dropped
    );
    match report.error {
        Some(e) => Err(Error::Other(e)),
        None => Ok(()),
    }
}

fn dump(file: PathBuf, full: bool, width: usize) -> Result<()> {
    let scans = read_lidar_dat(BufReader::new(File::open(&file)?), width)?;
    for (i, scan) in scans.iter().enumerate() {
        let (min, max) = scan
            .ranges
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), r| (lo.min(*r), hi.max(*r)));
        let mean = scan.ranges.iter().sum::<f32>() / scan.ranges.len().max(1) as f32;
        println!("{i}\t{:.6}\tmin {min:.1}\tmax {max:.1}\tmean {mean:.1}", scan.timestamp);
        if full {
            let ranges: Vec<String> = scan.ranges.iter().map(|r| r.to_string()).collect();
            println!("{}", ranges.join(" "));
        }
    }
    println!("{} scans of {width} ranges", scans.len());
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Record {
            file,
            address,
            mock,
        } => record(file, &address, mock, cli.width),
        Commands::Dump { file, full } => dump(file, full, cli.width),
    }
}
