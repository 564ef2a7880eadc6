use std::path::PathBuf;

use clap::Parser;
use slugmobile::{
    config::{Config, DEFAULT_CONFIG_PATH},
    session::{self, SessionPaths, Source},
    signal::StopSignal,
    Error, Result,
};

/// Multi-sensor data collection on the SlugMobile.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// TOML config; defaults are used when the file does not exist
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Overrides `output.dir`
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Run with synthetic devices instead of the car's hardware
    #[arg(long)]
    mock: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // read before the logger exists so its level can come from the file
    let config = match args.config.exists() {
        true => Config::from_file(&args.config)?,
        false => Config::default(),
    };
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();
    log::info!("Starting multi-sensor data collection...");
    log::info!(
        "Config: {}",
        if args.config.exists() {
            args.config.display().to_string()
        } else {
            "defaults".into()
        }
    );
    config.validate()?;

    let root = args.output.unwrap_or_else(|| PathBuf::from(&config.output.dir));
    let paths = SessionPaths::now(&root);
    let source = if args.mock { Source::Mock } else { Source::Hardware };

    let stop = StopSignal::new();
    let ctrlc_stop = stop.clone();
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        ctrlc_stop.trigger();
    })
    .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {e}")))?;

    let harness = session::build(&config, source, &paths, stop)?;
    let report = harness.run()?;
    report.write_json(paths.report())?;
    log::info!("Session report written to {}", paths.report().display());

    let failed = report.failed().count();
    if failed > 0 {
        log::warn!("{failed} worker(s) ended with an error");
    }
    log::info!("All sensors have completed data collection.");
    Ok(())
}
