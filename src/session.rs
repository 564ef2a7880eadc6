//! Turns a `Config` into a ready-to-run `Harness`: output layout, device
//! adapters (real or synthetic) and one worker per enabled sensor.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    capture::CaptureWorker,
    config::Config,
    control::{ControlWorker, ControllerLogEntry},
    data_saver::{CSVFile, FrameSaver, LidarDatFile},
    devices::{
        event_camera::EventCamera,
        hokuyo::Hokuyo,
        imu::IMU,
        joystick::Joystick,
        mock::{MockCamera, MockEventCamera, MockImu, MockLidar, RecordingActuator, ScriptedController},
        servo::SlugMobile,
        Actuator, ControllerInput, Sensor,
    },
    harness::Harness,
    reading::{Event, Frame, ImuSample, LidarScan},
    signal::StopSignal,
    Result,
};

/// Where a session's files go. `start` is the session's unix second and
/// ends up in every per-sensor file name.
#[derive(Debug, Clone)]
pub struct SessionPaths {
    pub root: PathBuf,
    pub start: i64,
}

impl SessionPaths {
    pub fn new<P: AsRef<Path>>(root: P, start: i64) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            start,
        }
    }

    pub fn now<P: AsRef<Path>>(root: P) -> Self {
        Self::new(root, chrono::Utc::now().timestamp())
    }

    pub fn color_dir(&self) -> PathBuf {
        self.root.join("color_frames")
    }

    pub fn gray_dir(&self) -> PathBuf {
        self.root.join("gray_frames")
    }

    pub fn imu_csv(&self) -> PathBuf {
        self.root.join("imu").join(format!("imu_data_{}.csv", self.start))
    }

    pub fn event_csv(&self) -> PathBuf {
        self.root
            .join("event_camera")
            .join(format!("event_data_{}.csv", self.start))
    }

    pub fn controller_csv(&self) -> PathBuf {
        self.root
            .join("controller")
            .join(format!("controller_log_{}.csv", self.start))
    }

    pub fn lidar_dat(&self) -> PathBuf {
        self.root
            .join("lidar")
            .join(format!("lidar_output_{}.dat", self.start))
    }

    pub fn report(&self) -> PathBuf {
        self.root.join("session_report.json")
    }

    pub fn create_dirs(&self) -> Result<()> {
        for dir in ["color_frames", "gray_frames", "imu", "event_camera", "controller", "lidar"] {
            fs::create_dir_all(self.root.join(dir))?;
        }
        Ok(())
    }
}

/// Hardware on the car, or synthetic devices for a bench run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Hardware,
    Mock,
}

type BoxSensor<R> = Box<dyn Sensor<Reading = R>>;

fn interval(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

/// Opens every enabled device and wires up the workers. Fails before any
/// thread starts if a device cannot be opened.
pub fn build(config: &Config, source: Source, paths: &SessionPaths, stop: StopSignal) -> Result<Harness> {
    paths.create_dirs()?;
    let mut harness = Harness::new(stop.clone());

    if config.camera.enabled {
        if let Some(camera) = open_camera(config, source)? {
            let saver = FrameSaver::new(paths.color_dir(), paths.gray_dir(), config.camera.downsample)?;
            harness.add_capture(
                CaptureWorker::new("camera", camera, saver, stop.clone())
                    .with_interval(interval(config.camera.interval_ms)),
            );
        }
    }

    if config.imu.enabled {
        let imu: BoxSensor<ImuSample> = match source {
            Source::Hardware => Box::new(IMU::open(&config.imu.i2c_bus, config.imu.address)?),
            Source::Mock => Box::new(MockImu::new(Duration::from_millis(10))),
        };
        let file = CSVFile::<ImuSample>::create(paths.imu_csv())?;
        harness.add_capture(
            CaptureWorker::new("imu", imu, file, stop.clone())
                .with_interval(interval(config.imu.interval_ms)),
        );
    }

    if config.lidar.enabled {
        let width = config.lidar.scan_width;
        let lidar: BoxSensor<LidarScan> = match source {
            Source::Hardware => Box::new(Hokuyo::connect(&config.lidar.address, width)?),
            Source::Mock => Box::new(MockLidar::new(width, Duration::from_millis(25))),
        };
        let file = LidarDatFile::create(paths.lidar_dat(), width)?;
        harness.add_capture(
            CaptureWorker::new("lidar", lidar, file, stop.clone())
                .with_interval(interval(config.lidar.interval_ms)),
        );
    }

    if config.event_camera.enabled {
        let events: BoxSensor<Event> = match source {
            Source::Hardware => Box::new(EventCamera::open(&config.event_camera.path)?),
            Source::Mock => Box::new(MockEventCamera::new(Duration::from_millis(1))),
        };
        let file = CSVFile::<Event>::create(paths.event_csv())?;
        harness.add_capture(
            CaptureWorker::new("event_camera", events, file, stop.clone())
                .with_interval(interval(config.event_camera.interval_ms)),
        );
    }

    let c = &config.controller;
    let (controller, actuator): (Box<dyn ControllerInput>, Box<dyn Actuator>) = match source {
        Source::Hardware => (
            Box::new(Joystick::open(c)?),
            Box::new(SlugMobile::open(&config.actuator)?),
        ),
        Source::Mock => (
            Box::new(ScriptedController::bench_drive(c.button_count, c.start_button)),
            Box::new(RecordingActuator::new()),
        ),
    };
    let log_file = if c.record {
        Some(CSVFile::<ControllerLogEntry>::create(paths.controller_csv())?)
    } else {
        None
    };
    harness.spawn_control(|group, stop| {
        let worker = ControlWorker::new(controller, actuator, group, stop, c);
        match log_file {
            Some(f) => worker.with_log_file(f),
            None => worker,
        }
    });

    log::info!(
        "Session {} in {}: {}",
        paths.start,
        paths.root.display(),
        harness.logging_group().names().collect::<Vec<_>>().join(", ")
    );
    Ok(harness)
}

#[cfg(feature = "usb-camera")]
fn open_camera(config: &Config, source: Source) -> Result<Option<BoxSensor<Frame>>> {
    use crate::devices::usb_camera::Camera;

    let c = &config.camera;
    let camera: BoxSensor<Frame> = match source {
        Source::Hardware => Box::new(Camera::open(c)?),
        Source::Mock => Box::new(MockCamera::new(c.width, c.height, c.fps)),
    };
    Ok(Some(camera))
}

#[cfg(not(feature = "usb-camera"))]
fn open_camera(config: &Config, source: Source) -> Result<Option<BoxSensor<Frame>>> {
    let c = &config.camera;
    match source {
        Source::Hardware => {
            log::warn!("built without the usb-camera feature, camera disabled");
            Ok(None)
        }
        Source::Mock => {
            let camera: BoxSensor<Frame> = Box::new(MockCamera::new(c.width, c.height, c.fps));
            Ok(Some(camera))
        }
    }
}
