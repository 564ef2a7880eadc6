use std::{fs, thread, time::Duration};

use slugmobile::{
    capture::{CaptureWorker, PollOutcome},
    config::{Config, ControllerConfig, LIDAR_SCAN_WIDTH},
    control::{ControlAction, ControlWorker},
    data_saver::{read_lidar_dat, CSVFile, LidarDatFile},
    devices::{
        mock::{FnSensor, MockImu, MockLidar, RecordingActuator, ScriptedController},
        Actuator, Sensor,
    },
    harness::Harness,
    reading::{ControllerSnapshot, ImuSample, SensorKind},
    session::{self, SessionPaths, Source},
    signal::{LoggingGroup, LoggingSwitch, StopSignal},
    Error,
};

fn idle() -> ControllerSnapshot {
    ControllerSnapshot::new(15)
}

fn press(button: usize) -> ControllerSnapshot {
    let mut s = idle();
    s.buttons[button] = true;
    s
}

fn fast_controller() -> ControllerConfig {
    ControllerConfig {
        poll_interval_ms: 5,
        ..Default::default()
    }
}

#[test]
fn start_on_third_poll_writes_last_polls() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("imu.csv");
    let stop = StopSignal::new();

    let mut capture = CaptureWorker::new(
        "imu",
        MockImu::new(Duration::ZERO),
        CSVFile::<ImuSample>::create(&path).unwrap(),
        stop.clone(),
    );
    let mut group = LoggingGroup::new();
    group.add("imu", capture.switch());

    let script = vec![idle(), idle(), press(7), idle(), idle()];
    let mut control = ControlWorker::new(
        ScriptedController::new(script, 15),
        RecordingActuator::new(),
        group,
        stop,
        &fast_controller(),
    );

    let mut outcomes = Vec::new();
    for _ in 0..5 {
        control.step().unwrap();
        outcomes.push(capture.poll_once().unwrap());
    }
    assert_eq!(outcomes[..2], [PollOutcome::Idle, PollOutcome::Idle]);

    let rows = fs::read_to_string(&path).unwrap().lines().count() - 1;
    assert!((2..=3).contains(&rows), "{rows} rows");
    assert_eq!(rows as u64, capture.records());
}

#[test]
fn failing_sensor_does_not_stop_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let stop = StopSignal::new();
    let mut harness = Harness::new(stop.clone());

    // the failing IMU only starts delivering once logging is on, so its
    // first three reads are all recorded
    let imu_file = CSVFile::<ImuSample>::create(dir.path().join("imu.csv")).unwrap();
    let gate = LoggingSwitch::new(false);
    let imu_gate = gate.clone();
    let mut mock = MockImu::new(Duration::from_millis(1));
    let failing = FnSensor::new(move |n| {
        while !imu_gate.is_enabled() {
            thread::sleep(Duration::from_millis(1));
        }
        if n == 4 {
            return Err(Error::device("imu", "unplugged"));
        }
        mock.read()
    });
    let imu = CaptureWorker::new("imu", failing, imu_file, stop.clone());
    let imu_switch = imu.switch();
    harness.add_capture(imu);

    let lidar_path = dir.path().join("lidar.dat");
    let lidar = CaptureWorker::new(
        "lidar",
        MockLidar::new(LIDAR_SCAN_WIDTH, Duration::from_millis(5)),
        LidarDatFile::create(&lidar_path, LIDAR_SCAN_WIDTH).unwrap(),
        stop.clone(),
    );
    harness.add_capture(lidar);

    let mut script = vec![press(7)];
    script.extend((0..100).map(|_| idle()));
    script.push(press(8));
    harness.spawn_control(|mut group, stop| {
        group.add("gate", gate);
        ControlWorker::new(
            ScriptedController::new(script, 15),
            RecordingActuator::new(),
            group,
            stop,
            &fast_controller(),
        )
    });

    let report = harness.run().unwrap();
    assert!(stop.is_set());
    assert!(imu_switch.is_enabled());

    let names: Vec<&str> = report.workers.iter().map(|w| w.name.as_str()).collect();
    assert_eq!(names, ["imu", "lidar", "controller"]);

    let imu = &report.workers[0];
    assert_eq!(imu.records, 3);
    assert!(imu.error.as_deref().unwrap().contains("unplugged"));

    let lidar = &report.workers[1];
    assert!(lidar.is_ok());
    assert!(lidar.records > imu.records, "lidar wrote {}", lidar.records);
    let scans = read_lidar_dat(fs::File::open(&lidar_path).unwrap(), LIDAR_SCAN_WIDTH).unwrap();
    assert_eq!(scans.len() as u64, lidar.records);

    let controller = &report.workers[2];
    assert_eq!(controller.kind, SensorKind::Controller);
    assert!(controller.is_ok());
}

#[test]
fn exit_button_parks_the_car() {
    let actuator = RecordingActuator::new();
    let mut s = idle();
    s.left_stick[0] = -1.0;
    s.triggers[0] = 1.0;
    let mut control = ControlWorker::new(
        ScriptedController::new(vec![s, press(8)], 15),
        actuator.clone(),
        LoggingGroup::new(),
        StopSignal::new(),
        &fast_controller(),
    );
    assert_eq!(control.step().unwrap(), ControlAction::Drive);
    assert_eq!(control.actuator().steering_angle(), 1.111);
    assert_eq!(control.step().unwrap(), ControlAction::Exit);
    drop(control);
    assert_eq!(actuator.history().last(), Some(&(90.0, 0.0)));
}

#[test]
fn mock_session_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.camera.enabled = false;
    config.event_camera.enabled = true;
    config.validate().unwrap();

    let paths = SessionPaths::new(dir.path(), 1_700_000_000);
    let stop = StopSignal::new();
    let harness = session::build(&config, Source::Mock, &paths, stop.clone()).unwrap();

    let timer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(300));
        stop.trigger();
    });
    let report = harness.run().unwrap();
    timer.join().unwrap();
    report.write_json(paths.report()).unwrap();

    assert_eq!(report.workers.len(), 4);
    assert!(report.workers.iter().all(|w| w.is_ok()), "{report:?}");

    let imu_rows = fs::read_to_string(paths.imu_csv()).unwrap();
    let mut lines = imu_rows.lines();
    assert_eq!(
        lines.next(),
        Some("timestamp,magn_x,magn_y,magn_z,gyro_x,gyro_y,gyro_z,accel_x,accel_y,accel_z")
    );
    for line in lines {
        assert_eq!(line.split(',').count(), 10);
    }

    let dat_len = fs::metadata(paths.lidar_dat()).unwrap().len() as usize;
    assert_eq!(dat_len % LidarDatFile::record_len(LIDAR_SCAN_WIDTH), 0);

    let json = fs::read_to_string(paths.report()).unwrap();
    assert!(json.contains("\"event_camera\""));
}
