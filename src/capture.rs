//! One sensor, one file, one thread.

use std::{thread::sleep, time::Duration};

use crate::{
    data_saver::{DataFile, Recorded},
    devices::Sensor,
    harness::WorkerReport,
    reading::{unix_now, SensorReading},
    signal::{LoggingSwitch, StopSignal},
    Result,
};

/// Result of a single `poll_once`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Written,
    /// Reading was malformed and dropped by the recorder.
    Skipped,
    /// Logging is off; the reading was discarded.
    Idle,
}

pub struct CaptureWorker<S, F> {
    name: String,
    sensor: S,
    file: F,
    stop: StopSignal,
    switch: LoggingSwitch,
    interval: Duration,
    dropped: u64,
}

impl<S, F> CaptureWorker<S, F>
where
    S: Sensor,
    F: DataFile<Data = S::Reading>,
{
    /// Logging starts disabled; the control thread turns it on.
    pub fn new(name: impl Into<String>, sensor: S, file: F, stop: StopSignal) -> Self {
        Self {
            name: name.into(),
            sensor,
            file,
            stop,
            switch: LoggingSwitch::new(false),
            interval: Duration::ZERO,
            dropped: 0,
        }
    }

    /// Sleep between polls; zero polls as fast as the sensor delivers.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn switch(&self) -> LoggingSwitch {
        self.switch.clone()
    }

    pub fn records(&self) -> u64 {
        self.file.records()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn poll_once(&mut self) -> Result<PollOutcome> {
        let reading = self.sensor.read()?;
        let timestamp = unix_now();
        if !self.switch.is_enabled() {
            return Ok(PollOutcome::Idle);
        }
        match self.file.record(timestamp, &reading)? {
            Recorded::Written => Ok(PollOutcome::Written),
            Recorded::Dropped => {
                self.dropped += 1;
                Ok(PollOutcome::Skipped)
            }
        }
    }

    /// Polls until the stop signal is set or a read/write fails.
    pub fn run(mut self) -> WorkerReport {
        log::info!("{}: capture started", self.name);
        let mut error = None;
        while !self.stop.is_set() {
            if let Err(e) = self.poll_once() {
                log::error!("{}: {e}", self.name);
                error = Some(e.to_string());
                break;
            }
            if !self.interval.is_zero() {
                sleep(self.interval);
            }
        }
        if let Err(e) = self.file.end() {
            log::error!("{}: closing file: {e}", self.name);
            error.get_or_insert_with(|| e.to_string());
        }
        log::info!(
            "{}: capture finished, {} records, {} dropped",
            self.name,
            self.file.records(),
            self.dropped
        );
        WorkerReport {
            name: self.name,
            kind: <S::Reading as SensorReading>::KIND,
            records: self.file.records(),
            dropped: self.dropped,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::LIDAR_SCAN_WIDTH,
        data_saver::{read_lidar_dat, CSVFile, LidarDatFile},
        devices::mock::{FnSensor, MockImu},
        reading::{LidarScan, SensorKind},
        Error,
    };
    use std::fs;

    #[test]
    fn test_idle_until_switched_on() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("imu.csv");
        let file = CSVFile::create(&path).unwrap();
        let mut w = CaptureWorker::new("imu", MockImu::new(Duration::ZERO), file, StopSignal::new());

        assert_eq!(w.poll_once().unwrap(), PollOutcome::Idle);
        w.switch().set(true);
        assert_eq!(w.poll_once().unwrap(), PollOutcome::Written);
        assert_eq!(w.poll_once().unwrap(), PollOutcome::Written);
        assert_eq!(w.records(), 2);

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn test_wrong_width_scan_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lidar.dat");
        let file = LidarDatFile::create(&path, LIDAR_SCAN_WIDTH).unwrap();
        let sensor = FnSensor::new(|n| {
            let width = if n == 2 { 1080 } else { LIDAR_SCAN_WIDTH };
            Ok(LidarScan {
                timestamp: n as f64,
                ranges: vec![n as f32; width],
            })
        });
        let mut w = CaptureWorker::new("lidar", sensor, file, StopSignal::new());
        w.switch().set(true);

        let outcomes: Vec<_> = (0..3).map(|_| w.poll_once().unwrap()).collect();
        assert_eq!(
            outcomes,
            [PollOutcome::Written, PollOutcome::Skipped, PollOutcome::Written]
        );
        assert_eq!(w.dropped(), 1);

        let scans = read_lidar_dat(fs::File::open(&path).unwrap(), LIDAR_SCAN_WIDTH).unwrap();
        assert_eq!(scans.len(), 2);
        assert_eq!(scans[1].timestamp, 3.0);
    }

    #[test]
    fn test_run_reports_read_failure() {
        let dir = tempfile::tempdir().unwrap();
        let file = CSVFile::create(dir.path().join("imu.csv")).unwrap();
        let mut imu = MockImu::new(Duration::ZERO);
        let sensor = FnSensor::new(move |n| {
            if n == 3 {
                Err(Error::device("imu", "bus gone"))
            } else {
                imu.read()
            }
        });
        let w = CaptureWorker::new("imu", sensor, file, StopSignal::new());
        w.switch().set(true);

        let report = w.run();
        assert_eq!(report.kind, SensorKind::Imu);
        assert_eq!(report.records, 2);
        assert!(report.error.unwrap().contains("bus gone"));
    }

    #[test]
    fn test_run_exits_on_stop() {
        let dir = tempfile::tempdir().unwrap();
        let file = CSVFile::create(dir.path().join("imu.csv")).unwrap();
        let stop = StopSignal::new();
        stop.trigger();
        let report = CaptureWorker::new("imu", MockImu::new(Duration::ZERO), file, stop).run();
        assert_eq!(report.records, 0);
        assert!(report.error.is_none());
    }
}
