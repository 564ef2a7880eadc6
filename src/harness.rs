//! Spawns one thread per capture worker plus the control thread, joins them
//! and gathers what each one reports.

use std::{
    fs::File,
    io::BufWriter,
    path::Path,
    thread::{self, JoinHandle},
};

use crossbeam::channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::{
    capture::CaptureWorker,
    control::ControlWorker,
    data_saver::DataFile,
    devices::{Actuator, ControllerInput, Sensor},
    reading::{unix_now, SensorKind, SensorReading},
    signal::{LoggingGroup, StopSignal},
    Result,
};

/// How a worker thread ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub name: String,
    pub kind: SensorKind,
    pub records: u64,
    pub dropped: u64,
    /// Set when the thread ended on an error rather than the stop signal.
    pub error: Option<String>,
}

impl WorkerReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub started: f64,
    pub finished: f64,
    /// In spawn order.
    pub workers: Vec<WorkerReport>,
}

impl SessionReport {
    pub fn failed(&self) -> impl Iterator<Item = &WorkerReport> {
        self.workers.iter().filter(|w| !w.is_ok())
    }

    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let f = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(f, self)?;
        Ok(())
    }
}

type Job = Box<dyn FnOnce() -> WorkerReport + Send>;

/// Triggers the stop signal when dropped, unwinding included.
struct StopOnDrop(StopSignal);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.trigger();
    }
}

struct Spawn {
    name: String,
    kind: SensorKind,
    job: Job,
}

pub struct Harness {
    stop: StopSignal,
    group: LoggingGroup,
    spawns: Vec<Spawn>,
}

impl Harness {
    pub fn new(stop: StopSignal) -> Self {
        Self {
            stop,
            group: LoggingGroup::new(),
            spawns: Vec::new(),
        }
    }

    /// The switches added so far, in the order the workers were added.
    pub fn logging_group(&self) -> &LoggingGroup {
        &self.group
    }

    pub fn add_capture<S, F>(&mut self, worker: CaptureWorker<S, F>)
    where
        S: Sensor + 'static,
        F: DataFile<Data = S::Reading> + 'static,
    {
        let name = worker.name().to_string();
        self.group.add(name.clone(), worker.switch());
        self.spawns.push(Spawn {
            name,
            kind: <S::Reading as SensorReading>::KIND,
            job: Box::new(move || worker.run()),
        });
    }

    /// Adds the control thread. `build` receives every switch registered so
    /// far, so add the capture workers first. When the control thread ends,
    /// for any reason, the whole session stops.
    pub fn spawn_control<C, A, B>(&mut self, build: B)
    where
        C: ControllerInput + 'static,
        A: Actuator + 'static,
        B: FnOnce(LoggingGroup, StopSignal) -> ControlWorker<C, A>,
    {
        let worker = build(self.group.clone(), self.stop.clone());
        let stop = self.stop.clone();
        self.spawns.push(Spawn {
            name: "controller".into(),
            kind: SensorKind::Controller,
            job: Box::new(move || {
                let _stop = StopOnDrop(stop);
                worker.run()
            }),
        });
    }

    /// Starts every worker on its own named thread and blocks until all have
    /// ended. A worker that fails does not stop the others.
    pub fn run(self) -> Result<SessionReport> {
        let started = unix_now();
        let (tx, rx): (Sender<(usize, WorkerReport)>, Receiver<_>) = unbounded();
        let mut running: Vec<(String, SensorKind, JoinHandle<()>)> =
            Vec::with_capacity(self.spawns.len());

        for (i, Spawn { name, kind, job }) in self.spawns.into_iter().enumerate() {
            let tx = tx.clone();
            let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
                let _ = tx.send((i, job()));
            });
            match spawned {
                Ok(h) => running.push((name, kind, h)),
                Err(e) => {
                    log::error!("{name}: could not spawn thread: {e}");
                    self.stop.trigger();
                    for (_, _, h) in running {
                        let _ = h.join();
                    }
                    return Err(e.into());
                }
            }
        }
        drop(tx);
        log::info!("{} worker threads running", running.len());

        let mut reports: Vec<Option<WorkerReport>> = vec![None; running.len()];
        // ends once every thread has dropped its sender
        for (i, report) in rx.iter() {
            if let Some(slot) = reports.get_mut(i) {
                *slot = Some(report);
            }
        }

        let mut workers = Vec::with_capacity(reports.len());
        for ((name, kind, h), report) in running.into_iter().zip(reports) {
            let panicked = h.join().is_err();
            let report = report.unwrap_or_else(|| WorkerReport {
                name: name.clone(),
                kind,
                records: 0,
                dropped: 0,
                error: Some("thread panicked".into()),
            });
            if panicked {
                log::error!("{name}: thread panicked");
            }
            workers.push(report);
        }

        let report = SessionReport {
            started,
            finished: unix_now(),
            workers,
        };
        for w in &report.workers {
            match &w.error {
                None => log::info!(
                    "{} ({}): {} records, {} dropped",
                    w.name,
                    w.kind,
                    w.records,
                    w.dropped
                ),
                Some(e) => log::warn!(
                    "{} ({}): {} records, {} dropped, failed: {e}",
                    w.name,
                    w.kind,
                    w.records,
                    w.dropped
                ),
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ControllerConfig,
        data_saver::CSVFile,
        devices::mock::{MockImu, RecordingActuator},
        reading::ControllerSnapshot,
    };
    use std::time::Duration;

    struct PanickingController(ControllerSnapshot);

    impl ControllerInput for PanickingController {
        fn update(&mut self) -> Result<()> {
            panic!("controller driver bug");
        }

        fn snapshot(&self) -> &ControllerSnapshot {
            &self.0
        }
    }

    #[test]
    fn test_report_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session_report.json");
        let report = SessionReport {
            started: 1.0,
            finished: 2.5,
            workers: vec![
                WorkerReport {
                    name: "imu".into(),
                    kind: SensorKind::Imu,
                    records: 3,
                    dropped: 0,
                    error: Some("device imu: gone".into()),
                },
                WorkerReport {
                    name: "lidar".into(),
                    kind: SensorKind::Lidar,
                    records: 10,
                    dropped: 1,
                    error: None,
                },
            ],
        };
        report.write_json(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"kind\": \"imu\""));
        let back: SessionReport = serde_json::from_str(&text).unwrap();
        assert_eq!(back, report);
        assert_eq!(back.failed().map(|w| w.name.as_str()).collect::<Vec<_>>(), ["imu"]);
    }

    #[test]
    fn test_control_panic_still_stops_capture() {
        let dir = tempfile::tempdir().unwrap();
        let stop = StopSignal::new();
        let mut harness = Harness::new(stop.clone());
        let file = CSVFile::create(dir.path().join("imu.csv")).unwrap();
        harness.add_capture(
            CaptureWorker::new("imu", MockImu::new(Duration::ZERO), file, stop)
                .with_interval(Duration::from_millis(1)),
        );
        let actuator = RecordingActuator::new();
        let parked = actuator.clone();
        let config = ControllerConfig::default();
        harness.spawn_control(|group, stop| {
            ControlWorker::new(
                PanickingController(ControllerSnapshot::new(15)),
                actuator,
                group,
                stop,
                &config,
            )
        });

        let report = harness.run().unwrap();
        assert_eq!(report.workers.len(), 2);
        assert!(report.workers[0].is_ok());
        assert_eq!(report.workers[1].error.as_deref(), Some("thread panicked"));
        assert_eq!(parked.history().last(), Some(&(90.0, 0.0)));
    }

    #[test]
    fn test_empty_harness_runs() {
        let report = Harness::new(StopSignal::new()).run().unwrap();
        assert!(report.workers.is_empty());
        assert!(report.finished >= report.started);
    }
}
