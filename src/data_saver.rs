use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Cursor, Read, Write},
    marker::PhantomData,
    path::{Path, PathBuf},
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use image::{imageops, ImageFormat, RgbImage};
use serde::Serialize;

use crate::{
    reading::{Event, Frame, ImuSample, LidarScan},
    Error, Result,
};

/// What happened to one reading handed to a [`DataFile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    Written,
    /// Reading was malformed and left out of the file.
    Dropped,
}

/// Append-only sink owned by one capture thread. Every successful `record`
/// is flushed before it returns.
pub trait DataFile: Send {
    type Data;
    fn record(&mut self, timestamp: f64, data: &Self::Data) -> Result<Recorded>;
    fn records(&self) -> u64;
    fn end(&mut self) -> Result<()>;
}

/// A reading that renders as one CSV row. `HEADER` and `Row` must agree on
/// the number of fields.
pub trait CsvRow {
    const HEADER: &'static [&'static str];
    type Row: Serialize;
    fn row(&self, timestamp: f64) -> Self::Row;
}

pub struct CSVFile<D> {
    csv_wtr: csv::Writer<File>,
    records: u64,
    _p: PhantomData<fn(&D)>,
}

impl<D: CsvRow> CSVFile<D> {
    /// Creates (truncating) the file and writes the header row.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let mut csv_wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(f);
        csv_wtr.write_record(D::HEADER)?;
        csv_wtr.flush()?;
        Ok(Self {
            csv_wtr,
            records: 0,
            _p: PhantomData,
        })
    }
}

impl<D: CsvRow> DataFile for CSVFile<D> {
    type Data = D;

    fn record(&mut self, timestamp: f64, data: &D) -> Result<Recorded> {
        self.csv_wtr.serialize(data.row(timestamp))?;
        self.csv_wtr.flush()?;
        self.records += 1;
        Ok(Recorded::Written)
    }

    fn records(&self) -> u64 {
        self.records
    }

    fn end(&mut self) -> Result<()> {
        self.csv_wtr.flush()?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct ImuRow {
    timestamp: f64,
    magn_x: f32,
    magn_y: f32,
    magn_z: f32,
    gyro_x: f32,
    gyro_y: f32,
    gyro_z: f32,
    accel_x: f32,
    accel_y: f32,
    accel_z: f32,
}

impl CsvRow for ImuSample {
    const HEADER: &'static [&'static str] = &[
        "timestamp", "magn_x", "magn_y", "magn_z", "gyro_x", "gyro_y", "gyro_z", "accel_x",
        "accel_y", "accel_z",
    ];
    type Row = ImuRow;

    fn row(&self, timestamp: f64) -> ImuRow {
        ImuRow {
            timestamp,
            magn_x: self.magn.x,
            magn_y: self.magn.y,
            magn_z: self.magn.z,
            gyro_x: self.gyro.x,
            gyro_y: self.gyro.y,
            gyro_z: self.gyro.z,
            accel_x: self.accel.x,
            accel_y: self.accel.y,
            accel_z: self.accel.z,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EventRow {
    timestamp: f64,
    x: i32,
    y: i32,
    polarity: i32,
    t: i64,
}

impl CsvRow for Event {
    const HEADER: &'static [&'static str] = &["timestamp", "x", "y", "polarity", "t"];
    type Row = EventRow;

    fn row(&self, timestamp: f64) -> EventRow {
        EventRow {
            timestamp,
            x: self.x,
            y: self.y,
            polarity: self.polarity,
            t: self.t,
        }
    }
}

/// Fixed-width binary ranging log: `f64` timestamp then `width` `f32`
/// ranges per record, little endian, nothing in between.
pub struct LidarDatFile {
    wtr: BufWriter<File>,
    width: usize,
    records: u64,
}

impl LidarDatFile {
    pub fn create<P: AsRef<Path>>(path: P, width: usize) -> Result<Self> {
        let f = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            wtr: BufWriter::new(f),
            width,
            records: 0,
        })
    }

    pub fn record_len(width: usize) -> usize {
        8 + 4 * width
    }
}

impl DataFile for LidarDatFile {
    type Data = LidarScan;

    /// Scans carry their own receive time; `_timestamp` is ignored.
    fn record(&mut self, _timestamp: f64, scan: &LidarScan) -> Result<Recorded> {
        if scan.ranges.len() != self.width {
            log::warn!(
                "Expected {} elements, got {}. Skipping this scan.",
                self.width,
                scan.ranges.len()
            );
            return Ok(Recorded::Dropped);
        }
        self.wtr.write_f64::<LittleEndian>(scan.timestamp)?;
        for range in &scan.ranges {
            self.wtr.write_f32::<LittleEndian>(*range)?;
        }
        self.wtr.flush()?;
        self.records += 1;
        Ok(Recorded::Written)
    }

    fn records(&self) -> u64 {
        self.records
    }

    fn end(&mut self) -> Result<()> {
        self.wtr.flush()?;
        Ok(())
    }
}

/// Splits a ranging log back into scans.
pub fn read_lidar_dat<R: Read>(mut rdr: R, width: usize) -> Result<Vec<LidarScan>> {
    let mut buf = Vec::new();
    rdr.read_to_end(&mut buf)?;
    let record_len = LidarDatFile::record_len(width);
    if buf.len() % record_len != 0 {
        return Err(Error::Protocol(format!(
            "{} bytes is not a whole number of {record_len} byte records",
            buf.len()
        )));
    }

    let mut scans = Vec::with_capacity(buf.len() / record_len);
    for chunk in buf.chunks_exact(record_len) {
        let mut cur = Cursor::new(chunk);
        let timestamp = cur.read_f64::<LittleEndian>()?;
        let mut ranges = vec![0f32; width];
        cur.read_f32_into::<LittleEndian>(&mut ranges)?;
        scans.push(LidarScan { timestamp, ranges });
    }
    Ok(scans)
}

/// Writes each frame twice: the color original and a gray copy.
pub struct FrameSaver {
    color_dir: PathBuf,
    gray_dir: PathBuf,
    downsample: u32,
    records: u64,
}

impl FrameSaver {
    pub fn new<P: AsRef<Path>>(color_dir: P, gray_dir: P, downsample: u32) -> Result<Self> {
        std::fs::create_dir_all(&color_dir)?;
        std::fs::create_dir_all(&gray_dir)?;
        Ok(Self {
            color_dir: color_dir.as_ref().to_path_buf(),
            gray_dir: gray_dir.as_ref().to_path_buf(),
            downsample: downsample.max(1),
            records: 0,
        })
    }

    pub fn color_path(&self, stamp: &str) -> PathBuf {
        self.color_dir.join(format!("color_{stamp}.jpg"))
    }

    pub fn gray_path(&self, stamp: &str) -> PathBuf {
        self.gray_dir.join(format!("gray_{stamp}.jpg"))
    }
}

impl DataFile for FrameSaver {
    type Data = Frame;

    fn record(&mut self, timestamp: f64, frame: &Frame) -> Result<Recorded> {
        let Some(color) = RgbImage::from_raw(frame.width, frame.height, frame.rgb.clone()) else {
            log::warn!(
                "{}x{} frame with {} bytes, skipping",
                frame.width,
                frame.height,
                frame.rgb.len()
            );
            return Ok(Recorded::Dropped);
        };
        let mut gray = imageops::grayscale(&color);
        if self.downsample > 1 {
            let (w, h) = (
                (frame.width / self.downsample).max(1),
                (frame.height / self.downsample).max(1),
            );
            gray = imageops::resize(&gray, w, h, imageops::FilterType::Triangle);
        }

        let stamp = frame_stamp(timestamp);
        color.save_with_format(self.color_path(&stamp), ImageFormat::Jpeg)?;
        gray.save_with_format(self.gray_path(&stamp), ImageFormat::Jpeg)?;
        self.records += 1;
        Ok(Recorded::Written)
    }

    fn records(&self) -> u64 {
        self.records
    }

    fn end(&mut self) -> Result<()> {
        Ok(())
    }
}

/// `YYYYMMDD_HHMMSS_micros` in local time.
pub fn frame_stamp(timestamp: f64) -> String {
    let mut secs = timestamp.floor() as i64;
    // nearest microsecond; f64 at unix scale is off by a few hundred ns
    let mut micros = ((timestamp - timestamp.floor()) * 1e6).round() as u32;
    if micros >= 1_000_000 {
        secs += 1;
        micros = 0;
    }
    match chrono::DateTime::from_timestamp(secs, micros * 1000) {
        Some(t) => t
            .with_timezone(&chrono::Local)
            .format("%Y%m%d_%H%M%S_%6f")
            .to_string(),
        None => format!("{timestamp}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    fn imu(v: f32) -> ImuSample {
        ImuSample {
            magn: Vector3::new(v, v, v),
            gyro: Vector3::new(0.0, 1.0, 2.0),
            accel: Vector3::new(0.0, 0.0, 9.81),
        }
    }

    #[test]
    fn test_csv_rows_match_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("imu.csv");
        let mut f = CSVFile::<ImuSample>::create(&path).unwrap();
        for i in 0..5 {
            assert_eq!(f.record(1.5 + i as f64, &imu(i as f32)).unwrap(), Recorded::Written);
        }
        f.end().unwrap();
        assert_eq!(f.records(), 5);

        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(&path)
            .unwrap();
        let rows: Vec<csv::StringRecord> = rdr.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[0].iter().collect::<Vec<_>>(), ImuSample::HEADER);
        for row in &rows[1..] {
            assert_eq!(row.len(), ImuSample::HEADER.len());
        }
        assert_eq!(&rows[1][0], "1.5");
    }

    #[test]
    fn test_event_rows_match_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.csv");
        let mut f = CSVFile::<Event>::create(&path).unwrap();
        let ev = Event {
            x: 12,
            y: 34,
            polarity: 1,
            t: 123_456_789,
        };
        f.record(2.0, &ev).unwrap();
        drop(f);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, ["timestamp,x,y,polarity,t", "2.0,12,34,1,123456789"]);
    }

    #[test]
    fn test_lidar_wrong_width_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.dat");
        let mut f = LidarDatFile::create(&path, 1081).unwrap();

        let good = LidarScan {
            timestamp: 10.0,
            ranges: vec![1.0; 1081],
        };
        let short = LidarScan {
            timestamp: 11.0,
            ranges: vec![1.0; 1080],
        };
        let long = LidarScan {
            timestamp: 12.0,
            ranges: vec![1.0; 1082],
        };
        assert_eq!(f.record(0.0, &good).unwrap(), Recorded::Written);
        assert_eq!(f.record(0.0, &short).unwrap(), Recorded::Dropped);
        assert_eq!(f.record(0.0, &long).unwrap(), Recorded::Dropped);
        assert_eq!(f.records(), 1);
        f.end().unwrap();

        let len = std::fs::metadata(&path).unwrap().len();
        assert_eq!(len as usize, LidarDatFile::record_len(1081));
    }

    #[test]
    fn test_lidar_file_reads_back_bit_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.dat");
        let width = 1081;
        let scans: Vec<LidarScan> = (0..4)
            .map(|n| LidarScan {
                timestamp: 1_700_000_000.123_456 + n as f64 * 0.025,
                ranges: (0..width)
                    .map(|i| (i as f32 * 0.37 + n as f32).sin() * 3000.0)
                    .collect(),
            })
            .collect();

        let mut f = LidarDatFile::create(&path, width).unwrap();
        for scan in &scans {
            f.record(0.0, scan).unwrap();
        }
        f.end().unwrap();

        let back = read_lidar_dat(File::open(&path).unwrap(), width).unwrap();
        assert_eq!(back.len(), scans.len());
        for (a, b) in back.iter().zip(&scans) {
            assert_eq!(a.timestamp.to_bits(), b.timestamp.to_bits());
            assert!(a.ranges.iter().zip(&b.ranges).all(|(x, y)| x.to_bits() == y.to_bits()));
        }
    }

    #[test]
    fn test_lidar_reader_rejects_truncated_file() {
        let bytes = vec![0u8; LidarDatFile::record_len(1081) + 3];
        assert!(matches!(
            read_lidar_dat(bytes.as_slice(), 1081),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_frame_saver_writes_color_and_gray() {
        let dir = tempfile::tempdir().unwrap();
        let mut saver =
            FrameSaver::new(dir.path().join("color"), dir.path().join("gray"), 2).unwrap();
        let frame = Frame {
            width: 8,
            height: 4,
            rgb: (0..8 * 4 * 3).map(|i| (i * 7 % 256) as u8).collect(),
        };
        assert_eq!(saver.record(1_700_000_000.5, &frame).unwrap(), Recorded::Written);

        let stamp = frame_stamp(1_700_000_000.5);
        assert!(stamp.ends_with("_500000"));
        let gray = image::open(saver.gray_path(&stamp)).unwrap();
        assert_eq!((gray.width(), gray.height()), (4, 2));
        assert!(saver.color_path(&stamp).exists());

        let bad = Frame {
            width: 8,
            height: 4,
            rgb: vec![0; 10],
        };
        assert_eq!(saver.record(1.0, &bad).unwrap(), Recorded::Dropped);
        assert_eq!(saver.records(), 1);
    }

    #[test]
    fn test_frame_stamp_keeps_every_microsecond() {
        for us in (0..1_000_000u32).step_by(997).chain([1, 999_999]) {
            let stamp = frame_stamp(1_700_000_000.0 + f64::from(us) * 1e-6);
            assert!(stamp.ends_with(&format!("_{us:06}")), "{us}: {stamp}");
        }
        assert_eq!(frame_stamp(1_700_000_000.999_999_9), frame_stamp(1_700_000_001.0));
    }
}
