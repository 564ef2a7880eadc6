//! Prophesee EVT 2.0 stream decoder.
//!
//! Reads from anything `Read`: the camera's character device, or a `.raw`
//! recording (whose `%`-prefixed ASCII header is skipped first). Every 32-bit
//! little-endian word carries its type in the top nibble.

use std::{
    fs::File,
    io::{BufRead, BufReader, Read},
    path::Path,
};

use crate::{devices::Sensor, reading::Event, Error, Result};

const CD_OFF: u8 = 0x0;
const CD_ON: u8 = 0x1;
const EVT_TIME_HIGH: u8 = 0x8;

/// Decoded word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evt2Word {
    Cd {
        polarity: i32,
        x: i32,
        y: i32,
        ts_low: u32,
    },
    TimeHigh(u32),
    Other(u8),
}

impl Evt2Word {
    pub fn decode(word: u32) -> Self {
        match (word >> 28) as u8 {
            t @ (CD_OFF | CD_ON) => Evt2Word::Cd {
                polarity: i32::from(t),
                ts_low: (word >> 22) & 0x3F,
                x: ((word >> 11) & 0x7FF) as i32,
                y: (word & 0x7FF) as i32,
            },
            EVT_TIME_HIGH => Evt2Word::TimeHigh(word & 0x0FFF_FFFF),
            t => Evt2Word::Other(t),
        }
    }
}

pub struct EventCamera<R> {
    rdr: BufReader<R>,
    time_high: i64,
    words: u64,
}

impl EventCamera<File> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| Error::device(path.display().to_string(), e.to_string()))?;
        log::info!("event stream at {}", path.display());
        Self::new(file)
    }
}

impl<R: Read> EventCamera<R> {
    pub fn new(rdr: R) -> Result<Self> {
        let mut cam = Self {
            rdr: BufReader::new(rdr),
            time_high: 0,
            words: 0,
        };
        cam.skip_header()?;
        Ok(cam)
    }

    fn skip_header(&mut self) -> Result<()> {
        let mut line = Vec::new();
        loop {
            if self.rdr.fill_buf()?.first() != Some(&b'%') {
                return Ok(());
            }
            line.clear();
            self.rdr.read_until(b'\n', &mut line)?;
            log::trace!("evt header {}", String::from_utf8_lossy(&line).trim_end());
        }
    }

    fn next_word(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        match self.rdr.read_exact(&mut buf) {
            Ok(()) => {
                self.words += 1;
                Ok(u32::from_le_bytes(buf))
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(Error::EndOfStream),
            Err(e) => Err(e.into()),
        }
    }

    /// Next change-detection event. Time-high words update the clock;
    /// anything else (triggers, vendor words) is skipped.
    pub fn next_event(&mut self) -> Result<Event> {
        loop {
            match Evt2Word::decode(self.next_word()?) {
                Evt2Word::Cd {
                    polarity,
                    x,
                    y,
                    ts_low,
                } => {
                    return Ok(Event {
                        x,
                        y,
                        polarity,
                        t: (self.time_high << 6) | i64::from(ts_low),
                    })
                }
                Evt2Word::TimeHigh(th) => self.time_high = i64::from(th),
                Evt2Word::Other(t) => log::trace!("skipping evt2 word type {t:#x}"),
            }
        }
    }

    pub fn words_read(&self) -> u64 {
        self.words
    }
}

impl<R: Read + Send> Sensor for EventCamera<R> {
    type Reading = Event;

    fn read(&mut self) -> Result<Event> {
        self.next_event()
    }
}
