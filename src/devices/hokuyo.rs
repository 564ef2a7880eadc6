//! Hokuyo UST/LX series ranging sensor over Ethernet, SCIP 2.0.
//!
//! Only single-scan requests (`GD`) are used: one request, one reply, one
//! `LidarScan`. Distances come back in millimetres, three 6-bit characters
//! each, 64 characters per line plus a checksum character.

use std::{
    io::{BufRead, BufReader, Read, Write},
    net::{TcpStream, ToSocketAddrs},
    time::Duration,
};

use crate::{
    devices::Sensor,
    reading::{unix_now, LidarScan},
    Error, Result,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const READ_TIMEOUT: Duration = Duration::from_secs(2);

pub struct Hokuyo<T: Read + Write> {
    stream: BufReader<T>,
    start_step: usize,
    end_step: usize,
}

impl Hokuyo<TcpStream> {
    pub fn connect(addr: &str, steps: usize) -> Result<Self> {
        let sock_addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::device(addr, "address did not resolve"))?;
        let stream = TcpStream::connect_timeout(&sock_addr, CONNECT_TIMEOUT)
            .map_err(|e| Error::device(addr, format!("connect failed: {e}")))?;
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        stream.set_nodelay(true)?;
        log::info!("Hokuyo connected at {addr}");
        Self::new(stream, steps)
    }
}

impl<T: Read + Write> Hokuyo<T> {
    /// Switches the laser on and prepares `steps` wide scans starting at 0.
    pub fn new(stream: T, steps: usize) -> Result<Self> {
        if steps == 0 || steps > 10_000 {
            return Err(Error::InvalidParameter(format!("{steps} steps")));
        }
        let mut h = Self {
            stream: BufReader::new(stream),
            start_step: 0,
            end_step: steps - 1,
        };
        h.command("BM", &["00", "02"])?;
        Ok(h)
    }

    pub fn scan(&mut self) -> Result<LidarScan> {
        let cmd = format!("GD{:04}{:04}00", self.start_step, self.end_step);
        let lines = self.command(&cmd, &["00"])?;
        let timestamp = unix_now();
        let (_device_ms, ranges) = parse_distance_block(&lines)?;
        Ok(LidarScan { timestamp, ranges })
    }

    /// Sends one command and returns the reply lines after the echo and
    /// status, up to the terminating blank line.
    fn command(&mut self, cmd: &str, ok_status: &[&str]) -> Result<Vec<String>> {
        let w = self.stream.get_mut();
        w.write_all(cmd.as_bytes())?;
        w.write_all(b"\n")?;
        w.flush()?;

        let echo = self.read_line()?;
        if echo != cmd {
            return Err(Error::Protocol(format!("echo {echo:?} for {cmd:?}")));
        }
        let status = self.read_line()?;
        let status = checked(&status)?;
        let status = std::str::from_utf8(status)
            .map_err(|_| Error::Protocol("non-ascii status".into()))?;
        if !ok_status.contains(&status) {
            return Err(Error::Protocol(format!("{cmd}: status {status}")));
        }

        let mut lines = Vec::new();
        loop {
            let line = self.read_line()?;
            if line.is_empty() {
                return Ok(lines);
            }
            lines.push(line);
        }
    }

    fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        if self.stream.read_line(&mut line)? == 0 {
            return Err(Error::EndOfStream);
        }
        while line.ends_with(['\n', '\r']) {
            line.pop();
        }
        Ok(line)
    }
}

impl<T: Read + Write> Drop for Hokuyo<T> {
    fn drop(&mut self) {
        // laser off; the reply is not waited for
        let _ = self.stream.get_mut().write_all(b"QT\n");
    }
}

impl<T: Read + Write + Send> Sensor for Hokuyo<T> {
    type Reading = LidarScan;

    fn read(&mut self) -> Result<LidarScan> {
        self.scan()
    }
}

/// SCIP checksum: low 6 bits of the byte sum, offset into printable range.
pub fn checksum(data: &[u8]) -> u8 {
    let sum = data.iter().fold(0u32, |acc, b| acc + u32::from(*b));
    (sum & 0x3F) as u8 + 0x30
}

/// Decodes a big-endian run of 6-bit characters.
pub fn decode(chars: &[u8]) -> u32 {
    chars
        .iter()
        .fold(0u32, |acc, c| (acc << 6) | u32::from(c.wrapping_sub(0x30) & 0x3F))
}

/// Verifies a line's trailing checksum character and returns its payload.
fn checked(line: &str) -> Result<&[u8]> {
    let bytes = line.as_bytes();
    let Some((&sum, data)) = bytes.split_last() else {
        return Err(Error::Protocol("empty line".into()));
    };
    if checksum(data) != sum {
        return Err(Error::Protocol(format!("checksum mismatch in {line:?}")));
    }
    Ok(data)
}

/// Timestamp line followed by 3-character distance data lines.
fn parse_distance_block(lines: &[String]) -> Result<(u32, Vec<f32>)> {
    let Some((ts_line, data_lines)) = lines.split_first() else {
        return Err(Error::Protocol("missing timestamp".into()));
    };
    let ts = checked(ts_line)?;
    if ts.len() != 4 {
        return Err(Error::Protocol(format!("timestamp {ts_line:?}")));
    }
    let device_ms = decode(ts);

    let mut data = Vec::with_capacity(data_lines.len() * 64);
    for line in data_lines {
        data.extend_from_slice(checked(line)?);
    }
    if data.len() % 3 != 0 {
        return Err(Error::Protocol(format!(
            "{} data characters is not a multiple of 3",
            data.len()
        )));
    }
    let ranges = data.chunks_exact(3).map(|c| decode(c) as f32).collect();
    Ok((device_ms, ranges))
}
