//! Text log reader.
//!
//! Parses the recorder's line-oriented log format and yields events in
//! file order. Two families of records are supported:
//!
//! - Phone recorder records: `$GPS`, `$ACC`, `$GYR`, `$FBK`.
//!   Accelerometer and gyro lines arrive separately and are paired into
//!   one IMU sample when their timestamps agree within 50 ms; the axes
//!   are reordered from the recorder's (up, front, right) layout to
//!   (right, front, up) and converted to SI units.
//! - Plain records: `IMU t gx gy gz ax ay az`,
//!   `GNSS t lat lon alt heading heading_valid`, `ODOM t wl wr`,
//!   already in SI units.
//!
//! Blank lines, `#` comments and unknown tags are skipped. Malformed
//! records are logged at warning level and dropped; the reader stays
//! usable.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use nalgebra::Vector3;

use crate::core::math::DEG2RAD;
use crate::core::types::{GnssFix, ImuSample, OdomSample};
use crate::error::{MargaError, Result};
use crate::io::pipeline::Event;

/// Standard gravity used by the recorder for accelerometer scaling.
const ACC_G: f64 = 9.8;

/// Maximum timestamp gap between an ACC and a GYR line that still pairs
/// into one IMU sample.
const IMU_PAIR_THRESHOLD: f64 = 0.05;

/// Device misalignment estimate reported by the recorder (`$FBK`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Misalignment {
    /// Timestamp in seconds (from the paired flag line)
    pub t: f64,
    /// Pitch misalignment in degrees
    pub pitch_deg: f64,
    /// Heading misalignment in degrees
    pub heading_deg: f64,
}

#[derive(Debug, Clone, Copy)]
struct PendingAxis {
    t: f64,
    v: Vector3<f64>,
}

/// Streaming reader over a recorder log file.
///
/// Implements `Iterator` so a whole file replays as
/// `for event in LogReader::open(path)? { ... }`.
#[derive(Debug)]
pub struct LogReader {
    lines: Lines<BufReader<File>>,
    pending_acc: Option<PendingAxis>,
    pending_gyr: Option<PendingAxis>,
    pending_flag_time: Option<f64>,
    records_read: u64,
}

impl LogReader {
    /// Open a log file for reading.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
            pending_acc: None,
            pending_gyr: None,
            pending_flag_time: None,
            records_read: 0,
        })
    }

    /// Number of events yielded so far.
    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    fn parse_line(&mut self, line: &str) -> Option<Event> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        let mut fields = line.split_whitespace();
        let tag = fields.next()?;
        let rest: Vec<&str> = fields.collect();

        match tag {
            "$GPS" => self.parse_gps(&rest),
            "$ACC" => self.parse_acc(&rest),
            "$GYR" => self.parse_gyr(&rest),
            "$FBK" => self.parse_fbk(line),
            "IMU" => parse_plain_imu(&rest),
            "GNSS" => parse_plain_gnss(&rest),
            "ODOM" => parse_plain_odom(&rest),
            _ => None,
        }
    }

    /// `$GPS`: millisecond timestamp, scaled WGS84 position, compass
    /// heading, speed, altitude and an A/V validity letter.
    fn parse_gps(&mut self, fields: &[&str]) -> Option<Event> {
        if fields.len() < 25 {
            log::warn!("gps record too short: {} fields", fields.len());
            return None;
        }
        let parsed = (|| -> Option<GnssFix> {
            let timestamp = fields[0].parse::<f64>().ok()? / 1000.0;
            let longitude = fields[6].parse::<f64>().ok()? / 1e7;
            let latitude = fields[7].parse::<f64>().ok()? / 1e7;
            let heading = fields[8].parse::<f64>().ok()?;
            let altitude = fields[10].parse::<f64>().ok()?;
            let valid = fields[11] == "A";
            Some(GnssFix::new(
                timestamp,
                if valid { 4 } else { 0 },
                Vector3::new(latitude, longitude, altitude),
                heading,
                true,
            ))
        })();
        match parsed {
            Some(fix) => Some(Event::Gnss(fix)),
            None => {
                log::warn!("failed to parse gps record");
                None
            }
        }
    }

    /// `$ACC`: millisecond timestamp, then (up, front, right) readings
    /// in g at fields 3..6.
    fn parse_acc(&mut self, fields: &[&str]) -> Option<Event> {
        if fields.len() < 6 {
            log::warn!("acc record too short: {} fields", fields.len());
            return None;
        }
        let parsed = (|| -> Option<PendingAxis> {
            let t = fields[0].parse::<f64>().ok()? / 1000.0;
            let up = fields[3].parse::<f64>().ok()? * ACC_G;
            let front = fields[4].parse::<f64>().ok()? * ACC_G;
            let right = fields[5].parse::<f64>().ok()? * ACC_G;
            Some(PendingAxis {
                t,
                v: Vector3::new(right, front, up),
            })
        })();
        match parsed {
            Some(pending) => {
                self.pending_acc = Some(pending);
                self.try_pair_imu()
            }
            None => {
                log::warn!("failed to parse acc record");
                None
            }
        }
    }

    /// `$GYR`: millisecond timestamp, then temperature and (up, front,
    /// right) readings in deg/s at fields 4..7.
    fn parse_gyr(&mut self, fields: &[&str]) -> Option<Event> {
        if fields.len() < 7 {
            log::warn!("gyr record too short: {} fields", fields.len());
            return None;
        }
        let parsed = (|| -> Option<PendingAxis> {
            let t = fields[0].parse::<f64>().ok()? / 1000.0;
            let up = fields[4].parse::<f64>().ok()? * DEG2RAD;
            let front = fields[5].parse::<f64>().ok()? * DEG2RAD;
            let right = fields[6].parse::<f64>().ok()? * DEG2RAD;
            Some(PendingAxis {
                t,
                v: Vector3::new(right, front, up),
            })
        })();
        match parsed {
            Some(pending) => {
                self.pending_gyr = Some(pending);
                self.try_pair_imu()
            }
            None => {
                log::warn!("failed to parse gyr record");
                None
            }
        }
    }

    /// Combine pending accelerometer and gyro halves into one sample.
    /// On a timestamp mismatch the older half is discarded.
    fn try_pair_imu(&mut self) -> Option<Event> {
        let (acc, gyr) = match (self.pending_acc, self.pending_gyr) {
            (Some(a), Some(g)) => (a, g),
            _ => return None,
        };
        if (acc.t - gyr.t).abs() > IMU_PAIR_THRESHOLD {
            if acc.t < gyr.t {
                self.pending_acc = None;
            } else {
                self.pending_gyr = None;
            }
            return None;
        }
        self.pending_acc = None;
        self.pending_gyr = None;
        let t = acc.t.max(gyr.t);
        Some(Event::Imu(ImuSample::new(t, gyr.v, acc.v)))
    }

    /// `$FBK`: a comma-separated `flag` line carrying the timestamp,
    /// followed by a `misalignment` line with `pitch:`/`heading:`
    /// key-value pairs.
    fn parse_fbk(&mut self, line: &str) -> Option<Event> {
        let body = line.trim_start_matches("$FBK").trim();
        if body.starts_with("flag") {
            let fields: Vec<&str> = body.split(',').map(str::trim).collect();
            if fields.len() < 3 {
                log::warn!("fbk flag record too short");
                return None;
            }
            match fields[2].parse::<f64>() {
                Ok(ms) => self.pending_flag_time = Some(ms / 1000.0),
                Err(_) => log::warn!("failed to parse fbk flag timestamp"),
            }
            None
        } else if body.starts_with("misalignment") {
            let t = match self.pending_flag_time.take() {
                Some(t) => t,
                None => {
                    log::warn!("fbk misalignment without a matching flag record");
                    return None;
                }
            };
            let kv = body.split_whitespace().nth(1)?;
            let mut pitch = None;
            let mut heading = None;
            for part in kv.split(',') {
                if let Some(value) = part.strip_prefix("pitch:") {
                    pitch = value.parse::<f64>().ok();
                } else if let Some(value) = part.strip_prefix("heading:") {
                    heading = value.parse::<f64>().ok();
                }
            }
            match (pitch, heading) {
                (Some(pitch_deg), Some(heading_deg)) => Some(Event::Misalignment(Misalignment {
                    t,
                    pitch_deg,
                    heading_deg,
                })),
                _ => {
                    log::warn!("failed to parse fbk misalignment record");
                    None
                }
            }
        } else {
            // Other $FBK variants (info lines etc.) are not ours.
            None
        }
    }
}

fn parse_plain_imu(fields: &[&str]) -> Option<Event> {
    if fields.len() < 7 {
        log::warn!("imu record too short: {} fields", fields.len());
        return None;
    }
    let values: Option<Vec<f64>> = fields[..7].iter().map(|f| f.parse().ok()).collect();
    match values {
        Some(v) => Some(Event::Imu(ImuSample::new(
            v[0],
            Vector3::new(v[1], v[2], v[3]),
            Vector3::new(v[4], v[5], v[6]),
        ))),
        None => {
            log::warn!("failed to parse imu record");
            None
        }
    }
}

fn parse_plain_gnss(fields: &[&str]) -> Option<Event> {
    if fields.len() < 6 {
        log::warn!("gnss record too short: {} fields", fields.len());
        return None;
    }
    let numbers: Option<Vec<f64>> = fields[..5].iter().map(|f| f.parse().ok()).collect();
    let heading_valid = matches!(fields[5], "1" | "true");
    match numbers {
        Some(v) => Some(Event::Gnss(GnssFix::new(
            v[0],
            4,
            Vector3::new(v[1], v[2], v[3]),
            v[4],
            heading_valid,
        ))),
        None => {
            log::warn!("failed to parse gnss record");
            None
        }
    }
}

fn parse_plain_odom(fields: &[&str]) -> Option<Event> {
    if fields.len() < 3 {
        log::warn!("odom record too short: {} fields", fields.len());
        return None;
    }
    let values: Option<Vec<f64>> = fields[..3].iter().map(|f| f.parse().ok()).collect();
    match values {
        Some(v) => Some(Event::Odom(OdomSample::new(v[0], v[1], v[2]))),
        None => {
            log::warn!("failed to parse odom record");
            None
        }
    }
}

impl Iterator for LogReader {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next() {
                Some(Ok(line)) => line,
                Some(Err(e)) => return Some(Err(MargaError::Io(e))),
                None => return None,
            };
            if let Some(event) = self.parse_line(&line) {
                self.records_read += 1;
                return Some(Ok(event));
            }
        }
    }
}

/// Read a whole log file into memory, in file order.
pub fn read_events(path: impl AsRef<Path>) -> Result<Vec<Event>> {
    LogReader::open(path)?.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::Write;
    use std::path::PathBuf;

    fn write_log(tag: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "marga_reader_{}_{}.log",
            tag,
            std::process::id()
        ));
        let mut file = File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_plain_imu_and_gnss() {
        let path = write_log(
            "plain",
            "# comment\n\
             IMU 100.0 0.01 0.02 0.03 0.1 0.2 9.8\n\
             GNSS 100.5 31.0 121.0 10.0 90.0 1\n\
             ODOM 100.6 12 13\n",
        );
        let events = read_events(&path).unwrap();
        assert_eq!(events.len(), 3);
        match &events[0] {
            Event::Imu(imu) => {
                assert_relative_eq!(imu.t, 100.0);
                assert_relative_eq!(imu.gyro.x, 0.01);
                assert_relative_eq!(imu.accel.z, 9.8);
            }
            other => panic!("expected imu, got {:?}", other),
        }
        match &events[1] {
            Event::Gnss(fix) => {
                assert_relative_eq!(fix.unix_time, 100.5);
                assert_relative_eq!(fix.lat_lon_alt.x, 31.0);
                assert!(fix.heading_valid);
            }
            other => panic!("expected gnss, got {:?}", other),
        }
        assert!(matches!(events[2], Event::Odom(_)));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_acc_gyr_pairing() {
        // 1 g on the up axis maps to body z; 10 deg/s on the front axis
        // maps to body y.
        let path = write_log(
            "pair",
            "$ACC 1000 7 10 1.0 0.0 0.0\n\
             $GYR 1010 7 10 25.0 0.0 10.0 0.0\n",
        );
        let events = read_events(&path).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::Imu(imu) => {
                // Newer of the two timestamps wins
                assert_relative_eq!(imu.t, 1.01);
                assert_relative_eq!(imu.accel.z, 9.8, epsilon = 1e-12);
                assert_relative_eq!(imu.accel.x, 0.0);
                assert_relative_eq!(imu.gyro.y, 10.0 * DEG2RAD, epsilon = 1e-12);
            }
            other => panic!("expected imu, got {:?}", other),
        }
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_acc_gyr_mismatch_drops_older() {
        let path = write_log(
            "mismatch",
            "$ACC 1000 7 10 1.0 0.0 0.0\n\
             $GYR 1100 7 10 25.0 0.0 10.0 0.0\n\
             $ACC 1110 7 10 1.0 0.0 0.0\n",
        );
        let events = read_events(&path).unwrap();
        // First ACC is discarded (100 ms older); second ACC pairs with GYR.
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::Imu(imu) => assert_relative_eq!(imu.t, 1.11),
            other => panic!("expected imu, got {:?}", other),
        }
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_gps_record() {
        let mut fields = vec!["1750000000123".to_string()];
        fields.extend(std::iter::repeat("0".to_string()).take(5));
        fields.push("1210000000".to_string()); // lon * 1e7
        fields.push("310000000".to_string()); // lat * 1e7
        fields.push("271.8".to_string()); // heading
        fields.push("12.5".to_string()); // speed
        fields.push("14.2".to_string()); // altitude
        fields.push("A".to_string()); // valid
        while fields.len() < 25 {
            fields.push("0".to_string());
        }
        let path = write_log("gps", &format!("$GPS {}\n", fields.join(" ")));
        let events = read_events(&path).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::Gnss(fix) => {
                assert_relative_eq!(fix.unix_time, 1750000000.123, epsilon = 1e-9);
                assert_relative_eq!(fix.lat_lon_alt.x, 31.0);
                assert_relative_eq!(fix.lat_lon_alt.y, 121.0);
                assert_relative_eq!(fix.lat_lon_alt.z, 14.2);
                assert_relative_eq!(fix.heading_deg, 271.8);
                assert_eq!(fix.fix_status, 4);
            }
            other => panic!("expected gnss, got {:?}", other),
        }
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_short_records_skipped() {
        let path = write_log(
            "short",
            "IMU 1.0 0.0\n\
             GNSS 1.0\n\
             $GPS 1 2 3\n\
             IMU 2.0 0.0 0.0 0.0 0.0 0.0 -9.8\n",
        );
        let events = read_events(&path).unwrap();
        assert_eq!(events.len(), 1);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_fbk_pairing() {
        let path = write_log(
            "fbk",
            "$FBK flag,1,164385368,-0.153193,0.030816\n\
             $FBK misalignment pitch:-18.122493,heading:1.800880\n",
        );
        let events = read_events(&path).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::Misalignment(m) => {
                assert_relative_eq!(m.t, 164385.368, epsilon = 1e-9);
                assert_relative_eq!(m.pitch_deg, -18.122493);
                assert_relative_eq!(m.heading_deg, 1.800880);
            }
            other => panic!("expected misalignment, got {:?}", other),
        }
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_fbk_misalignment_without_flag_dropped() {
        let path = write_log(
            "fbk_orphan",
            "$FBK misalignment pitch:-18.1,heading:1.8\n",
        );
        let events = read_events(&path).unwrap();
        assert!(events.is_empty());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_unknown_tags_skipped() {
        let path = write_log(
            "unknown",
            "$NZZ 2025-6-12 11:22:27 whatever 271.8\n\
             $XYZ 1 2 3\n",
        );
        let events = read_events(&path).unwrap();
        assert!(events.is_empty());
        std::fs::remove_file(&path).ok();
    }
}
