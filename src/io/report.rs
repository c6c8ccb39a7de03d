//! Append-only text sinks for filter output.
//!
//! Four files per run: the navigation state trace, the covariance
//! diagonal trace, the GNSS residual trace, and the committed turn
//! segments. Each line is written as it is produced; the event loop
//! owns the sinks exclusively.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use nalgebra::Vector3;

use crate::algorithms::turning::{TurnConfig, TurnSegment};
use crate::core::types::NavState;
use crate::error::Result;

/// State trace writer: one line per accepted predict or applied update.
///
/// Fields: timestamp; position; attitude quaternion (w, x, y, z);
/// velocity; gyro bias; accel bias; and, once a fix has been applied,
/// the last GNSS position plus a has-gps flag.
#[derive(Debug)]
pub struct StateWriter {
    out: BufWriter<File>,
}

impl StateWriter {
    /// Create or truncate the state file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            out: BufWriter::new(File::create(path)?),
        })
    }

    /// Append one state line.
    pub fn append(&mut self, state: &NavState, gps: Option<&Vector3<f64>>) -> Result<()> {
        let q = state.quaternion();
        write!(
            self.out,
            "{:.18} {:.9} {:.9} {:.9} {:.9} {:.9} {:.9} {:.9} {:.9} {:.9} {:.9} {:.9} {:.9} {:.9} {:.9} {:.9} {:.9}",
            state.t,
            state.p.x,
            state.p.y,
            state.p.z,
            q.w,
            q.i,
            q.j,
            q.k,
            state.v.x,
            state.v.y,
            state.v.z,
            state.bg.x,
            state.bg.y,
            state.bg.z,
            state.ba.x,
            state.ba.y,
            state.ba.z,
        )?;
        match gps {
            Some(p) => writeln!(self.out, " {:.9} {:.9} {:.9} 1", p.x, p.y, p.z)?,
            None => writeln!(self.out, " 0.000000000 0.000000000 0.000000000 0")?,
        }
        Ok(())
    }

    /// Flush buffered lines to disk.
    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Covariance trace writer: timestamp plus the 18 diagonal entries.
#[derive(Debug)]
pub struct CovarianceWriter {
    out: BufWriter<File>,
}

impl CovarianceWriter {
    /// Create or truncate the covariance file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            out: BufWriter::new(File::create(path)?),
        })
    }

    /// Append one diagonal line.
    pub fn append(&mut self, t: f64, diagonal: &[f64; 18]) -> Result<()> {
        write!(self.out, "{:.18}", t)?;
        for d in diagonal {
            write!(self.out, " {:.9}", d)?;
        }
        writeln!(self.out)?;
        Ok(())
    }

    /// Flush buffered lines to disk.
    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Residual trace writer: one line per applied GNSS update.
#[derive(Debug)]
pub struct ResidualWriter {
    out: BufWriter<File>,
}

impl ResidualWriter {
    /// Create or truncate the residual file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            out: BufWriter::new(File::create(path)?),
        })
    }

    /// Append one residual line: timestamp, signed cross-track residual,
    /// current heading (rad), current speed (m/s), raw residual
    /// components and the residual norm.
    pub fn append(
        &mut self,
        t: f64,
        lateral: f64,
        heading: f64,
        speed: f64,
        residual: &Vector3<f64>,
    ) -> Result<()> {
        writeln!(
            self.out,
            "{:.18} {:.9} {:.9} {:.9} {:.9} {:.9} {:.9} {:.9}",
            t,
            lateral,
            heading,
            speed,
            residual.x,
            residual.y,
            residual.z,
            residual.norm(),
        )?;
        Ok(())
    }

    /// Flush buffered lines to disk.
    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Write committed turn segments as CSV with a commented header.
pub fn write_turn_segments(
    path: impl AsRef<Path>,
    segments: &[TurnSegment],
    config: &TurnConfig,
) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "# turn segments detected from gnss heading")?;
    writeln!(out, "# detection parameters:")?;
    writeln!(
        out,
        "#   start rate threshold: {} deg/s",
        config.start_rate_threshold
    )?;
    writeln!(
        out,
        "#   end rate threshold: {} deg/s for {} s",
        config.end_rate_threshold, config.end_duration
    )?;
    writeln!(
        out,
        "#   accumulated angle threshold: {} deg",
        config.min_accumulated_angle
    )?;
    writeln!(out, "# detected {} segments", segments.len())?;
    writeln!(out, "#")?;
    writeln!(
        out,
        "# id,t_start,t_end,duration,total_angle,mean_rate,direction"
    )?;
    for (i, seg) in segments.iter().enumerate() {
        writeln!(
            out,
            "{},{:.3},{:.3},{:.1},{:.1},{:.2},{}",
            i + 1,
            seg.start_time,
            seg.end_time,
            seg.duration(),
            seg.total_angle,
            seg.mean_rate,
            seg.direction,
        )?;
    }
    out.flush()?;
    Ok(())
}

/// The full set of sinks for one fusion run, rooted in one directory.
#[derive(Debug)]
pub struct ReportSinks {
    /// Navigation state trace
    pub state: StateWriter,
    /// Covariance diagonal trace
    pub covariance: CovarianceWriter,
    /// GNSS residual trace
    pub residuals: ResidualWriter,
    turn_path: PathBuf,
}

impl ReportSinks {
    /// Create the output directory (if needed) and all sinks inside it.
    pub fn create(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            state: StateWriter::create(dir.join("gins_state.txt"))?,
            covariance: CovarianceWriter::create(dir.join("gins_cov.txt"))?,
            residuals: ResidualWriter::create(dir.join("gins_residuals.txt"))?,
            turn_path: dir.join("turn_segments.csv"),
        })
    }

    /// Write the turn-segment CSV next to the other sinks.
    pub fn write_turns(&self, segments: &[TurnSegment], config: &TurnConfig) -> Result<()> {
        write_turn_segments(&self.turn_path, segments, config)
    }

    /// Flush every sink.
    pub fn flush(&mut self) -> Result<()> {
        self.state.flush()?;
        self.covariance.flush()?;
        self.residuals.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::turning::TurnDirection;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("marga_report_{}_{}", tag, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_state_line_field_count() {
        let dir = temp_dir("state");
        let path = dir.join("state.txt");
        let mut writer = StateWriter::create(&path).unwrap();
        writer.append(&NavState::new(100.5), None).unwrap();
        writer
            .append(&NavState::new(101.0), Some(&Vector3::new(1.0, 2.0, 3.0)))
            .unwrap();
        writer.flush().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in &lines {
            assert_eq!(line.split_whitespace().count(), 21);
        }
        assert!(lines[0].ends_with('0'));
        assert!(lines[1].ends_with('1'));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_covariance_line_field_count() {
        let dir = temp_dir("cov");
        let path = dir.join("cov.txt");
        let mut writer = CovarianceWriter::create(&path).unwrap();
        writer.append(50.0, &[1e-4; 18]).unwrap();
        writer.flush().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert_eq!(
            content.lines().next().unwrap().split_whitespace().count(),
            19
        );
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_turn_segment_csv() {
        let dir = temp_dir("turns");
        let path = dir.join("turns.csv");
        let segments = vec![TurnSegment {
            start_time: 10.0,
            end_time: 22.5,
            total_angle: 85.0,
            mean_rate: 6.8,
            direction: TurnDirection::Right,
        }];
        write_turn_segments(&path, &segments, &TurnConfig::default()).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let data_lines: Vec<&str> = content.lines().filter(|l| !l.starts_with('#')).collect();
        assert_eq!(data_lines.len(), 1);
        assert!(data_lines[0].starts_with("1,10.000,22.500,12.5,85.0,6.80,right"));
        std::fs::remove_dir_all(&dir).ok();
    }
}
