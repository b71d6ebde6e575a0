//! # Log Replay
//!
//! Reads a persisted sample log back into plottable series.
//!
//! Rows are matched leniently: anything shorter than a full record, whose
//! first column is not an OSC address, or with a field that does not parse
//! as a number is skipped (this also skips the header). Orientation angles are
//! recomputed from the stored quaternion, and device time is rebased so the
//! earliest row sits at zero.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use tracing::{debug, info};

use crate::error::{Result, SnifferError};
use crate::feed::{plotted_values, Channel, CHANNEL_COUNT};
use crate::sample::{Quaternion, Vector3, SAMPLE_ARG_COUNT};

/// Columns in a full log row (address + arguments)
const ROW_LEN: usize = SAMPLE_ARG_COUNT + 1;

// Column positions, offset by the leading address column
const COL_ACCEL: usize = 1;
const COL_GYRO: usize = 7;
const COL_MAG: usize = 10;
const COL_QUAT: usize = 13;
const COL_SECONDS: usize = 23;

/// Per-channel series read from a log
#[derive(Debug, Clone, PartialEq)]
pub struct ReplaySeries {
    /// Device time in seconds, rebased to start at 0
    pub time: Vec<f64>,
    pub channels: [Vec<f64>; CHANNEL_COUNT],
    /// Rows ignored as header, short, foreign or unparsable
    pub skipped: usize,
}

impl ReplaySeries {
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn values(&self, channel: Channel) -> &[f64] {
        &self.channels[channel.index()]
    }

    /// Smallest and largest value of a channel
    pub fn range(&self, channel: Channel) -> Option<(f64, f64)> {
        self.values(channel).iter().fold(None, |acc, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    }

    /// Span of the time axis in seconds
    pub fn duration(&self) -> f64 {
        self.time.iter().copied().fold(0.0, f64::max)
    }
}

/// Load a log file
///
/// # Errors
///
/// Returns error if the file cannot be opened or is not readable as CSV
pub fn load<P: AsRef<Path>>(path: P) -> Result<ReplaySeries> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| {
        SnifferError::Persistence(format!("Failed to open {}: {}", path.display(), e))
    })?;
    let series = from_reader(file)?;
    info!(
        "Replayed {} rows from {} ({} skipped)",
        series.len(),
        path.display(),
        series.skipped
    );
    Ok(series)
}

/// Read a log from any reader
pub fn from_reader<R: Read>(reader: R) -> Result<ReplaySeries> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut time = Vec::new();
    let mut channels: [Vec<f64>; CHANNEL_COUNT] = Default::default();
    let mut skipped = 0;

    for record in reader.records() {
        let record = record?;
        match parse_row(&record) {
            Some((seconds, values)) => {
                time.push(seconds);
                for (channel, value) in channels.iter_mut().zip(values) {
                    channel.push(value);
                }
            }
            None => {
                debug!("Skipping row {:?}", record.position().map(|p| p.line()));
                skipped += 1;
            }
        }
    }

    let start = time.iter().copied().fold(f64::INFINITY, f64::min);
    for t in &mut time {
        *t -= start;
    }

    Ok(ReplaySeries { time, channels, skipped })
}

fn parse_row(record: &csv::StringRecord) -> Option<(f64, [f64; CHANNEL_COUNT])> {
    if record.len() < ROW_LEN || !record.get(0)?.starts_with('/') {
        return None;
    }

    let num = |i: usize| record.get(i)?.trim().parse::<f64>().ok();
    let vector = |i: usize| Some(Vector3::new(num(i)?, num(i + 1)?, num(i + 2)?));

    let accel = vector(COL_ACCEL)?;
    let gyro = vector(COL_GYRO)?;
    let mag = vector(COL_MAG)?;
    let q = Quaternion::new(
        num(COL_QUAT)?,
        num(COL_QUAT + 1)?,
        num(COL_QUAT + 2)?,
        num(COL_QUAT + 3)?,
    );
    let seconds = num(COL_SECONDS)?;

    Some((seconds, plotted_values(accel, gyro, mag, q)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osc::decoder::decode_sample;
    use crate::persistence::{SampleLog, SampleSink};
    use crate::sample::fixtures::telemetry_args;
    use rosc::OscType;
    use tempfile::tempdir;

    fn row(address: &str, seconds: f64, q: [f64; 4]) -> String {
        format!(
            "{},0.1,-0.2,9.8,1,2,3,0.5,0.6,0.7,20,21,22,{},{},{},{},7,3.7,3,3,3,3,{},1",
            address, q[0], q[1], q[2], q[3], seconds
        )
    }

    #[test]
    fn test_reads_rows_and_rebases_time() {
        let data = [
            "address,ax,ay,az".to_string(),
            row("/imu", 100.5, [1.0, 0.0, 0.0, 0.0]),
            row("/imu", 101.0, [0.707, 0.707, 0.0, 0.0]),
        ]
        .join("\n");

        let series = from_reader(data.as_bytes()).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.skipped, 1);
        assert_eq!(series.time, vec![0.0, 0.5]);
        assert_eq!(series.values(Channel::Az), &[9.8, 9.8]);
        assert_eq!(series.values(Channel::Gx), &[0.5, 0.5]);
        assert_eq!(series.values(Channel::Mz), &[22.0, 22.0]);
        assert!((series.values(Channel::Roll)[1] - 90.0).abs() < 1e-6);
        assert_eq!(series.duration(), 0.5);
    }

    #[test]
    fn test_rebase_uses_earliest_time() {
        let data = [
            row("/imu", 5.0, [1.0, 0.0, 0.0, 0.0]),
            row("/imu", 3.0, [1.0, 0.0, 0.0, 0.0]),
        ]
        .join("\n");
        let series = from_reader(data.as_bytes()).unwrap();
        assert_eq!(series.time, vec![2.0, 0.0]);
    }

    #[test]
    fn test_skips_short_foreign_and_unparsable_rows() {
        let data = [
            "osc_capture.csv".to_string(),
            "/imu,1,2,3".to_string(),
            row("imu", 1.0, [1.0, 0.0, 0.0, 0.0]),
            row("/imu", 1.0, [1.0, 0.0, 0.0, 0.0]).replace(",9.8,", ",abc,"),
            row("/imu", 2.0, [1.0, 0.0, 0.0, 0.0]),
        ]
        .join("\n");

        let series = from_reader(data.as_bytes()).unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series.skipped, 4);
        assert_eq!(series.time, vec![0.0]);
    }

    #[test]
    fn test_empty_input() {
        let series = from_reader("".as_bytes()).unwrap();
        assert!(series.is_empty());
        assert_eq!(series.range(Channel::Ax), None);
        assert_eq!(series.duration(), 0.0);
    }

    #[test]
    fn test_range() {
        let data = [
            row("/imu", 0.0, [1.0, 0.0, 0.0, 0.0]),
            row("/imu", 1.0, [0.0, 0.0, 0.0, 1.0]),
        ]
        .join("\n");
        let series = from_reader(data.as_bytes()).unwrap();
        let (lo, hi) = series.range(Channel::Yaw).unwrap();
        assert!(lo.abs() < 1e-9);
        assert!((hi - 180.0).abs() < 1e-9);
    }

    #[test]
    fn test_round_trip_through_sample_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let mut log = SampleLog::init(&path).unwrap();

        let mut args = telemetry_args([1.0, 0.0, 0.0, 0.0], 0);
        for (seq, seconds) in [(0, 10.0), (1, 10.25), (2, 10.5)] {
            args[22] = OscType::Double(seconds);
            args[23] = OscType::Int(seq);
            log.append(&decode_sample("/imu", &args).unwrap()).unwrap();
        }
        log.sync().unwrap();

        let series = load(&path).unwrap();
        assert_eq!(series.len(), 3);
        assert_eq!(series.skipped, 1);
        assert_eq!(series.time, vec![0.0, 0.25, 0.5]);
        assert_eq!(series.values(Channel::Pitch), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        let result = load(dir.path().join("absent.csv"));
        assert!(matches!(result, Err(SnifferError::Persistence(_))));
    }
}
