//! # Telemetry Sample
//!
//! One decoded IMU reading and its canonical column layout.
//!
//! The device sends 24 positional OSC arguments:
//!
//! | Index | Field | Kind |
//! |-------|-------|------|
//! | 0-2 | ax, ay, az | accelerometer |
//! | 3-5 | ex, ey, ez | auxiliary vector (undocumented) |
//! | 6-8 | gx, gy, gz | gyroscope |
//! | 9-11 | mx, my, mz | magnetometer |
//! | 12-15 | qw, qx, qy, qz | orientation quaternion |
//! | 16 | aux | opaque, carried through untouched |
//! | 17 | battery | battery level |
//! | 18-21 | sys, gyro, accel, mag | calibration status |
//! | 22 | seconds | device timestamp |
//! | 23 | seqnum | sequence number |

use rosc::OscType;

/// Number of positional arguments in a telemetry message
pub const SAMPLE_ARG_COUNT: usize = 24;

/// Index of the undocumented argument that is preserved as-is
pub const OPAQUE_ARG_INDEX: usize = 16;

/// Argument names in wire order
pub const ARG_NAMES: [&str; SAMPLE_ARG_COUNT] = [
    "ax", "ay", "az",
    "ex", "ey", "ez",
    "gx", "gy", "gz",
    "mx", "my", "mz",
    "qw", "qx", "qy", "qz",
    "aux",
    "battery",
    "sys_status", "gyro_status", "accel_status", "mag_status",
    "seconds",
    "seqnum",
];

/// Column header of the persisted log (address followed by every argument)
pub fn log_header() -> Vec<&'static str> {
    let mut header = Vec::with_capacity(SAMPLE_ARG_COUNT + 1);
    header.push("address");
    header.extend_from_slice(&ARG_NAMES);
    header
}

/// Three-axis reading
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Orientation quaternion as reported by the device (not necessarily unit length)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    pub const fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    pub const fn identity() -> Self {
        Self { w: 1.0, x: 0.0, y: 0.0, z: 0.0 }
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

/// Sensor fusion calibration status fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CalibrationStatus {
    pub sys: i64,
    pub gyro: i64,
    pub accel: i64,
    pub mag: i64,
}

/// One sensor reading at one instant.
///
/// Built by the decoder and never mutated afterwards; the pipeline shares it
/// between the sample log and the live feed behind an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySample {
    /// OSC address the message arrived on
    pub address: String,
    pub accel: Vector3,
    /// The "e" vector; meaning unknown, kept verbatim
    pub aux_vector: Vector3,
    pub gyro: Vector3,
    pub mag: Vector3,
    pub orientation: Quaternion,
    /// Argument 16, never interpreted
    pub opaque: OscType,
    pub battery: f64,
    pub status: CalibrationStatus,
    /// Device clock in seconds
    pub device_time: f64,
    /// Per-device sequence number (gaps mean loss)
    pub sequence: i64,
}

impl TelemetrySample {
    /// Render the sample as one log row, in [`log_header`] order
    pub fn to_record(&self) -> Vec<String> {
        let mut row = Vec::with_capacity(SAMPLE_ARG_COUNT + 1);
        row.push(self.address.clone());
        for v in [self.accel, self.aux_vector, self.gyro, self.mag] {
            row.push(v.x.to_string());
            row.push(v.y.to_string());
            row.push(v.z.to_string());
        }
        let q = self.orientation;
        row.extend([q.w, q.x, q.y, q.z].iter().map(f64::to_string));
        row.push(render_opaque(&self.opaque));
        row.push(self.battery.to_string());
        let s = self.status;
        row.extend([s.sys, s.gyro, s.accel, s.mag].iter().map(i64::to_string));
        row.push(self.device_time.to_string());
        row.push(self.sequence.to_string());
        row
    }
}

/// Text form of an uninterpreted OSC argument
pub fn render_opaque(value: &OscType) -> String {
    match value {
        OscType::Int(i) => i.to_string(),
        OscType::Long(l) => l.to_string(),
        OscType::Float(f) => f.to_string(),
        OscType::Double(d) => d.to_string(),
        OscType::String(s) => s.clone(),
        OscType::Bool(b) => b.to_string(),
        OscType::Char(c) => c.to_string(),
        OscType::Nil => String::new(),
        OscType::Inf => "inf".to_string(),
        OscType::Blob(bytes) => bytes.iter().map(|b| format!("{:02x}", b)).collect(),
        other => format!("{:?}", other),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = log_header();
        assert_eq!(header.len(), SAMPLE_ARG_COUNT + 1);
        assert_eq!(header[0], "address");
        assert_eq!(header[1 + OPAQUE_ARG_INDEX], "aux");
        assert_eq!(header.last(), Some(&"seqnum"));
    }

    #[test]
    fn test_record_matches_header_order() {
        let sample = TelemetrySample {
            address: "/imu".to_string(),
            accel: Vector3::new(1.0, 2.0, 3.0),
            aux_vector: Vector3::new(4.0, 5.0, 6.0),
            gyro: Vector3::new(7.0, 8.0, 9.0),
            mag: Vector3::new(10.0, 11.0, 12.0),
            orientation: Quaternion::new(13.0, 14.0, 15.0, 16.0),
            opaque: OscType::String("x".to_string()),
            battery: 18.0,
            status: CalibrationStatus { sys: 19, gyro: 20, accel: 21, mag: 22 },
            device_time: 23.5,
            sequence: 24,
        };

        let row = sample.to_record();
        assert_eq!(row.len(), log_header().len());
        assert_eq!(row[0], "/imu");
        assert_eq!(row[1], "1");
        assert_eq!(row[16], "16");
        assert_eq!(row[17], "x");
        assert_eq!(row[18], "18");
        assert_eq!(row[22], "22");
        assert_eq!(row[23], "23.5");
        assert_eq!(row[24], "24");
    }

    #[test]
    fn test_render_opaque() {
        assert_eq!(render_opaque(&OscType::Int(-4)), "-4");
        assert_eq!(render_opaque(&OscType::Nil), "");
        assert_eq!(render_opaque(&OscType::Blob(vec![0x0a, 0xff])), "0aff");
        assert_eq!(render_opaque(&OscType::Bool(true)), "true");
    }

    #[test]
    fn test_fixture_arity() {
        assert_eq!(fixtures::telemetry_args([1.0, 0.0, 0.0, 0.0], 0).len(), SAMPLE_ARG_COUNT);
    }
}
