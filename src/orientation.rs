//! # Orientation Conversion
//!
//! Quaternion to Tait-Bryan (ZYX) Euler angles, in degrees.
//!
//! Roll is rotation about X, pitch about Y, yaw about Z. Pitch is limited to
//! [-90, 90]; roll and yaw are reported in (-180, 180].

use crate::sample::Quaternion;

/// Roll/pitch/yaw in degrees
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EulerAngles {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

impl EulerAngles {
    pub const fn new(roll: f64, pitch: f64, yaw: f64) -> Self {
        Self { roll, pitch, yaw }
    }

    /// Approximate equality check with a given tolerance (degrees)
    pub fn approx_eq(&self, other: &Self, tol: f64) -> bool {
        (self.roll - other.roll).abs() <= tol
            && (self.pitch - other.pitch).abs() <= tol
            && (self.yaw - other.yaw).abs() <= tol
    }
}

impl From<Quaternion> for EulerAngles {
    fn from(q: Quaternion) -> Self {
        to_euler(q.w, q.x, q.y, q.z)
    }
}

/// Convert a quaternion to Euler angles in degrees.
///
/// The input does not need to be normalized. A zero quaternion yields
/// `(0, 0, 0)`. At gimbal lock pitch saturates to ±90 with the sign of the
/// asin argument.
///
/// # Examples
///
/// ```
/// use osc_sniffer::orientation::to_euler;
///
/// let angles = to_euler(1.0, 0.0, 0.0, 0.0);
/// assert_eq!((angles.roll, angles.pitch, angles.yaw), (0.0, 0.0, 0.0));
/// ```
pub fn to_euler(qw: f64, qx: f64, qy: f64, qz: f64) -> EulerAngles {
    let norm = (qw * qw + qx * qx + qy * qy + qz * qz).sqrt();
    if norm == 0.0 {
        return EulerAngles::default();
    }
    let (w, x, y, z) = (qw / norm, qx / norm, qy / norm, qz / norm);

    let sinr_cosp = 2.0 * (w * x + y * z);
    let cosr_cosp = 1.0 - 2.0 * (x * x + y * y);
    let roll = sinr_cosp.atan2(cosr_cosp);

    let sinp = 2.0 * (w * y - z * x);
    let pitch = if sinp.abs() >= 1.0 {
        90.0_f64.copysign(sinp)
    } else {
        sinp.asin().to_degrees()
    };

    let siny_cosp = 2.0 * (w * z + x * y);
    let cosy_cosp = 1.0 - 2.0 * (y * y + z * z);
    let yaw = siny_cosp.atan2(cosy_cosp);

    EulerAngles::new(
        half_open_degrees(roll),
        pitch,
        half_open_degrees(yaw),
    )
}

/// Radians in [-pi, pi] to degrees in (-180, 180].
///
/// `atan2` returns -pi for a negative-zero numerator; that is the same angle as +180.
/// NaN passes through unchanged.
fn half_open_degrees(radians: f64) -> f64 {
    let degrees = radians.to_degrees();
    if degrees.is_nan() {
        degrees
    } else if radians <= -std::f64::consts::PI || degrees <= -180.0 {
        180.0
    } else {
        degrees.min(180.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-9;

    /// Coarse grid over quaternion space including axes, diagonals and negatives
    fn quaternion_grid() -> Vec<[f64; 4]> {
        let steps = [-1.0, -0.7071, -0.5, -0.1, 0.0, 0.3, 0.5, 0.7071, 1.0];
        let mut grid = Vec::new();
        for &w in &steps {
            for &x in &steps {
                for &y in &steps {
                    for &z in &steps {
                        grid.push([w, x, y, z]);
                    }
                }
            }
        }
        grid
    }

    #[test]
    fn test_identity_is_zero_rotation() {
        let angles = to_euler(1.0, 0.0, 0.0, 0.0);
        assert_eq!(angles, EulerAngles::new(0.0, 0.0, 0.0));
    }

    #[test]
    fn test_zero_quaternion_returns_zero() {
        assert_eq!(to_euler(0.0, 0.0, 0.0, 0.0), EulerAngles::default());
    }

    #[test]
    fn test_quarter_turn_about_x() {
        let angles = to_euler(0.707, 0.707, 0.0, 0.0);
        assert!(angles.approx_eq(&EulerAngles::new(90.0, 0.0, 0.0), 1e-6), "{:?}", angles);
    }

    #[test]
    fn test_half_turn_about_x() {
        let angles = to_euler(0.0, 1.0, 0.0, 0.0);
        assert!(angles.approx_eq(&EulerAngles::new(180.0, 0.0, 0.0), TOL), "{:?}", angles);
    }

    #[test]
    fn test_half_turn_about_z() {
        let angles = to_euler(0.0, 0.0, 0.0, 1.0);
        assert!(angles.approx_eq(&EulerAngles::new(0.0, 0.0, 180.0), TOL), "{:?}", angles);
    }

    #[test]
    fn test_quarter_turn_about_z() {
        let h = std::f64::consts::FRAC_1_SQRT_2;
        let angles = to_euler(h, 0.0, 0.0, h);
        assert!(angles.approx_eq(&EulerAngles::new(0.0, 0.0, 90.0), 1e-9), "{:?}", angles);
    }

    #[test]
    fn test_gimbal_lock_clamps_pitch() {
        // asin argument is exactly +1 / -1 for these
        assert_eq!(to_euler(0.5, 0.5, 0.5, -0.5).pitch, 90.0);
        assert_eq!(to_euler(0.5, -0.5, -0.5, -0.5).pitch, -90.0);
        // same rotation at a different scale
        assert_eq!(to_euler(2.0, 2.0, 2.0, -2.0).pitch, 90.0);

        let h = std::f64::consts::FRAC_1_SQRT_2;
        assert!((to_euler(h, 0.0, h, 0.0).pitch - 90.0).abs() < 1e-6);
        assert!((to_euler(h, 0.0, -h, 0.0).pitch + 90.0).abs() < 1e-6);
    }

    /// Angular distance in degrees, treating -180 and 180 as the same angle
    fn angle_diff(a: f64, b: f64) -> f64 {
        let d = (a - b).rem_euclid(360.0);
        d.min(360.0 - d)
    }

    #[test]
    fn test_scale_invariance() {
        for q in quaternion_grid() {
            let norm2: f64 = q.iter().map(|c| c * c).sum();
            if norm2 == 0.0 {
                continue;
            }
            // roll and yaw are ill-conditioned next to gimbal lock
            let sinp = 2.0 * (q[0] * q[2] - q[3] * q[1]) / norm2;
            if sinp.abs() > 0.999 {
                continue;
            }
            let base = to_euler(q[0], q[1], q[2], q[3]);
            for k in [1e-3, 0.5, 2.0, 1e3, -1.0] {
                let scaled = to_euler(k * q[0], k * q[1], k * q[2], k * q[3]);
                let worst = angle_diff(scaled.roll, base.roll)
                    .max(angle_diff(scaled.pitch, base.pitch))
                    .max(angle_diff(scaled.yaw, base.yaw));
                assert!(worst < 1e-6, "q={:?} k={} base={:?} scaled={:?}", q, k, base, scaled);
            }
        }
    }

    #[test]
    fn test_output_ranges() {
        for q in quaternion_grid() {
            let a = to_euler(q[0], q[1], q[2], q[3]);
            assert!((-90.0..=90.0).contains(&a.pitch), "pitch out of range for {:?}: {:?}", q, a);
            assert!(a.roll > -180.0 && a.roll <= 180.0, "roll out of range for {:?}: {:?}", q, a);
            assert!(a.yaw > -180.0 && a.yaw <= 180.0, "yaw out of range for {:?}: {:?}", q, a);
        }
    }

    #[test]
    fn test_negative_zero_maps_to_positive_half_turn() {
        assert_eq!(half_open_degrees(-std::f64::consts::PI), 180.0);
        assert!((half_open_degrees(std::f64::consts::PI) - 180.0).abs() < TOL);
        assert!(half_open_degrees(std::f64::consts::PI) <= 180.0);
    }

    #[test]
    fn test_non_finite_quaternion_yields_nan() {
        for q in [
            [f64::NAN, 0.0, 0.0, 0.0],
            [1.0, f64::NAN, 0.0, 0.0],
            [f64::INFINITY, 0.0, 0.0, 0.0],
        ] {
            let angles = to_euler(q[0], q[1], q[2], q[3]);
            assert!(angles.roll.is_nan(), "roll for {:?}", q);
            assert!(angles.pitch.is_nan(), "pitch for {:?}", q);
            assert!(angles.yaw.is_nan(), "yaw for {:?}", q);
        }
    }

    #[test]
    fn test_from_quaternion() {
        let angles: EulerAngles = Quaternion::identity().into();
        assert_eq!(angles, EulerAngles::default());
    }
}
