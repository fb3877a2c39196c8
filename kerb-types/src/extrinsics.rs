use serde::{Deserialize, Serialize};

use crate::{PolarPoint, WorldPoint};

/// Rigid mounting transform for one sensor: translation plus rotation
/// about the vertical axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorExtrinsics {
    pub x_m: f64,
    pub y_m: f64,
    pub z_m: f64,
    pub yaw_deg: f64,
}

impl Default for SensorExtrinsics {
    fn default() -> Self {
        Self {
            x_m: 0.0,
            y_m: 0.0,
            z_m: 0.0,
            yaw_deg: 0.0,
        }
    }
}

impl SensorExtrinsics {
    /// Convert a polar measurement into the world frame.
    ///
    /// In the sensor frame, azimuth 0° points along +y and azimuth 90°
    /// along +x (clockwise when viewed from above), matching the
    /// sensor's spin direction.
    pub fn world_from_polar(&self, p: &PolarPoint) -> WorldPoint {
        let az = p.azimuth_deg.to_radians();
        let el = p.elevation_deg.to_radians();
        let horiz = p.range_m * el.cos();
        let sx = horiz * az.sin();
        let sy = horiz * az.cos();
        let sz = p.range_m * el.sin();

        let (sin_yaw, cos_yaw) = self.yaw_deg.to_radians().sin_cos();
        WorldPoint {
            x: cos_yaw * sx - sin_yaw * sy + self.x_m,
            y: sin_yaw * sx + cos_yaw * sy + self.y_m,
            z: sz + self.z_m,
            ring: p.ring,
            intensity: p.intensity,
            timestamp_ns: p.timestamp_ns,
            return_index: p.return_index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn polar(azimuth_deg: f64, elevation_deg: f64, range_m: f64) -> PolarPoint {
        PolarPoint {
            azimuth_deg,
            elevation_deg,
            range_m,
            intensity: 0,
            ring: 0,
            timestamp_ns: 0,
            return_index: 0,
        }
    }

    #[test]
    fn identity_transform_axes() {
        let ext = SensorExtrinsics::default();
        let w = ext.world_from_polar(&polar(0.0, 0.0, 10.0));
        assert_relative_eq!(w.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(w.y, 10.0, epsilon = 1e-12);
        assert_relative_eq!(w.z, 0.0, epsilon = 1e-12);

        let w = ext.world_from_polar(&polar(90.0, 0.0, 10.0));
        assert_relative_eq!(w.x, 10.0, epsilon = 1e-9);
        assert_relative_eq!(w.y, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn elevation_projects_onto_z() {
        let ext = SensorExtrinsics::default();
        let w = ext.world_from_polar(&polar(0.0, 30.0, 2.0));
        assert_relative_eq!(w.z, 1.0, epsilon = 1e-12);
        assert_relative_eq!(w.y, 3.0f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn yaw_and_translation_compose() {
        let ext = SensorExtrinsics {
            x_m: 1.0,
            y_m: -2.0,
            z_m: 0.5,
            yaw_deg: 90.0,
        };
        // Sensor-frame +y rotates onto world +... yaw of 90° maps
        // (sx, sy) -> (-sy, sx).
        let w = ext.world_from_polar(&polar(0.0, 0.0, 4.0));
        assert_relative_eq!(w.x, 1.0 - 4.0, epsilon = 1e-9);
        assert_relative_eq!(w.y, -2.0, epsilon = 1e-9);
        assert_relative_eq!(w.z, 0.5, epsilon = 1e-12);
    }
}
