use tracing::trace;

use kerb_types::{Frame, PolarPoint};

/// Accumulates polar points and emits one [`Frame`] per full rotation.
///
/// A frame boundary is an azimuth wrap: the previous point above 270°
/// and the new point below 90°. Anything left in the buffer when the
/// input closes is emitted as a final partial frame by [`finalize`].
///
/// [`finalize`]: FrameAssembler::finalize
#[derive(Debug, Default)]
pub struct FrameAssembler {
    points: Vec<PolarPoint>,
    last_azimuth_deg: Option<f64>,
    motor_rpm: u16,
    rpm_change_count: u64,
    frames_emitted: u64,
}

const WRAP_HIGH_DEG: f64 = 270.0;
const WRAP_LOW_DEG: f64 = 90.0;

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append points in arrival order, emitting any frames completed by
    /// an azimuth wrap within `points`.
    pub fn add_points_polar(&mut self, points: &[PolarPoint]) -> Vec<Frame> {
        let mut completed = Vec::new();
        for p in points {
            if let Some(prev) = self.last_azimuth_deg {
                if prev > WRAP_HIGH_DEG && p.azimuth_deg < WRAP_LOW_DEG {
                    if let Some(frame) = self.take_frame() {
                        completed.push(frame);
                    }
                }
            }
            self.last_azimuth_deg = Some(p.azimuth_deg);
            self.points.push(*p);
        }
        completed
    }

    /// Record the motor speed reported by the most recent packet.
    ///
    /// A change is counted whenever a non-zero reading differs from the
    /// previous non-zero reading.
    pub fn set_motor_speed(&mut self, rpm: u16) {
        if rpm == 0 {
            return;
        }
        if self.motor_rpm != 0 && self.motor_rpm != rpm {
            trace!(
                old = self.motor_rpm,
                new = rpm,
                "motor speed changed"
            );
            self.rpm_change_count += 1;
        }
        self.motor_rpm = rpm;
    }

    /// Emit the remaining partial frame, if any, and reset.
    pub fn finalize(&mut self) -> Option<Frame> {
        self.last_azimuth_deg = None;
        self.take_frame()
    }

    pub fn rpm_change_count(&self) -> u64 {
        self.rpm_change_count
    }

    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted
    }

    fn take_frame(&mut self) -> Option<Frame> {
        if self.points.is_empty() {
            return None;
        }
        let points = std::mem::take(&mut self.points);
        self.frames_emitted += 1;
        Some(Frame {
            frame_start_ns: points[0].timestamp_ns,
            motor_rpm: self.motor_rpm,
            points,
        })
    }
}
