use nalgebra::{Matrix4, U4};

use adskalman::TransitionModelLinearNoControl;

/// Constant velocity planar motion model parameterized by `dt`.
///
/// The important method is `calc_for_dt()`; calling it returns a motion
/// model for a specific `dt`. The state vector is [x y xvel yvel].
#[derive(Debug, Clone)]
pub struct ConstantVelocityModel {
    motion_noise_scale: f64,
}

impl ConstantVelocityModel {
    pub fn new(motion_noise_scale: f64) -> Self {
        Self { motion_noise_scale }
    }

    /// For a given `dt`, create a new instance of the motion model.
    pub fn calc_for_dt(&self, dt: f64) -> MotionModelFixedDt {
        // Create transition model. 2D position and 2D velocity.
        // This is "F" in most Kalman filter descriptions.
        #[rustfmt::skip]
        let transition_model = Matrix4::<f64>::new(
            1.0, 0.0,  dt, 0.0,
            0.0, 1.0, 0.0,  dt,
            0.0, 0.0, 1.0, 0.0,
            0.0, 0.0, 0.0, 1.0);
        let transition_model_transpose = transition_model.transpose();

        let t33 = (dt * dt * dt) / 3.0;
        let t22 = (dt * dt) / 2.0;

        // This form is after N. Shimkin's lecture notes in
        // Estimation and Identification in Dynamical Systems
        // http://webee.technion.ac.il/people/shimkin/Estimation09/ch8_target.pdf

        // This is "Q" in most Kalman filter descriptions.
        #[rustfmt::skip]
        let transition_noise_covariance = Matrix4::<f64>::new(
            t33, 0.0, t22, 0.0,
            0.0, t33, 0.0, t22,
            t22, 0.0,  dt, 0.0,
            0.0, t22, 0.0,  dt) * self.motion_noise_scale;

        MotionModelFixedDt {
            transition_model,
            transition_model_transpose,
            transition_noise_covariance,
        }
    }
}

/// Constant velocity planar motion model for a fixed `dt`.
#[derive(Debug)]
pub struct MotionModelFixedDt {
    transition_model: Matrix4<f64>,
    transition_model_transpose: Matrix4<f64>,
    transition_noise_covariance: Matrix4<f64>,
}

impl TransitionModelLinearNoControl<f64, U4> for MotionModelFixedDt {
    fn F(&self) -> &Matrix4<f64> {
        &self.transition_model
    }
    fn FT(&self) -> &Matrix4<f64> {
        &self.transition_model_transpose
    }
    fn Q(&self) -> &Matrix4<f64> {
        &self.transition_noise_covariance
    }
}
