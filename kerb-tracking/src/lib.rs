//! Object tracking over foreground LIDAR points.
//!
//! The stages here take one frame's foreground world points and carry
//! identities across frames: density clustering, a constant-velocity
//! Kalman tracker with gated nearest-neighbor association, and a
//! feature-threshold classifier for confirmed tracks.

mod classify;
mod cluster;
mod motion_model;
mod observation_model;
pub mod stats;
mod tracker;

pub use classify::{classify, classify_and_update, ObjectClass, TrackFeatures};
pub use cluster::{extract_clusters, Aabb, Cluster, NOISE_CLUSTER_ID};
pub use motion_model::{ConstantVelocityModel, MotionModelFixedDt};
pub use observation_model::CentroidObservationModel;
pub use tracker::{SpeedStats, Track, TrackState, Tracker};
