use serde::{Deserialize, Serialize};

/// Background model parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundParams {
    /// EMA weight applied to a new range observation, `(0, 1]`.
    pub background_update_fraction: f64,
    /// Foreground cutoff in multiples of the effective sigma.
    pub closeness_sensitivity_multiplier: f64,
    /// Floor on the closeness band in meters.
    pub safety_margin_m: f64,
    /// Fraction of the cell mean treated as baseline range noise.
    pub noise_relative_fraction: f64,
    /// A point is foreground only if at least this many of its
    /// 8-connected grid neighbors also qualify in the same frame.
    pub neighbor_confirmation_count: usize,
    /// Seed an Unseeded cell from its first in-range observation.
    pub seed_from_first_observation: bool,
    /// Warm-up gate: minimum frames seen.
    pub warmup_min_frames: u64,
    /// Warm-up gate: minimum wall time in nanoseconds.
    pub warmup_duration_ns: u64,
    /// Wall time of continuous updates after which a cell freezes.
    pub freeze_duration_ns: u64,
    /// Clustering override handed to the extractor when > 0.
    pub foreground_dbscan_eps: f64,
    /// Clustering override handed to the extractor when > 0.
    pub foreground_min_cluster_points: usize,
}

impl Default for BackgroundParams {
    fn default() -> Self {
        default_background_params()
    }
}

pub fn default_background_params() -> BackgroundParams {
    BackgroundParams {
        background_update_fraction: 0.02,
        closeness_sensitivity_multiplier: 3.0,
        safety_margin_m: 0.5,
        noise_relative_fraction: 0.315,
        neighbor_confirmation_count: 3,
        seed_from_first_observation: true,
        warmup_min_frames: 100,
        warmup_duration_ns: 10_000_000_000,
        freeze_duration_ns: 60_000_000_000,
        foreground_dbscan_eps: 0.0,
        foreground_min_cluster_points: 0,
    }
}

/// Tracker parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingParams {
    /// kalman filter parameter
    pub motion_noise_scale: f64,
    /// kalman filter parameter
    pub initial_position_std_meters: f64,
    /// kalman filter parameter
    pub initial_vel_std_meters_per_sec: f64,
    /// kalman filter parameter
    pub observation_covariance_m2: f64,
    /// data association parameter: gate on the track↔centroid distance
    pub gate_distance_m: f64,
    /// consecutive hits before a tentative track is confirmed
    pub confirm_hits: u32,
    /// misses tolerated before a track is deleted
    pub max_misses: u32,
    /// frames a tentative track may live without confirming
    pub tentative_window_frames: u32,
    /// capacity of the per-track speed history ring buffer
    pub speed_history_len: usize,
    /// observations required before classification is attempted
    #[serde(default = "default_min_observations_for_classify")]
    pub min_observations_for_classify: u32,
}

fn default_min_observations_for_classify() -> u32 {
    5
}

impl Default for TrackingParams {
    fn default() -> Self {
        default_tracking_params()
    }
}

pub fn default_tracking_params() -> TrackingParams {
    TrackingParams {
        motion_noise_scale: 0.5,
        initial_position_std_meters: 0.5,
        initial_vel_std_meters_per_sec: 2.0,
        observation_covariance_m2: 1.0,
        gate_distance_m: 2.5,
        confirm_hits: 3,
        max_misses: 5,
        tentative_window_frames: 8,
        speed_history_len: 128,
        min_observations_for_classify: default_min_observations_for_classify(),
    }
}

/// Density clustering parameters (defaults; the background manager's
/// snapshot may override either value at runtime).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterParams {
    /// Neighborhood radius in meters.
    pub eps_m: f64,
    /// Minimum neighborhood size for a core point.
    pub min_points: usize,
}

impl Default for ClusterParams {
    fn default() -> Self {
        default_cluster_params()
    }
}

pub fn default_cluster_params() -> ClusterParams {
    ClusterParams {
        eps_m: 0.8,
        min_points: 4,
    }
}

/// Classifier decision thresholds.
///
/// Kept as a named table so tests can swap it; the classification logic
/// itself is a pure function of `(features, thresholds)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierThresholds {
    /// pedestrian: slow, person-sized, person-height
    pub pedestrian_max_avg_speed_mps: f64,
    pub pedestrian_max_length_m: f64,
    pub pedestrian_min_height_m: f64,
    pub pedestrian_max_height_m: f64,
    /// car: long footprint moving at road speed
    pub car_min_length_m: f64,
    pub car_min_avg_speed_mps: f64,
    pub car_max_height_m: f64,
    pub car_min_ring_span: u8,
    /// bird: small, fast, brief
    pub bird_max_length_m: f64,
    pub bird_min_peak_speed_mps: f64,
    pub bird_max_duration_s: f64,
    pub bird_max_ring_span: u8,
    /// confidence when every criterion of a class holds
    pub full_match_confidence: f64,
    /// scale applied to the criteria hit ratio of a partial match
    pub partial_match_weight: f64,
    /// confidence floor assigned to the fallback class
    pub other_confidence: f64,
    /// a competing class must beat the current confidence by this much
    /// to re-label an already classified track
    pub relabel_margin: f64,
}

impl Default for ClassifierThresholds {
    fn default() -> Self {
        default_classifier_thresholds()
    }
}

pub fn default_classifier_thresholds() -> ClassifierThresholds {
    ClassifierThresholds {
        pedestrian_max_avg_speed_mps: 3.0,
        pedestrian_max_length_m: 1.2,
        pedestrian_min_height_m: 0.8,
        pedestrian_max_height_m: 2.2,
        car_min_length_m: 2.5,
        car_min_avg_speed_mps: 1.5,
        car_max_height_m: 2.5,
        car_min_ring_span: 2,
        bird_max_length_m: 0.5,
        bird_min_peak_speed_mps: 4.0,
        bird_max_duration_s: 6.0,
        bird_max_ring_span: 1,
        full_match_confidence: 0.9,
        partial_match_weight: 0.5,
        other_confidence: 0.3,
        relabel_margin: 0.15,
    }
}

/// Everything a single-sensor analysis run needs, as loaded from a TOML
/// parameter file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisParams {
    #[serde(default)]
    pub background: BackgroundParams,
    #[serde(default)]
    pub tracking: TrackingParams,
    #[serde(default)]
    pub cluster: ClusterParams,
    #[serde(default)]
    pub classifier: ClassifierThresholds,
}
