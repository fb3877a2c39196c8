use std::collections::VecDeque;

use adskalman::{
    CovarianceUpdateMethod, ObservationModel, StateAndCovariance, TransitionModelLinearNoControl,
};
use nalgebra::{Matrix4, Vector2, Vector4, U4};
use serde::Serialize;
use tracing::{trace, warn};

use kerb_types::TrackingParams;

use crate::cluster::Cluster;
use crate::motion_model::ConstantVelocityModel;
use crate::observation_model::CentroidObservationModel;
use crate::stats;

/// Lifecycle of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrackState {
    Tentative,
    Confirmed,
    Coasting,
    Deleted,
}

/// Speed telemetry over a track's bounded sample history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpeedStats {
    pub avg_mps: f64,
    pub peak_mps: f64,
    pub p50_mps: f64,
    pub p85_mps: f64,
    pub p95_mps: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct RunningMean {
    sum: f64,
    count: u32,
}

impl RunningMean {
    fn push(&mut self, v: f64) {
        self.sum += v;
        self.count += 1;
    }

    fn value(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / f64::from(self.count)
        }
    }
}

/// A persistent identity across frames.
#[derive(Debug, Clone)]
pub struct Track {
    pub track_id: String,
    pub state: TrackState,
    pub heading_rad: f64,
    pub first_ns: u64,
    pub last_ns: u64,
    pub observation_count: u32,
    pub miss_count: u32,
    pub object_class: Option<crate::ObjectClass>,
    pub object_confidence: f64,
    estimate: StateAndCovariance<f64, U4>,
    last_predict_ns: u64,
    consecutive_hits: u32,
    frames_since_spawn: u32,
    speed_history: VecDeque<f64>,
    height_history: VecDeque<f64>,
    bbox_length: RunningMean,
    bbox_width: RunningMean,
    bbox_height: RunningMean,
    max_ring_span: u8,
}

impl Track {
    pub fn position(&self) -> (f64, f64) {
        let s = self.estimate.state();
        (s[0], s[1])
    }

    pub fn velocity(&self) -> (f64, f64) {
        let s = self.estimate.state();
        (s[2], s[3])
    }

    pub fn speed_mps(&self) -> f64 {
        let (vx, vy) = self.velocity();
        vx.hypot(vy)
    }

    pub fn speed_stats(&self) -> SpeedStats {
        let samples: Vec<f64> = self.speed_history.iter().copied().collect();
        let (p50, p85, p95) = stats::percentiles(&samples);
        SpeedStats {
            avg_mps: stats::mean(&samples),
            peak_mps: samples.iter().copied().fold(0.0, f64::max),
            p50_mps: p50,
            p85_mps: p85,
            p95_mps: p95,
        }
    }

    /// Running means of (length, width, height) over observed boxes.
    pub fn bbox_means(&self) -> (f64, f64, f64) {
        (
            self.bbox_length.value(),
            self.bbox_width.value(),
            self.bbox_height.value(),
        )
    }

    /// p95 of observed per-frame bounding box heights.
    pub fn p95_max_height_m(&self) -> f64 {
        let samples: Vec<f64> = self.height_history.iter().copied().collect();
        stats::percentiles(&samples).2
    }

    pub fn ring_span(&self) -> u8 {
        self.max_ring_span
    }

    pub fn duration_s(&self) -> f64 {
        self.last_ns.saturating_sub(self.first_ns) as f64 * 1e-9
    }

    fn apply_hit(
        &mut self,
        posterior: StateAndCovariance<f64, U4>,
        cluster: &Cluster,
        frame_time_ns: u64,
        params: &TrackingParams,
    ) {
        self.estimate = posterior;

        let speed = self.speed_mps();
        push_bounded(&mut self.speed_history, params.speed_history_len, speed);
        push_bounded(
            &mut self.height_history,
            params.speed_history_len,
            cluster.aabb.height(),
        );
        if speed > 1e-6 {
            let (vx, vy) = self.velocity();
            self.heading_rad = vy.atan2(vx);
        }
        self.bbox_length.push(cluster.aabb.length());
        self.bbox_width.push(cluster.aabb.width());
        self.bbox_height.push(cluster.aabb.height());
        self.max_ring_span = self.max_ring_span.max(cluster.ring_span);

        self.last_ns = frame_time_ns;
        self.observation_count += 1;
        self.miss_count = 0;
        self.consecutive_hits += 1;

        match self.state {
            TrackState::Tentative if self.consecutive_hits >= params.confirm_hits => {
                trace!(track = %self.track_id, "confirmed");
                self.state = TrackState::Confirmed;
            }
            TrackState::Coasting => {
                self.state = TrackState::Confirmed;
            }
            _ => {}
        }
    }
}

fn push_bounded(buf: &mut VecDeque<f64>, cap: usize, v: f64) {
    if cap == 0 {
        return;
    }
    if buf.len() == cap {
        buf.pop_front();
    }
    buf.push_back(v);
}

/// Multi-object tracker: owns every track it has ever created and the
/// Kalman machinery that advances them.
pub struct Tracker {
    params: TrackingParams,
    motion_model: ConstantVelocityModel,
    observation_model: CentroidObservationModel,
    tracks: Vec<Track>,
    /// Indices of non-deleted tracks, in creation order.
    active: Vec<usize>,
    next_track_num: u64,
}

impl Tracker {
    pub fn new(params: TrackingParams) -> Self {
        Self {
            motion_model: ConstantVelocityModel::new(params.motion_noise_scale),
            observation_model: CentroidObservationModel::new(params.observation_covariance_m2),
            tracks: Vec::new(),
            active: Vec::new(),
            next_track_num: 0,
            params,
        }
    }

    /// Every track ever created, including deleted ones, in creation
    /// order.
    pub fn all_tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn confirmed_tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks
            .iter()
            .filter(|t| t.state == TrackState::Confirmed)
    }

    pub fn confirmed_tracks_mut(&mut self) -> impl Iterator<Item = &mut Track> {
        self.tracks
            .iter_mut()
            .filter(|t| t.state == TrackState::Confirmed)
    }

    /// Advance one frame: predict, associate, update, spawn, coast.
    ///
    /// Each cluster matches at most one track and vice versa; clusters
    /// with a non-finite centroid neither match nor spawn.
    pub fn update(&mut self, clusters: &[Cluster], frame_time_ns: u64) {
        let active = self.active.clone();

        // Predict all live tracks forward to this frame.
        for &ti in &active {
            let track = &mut self.tracks[ti];
            let dt_ns = frame_time_ns.saturating_sub(track.last_predict_ns);
            if dt_ns > 0 {
                let dt = dt_ns as f64 * 1e-9;
                let model = self.motion_model.calc_for_dt(dt);
                track.estimate = model.predict(&track.estimate);
                track.last_predict_ns = frame_time_ns;
            }
            track.frames_since_spawn += 1;
        }

        // Gated candidate pairs, cheapest first; ties fall back to
        // creation order, which is also track id order.
        let mut candidates: Vec<(f64, usize, usize)> = Vec::new();
        for &ti in &active {
            for (ci, cluster) in clusters.iter().enumerate() {
                if !cluster.centroid_is_finite() {
                    continue;
                }
                let d = self.gating_distance(&self.tracks[ti], cluster);
                if d <= self.params.gate_distance_m {
                    candidates.push((d, ti, ci));
                }
            }
        }
        candidates.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then(a.1.cmp(&b.1))
                .then(a.2.cmp(&b.2))
        });

        let mut track_matched = vec![false; self.tracks.len()];
        let mut cluster_matched = vec![false; clusters.len()];
        for (_d, ti, ci) in candidates {
            if track_matched[ti] || cluster_matched[ci] {
                continue;
            }
            let cluster = &clusters[ci];
            let observation = Vector2::new(cluster.centroid_x, cluster.centroid_y);
            match self.observation_model.update(
                &self.tracks[ti].estimate,
                &observation,
                CovarianceUpdateMethod::JosephForm,
            ) {
                Ok(posterior) => {
                    track_matched[ti] = true;
                    cluster_matched[ci] = true;
                    self.tracks[ti].apply_hit(posterior, cluster, frame_time_ns, &self.params);
                }
                Err(e) => {
                    // Degenerate measurement; both sides stay
                    // unmatched.
                    warn!(track = %self.tracks[ti].track_id, error = %e, "kalman update failed");
                }
            }
        }

        // Unmatched clusters spawn tentative tracks.
        for (ci, cluster) in clusters.iter().enumerate() {
            if cluster_matched[ci] || !cluster.centroid_is_finite() {
                continue;
            }
            self.spawn_track(cluster, frame_time_ns);
        }

        // Unmatched tracks coast, and eventually die.
        for &ti in &active {
            if track_matched[ti] {
                continue;
            }
            let track = &mut self.tracks[ti];
            track.miss_count += 1;
            track.consecutive_hits = 0;
            if track.state == TrackState::Confirmed {
                track.state = TrackState::Coasting;
            }
            if track.miss_count > self.params.max_misses {
                trace!(track = %track.track_id, "deleted after miss cap");
                track.state = TrackState::Deleted;
            } else if track.state == TrackState::Tentative
                && track.frames_since_spawn >= self.params.tentative_window_frames
            {
                trace!(track = %track.track_id, "tentative track expired");
                track.state = TrackState::Deleted;
            }
        }

        self.active
            .retain(|&ti| self.tracks[ti].state != TrackState::Deleted);
    }

    /// Mahalanobis distance from the innovation covariance when it
    /// inverts cleanly, Euclidean meters otherwise.
    fn gating_distance(&self, track: &Track, cluster: &Cluster) -> f64 {
        let state = track.estimate.state();
        let dx = cluster.centroid_x - state[0];
        let dy = cluster.centroid_y - state[1];
        let euclid = dx.hypot(dy);

        let p_pos = track
            .estimate
            .covariance()
            .fixed_view::<2, 2>(0, 0)
            .into_owned();
        let s = p_pos + self.observation_model.R();
        if s.determinant().abs() > 1e-12 {
            if let Some(s_inv) = s.try_inverse() {
                let innovation = Vector2::new(dx, dy);
                let md2 = (innovation.transpose() * s_inv * innovation)[(0, 0)];
                if md2.is_finite() && md2 >= 0.0 {
                    return md2.sqrt();
                }
            }
        }
        euclid
    }

    fn spawn_track(&mut self, cluster: &Cluster, frame_time_ns: u64) {
        self.next_track_num += 1;
        let track_id = format!("trk-{:05}", self.next_track_num);
        trace!(track = %track_id, x = cluster.centroid_x, y = cluster.centroid_y, "spawned");

        let state = Vector4::new(cluster.centroid_x, cluster.centroid_y, 0.0, 0.0);
        let pos_var = self.params.initial_position_std_meters.powi(2);
        let vel_var = self.params.initial_vel_std_meters_per_sec.powi(2);
        let mut covar = pos_var * Matrix4::<f64>::identity();
        for i in 2..4 {
            covar[(i, i)] = vel_var;
        }

        // The spawning observation already counts as one hit.
        let state0 = if self.params.confirm_hits <= 1 {
            TrackState::Confirmed
        } else {
            TrackState::Tentative
        };
        let mut track = Track {
            track_id,
            state: state0,
            heading_rad: 0.0,
            first_ns: frame_time_ns,
            last_ns: frame_time_ns,
            observation_count: 1,
            miss_count: 0,
            object_class: None,
            object_confidence: 0.0,
            estimate: StateAndCovariance::new(state, covar),
            last_predict_ns: frame_time_ns,
            consecutive_hits: 1,
            frames_since_spawn: 0,
            speed_history: VecDeque::new(),
            height_history: VecDeque::new(),
            bbox_length: RunningMean::default(),
            bbox_width: RunningMean::default(),
            bbox_height: RunningMean::default(),
            max_ring_span: cluster.ring_span,
        };
        track.bbox_length.push(cluster.aabb.length());
        track.bbox_width.push(cluster.aabb.width());
        track.bbox_height.push(cluster.aabb.height());
        push_bounded(
            &mut track.height_history,
            self.params.speed_history_len,
            cluster.aabb.height(),
        );

        self.active.push(self.tracks.len());
        self.tracks.push(track);
    }
}
