use serde::{Deserialize, Serialize};

use kerb_types::ClassifierThresholds;

use crate::tracker::{Track, TrackState};

/// Object label assigned to a confirmed track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectClass {
    Pedestrian,
    Car,
    Bird,
    Other,
}

impl std::fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let s = match self {
            ObjectClass::Pedestrian => "pedestrian",
            ObjectClass::Car => "car",
            ObjectClass::Bird => "bird",
            ObjectClass::Other => "other",
        };
        f.write_str(s)
    }
}

/// Kinematic and geometric features accumulated by a track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackFeatures {
    pub avg_speed_mps: f64,
    pub peak_speed_mps: f64,
    pub avg_length_m: f64,
    pub avg_width_m: f64,
    pub avg_height_m: f64,
    pub p95_max_height_m: f64,
    pub duration_s: f64,
    pub ring_span: u8,
}

impl TrackFeatures {
    pub fn from_track(track: &Track) -> Self {
        let speed = track.speed_stats();
        let (avg_length_m, avg_width_m, avg_height_m) = track.bbox_means();
        Self {
            avg_speed_mps: speed.avg_mps,
            peak_speed_mps: speed.peak_mps,
            avg_length_m,
            avg_width_m,
            avg_height_m,
            p95_max_height_m: track.p95_max_height_m(),
            duration_s: track.duration_s(),
            ring_span: track.ring_span(),
        }
    }
}

/// Score a feature set against each class and return the best label
/// with its confidence.
///
/// Pure function of `(features, thresholds)`; identical inputs yield
/// identical output.
pub fn classify(features: &TrackFeatures, thresholds: &ClassifierThresholds) -> (ObjectClass, f64) {
    let pedestrian = score(
        &[
            features.avg_speed_mps <= thresholds.pedestrian_max_avg_speed_mps,
            features.avg_length_m <= thresholds.pedestrian_max_length_m,
            features.p95_max_height_m >= thresholds.pedestrian_min_height_m,
            features.p95_max_height_m <= thresholds.pedestrian_max_height_m,
        ],
        thresholds,
    );
    let car = score(
        &[
            features.avg_length_m >= thresholds.car_min_length_m,
            features.avg_speed_mps >= thresholds.car_min_avg_speed_mps,
            features.p95_max_height_m <= thresholds.car_max_height_m,
            features.ring_span >= thresholds.car_min_ring_span,
        ],
        thresholds,
    );
    let bird = score(
        &[
            features.avg_length_m <= thresholds.bird_max_length_m,
            features.peak_speed_mps >= thresholds.bird_min_peak_speed_mps,
            features.duration_s <= thresholds.bird_max_duration_s,
            features.ring_span <= thresholds.bird_max_ring_span,
        ],
        thresholds,
    );

    let mut best = (ObjectClass::Other, thresholds.other_confidence);
    for (class, confidence) in [
        (ObjectClass::Pedestrian, pedestrian),
        (ObjectClass::Car, car),
        (ObjectClass::Bird, bird),
    ] {
        if confidence > best.1 {
            best = (class, confidence);
        }
    }
    best
}

fn score(criteria: &[bool], thresholds: &ClassifierThresholds) -> f64 {
    let hits = criteria.iter().filter(|&&c| c).count();
    if hits < criteria.len() {
        // Missing any criterion caps the score below a full match.
        hits as f64 / criteria.len() as f64 * thresholds.partial_match_weight
    } else {
        // All criteria hold; confidence grows no further.
        thresholds.full_match_confidence
    }
}

/// Classify a confirmed track in place.
///
/// The label is monotonic: a new result only replaces the current one
/// when it names the same class with higher confidence, or a different
/// class whose confidence clears the re-label margin. Idempotent for
/// identical inputs.
pub fn classify_and_update(
    track: &mut Track,
    thresholds: &ClassifierThresholds,
    min_observations: u32,
) {
    if track.state != TrackState::Confirmed || track.observation_count < min_observations {
        return;
    }
    let features = TrackFeatures::from_track(track);
    let (class, confidence) = classify(&features, thresholds);

    match track.object_class {
        None => {
            track.object_class = Some(class);
            track.object_confidence = confidence;
        }
        Some(current) if current == class => {
            track.object_confidence = track.object_confidence.max(confidence);
        }
        Some(_) => {
            if confidence > track.object_confidence + thresholds.relabel_margin {
                track.object_class = Some(class);
                track.object_confidence = confidence;
            }
        }
    }
}
