use kerb_tracking::{
    classify_and_update, extract_clusters, ObjectClass, TrackState, Tracker,
};
use kerb_types::{default_tracking_params, ClusterParams, TrackingParams, WorldPoint};

fn wp(x: f64, y: f64, z: f64, ring: u8) -> WorldPoint {
    WorldPoint {
        x,
        y,
        z,
        ring,
        intensity: 40,
        timestamp_ns: 0,
        return_index: 0,
    }
}

/// A car-sized blob of points centered at `cx`.
fn car_blob(cx: f64) -> Vec<WorldPoint> {
    let mut points = Vec::new();
    for i in 0..10 {
        for j in 0..3 {
            points.push(wp(
                cx - 2.0 + i as f64 * 0.45,
                5.0 + j as f64 * 0.6,
                0.2 + (i % 4) as f64 * 0.4,
                10 + (i % 5) as u8,
            ));
        }
    }
    points
}

fn scenario_params() -> TrackingParams {
    TrackingParams {
        // High process noise keeps the velocity gain hot so the speed
        // estimate converges within a few frames of synthetic data.
        motion_noise_scale: 10.0,
        initial_vel_std_meters_per_sec: 5.0,
        ..default_tracking_params()
    }
}

fn cluster_params() -> ClusterParams {
    ClusterParams {
        eps_m: 0.8,
        min_points: 4,
    }
}

const FRAME_NS: u64 = 100_000_000; // 10 Hz

/// A group translating 0.5 m/frame becomes exactly one confirmed track
/// whose average speed settles near 5 m/s at 10 Hz.
#[test]
fn moving_object_confirms_with_correct_speed() {
    let params = scenario_params();
    let confirm_hits = params.confirm_hits;
    let mut tracker = Tracker::new(params);

    for frame in 0..60u64 {
        let points = car_blob(frame as f64 * 0.5);
        let clusters = extract_clusters(&points, &cluster_params());
        assert_eq!(clusters.len(), 1, "frame {frame} should form one cluster");
        tracker.update(&clusters, frame * FRAME_NS);

        if frame + 1 >= u64::from(confirm_hits) {
            assert_eq!(tracker.confirmed_tracks().count(), 1);
        }
    }

    assert_eq!(tracker.all_tracks().len(), 1);
    let track = &tracker.all_tracks()[0];
    assert_eq!(track.state, TrackState::Confirmed);
    assert_eq!(track.observation_count, 60);

    let speed = track.speed_stats();
    assert!(
        (speed.avg_mps - 5.0).abs() <= 0.5,
        "avg speed {} outside 5.0 ± 10%",
        speed.avg_mps
    );
    assert!(speed.peak_mps <= 8.0);
    assert!(speed.p50_mps <= speed.p85_mps && speed.p85_mps <= speed.p95_mps);
}

/// A three-frame occlusion coasts the track; re-acquisition resets the
/// miss count without inflating the observation count.
#[test]
fn occlusion_coasts_then_reacquires() {
    let mut tracker = Tracker::new(scenario_params());

    let mut hits = 0u32;
    for frame in 0..30u64 {
        let occluded = (10..13).contains(&frame);
        let clusters = if occluded {
            Vec::new()
        } else {
            hits += 1;
            extract_clusters(&car_blob(frame as f64 * 0.5), &cluster_params())
        };
        tracker.update(&clusters, frame * FRAME_NS);

        let track = &tracker.all_tracks()[0];
        if occluded {
            assert_eq!(track.state, TrackState::Coasting, "frame {frame}");
            assert!(track.miss_count > 0);
        }
        if frame == 13 {
            // Re-associated on the first frame after the gap.
            assert_eq!(track.state, TrackState::Confirmed);
            assert_eq!(track.miss_count, 0);
        }
    }

    let track = &tracker.all_tracks()[0];
    assert_eq!(tracker.all_tracks().len(), 1, "no duplicate track spawned");
    assert_eq!(track.observation_count, hits);
}

/// A 2-point blob below `min_points` never clusters, so no track ever
/// exists.
#[test]
fn sub_threshold_blob_never_tracks() {
    let mut tracker = Tracker::new(scenario_params());
    for frame in 0..20u64 {
        let x = frame as f64 * 0.5;
        let points = vec![wp(x, 2.0, 0.5, 8), wp(x + 0.2, 2.0, 0.6, 9)];
        let clusters = extract_clusters(&points, &cluster_params());
        assert!(clusters.is_empty());
        tracker.update(&clusters, frame * FRAME_NS);
    }
    assert!(tracker.all_tracks().is_empty());
}

/// The multiset of matched clusters equals the multiset of matched
/// tracks: with two well-separated objects, every frame matches each
/// track exactly once.
#[test]
fn two_objects_keep_disjoint_identities() {
    let mut tracker = Tracker::new(scenario_params());
    for frame in 0..25u64 {
        let mut points = car_blob(frame as f64 * 0.5);
        points.extend(
            car_blob(60.0 - frame as f64 * 0.5)
                .into_iter()
                .map(|p| wp(p.x, p.y + 30.0, p.z, p.ring)),
        );
        let clusters = extract_clusters(&points, &cluster_params());
        assert_eq!(clusters.len(), 2);
        tracker.update(&clusters, frame * FRAME_NS);
    }

    assert_eq!(tracker.all_tracks().len(), 2);
    for track in tracker.all_tracks() {
        assert_eq!(track.state, TrackState::Confirmed);
        assert_eq!(track.observation_count, 25);
    }
    let ids: Vec<_> = tracker
        .all_tracks()
        .iter()
        .map(|t| t.track_id.as_str())
        .collect();
    assert_eq!(ids, vec!["trk-00001", "trk-00002"]);
}

/// A confirmed car-sized, road-speed track classifies as a car, and the
/// label survives repeated classification.
#[test]
fn confirmed_track_classifies_as_car() {
    let params = scenario_params();
    let min_obs = params.min_observations_for_classify;
    let thresholds = kerb_types::default_classifier_thresholds();
    let mut tracker = Tracker::new(params);

    for frame in 0..30u64 {
        let clusters = extract_clusters(&car_blob(frame as f64 * 0.5), &cluster_params());
        tracker.update(&clusters, frame * FRAME_NS);
        for track in tracker.confirmed_tracks_mut() {
            classify_and_update(track, &thresholds, min_obs);
        }
    }

    let track = &tracker.all_tracks()[0];
    assert_eq!(track.object_class, Some(ObjectClass::Car));
    assert!(track.object_confidence > 0.5);

    // Idempotent: classifying again changes nothing.
    let before = (track.object_class, track.object_confidence);
    let mut tracker = tracker;
    for track in tracker.confirmed_tracks_mut() {
        classify_and_update(track, &thresholds, min_obs);
    }
    let track = &tracker.all_tracks()[0];
    assert_eq!((track.object_class, track.object_confidence), before);
}
