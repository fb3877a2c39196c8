//! Single-sensor offline pipeline: packets → frames → mask → clusters →
//! tracks → labels.
//!
//! Everything here runs serially on the caller's thread (one pipeline
//! per sensor, no shared state across sensors). The stop flag is
//! honored at frame boundaries and flushes the partial frame before
//! returning.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use kerb_background::{BackgroundManager, RegionStore};
use kerb_tracking::{
    classify_and_update, extract_clusters, ObjectClass, Track, TrackState, Tracker,
};
use kerb_types::{AnalysisParams, Frame, GridDims, SensorExtrinsics, WorldPoint};
use pandar_parse::{FrameAssembler, PacketParser, TimestampMode};

use crate::pcap::PcapSource;
use crate::stats::{ProcessingStats, StageTimers};
use crate::training;
use crate::Result;

/// Construction-time configuration for one sensor's pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub sensor_id: String,
    pub grid: GridDims,
    pub extrinsics: SensorExtrinsics,
    pub params: AnalysisParams,
    pub timestamp_mode: TimestampMode,
}

impl PipelineConfig {
    pub fn new(sensor_id: impl Into<String>) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            grid: GridDims::pandar40(),
            extrinsics: SensorExtrinsics::default(),
            params: AnalysisParams::default(),
            timestamp_mode: TimestampMode::default(),
        }
    }
}

/// Cooperative cancellation handle, checked at frame boundaries.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

pub struct PcapPipeline<'store> {
    config: PipelineConfig,
    parser: PacketParser,
    assembler: FrameAssembler,
    background: BackgroundManager,
    tracker: Tracker,
    stats: ProcessingStats,
    timers: StageTimers,
    store: Option<&'store dyn RegionStore>,
    training_sink: Option<Box<dyn Write + Send>>,
    stop: StopFlag,
}

impl<'store> PcapPipeline<'store> {
    pub fn new(config: PipelineConfig, store: Option<&'store dyn RegionStore>) -> Self {
        let mut parser = PacketParser::new();
        parser.set_timestamp_mode(config.timestamp_mode);
        let background = BackgroundManager::new(
            config.grid,
            config.params.background.clone(),
            &config.sensor_id,
            store,
        );
        let tracker = Tracker::new(config.params.tracking.clone());
        Self {
            parser,
            assembler: FrameAssembler::new(),
            background,
            tracker,
            stats: ProcessingStats::new(),
            timers: StageTimers::default(),
            store,
            training_sink: None,
            stop: StopFlag::new(),
            config,
        }
    }

    /// Receive one training blob per processed frame once the
    /// background model has warmed up.
    pub fn with_training_sink(mut self, sink: Box<dyn Write + Send>) -> Self {
        self.training_sink = Some(sink);
        self
    }

    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    pub fn stats(&self) -> &ProcessingStats {
        &self.stats
    }

    pub fn stage_timers(&self) -> &StageTimers {
        &self.timers
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn background(&self) -> &BackgroundManager {
        &self.background
    }

    /// Drive the whole capture through the pipeline.
    ///
    /// Decode failures are counted and skipped; only an internal
    /// invariant violation or I/O failure aborts the run. On return the
    /// partial frame has been flushed and regions persisted (when a
    /// store is configured).
    pub fn run(&mut self, source: &mut PcapSource) -> Result<()> {
        info!(sensor = %self.config.sensor_id, "starting offline analysis");

        'packets: while let Some((payload, capture_ns)) = source.next_payload()? {
            ProcessingStats::add(&self.stats.packets, 1);
            let parsed = match self.parser.parse(&payload, capture_ns) {
                Ok(parsed) => parsed,
                Err(e) => {
                    ProcessingStats::add(&self.stats.parse_errors, 1);
                    debug!(error = %e, "dropped undecodable packet");
                    continue;
                }
            };
            ProcessingStats::add(&self.stats.points, parsed.points.len() as u64);
            if let Some(rpm) = parsed.motor_rpm {
                let before = self.assembler.rpm_change_count();
                self.assembler.set_motor_speed(rpm);
                ProcessingStats::add(
                    &self.stats.rpm_changes,
                    self.assembler.rpm_change_count() - before,
                );
            }

            for frame in self.assembler.add_points_polar(&parsed.points) {
                self.process_frame(&frame)?;
                if self.stop.is_stopped() {
                    info!("cancellation requested; stopping at frame boundary");
                    break 'packets;
                }
            }
        }

        if let Some(frame) = self.assembler.finalize() {
            self.process_frame(&frame)?;
        }
        ProcessingStats::add(&self.stats.skipped_datagrams, source.skipped_count());
        self.persist_regions();

        let summary = self.stats.summary();
        info!(
            frames = summary.frames,
            packets = summary.packets,
            foreground = summary.foreground_points,
            tracks = self.tracker.all_tracks().len(),
            "analysis finished"
        );
        Ok(())
    }

    fn process_frame(&mut self, frame: &Frame) -> Result<()> {
        let frame_started = Instant::now();
        ProcessingStats::add(&self.stats.frames, 1);

        let segmented = self.background.process_frame_polar_with_mask(frame)?;
        ProcessingStats::add(&self.stats.foreground_points, segmented.foreground);
        ProcessingStats::add(&self.stats.background_points, segmented.background);
        ProcessingStats::add(&self.stats.out_of_grid_points, segmented.out_of_grid);
        ProcessingStats::add(&self.stats.degenerate_points, segmented.degenerate);

        let foreground: Vec<WorldPoint> = frame
            .points
            .iter()
            .zip(segmented.mask.iter())
            .filter_map(|(p, &fg)| fg.then(|| self.config.extrinsics.world_from_polar(p)))
            .collect();

        // The background model may override the clustering defaults.
        let snapshot = self.background.get_params();
        let mut cluster_params = self.config.params.cluster;
        if snapshot.foreground_dbscan_eps > 0.0 {
            cluster_params.eps_m = snapshot.foreground_dbscan_eps;
        }
        if snapshot.foreground_min_cluster_points > 0 {
            cluster_params.min_points = snapshot.foreground_min_cluster_points;
        }

        let stage = Instant::now();
        let clusters = extract_clusters(&foreground, &cluster_params);
        self.timers.add_clustering(stage.elapsed());

        let stage = Instant::now();
        self.tracker.update(&clusters, frame.frame_start_ns);
        self.timers.add_tracking(stage.elapsed());

        let stage = Instant::now();
        let thresholds = &self.config.params.classifier;
        let min_obs = self.config.params.tracking.min_observations_for_classify;
        for track in self.tracker.confirmed_tracks_mut() {
            classify_and_update(track, thresholds, min_obs);
        }
        self.timers.add_classification(stage.elapsed());

        if snapshot.warmed_up {
            if let Some(sink) = self.training_sink.as_mut() {
                training::encode_frame(
                    sink,
                    &self.config.sensor_id,
                    frame.frame_start_ns,
                    &foreground,
                )?;
            }
        }

        self.stats.record_frame_time(frame_started.elapsed());
        Ok(())
    }

    /// Store failures degrade to in-memory only; they never fail the
    /// run.
    fn persist_regions(&self) {
        let Some(store) = self.store else { return };
        let regions = self.background.snapshot_regions();
        match store.persist_regions(&self.config.sensor_id, &regions) {
            Ok(()) => info!(regions = regions.len(), "persisted background regions"),
            Err(e) => warn!(error = %e, "failed to persist regions; continuing"),
        }
    }

    pub fn track_summaries(&self) -> Vec<TrackSummary> {
        self.tracker
            .all_tracks()
            .iter()
            .map(TrackSummary::from_track)
            .collect()
    }
}

/// One row of the track-list output handed to collaborators.
#[derive(Debug, Clone, Serialize)]
pub struct TrackSummary {
    pub track_id: String,
    pub state: TrackState,
    pub object_class: Option<ObjectClass>,
    pub object_confidence: f64,
    pub first_ns: u64,
    pub last_ns: u64,
    pub observation_count: u32,
    pub avg_speed_mps: f64,
    pub peak_speed_mps: f64,
    pub p50_speed_mps: f64,
    pub p85_speed_mps: f64,
    pub p95_speed_mps: f64,
    pub bbox_length_m: f64,
    pub bbox_width_m: f64,
    pub bbox_height_m: f64,
    pub p95_max_height_m: f64,
}

impl TrackSummary {
    pub fn from_track(track: &Track) -> Self {
        let speed = track.speed_stats();
        let (bbox_length_m, bbox_width_m, bbox_height_m) = track.bbox_means();
        Self {
            track_id: track.track_id.clone(),
            state: track.state,
            object_class: track.object_class,
            object_confidence: track.object_confidence,
            first_ns: track.first_ns,
            last_ns: track.last_ns,
            observation_count: track.observation_count,
            avg_speed_mps: speed.avg_mps,
            peak_speed_mps: speed.peak_mps,
            p50_speed_mps: speed.p50_mps,
            p85_speed_mps: speed.p85_mps,
            p95_speed_mps: speed.p95_mps,
            bbox_length_m,
            bbox_width_m,
            bbox_height_m,
            p95_max_height_m: track.p95_max_height_m(),
        }
    }
}
