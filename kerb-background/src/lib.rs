//! Adaptive background model over a polar ring × azimuth grid.
//!
//! Each grid cell learns the range of the static scene behind it with an
//! exponential moving average and flags returns that land well short of
//! that range as foreground. Cells warm up, stabilize and eventually
//! freeze; frozen cells classify without further adaptation. The grid is
//! owned by the [`BackgroundManager`] for the sensor's lifetime and is
//! never handed out by reference.

use tracing::{debug, info, warn};

use kerb_types::{BackgroundParams, Frame, GridDims};

mod region;
pub use region::{Region, RegionStore, StoreError};

#[derive(thiserror::Error, Debug)]
pub enum BackgroundError {
    /// An internal contract broke; the caller must treat this as fatal.
    #[error("cell (ring {ring}, azimuth bin {az_bin}) mean became invalid: {mean}")]
    InvariantViolation {
        ring: usize,
        az_bin: usize,
        mean: f64,
    },
}

pub type Result<T> = std::result::Result<T, BackgroundError>;

/// Lifecycle of one background cell. Transitions are one-way:
/// Unseeded → Seeded → Frozen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellState {
    Unseeded,
    Seeded,
    Frozen,
}

#[derive(Debug, Clone, Copy)]
pub struct BackgroundCell {
    pub mean_range_m: f64,
    pub variance_m2: f64,
    pub observation_count: u32,
    pub first_update_ns: u64,
    pub last_update_ns: u64,
    pub state: CellState,
}

impl BackgroundCell {
    fn unseeded() -> Self {
        Self {
            mean_range_m: 0.0,
            variance_m2: 0.0,
            observation_count: 0,
            first_update_ns: 0,
            last_update_ns: 0,
            state: CellState::Unseeded,
        }
    }
}

/// Per-frame segmentation result.
///
/// `foreground + background` equals the number of frame points that fell
/// inside the grid; out-of-grid and degenerate points are in neither.
#[derive(Debug, Clone)]
pub struct FrameMask {
    pub mask: Vec<bool>,
    pub foreground: u64,
    pub background: u64,
    pub out_of_grid: u64,
    pub degenerate: u64,
}

/// Thresholds the manager currently applies, exported for the
/// clustering stage.
#[derive(Debug, Clone, Copy)]
pub struct ParamsSnapshot {
    pub closeness_sensitivity_multiplier: f64,
    pub safety_margin_m: f64,
    /// Clustering override; ignore unless > 0.
    pub foreground_dbscan_eps: f64,
    /// Clustering override; ignore unless > 0.
    pub foreground_min_cluster_points: usize,
    pub warmed_up: bool,
}

pub struct BackgroundManager {
    dims: GridDims,
    params: BackgroundParams,
    sensor_id: String,
    cells: Vec<BackgroundCell>,
    /// Frame number at which a cell last held a tentative-foreground
    /// point; lets the confirmation pass query neighbors without
    /// clearing the whole grid every frame.
    tentative_stamp: Vec<u64>,
    frames_seen: u64,
    start_ns: Option<u64>,
    warmed_up: bool,
}

impl BackgroundManager {
    /// Build a manager, optionally seeding the grid from previously
    /// persisted regions.
    ///
    /// A store failure degrades to an in-memory-only model; it is never
    /// fatal.
    pub fn new(
        dims: GridDims,
        params: BackgroundParams,
        sensor_id: &str,
        store: Option<&dyn RegionStore>,
    ) -> Self {
        let mut mgr = Self {
            cells: vec![BackgroundCell::unseeded(); dims.num_cells()],
            tentative_stamp: vec![0; dims.num_cells()],
            dims,
            params,
            sensor_id: sensor_id.to_string(),
            frames_seen: 0,
            start_ns: None,
            warmed_up: false,
        };
        if let Some(store) = store {
            match store.load_regions(&mgr.sensor_id) {
                Ok(regions) => {
                    let n = regions.len();
                    let seeded = mgr.seed_from_regions(&regions);
                    info!(
                        sensor = %mgr.sensor_id,
                        regions = n,
                        cells = seeded,
                        "restored background regions"
                    );
                }
                Err(e) => {
                    warn!(
                        sensor = %mgr.sensor_id,
                        error = %e,
                        "region store unavailable, continuing in-memory"
                    );
                }
            }
        }
        mgr
    }

    pub fn dims(&self) -> GridDims {
        self.dims
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    pub fn is_warmed_up(&self) -> bool {
        self.warmed_up
    }

    pub fn get_params(&self) -> ParamsSnapshot {
        ParamsSnapshot {
            closeness_sensitivity_multiplier: self.params.closeness_sensitivity_multiplier,
            safety_margin_m: self.params.safety_margin_m,
            foreground_dbscan_eps: self.params.foreground_dbscan_eps,
            foreground_min_cluster_points: self.params.foreground_min_cluster_points,
            warmed_up: self.warmed_up,
        }
    }

    /// Inspect one cell. Test and diagnostic use; the grid itself stays
    /// private.
    pub fn cell(&self, ring: usize, az_bin: usize) -> Option<BackgroundCell> {
        if ring >= self.dims.rings || az_bin >= self.dims.azimuth_bins {
            return None;
        }
        Some(self.cells[self.dims.cell_index(ring, az_bin)])
    }

    /// Classify every point of `frame` as foreground or background.
    ///
    /// Returns a mask aligned with `frame.points`. Points outside the
    /// grid or with non-finite range are dropped (mask stays false) and
    /// counted. The only error is an internal invariant violation,
    /// which is fatal for the pipeline.
    pub fn process_frame_polar_with_mask(&mut self, frame: &Frame) -> Result<FrameMask> {
        self.frames_seen += 1;
        if self.start_ns.is_none() {
            self.start_ns = Some(frame.frame_start_ns);
        }

        let mut mask = vec![false; frame.points.len()];
        let mut out_of_grid = 0u64;
        let mut degenerate = 0u64;
        let mut in_grid = 0u64;
        // (point index, ring, az_bin) of tentative foreground points.
        let mut tentative: Vec<(usize, usize, usize)> = Vec::new();

        for (idx, p) in frame.points.iter().enumerate() {
            if !p.range_m.is_finite() || p.range_m < 0.0 {
                degenerate += 1;
                continue;
            }
            let ring = p.ring as usize;
            if ring >= self.dims.rings {
                out_of_grid += 1;
                continue;
            }
            in_grid += 1;

            let az_bin = self.dims.azimuth_bin(p.azimuth_deg);
            let cell_idx = self.dims.cell_index(ring, az_bin);
            if self.observe(cell_idx, ring, az_bin, p.range_m, p.timestamp_ns)? {
                self.tentative_stamp[cell_idx] = self.frames_seen;
                tentative.push((idx, ring, az_bin));
            }
        }

        // Confirmation pass: a tentative point becomes foreground only
        // if enough neighboring cells were tentative in this same frame.
        let mut foreground = 0u64;
        for &(idx, ring, az_bin) in &tentative {
            if self.tentative_neighbors(ring, az_bin) >= self.params.neighbor_confirmation_count {
                mask[idx] = true;
                foreground += 1;
            }
        }

        self.update_warmup(frame.frame_start_ns);

        debug_assert!(in_grid >= foreground);
        Ok(FrameMask {
            mask,
            foreground,
            background: in_grid - foreground,
            out_of_grid,
            degenerate,
        })
    }

    /// Update the cell with one observation and report whether the
    /// point is tentative foreground.
    fn observe(
        &mut self,
        cell_idx: usize,
        ring: usize,
        az_bin: usize,
        range_m: f64,
        now_ns: u64,
    ) -> Result<bool> {
        let a = self.params.background_update_fraction;
        let cell = &mut self.cells[cell_idx];

        match cell.state {
            CellState::Unseeded => {
                if !self.params.seed_from_first_observation {
                    return Ok(false);
                }
                cell.state = CellState::Seeded;
                cell.mean_range_m = range_m;
                cell.variance_m2 = 0.0;
                cell.observation_count = 1;
                cell.first_update_ns = now_ns;
                cell.last_update_ns = now_ns;
            }
            CellState::Seeded => {
                let delta = range_m - cell.mean_range_m;
                cell.mean_range_m += a * delta;
                cell.variance_m2 = (1.0 - a) * cell.variance_m2 + a * delta * delta;
                cell.observation_count = cell.observation_count.saturating_add(1);
                cell.last_update_ns = cell.last_update_ns.max(now_ns);

                if !cell.mean_range_m.is_finite() || cell.mean_range_m < 0.0 {
                    return Err(BackgroundError::InvariantViolation {
                        ring,
                        az_bin,
                        mean: cell.mean_range_m,
                    });
                }

                if now_ns.saturating_sub(cell.first_update_ns) >= self.params.freeze_duration_ns {
                    cell.state = CellState::Frozen;
                }
            }
            CellState::Frozen => {}
        }

        let sigma_effective = cell
            .variance_m2
            .sqrt()
            .max(self.params.noise_relative_fraction * cell.mean_range_m);
        let band = self
            .params
            .safety_margin_m
            .max(self.params.closeness_sensitivity_multiplier * sigma_effective);
        Ok(range_m < cell.mean_range_m - band)
    }

    /// Count 8-connected neighbor cells (ring clamped, azimuth wrapped)
    /// holding a tentative point in the current frame.
    fn tentative_neighbors(&self, ring: usize, az_bin: usize) -> usize {
        let bins = self.dims.azimuth_bins as i64;
        let mut count = 0;
        for dr in -1i64..=1 {
            for da in -1i64..=1 {
                if dr == 0 && da == 0 {
                    continue;
                }
                let nr = ring as i64 + dr;
                if nr < 0 || nr >= self.dims.rings as i64 {
                    continue;
                }
                let na = (az_bin as i64 + da).rem_euclid(bins) as usize;
                let idx = self.dims.cell_index(nr as usize, na);
                if self.tentative_stamp[idx] == self.frames_seen {
                    count += 1;
                }
            }
        }
        count
    }

    fn update_warmup(&mut self, now_ns: u64) {
        if self.warmed_up {
            return;
        }
        let elapsed = now_ns.saturating_sub(self.start_ns.unwrap_or(now_ns));
        if self.frames_seen >= self.params.warmup_min_frames
            && elapsed >= self.params.warmup_duration_ns
        {
            debug!(
                sensor = %self.sensor_id,
                frames = self.frames_seen,
                "background model warm-up complete"
            );
            self.warmed_up = true;
        }
    }

    /// Seed grid cells from persisted regions; returns how many cells
    /// were written.
    fn seed_from_regions(&mut self, regions: &[Region]) -> usize {
        let mut seeded = 0;
        for region in regions {
            if region.ring >= self.dims.rings
                || region.az_bin_start > region.az_bin_end
                || region.az_bin_end >= self.dims.azimuth_bins
            {
                warn!(region = %region.region_id, "skipping out-of-grid region");
                continue;
            }
            for az_bin in region.az_bin_start..=region.az_bin_end {
                let idx = self.dims.cell_index(region.ring, az_bin);
                self.cells[idx] = BackgroundCell {
                    mean_range_m: region.mean_range_m,
                    variance_m2: 0.0,
                    observation_count: region.observation_count,
                    first_update_ns: 0,
                    last_update_ns: 0,
                    state: CellState::Frozen,
                };
                seeded += 1;
            }
        }
        seeded
    }

    /// Derive persistable regions from the current grid: maximal
    /// azimuth runs of frozen cells on one ring whose means agree
    /// within [`REGION_MERGE_TOLERANCE_M`].
    pub fn snapshot_regions(&self) -> Vec<Region> {
        region::derive_regions(&self.sensor_id, self.dims, &self.cells)
    }
}

/// Adjacent frozen cells merge into one region while their means stay
/// within this tolerance of the running region mean.
pub const REGION_MERGE_TOLERANCE_M: f64 = 0.5;
