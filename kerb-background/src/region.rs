use serde::{Deserialize, Serialize};

use kerb_types::GridDims;

use crate::{BackgroundCell, CellState, REGION_MERGE_TOLERANCE_M};

/// A stable background area: a run of frozen cells along one ring with
/// agreeing range means. Regions are what the optional store persists
/// between runs so a restart begins with a coherent background.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub region_id: String,
    pub sensor_id: String,
    pub ring: usize,
    pub az_bin_start: usize,
    pub az_bin_end: usize,
    pub mean_range_m: f64,
    pub observation_count: u32,
}

/// Persistence interface for background regions.
///
/// Implementations may fail; callers must degrade to an in-memory-only
/// model rather than abort.
pub trait RegionStore {
    fn load_regions(&self, sensor_id: &str) -> std::result::Result<Vec<Region>, StoreError>;
    fn persist_regions(
        &self,
        sensor_id: &str,
        regions: &[Region],
    ) -> std::result::Result<(), StoreError>;
}

#[derive(thiserror::Error, Debug)]
#[error("region store: {source}")]
pub struct StoreError {
    #[from]
    source: Box<dyn std::error::Error + Send + Sync>,
}

impl StoreError {
    pub fn new<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            source: Box::new(source),
        }
    }

    pub fn message(msg: impl Into<String>) -> Self {
        Self {
            source: msg.into().into(),
        }
    }
}

/// Scan the grid for maximal frozen runs along each ring.
///
/// Runs do not merge across the 0°/360° seam; a wrap-spanning area
/// simply becomes two regions.
pub(crate) fn derive_regions(
    sensor_id: &str,
    dims: GridDims,
    cells: &[BackgroundCell],
) -> Vec<Region> {
    let mut regions = Vec::new();
    for ring in 0..dims.rings {
        let mut run: Option<RunAccumulator> = None;
        for az_bin in 0..dims.azimuth_bins {
            let cell = &cells[dims.cell_index(ring, az_bin)];
            let frozen = cell.state == CellState::Frozen;
            let extended = match run.as_mut() {
                Some(acc) if frozen && acc.accepts(cell) => {
                    acc.push(az_bin, cell);
                    true
                }
                _ => false,
            };
            if !extended {
                if let Some(acc) = run.take() {
                    regions.push(acc.into_region(sensor_id, ring));
                }
                if frozen {
                    run = Some(RunAccumulator::start(az_bin, cell));
                }
            }
        }
        if let Some(acc) = run.take() {
            regions.push(acc.into_region(sensor_id, ring));
        }
    }
    regions
}

struct RunAccumulator {
    az_bin_start: usize,
    az_bin_end: usize,
    mean_sum: f64,
    count: usize,
    min_observations: u32,
}

impl RunAccumulator {
    fn start(az_bin: usize, cell: &BackgroundCell) -> Self {
        Self {
            az_bin_start: az_bin,
            az_bin_end: az_bin,
            mean_sum: cell.mean_range_m,
            count: 1,
            min_observations: cell.observation_count,
        }
    }

    fn mean(&self) -> f64 {
        self.mean_sum / self.count as f64
    }

    fn accepts(&self, cell: &BackgroundCell) -> bool {
        (cell.mean_range_m - self.mean()).abs() <= REGION_MERGE_TOLERANCE_M
    }

    fn push(&mut self, az_bin: usize, cell: &BackgroundCell) {
        self.az_bin_end = az_bin;
        self.mean_sum += cell.mean_range_m;
        self.count += 1;
        self.min_observations = self.min_observations.min(cell.observation_count);
    }

    fn into_region(self, sensor_id: &str, ring: usize) -> Region {
        Region {
            region_id: format!("{sensor_id}-r{ring:02}-a{:04}", self.az_bin_start),
            sensor_id: sensor_id.to_string(),
            ring,
            az_bin_start: self.az_bin_start,
            az_bin_end: self.az_bin_end,
            mean_range_m: self.mean(),
            observation_count: self.min_observations,
        }
    }
}
