//! File-backed region store: one JSON document per sensor in a
//! directory. Good enough for offline reruns; the pipeline treats any
//! store failure as "run without persistence".

use std::fs;
use std::path::PathBuf;

use tracing::debug;

use kerb_background::{Region, RegionStore, StoreError};

pub struct JsonRegionStore {
    dir: PathBuf,
}

impl JsonRegionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, sensor_id: &str) -> PathBuf {
        // Sensor ids come from configuration; keep the filename tame
        // anyway.
        let safe: String = sensor_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.regions.json"))
    }
}

impl RegionStore for JsonRegionStore {
    fn load_regions(&self, sensor_id: &str) -> Result<Vec<Region>, StoreError> {
        let path = self.path_for(sensor_id);
        if !path.exists() {
            debug!(path = %path.display(), "no persisted regions");
            return Ok(Vec::new());
        }
        let data = fs::read_to_string(&path).map_err(StoreError::new)?;
        serde_json::from_str(&data).map_err(StoreError::new)
    }

    fn persist_regions(&self, sensor_id: &str, regions: &[Region]) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(StoreError::new)?;
        let path = self.path_for(sensor_id);
        let data = serde_json::to_string_pretty(regions).map_err(StoreError::new)?;
        fs::write(&path, data).map_err(StoreError::new)?;
        debug!(path = %path.display(), regions = regions.len(), "persisted regions");
        Ok(())
    }
}
