//! Offline analysis of LIDAR captures: drives the kerbside core against
//! a PCAP file and exposes the run's tracks, statistics and optional
//! artifacts (training blobs, persisted background regions).

use std::path::Path;

use kerb_types::AnalysisParams;

mod pcap;
mod pipeline;
mod region_store;
pub mod stats;
pub mod training;

pub use pcap::PcapSource;
pub use pipeline::{PcapPipeline, PipelineConfig, StopFlag, TrackSummary};
pub use region_store::JsonRegionStore;
pub use stats::{ProcessingStats, StageTimers, StatsSummary};

#[derive(thiserror::Error, Debug)]
pub enum OfflineError {
    #[error("{source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("pcap read: {0}")]
    Pcap(String),
    #[error("{source}")]
    Background {
        #[from]
        source: kerb_background::BackgroundError,
    },
    #[error("{source}")]
    Training {
        #[from]
        source: training::TrainingError,
    },
    #[error("{source}")]
    TomlDe {
        #[from]
        source: toml::de::Error,
    },
    #[error("{source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, OfflineError>;

/// Load an [`AnalysisParams`] TOML file; missing sections keep their
/// defaults.
pub fn load_params(path: &Path) -> Result<AnalysisParams> {
    let text = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&text)?)
}
