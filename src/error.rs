use crate::{model::SliceAxis, penetration::Violation};
use itertools::Itertools;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{0} not found")]
    NotFound(#[from] NotFound),
    #[error("cache file {} is corrupt: {reason}", .path.display())]
    CacheCorruption { path: PathBuf, reason: String },
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("cannot fit a plane through the penetration: {0}")]
    DegenerateFit(String),
    #[error("compartment {0} is not part of the structure graph")]
    UnknownCompartment(u32),
    #[error("malformed structure graph: {0}")]
    MalformedGraph(String),
    #[error("raster and alpha mask disagree: {0}")]
    InvalidRaster(String),
    #[error("no settings have been applied yet")]
    Unconfigured,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
}
impl Error {
    pub fn is_not_found(&self) -> bool { matches!(self, Error::NotFound(_)) }
}

/// A penetration file that failed one or more rules of the validation contract.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{} failed validation: {}", .path.display(), .violations.iter().join("; "))]
pub struct ValidationError {
    pub path: PathBuf,
    pub violations: Vec<Violation>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum NotFound {
    #[error("penetration {0:?}")]
    Penetration(String),
    #[error("timeseries {0:?}")]
    Timeseries(String),
    #[error("unit statistic {0:?}")]
    UnitStat(String),
    #[error("{axis} slice at coordinate {coordinate}")]
    SliceCoordinate { axis: SliceAxis, coordinate: f64 },
    #[error("colormap {0:?}")]
    Colormap(String),
    #[error("structure {0}")]
    Structure(u32),
}

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("{url} answered with HTTP status {status}")]
    Status { url: String, status: u16 },
    #[error("request to {url} failed")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected response from {url}: {reason}")]
    Malformed { url: String, reason: String },
}
