mod npz;
mod validate;

pub use npz::{read_npz, NpyString, NpzArray, NpzError};
pub use validate::{validate, Violation, CCF_COORD, PROBE_INSERTION, TIMESERIES, UNIT_ID, UNIT_STATS, WAVEFORM};

use crate::error::{NotFound, Result, ValidationError};
use log::{debug, info, warn};
use ndarray::{Array1, Array2};
use rayon::prelude::*;
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, RwLock},
};

/// The fully materialised contents of a penetration file.
#[derive(Debug, Clone, PartialEq)]
pub struct PenetrationData {
    pub probe_id: String,
    pub unit_ids: Vec<i64>,
    /// N×3 physical (AP, DV, LR) coordinates
    pub coordinates: Array2<f64>,
    pub waveform: Option<Array2<f64>>,
    /// (N + 1)×T arrays; row 0 holds the sample times
    pub timeseries: BTreeMap<String, Array2<f64>>,
    pub unit_stats: BTreeMap<String, Array1<f64>>,
}
impl PenetrationData {
    pub fn load(path: &Path) -> Result<Self> {
        let arrays = read_npz(path).map_err(|e| ValidationError {
            path: path.to_path_buf(),
            violations: vec![Violation::Unreadable(e.to_string())],
        })?;
        validate(&arrays).map_err(|violations| {
            ValidationError {
                path: path.to_path_buf(),
                violations,
            }
            .into()
        })
    }
    pub fn unit_count(&self) -> usize { self.unit_ids.len() }
}

/// What the index remembers about a penetration without keeping its arrays around.
#[derive(Debug, Clone, PartialEq)]
pub struct PenetrationEntry {
    pub id: String,
    pub path: PathBuf,
    pub unit_count: usize,
    pub timeseries: Vec<String>,
    pub unit_stats: Vec<String>,
}
impl From<(&PenetrationData, &Path)> for PenetrationEntry {
    fn from((data, path): (&PenetrationData, &Path)) -> Self {
        PenetrationEntry {
            id: data.probe_id.clone(),
            path: path.to_path_buf(),
            unit_count: data.unit_count(),
            timeseries: data.timeseries.keys().cloned().collect(),
            unit_stats: data.unit_stats.keys().cloned().collect(),
        }
    }
}

/// Result of adding one file of a batch.
#[derive(Debug)]
pub struct AddOutcome {
    pub path: PathBuf,
    pub result: Result<String>,
}

/// An owned copy of one named field of the active penetration.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Names(Vec<String>),
    Ints(Vec<i64>),
    Vector(Array1<f64>),
    Matrix(Array2<f64>),
}

#[derive(Default)]
pub struct PenetrationStore {
    index: RwLock<BTreeMap<String, PenetrationEntry>>,
    active: Mutex<Option<Arc<PenetrationData>>>,
}
impl PenetrationStore {
    pub fn new() -> Self { Self::default() }

    /// Validates and indexes a file, replacing any penetration with the same id.
    pub fn add(&self, path: &Path) -> Result<String> {
        let data = PenetrationData::load(path)?;
        Ok(self.insert(&data, path))
    }

    /// Adds many files; every file succeeds or fails on its own.
    pub fn add_all(&self, paths: &[PathBuf]) -> Vec<AddOutcome> {
        let loaded: Vec<(PathBuf, Result<PenetrationData>)> = paths
            .par_iter()
            .map(|path| (path.clone(), PenetrationData::load(path)))
            .collect();

        loaded
            .into_iter()
            .map(|(path, data)| {
                let result = data.map(|data| self.insert(&data, &path));
                if let Err(e) = &result {
                    warn!("Skipping {}: {}", path.display(), e);
                }
                AddOutcome { path, result }
            })
            .collect()
    }

    fn insert(&self, data: &PenetrationData, path: &Path) -> String {
        let entry = PenetrationEntry::from((data, path));
        let id = entry.id.clone();
        let replaced = self.write_index().insert(id.clone(), entry).is_some();
        if replaced {
            // the materialised copy may come from the replaced file
            let mut active = self.lock_active();
            if active.as_ref().is_some_and(|a| a.probe_id == id) {
                *active = None;
            }
        }
        info!("Indexed penetration {} from {}", id, path.display());
        id
    }

    /// Drops penetrations from the index, returning the ids that were present.
    pub fn remove(&self, ids: &[String]) -> Vec<String> {
        let removed: Vec<String> = {
            let mut index = self.write_index();
            ids.iter().filter(|id| index.remove(id.as_str()).is_some()).cloned().collect()
        };
        let mut active = self.lock_active();
        if active.as_ref().is_some_and(|a| removed.contains(&a.probe_id)) {
            *active = None;
        }
        removed
    }

    pub fn list(&self) -> Vec<String> { self.read_index().keys().cloned().collect() }
    pub fn entry(&self, id: &str) -> Option<PenetrationEntry> { self.read_index().get(id).cloned() }
    pub fn entries(&self) -> Vec<PenetrationEntry> { self.read_index().values().cloned().collect() }
    pub fn len(&self) -> usize { self.read_index().len() }
    pub fn is_empty(&self) -> bool { self.read_index().is_empty() }
    pub fn active_id(&self) -> Option<String> { self.lock_active().as_ref().map(|a| a.probe_id.clone()) }

    /// Materialises a penetration, evicting the previously active one. A no-op if it is already active.
    pub fn activate(&self, id: &str) -> Result<Arc<PenetrationData>> {
        let mut active = self.lock_active();
        if let Some(current) = active.as_ref().filter(|a| a.probe_id == id) {
            return Ok(current.clone());
        }
        let entry = self.entry(id).ok_or_else(|| NotFound::Penetration(id.to_string()))?;
        debug!("Activating penetration {} from {}", id, entry.path.display());
        let data = Arc::new(PenetrationData::load(&entry.path)?);
        if data.probe_id != id {
            return Err(ValidationError {
                path: entry.path,
                violations: vec![Violation::Unreadable(format!(
                    "file now declares penetration {:?} instead of {:?}",
                    data.probe_id, id
                ))],
            }
            .into());
        }
        *active = Some(data.clone());
        Ok(data)
    }

    /// A named field of a penetration, or `None` if the penetration does not carry it.
    pub fn get(&self, id: &str, key: &str) -> Result<Option<FieldValue>> {
        let data = self.activate(id)?;
        Ok(match key {
            PROBE_INSERTION => Some(FieldValue::Text(data.probe_id.clone())),
            UNIT_ID => Some(FieldValue::Ints(data.unit_ids.clone())),
            CCF_COORD => Some(FieldValue::Matrix(data.coordinates.clone())),
            TIMESERIES => Some(FieldValue::Names(data.timeseries.keys().cloned().collect())),
            UNIT_STATS => Some(FieldValue::Names(data.unit_stats.keys().cloned().collect())),
            WAVEFORM => data.waveform.clone().map(FieldValue::Matrix),
            other => data
                .timeseries
                .get(other)
                .cloned()
                .map(FieldValue::Matrix)
                .or_else(|| data.unit_stats.get(other).cloned().map(FieldValue::Vector)),
        })
    }

    fn read_index(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, PenetrationEntry>> {
        self.index.read().unwrap_or_else(|e| e.into_inner())
    }
    fn write_index(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, PenetrationEntry>> {
        self.index.write().unwrap_or_else(|e| e.into_inner())
    }
    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<Arc<PenetrationData>>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}
