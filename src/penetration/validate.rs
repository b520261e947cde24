use super::{npz::NpzArray, PenetrationData};
use crate::model::CCF_EXTENTS;
use itertools::Itertools;
use ndarray::{Array1, Array2, Ix1, Ix2};
use std::{collections::BTreeMap, fmt};

pub const PROBE_INSERTION: &str = "probe_insertion";
pub const UNIT_ID: &str = "unit_id";
pub const CCF_COORD: &str = "ccf_coord";
pub const WAVEFORM: &str = "waveform";
pub const TIMESERIES: &str = "timeseries";
pub const UNIT_STATS: &str = "unit_stats";

/// A single broken rule of the penetration file contract.
#[derive(Debug, Clone, PartialEq)]
pub enum Violation {
    Unreadable(String),
    MissingField(String),
    WrongType { field: String, expected: &'static str, found: String },
    WrongShape { field: String, expected: String, found: Vec<usize> },
    NotSingleValue { field: String, count: usize },
    DuplicateUnitIds(Vec<i64>),
    CoordinateOutOfRange { axis: &'static str, bound: f64, min: f64, max: f64 },
}
impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::Unreadable(reason) => write!(f, "file could not be read: {reason}"),
            Violation::MissingField(field) => write!(f, "missing required field '{field}'"),
            Violation::WrongType { field, expected, found } => {
                write!(f, "'{field}' must be of {expected} type, found {found}")
            }
            Violation::WrongShape { field, expected, found } => {
                write!(f, "'{field}' must have shape {expected}, found {found:?}")
            }
            Violation::NotSingleValue { field, count } => write!(f, "'{field}' must hold exactly one value, found {count}"),
            Violation::DuplicateUnitIds(ids) => write!(f, "unit ids are not unique: {}", ids.iter().join(", ")),
            Violation::CoordinateOutOfRange { axis, bound, min, max } => write!(
                f,
                "{axis} coordinates must lie in [0, {bound}], found values in [{min}, {max}]"
            ),
        }
    }
}

struct Checker<'a> {
    arrays: &'a BTreeMap<String, NpzArray>,
    violations: Vec<Violation>,
}
impl<'a> Checker<'a> {
    fn required(&mut self, field: &str) -> Option<&'a NpzArray> {
        let array = self.arrays.get(field);
        if array.is_none() {
            self.violations.push(Violation::MissingField(field.to_string()));
        }
        array
    }
    fn wrong_type(&mut self, field: &str, expected: &'static str, found: &NpzArray) {
        self.violations.push(Violation::WrongType {
            field: field.to_string(),
            expected,
            found: found.describe(),
        });
    }
    fn wrong_shape(&mut self, field: &str, expected: String, found: &[usize]) {
        self.violations.push(Violation::WrongShape {
            field: field.to_string(),
            expected,
            found: found.to_vec(),
        });
    }

    fn probe_insertion(&mut self) -> Option<String> {
        let array = self.required(PROBE_INSERTION)?;
        let NpzArray::Str(values) = array else {
            self.wrong_type(PROBE_INSERTION, "string", array);
            return None;
        };
        if values.len() != 1 {
            self.violations.push(Violation::NotSingleValue {
                field: PROBE_INSERTION.to_string(),
                count: values.len(),
            });
            return None;
        }
        values.iter().next().cloned()
    }

    fn unit_ids(&mut self) -> Option<Vec<i64>> {
        let array = self.required(UNIT_ID)?;
        let NpzArray::Int(values) = array else {
            self.wrong_type(UNIT_ID, "integer", array);
            return None;
        };
        let ids = values.iter().copied().collect_vec();
        let duplicates = ids.iter().duplicates().copied().sorted().collect_vec();
        if !duplicates.is_empty() {
            self.violations.push(Violation::DuplicateUnitIds(duplicates));
        }
        Some(ids)
    }

    fn coordinates(&mut self, n: Option<usize>) -> Option<Array2<f64>> {
        let array = self.required(CCF_COORD)?;
        let Some(values) = array.to_f64() else {
            self.wrong_type(CCF_COORD, "numeric", array);
            return None;
        };
        let shape_ok = values.ndim() == 2 && values.shape()[1] == 3 && n.map_or(true, |n| values.shape()[0] == n);
        if !shape_ok {
            let rows = n.map_or("N".to_string(), |n| n.to_string());
            self.wrong_shape(CCF_COORD, format!("({rows}, 3)"), values.shape());
            return None;
        }
        let coordinates = values.into_dimensionality::<Ix2>().ok()?;

        for (column, (axis, bound)) in CCF_EXTENTS.into_iter().enumerate() {
            let (min, max) = coordinates
                .column(column)
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
            let all_in_range = coordinates.column(column).iter().all(|&v| (0.0..=bound).contains(&v));
            if !all_in_range {
                self.violations.push(Violation::CoordinateOutOfRange { axis, bound, min, max });
            }
        }
        Some(coordinates)
    }

    fn waveform(&mut self, n: Option<usize>) -> Option<Array2<f64>> {
        let array = self.arrays.get(WAVEFORM)?;
        let Some(values) = array.to_f64() else {
            self.wrong_type(WAVEFORM, "numeric", array);
            return None;
        };
        if values.ndim() != 2 || n.is_some_and(|n| values.shape()[0] != n) {
            let rows = n.map_or("N".to_string(), |n| n.to_string());
            self.wrong_shape(WAVEFORM, format!("({rows}, samples)"), values.shape());
            return None;
        }
        values.into_dimensionality::<Ix2>().ok()
    }

    fn names(&mut self, field: &str) -> Vec<String> {
        match self.arrays.get(field) {
            None => Vec::new(),
            Some(NpzArray::Str(names)) => names.iter().cloned().collect(),
            Some(other) => {
                self.wrong_type(field, "string", other);
                Vec::new()
            }
        }
    }

    fn timeseries(&mut self, n: Option<usize>) -> BTreeMap<String, Array2<f64>> {
        let mut series = BTreeMap::new();
        for name in self.names(TIMESERIES) {
            let Some(array) = self.required(&name) else { continue };
            let Some(values) = array.to_f64() else {
                self.wrong_type(&name, "numeric", array);
                continue;
            };
            if values.ndim() != 2 || n.is_some_and(|n| values.shape()[0] != n + 1) {
                let rows = n.map_or("N + 1".to_string(), |n| (n + 1).to_string());
                self.wrong_shape(&name, format!("({rows}, samples)"), values.shape());
                continue;
            }
            if let Ok(values) = values.into_dimensionality::<Ix2>() {
                series.insert(name, values);
            }
        }
        series
    }

    fn unit_stats(&mut self, n: Option<usize>) -> BTreeMap<String, Array1<f64>> {
        let mut stats = BTreeMap::new();
        for name in self.names(UNIT_STATS) {
            let Some(array) = self.required(&name) else { continue };
            let Some(values) = array.to_f64() else {
                self.wrong_type(&name, "numeric", array);
                continue;
            };
            if values.ndim() != 1 || n.is_some_and(|n| values.len() != n) {
                let len = n.map_or("N".to_string(), |n| n.to_string());
                self.wrong_shape(&name, format!("({len},)"), values.shape());
                continue;
            }
            if let Ok(values) = values.into_dimensionality::<Ix1>() {
                stats.insert(name, values);
            }
        }
        stats
    }
}

/// Applies every rule of the contract; checks that depend on the unit count are skipped when it is unknown.
pub fn validate(arrays: &BTreeMap<String, NpzArray>) -> Result<PenetrationData, Vec<Violation>> {
    let mut checker = Checker {
        arrays,
        violations: Vec::new(),
    };
    let probe_id = checker.probe_insertion();
    let unit_ids = checker.unit_ids();
    let n = unit_ids.as_ref().map(|ids| ids.len());
    let coordinates = checker.coordinates(n);
    let waveform = checker.waveform(n);
    let timeseries = checker.timeseries(n);
    let unit_stats = checker.unit_stats(n);

    match (probe_id, unit_ids, coordinates) {
        (Some(probe_id), Some(unit_ids), Some(coordinates)) if checker.violations.is_empty() => Ok(PenetrationData {
            probe_id,
            unit_ids,
            coordinates,
            waveform,
            timeseries,
            unit_stats,
        }),
        _ => Err(checker.violations),
    }
}
