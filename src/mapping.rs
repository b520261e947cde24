use crate::{
    color::{linear_rescale, named_colormap},
    error::{NotFound, Result},
};
use ndarray::{s, ArrayView2};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ColorLut {
    pub name: String,
    /// 256 RGB triples in `[0, 1]`, flattened row by row
    pub mapping: Vec<f64>,
}
impl ColorLut {
    pub fn named(name: &str) -> Result<Self> {
        let lut = named_colormap(name).ok_or_else(|| NotFound::Colormap(name.to_string()))?;
        Ok(ColorLut {
            name: name.to_string(),
            mapping: lut.iter().copied().collect(),
        })
    }
}

/// Per-unit values of one timeseries, rescaled to a target range.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScalarMapping {
    pub timeseries_id: String,
    pub times: Vec<f64>,
    /// unit-major: `values[unit * times.len() + t]`
    pub values: Vec<f64>,
}
impl ScalarMapping {
    /// Builds the mapping from an (N + 1)×T series whose first row holds the times.
    pub fn from_series(timeseries_id: &str, series: ArrayView2<'_, f64>, bounds: [f64; 2]) -> Self {
        let times = series.row(0).to_vec();
        let raw: Vec<f64> = series.slice(s![1.., ..]).iter().copied().collect();
        ScalarMapping {
            timeseries_id: timeseries_id.to_string(),
            times,
            values: linear_rescale(&raw, bounds),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ColorMapping {
    pub timeseries_id: String,
    pub times: Vec<f64>,
    /// indices into the lookup table, rescaled to `[0, 255]` unless requested otherwise
    pub values: Vec<f64>,
    pub color_lut: ColorLut,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AestheticMapping {
    pub penetration_id: String,
    pub color: Option<ColorMapping>,
    pub opacity: Option<ScalarMapping>,
    pub radius: Option<ScalarMapping>,
    pub visibility: Option<Vec<bool>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScalarParams {
    pub timeseries_id: String,
    pub bounds: [f64; 2],
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ColorParams {
    pub timeseries_id: String,
    #[serde(default = "default_color_bounds")]
    pub bounds: [f64; 2],
    pub color_lut: String,
}

fn default_color_bounds() -> [f64; 2] { [0.0, 255.0] }

/// Which series drive each aesthetic of a penetration's units.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AestheticParams {
    #[serde(default)]
    pub color: Option<ColorParams>,
    #[serde(default)]
    pub opacity: Option<ScalarParams>,
    #[serde(default)]
    pub radius: Option<ScalarParams>,
    #[serde(default)]
    pub visibility: Option<Vec<bool>>,
}

/// Range of times and values of one named series across every loaded penetration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimeseriesSummary {
    pub timeseries_id: String,
    pub min_time: Option<f64>,
    pub max_time: Option<f64>,
    pub min_step: Option<f64>,
    pub min_val: Option<f64>,
    pub max_val: Option<f64>,
}
impl TimeseriesSummary {
    pub fn new(timeseries_id: &str) -> Self {
        TimeseriesSummary {
            timeseries_id: timeseries_id.to_string(),
            min_time: None,
            max_time: None,
            min_step: None,
            min_val: None,
            max_val: None,
        }
    }

    /// Folds one penetration's (N + 1)×T series into the summary.
    pub fn update(&mut self, series: ArrayView2<'_, f64>) {
        if series.nrows() == 0 {
            return;
        }
        let times = series.row(0);
        for &t in times.iter().filter(|v| v.is_finite()) {
            self.min_time = Some(fold(self.min_time, t, f64::min));
            self.max_time = Some(fold(self.max_time, t, f64::max));
        }
        for step in times.windows(2).into_iter().map(|w| w[1] - w[0]).filter(|v| v.is_finite()) {
            self.min_step = Some(fold(self.min_step, step, f64::min));
        }
        for &v in series.slice(s![1.., ..]).iter().filter(|v| v.is_finite()) {
            self.min_val = Some(fold(self.min_val, v, f64::min));
            self.max_val = Some(fold(self.max_val, v, f64::max));
        }
    }
}

fn fold(current: Option<f64>, value: f64, f: fn(f64, f64) -> f64) -> f64 { current.map_or(value, |c| f(c, value)) }
