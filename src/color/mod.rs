mod colormap;
mod raster;

pub use colormap::{colormap_names, named_colormap};
pub use raster::{rasterize_gray, rasterize_rgb, ImageBlob};

use crate::{
    catalog::StructureGraph,
    error::{Error, Result},
    model::{NO_LABEL_ID, ROOT_ID},
};
use fxhash::FxHashMap;
use ndarray::{Array2, Array3};

pub const NO_LABEL_RGB: [u8; 3] = [255, 255, 255];
pub const ROOT_RGB: [u8; 3] = [136, 136, 136];

/// Compartment id to display color, derived from the structure graph.
pub struct CompartmentColors {
    table: FxHashMap<u32, [u8; 3]>,
}
impl CompartmentColors {
    pub fn from_graph(graph: &StructureGraph) -> Self {
        let mut table: FxHashMap<u32, [u8; 3]> = graph.structures().iter().map(|s| (s.id, s.rgb_triplet)).collect();
        table.insert(NO_LABEL_ID, NO_LABEL_RGB);
        table.insert(ROOT_ID, ROOT_RGB);
        Self { table }
    }

    pub fn rgb(&self, id: u32) -> Result<[u8; 3]> { self.table.get(&id).copied().ok_or(Error::UnknownCompartment(id)) }

    /// One RGB row per id.
    pub fn compartment_to_rgb(&self, ids: &[u32]) -> Result<Array2<u8>> {
        let mut out = Array2::zeros((ids.len(), 3));
        for (mut row, &id) in out.rows_mut().into_iter().zip(ids) {
            let [r, g, b] = self.rgb(id)?;
            row[0] = r;
            row[1] = g;
            row[2] = b;
        }
        Ok(out)
    }

    /// Colors a 2-D label slice into an H×W×3 raster.
    pub fn colorize(&self, labels: &Array2<u32>) -> Result<Array3<u8>> {
        let (h, w) = labels.dim();
        let mut out = Array3::zeros((h, w, 3));
        for ((y, x), &id) in labels.indexed_iter() {
            let rgb = self.rgb(id)?;
            for (c, v) in rgb.into_iter().enumerate() {
                out[[y, x, c]] = v;
            }
        }
        Ok(out)
    }
}

/// Maps the empirical `[min, max]` of `values` linearly onto `bounds`; constant input maps to the midpoint.
pub fn linear_rescale(values: &[f64], bounds: [f64; 2]) -> Vec<f64> {
    let [lo, hi] = bounds;
    let (min, max) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(a, b), &v| (a.min(v), b.max(v)));
    let range = max - min;
    if !range.is_finite() || range == 0.0 {
        let mid = (lo + hi) / 2.0;
        return values.iter().map(|v| if v.is_nan() { f64::NAN } else { mid }).collect();
    }
    values.iter().map(|v| lo + (v - min) / range * (hi - lo)).collect()
}

/// Scales intensities so that 0 stays black and `max` becomes white.
pub fn normalize_intensity(slice: &Array2<f32>, max: f32) -> Array2<u8> {
    if max <= 0.0 || !max.is_finite() {
        return Array2::zeros(slice.dim());
    }
    slice.mapv(|v| (v / max * 255.0).round().clamp(0.0, 255.0) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::small_graph;
    use approx::assert_relative_eq;
    use ndarray::{arr2, array};
    use proptest::prelude::*;

    #[test]
    fn reserved_and_graph_colors() {
        let colors = CompartmentColors::from_graph(&small_graph());
        let rgb = colors.compartment_to_rgb(&[0, 997, 5]).unwrap();
        assert_eq!(rgb, arr2(&[[255, 255, 255], [136, 136, 136], [10, 20, 30]]));
    }

    #[test]
    fn unknown_compartments_are_errors() {
        let colors = CompartmentColors::from_graph(&small_graph());
        assert!(matches!(colors.compartment_to_rgb(&[5, 4242]), Err(Error::UnknownCompartment(4242))));
    }

    #[test]
    fn colorizes_label_slices() {
        let colors = CompartmentColors::from_graph(&small_graph());
        let raster = colors.colorize(&array![[0u32, 5], [997, 5]]).unwrap();
        assert_eq!(raster.dim(), (2, 2, 3));
        assert_eq!(raster.slice(ndarray::s![0, 1, ..]).to_vec(), vec![10, 20, 30]);
        assert_eq!(raster.slice(ndarray::s![1, 0, ..]).to_vec(), vec![136, 136, 136]);
    }

    #[test]
    fn rescale_constant_input_gives_midpoint() {
        assert_eq!(linear_rescale(&[4.0, 4.0, 4.0], [0.0, 10.0]), vec![5.0, 5.0, 5.0]);
        assert!(linear_rescale(&[], [0.0, 1.0]).is_empty());
    }

    #[test]
    fn intensities_scale_to_bytes() {
        let slice = array![[0.0f32, 50.0], [100.0, 200.0]];
        assert_eq!(normalize_intensity(&slice, 200.0), array![[0u8, 64], [128, 255]]);
        assert_eq!(normalize_intensity(&slice, 0.0), Array2::<u8>::zeros((2, 2)));
    }

    proptest! {
        #[test]
        fn rescale_hits_both_bounds(
            values in prop::collection::vec(-1.0e6f64..1.0e6, 2..50),
            a in -100.0f64..100.0,
            width in 0.1f64..100.0,
        ) {
            let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            prop_assume!(max > min);
            let b = a + width;
            let out = linear_rescale(&values, [a, b]);
            let imin = values.iter().position(|&v| v == min).unwrap();
            let imax = values.iter().position(|&v| v == max).unwrap();
            assert_relative_eq!(out[imin], a, epsilon = 1e-9);
            assert_relative_eq!(out[imax], b, epsilon = 1e-9);
            prop_assert!(out.iter().all(|&v| v >= a - 1e-9 && v <= b + 1e-9));
        }
    }
}
