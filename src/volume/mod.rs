pub mod nrrd;
mod plane;

use crate::{model::SliceAxis, settings::Resolution};
use ndarray::{Array2, Array3, Axis};
pub use plane::{pseudocoronal_slice, PlaneFit};

/// A dense reference volume with axis order (AP, DV, LR).
#[derive(Debug, Clone, PartialEq)]
pub struct Volume<T> {
    data: Array3<T>,
    resolution: Resolution,
}
impl<T: Clone> Volume<T> {
    pub fn new(data: Array3<T>, resolution: Resolution) -> Self { Self { data, resolution } }

    pub fn data(&self) -> &Array3<T> { &self.data }
    pub fn resolution(&self) -> Resolution { self.resolution }
    /// Extents in voxels along (AP, DV, LR).
    pub fn shape(&self) -> [usize; 3] {
        let (ap, dv, lr) = self.data.dim();
        [ap, dv, lr]
    }
    pub fn extent(&self, axis: SliceAxis) -> usize { self.data.len_of(Axis(axis.volume_axis())) }

    /// Voxel index for a physical coordinate along `axis`, or `None` outside the volume.
    pub fn voxel_index(&self, axis: SliceAxis, coordinate: f64) -> Option<usize> {
        if !coordinate.is_finite() || coordinate < 0.0 {
            return None;
        }
        let idx = (coordinate / self.resolution.as_f64()).floor() as usize;
        (idx < self.extent(axis)).then_some(idx)
    }

    /// The cross-section at a physical coordinate:
    /// coronal slices are (DV, LR), sagittal (AP, DV) and horizontal (AP, LR).
    pub fn axis_slice(&self, axis: SliceAxis, coordinate: f64) -> Option<Array2<T>> {
        let idx = self.voxel_index(axis, coordinate)?;
        Some(self.data.index_axis(Axis(axis.volume_axis()), idx).to_owned())
    }

    /// Value at a physical (AP, DV, LR) position, clamped to the volume; `None` only for an empty volume.
    pub fn value_at(&self, position: [f64; 3]) -> Option<T> {
        let shape = self.shape();
        let r = self.resolution.as_f64();
        let idx: [usize; 3] = std::array::from_fn(|i| {
            let v = (position[i] / r).floor();
            if v.is_finite() && v > 0.0 {
                (v as usize).min(shape[i].saturating_sub(1))
            } else {
                0
            }
        });
        self.data.get(idx).cloned()
    }
}
