use super::Volume;
use crate::{
    error::{Error, Result},
    model::SliceAxis,
    settings::Resolution,
};
use nalgebra::{DMatrix, DVector};
use ndarray::{Array2, ArrayView2};

/// Least-squares line `AP = intercept + slope * DV` through a penetration, in voxel units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaneFit {
    pub intercept: f64,
    pub slope: f64,
}
impl PlaneFit {
    /// Fits the line through an N×3 array of physical (AP, DV, LR) coordinates.
    pub fn from_coordinates(coordinates: ArrayView2<'_, f64>, resolution: Resolution) -> Result<Self> {
        let n = coordinates.nrows();
        if n < 2 {
            return Err(Error::DegenerateFit(format!("need at least two units, got {n}")));
        }
        if coordinates.ncols() < 2 || coordinates.iter().any(|v| !v.is_finite()) {
            return Err(Error::DegenerateFit("coordinates must be finite (AP, DV, ...) rows".into()));
        }

        let r = resolution.as_f64();
        let ap = DVector::from_iterator(n, coordinates.column(0).iter().map(|v| v / r));
        let dv = coordinates.column(1).mapv(|v| v / r);

        let (min_dv, max_dv) = dv
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        if max_dv - min_dv <= f64::EPSILON * max_dv.abs().max(1.0) {
            return Err(Error::DegenerateFit(format!("all units share the DV index {min_dv}")));
        }

        let design = DMatrix::from_fn(n, 2, |i, j| if j == 0 { 1.0 } else { dv[i] });
        let transposed = design.transpose();
        let normal = &transposed * &design;
        let inverse = normal
            .try_inverse()
            .ok_or_else(|| Error::DegenerateFit("normal equations are singular".into()))?;
        let beta = inverse * (transposed * ap);

        Ok(PlaneFit {
            intercept: beta[0],
            slope: beta[1],
        })
    }

    pub fn predict(&self, dv: f64) -> f64 { self.intercept + self.slope * dv }

    /// Predicted AP index for every DV index, rounded and clamped to `[0, ap_extent - 1]`.
    pub fn ap_indices(&self, dv_extent: usize, ap_extent: usize) -> Vec<usize> {
        let max = ap_extent.saturating_sub(1) as f64;
        (0..dv_extent)
            .map(|dv| self.predict(dv as f64).round().clamp(0.0, max) as usize)
            .collect()
    }
}

/// Resamples `volume` along the fitted line, giving a (DV × LR) section that follows the probe.
pub fn pseudocoronal_slice<T: Clone>(volume: &Volume<T>, fit: &PlaneFit) -> Array2<T> {
    let [ap_extent, dv_extent, lr_extent] = volume.shape();
    // no AP plane to sample from
    let rows = if ap_extent == 0 { 0 } else { dv_extent };
    let ap = fit.ap_indices(rows, ap_extent);
    debug_assert_eq!(volume.extent(SliceAxis::Horizontal), dv_extent);
    Array2::from_shape_fn((rows, lr_extent), |(dv, lr)| volume.data()[[ap[dv], dv, lr]].clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{array, Array2, Array3};

    #[test]
    fn recovers_an_exact_line() {
        // AP = 3000 + 0.5 * DV
        let coords: Array2<f64> = Array2::from_shape_fn((20, 3), |(i, j)| match j {
            0 => 3000.0 + 0.5 * (i as f64 * 300.0),
            1 => i as f64 * 300.0,
            _ => 5000.0,
        });
        let fit = PlaneFit::from_coordinates(coords.view(), Resolution::R100).unwrap();
        assert_relative_eq!(fit.intercept, 30.0, epsilon = 1e-9);
        assert_relative_eq!(fit.slope, 0.5, epsilon = 1e-9);
        assert_relative_eq!(fit.predict(10.0), 35.0, epsilon = 1e-9);
    }

    #[test]
    fn least_squares_on_noisy_points() {
        let coords = array![[100.0, 0.0, 1.0], [300.0, 100.0, 1.0], [200.0, 200.0, 1.0], [400.0, 300.0, 1.0]];
        let fit = PlaneFit::from_coordinates(coords.view(), Resolution::R10).unwrap();
        // in voxels: AP = [10, 30, 20, 40], DV = [0, 10, 20, 30]
        assert_relative_eq!(fit.slope, 0.8, epsilon = 1e-9);
        assert_relative_eq!(fit.intercept, 13.0, epsilon = 1e-9);
    }

    #[test]
    fn degenerate_fits_are_rejected() {
        let constant_dv = array![[100.0, 500.0, 1.0], [300.0, 500.0, 2.0], [200.0, 500.0, 3.0]];
        let err = PlaneFit::from_coordinates(constant_dv.view(), Resolution::R100).unwrap_err();
        assert!(matches!(err, Error::DegenerateFit(_)));

        let single = array![[100.0, 500.0, 1.0]];
        assert!(matches!(
            PlaneFit::from_coordinates(single.view(), Resolution::R100),
            Err(Error::DegenerateFit(_))
        ));
    }

    #[test]
    fn indices_are_rounded_and_clamped() {
        let fit = PlaneFit {
            intercept: -1.6,
            slope: 1.5,
        };
        assert_eq!(fit.ap_indices(6, 5), vec![0, 0, 1, 3, 4, 4]);
    }

    #[test]
    fn resamples_along_the_line() {
        let data = Array3::from_shape_fn((10, 4, 3), |(a, d, l)| (a * 100 + d * 10 + l) as u32);
        let volume = Volume::new(data, Resolution::R100);
        let fit = PlaneFit {
            intercept: 2.0,
            slope: 1.0,
        };
        let slice = pseudocoronal_slice(&volume, &fit);
        assert_eq!(slice.dim(), (4, 3));
        for dv in 0..4 {
            for lr in 0..3 {
                assert_eq!(slice[[dv, lr]], ((2 + dv) * 100 + dv * 10 + lr) as u32);
            }
        }
    }

    #[test]
    fn vertical_trajectory_gives_a_coronal_section() {
        let data = Array3::from_shape_fn((10, 4, 3), |(a, d, l)| (a * 100 + d * 10 + l) as u32);
        let volume = Volume::new(data, Resolution::R100);
        let fit = PlaneFit {
            intercept: 7.0,
            slope: 0.0,
        };
        let coronal = volume.axis_slice(SliceAxis::Coronal, 750.0).unwrap();
        assert_eq!(pseudocoronal_slice(&volume, &fit), coronal);
    }

    #[test]
    fn empty_volume_gives_an_empty_section() {
        let volume = Volume::new(Array3::<u32>::zeros((0, 4, 3)), Resolution::R100);
        let fit = PlaneFit {
            intercept: 2.0,
            slope: 1.0,
        };
        assert_eq!(pseudocoronal_slice(&volume, &fit).dim(), (0, 3));
    }
}
