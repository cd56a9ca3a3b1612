//! Horizontal regridding onto regular lat/lon grids.
//!
//! Supported transforms:
//! - spectral harmonics → regular (inverse Legendre/Fourier synthesis)
//! - reduced Gaussian → regular (linear in longitude, then latitude)
//! - regular → regular (bilinear)
//! - any grid → the same grid (identity)
//!
//! Everything else is an `UnsupportedGrid` error. Results are
//! deterministic for a given source, target and input.

pub mod gaussian;
pub mod interpolation;
pub mod spectral;

use rayon::prelude::*;
use tracing::debug;

use era5_common::{ConversionError, ConversionResult, Grid};

pub use gaussian::{gaussian_latitudes, ReducedGaussianInterpolator};
pub use interpolation::{bilinear_interpolate, RegularInterpolator};

#[derive(Debug, Clone)]
enum Transform {
    Identity,
    Spectral {
        truncation: usize,
        lats: Vec<f64>,
        lons: Vec<f64>,
    },
    ReducedGaussian(ReducedGaussianInterpolator),
    Regular(RegularInterpolator),
}

/// A prepared transform between two grids.
///
/// Interpolation weights are computed once in [`Regridder::new`] and reused
/// for every field.
#[derive(Debug, Clone)]
pub struct Regridder {
    source: Grid,
    target: Grid,
    transform: Transform,
}

impl Regridder {
    pub fn new(source: &Grid, target: &Grid) -> ConversionResult<Self> {
        let unsupported = || ConversionError::UnsupportedGrid {
            from: source.to_string(),
            to: target.to_string(),
        };

        let transform = if source == target {
            Transform::Identity
        } else {
            match (source, target) {
                (Grid::SpectralHarmonic { truncation }, Grid::RegularLatLon { .. }) => {
                    Transform::Spectral {
                        truncation: *truncation as usize,
                        lats: target.latitudes(),
                        lons: target.longitudes(),
                    }
                }
                (Grid::ReducedGaussian { .. }, Grid::RegularLatLon { .. }) => {
                    Transform::ReducedGaussian(
                        ReducedGaussianInterpolator::new(source, target).ok_or_else(unsupported)?,
                    )
                }
                (Grid::RegularLatLon { .. }, Grid::RegularLatLon { .. }) => Transform::Regular(
                    RegularInterpolator::new(source, target).ok_or_else(unsupported)?,
                ),
                (_, Grid::SpectralHarmonic { .. }) | (_, Grid::ReducedGaussian { .. }) => {
                    return Err(unsupported());
                }
            }
        };

        debug!(from = %source, to = %target, "Prepared regridder");
        Ok(Self {
            source: source.clone(),
            target: target.clone(),
            transform,
        })
    }

    pub fn source(&self) -> &Grid {
        &self.source
    }

    pub fn target(&self) -> &Grid {
        &self.target
    }

    pub fn is_identity(&self) -> bool {
        matches!(self.transform, Transform::Identity)
    }

    /// Regrid one horizontal field.
    pub fn apply(&self, field: &[f32]) -> ConversionResult<Vec<f32>> {
        let expected = self.source.value_count();
        if field.len() != expected {
            return Err(ConversionError::UnsupportedGrid {
                from: format!("{} with {} values", self.source, field.len()),
                to: format!("{} (expected {} source values)", self.target, expected),
            });
        }
        Ok(match &self.transform {
            Transform::Identity => field.to_vec(),
            Transform::Spectral {
                truncation,
                lats,
                lons,
            } => spectral::synthesize(field, *truncation, lats, lons),
            Transform::ReducedGaussian(interp) => interp.apply(field),
            Transform::Regular(interp) => interp.apply(field),
        })
    }

    /// Regrid a stack of fields laid out back to back, e.g. one per level.
    pub fn apply_stacked(&self, fields: &[f32]) -> ConversionResult<Vec<f32>> {
        let field_len = self.source.value_count();
        if field_len == 0 || fields.len() % field_len != 0 {
            return Err(ConversionError::UnsupportedGrid {
                from: format!("{} with {} values", self.source, fields.len()),
                to: self.target.to_string(),
            });
        }
        let regridded = fields
            .par_chunks(field_len)
            .map(|field| self.apply(field))
            .collect::<ConversionResult<Vec<_>>>()?;
        Ok(regridded.concat())
    }
}

/// Regrid one field from `source` to `target`.
pub fn regrid(source: &Grid, target: &Grid, samples: &[f32]) -> ConversionResult<Vec<f32>> {
    Regridder::new(source, target)?.apply(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_constant(values: &[f32], expected: f32) {
        for v in values {
            let rel = ((v - expected) / expected).abs();
            assert!(rel < 1e-4, "{} differs from {}", v, expected);
        }
    }

    fn spectral_constant(truncation: u32, value: f32) -> (Grid, Vec<f32>) {
        let grid = Grid::SpectralHarmonic { truncation };
        let mut coefficients = vec![0.0; grid.value_count()];
        coefficients[0] = value;
        (grid, coefficients)
    }

    #[test]
    fn test_constant_spectral_to_regular() {
        let (source, coefficients) = spectral_constant(21, 287.5);
        let target = Grid::regular_global(10.0);
        let out = regrid(&source, &target, &coefficients).unwrap();
        assert_eq!(out.len(), target.value_count());
        assert_constant(&out, 287.5);
    }

    #[test]
    fn test_constant_reduced_gaussian_to_regular() {
        let source = Grid::octahedral(16);
        let target = Grid::regular_global(5.0);
        let field = vec![101325.0; source.value_count()];
        let out = regrid(&source, &target, &field).unwrap();
        assert_eq!(out.len(), target.value_count());
        assert_constant(&out, 101325.0);
    }

    #[test]
    fn test_constant_regular_to_regular() {
        let source = Grid::regular_global(0.25);
        let target = Grid::regular_global(1.5);
        let field = vec![5.5; source.value_count()];
        let out = regrid(&source, &target, &field).unwrap();
        assert_eq!(out.len(), target.value_count());
        assert_constant(&out, 5.5);
    }

    #[test]
    fn test_identity() {
        let grid = Grid::octahedral(4);
        let field: Vec<f32> = (0..grid.value_count()).map(|i| i as f32).collect();
        let regridder = Regridder::new(&grid, &grid).unwrap();
        assert!(regridder.is_identity());
        assert_eq!(regridder.apply(&field).unwrap(), field);
    }

    #[test]
    fn test_unsupported_transforms() {
        let regular = Grid::regular_global(1.0);
        let cases = [
            (Grid::SpectralHarmonic { truncation: 639 }, Grid::SpectralHarmonic { truncation: 319 }),
            (regular.clone(), Grid::SpectralHarmonic { truncation: 63 }),
            (regular.clone(), Grid::octahedral(320)),
            (Grid::SpectralHarmonic { truncation: 63 }, Grid::octahedral(32)),
        ];
        for (from, to) in cases {
            let err = Regridder::new(&from, &to).unwrap_err();
            assert_eq!(err.kind(), "UnsupportedGridError");
        }
    }

    #[test]
    fn test_apply_stacked_per_level() {
        let (source, mut coefficients) = spectral_constant(5, 200.0);
        let (_, second) = spectral_constant(5, 250.0);
        coefficients.extend(second);
        let target = Grid::regular_global(30.0);

        let out = Regridder::new(&source, &target)
            .unwrap()
            .apply_stacked(&coefficients)
            .unwrap();
        let n = target.value_count();
        assert_eq!(out.len(), 2 * n);
        assert_constant(&out[..n], 200.0);
        assert_constant(&out[n..], 250.0);
    }

    #[test]
    fn test_wrong_field_length() {
        let regridder = Regridder::new(&Grid::regular_global(10.0), &Grid::regular_global(20.0)).unwrap();
        assert!(regridder.apply(&[1.0, 2.0]).is_err());
    }
}
