//! Native and target horizontal grid representations.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ConversionError, ConversionResult};
use crate::BoundingBox;

/// Horizontal grid of a variable.
///
/// Every consumer matches on this exhaustively: value counts, chunk
/// geometry, dimension names and regrid dispatch all depend on the variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Grid {
    /// Spherical harmonic coefficients with triangular truncation T.
    ///
    /// Stored as interleaved (real, imag) pairs, m-major: for each m in
    /// 0..=T, for each n in m..=T.
    SpectralHarmonic { truncation: u32 },

    /// Reduced Gaussian grid, rows ordered north to south.
    ReducedGaussian {
        name: String,
        points_per_latitude: Vec<u32>,
    },

    /// Regular lat/lon grid with inclusive first and last points.
    ///
    /// Latitudes run north to south, longitudes west to east.
    RegularLatLon { resolution: f64, bounds: BoundingBox },
}

/// Discriminant of a [`Grid`], without parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GridKind {
    Spectral,
    ReducedGaussian,
    Regular,
}

impl Grid {
    /// Global regular grid at the given resolution, 0..360-res by -90..90.
    pub fn regular_global(resolution: f64) -> Self {
        Grid::RegularLatLon {
            resolution,
            bounds: BoundingBox::new(0.0, -90.0, 360.0 - resolution, 90.0),
        }
    }

    /// Octahedral reduced Gaussian grid `O{n}`.
    ///
    /// `2n` latitude rows; the row nearest each pole has 20 points and each
    /// row towards the equator adds 4.
    pub fn octahedral(n: u32) -> Self {
        let north: Vec<u32> = (0..n).map(|i| 20 + 4 * i).collect();
        let mut points_per_latitude = north.clone();
        points_per_latitude.extend(north.iter().rev());
        Grid::ReducedGaussian {
            name: format!("O{}", n),
            points_per_latitude,
        }
    }

    pub fn kind(&self) -> GridKind {
        match self {
            Grid::SpectralHarmonic { .. } => GridKind::Spectral,
            Grid::ReducedGaussian { .. } => GridKind::ReducedGaussian,
            Grid::RegularLatLon { .. } => GridKind::Regular,
        }
    }

    /// Number of stored samples per horizontal field.
    pub fn value_count(&self) -> usize {
        match self {
            Grid::SpectralHarmonic { truncation } => {
                let t = *truncation as usize;
                (t + 1) * (t + 2)
            }
            Grid::ReducedGaussian {
                points_per_latitude,
                ..
            } => points_per_latitude.iter().map(|&p| p as usize).sum(),
            Grid::RegularLatLon { .. } => {
                let (nlat, nlon) = self.regular_shape().unwrap_or((0, 0));
                nlat * nlon
            }
        }
    }

    /// `(nlat, nlon)` for regular grids.
    pub fn regular_shape(&self) -> Option<(usize, usize)> {
        match self {
            Grid::RegularLatLon { resolution, bounds } => Some((
                axis_len(bounds.height(), *resolution),
                axis_len(bounds.width(), *resolution),
            )),
            Grid::SpectralHarmonic { .. } | Grid::ReducedGaussian { .. } => None,
        }
    }

    /// Shape of the horizontal part of an array on this grid.
    pub fn horizontal_shape(&self) -> Vec<u64> {
        match self {
            Grid::SpectralHarmonic { .. } | Grid::ReducedGaussian { .. } => {
                vec![self.value_count() as u64]
            }
            Grid::RegularLatLon { .. } => {
                let (nlat, nlon) = self.regular_shape().unwrap_or((0, 0));
                vec![nlat as u64, nlon as u64]
            }
        }
    }

    /// Dimension names of the horizontal part, matching [`Grid::horizontal_shape`].
    pub fn horizontal_dimension_names(&self) -> Vec<&'static str> {
        match self {
            Grid::SpectralHarmonic { .. } | Grid::ReducedGaussian { .. } => vec!["values"],
            Grid::RegularLatLon { .. } => vec!["latitude", "longitude"],
        }
    }

    /// Latitudes of a regular grid, north to south.
    pub fn latitudes(&self) -> Vec<f64> {
        match self {
            Grid::RegularLatLon { resolution, bounds } => {
                let n = axis_len(bounds.height(), *resolution);
                (0..n)
                    .map(|j| bounds.max_lat - j as f64 * resolution)
                    .collect()
            }
            Grid::SpectralHarmonic { .. } | Grid::ReducedGaussian { .. } => Vec::new(),
        }
    }

    /// Longitudes of a regular grid, west to east.
    pub fn longitudes(&self) -> Vec<f64> {
        match self {
            Grid::RegularLatLon { resolution, bounds } => {
                let n = axis_len(bounds.width(), *resolution);
                (0..n)
                    .map(|i| bounds.min_lon + i as f64 * resolution)
                    .collect()
            }
            Grid::SpectralHarmonic { .. } | Grid::ReducedGaussian { .. } => Vec::new(),
        }
    }

    /// Check that the grid is internally consistent.
    pub fn validate(&self) -> ConversionResult<()> {
        match self {
            Grid::SpectralHarmonic { truncation } => {
                if *truncation == 0 {
                    return Err(ConversionError::configuration(
                        "spectral truncation must be positive",
                    ));
                }
            }
            Grid::ReducedGaussian {
                name,
                points_per_latitude,
            } => {
                if points_per_latitude.is_empty() || points_per_latitude.len() % 2 != 0 {
                    return Err(ConversionError::configuration(format!(
                        "reduced Gaussian grid {} must have an even, non-zero number of rows",
                        name
                    )));
                }
                if points_per_latitude.contains(&0) {
                    return Err(ConversionError::configuration(format!(
                        "reduced Gaussian grid {} has an empty row",
                        name
                    )));
                }
            }
            Grid::RegularLatLon { resolution, bounds } => {
                if !(*resolution > 0.0) || !bounds.is_valid() {
                    return Err(ConversionError::configuration(format!(
                        "invalid regular grid {}",
                        self
                    )));
                }
                for span in [bounds.width(), bounds.height()] {
                    let steps = span / resolution;
                    if (steps - steps.round()).abs() > 1e-6 {
                        return Err(ConversionError::configuration(format!(
                            "grid {} bounds are not a whole number of steps",
                            self
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Grid::SpectralHarmonic { truncation } => write!(f, "T{}", truncation),
            Grid::ReducedGaussian { name, .. } => write!(f, "{}", name),
            Grid::RegularLatLon { resolution, .. } => write!(f, "{}deg", resolution),
        }
    }
}

fn axis_len(span: f64, resolution: f64) -> usize {
    (span / resolution).round() as usize + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spectral_value_count() {
        let grid = Grid::SpectralHarmonic { truncation: 639 };
        assert_eq!(grid.value_count(), 640 * 641);
        assert_eq!(grid.horizontal_dimension_names(), vec!["values"]);
        assert_eq!(grid.to_string(), "T639");
    }

    #[test]
    fn test_octahedral() {
        let grid = Grid::octahedral(320);
        if let Grid::ReducedGaussian {
            points_per_latitude,
            ..
        } = &grid
        {
            assert_eq!(points_per_latitude.len(), 640);
            assert_eq!(points_per_latitude[0], 20);
            assert_eq!(points_per_latitude[319], 20 + 4 * 319);
            assert_eq!(points_per_latitude[639], 20);
        } else {
            panic!("expected reduced Gaussian");
        }
        // 4n(n + 9)
        assert_eq!(grid.value_count(), 4 * 320 * 329);
        assert!(grid.validate().is_ok());
    }

    #[test]
    fn test_regular_global() {
        let grid = Grid::regular_global(0.25);
        assert_eq!(grid.regular_shape(), Some((721, 1440)));
        assert_eq!(grid.value_count(), 721 * 1440);
        assert_eq!(grid.horizontal_shape(), vec![721, 1440]);

        let lats = grid.latitudes();
        assert!((lats[0] - 90.0).abs() < 1e-9);
        assert!((lats[720] + 90.0).abs() < 1e-9);
        let lons = grid.longitudes();
        assert!((lons[1439] - 359.75).abs() < 1e-9);
        assert!(grid.validate().is_ok());
    }

    #[test]
    fn test_invalid_grids() {
        assert!(Grid::SpectralHarmonic { truncation: 0 }.validate().is_err());
        let odd = Grid::ReducedGaussian {
            name: "bad".to_string(),
            points_per_latitude: vec![20, 24, 20],
        };
        assert!(odd.validate().is_err());
        let ragged = Grid::RegularLatLon {
            resolution: 0.3,
            bounds: BoundingBox::new(0.0, -90.0, 1.0, 90.0),
        };
        assert!(ragged.validate().is_err());
    }

    #[test]
    fn test_serde_tagged() {
        let yaml = "type: spectral_harmonic\ntruncation: 639\n";
        let grid: Grid = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(grid, Grid::SpectralHarmonic { truncation: 639 });
    }
}
