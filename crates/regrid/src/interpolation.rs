//! Bilinear interpolation between regular lat/lon grids.

use era5_common::Grid;

/// Bilinear interpolation at fractional index `(x, y)`.
///
/// With `wrap` set, `x` past the last column blends towards column 0, for
/// grids that close around the globe. Any NaN corner gives NaN.
pub fn bilinear_interpolate(
    data: &[f32],
    width: usize,
    height: usize,
    x: f64,
    y: f64,
    wrap: bool,
) -> f32 {
    if width == 0 || height == 0 || x < 0.0 || y < 0.0 {
        return f32::NAN;
    }
    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    if y0 >= height || (x0 >= width && !(wrap && x0 == width)) {
        return f32::NAN;
    }
    let x0 = x0 % width;
    let x1 = if wrap {
        (x0 + 1) % width
    } else {
        (x0 + 1).min(width - 1)
    };
    let y1 = (y0 + 1).min(height - 1);

    let xf = x - x.floor();
    let yf = y - y.floor();

    let v00 = data[y0 * width + x0];
    let v10 = data[y0 * width + x1];
    let v01 = data[y1 * width + x0];
    let v11 = data[y1 * width + x1];

    if v00.is_nan() || v10.is_nan() || v01.is_nan() || v11.is_nan() {
        return f32::NAN;
    }

    let top = v00 as f64 * (1.0 - xf) + v10 as f64 * xf;
    let bottom = v01 as f64 * (1.0 - xf) + v11 as f64 * xf;
    (top * (1.0 - yf) + bottom * yf) as f32
}

/// Precomputed source positions for every target point.
#[derive(Debug, Clone)]
pub struct RegularInterpolator {
    src_width: usize,
    src_height: usize,
    wrap: bool,
    /// Fractional (x, y) source index per target point, row-major.
    positions: Vec<(f64, f64)>,
}

impl RegularInterpolator {
    /// `None` unless both grids are regular.
    pub fn new(source: &Grid, target: &Grid) -> Option<Self> {
        let (
            Grid::RegularLatLon {
                resolution: src_res,
                bounds: src_bounds,
            },
            Grid::RegularLatLon { .. },
        ) = (source, target)
        else {
            return None;
        };
        let (src_height, src_width) = source.regular_shape()?;
        let wrap = is_periodic(src_bounds.width(), *src_res);

        let lats = target.latitudes();
        let lons = target.longitudes();
        let mut positions = Vec::with_capacity(lats.len() * lons.len());
        for lat in &lats {
            let y = (src_bounds.max_lat - lat) / src_res;
            for lon in &lons {
                let x = (lon - src_bounds.min_lon).rem_euclid(360.0) / src_res;
                positions.push((x, y));
            }
        }

        Some(Self {
            src_width,
            src_height,
            wrap,
            positions,
        })
    }

    pub fn target_len(&self) -> usize {
        self.positions.len()
    }

    pub fn apply(&self, field: &[f32]) -> Vec<f32> {
        self.positions
            .iter()
            .map(|&(x, y)| {
                bilinear_interpolate(field, self.src_width, self.src_height, snap(x), snap(y), self.wrap)
            })
            .collect()
    }
}

/// Whether a longitude span plus one step closes the circle.
fn is_periodic(span: f64, resolution: f64) -> bool {
    (span + resolution - 360.0).abs() < resolution * 1e-6
}

/// Absorb floating point noise so exact grid nodes stay exact.
fn snap(v: f64) -> f64 {
    let r = v.round();
    if (v - r).abs() < 1e-9 {
        r
    } else {
        v
    }
}
