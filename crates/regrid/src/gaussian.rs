//! Reduced Gaussian grids: latitudes and interpolation to regular grids.

use era5_common::Grid;

/// Gaussian latitudes in degrees for `rows` rows, north to south.
///
/// These are the arcsines of the roots of the Legendre polynomial of
/// degree `rows`, found by Newton iteration from the usual cosine guess.
pub fn gaussian_latitudes(rows: usize) -> Vec<f64> {
    let n = rows;
    let mut lats = vec![0.0; n];
    for i in 0..n.div_ceil(2) {
        let mut x = (std::f64::consts::PI * (i as f64 + 0.75) / (n as f64 + 0.5)).cos();
        for _ in 0..100 {
            let (p, dp) = legendre_with_derivative(n, x);
            let dx = p / dp;
            x -= dx;
            if dx.abs() < 1e-15 {
                break;
            }
        }
        let lat = x.asin().to_degrees();
        lats[i] = lat;
        lats[n - 1 - i] = -lat;
    }
    lats
}

/// `P_n(x)` and its derivative.
fn legendre_with_derivative(n: usize, x: f64) -> (f64, f64) {
    let mut p0 = 1.0;
    let mut p1 = x;
    if n == 0 {
        return (1.0, 0.0);
    }
    for k in 2..=n {
        let k = k as f64;
        let p2 = ((2.0 * k - 1.0) * x * p1 - (k - 1.0) * p0) / k;
        p0 = p1;
        p1 = p2;
    }
    let dp = n as f64 * (x * p1 - p0) / (x * x - 1.0);
    (p1, dp)
}

/// One contribution to a target point: source sample index and weight.
type Stencil = [(usize, f64); 4];

/// Precomputed interpolation from a reduced Gaussian grid to a regular grid.
///
/// Values are interpolated linearly in longitude within the two bracketing
/// rows, then linearly in latitude. Target latitudes poleward of the
/// outermost rows take that row's value.
#[derive(Debug, Clone)]
pub struct ReducedGaussianInterpolator {
    stencils: Vec<Stencil>,
}

impl ReducedGaussianInterpolator {
    /// `None` unless the source is reduced Gaussian and the target regular.
    pub fn new(source: &Grid, target: &Grid) -> Option<Self> {
        let Grid::ReducedGaussian {
            points_per_latitude,
            ..
        } = source
        else {
            return None;
        };
        if !matches!(target, Grid::RegularLatLon { .. }) || points_per_latitude.is_empty() {
            return None;
        }

        let row_lats = gaussian_latitudes(points_per_latitude.len());
        let mut row_offsets = Vec::with_capacity(points_per_latitude.len());
        let mut offset = 0usize;
        for &count in points_per_latitude {
            row_offsets.push(offset);
            offset += count as usize;
        }

        let lats = target.latitudes();
        let lons = target.longitudes();
        let mut stencils = Vec::with_capacity(lats.len() * lons.len());

        for &lat in &lats {
            let (north, south, w_south) = bracket_rows(&row_lats, lat);
            for &lon in &lons {
                let (a0, a1, wa) = row_neighbours(points_per_latitude[north] as usize, lon);
                let (b0, b1, wb) = row_neighbours(points_per_latitude[south] as usize, lon);
                let w_north = 1.0 - w_south;
                stencils.push([
                    (row_offsets[north] + a0, w_north * (1.0 - wa)),
                    (row_offsets[north] + a1, w_north * wa),
                    (row_offsets[south] + b0, w_south * (1.0 - wb)),
                    (row_offsets[south] + b1, w_south * wb),
                ]);
            }
        }

        Some(Self { stencils })
    }

    pub fn target_len(&self) -> usize {
        self.stencils.len()
    }

    pub fn apply(&self, field: &[f32]) -> Vec<f32> {
        self.stencils
            .iter()
            .map(|stencil| {
                let mut sum = 0.0f64;
                for &(index, weight) in stencil {
                    if weight == 0.0 {
                        continue;
                    }
                    let v = field[index];
                    if v.is_nan() {
                        return f32::NAN;
                    }
                    sum += v as f64 * weight;
                }
                sum as f32
            })
            .collect()
    }
}

/// Rows bracketing `lat` and the weight of the southern row.
fn bracket_rows(row_lats: &[f64], lat: f64) -> (usize, usize, f64) {
    let last = row_lats.len() - 1;
    if lat >= row_lats[0] {
        return (0, 0, 0.0);
    }
    if lat <= row_lats[last] {
        return (last, last, 0.0);
    }
    // Rows descend, so find the first row at or south of `lat`.
    let south = row_lats.partition_point(|&r| r > lat);
    let north = south - 1;
    let w = (row_lats[north] - lat) / (row_lats[north] - row_lats[south]);
    (north, south, w)
}

/// Points either side of `lon` on a row of `count` points starting at 0°E.
fn row_neighbours(count: usize, lon: f64) -> (usize, usize, f64) {
    let spacing = 360.0 / count as f64;
    let pos = lon.rem_euclid(360.0) / spacing;
    let i0 = pos.floor() as usize % count;
    let i1 = (i0 + 1) % count;
    let w = pos - pos.floor();
    if w < 1e-9 {
        (i0, i0, 0.0)
    } else {
        (i0, i1, w)
    }
}
