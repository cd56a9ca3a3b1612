//! Inverse spherical harmonic transform onto regular lat/lon grids.
//!
//! Coefficients are stored as interleaved `(re, im)` pairs in m-major order:
//! for each zonal wavenumber `m = 0..=T`, total wavenumbers `n = m..=T`.
//! Legendre functions are normalized so that `P_0^0 = 1` and
//! `½∫P_n^m(μ)² dμ = 1`; terms with `m > 0` count twice, once for `-m`.

use rayon::prelude::*;

/// Index of the real part of coefficient `(m, n)` in the flat array.
pub fn coefficient_index(truncation: usize, m: usize, n: usize) -> usize {
    // Complex coefficients before column m: sum over k < m of (T - k + 1).
    let before = m * (truncation + 1) - m * (m.saturating_sub(1)) / 2;
    2 * (before + (n - m))
}

/// Normalized associated Legendre functions `P_n^m(μ)` for `n = m..=T`.
fn legendre_column(truncation: usize, m: usize, mu: f64, pmm: f64, out: &mut Vec<f64>) {
    out.clear();
    out.push(pmm);
    if m == truncation {
        return;
    }
    out.push((2.0 * m as f64 + 3.0).sqrt() * mu * pmm);
    for n in (m + 2)..=truncation {
        let nf = n as f64;
        let mf = m as f64;
        let a = ((4.0 * nf * nf - 1.0) / (nf * nf - mf * mf)).sqrt();
        let b = (((nf - 1.0) * (nf - 1.0) - mf * mf) / (4.0 * (nf - 1.0) * (nf - 1.0) - 1.0)).sqrt();
        let p = a * (mu * out[out.len() - 1] - b * out[out.len() - 2]);
        out.push(p);
    }
}

/// Synthesize one latitude row from spectral coefficients.
fn synthesize_row(coefficients: &[f32], truncation: usize, lat_deg: f64, lons_rad: &[f64]) -> Vec<f32> {
    let phi = lat_deg.to_radians();
    let mu = phi.sin();
    let cos_phi = phi.cos().max(0.0);

    // Fourier coefficients (A_m, B_m) of the row.
    let mut fourier = Vec::with_capacity(truncation + 1);
    let mut column = Vec::with_capacity(truncation + 1);
    let mut pmm = 1.0f64;
    for m in 0..=truncation {
        if m > 0 {
            let mf = m as f64;
            pmm *= ((2.0 * mf + 1.0) / (2.0 * mf)).sqrt() * cos_phi;
        }
        legendre_column(truncation, m, mu, pmm, &mut column);

        let base = coefficient_index(truncation, m, m);
        let (mut re, mut im) = (0.0f64, 0.0f64);
        for (k, p) in column.iter().enumerate() {
            re += coefficients[base + 2 * k] as f64 * p;
            im += coefficients[base + 2 * k + 1] as f64 * p;
        }
        let weight = if m == 0 { 1.0 } else { 2.0 };
        fourier.push((weight * re, weight * im));
    }

    lons_rad
        .iter()
        .map(|&lambda| {
            let mut value = fourier[0].0;
            for (m, &(a, b)) in fourier.iter().enumerate().skip(1) {
                let angle = m as f64 * lambda;
                value += a * angle.cos() - b * angle.sin();
            }
            value as f32
        })
        .collect()
}

/// Evaluate a spectral field on the given latitudes and longitudes.
///
/// Rows are computed in parallel; output is row-major, rows in the order of
/// `lats`.
pub fn synthesize(coefficients: &[f32], truncation: usize, lats: &[f64], lons: &[f64]) -> Vec<f32> {
    let lons_rad: Vec<f64> = lons.iter().map(|l| l.to_radians()).collect();
    lats.par_iter()
        .map(|&lat| synthesize_row(coefficients, truncation, lat, &lons_rad))
        .collect::<Vec<_>>()
        .concat()
}
