//! Deterministic synthetic fields and encoded archive records.
//!
//! Values depend only on the variable, the coordinate and the sample
//! index, so a test can regenerate what it expects to find in a store.

use std::path::Path;

use chrono::Duration;
use era5_common::{Coordinate, Grid, LevelKind, Variable};
use record_codec::{PackingOptions, Record, RecordHeader};

/// Creates a field of `len` samples with predictable values.
///
/// Each value is `base + 0.25 * (i % 97)`, so neighbouring samples differ
/// and any shift of data within a chunk is visible.
pub fn create_field(len: usize, base: f32) -> Vec<f32> {
    (0..len).map(|i| base + 0.25 * (i % 97) as f32).collect()
}

/// Creates a field with every value equal to `value`.
pub fn create_constant_field(len: usize, value: f32) -> Vec<f32> {
    vec![value; len]
}

/// Base value of a variable's field at a coordinate.
///
/// Distinct per parameter, hour of the dataset and level.
pub fn field_base(variable: &Variable, coordinate: &Coordinate) -> f32 {
    let hours = coordinate.time.timestamp() / 3600;
    let level = coordinate.level.unwrap_or(0);
    (variable.param_id % 1000) as f32 + (hours % 1000) as f32 * 0.5 + level as f32 * 0.01
}

/// The native-grid field of a variable at a coordinate.
///
/// Spectral grids get a constant field (only the mean coefficient set) so
/// regridded output has a known value.
pub fn synthetic_values(variable: &Variable, coordinate: &Coordinate) -> Vec<f32> {
    let base = field_base(variable, coordinate);
    match variable.grid {
        Grid::SpectralHarmonic { .. } => {
            let mut coefficients = vec![0.0; variable.value_count()];
            coefficients[0] = base;
            coefficients
        }
        Grid::ReducedGaussian { .. } | Grid::RegularLatLon { .. } => {
            create_field(variable.value_count(), base)
        }
    }
}

/// The encoded record of a variable at a coordinate, carrying forecast
/// step `step_hours`.
pub fn synthetic_record(variable: &Variable, coordinate: &Coordinate, step_hours: u32) -> Vec<u8> {
    synthetic_record_with(variable, coordinate, step_hours, synthetic_values(variable, coordinate))
}

/// Like [`synthetic_record`], with explicit values.
pub fn synthetic_record_with(
    variable: &Variable,
    coordinate: &Coordinate,
    step_hours: u32,
    values: Vec<f32>,
) -> Vec<u8> {
    let level_kind = if variable.is_single_level() {
        LevelKind::Surface
    } else {
        variable.levels.kind
    };
    let record = Record {
        header: RecordHeader {
            param_id: variable.param_id,
            reference_time: coordinate.time - Duration::hours(step_hours as i64),
            step_hours,
            level_kind,
            level: coordinate.level,
        },
        grid: variable.grid.clone(),
        values,
    };
    record_codec::encode(&record, PackingOptions::Ieee).expect("synthetic record encodes")
}

/// Write records back to back into one file, creating parent directories.
pub fn write_record_file(path: &Path, records: &[Vec<u8>]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, records.concat())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{humidity, spectral_temperature, t2m, utc};

    #[test]
    fn test_create_field() {
        let field = create_field(100, 10.0);
        assert_eq!(field[0], 10.0);
        assert_eq!(field[1], 10.25);
        assert_eq!(field[97], 10.0);
    }

    #[test]
    fn test_record_decodes_to_values() {
        let variable = humidity();
        let coordinate = Coordinate::new(utc(2020, 1, 1, 6), Some(850));
        let bytes = synthetic_record(&variable, &coordinate, 0);
        let record = record_codec::decode(&bytes).unwrap();
        assert_eq!(record.header.level, Some(850));
        assert_eq!(record.header.valid_time(), coordinate.time);
        assert_eq!(record.values, synthetic_values(&variable, &coordinate));
    }

    #[test]
    fn test_forecast_record_valid_time() {
        let variable = t2m();
        let coordinate = Coordinate::surface(utc(2020, 1, 2, 18));
        let record = record_codec::decode(&synthetic_record(&variable, &coordinate, 6)).unwrap();
        assert_eq!(record.header.reference_time, utc(2020, 1, 2, 12));
        assert_eq!(record.header.valid_time(), coordinate.time);
    }

    #[test]
    fn test_spectral_values_are_mean_only() {
        let variable = spectral_temperature();
        let values = synthetic_values(&variable, &Coordinate::new(utc(2020, 1, 1, 0), Some(500)));
        assert!(values[0] > 0.0);
        assert!(values[1..].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_bases_differ_by_coordinate() {
        let variable = t2m();
        let a = field_base(&variable, &Coordinate::surface(utc(2020, 1, 1, 0)));
        let b = field_base(&variable, &Coordinate::surface(utc(2020, 1, 1, 1)));
        assert_ne!(a, b);
    }
}
