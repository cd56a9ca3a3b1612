//! Decoding and validation of raw records against the requested variable.

use std::sync::Arc;

use bytes::Bytes;
use tracing::trace;

use era5_common::{ConversionError, ConversionResult, Coordinate, Grid, LevelKind, Variable};
use record_codec::{Record, RecordError};

use crate::source::RecordSource;

/// Decode `bytes` as the record of `variable` at `coordinate`.
///
/// The decoded parameter, level, valid time, forecast step and grid must
/// all match the request; values stay on the native grid.
pub fn normalize(
    variable: &Variable,
    coordinate: &Coordinate,
    step_hours: u32,
    bytes: &[u8],
) -> ConversionResult<Vec<f32>> {
    let decode_err = |reason: String| ConversionError::Decode {
        variable: variable.name.clone(),
        coordinate: *coordinate,
        reason,
    };

    let record: Record = record_codec::decode(bytes).map_err(|e: RecordError| decode_err(e.to_string()))?;
    let header = &record.header;

    if header.param_id != variable.param_id {
        return Err(decode_err(format!(
            "record holds parameter {}, expected {}",
            header.param_id, variable.param_id
        )));
    }
    let expected_kind = if variable.is_single_level() {
        LevelKind::Surface
    } else {
        variable.levels.kind
    };
    if header.level_kind != expected_kind || header.level != coordinate.level {
        return Err(decode_err(format!(
            "record is on {:?} level {:?}, expected {:?} level {:?}",
            header.level_kind, header.level, expected_kind, coordinate.level
        )));
    }
    if header.valid_time() != coordinate.time {
        return Err(decode_err(format!(
            "record is valid at {}, expected {}",
            header.valid_time(),
            coordinate.time
        )));
    }
    if header.step_hours != step_hours {
        return Err(decode_err(format!(
            "record has forecast step {}h, expected {}h",
            header.step_hours, step_hours
        )));
    }
    if !same_grid(&record.grid, &variable.grid) {
        return Err(decode_err(format!(
            "record grid {} does not match declared grid {}",
            record.grid, variable.grid
        )));
    }
    if record.values.len() != variable.value_count() {
        return Err(decode_err(format!(
            "record has {} values, grid {} needs {}",
            record.values.len(),
            variable.grid,
            variable.value_count()
        )));
    }

    trace!(variable = %variable.name, %coordinate, "Normalized record");
    Ok(record.values)
}

/// Grid equality allowing for the micro-degree precision of encoded
/// regular grid definitions.
fn same_grid(decoded: &Grid, declared: &Grid) -> bool {
    match (decoded, declared) {
        (
            Grid::RegularLatLon {
                resolution: r1,
                bounds: b1,
            },
            Grid::RegularLatLon {
                resolution: r2,
                bounds: b2,
            },
        ) => {
            let close = |a: f64, b: f64| (a - b).abs() < 1e-5;
            close(*r1, *r2)
                && close(b1.min_lon, b2.min_lon)
                && close(b1.min_lat, b2.min_lat)
                && close(b1.max_lon, b2.max_lon)
                && close(b1.max_lat, b2.max_lat)
        }
        (
            Grid::ReducedGaussian {
                points_per_latitude: p1,
                ..
            },
            Grid::ReducedGaussian {
                points_per_latitude: p2,
                ..
            },
        ) => p1 == p2,
        (Grid::SpectralHarmonic { truncation: t1 }, Grid::SpectralHarmonic { truncation: t2 }) => {
            t1 == t2
        }
        _ => false,
    }
}

/// Fetches and normalizes records from a source.
#[derive(Clone)]
pub struct GridNormalizer {
    source: Arc<dyn RecordSource>,
}

impl GridNormalizer {
    pub fn new(source: Arc<dyn RecordSource>) -> Self {
        Self { source }
    }

    /// Raw bytes of a record, or `MissingRecord`.
    pub async fn locate(
        &self,
        variable: &Variable,
        coordinate: &Coordinate,
    ) -> ConversionResult<Bytes> {
        self.source
            .locate(variable, coordinate)
            .await?
            .ok_or_else(|| ConversionError::MissingRecord {
                variable: variable.name.clone(),
                coordinate: *coordinate,
            })
    }

    /// Locate and decode one record on the blocking pool.
    pub async fn fetch(
        &self,
        variable: Arc<Variable>,
        coordinate: Coordinate,
        step_hours: u32,
    ) -> ConversionResult<Vec<f32>> {
        let bytes = self.locate(&variable, &coordinate).await?;
        tokio::task::spawn_blocking(move || normalize(&variable, &coordinate, step_hours, &bytes))
            .await
            .map_err(|e| ConversionError::storage(format!("decode task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use era5_common::{BoundingBox, LevelSet};
    use record_codec::{PackingOptions, RecordHeader};

    fn temperature() -> Variable {
        Variable {
            name: "temperature".to_string(),
            short_name: "t".to_string(),
            param_id: 130,
            units: "K".to_string(),
            grid: Grid::regular_global(45.0),
            levels: LevelSet::pressure(&[500, 850]),
            group: "pl".to_string(),
            dtype: Default::default(),
        }
    }

    fn record(param_id: u32, level: Option<u32>, step: u32) -> Vec<u8> {
        let grid = Grid::regular_global(45.0);
        let record = Record {
            header: RecordHeader {
                param_id,
                reference_time: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
                step_hours: step,
                level_kind: LevelKind::Pressure,
                level,
            },
            values: (0..grid.value_count()).map(|i| 250.0 + i as f32).collect(),
            grid,
        };
        record_codec::encode(&record, PackingOptions::Ieee).unwrap()
    }

    fn at(hour: u32, level: u32) -> Coordinate {
        Coordinate::new(Utc.with_ymd_and_hms(2020, 1, 1, hour, 0, 0).unwrap(), Some(level))
    }

    #[test]
    fn test_matching_record() {
        let values = normalize(&temperature(), &at(0, 500), 0, &record(130, Some(500), 0)).unwrap();
        assert_eq!(values.len(), 5 * 8);
        assert_eq!(values[3], 253.0);
    }

    #[test]
    fn test_forecast_valid_time() {
        let values = normalize(&temperature(), &at(6, 500), 6, &record(130, Some(500), 6));
        assert!(values.is_ok());
        let err = normalize(&temperature(), &at(6, 500), 0, &record(130, Some(500), 6)).unwrap_err();
        assert_eq!(err.kind(), "DecodeError");
    }

    #[test]
    fn test_mismatches_are_decode_errors() {
        let cases = [
            (at(0, 500), record(131, Some(500), 0)),
            (at(0, 850), record(130, Some(500), 0)),
            (at(1, 500), record(130, Some(500), 0)),
            (at(0, 500), b"not a record".to_vec()),
        ];
        for (coordinate, bytes) in cases {
            let err = normalize(&temperature(), &coordinate, 0, &bytes).unwrap_err();
            assert_eq!(err.kind(), "DecodeError");
            assert!(err.to_string().contains("temperature"));
        }
    }

    #[test]
    fn test_grid_mismatch() {
        let mut variable = temperature();
        variable.grid = Grid::RegularLatLon {
            resolution: 45.0,
            bounds: BoundingBox::new(0.0, -45.0, 315.0, 45.0),
        };
        let err = normalize(&variable, &at(0, 500), 0, &record(130, Some(500), 0)).unwrap_err();
        assert!(err.to_string().contains("grid"));
    }

    #[tokio::test]
    async fn test_missing_record() {
        let source = Arc::new(crate::source::MemoryRecordSource::new());
        let normalizer = GridNormalizer::new(source);
        let err = normalizer
            .fetch(Arc::new(temperature()), at(0, 500), 0)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "MissingRecordError");
    }
}
