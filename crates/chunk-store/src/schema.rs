//! Store and array schemas, and the zarrs arrays describing them.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use zarrs::array::codec::BytesCodec;
use zarrs::array::{
    Array, ArrayBuilder, ArrayMetadata, ChunkGrid, DataType as ZarrType, FillValue,
};
use zarrs::group::GroupMetadataV3;
use zarrs::metadata::v3::AdditionalFields;

use era5_common::{
    ConversionError, ConversionResult, DataType, Grid, LevelSet, TimeAxis, Variable,
};

use crate::codec::{chunk_indices, Compression};

/// Names reserved for coordinate arrays.
pub const COORDINATE_NAMES: [&str; 5] = ["time", "level", "hybrid", "latitude", "longitude"];

/// Schema of one data variable array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArraySchema {
    pub name: String,
    pub short_name: String,
    pub param_id: u32,
    pub units: String,
    pub dtype: DataType,
    pub grid: Grid,
    pub levels: LevelSet,
}

impl ArraySchema {
    pub fn from_variable(variable: &Variable) -> Self {
        Self {
            name: variable.name.clone(),
            short_name: variable.short_name.clone(),
            param_id: variable.param_id,
            units: variable.units.clone(),
            dtype: variable.dtype,
            grid: variable.grid.clone(),
            levels: variable.levels.clone(),
        }
    }

    /// Shape without the time axis.
    pub fn field_shape(&self) -> Vec<u64> {
        let mut shape = Vec::with_capacity(3);
        if !self.levels.is_single_level() {
            shape.push(self.levels.len() as u64);
        }
        shape.extend(self.grid.horizontal_shape());
        shape
    }

    /// Number of elements in one time step.
    pub fn field_len(&self) -> usize {
        self.field_shape().iter().product::<u64>() as usize
    }

    pub fn shape(&self, time_len: u64) -> Vec<u64> {
        let mut shape = vec![time_len];
        shape.extend(self.field_shape());
        shape
    }

    pub fn chunk_shape(&self, chunk_length: u64) -> Vec<u64> {
        self.shape(chunk_length)
    }

    pub fn dimension_names(&self) -> Vec<&'static str> {
        let mut names = vec!["time"];
        if let Some(dim) = self.levels.kind.dimension_name() {
            if !self.levels.is_single_level() {
                names.push(dim);
            }
        }
        names.extend(self.grid.horizontal_dimension_names());
        names
    }

    /// `(dimension name, size)` pairs excluding time.
    pub fn dimensions(&self) -> Vec<(&'static str, u64)> {
        self.dimension_names()
            .into_iter()
            .skip(1)
            .zip(self.field_shape())
            .collect()
    }

    /// Same schema restricted to a subset of levels.
    pub fn with_levels(&self, levels: LevelSet) -> Self {
        Self {
            levels,
            ..self.clone()
        }
    }
}

/// Schema of a whole store: one time axis and chunk length shared by all
/// arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSchema {
    /// Store name; also the object key prefix.
    pub name: String,
    pub time: TimeAxis,
    pub chunk_length: u64,
    pub compression: Compression,
    pub arrays: BTreeMap<String, ArraySchema>,
}

impl StoreSchema {
    pub fn new(
        name: impl Into<String>,
        time: TimeAxis,
        chunk_length: u64,
        compression: Compression,
    ) -> Self {
        Self {
            name: name.into(),
            time,
            chunk_length,
            compression,
            arrays: BTreeMap::new(),
        }
    }

    pub fn with_array(mut self, array: ArraySchema) -> Self {
        self.arrays.insert(array.name.clone(), array);
        self
    }

    pub fn chunk_count(&self) -> u64 {
        self.time.chunk_count(self.chunk_length)
    }

    /// Check the schema is self-consistent.
    ///
    /// Every dimension name must have one size across all arrays, and
    /// shared level and lat/lon dimensions must have identical labels.
    pub fn validate(&self) -> ConversionResult<()> {
        if self.chunk_length == 0 {
            return Err(ConversionError::configuration("chunk length must be positive"));
        }
        if self.time.is_empty() {
            return Err(ConversionError::configuration(format!(
                "store {} has an empty time axis",
                self.name
            )));
        }
        let mut sizes: BTreeMap<&str, (u64, &str)> = BTreeMap::new();
        let mut level_lists: BTreeMap<&str, (&[u32], &str)> = BTreeMap::new();
        let mut regular: Option<(&Grid, &str)> = None;
        for array in self.arrays.values() {
            if COORDINATE_NAMES.contains(&array.name.as_str()) {
                return Err(ConversionError::configuration(format!(
                    "variable name {} is reserved for a coordinate",
                    array.name
                )));
            }
            for (dim, size) in array.dimensions() {
                match sizes.get(dim) {
                    Some((existing, owner)) if *existing != size => {
                        return Err(ConversionError::schema_mismatch(
                            &self.name,
                            format!(
                                "dimension {} has size {} in {} but {} in {}",
                                dim, existing, owner, size, array.name
                            ),
                        ));
                    }
                    _ => {
                        sizes.insert(dim, (size, &array.name));
                    }
                }
            }
            // Equal sizes are not enough: shared coordinates must carry equal labels.
            if let Some(dim) = array.levels.kind.dimension_name() {
                if !array.levels.is_single_level() {
                    match level_lists.get(dim) {
                        Some((levels, owner)) if *levels != array.levels.levels.as_slice() => {
                            return Err(ConversionError::schema_mismatch(
                                &self.name,
                                format!("{} and {} use different {} values", owner, array.name, dim),
                            ));
                        }
                        _ => {
                            level_lists.insert(dim, (&array.levels.levels, &array.name));
                        }
                    }
                }
            }
            if let Grid::RegularLatLon { .. } = array.grid {
                match regular {
                    Some((grid, owner)) if *grid != array.grid => {
                        return Err(ConversionError::schema_mismatch(
                            &self.name,
                            format!("{} and {} are on different regular grids", owner, array.name),
                        ));
                    }
                    _ => regular = Some((&array.grid, &array.name)),
                }
            }
        }
        Ok(())
    }

    /// Group attributes describing the time coverage.
    pub fn group_attributes(&self, last_updated: Option<DateTime<Utc>>) -> Map<String, Value> {
        let mut attrs = Map::new();
        attrs.insert("time_start".to_string(), json!(self.time.start));
        attrs.insert(
            "time_resolution_hours".to_string(),
            json!(self.time.resolution_hours),
        );
        attrs.insert("time_len".to_string(), json!(self.time.len));
        attrs.insert("chunk_length".to_string(), json!(self.chunk_length));
        attrs.insert(
            "valid_time_start".to_string(),
            json!(format_timestamp(self.time.start)),
        );
        attrs.insert(
            "valid_time_end".to_string(),
            json!(self.time.last().map(format_timestamp)),
        );
        if let Some(ts) = last_updated {
            attrs.insert("last_updated".to_string(), json!(format_timestamp(ts)));
        }
        attrs
    }
}

pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Node path of an array inside its store.
pub fn array_path(store: &str, array: &str) -> String {
    format!("/{}/{}", store, array)
}

/// A zarrs array, detached from any storage, carrying the metadata,
/// codec chain and chunk key encoding of one data variable.
pub fn data_array(store: &StoreSchema, array: &ArraySchema) -> ConversionResult<Array<()>> {
    let mut attributes = Map::new();
    attributes.insert("short_name".to_string(), json!(array.short_name));
    attributes.insert("param_id".to_string(), json!(array.param_id));
    attributes.insert("units".to_string(), json!(array.units));
    attributes.insert("grid".to_string(), serde_json::to_value(&array.grid)?);
    attributes.insert("levels".to_string(), serde_json::to_value(&array.levels)?);
    attributes.insert("time_start".to_string(), json!(store.time.start));
    attributes.insert(
        "time_resolution_hours".to_string(),
        json!(store.time.resolution_hours),
    );

    let chunk_grid: ChunkGrid = array
        .chunk_shape(store.chunk_length)
        .try_into()
        .map_err(|e| ConversionError::configuration(format!("{:?}", e)))?;
    let (data_type, fill_value) = match array.dtype {
        DataType::Float32 => (ZarrType::Float32, FillValue::from(f32::NAN)),
        DataType::Float64 => (ZarrType::Float64, FillValue::from(f64::NAN)),
    };

    ArrayBuilder::new(array.shape(store.time.len), data_type, chunk_grid, fill_value)
        .array_to_bytes_codec(Arc::new(BytesCodec::little()))
        .bytes_to_bytes_codecs(store.compression.bytes_to_bytes_codecs()?)
        .attributes(attributes)
        .dimension_names(Some(array.dimension_names()))
        .build(Arc::new(()), &array_path(&store.name, &array.name))
        .map_err(|e| {
            ConversionError::schema_mismatch(&store.name, format!("array {}: {}", array.name, e))
        })
}

/// A one-dimensional coordinate array, stored uncompressed.
pub fn coordinate_array(
    store: &str,
    dimension: &str,
    data_type: ZarrType,
    len: u64,
    chunk_len: u64,
    attributes: Map<String, Value>,
) -> ConversionResult<Array<()>> {
    let fill_value = match data_type {
        ZarrType::Int64 => FillValue::from(0i64),
        _ => FillValue::from(f64::NAN),
    };
    let chunk_grid: ChunkGrid = vec![chunk_len]
        .try_into()
        .map_err(|e| ConversionError::configuration(format!("{:?}", e)))?;

    ArrayBuilder::new(vec![len], data_type, chunk_grid, fill_value)
        .array_to_bytes_codec(Arc::new(BytesCodec::little()))
        .attributes(attributes)
        .dimension_names(Some([dimension]))
        .build(Arc::new(()), &array_path(store, dimension))
        .map_err(|e| ConversionError::schema_mismatch(store, format!("coordinate {}: {}", dimension, e)))
}

/// The `zarr.json` document of an array.
pub fn metadata_document<T: ?Sized>(array: &Array<T>) -> ConversionResult<Value> {
    Ok(serde_json::to_value(array.metadata())?)
}

/// `zarr.json` of a data variable array.
pub fn array_metadata(store: &StoreSchema, array: &ArraySchema) -> ConversionResult<Value> {
    metadata_document(&data_array(store, array)?)
}

/// Parse a data variable `zarr.json` back into its schema, together with
/// the time axis, chunk length and compression it declares.
///
/// Returns `Ok(None)` for coordinate arrays.
pub fn parse_array_metadata(
    store: &str,
    name: &str,
    doc: &Value,
) -> ConversionResult<Option<(ArraySchema, TimeAxis, u64, Compression)>> {
    let bad = |what: &str| {
        ConversionError::schema_mismatch(store, format!("array {}: invalid {}", name, what))
    };

    let metadata: ArrayMetadata =
        serde_json::from_value(doc.clone()).map_err(|e| bad(&format!("metadata ({})", e)))?;
    let compression = match &metadata {
        ArrayMetadata::V3(v3) if !v3.attributes.contains_key("grid") => return Ok(None),
        ArrayMetadata::V3(v3) => Compression::from_codecs(&v3.codecs).ok_or_else(|| bad("codecs"))?,
        ArrayMetadata::V2(_) => return Err(bad("zarr_format")),
    };
    let array = Array::new_with_metadata(Arc::new(()), &array_path(store, name), metadata)
        .map_err(|e| bad(&e.to_string()))?;

    let dtype = match array.data_type() {
        ZarrType::Float32 => DataType::Float32,
        ZarrType::Float64 => DataType::Float64,
        _ => return Err(bad("data_type")),
    };
    let time_len = array.shape().first().copied().ok_or_else(|| bad("shape"))?;
    let chunk_length = array
        .chunk_shape(&chunk_indices(&array, 0))
        .map_err(|_| bad("chunk_grid"))?
        .to_array_shape()
        .first()
        .copied()
        .ok_or_else(|| bad("chunk_grid"))?;

    let attrs = array.attributes();
    let attr = |key: &str| attrs.get(key).cloned().unwrap_or(Value::Null);
    let grid: Grid = serde_json::from_value(attr("grid")).map_err(|_| bad("grid"))?;
    let levels: LevelSet = serde_json::from_value(attr("levels")).map_err(|_| bad("levels"))?;
    let start: DateTime<Utc> =
        serde_json::from_value(attr("time_start")).map_err(|_| bad("time_start"))?;
    let resolution = attr("time_resolution_hours")
        .as_u64()
        .ok_or_else(|| bad("time_resolution_hours"))? as u32;

    let schema = ArraySchema {
        name: name.to_string(),
        short_name: attr("short_name").as_str().unwrap_or_default().to_string(),
        param_id: attr("param_id").as_u64().ok_or_else(|| bad("param_id"))? as u32,
        units: attr("units").as_str().unwrap_or_default().to_string(),
        dtype,
        grid,
        levels,
    };
    if array.shape() != schema.shape(time_len).as_slice() {
        return Err(bad("shape"));
    }

    Ok(Some((
        schema,
        TimeAxis::new(start, resolution, time_len),
        chunk_length,
        compression,
    )))
}

/// Group `zarr.json` of a store, with inline consolidated metadata of
/// every array.
pub fn group_metadata(attributes: Map<String, Value>, arrays: &BTreeMap<String, Value>) -> GroupMetadataV3 {
    let mut consolidated = Map::new();
    consolidated.insert("kind".to_string(), json!("inline"));
    consolidated.insert("metadata".to_string(), json!(arrays));

    let mut fields = AdditionalFields::new();
    fields.insert("consolidated_metadata".to_string(), consolidated.into());
    GroupMetadataV3::new()
        .with_attributes(attributes)
        .with_additional_fields(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use era5_common::{LevelSet, WEATHERBENCH_13};

    fn temperature() -> ArraySchema {
        ArraySchema {
            name: "temperature".to_string(),
            short_name: "t".to_string(),
            param_id: 130,
            units: "K".to_string(),
            dtype: DataType::Float32,
            grid: Grid::regular_global(1.0),
            levels: LevelSet::pressure(&WEATHERBENCH_13),
        }
    }

    fn store() -> StoreSchema {
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        StoreSchema::new("pl", TimeAxis::new(start, 1, 48), 24, Compression::None)
            .with_array(temperature())
    }

    #[test]
    fn test_shapes_and_dimensions() {
        let t = temperature();
        assert_eq!(t.shape(48), vec![48, 13, 181, 360]);
        assert_eq!(t.chunk_shape(24), vec![24, 13, 181, 360]);
        assert_eq!(
            t.dimension_names(),
            vec!["time", "level", "latitude", "longitude"]
        );
        assert_eq!(t.field_len(), 13 * 181 * 360);
    }

    #[test]
    fn test_metadata_parses_back() {
        let store = store();
        let doc = array_metadata(&store, &temperature()).unwrap();
        assert_eq!(doc["zarr_format"], 3);
        assert_eq!(doc["fill_value"], "NaN");
        assert_eq!(doc["chunk_key_encoding"]["configuration"]["separator"], "/");
        assert_eq!(doc["codecs"][0]["configuration"]["endian"], "little");
        assert_eq!(doc["dimension_names"][1], "level");

        let (schema, time, chunk_length, compression) =
            parse_array_metadata("pl", "temperature", &doc).unwrap().unwrap();
        assert_eq!(schema, temperature());
        assert_eq!(time, store.time);
        assert_eq!(chunk_length, 24);
        assert_eq!(compression, Compression::None);
    }

    #[test]
    fn test_gzip_metadata_parses_back() {
        let mut store = store();
        store.compression = Compression::Gzip { level: 7 };
        let doc = array_metadata(&store, &temperature()).unwrap();
        assert_eq!(doc["codecs"][1]["name"], "gzip");
        let (_, _, _, compression) =
            parse_array_metadata("pl", "temperature", &doc).unwrap().unwrap();
        assert_eq!(compression, Compression::Gzip { level: 7 });
    }

    #[test]
    fn test_inconsistent_shape_is_rejected() {
        let mut doc = array_metadata(&store(), &temperature()).unwrap();
        doc["shape"][1] = json!(12);
        let err = parse_array_metadata("pl", "temperature", &doc).unwrap_err();
        assert_eq!(err.kind(), "SchemaMismatchError");
    }

    #[test]
    fn test_coordinate_metadata_is_skipped() {
        let time = coordinate_array("pl", "time", ZarrType::Int64, 48, 24, Map::new()).unwrap();
        let doc = metadata_document(&time).unwrap();
        assert_eq!(doc["data_type"], "int64");
        assert!(parse_array_metadata("pl", "time", &doc).unwrap().is_none());
    }

    #[test]
    fn test_group_metadata_consolidates_arrays() {
        let store = store();
        let mut arrays = BTreeMap::new();
        arrays.insert(
            "temperature".to_string(),
            array_metadata(&store, &temperature()).unwrap(),
        );
        let doc = serde_json::to_value(group_metadata(store.group_attributes(None), &arrays)).unwrap();
        assert_eq!(doc["node_type"], "group");
        assert_eq!(doc["consolidated_metadata"]["kind"], "inline");
        assert_eq!(doc["consolidated_metadata"]["must_understand"], false);
        assert_eq!(
            doc["consolidated_metadata"]["metadata"]["temperature"]["shape"][0],
            48
        );
    }

    #[test]
    fn test_dimension_size_conflict() {
        let mut other = temperature();
        other.name = "humidity".to_string();
        other.levels = LevelSet::pressure(&[500, 850]);
        let schema = store().with_array(other);
        let err = schema.validate().unwrap_err();
        assert_eq!(err.kind(), "SchemaMismatchError");
    }

    #[test]
    fn test_same_size_different_levels() {
        let mut other = temperature();
        other.name = "humidity".to_string();
        let mut levels = WEATHERBENCH_13.to_vec();
        levels[0] = 1;
        other.levels = LevelSet::pressure(&levels);
        let err = store().with_array(other).validate().unwrap_err();
        assert_eq!(err.kind(), "SchemaMismatchError");
    }

    #[test]
    fn test_reserved_name() {
        let mut coord = temperature();
        coord.name = "latitude".to_string();
        assert!(store().with_array(coord).validate().is_err());
    }

    #[test]
    fn test_group_attributes() {
        let attrs = store().group_attributes(None);
        assert_eq!(attrs["valid_time_start"], "2020-01-01T00:00:00Z");
        assert_eq!(attrs["valid_time_end"], "2020-01-02T23:00:00Z");
        assert!(attrs.get("last_updated").is_none());
    }
}
