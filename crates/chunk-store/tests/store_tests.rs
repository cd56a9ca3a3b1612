//! Store write/read behaviour against in-memory and local backends.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use chunk_store::{
    chunk_key, data_array, ArraySchema, Compression, ObjectStorage, StorageConfig, StoreReader,
    StoreSchema, StoreWriter, WriteOutcome,
};
use era5_common::{DataType, Grid, LevelSet, TimeAxis};

fn t2m() -> ArraySchema {
    ArraySchema {
        name: "t2m".to_string(),
        short_name: "t2m".to_string(),
        param_id: 167,
        units: "K".to_string(),
        dtype: DataType::Float32,
        grid: Grid::regular_global(30.0),
        levels: LevelSet::surface(),
    }
}

fn msl() -> ArraySchema {
    ArraySchema {
        name: "msl".to_string(),
        short_name: "msl".to_string(),
        param_id: 151,
        units: "Pa".to_string(),
        ..t2m()
    }
}

fn temperature() -> ArraySchema {
    ArraySchema {
        name: "temperature".to_string(),
        short_name: "t".to_string(),
        param_id: 130,
        units: "K".to_string(),
        dtype: DataType::Float32,
        grid: Grid::regular_global(30.0),
        levels: LevelSet::pressure(&[500, 850]),
    }
}

/// 30 hourly steps in chunks of 12; the last chunk is partial.
fn sfc_schema(compression: Compression) -> StoreSchema {
    let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
    StoreSchema::new("sfc", TimeAxis::new(start, 1, 30), 12, compression).with_array(t2m())
}

fn chunk_values(schema: &StoreSchema, array: &str, seed: f32) -> Vec<f32> {
    let len = schema.chunk_length as usize * schema.arrays[array].field_len();
    (0..len).map(|i| seed + i as f32 * 0.5).collect()
}

#[tokio::test]
async fn test_rewrite_is_unchanged() {
    let writer = StoreWriter::new(ObjectStorage::in_memory());
    let schema = writer.ensure_metadata(&sfc_schema(Compression::default())).await.unwrap();

    let values = chunk_values(&schema, "t2m", 250.0);
    let first = writer.write_chunk(&schema, "t2m", 0, values.clone()).await.unwrap();
    let second = writer.write_chunk(&schema, "t2m", 0, values).await.unwrap();

    assert_eq!(first, WriteOutcome::Created);
    assert_eq!(second, WriteOutcome::Unchanged);
    assert!(writer.chunk_exists(&schema, "t2m", 0).await.unwrap());
    assert!(!writer.chunk_exists(&schema, "t2m", 1).await.unwrap());
}

#[tokio::test]
async fn test_conflicting_chunk_leaves_store_unchanged() {
    let storage = ObjectStorage::in_memory();
    let writer = StoreWriter::new(storage.clone());
    let schema = writer.ensure_metadata(&sfc_schema(Compression::None)).await.unwrap();

    writer
        .write_chunk(&schema, "t2m", 1, chunk_values(&schema, "t2m", 250.0))
        .await
        .unwrap();
    let key = chunk_key(&data_array(&schema, &schema.arrays["t2m"]).unwrap(), 1);
    assert_eq!(key, "sfc/t2m/c/1/0/0");
    let before = storage.get(&key).await.unwrap();

    let err = writer
        .write_chunk(&schema, "t2m", 1, chunk_values(&schema, "t2m", 260.0))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "ChunkConflictError");
    assert_eq!(storage.get(&key).await.unwrap(), before);

    let forced = StoreWriter::new(storage.clone()).with_force(true);
    let outcome = forced
        .write_chunk(&schema, "t2m", 1, chunk_values(&schema, "t2m", 260.0))
        .await
        .unwrap();
    assert_eq!(outcome, WriteOutcome::Overwritten);
    assert_ne!(storage.get(&key).await.unwrap(), before);
}

#[tokio::test]
async fn test_filling_nan_gaps_without_force_conflicts() {
    let storage = ObjectStorage::in_memory();
    let writer = StoreWriter::new(storage.clone());
    let schema = writer.ensure_metadata(&sfc_schema(Compression::None)).await.unwrap();

    let complete = chunk_values(&schema, "t2m", 250.0);
    let mut partial = complete.clone();
    let field_len = schema.arrays["t2m"].field_len();
    for v in &mut partial[field_len * 3..field_len * 4] {
        *v = f32::NAN;
    }

    writer.write_chunk(&schema, "t2m", 0, partial).await.unwrap();
    let before = storage.get("sfc/t2m/c/0/0/0").await.unwrap();

    let err = writer
        .write_chunk(&schema, "t2m", 0, complete.clone())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "ChunkConflictError");
    assert_eq!(storage.get("sfc/t2m/c/0/0/0").await.unwrap(), before);

    let forced = StoreWriter::new(storage.clone()).with_force(true);
    let outcome = forced.write_chunk(&schema, "t2m", 0, complete).await.unwrap();
    assert_eq!(outcome, WriteOutcome::Overwritten);
}

#[tokio::test]
async fn test_write_rejects_out_of_range() {
    let writer = StoreWriter::new(ObjectStorage::in_memory());
    let schema = writer.ensure_metadata(&sfc_schema(Compression::None)).await.unwrap();

    let err = writer
        .write_chunk(&schema, "t2m", 3, chunk_values(&schema, "t2m", 0.0))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "SchemaMismatchError");

    let err = writer
        .write_chunk(&schema, "t2m", 0, vec![0.0; 5])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "SchemaMismatchError");
}

#[tokio::test]
async fn test_ensure_metadata_adds_arrays_and_rejects_mismatch() {
    let storage = ObjectStorage::in_memory();
    let writer = StoreWriter::new(storage.clone());
    writer.ensure_metadata(&sfc_schema(Compression::None)).await.unwrap();

    let mut with_msl = sfc_schema(Compression::None);
    with_msl.arrays.clear();
    let merged = writer.ensure_metadata(&with_msl.with_array(msl())).await.unwrap();
    assert_eq!(merged.arrays.len(), 2);

    let discovered = writer.existing_schema("sfc").await.unwrap().unwrap();
    assert_eq!(discovered, merged);

    let mut other_chunks = sfc_schema(Compression::None);
    other_chunks.chunk_length = 6;
    let err = writer.ensure_metadata(&other_chunks).await.unwrap_err();
    assert_eq!(err.kind(), "SchemaMismatchError");

    let mut other_units = sfc_schema(Compression::None);
    other_units.arrays.get_mut("t2m").unwrap().units = "degC".to_string();
    let err = writer.ensure_metadata(&other_units).await.unwrap_err();
    assert_eq!(err.kind(), "SchemaMismatchError");
}

#[tokio::test]
async fn test_consolidate_versions() {
    let storage = ObjectStorage::in_memory();
    let writer = StoreWriter::new(storage.clone());
    let schema = writer.ensure_metadata(&sfc_schema(Compression::None)).await.unwrap();

    writer
        .write_chunk(&schema, "t2m", 0, chunk_values(&schema, "t2m", 1.0))
        .await
        .unwrap();
    let first = writer.consolidate("sfc").await.unwrap();
    assert_eq!(first.version, 1);
    assert_eq!(first.missing_chunks("t2m"), vec![1, 2]);

    let again = writer.consolidate("sfc").await.unwrap();
    assert_eq!(again.version, 1);
    assert_eq!(again.updated_at, first.updated_at);

    writer
        .write_chunk(&schema, "t2m", 2, chunk_values(&schema, "t2m", 2.0))
        .await
        .unwrap();
    let third = writer.consolidate("sfc").await.unwrap();
    assert_eq!(third.version, 2);
    assert_eq!(third.missing_chunks("t2m"), vec![1]);

    let group: serde_json::Value =
        serde_json::from_slice(&storage.get("sfc/zarr.json").await.unwrap()).unwrap();
    assert_eq!(group["node_type"], "group");
    assert_eq!(group["consolidated_metadata"]["must_understand"], false);
    assert!(group["attributes"]["last_updated"].is_string());
    assert_eq!(
        group["consolidated_metadata"]["metadata"]["t2m"]["shape"],
        serde_json::json!([30, 7, 12])
    );
}

#[tokio::test]
async fn test_reader_fills_missing_with_nan() {
    let storage = ObjectStorage::in_memory();
    let writer = StoreWriter::new(storage.clone());
    let schema = writer.ensure_metadata(&sfc_schema(Compression::default())).await.unwrap();
    let values = chunk_values(&schema, "t2m", 10.0);
    writer.write_chunk(&schema, "t2m", 0, values.clone()).await.unwrap();

    let reader = StoreReader::new(storage, 1 << 20);
    let field_len = schema.arrays["t2m"].field_len();

    let step = reader.read_time_step(&schema, "t2m", 5).await.unwrap();
    assert_eq!(step, values[5 * field_len..6 * field_len].to_vec());
    let again = reader.read_time_step(&schema, "t2m", 6).await.unwrap();
    assert_eq!(again.len(), field_len);
    assert_eq!(reader.cache_stats().hits, 1);

    let missing = reader.read_time_step(&schema, "t2m", 20).await.unwrap();
    assert!(missing.iter().all(|v| v.is_nan()));
    assert!(reader.read_time_step(&schema, "t2m", 30).await.is_err());
}

#[tokio::test]
async fn test_resize_keeps_full_chunks_and_drops_partial_tail() {
    let storage = ObjectStorage::in_memory();
    let writer = StoreWriter::new(storage.clone());
    let schema = writer.ensure_metadata(&sfc_schema(Compression::None)).await.unwrap();
    let values = chunk_values(&schema, "t2m", 3.0);
    writer.write_chunk(&schema, "t2m", 0, values.clone()).await.unwrap();
    // Chunk 2 covers steps 24..36 of a 30-step axis: padded with NaN.
    writer
        .write_chunk(&schema, "t2m", 2, chunk_values(&schema, "t2m", 7.0))
        .await
        .unwrap();
    writer.consolidate("sfc").await.unwrap();

    let resized = writer.resize_time_axis("sfc", 48).await.unwrap();
    assert_eq!(resized.time.len, 48);
    assert_eq!(resized.time.start, schema.time.start);
    assert_eq!(resized.chunk_count(), 4);

    let reader = StoreReader::new(storage.clone(), 1 << 20);
    let reloaded = reader.schema("sfc").await.unwrap();
    assert_eq!(reloaded, resized);
    let chunk = reader.read_chunk(&reloaded, "t2m", 0).await.unwrap().unwrap();
    assert_eq!(*chunk, values);
    assert!(reader.read_chunk(&reloaded, "t2m", 2).await.unwrap().is_none());
    assert!(!writer.chunk_exists(&reloaded, "t2m", 2).await.unwrap());
    assert_eq!(reader.version("sfc").await.unwrap(), 2);
    assert!(storage.exists("sfc/time/c/3").await.unwrap());

    // The tail slot accepts new content without force.
    let outcome = writer
        .write_chunk(&reloaded, "t2m", 2, chunk_values(&reloaded, "t2m", 9.0))
        .await
        .unwrap();
    assert_eq!(outcome, WriteOutcome::Created);

    let err = writer.resize_time_axis("sfc", 24).await.unwrap_err();
    assert_eq!(err.kind(), "ConfigurationError");
}

#[tokio::test]
async fn test_coordinates_written() {
    let storage = ObjectStorage::in_memory();
    let writer = StoreWriter::new(storage.clone());
    let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
    let schema = StoreSchema::new("pl", TimeAxis::new(start, 6, 8), 4, Compression::None)
        .with_array(temperature());
    writer.ensure_metadata(&schema).await.unwrap();

    let time = storage.get("pl/time/c/1").await.unwrap();
    let labels: Vec<i64> = time
        .chunks_exact(8)
        .map(|b| i64::from_le_bytes(b.try_into().unwrap()))
        .collect();
    assert_eq!(labels, vec![24, 30, 36, 42]);

    let levels = storage.get("pl/level/c/0").await.unwrap();
    assert_eq!(levels.len(), 16);
    assert!(storage.exists("pl/latitude/zarr.json").await.unwrap());
    assert!(storage.exists("pl/longitude/c/0").await.unwrap());
}

#[tokio::test]
async fn test_zarr_readers_open_local_store() {
    use zarrs::array::Array;
    use zarrs_filesystem::FilesystemStore;

    let dir = tempfile::tempdir().unwrap();
    let storage = ObjectStorage::new(&StorageConfig::Local {
        path: dir.path().to_string_lossy().to_string(),
    })
    .unwrap();
    let writer = StoreWriter::new(storage);
    let schema = writer.ensure_metadata(&sfc_schema(Compression::None)).await.unwrap();
    let values = chunk_values(&schema, "t2m", 100.0);
    writer.write_chunk(&schema, "t2m", 0, values.clone()).await.unwrap();
    writer.consolidate("sfc").await.unwrap();

    let fs = Arc::new(FilesystemStore::new(dir.path()).unwrap());
    let array = Array::open(fs.clone(), "/sfc/t2m").unwrap();
    assert_eq!(array.shape(), &[30, 7, 12]);
    let chunk = array.retrieve_chunk_elements::<f32>(&[0, 0, 0]).unwrap();
    assert_eq!(chunk, values);

    // Unwritten chunks read as the fill value.
    let empty = array.retrieve_chunk_elements::<f32>(&[1, 0, 0]).unwrap();
    assert!(empty.iter().all(|v| v.is_nan()));

    let time = Array::open(fs, "/sfc/time").unwrap();
    let labels = time.retrieve_chunk_elements::<i64>(&[2]).unwrap();
    assert_eq!(labels, (24..36).collect::<Vec<i64>>());
}
