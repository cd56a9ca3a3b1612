//! Idempotent chunk writes, metadata management and consolidation.

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::Utc;
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use zarrs::array::{Array, DataType as ZarrType};

use era5_common::{ConversionError, ConversionResult, Grid, LevelKind, LevelSet};

use crate::codec;
use crate::manifest::{ArrayManifest, Manifest, MANIFEST_FILE};
use crate::reader::{chunk_key, list_chunks, load_manifest, load_schema};
use crate::schema::{self, format_timestamp, StoreSchema};
use crate::storage::{CreateOutcome, ObjectStorage};

/// Result of a chunk write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The chunk did not exist and was written.
    Created,
    /// An identical chunk already existed; nothing was written.
    Unchanged,
    /// Different content replaced the existing chunk (force mode).
    Overwritten,
}

/// Writer for chunked array stores.
pub struct StoreWriter {
    storage: ObjectStorage,
    force: bool,
    consolidate_lock: Mutex<()>,
}

impl StoreWriter {
    pub fn new(storage: ObjectStorage) -> Self {
        Self {
            storage,
            force: false,
            consolidate_lock: Mutex::new(()),
        }
    }

    /// Allow overwriting chunks whose content differs.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn storage(&self) -> &ObjectStorage {
        &self.storage
    }

    /// The schema currently persisted for a store, if any.
    pub async fn existing_schema(&self, store: &str) -> ConversionResult<Option<StoreSchema>> {
        load_schema(&self.storage, store).await
    }

    /// Create or validate array metadata and coordinate arrays.
    ///
    /// Arrays may be added to an existing store when the time axis, chunk
    /// length and compression agree; anything else is a schema mismatch.
    #[instrument(skip(self, schema), fields(store = %schema.name))]
    pub async fn ensure_metadata(&self, schema: &StoreSchema) -> ConversionResult<StoreSchema> {
        schema.validate()?;

        let merged = match load_schema(&self.storage, &schema.name).await? {
            None => schema.clone(),
            Some(existing) => {
                if existing.time != schema.time {
                    return Err(ConversionError::schema_mismatch(
                        &schema.name,
                        format!(
                            "time axis {} x {} steps from {} does not match existing {} x {} steps from {}",
                            schema.time.resolution_hours,
                            schema.time.len,
                            schema.time.start,
                            existing.time.resolution_hours,
                            existing.time.len,
                            existing.time.start
                        ),
                    ));
                }
                if existing.chunk_length != schema.chunk_length {
                    return Err(ConversionError::schema_mismatch(
                        &schema.name,
                        format!(
                            "chunk length {} does not match existing {}",
                            schema.chunk_length, existing.chunk_length
                        ),
                    ));
                }
                if existing.compression != schema.compression {
                    return Err(ConversionError::schema_mismatch(
                        &schema.name,
                        "compression differs from existing arrays",
                    ));
                }
                let mut merged = existing;
                for (name, array) in &schema.arrays {
                    match merged.arrays.get(name) {
                        Some(current) if current != array => {
                            return Err(ConversionError::schema_mismatch(
                                &schema.name,
                                format!("array {} already exists with a different schema", name),
                            ));
                        }
                        Some(_) => {}
                        None => {
                            merged.arrays.insert(name.clone(), array.clone());
                        }
                    }
                }
                merged.validate()?;
                merged
            }
        };

        for array in schema.arrays.values() {
            let doc = schema::array_metadata(&merged, array)?;
            self.create_or_compare(
                &schema.name,
                &format!("{}/{}/zarr.json", schema.name, array.name),
                to_json_bytes(&doc)?,
            )
            .await?;
        }

        self.write_coordinates(&merged).await?;
        self.write_group(&merged, None).await?;

        info!(arrays = merged.arrays.len(), "Store metadata ready");
        Ok(merged)
    }

    /// Write one chunk with create-if-absent semantics.
    ///
    /// `values` must cover the full chunk shape; a tail chunk is padded
    /// with NaN beyond the end of the time axis.
    #[instrument(skip(self, schema, values), fields(store = %schema.name))]
    pub async fn write_chunk(
        &self,
        schema: &StoreSchema,
        variable: &str,
        chunk_index: u64,
        values: Vec<f32>,
    ) -> ConversionResult<WriteOutcome> {
        let array = schema.arrays.get(variable).ok_or_else(|| {
            ConversionError::schema_mismatch(&schema.name, format!("unknown array {}", variable))
        })?;
        if chunk_index >= schema.chunk_count() {
            return Err(ConversionError::schema_mismatch(
                &schema.name,
                format!(
                    "chunk {} beyond the {} chunks of the time axis",
                    chunk_index,
                    schema.chunk_count()
                ),
            ));
        }
        let expected = schema.chunk_length as usize * array.field_len();
        if values.len() != expected {
            return Err(ConversionError::schema_mismatch(
                &schema.name,
                format!(
                    "chunk {} of {} has {} values, expected {}",
                    chunk_index,
                    variable,
                    values.len(),
                    expected
                ),
            ));
        }

        let zarr_array = schema::data_array(schema, array)?;
        let path = chunk_key(&zarr_array, chunk_index);
        let dtype = array.dtype;
        let bytes = tokio::task::spawn_blocking(move || {
            codec::encode_chunk(&zarr_array, chunk_index, &values, dtype)
        })
        .await
        .map_err(|e| ConversionError::storage(format!("encode task failed: {}", e)))??;
        let bytes = Bytes::from(bytes);

        match self.storage.put_if_absent(&path, bytes.clone()).await? {
            CreateOutcome::Created => {
                metrics::counter!("chunk_store_chunks_created").increment(1);
                debug!(variable, chunk_index, size = bytes.len(), "Chunk created");
                Ok(WriteOutcome::Created)
            }
            CreateOutcome::Exists(existing) if existing == bytes => {
                metrics::counter!("chunk_store_chunks_unchanged").increment(1);
                debug!(variable, chunk_index, "Chunk unchanged");
                Ok(WriteOutcome::Unchanged)
            }
            CreateOutcome::Exists(_) if self.force => {
                self.storage.put(&path, bytes).await?;
                metrics::counter!("chunk_store_chunks_overwritten").increment(1);
                warn!(variable, chunk_index, "Chunk overwritten");
                Ok(WriteOutcome::Overwritten)
            }
            CreateOutcome::Exists(_) => {
                metrics::counter!("chunk_store_chunk_conflicts").increment(1);
                Err(ConversionError::ChunkConflict {
                    store: schema.name.clone(),
                    variable: variable.to_string(),
                    chunk_index,
                })
            }
        }
    }

    /// Whether a chunk object exists, without listing.
    pub async fn chunk_exists(
        &self,
        schema: &StoreSchema,
        variable: &str,
        chunk_index: u64,
    ) -> ConversionResult<bool> {
        let array = schema.arrays.get(variable).ok_or_else(|| {
            ConversionError::schema_mismatch(&schema.name, format!("unknown array {}", variable))
        })?;
        let zarr_array = schema::data_array(schema, array)?;
        self.storage.exists(&chunk_key(&zarr_array, chunk_index)).await
    }

    /// Refresh the manifest and consolidated group metadata.
    ///
    /// Calls are serialized per writer. The manifest version only changes
    /// when the summarized content changes, so repeated calls are no-ops.
    #[instrument(skip(self))]
    pub async fn consolidate(&self, store: &str) -> ConversionResult<Manifest> {
        let _guard = self.consolidate_lock.lock().await;
        self.consolidate_locked(store).await
    }

    async fn consolidate_locked(&self, store: &str) -> ConversionResult<Manifest> {
        let schema = load_schema(&self.storage, store)
            .await?
            .ok_or_else(|| ConversionError::schema_mismatch(store, "store has no arrays"))?;

        let mut arrays = BTreeMap::new();
        for (name, array) in &schema.arrays {
            arrays.insert(
                name.clone(),
                ArrayManifest {
                    schema: array.clone(),
                    chunks: list_chunks(&self.storage, store, name).await?,
                },
            );
        }

        let checksum = Manifest::content_checksum(
            &schema.time,
            schema.chunk_length,
            &schema.compression,
            &arrays,
        );
        let previous = load_manifest(&self.storage, store).await?;
        if let Some(previous) = previous.as_ref().filter(|p| p.checksum == checksum) {
            debug!(version = previous.version, "Manifest unchanged");
            return Ok(previous.clone());
        }

        let now = Utc::now();
        let manifest = Manifest {
            version: previous.map(|p| p.version + 1).unwrap_or(1),
            checksum,
            updated_at: now,
            time: schema.time,
            chunk_length: schema.chunk_length,
            compression: schema.compression,
            arrays,
        };

        self.storage
            .put(
                &format!("{}/{}", store, MANIFEST_FILE),
                Bytes::from(serde_json::to_vec_pretty(&manifest)?),
            )
            .await?;
        self.write_group(&schema, Some(now)).await?;

        metrics::counter!("chunk_store_consolidations").increment(1);
        info!(version = manifest.version, "Store consolidated");
        Ok(manifest)
    }

    /// Extend the time axis of an existing store to `new_len` steps.
    ///
    /// Full chunks keep their positions. A partial tail chunk is removed,
    /// since its padding now covers steps of the axis, so the next run
    /// writes it again. New steps read as NaN until written. Shrinking is
    /// rejected.
    #[instrument(skip(self))]
    pub async fn resize_time_axis(&self, store: &str, new_len: u64) -> ConversionResult<StoreSchema> {
        let _guard = self.consolidate_lock.lock().await;

        let schema = load_schema(&self.storage, store)
            .await?
            .ok_or_else(|| ConversionError::schema_mismatch(store, "store has no arrays"))?;
        let previous_len = schema.time.len;
        if new_len == previous_len {
            return Ok(schema);
        }

        let resized = StoreSchema {
            time: schema.time.extended_to(new_len)?,
            ..schema.clone()
        };

        if previous_len % schema.chunk_length != 0 {
            let tail = previous_len / schema.chunk_length;
            for array in schema.arrays.values() {
                let zarr_array = schema::data_array(&schema, array)?;
                self.storage.delete(&chunk_key(&zarr_array, tail)).await?;
            }
            info!(chunk_index = tail, "Partial tail chunks removed");
        }

        for array in resized.arrays.values() {
            let doc = schema::array_metadata(&resized, array)?;
            self.storage
                .put(
                    &format!("{}/{}/zarr.json", store, array.name),
                    to_json_bytes(&doc)?,
                )
                .await?;
        }
        let time = time_coordinate(&resized)?;
        self.storage
            .put(
                &format!("{}/time/zarr.json", store),
                to_json_bytes(&schema::metadata_document(&time)?)?,
            )
            .await?;
        self.write_time_chunks(&resized).await?;

        info!(from = previous_len, to = new_len, "Time axis extended");
        self.consolidate_locked(store).await?;
        Ok(resized)
    }

    async fn write_coordinates(&self, schema: &StoreSchema) -> ConversionResult<()> {
        let store = &schema.name;

        let time = time_coordinate(schema)?;
        self.create_coordinate_metadata(store, &time).await?;
        self.write_time_chunks(schema).await?;

        let mut levels: BTreeMap<&'static str, &LevelSet> = BTreeMap::new();
        let mut regular: Option<&Grid> = None;
        for array in schema.arrays.values() {
            if let Some(dim) = array.levels.kind.dimension_name() {
                if !array.levels.is_single_level() {
                    levels.insert(dim, &array.levels);
                }
            }
            if let Grid::RegularLatLon { .. } = array.grid {
                regular = Some(&array.grid);
            }
        }

        for (dim, level_set) in levels {
            let units = match level_set.kind {
                LevelKind::Pressure => "hPa",
                LevelKind::Model | LevelKind::Surface => "1",
            };
            let len = level_set.len() as u64;
            let coordinate = schema::coordinate_array(
                store,
                dim,
                ZarrType::Int64,
                len,
                len,
                attributes(json!({ "units": units, "long_name": level_long_name(level_set.kind) })),
            )?;
            self.create_coordinate_metadata(store, &coordinate).await?;
            let labels: Vec<i64> = level_set.levels.iter().map(|&l| l as i64).collect();
            self.create_or_compare(
                store,
                &chunk_key(&coordinate, 0),
                Bytes::from(codec::encode_labels(&coordinate, 0, labels)?),
            )
            .await?;
        }

        if let Some(grid) = regular {
            for (dim, values, units) in [
                ("latitude", grid.latitudes(), "degrees_north"),
                ("longitude", grid.longitudes(), "degrees_east"),
            ] {
                let len = values.len() as u64;
                let coordinate = schema::coordinate_array(
                    store,
                    dim,
                    ZarrType::Float64,
                    len,
                    len,
                    attributes(json!({ "units": units })),
                )?;
                self.create_coordinate_metadata(store, &coordinate).await?;
                self.create_or_compare(
                    store,
                    &chunk_key(&coordinate, 0),
                    Bytes::from(codec::encode_labels(&coordinate, 0, values)?),
                )
                .await?;
            }
        }

        Ok(())
    }

    async fn create_coordinate_metadata(&self, store: &str, coordinate: &Array<()>) -> ConversionResult<()> {
        let path = format!("{}/zarr.json", coordinate.path().as_str().trim_start_matches('/'));
        self.create_or_compare(store, &path, to_json_bytes(&schema::metadata_document(coordinate)?)?)
            .await
    }

    /// Time labels in hours since the axis start, one object per chunk,
    /// padded by continuing the sequence.
    async fn write_time_chunks(&self, schema: &StoreSchema) -> ConversionResult<()> {
        let time = time_coordinate(schema)?;
        let step = schema.time.resolution_hours as i64;
        for chunk in 0..schema.chunk_count() {
            let first = (chunk * schema.chunk_length) as i64;
            let labels: Vec<i64> = (0..schema.chunk_length as i64)
                .map(|j| (first + j) * step)
                .collect();
            self.create_or_compare(
                &schema.name,
                &chunk_key(&time, chunk),
                Bytes::from(codec::encode_labels(&time, chunk, labels)?),
            )
            .await?;
        }
        Ok(())
    }

    async fn write_group(
        &self,
        schema: &StoreSchema,
        last_updated: Option<chrono::DateTime<Utc>>,
    ) -> ConversionResult<()> {
        let mut arrays: BTreeMap<String, Value> = BTreeMap::new();
        for array in schema.arrays.values() {
            arrays.insert(array.name.clone(), schema::array_metadata(schema, array)?);
        }
        let mut attributes = schema.group_attributes(last_updated);
        if last_updated.is_none() {
            // Keep the last consolidation time when only metadata changes.
            if let Some(manifest) = load_manifest(&self.storage, &schema.name).await? {
                attributes.insert(
                    "last_updated".to_string(),
                    json!(format_timestamp(manifest.updated_at)),
                );
            }
        }
        let group = schema::group_metadata(attributes, &arrays);
        self.storage
            .put(
                &format!("{}/zarr.json", schema.name),
                to_json_bytes(&serde_json::to_value(&group)?)?,
            )
            .await
    }

    /// Create an object, or confirm an existing one is byte-identical.
    async fn create_or_compare(&self, store: &str, path: &str, data: Bytes) -> ConversionResult<()> {
        match self.storage.put_if_absent(path, data.clone()).await? {
            CreateOutcome::Created => Ok(()),
            CreateOutcome::Exists(existing) if existing == data => Ok(()),
            CreateOutcome::Exists(_) => Err(ConversionError::schema_mismatch(
                store,
                format!("{} already exists with different content", path),
            )),
        }
    }
}

fn time_coordinate(schema: &StoreSchema) -> ConversionResult<Array<()>> {
    schema::coordinate_array(
        &schema.name,
        "time",
        ZarrType::Int64,
        schema.time.len,
        schema.chunk_length,
        attributes(json!({
            "units": schema.time.units(),
            "calendar": "proleptic_gregorian",
        })),
    )
}

fn attributes(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn level_long_name(kind: LevelKind) -> &'static str {
    match kind {
        LevelKind::Pressure => "pressure_level",
        LevelKind::Model => "model_level_number",
        LevelKind::Surface => "surface",
    }
}

fn to_json_bytes(doc: &Value) -> ConversionResult<Bytes> {
    Ok(Bytes::from(serde_json::to_vec_pretty(doc)?))
}
