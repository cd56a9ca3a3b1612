//! Read access to stores: schema discovery, manifests and cached chunks.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, instrument};
use zarrs::array::Array;

use era5_common::{ConversionError, ConversionResult};

use crate::cache::{CacheStats, ChunkCache};
use crate::codec::{self, chunk_indices};
use crate::manifest::{Manifest, MANIFEST_FILE};
use crate::schema::{self, StoreSchema};
use crate::storage::ObjectStorage;

/// Object key of a time chunk under the array's chunk key encoding.
///
/// Only the time axis is split, so the key is `c/{t}/0/...` below the
/// array path.
pub fn chunk_key<T: ?Sized>(array: &Array<T>, chunk_index: u64) -> String {
    array
        .chunk_key(&chunk_indices(array, chunk_index))
        .as_str()
        .to_string()
}

/// Discover a store's schema from its array metadata documents.
///
/// Returns `None` when the store holds no data arrays yet.
pub async fn load_schema(
    storage: &ObjectStorage,
    store: &str,
) -> ConversionResult<Option<StoreSchema>> {
    let mut found: Option<StoreSchema> = None;

    for name in storage.list_dirs(store).await? {
        let Some(bytes) = storage.get_opt(&format!("{}/{}/zarr.json", store, name)).await? else {
            continue;
        };
        let doc: serde_json::Value = serde_json::from_slice(&bytes)?;
        let Some((array, time, chunk_length, compression)) =
            schema::parse_array_metadata(store, &name, &doc)?
        else {
            continue;
        };

        match &mut found {
            None => {
                found = Some(
                    StoreSchema::new(store, time, chunk_length, compression).with_array(array),
                );
            }
            Some(existing) => {
                if existing.time != time
                    || existing.chunk_length != chunk_length
                    || existing.compression != compression
                {
                    return Err(ConversionError::schema_mismatch(
                        store,
                        format!("array {} disagrees on time axis or chunking", name),
                    ));
                }
                existing.arrays.insert(array.name.clone(), array);
            }
        }
    }

    Ok(found)
}

/// Read the consolidated manifest, if the store has been consolidated.
pub async fn load_manifest(
    storage: &ObjectStorage,
    store: &str,
) -> ConversionResult<Option<Manifest>> {
    match storage.get_opt(&format!("{}/{}", store, MANIFEST_FILE)).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Cached reader over one storage backend.
pub struct StoreReader {
    storage: ObjectStorage,
    cache: Mutex<ChunkCache>,
}

impl StoreReader {
    pub fn new(storage: ObjectStorage, cache_bytes: usize) -> Self {
        Self {
            storage,
            cache: Mutex::new(ChunkCache::new(cache_bytes)),
        }
    }

    pub fn storage(&self) -> &ObjectStorage {
        &self.storage
    }

    /// Schema of an existing store.
    pub async fn schema(&self, store: &str) -> ConversionResult<StoreSchema> {
        load_schema(&self.storage, store)
            .await?
            .ok_or_else(|| ConversionError::schema_mismatch(store, "store has no arrays"))
    }

    pub async fn manifest(&self, store: &str) -> ConversionResult<Option<Manifest>> {
        load_manifest(&self.storage, store).await
    }

    /// Consolidated metadata version; 0 for never-consolidated stores.
    pub async fn version(&self, store: &str) -> ConversionResult<u64> {
        Ok(self.manifest(store).await?.map(|m| m.version).unwrap_or(0))
    }

    /// Read and decode a whole chunk, `None` if it was never written.
    #[instrument(skip(self, schema), fields(store = %schema.name))]
    pub async fn read_chunk(
        &self,
        schema: &StoreSchema,
        array: &str,
        chunk_index: u64,
    ) -> ConversionResult<Option<Arc<Vec<f32>>>> {
        let key = (schema.name.clone(), array.to_string(), chunk_index);
        let cached = self.lock_cache().get(&key);
        if cached.is_some() {
            return Ok(cached);
        }

        let array_schema = schema.arrays.get(array).ok_or_else(|| {
            ConversionError::schema_mismatch(&schema.name, format!("unknown array {}", array))
        })?;
        let zarr_array = schema::data_array(schema, array_schema)?;
        let Some(bytes) = self.storage.get_opt(&chunk_key(&zarr_array, chunk_index)).await? else {
            return Ok(None);
        };

        let dtype = array_schema.dtype;
        let values = tokio::task::spawn_blocking(move || {
            codec::decode_chunk(&zarr_array, chunk_index, &bytes, dtype)
        })
        .await
        .map_err(|e| ConversionError::storage(format!("decode task failed: {}", e)))??;
        let values = Arc::new(values);

        debug!(array, chunk_index, len = values.len(), "Loaded chunk");
        self.lock_cache().insert(key, Arc::clone(&values));
        Ok(Some(values))
    }

    /// The field of one array at one time index; NaN where no chunk exists.
    pub async fn read_time_step(
        &self,
        schema: &StoreSchema,
        array: &str,
        time_index: u64,
    ) -> ConversionResult<Vec<f32>> {
        let array_schema = schema.arrays.get(array).ok_or_else(|| {
            ConversionError::schema_mismatch(&schema.name, format!("unknown array {}", array))
        })?;
        if time_index >= schema.time.len {
            return Err(ConversionError::incompatible_axes(
                "time",
                format!(
                    "index {} beyond {} steps in {}",
                    time_index, schema.time.len, schema.name
                ),
            ));
        }
        let field_len = array_schema.field_len();
        let chunk_index = time_index / schema.chunk_length;
        let offset = (time_index % schema.chunk_length) as usize * field_len;

        match self.read_chunk(schema, array, chunk_index).await? {
            Some(chunk) => chunk
                .get(offset..offset + field_len)
                .map(|s| s.to_vec())
                .ok_or_else(|| {
                    ConversionError::storage(format!(
                        "chunk {} of {}/{} is shorter than its schema",
                        chunk_index, schema.name, array
                    ))
                }),
            None => Ok(vec![f32::NAN; field_len]),
        }
    }

    /// Present chunk indices per array, by listing.
    pub async fn chunk_presence(
        &self,
        schema: &StoreSchema,
    ) -> ConversionResult<BTreeMap<String, BTreeMap<u64, u64>>> {
        let mut presence = BTreeMap::new();
        for name in schema.arrays.keys() {
            presence.insert(name.clone(), list_chunks(&self.storage, &schema.name, name).await?);
        }
        Ok(presence)
    }

    /// Drop cached chunks of a store.
    pub fn invalidate(&self, store: &str) {
        self.lock_cache().invalidate_store(store);
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.lock_cache().stats()
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, ChunkCache> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Chunk index → object size for one array.
pub(crate) async fn list_chunks(
    storage: &ObjectStorage,
    store: &str,
    array: &str,
) -> ConversionResult<BTreeMap<u64, u64>> {
    let prefix = format!("{}/{}/c", store, array);
    let mut chunks = BTreeMap::new();
    for (path, size) in storage.list(&prefix).await? {
        let index = path
            .strip_prefix(&prefix)
            .and_then(|rest| rest.trim_start_matches('/').split('/').next())
            .and_then(|t| t.parse::<u64>().ok());
        if let Some(index) = index {
            chunks.insert(index, size);
        }
    }
    Ok(chunks)
}
