//! Read-time union of stores, and optional materialization.
//!
//! A merge never copies data. It records, per store, the offset of the
//! shared time axis into the store's own axis and reads through to the
//! constituent chunks. Level subsetting is only applied when a merged
//! dataset is materialized into a new store.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument};

use chunk_store::{ArraySchema, Compression, Manifest, StoreReader, StoreSchema, StoreWriter, WriteOutcome};
use era5_common::{ConversionError, ConversionResult, TimeAxis};

/// One constituent store of a merge.
#[derive(Debug, Clone)]
pub struct MergedStore {
    pub schema: StoreSchema,
    /// Index of the merged axis start on this store's axis.
    pub offset: u64,
    /// Consolidated metadata version observed at merge time.
    pub version: u64,
    /// Chunk indices present per array at merge time.
    pub chunks: BTreeMap<String, BTreeMap<u64, u64>>,
}

/// A union of stores sharing one time coordinate.
pub struct MergedDataset {
    reader: Arc<StoreReader>,
    axis: TimeAxis,
    stores: Vec<MergedStore>,
    /// Variable name → index into `stores`.
    variables: BTreeMap<String, usize>,
}

/// Merge the named stores.
///
/// Time axes must be identical or contain the narrowest axis as a
/// contiguous run; the merged axis is the narrowest. A variable may appear
/// in several stores only with the same grid, dtype and levels; the first
/// store listed serves it.
#[instrument(skip(reader))]
pub async fn merge(reader: Arc<StoreReader>, stores: &[String]) -> ConversionResult<MergedDataset> {
    if stores.is_empty() {
        return Err(ConversionError::configuration("merge needs at least one store"));
    }

    let mut loaded = Vec::with_capacity(stores.len());
    for name in stores {
        let version = reader.version(name).await?;
        let schema = reader.schema(name).await?;
        loaded.push((schema, version));
    }

    let axis = loaded
        .iter()
        .map(|(schema, _)| schema.time)
        .min_by_key(|axis| axis.len)
        .ok_or_else(|| ConversionError::configuration("merge needs at least one store"))?;

    let mut merged_stores: Vec<MergedStore> = Vec::with_capacity(loaded.len());
    let mut variables: BTreeMap<String, usize> = BTreeMap::new();
    for (schema, version) in loaded {
        let offset = schema.time.contains_subrange(&axis).ok_or_else(|| {
            ConversionError::incompatible_axes(
                "time",
                format!(
                    "store {} has {} steps of {}h from {}, which do not contain {} steps of {}h from {}",
                    schema.name,
                    schema.time.len,
                    schema.time.resolution_hours,
                    schema.time.start,
                    axis.len,
                    axis.resolution_hours,
                    axis.start
                ),
            )
        })?;

        for (name, array) in &schema.arrays {
            match variables.get(name) {
                Some(&owner) => {
                    let first = &merged_stores[owner].schema;
                    check_collision(name, &first.name, &first.arrays[name], &schema.name, array)?;
                }
                None => {
                    variables.insert(name.clone(), merged_stores.len());
                }
            }
        }

        merged_stores.push(MergedStore {
            chunks: BTreeMap::new(),
            schema,
            offset,
            version,
        });
    }

    for store in &mut merged_stores {
        store.chunks = reader.chunk_presence(&store.schema).await?;
    }

    let dataset = MergedDataset {
        reader,
        axis,
        stores: merged_stores,
        variables,
    };
    dataset.verify_unchanged().await?;

    info!(
        stores = dataset.stores.len(),
        variables = dataset.variables.len(),
        steps = axis.len,
        "Stores merged"
    );
    Ok(dataset)
}

fn check_collision(
    name: &str,
    first_store: &str,
    first: &ArraySchema,
    second_store: &str,
    second: &ArraySchema,
) -> ConversionResult<()> {
    let collision = |what: &str, a: String, b: String| ConversionError::VariableCollision {
        variable: name.to_string(),
        reason: format!(
            "{} is {} in {} but {} in {}",
            what, a, first_store, b, second_store
        ),
    };
    if first.grid != second.grid {
        return Err(collision("grid", first.grid.to_string(), second.grid.to_string()));
    }
    if first.dtype != second.dtype {
        return Err(collision(
            "dtype",
            first.dtype.zarr_name().to_string(),
            second.dtype.zarr_name().to_string(),
        ));
    }
    if first.levels != second.levels {
        return Err(collision(
            "level set",
            format!("{:?}", first.levels.levels),
            format!("{:?}", second.levels.levels),
        ));
    }
    Ok(())
}

/// Options for writing a merged dataset to a new store.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializeOptions {
    /// Variables to copy; all when `None`.
    pub variables: Option<Vec<String>>,
    /// Levels kept for multi-level variables; all when `None`.
    pub levels: Option<Vec<u32>>,
    pub chunk_length: u64,
    pub compression: Compression,
}

/// Outcome of a materialization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaterializeReport {
    pub store: String,
    pub chunks_written: u64,
    pub chunks_unchanged: u64,
    /// Chunks with no source data, left absent.
    pub chunks_empty: u64,
    pub version: u64,
}

impl MergedDataset {
    /// The shared time axis.
    pub fn axis(&self) -> &TimeAxis {
        &self.axis
    }

    pub fn stores(&self) -> &[MergedStore] {
        &self.stores
    }

    /// Variable names and the store serving each.
    pub fn variables(&self) -> impl Iterator<Item = (&str, &str)> {
        self.variables
            .iter()
            .map(|(name, &idx)| (name.as_str(), self.stores[idx].schema.name.as_str()))
    }

    /// Schema of a merged variable.
    pub fn array(&self, variable: &str) -> ConversionResult<&ArraySchema> {
        self.locate(variable)?
            .schema
            .arrays
            .get(variable)
            .ok_or_else(|| {
                ConversionError::configuration(format!("variable {} not in merged dataset", variable))
            })
    }

    fn locate(&self, variable: &str) -> ConversionResult<&MergedStore> {
        let idx = *self.variables.get(variable).ok_or_else(|| {
            ConversionError::configuration(format!("variable {} not in merged dataset", variable))
        })?;
        Ok(&self.stores[idx])
    }

    /// One time step of a variable on the merged axis; NaN where absent.
    pub async fn read_time_step(&self, variable: &str, time_index: u64) -> ConversionResult<Vec<f32>> {
        if time_index >= self.axis.len {
            return Err(ConversionError::incompatible_axes(
                "time",
                format!("index {} beyond {} merged steps", time_index, self.axis.len),
            ));
        }
        let store = self.locate(variable)?;
        self.reader
            .read_time_step(&store.schema, variable, time_index + store.offset)
            .await
    }

    /// Fail with `ConcurrentModification` if any store was consolidated
    /// again since the merge.
    pub async fn verify_unchanged(&self) -> ConversionResult<()> {
        for store in &self.stores {
            let now = self.reader.version(&store.schema.name).await?;
            if now != store.version {
                return Err(ConversionError::ConcurrentModification {
                    store: store.schema.name.clone(),
                    before: store.version,
                    after: now,
                });
            }
        }
        Ok(())
    }

    /// Write the merged dataset, or a level subset of it, to `target`.
    #[instrument(skip(self, writer, options), fields(target = %target))]
    pub async fn materialize(
        &self,
        writer: &StoreWriter,
        target: &str,
        options: &MaterializeOptions,
    ) -> ConversionResult<MaterializeReport> {
        if self.stores.iter().any(|s| s.schema.name == target) {
            return Err(ConversionError::configuration(format!(
                "cannot materialize into source store {}",
                target
            )));
        }

        let names: Vec<String> = match &options.variables {
            Some(names) => names.clone(),
            None => self.variables.keys().cloned().collect(),
        };

        let mut schema = StoreSchema::new(target, self.axis, options.chunk_length, options.compression);
        let mut selections = Vec::with_capacity(names.len());
        for name in &names {
            let source = self.array(name)?;
            let (array, level_indices) = match &options.levels {
                Some(levels) if !source.levels.is_single_level() => {
                    let subset = source.levels.subset(levels)?;
                    let indices = subset
                        .levels
                        .iter()
                        .filter_map(|l| source.levels.index_of(*l))
                        .collect::<Vec<_>>();
                    (source.with_levels(subset), Some(indices))
                }
                _ => (source.clone(), None),
            };
            schema = schema.with_array(array);
            selections.push((name.clone(), source.clone(), level_indices));
        }
        let schema = writer.ensure_metadata(&schema).await?;

        let mut report = MaterializeReport {
            store: target.to_string(),
            chunks_written: 0,
            chunks_unchanged: 0,
            chunks_empty: 0,
            version: 0,
        };
        for (name, source, level_indices) in &selections {
            let horizontal = source.grid.value_count();
            let out_field_len = schema.arrays[name].field_len();
            for chunk_index in 0..schema.chunk_count() {
                let start = chunk_index * schema.chunk_length;
                let end = (start + schema.chunk_length).min(self.axis.len);
                let mut values = Vec::with_capacity(schema.chunk_length as usize * out_field_len);
                for t in start..end {
                    let field = self.read_time_step(name, t).await?;
                    match level_indices {
                        Some(indices) => {
                            for &i in indices {
                                values.extend_from_slice(&field[i * horizontal..(i + 1) * horizontal]);
                            }
                        }
                        None => values.extend_from_slice(&field),
                    }
                }
                values.resize(schema.chunk_length as usize * out_field_len, f32::NAN);

                if values.iter().all(|v| v.is_nan()) {
                    report.chunks_empty += 1;
                    continue;
                }
                match writer.write_chunk(&schema, name, chunk_index, values).await? {
                    WriteOutcome::Unchanged => report.chunks_unchanged += 1,
                    _ => report.chunks_written += 1,
                }
                debug!(variable = %name, chunk_index, "Materialized chunk");
            }
        }

        self.verify_unchanged().await?;
        let manifest: Manifest = writer.consolidate(target).await?;
        report.version = manifest.version;
        info!(
            written = report.chunks_written,
            empty = report.chunks_empty,
            "Merged dataset materialized"
        );
        Ok(report)
    }
}
