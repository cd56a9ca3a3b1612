//! The locate → normalize → assemble → write pipeline.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use chunk_store::{ArraySchema, Manifest, StoreSchema, StoreWriter, WriteOutcome};
use era5_common::{
    ConversionError, ConversionResult, Coordinate, DateRange, ErrorScope, TimeAxis, Variable,
    VariableCatalog,
};
use regrid::Regridder;

use crate::assembler::{ChunkAssembler, CompletedChunk};
use crate::config::{ConversionConfig, GroupConfig, MissingPolicy};
use crate::locator::{CoordinateSpace, Plan, PlanEntry};
use crate::normalizer::GridNormalizer;
use crate::source::RecordSource;

/// Records fetched ahead of the assembler per variable.
const FETCH_CONCURRENCY: usize = 8;

/// Error messages kept per group report.
const MAX_REPORTED_ERRORS: usize = 20;

/// Coordinate and chunk accounting for one variable group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupReport {
    /// Coordinates normalized and assembled.
    pub succeeded: u64,
    /// Missing records tolerated as gaps.
    pub gapped: u64,
    /// Coordinates that failed to decode or were missing under escalation.
    pub failed: u64,
    pub chunks_written: u64,
    pub chunks_unchanged: u64,
    /// Chunks already present and not revisited.
    pub chunks_skipped: u64,
    /// Chunks left unwritten because a coordinate failed.
    pub chunks_failed: u64,
    /// Partitions aborted by a store level error.
    pub partitions_failed: u64,
    pub errors: Vec<String>,
}

impl GroupReport {
    fn record_error(&mut self, err: &ConversionError) {
        if self.errors.len() < MAX_REPORTED_ERRORS {
            self.errors.push(format!("{}: {}", err.kind(), err));
        }
    }

    fn absorb(&mut self, other: GroupReport) {
        self.succeeded += other.succeeded;
        self.gapped += other.gapped;
        self.failed += other.failed;
        self.chunks_written += other.chunks_written;
        self.chunks_unchanged += other.chunks_unchanged;
        self.chunks_skipped += other.chunks_skipped;
        self.chunks_failed += other.chunks_failed;
        self.partitions_failed += other.partitions_failed;
        for e in other.errors {
            if self.errors.len() < MAX_REPORTED_ERRORS {
                self.errors.push(e);
            }
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.chunks_failed == 0 && self.partitions_failed == 0
    }
}

/// Outcome of a conversion run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub groups: BTreeMap<String, GroupReport>,
}

impl RunReport {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            groups: BTreeMap::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.groups.values().all(GroupReport::is_success)
    }

    /// Chunks that received new content.
    pub fn chunks_written(&self) -> u64 {
        self.groups.values().map(|g| g.chunks_written).sum()
    }
}

/// A scheduled coordinate with no record in the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingCoordinate {
    pub group: String,
    pub variable: String,
    pub coordinate: Coordinate,
}

/// Drives conversion of configured variable groups into stores.
pub struct Converter {
    config: Arc<ConversionConfig>,
    catalog: VariableCatalog,
    normalizer: GridNormalizer,
    writer: Arc<StoreWriter>,
    run_id: Uuid,
}

impl Converter {
    /// Validate the configuration and prepare a converter.
    ///
    /// Any configuration problem is reported here, before work starts.
    pub fn new(
        config: ConversionConfig,
        source: Arc<dyn RecordSource>,
        writer: Arc<StoreWriter>,
    ) -> ConversionResult<Self> {
        config.validate()?;
        let catalog = config.catalog()?;
        Ok(Self {
            config: Arc::new(config),
            catalog,
            normalizer: GridNormalizer::new(source),
            writer,
            run_id: Uuid::new_v4(),
        })
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    pub fn catalog(&self) -> &VariableCatalog {
        &self.catalog
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn plan(&self) -> ConversionResult<Plan> {
        Plan::build(&self.config)
    }

    /// The store schema a group writes: its time axis and chunking, and
    /// one array per variable on the output grid and levels.
    pub fn requested_schema(&self, group_id: &str) -> ConversionResult<StoreSchema> {
        let group = self.config.group(group_id)?;
        let axis = TimeAxis::from_date_range(&group.date_range, group.time_resolution_hours)?;
        let mut schema = StoreSchema::new(
            group.store_name(group_id),
            axis,
            group.chunk_length,
            self.config.compression,
        );
        for variable in self.catalog.group(group_id) {
            let mut array = ArraySchema::from_variable(&variable);
            array.grid = group.output_grid(&variable).clone();
            array.levels = group.output_levels(&variable)?;
            schema = schema.with_array(array);
        }
        Ok(schema)
    }

    /// Create or validate the metadata of every configured store.
    #[instrument(skip(self), fields(run_id = %self.run_id))]
    pub async fn init(&self) -> ConversionResult<BTreeMap<String, StoreSchema>> {
        let mut schemas = BTreeMap::new();
        for id in self.config.groups.keys() {
            let schema = self.writer.ensure_metadata(&self.requested_schema(id)?).await?;
            schemas.insert(id.clone(), schema);
        }
        Ok(schemas)
    }

    /// Convert every partition of the plan, then consolidate each store.
    #[instrument(skip(self), fields(run_id = %self.run_id))]
    pub async fn run(&self) -> ConversionResult<RunReport> {
        let schemas = self.init().await?;
        let plan = self.plan()?;
        info!(partitions = plan.len(), parallelism = self.config.parallelism, "Starting conversion");

        let mut report = RunReport::new(self.run_id);
        for id in self.config.groups.keys() {
            report.groups.insert(id.clone(), GroupReport::default());
        }

        let results: Vec<(String, ConversionResult<GroupReport>)> = stream::iter(plan.entries.iter())
            .map(|entry| {
                let schemas = &schemas;
                async move {
                    let result = match schemas.get(&entry.group) {
                        Some(schema) => self.process_entry(entry, schema).await,
                        None => Err(ConversionError::configuration(format!(
                            "unknown group {}",
                            entry.group
                        ))),
                    };
                    (entry.group.clone(), result)
                }
            })
            .buffer_unordered(self.config.parallelism)
            .collect()
            .await;

        for (group, result) in results {
            let group_report = report.groups.entry(group.clone()).or_default();
            match result {
                Ok(partial) => group_report.absorb(partial),
                Err(e) => {
                    error!(group = %group, error = %e, "Partition aborted");
                    group_report.partitions_failed += 1;
                    group_report.record_error(&e);
                }
            }
        }

        let stores: BTreeSet<&str> = schemas.values().map(|s| s.name.as_str()).collect();
        for store in stores {
            self.writer.consolidate(store).await?;
        }

        info!(
            written = report.chunks_written(),
            success = report.is_success(),
            "Conversion finished"
        );
        Ok(report)
    }

    /// Convert one plan entry without consolidating.
    ///
    /// Safe to repeat: finished chunks are skipped or rewritten
    /// identically.
    #[instrument(skip(self), fields(run_id = %self.run_id))]
    pub async fn run_partition(&self, index: usize) -> ConversionResult<RunReport> {
        let plan = self.plan()?;
        let entry = plan.get(index)?;
        let schema = self
            .writer
            .ensure_metadata(&self.requested_schema(&entry.group)?)
            .await?;

        let mut report = RunReport::new(self.run_id);
        let group_report = self.process_entry(entry, &schema).await?;
        report.groups.insert(entry.group.clone(), group_report);
        Ok(report)
    }

    /// Consolidate every configured store.
    pub async fn consolidate(&self) -> ConversionResult<BTreeMap<String, Manifest>> {
        let stores: BTreeSet<&str> = self
            .config
            .groups
            .iter()
            .map(|(id, g)| g.store_name(id))
            .collect();
        let mut manifests = BTreeMap::new();
        for store in stores {
            manifests.insert(store.to_string(), self.writer.consolidate(store).await?);
        }
        Ok(manifests)
    }

    /// Extend a group's store to the configured date range.
    #[instrument(skip(self))]
    pub async fn resize(&self, group_id: &str) -> ConversionResult<StoreSchema> {
        let group = self.config.group(group_id)?;
        let store = group.store_name(group_id);
        let axis = TimeAxis::from_date_range(&group.date_range, group.time_resolution_hours)?;
        let existing = self.writer.existing_schema(store).await?.ok_or_else(|| {
            ConversionError::configuration(format!("store {} has not been initialized", store))
        })?;
        if existing.time.start != axis.start
            || existing.time.resolution_hours != axis.resolution_hours
        {
            return Err(ConversionError::configuration(format!(
                "store {} starts at {} every {}h; group {} starts at {} every {}h",
                store,
                existing.time.start,
                existing.time.resolution_hours,
                group_id,
                axis.start,
                axis.resolution_hours
            )));
        }
        self.writer.resize_time_axis(store, axis.len).await
    }

    /// Every scheduled coordinate whose record is absent, without writing.
    #[instrument(skip(self))]
    pub async fn find_missing(
        &self,
        group_id: Option<&str>,
    ) -> ConversionResult<Vec<MissingCoordinate>> {
        let ids: Vec<&String> = match group_id {
            Some(id) => vec![self.config.groups.get_key_value(id).map(|(k, _)| k).ok_or_else(
                || ConversionError::configuration(format!("unknown group {}", id)),
            )?],
            None => self.config.groups.keys().collect(),
        };

        let mut missing = Vec::new();
        for id in ids {
            let group = self.config.group(id)?;
            for variable in self.catalog.group(id) {
                let space = self.coordinate_space(group, &variable)?;
                let absent: Vec<Coordinate> = stream::iter(space.coordinates())
                    .map(|c| {
                        let variable = &variable;
                        async move {
                            match self.normalizer.locate(variable, &c).await {
                                Ok(_) => Ok(None),
                                Err(ConversionError::MissingRecord { .. }) => Ok(Some(c)),
                                Err(e) => Err(e),
                            }
                        }
                    })
                    .buffered(FETCH_CONCURRENCY * 4)
                    .collect::<Vec<ConversionResult<Option<Coordinate>>>>()
                    .await
                    .into_iter()
                    .collect::<ConversionResult<Vec<_>>>()?
                    .into_iter()
                    .flatten()
                    .collect();

                if !absent.is_empty() {
                    warn!(group = %id, variable = %variable.name, count = absent.len(), "Missing records");
                }
                missing.extend(absent.into_iter().map(|coordinate| MissingCoordinate {
                    group: id.clone(),
                    variable: variable.name.clone(),
                    coordinate,
                }));
            }
        }
        Ok(missing)
    }

    fn coordinate_space(
        &self,
        group: &GroupConfig,
        variable: &Variable,
    ) -> ConversionResult<CoordinateSpace> {
        CoordinateSpace::new(
            &group.date_range,
            group.time_resolution_hours,
            group.schedule(),
            group.output_levels(variable)?,
        )
    }

    #[instrument(skip(self, entry, schema), fields(group = %entry.group, partition = entry.index))]
    async fn process_entry(
        &self,
        entry: &PlanEntry,
        schema: &StoreSchema,
    ) -> ConversionResult<GroupReport> {
        let group = self.config.group(&entry.group)?;
        let mut report = GroupReport::default();
        for variable in self.catalog.group(&entry.group) {
            self.process_variable(group, variable, entry, schema, &mut report)
                .await?;
        }
        info!(
            succeeded = report.succeeded,
            gapped = report.gapped,
            failed = report.failed,
            written = report.chunks_written,
            "Partition finished"
        );
        Ok(report)
    }

    async fn process_variable(
        &self,
        group: &GroupConfig,
        variable: Arc<Variable>,
        entry: &PlanEntry,
        schema: &StoreSchema,
        report: &mut GroupReport,
    ) -> ConversionResult<()> {
        let space = self.coordinate_space(group, &variable)?;
        let output_grid = group.output_grid(&variable);
        let regridder = match &group.regrid {
            Some(_) => Some(Arc::new(Regridder::new(&variable.grid, output_grid)?)),
            None => None,
        };
        let field_len = output_grid.value_count();
        let step = group.schedule().step;

        for chunk_index in entry.partition.chunks() {
            if !self.config.force
                && self
                    .writer
                    .chunk_exists(schema, &variable.name, chunk_index)
                    .await?
            {
                debug!(variable = %variable.name, chunk_index, "Chunk present, skipping");
                report.chunks_skipped += 1;
                continue;
            }

            let mut assembler = ChunkAssembler::new(
                space.clone(),
                group.chunk_length,
                field_len,
                chunk_index..chunk_index + 1,
            )?;
            let mut fields = stream::iter(space.chunk_coordinates(group.chunk_length, chunk_index))
                .map(|coordinate| {
                    let variable = Arc::clone(&variable);
                    let regridder = regridder.clone();
                    async move {
                        let result = self.fetch(variable, coordinate, step, regridder).await;
                        (coordinate, result)
                    }
                })
                .buffered(FETCH_CONCURRENCY);

            while let Some((coordinate, result)) = fields.next().await {
                let completed = match result {
                    Ok(values) => {
                        report.succeeded += 1;
                        metrics::counter!("conversion_coordinates", "outcome" => "succeeded")
                            .increment(1);
                        assembler.push(&coordinate, &values)?
                    }
                    Err(ConversionError::MissingRecord { .. })
                        if tolerates_missing(group.missing, &group.date_range, coordinate.time) =>
                    {
                        report.gapped += 1;
                        metrics::counter!("conversion_coordinates", "outcome" => "gapped")
                            .increment(1);
                        debug!(variable = %variable.name, %coordinate, "Tolerated missing record");
                        assembler.mark_gap(&coordinate)?
                    }
                    Err(e) if e.scope() == ErrorScope::Coordinate => {
                        report.failed += 1;
                        report.record_error(&e);
                        metrics::counter!("conversion_coordinates", "outcome" => "failed")
                            .increment(1);
                        warn!(variable = %variable.name, %coordinate, error = %e, "Coordinate failed");
                        assembler.mark_failed(&coordinate)?
                    }
                    Err(e) => return Err(e),
                };
                self.write_completed(schema, &variable.name, completed, report)
                    .await?;
            }
            let rest = assembler.finish()?;
            self.write_completed(schema, &variable.name, rest, report)
                .await?;
        }
        Ok(())
    }

    async fn fetch(
        &self,
        variable: Arc<Variable>,
        coordinate: Coordinate,
        step: u32,
        regridder: Option<Arc<Regridder>>,
    ) -> ConversionResult<Vec<f32>> {
        let values = self.normalizer.fetch(variable, coordinate, step).await?;
        match regridder {
            Some(regridder) if !regridder.is_identity() => {
                tokio::task::spawn_blocking(move || regridder.apply(&values))
                    .await
                    .map_err(|e| ConversionError::storage(format!("regrid task failed: {}", e)))?
            }
            _ => Ok(values),
        }
    }

    async fn write_completed(
        &self,
        schema: &StoreSchema,
        variable: &str,
        chunks: Vec<CompletedChunk>,
        report: &mut GroupReport,
    ) -> ConversionResult<()> {
        for chunk in chunks {
            if !chunk.is_writable() {
                report.chunks_failed += 1;
                warn!(
                    variable,
                    chunk_index = chunk.chunk_index,
                    failed = chunk.failed,
                    "Chunk left unwritten"
                );
                continue;
            }
            match self
                .writer
                .write_chunk(schema, variable, chunk.chunk_index, chunk.values)
                .await?
            {
                WriteOutcome::Unchanged => report.chunks_unchanged += 1,
                WriteOutcome::Created | WriteOutcome::Overwritten => {
                    report.chunks_written += 1
                }
            }
        }
        Ok(())
    }
}

/// Whether a missing record at `time` is a tolerated gap.
pub fn tolerates_missing(policy: MissingPolicy, range: &DateRange, time: DateTime<Utc>) -> bool {
    match policy {
        MissingPolicy::Escalate => false,
        MissingPolicy::Tolerate => true,
        MissingPolicy::Edges { hours } => {
            let margin = Duration::hours(hours as i64);
            time < range.start_time() + margin || time >= range.end_time_exclusive() - margin
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    #[test]
    fn test_missing_policy() {
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2020, 1, 10).unwrap(),
        );
        let at = |d: u32, h: u32| Utc.with_ymd_and_hms(2020, 1, d, h, 0, 0).unwrap();
        let edges = MissingPolicy::Edges { hours: 6 };

        assert!(!tolerates_missing(MissingPolicy::Escalate, &range, at(1, 0)));
        assert!(tolerates_missing(MissingPolicy::Tolerate, &range, at(5, 0)));
        assert!(tolerates_missing(edges, &range, at(1, 5)));
        assert!(!tolerates_missing(edges, &range, at(1, 6)));
        assert!(!tolerates_missing(edges, &range, at(10, 17)));
        assert!(tolerates_missing(edges, &range, at(10, 18)));
    }

    #[test]
    fn test_report_absorb_caps_errors() {
        let mut total = GroupReport::default();
        for _ in 0..3 {
            let mut partial = GroupReport {
                succeeded: 5,
                chunks_written: 1,
                ..Default::default()
            };
            for _ in 0..10 {
                partial.record_error(&ConversionError::configuration("x"));
            }
            total.absorb(partial);
        }
        assert_eq!(total.succeeded, 15);
        assert_eq!(total.chunks_written, 3);
        assert_eq!(total.errors.len(), MAX_REPORTED_ERRORS);
        assert!(total.is_success());
    }
}
