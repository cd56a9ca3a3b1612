//! Conversion configuration: storage, sources and variable groups.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use chunk_store::{Compression, StorageConfig};
use era5_common::{
    pressure_level_group, ConversionError, ConversionResult, DateRange, Grid, LevelSet, Schedule,
    Variable, VariableCatalog,
};

/// What to do when a scheduled record is absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum MissingPolicy {
    /// Every missing record fails its coordinate.
    #[default]
    Escalate,
    /// Missing records become NaN gaps.
    Tolerate,
    /// Missing records are gaps only within `hours` of either end of the
    /// date range.
    Edges { hours: u32 },
}

/// Levels kept when regridding, by group name or explicit list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LevelSelection {
    Named(String),
    List(Vec<u32>),
}

impl LevelSelection {
    pub fn resolve(&self) -> ConversionResult<Vec<u32>> {
        match self {
            LevelSelection::Named(name) => pressure_level_group(name)
                .map(|levels| levels.to_vec())
                .ok_or_else(|| {
                    ConversionError::configuration(format!("unknown level group {}", name))
                }),
            LevelSelection::List(levels) => Ok(levels.clone()),
        }
    }
}

/// Analysis-ready output: regrid to `target`, optionally on a subset of
/// levels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegridConfig {
    pub target: Grid,
    #[serde(default)]
    pub levels: Option<LevelSelection>,
}

/// How record files are split on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileLayout {
    /// `{yyyy}/{yyyymmdd}_{group}.rec`
    #[default]
    Daily,
    /// `{yyyy}/{yyyymm}_{group}.rec`
    Monthly,
}

/// One variable group: variables sharing a store, date range and schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupConfig {
    /// Output store name; defaults to the group id.
    #[serde(default)]
    pub store: Option<String>,
    pub variables: Vec<Variable>,
    pub date_range: DateRange,
    /// Record hours; every step of the time axis when absent.
    #[serde(default)]
    pub schedule: Option<Schedule>,
    #[serde(default = "default_time_resolution")]
    pub time_resolution_hours: u32,
    #[serde(default = "default_chunk_length")]
    pub chunk_length: u64,
    /// Chunks per work partition.
    #[serde(default = "default_chunks_per_partition")]
    pub chunks_per_partition: u64,
    #[serde(default)]
    pub missing: MissingPolicy,
    #[serde(default)]
    pub regrid: Option<RegridConfig>,
    #[serde(default)]
    pub layout: FileLayout,
}

fn default_time_resolution() -> u32 {
    1
}

fn default_chunk_length() -> u64 {
    48
}

fn default_chunks_per_partition() -> u64 {
    1
}

impl GroupConfig {
    pub fn store_name<'a>(&'a self, id: &'a str) -> &'a str {
        self.store.as_deref().unwrap_or(id)
    }

    pub fn schedule(&self) -> Schedule {
        self.schedule
            .clone()
            .unwrap_or_else(|| Schedule::every(self.time_resolution_hours))
    }

    /// Levels written for a variable: its own, or the regrid subset.
    pub fn output_levels(&self, variable: &Variable) -> ConversionResult<LevelSet> {
        match self.regrid.as_ref().and_then(|r| r.levels.as_ref()) {
            Some(selection) if !variable.is_single_level() => {
                variable.levels.subset(&selection.resolve()?)
            }
            _ => Ok(variable.levels.clone()),
        }
    }

    /// Grid written for a variable: native, or the regrid target.
    pub fn output_grid<'a>(&'a self, variable: &'a Variable) -> &'a Grid {
        self.regrid
            .as_ref()
            .map(|r| &r.target)
            .unwrap_or(&variable.grid)
    }

    fn validate(&self, id: &str) -> ConversionResult<()> {
        let fail = |msg: String| ConversionError::configuration(format!("group {}: {}", id, msg));

        if self.variables.is_empty() {
            return Err(fail("no variables".to_string()));
        }
        self.date_range.validate()?;
        if self.time_resolution_hours == 0 || 24 % self.time_resolution_hours != 0 {
            return Err(fail(format!(
                "time resolution {}h does not divide a day",
                self.time_resolution_hours
            )));
        }
        let schedule = self.schedule();
        schedule.validate()?;
        if let Some(hour) = schedule
            .hours
            .iter()
            .find(|h| *h % self.time_resolution_hours != 0)
        {
            return Err(fail(format!(
                "schedule hour {} is not on the {}h time axis",
                hour, self.time_resolution_hours
            )));
        }
        if self.chunk_length == 0 {
            return Err(fail("chunk length must be positive".to_string()));
        }
        if self.chunks_per_partition == 0 {
            return Err(fail("chunks per partition must be positive".to_string()));
        }
        if let Some(regrid) = &self.regrid {
            if !matches!(regrid.target, Grid::RegularLatLon { .. }) {
                return Err(fail(format!(
                    "regrid target {} must be a regular lat/lon grid",
                    regrid.target
                )));
            }
            regrid.target.validate()?;
        }
        for variable in &self.variables {
            self.output_levels(variable)?;
        }
        Ok(())
    }
}

/// Complete conversion configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    /// Root directory of the record archive.
    pub source_root: String,
    /// Concurrent partitions.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    #[serde(default)]
    pub compression: Compression,
    /// Overwrite chunks whose content differs.
    #[serde(default)]
    pub force: bool,
    /// Chunk cache budget for readers, in megabytes.
    #[serde(default = "default_cache_size_mb")]
    pub cache_size_mb: usize,
    pub groups: BTreeMap<String, GroupConfig>,
}

fn default_parallelism() -> usize {
    4
}

fn default_cache_size_mb() -> usize {
    256
}

impl ConversionConfig {
    /// Check the whole configuration before any work starts.
    pub fn validate(&self) -> ConversionResult<()> {
        if self.groups.is_empty() {
            return Err(ConversionError::configuration("no variable groups configured"));
        }
        if self.parallelism == 0 {
            return Err(ConversionError::configuration("parallelism must be positive"));
        }
        self.compression.validate()?;
        for (id, group) in &self.groups {
            group.validate(id)?;
        }
        // Building the catalog checks every variable and name uniqueness.
        self.catalog()?;
        Ok(())
    }

    /// The immutable catalog of every configured variable, each tagged with
    /// its group id.
    pub fn catalog(&self) -> ConversionResult<VariableCatalog> {
        VariableCatalog::new(self.groups.iter().flat_map(|(id, group)| {
            group.variables.iter().cloned().map(move |mut v| {
                v.group = id.clone();
                v
            })
        }))
    }

    pub fn group(&self, id: &str) -> ConversionResult<&GroupConfig> {
        self.groups
            .get(id)
            .ok_or_else(|| ConversionError::configuration(format!("unknown group {}", id)))
    }

    pub fn cache_bytes(&self) -> usize {
        self.cache_size_mb * 1024 * 1024
    }
}
