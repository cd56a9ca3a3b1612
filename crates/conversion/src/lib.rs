//! Conversion of per-timestep archive records into chunked array stores.
//!
//! The pipeline for one variable group is:
//!
//! 1. [`locator`] enumerates the (time, level) coordinates of the
//!    configured date range and schedule, and splits the time axis into
//!    chunk-aligned partitions.
//! 2. [`normalizer`] fetches each record from a [`source::RecordSource`]
//!    and checks it is the record that was asked for.
//! 3. [`assembler`] groups fields into time chunks, treating unscheduled
//!    slots as gaps.
//! 4. `chunk_store::StoreWriter` writes complete chunks idempotently.
//!
//! Partitions share nothing but the target store, so they can run on
//! independent workers; [`merger`] then joins stores into one dataset.

pub mod assembler;
pub mod config;
pub mod locator;
pub mod merger;
pub mod normalizer;
pub mod pipeline;
pub mod source;

pub use assembler::{ChunkAssembler, CompletedChunk};
pub use config::{ConversionConfig, FileLayout, GroupConfig, LevelSelection, MissingPolicy, RegridConfig};
pub use locator::{CoordinateSpace, Coordinates, Partition, Plan, PlanEntry};
pub use merger::{merge, MaterializeOptions, MaterializeReport, MergedDataset, MergedStore};
pub use normalizer::{normalize, GridNormalizer};
pub use pipeline::{tolerates_missing, Converter, GroupReport, MissingCoordinate, RunReport};
pub use source::{record_path, FileRecordSource, MemoryRecordSource, RecordSource};
