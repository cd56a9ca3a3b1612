//! Chunked array stores for converted reanalysis data.
//!
//! A store is a Zarr V3 group under one key prefix of an object store. Every
//! data array shares the store's time axis and is chunked along time only,
//! so one chunk holds `chunk_length` whole fields. Array metadata, codecs
//! and chunk keys come from zarrs; objects are committed through
//! object_store with create-if-absent writes, and chunk bytes are
//! deterministic, so reruns are idempotent.
//!
//! Layout of a store named `sfc`:
//!
//! ```text
//! sfc/zarr.json              group metadata, consolidated array metadata
//! sfc/manifest.json          chunk presence and metadata version
//! sfc/time/zarr.json         int64 hours since the axis start
//! sfc/t2m/zarr.json          data array metadata
//! sfc/t2m/c/{t}/0/0          one chunk per time block
//! ```

pub mod cache;
pub mod codec;
pub mod manifest;
pub mod reader;
pub mod schema;
pub mod storage;
pub mod writer;

pub use cache::{CacheStats, ChunkCache};
pub use codec::Compression;
pub use manifest::{ArrayManifest, Manifest};
pub use reader::{chunk_key, load_manifest, load_schema, StoreReader};
pub use schema::{data_array, ArraySchema, StoreSchema};
pub use storage::{CreateOutcome, ObjectStorage, StorageConfig};
pub use writer::{StoreWriter, WriteOutcome};
