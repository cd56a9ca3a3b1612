//! Consolidated store manifest (`{store}/manifest.json`).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use era5_common::TimeAxis;

use crate::codec::Compression;
use crate::schema::ArraySchema;

pub const MANIFEST_FILE: &str = "manifest.json";

/// Chunk presence for one array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayManifest {
    pub schema: ArraySchema,
    /// Chunk index → stored object size in bytes.
    pub chunks: BTreeMap<u64, u64>,
}

/// Summary of a store's arrays and chunk presence.
///
/// `version` increases by one each time consolidation observes a content
/// change, and never otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u64,
    /// CRC32 of the content fields, used to detect change.
    pub checksum: u32,
    pub updated_at: DateTime<Utc>,
    pub time: TimeAxis,
    pub chunk_length: u64,
    pub compression: Compression,
    pub arrays: BTreeMap<String, ArrayManifest>,
}

#[derive(Serialize)]
struct ManifestContent<'a> {
    time: &'a TimeAxis,
    chunk_length: u64,
    compression: &'a Compression,
    arrays: &'a BTreeMap<String, ArrayManifest>,
}

impl Manifest {
    /// Checksum over everything except version and timestamp.
    pub fn content_checksum(
        time: &TimeAxis,
        chunk_length: u64,
        compression: &Compression,
        arrays: &BTreeMap<String, ArrayManifest>,
    ) -> u32 {
        let content = ManifestContent {
            time,
            chunk_length,
            compression,
            arrays,
        };
        // BTreeMaps serialize in key order, so this is canonical.
        let bytes = serde_json::to_vec(&content).unwrap_or_default();
        crc32fast::hash(&bytes)
    }

    /// Number of chunks present for an array.
    pub fn chunk_count(&self, array: &str) -> usize {
        self.arrays.get(array).map(|a| a.chunks.len()).unwrap_or(0)
    }

    /// Whether every chunk of every array is present.
    pub fn is_complete(&self) -> bool {
        let expected = self.time.chunk_count(self.chunk_length) as usize;
        self.arrays.values().all(|a| a.chunks.len() == expected)
    }

    /// Chunk indices absent for an array.
    pub fn missing_chunks(&self, array: &str) -> Vec<u64> {
        let present = self.arrays.get(array).map(|a| &a.chunks);
        (0..self.time.chunk_count(self.chunk_length))
            .filter(|i| present.map(|c| !c.contains_key(i)).unwrap_or(true))
            .collect()
    }
}
