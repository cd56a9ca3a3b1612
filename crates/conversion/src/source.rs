//! Raw record sources.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Datelike, Utc};
use lru::LruCache;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, instrument};

use era5_common::{ConversionError, ConversionResult, Coordinate, Variable};
use record_codec::RecordReader;

use crate::config::FileLayout;

/// Locates the raw record bytes for a variable at a coordinate.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// `Ok(None)` when no record exists.
    async fn locate(
        &self,
        variable: &Variable,
        coordinate: &Coordinate,
    ) -> ConversionResult<Option<Bytes>>;
}

/// Key of a message inside a record file.
type MessageKey = (u32, Option<u32>, DateTime<Utc>);

/// Message positions of one record file.
#[derive(Debug, Default)]
struct FileIndex {
    messages: HashMap<MessageKey, (usize, usize)>,
}

/// Record files on a local filesystem, laid out as
/// `{root}/{yyyy}/{yyyymmdd}_{group}.rec` (daily) or
/// `{root}/{yyyy}/{yyyymm}_{group}.rec` (monthly), by valid time.
///
/// Each file is indexed once by (parameter, level, valid time); indices
/// are kept in an LRU.
pub struct FileRecordSource {
    root: PathBuf,
    layouts: HashMap<String, FileLayout>,
    indices: Mutex<LruCache<PathBuf, Arc<FileIndex>>>,
}

impl FileRecordSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            layouts: HashMap::new(),
            indices: Mutex::new(LruCache::new(NonZeroUsize::new(64).unwrap_or(NonZeroUsize::MIN))),
        }
    }

    /// Use `layout` for the files of `group` (daily otherwise).
    pub fn with_layout(mut self, group: impl Into<String>, layout: FileLayout) -> Self {
        self.layouts.insert(group.into(), layout);
        self
    }

    /// File holding a group's records valid at `time`.
    pub fn path_for(&self, group: &str, time: DateTime<Utc>) -> PathBuf {
        record_path(
            &self.root,
            group,
            self.layouts.get(group).copied().unwrap_or_default(),
            time,
        )
    }

    async fn index(&self, path: &Path) -> ConversionResult<Option<Arc<FileIndex>>> {
        let cached = self.lock_indices().get(path).cloned();
        if cached.is_some() {
            return Ok(cached);
        }

        let data = match tokio::fs::read(path).await {
            Ok(data) => Bytes::from(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ConversionError::storage(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let display = path.display().to_string();
        let index = tokio::task::spawn_blocking(move || -> ConversionResult<FileIndex> {
            let entries = RecordReader::new(data)
                .index()
                .map_err(|e| ConversionError::storage(format!("failed to index {}: {}", display, e)))?;
            let mut index = FileIndex::default();
            for entry in entries {
                let key = (entry.header.param_id, entry.header.level, entry.header.valid_time());
                index.messages.insert(key, (entry.offset, entry.length));
            }
            Ok(index)
        })
        .await
        .map_err(|e| ConversionError::storage(format!("index task failed: {}", e)))??;

        debug!(path = %path.display(), messages = index.messages.len(), "Indexed record file");
        let index = Arc::new(index);
        self.lock_indices().put(path.to_path_buf(), Arc::clone(&index));
        Ok(Some(index))
    }

    fn lock_indices(&self) -> std::sync::MutexGuard<'_, LruCache<PathBuf, Arc<FileIndex>>> {
        self.indices.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl RecordSource for FileRecordSource {
    #[instrument(skip(self, variable, coordinate), fields(variable = %variable.name, coordinate = %coordinate))]
    async fn locate(
        &self,
        variable: &Variable,
        coordinate: &Coordinate,
    ) -> ConversionResult<Option<Bytes>> {
        let path = self.path_for(&variable.group, coordinate.time);
        let Some(index) = self.index(&path).await? else {
            return Ok(None);
        };
        let key = (variable.param_id, coordinate.level, coordinate.time);
        let Some(&(offset, length)) = index.messages.get(&key) else {
            return Ok(None);
        };

        let io_err = |e: std::io::Error| {
            ConversionError::storage(format!("failed to read {}: {}", path.display(), e))
        };
        let mut file = tokio::fs::File::open(&path).await.map_err(io_err)?;
        file.seek(std::io::SeekFrom::Start(offset as u64))
            .await
            .map_err(io_err)?;
        let mut buf = vec![0u8; length];
        file.read_exact(&mut buf).await.map_err(io_err)?;
        Ok(Some(Bytes::from(buf)))
    }
}

/// Path of the record file for `group` valid at `time`.
pub fn record_path(root: &Path, group: &str, layout: FileLayout, time: DateTime<Utc>) -> PathBuf {
    let file = match layout {
        FileLayout::Daily => format!(
            "{:04}{:02}{:02}_{}.rec",
            time.year(),
            time.month(),
            time.day(),
            group
        ),
        FileLayout::Monthly => format!("{:04}{:02}_{}.rec", time.year(), time.month(), group),
    };
    root.join(format!("{:04}", time.year())).join(file)
}

/// Records held in memory, keyed by variable name and coordinate.
#[derive(Default)]
pub struct MemoryRecordSource {
    records: RwLock<HashMap<(String, Coordinate), Bytes>>,
}

impl MemoryRecordSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, variable: &str, coordinate: Coordinate, record: impl Into<Bytes>) {
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert((variable.to_string(), coordinate), record.into());
    }

    pub fn remove(&self, variable: &str, coordinate: &Coordinate) -> Option<Bytes> {
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&(variable.to_string(), *coordinate))
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RecordSource for MemoryRecordSource {
    async fn locate(
        &self,
        variable: &Variable,
        coordinate: &Coordinate,
    ) -> ConversionResult<Option<Bytes>> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(variable.name.clone(), *coordinate))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_record_path() {
        let t = Utc.with_ymd_and_hms(2021, 3, 7, 18, 0, 0).unwrap();
        let root = Path::new("/archive");
        assert_eq!(
            record_path(root, "sfc", FileLayout::Daily, t),
            PathBuf::from("/archive/2021/20210307_sfc.rec")
        );
        assert_eq!(
            record_path(root, "pcp", FileLayout::Monthly, t),
            PathBuf::from("/archive/2021/202103_pcp.rec")
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileRecordSource::new(dir.path());
        let variable = era5_common::Variable {
            name: "t2m".to_string(),
            short_name: "t2m".to_string(),
            param_id: 167,
            units: "K".to_string(),
            grid: era5_common::Grid::regular_global(90.0),
            levels: era5_common::LevelSet::surface(),
            group: "sfc".to_string(),
            dtype: Default::default(),
        };
        let coordinate = Coordinate::surface(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
        assert!(source.locate(&variable, &coordinate).await.unwrap().is_none());
    }
}
