//! Coordinate enumeration and chunk-aligned work partitions.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use era5_common::{
    ConversionError, ConversionResult, Coordinate, DateRange, LevelSet, Schedule, TimeAxis,
};

use crate::config::ConversionConfig;

/// The (time, level) coordinates of one variable group.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinateSpace {
    axis: TimeAxis,
    schedule: Schedule,
    levels: LevelSet,
}

impl CoordinateSpace {
    pub fn new(
        range: &DateRange,
        resolution_hours: u32,
        schedule: Schedule,
        levels: LevelSet,
    ) -> ConversionResult<Self> {
        let axis = TimeAxis::from_date_range(range, resolution_hours)?;
        schedule.validate()?;
        levels.validate()?;
        Ok(Self {
            axis,
            schedule,
            levels,
        })
    }

    pub fn axis(&self) -> &TimeAxis {
        &self.axis
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn levels(&self) -> &LevelSet {
        &self.levels
    }

    /// Every coordinate in ascending (time, level) order.
    pub fn coordinates(&self) -> Coordinates {
        self.coordinates_in(0..self.axis.len)
    }

    /// Coordinates whose time index lies in `range`.
    pub fn coordinates_in(&self, range: Range<u64>) -> Coordinates {
        let levels = if self.levels.is_single_level() {
            vec![None]
        } else {
            self.levels.levels.iter().map(|&l| Some(l)).collect()
        };
        Coordinates {
            axis: self.axis,
            schedule: self.schedule.clone(),
            levels,
            time_index: range.start,
            time_end: range.end.min(self.axis.len),
            level_pos: 0,
        }
    }

    /// Restart the sequence at `from`: every coordinate `>= from`.
    pub fn coordinates_from(&self, from: Coordinate) -> Coordinates {
        let start = if from.time <= self.axis.start {
            0
        } else {
            let elapsed = (from.time - self.axis.start).num_seconds().max(0) as u64;
            elapsed.div_ceil(self.axis.resolution_hours as u64 * 3600)
        };
        let mut iter = self.coordinates_in(start..self.axis.len);
        if self.axis.index_of(from.time) == Some(start) {
            if let Some(level) = from.level {
                iter.level_pos = iter
                    .levels
                    .iter()
                    .position(|l| l.is_some_and(|l| l >= level))
                    .unwrap_or(iter.levels.len());
            }
        }
        iter
    }

    /// Coordinates covered by one chunk of the time axis.
    pub fn chunk_coordinates(&self, chunk_length: u64, chunk_index: u64) -> Coordinates {
        let start = chunk_index * chunk_length;
        self.coordinates_in(start..start + chunk_length)
    }

    /// Split the time axis into partitions of `chunks_per_partition`
    /// chunks each; the last may be shorter.
    pub fn partitions(&self, chunk_length: u64, chunks_per_partition: u64) -> Vec<Partition> {
        let chunks = self.axis.chunk_count(chunk_length);
        let per = chunks_per_partition.max(1);
        (0..chunks.div_ceil(per))
            .map(|i| {
                let first_chunk = i * per;
                let end_chunk = (first_chunk + per).min(chunks);
                Partition {
                    index: i,
                    first_chunk,
                    end_chunk,
                    time_start: first_chunk * chunk_length,
                    time_end: (end_chunk * chunk_length).min(self.axis.len),
                }
            })
            .collect()
    }
}

/// Lazy, restartable coordinate sequence.
///
/// Cloning yields an independent iterator at the same position.
#[derive(Debug, Clone)]
pub struct Coordinates {
    axis: TimeAxis,
    schedule: Schedule,
    levels: Vec<Option<u32>>,
    time_index: u64,
    time_end: u64,
    level_pos: usize,
}

impl Iterator for Coordinates {
    type Item = Coordinate;

    fn next(&mut self) -> Option<Coordinate> {
        while self.time_index < self.time_end {
            let time = self.axis.time_at(self.time_index);
            if self.schedule.is_scheduled(time) && self.level_pos < self.levels.len() {
                let level = self.levels[self.level_pos];
                self.level_pos += 1;
                return Some(Coordinate::new(time, level));
            }
            self.time_index += 1;
            self.level_pos = 0;
        }
        None
    }
}

/// A contiguous, chunk-aligned block of the time axis: the unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    /// Position within the group's partitions.
    pub index: u64,
    pub first_chunk: u64,
    /// Exclusive.
    pub end_chunk: u64,
    pub time_start: u64,
    /// Exclusive, clamped to the axis length.
    pub time_end: u64,
}

impl Partition {
    pub fn chunks(&self) -> Range<u64> {
        self.first_chunk..self.end_chunk
    }

    pub fn time_range(&self) -> Range<u64> {
        self.time_start..self.time_end
    }
}

/// One unit of work for the batch runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    /// Global position in the plan, as passed to `convert --partition`.
    pub index: usize,
    pub group: String,
    pub store: String,
    pub partition: Partition,
}

/// Every partition of every group, in a stable order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub entries: Vec<PlanEntry>,
}

impl Plan {
    pub fn build(config: &ConversionConfig) -> ConversionResult<Self> {
        let mut entries = Vec::new();
        for (id, group) in &config.groups {
            // Partitions only depend on the time axis; any level set will do.
            let space = CoordinateSpace::new(
                &group.date_range,
                group.time_resolution_hours,
                group.schedule(),
                LevelSet::surface(),
            )?;
            for partition in space.partitions(group.chunk_length, group.chunks_per_partition) {
                entries.push(PlanEntry {
                    index: entries.len(),
                    group: id.clone(),
                    store: group.store_name(id).to_string(),
                    partition,
                });
            }
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> ConversionResult<&PlanEntry> {
        self.entries.get(index).ok_or_else(|| {
            ConversionError::configuration(format!(
                "partition {} out of range (plan has {})",
                index,
                self.entries.len()
            ))
        })
    }

    pub fn to_json(&self) -> ConversionResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
