//! Grouping of per-coordinate fields into time chunks.
//!
//! A chunk's buffer is laid out `[time][level][horizontal]`. Every slot
//! of a chunk is resolved exactly once: filled with a field, marked as a
//! tolerated gap, or marked failed. Slots the schedule never populates and
//! slots past the end of the time axis are gaps from the start. A chunk
//! is handed out only once all of its slots are resolved; dropping the
//! assembler discards whatever is still buffered.

use std::ops::Range;

use era5_common::{ConversionError, ConversionResult, Coordinate};

use crate::locator::CoordinateSpace;

/// A fully resolved chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedChunk {
    pub chunk_index: u64,
    pub values: Vec<f32>,
    pub filled: usize,
    pub gaps: usize,
    pub failed: usize,
}

impl CompletedChunk {
    /// Chunks with failed slots are never written.
    pub fn is_writable(&self) -> bool {
        self.failed == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Pending,
    Filled,
    Gap,
    Failed,
}

struct ChunkBuffer {
    index: u64,
    values: Vec<f32>,
    slots: Vec<Slot>,
    pending: usize,
}

/// Streams coordinates of one variable, in ascending order, into chunks.
pub struct ChunkAssembler {
    space: CoordinateSpace,
    chunk_length: u64,
    field_len: usize,
    chunks: Range<u64>,
    next_chunk: u64,
    current: Option<ChunkBuffer>,
}

impl ChunkAssembler {
    /// Assemble the chunks in `chunks` for fields of `field_len` values.
    pub fn new(
        space: CoordinateSpace,
        chunk_length: u64,
        field_len: usize,
        chunks: Range<u64>,
    ) -> ConversionResult<Self> {
        if chunk_length == 0 {
            return Err(ConversionError::configuration("chunk length must be positive"));
        }
        let total = space.axis().chunk_count(chunk_length);
        if chunks.end > total {
            return Err(ConversionError::configuration(format!(
                "chunks {:?} exceed the {} chunks of the time axis",
                chunks, total
            )));
        }
        Ok(Self {
            space,
            chunk_length,
            field_len,
            next_chunk: chunks.start,
            chunks,
            current: None,
        })
    }

    fn level_count(&self) -> usize {
        self.space.levels().len().max(1)
    }

    /// Add the field of one coordinate.
    pub fn push(
        &mut self,
        coordinate: &Coordinate,
        values: &[f32],
    ) -> ConversionResult<Vec<CompletedChunk>> {
        if values.len() != self.field_len {
            return Err(ConversionError::configuration(format!(
                "field at {} has {} values, expected {}",
                coordinate,
                values.len(),
                self.field_len
            )));
        }
        self.resolve(coordinate, Slot::Filled, Some(values))
    }

    /// Resolve a coordinate as a tolerated gap; its slot stays NaN.
    pub fn mark_gap(&mut self, coordinate: &Coordinate) -> ConversionResult<Vec<CompletedChunk>> {
        self.resolve(coordinate, Slot::Gap, None)
    }

    /// Resolve a coordinate as failed; its chunk will not be writable.
    pub fn mark_failed(
        &mut self,
        coordinate: &Coordinate,
    ) -> ConversionResult<Vec<CompletedChunk>> {
        self.resolve(coordinate, Slot::Failed, None)
    }

    /// Emit every remaining chunk. Fails if any slot is still pending.
    pub fn finish(mut self) -> ConversionResult<Vec<CompletedChunk>> {
        let mut out = Vec::new();
        self.drain_complete(&mut out);
        if self.next_chunk < self.chunks.end {
            let pending = self.current.as_ref().map(|c| c.pending).unwrap_or(0);
            return Err(ConversionError::configuration(format!(
                "chunk {} still has {} unresolved coordinates",
                self.next_chunk, pending
            )));
        }
        Ok(out)
    }

    fn resolve(
        &mut self,
        coordinate: &Coordinate,
        state: Slot,
        values: Option<&[f32]>,
    ) -> ConversionResult<Vec<CompletedChunk>> {
        let mut out = Vec::new();
        self.drain_complete(&mut out);

        let (chunk_index, slot) = self.slot_of(coordinate)?;
        if chunk_index < self.next_chunk {
            return Err(ConversionError::configuration(format!(
                "{} belongs to chunk {}, which is already complete",
                coordinate, chunk_index
            )));
        }
        if chunk_index > self.next_chunk {
            return Err(ConversionError::configuration(format!(
                "{} skips ahead to chunk {} while chunk {} is incomplete",
                coordinate, chunk_index, self.next_chunk
            )));
        }

        let field_len = self.field_len;
        let buffer = self.open_current();
        if buffer.slots[slot] != Slot::Pending {
            return Err(ConversionError::configuration(format!(
                "{} was already resolved",
                coordinate
            )));
        }
        buffer.slots[slot] = state;
        buffer.pending -= 1;
        if let Some(values) = values {
            buffer.values[slot * field_len..(slot + 1) * field_len].copy_from_slice(values);
        }

        self.drain_complete(&mut out);
        Ok(out)
    }

    /// Chunk index and slot position of a scheduled coordinate.
    fn slot_of(&self, coordinate: &Coordinate) -> ConversionResult<(u64, usize)> {
        let axis = self.space.axis();
        let outside = || {
            ConversionError::configuration(format!(
                "{} is not a scheduled coordinate of chunks {:?}",
                coordinate, self.chunks
            ))
        };
        let time_index = axis.index_of(coordinate.time).ok_or_else(outside)?;
        if !self.space.schedule().is_scheduled(coordinate.time) {
            return Err(outside());
        }
        let chunk_index = time_index / self.chunk_length;
        if !self.chunks.contains(&chunk_index) {
            return Err(outside());
        }
        let level_pos = match coordinate.level {
            None if self.space.levels().is_single_level() => 0,
            Some(level) => self.space.levels().index_of(level).ok_or_else(outside)?,
            None => return Err(outside()),
        };
        let slot = (time_index % self.chunk_length) as usize * self.level_count() + level_pos;
        Ok((chunk_index, slot))
    }

    fn open_current(&mut self) -> &mut ChunkBuffer {
        let buffer = match self.current.take() {
            Some(buffer) => buffer,
            None => self.new_buffer(self.next_chunk),
        };
        self.current.insert(buffer)
    }

    fn new_buffer(&self, index: u64) -> ChunkBuffer {
        let levels = self.level_count();
        let slot_count = self.chunk_length as usize * levels;
        let mut slots = vec![Slot::Gap; slot_count];
        let mut pending = 0;
        let start = index * self.chunk_length;
        for coordinate in self.space.coordinates_in(start..start + self.chunk_length) {
            if let Ok((_, slot)) = self.slot_of(&coordinate) {
                slots[slot] = Slot::Pending;
                pending += 1;
            }
        }
        ChunkBuffer {
            index,
            values: vec![f32::NAN; slot_count * self.field_len],
            slots,
            pending,
        }
    }

    /// Emit the current chunk and any following chunks with nothing to
    /// wait for.
    fn drain_complete(&mut self, out: &mut Vec<CompletedChunk>) {
        while self.next_chunk < self.chunks.end {
            let complete = self.open_current().pending == 0;
            if !complete {
                break;
            }
            if let Some(buffer) = self.current.take() {
                let count = |state: Slot| buffer.slots.iter().filter(|s| **s == state).count();
                out.push(CompletedChunk {
                    chunk_index: buffer.index,
                    filled: count(Slot::Filled),
                    gaps: count(Slot::Gap),
                    failed: count(Slot::Failed),
                    values: buffer.values,
                });
            }
            self.next_chunk += 1;
        }
    }
}
