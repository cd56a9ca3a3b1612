//! Iteration over files holding many concatenated messages.

use bytes::Bytes;

use crate::error::{RecordError, RecordResult};
use crate::record::{self, RecordHeader};
use crate::sections::MAGIC;

/// Location of one message inside a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageEntry {
    pub header: RecordHeader,
    pub offset: usize,
    pub length: usize,
}

/// Sequential reader over a buffer of concatenated messages.
///
/// Messages are returned as zero-copy slices of the input.
pub struct RecordReader {
    data: Bytes,
    offset: usize,
}

impl RecordReader {
    pub fn new(data: Bytes) -> Self {
        Self { data, offset: 0 }
    }

    /// Next message, or `None` at the end of the buffer.
    ///
    /// Bytes between messages that do not start with the magic are skipped.
    pub fn next_message(&mut self) -> Option<RecordResult<(usize, Bytes)>> {
        let remaining = self.data.get(self.offset..)?;
        let start = match remaining.windows(MAGIC.len()).position(|w| w == MAGIC) {
            Some(pos) => self.offset + pos,
            None => {
                self.offset = self.data.len();
                return None;
            }
        };

        let length = match record::message_length(&self.data[start..]) {
            Ok(len) => len,
            Err(e) => {
                self.offset = self.data.len();
                return Some(Err(e));
            }
        };
        if length == 0 || start + length > self.data.len() {
            self.offset = self.data.len();
            return Some(Err(RecordError::Truncated {
                expected: start + length,
                actual: self.data.len(),
            }));
        }

        self.offset = start + length;
        Some(Ok((start, self.data.slice(start..start + length))))
    }

    /// Index every message by its header.
    pub fn index(mut self) -> RecordResult<Vec<MessageEntry>> {
        let mut entries = Vec::new();
        while let Some(message) = self.next_message() {
            let (offset, bytes) = message?;
            entries.push(MessageEntry {
                header: record::decode_header(&bytes)?,
                offset,
                length: bytes.len(),
            });
        }
        Ok(entries)
    }
}

impl Iterator for RecordReader {
    type Item = RecordResult<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_message().map(|r| r.map(|(_, bytes)| bytes))
    }
}
