//! Per-session ordered buffer of encoded records.

use crate::event::EventRecord;
use apmkit_protocol::keys::TOKEN_SEPARATOR;
use std::collections::VecDeque;

/// A buffered record together with its encoded token group.
#[derive(Debug, Clone, PartialEq)]
struct BufferedRecord {
    record: EventRecord,
    encoded: String,
}

/// Ordered log of a session's records.
///
/// Records move from `pending` into `staged` when a chunk is built. A
/// confirmed send drops the staged records; a failed one puts them back in
/// front of `pending` so nothing is lost and order is preserved.
///
/// # Invariants
///
/// - Records are kept in append order
/// - `staged` always precedes `pending`
/// - `pending_bytes` equals the encoded size of `pending`
#[derive(Debug, Default)]
pub struct BeaconBuffer {
    pending: VecDeque<BufferedRecord>,
    staged: Vec<BufferedRecord>,
    pending_bytes: usize,
}

impl BeaconBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record. When the pending bytes exceed `max_bytes` the
    /// oldest pending records are evicted; returns how many were dropped.
    pub fn push(&mut self, record: EventRecord, encoded: String, max_bytes: usize) -> usize {
        self.pending_bytes += encoded.len() + 1;
        self.pending.push_back(BufferedRecord { record, encoded });

        let mut evicted = 0;
        while self.pending_bytes > max_bytes && self.pending.len() > 1 {
            if let Some(oldest) = self.pending.pop_front() {
                self.pending_bytes -= oldest.encoded.len() + 1;
                evicted += 1;
            }
        }
        evicted
    }

    /// Builds the next chunk as `header&record&record...`.
    ///
    /// A chunk that was staged but neither confirmed nor reset is rebuilt
    /// as-is. Otherwise pending records are staged while the chunk stays
    /// within `max_size`; at least one record is always taken so oversized
    /// records still make progress. Returns `None` when there is nothing
    /// to send.
    pub fn stage_chunk(&mut self, header: &str, max_size: usize) -> Option<String> {
        if self.staged.is_empty() {
            let mut size = header.len();
            while let Some(next) = self.pending.front() {
                let added = next.encoded.len() + 1;
                if !self.staged.is_empty() && size + added > max_size {
                    break;
                }
                size += added;
                if let Some(record) = self.pending.pop_front() {
                    self.pending_bytes -= record.encoded.len() + 1;
                    self.staged.push(record);
                }
            }
        }

        if self.staged.is_empty() {
            return None;
        }

        let mut chunk = String::with_capacity(
            header.len() + self.staged.iter().map(|r| r.encoded.len() + 1).sum::<usize>(),
        );
        chunk.push_str(header);
        for record in &self.staged {
            chunk.push(TOKEN_SEPARATOR);
            chunk.push_str(&record.encoded);
        }
        Some(chunk)
    }

    /// Drops the staged records after a confirmed send.
    pub fn confirm_chunk(&mut self) {
        self.staged.clear();
    }

    /// Returns the staged records to the front of the buffer.
    pub fn reset_chunk(&mut self) {
        for record in self.staged.drain(..).rev() {
            self.pending_bytes += record.encoded.len() + 1;
            self.pending.push_front(record);
        }
    }

    /// Discards every record, staged or pending.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.staged.clear();
        self.pending_bytes = 0;
    }

    /// Returns true if there is nothing to send.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.staged.is_empty()
    }

    /// Number of records held, staged or pending.
    pub fn len(&self) -> usize {
        self.pending.len() + self.staged.len()
    }

    /// Encoded size of the pending records.
    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes
    }

    /// Snapshot of all held records in order.
    pub fn records(&self) -> Vec<EventRecord> {
        self.staged
            .iter()
            .chain(self.pending.iter())
            .map(|r| r.record.clone())
            .collect()
    }
}
