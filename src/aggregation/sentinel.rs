//! Sentinel-delimited codec: each record is the payload followed by a
//! reserved element value that must not occur in any payload.

use super::{Merger, Splitter};
use crate::envelope::{Envelope, PeerId};
use crate::error::QueueError;

/// Appends the payload and a trailing sentinel per record.
#[derive(Debug, Clone, Copy)]
pub struct SentinelMerger<E> {
    sentinel: E,
}

impl<E> SentinelMerger<E> {
    /// Codec writing `sentinel` after every record. The sentinel must lie
    /// outside the valid payload alphabet; posts containing it are rejected.
    pub fn new(sentinel: E) -> Self {
        Self { sentinel }
    }
}

impl<E: Copy + PartialEq + std::fmt::Debug> Merger<E, E> for SentinelMerger<E> {
    fn append(
        &self,
        buffer: &mut Vec<E>,
        _destination: PeerId,
        _rank: PeerId,
        envelope: Envelope<'_, E>,
    ) -> Result<u64, QueueError> {
        if envelope.payload.contains(&self.sentinel) {
            return Err(QueueError::CodecMisuse(format!(
                "payload contains the sentinel value {:?}",
                self.sentinel
            )));
        }
        buffer.extend_from_slice(envelope.payload);
        buffer.push(self.sentinel);
        Ok(1)
    }

    fn estimate(&self, buffer: &[E], envelope: &Envelope<'_, E>) -> usize {
        buffer.len() + envelope.payload.len() + 1
    }
}

/// Splits a received buffer at sentinel positions.
///
/// The merger terminates every record, so a well-formed buffer always ends
/// with the sentinel; a buffer that does not is reported as a transport
/// integrity failure rather than silently dropping its last record.
#[derive(Debug, Clone, Copy)]
pub struct SentinelSplitter<E> {
    sentinel: E,
}

impl<E> SentinelSplitter<E> {
    /// Splitter matching [`SentinelMerger::new`] with the same sentinel.
    pub fn new(sentinel: E) -> Self {
        Self { sentinel }
    }
}

impl<E: Copy + PartialEq> Splitter<E, E> for SentinelSplitter<E> {
    fn split<F>(
        &mut self,
        buffer: &[E],
        origin: PeerId,
        rank: PeerId,
        mut deliver: F,
    ) -> Result<u64, QueueError>
    where
        F: FnMut(Envelope<'_, E>),
    {
        if buffer.is_empty() {
            return Ok(0);
        }
        if *buffer.last().expect("nonempty") != self.sentinel {
            return Err(QueueError::MissingSentinel { origin });
        }
        let mut count = 0;
        for record in buffer[..buffer.len() - 1].split(|e| *e == self.sentinel) {
            deliver(Envelope::new(record, origin, rank));
            count += 1;
        }
        Ok(count)
    }
}
