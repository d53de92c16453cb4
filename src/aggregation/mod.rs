//! Codec contracts for per-peer buffer aggregation.
//!
//! A [`Merger`] writes posted envelopes into an outbound element buffer; a
//! [`Splitter`] reconstructs envelopes from a received buffer. Together
//! they form a round-trip identity on envelope semantics, modulo the
//! explicit message-element ⇄ buffer-element narrowing a codec models.
//!
//! Codecs are plain generic parameters of the queue, monomorphized per
//! instance; nothing in the per-envelope path goes through dynamic
//! dispatch.
//!
//! Three families ship with the engine:
//!
//! * [`AppendMerger`] / [`NoSplitter`] — raw concatenation, the whole
//!   buffer is one envelope. For callers that frame messages themselves.
//! * [`SentinelMerger`] / [`SentinelSplitter`] — records delimited by a
//!   reserved element value.
//! * [`RecordMerger`] / [`RecordSplitter`] — per-record header carrying
//!   the element count and configurable routing metadata; the only family
//!   usable with indirection, and the only one supporting structured
//!   message elements (tuples flattened via [`crate::wire::Flatten`]).

use crate::envelope::{Envelope, PeerId};
use crate::error::QueueError;

mod append;
mod chunks;
mod record;
mod sentinel;

pub use append::{AppendMerger, NoSplitter};
pub use chunks::{chunk_by_embedded_size, ChunkBySize};
pub use record::{HeaderLayout, RecordMerger, RecordSplitter};
pub use sentinel::{SentinelMerger, SentinelSplitter};

/// Writes one posted envelope into a per-peer outbound buffer.
pub trait Merger<M, E> {
    /// Append a serialized envelope to `buffer` and return the number of
    /// wire records this append created. Codecs that coalesce consecutive
    /// appends into one record return 0 for the coalesced ones; the queue
    /// sums these counts per buffer so the sender books exactly as many
    /// records as the receiving splitter will reconstruct.
    fn append(
        &self,
        buffer: &mut Vec<E>,
        destination: PeerId,
        rank: PeerId,
        envelope: Envelope<'_, M>,
    ) -> Result<u64, QueueError>;

    /// Upper bound on the buffer length after appending `envelope`, without
    /// committing. Drives the flush-before-append threshold policy.
    fn estimate(&self, buffer: &[E], envelope: &Envelope<'_, M>) -> usize;
}

/// Reconstructs envelopes from a received buffer.
pub trait Splitter<M, E> {
    /// Invoke `deliver` once per envelope encoded in `buffer`, in buffer
    /// order, and return the envelope count. Payloads borrow either from
    /// `buffer` or from splitter-internal scratch and are valid only for
    /// the duration of the `deliver` call.
    fn split<F>(
        &mut self,
        buffer: &[E],
        origin: PeerId,
        rank: PeerId,
        deliver: F,
    ) -> Result<u64, QueueError>
    where
        F: FnMut(Envelope<'_, M>);
}

/// Runs over an outbound buffer immediately before it is handed to the
/// transport; may append a trailer.
pub trait BufferCleaner<E> {
    /// Finalize `buffer` for transmission to `destination`.
    fn clean(&mut self, buffer: &mut Vec<E>, destination: PeerId);
}

/// Cleaner that leaves buffers untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCleaner;

impl<E> BufferCleaner<E> for NoopCleaner {
    #[inline]
    fn clean(&mut self, _buffer: &mut Vec<E>, _destination: PeerId) {}
}

/// Adapter turning a closure into a [`BufferCleaner`].
#[derive(Debug, Clone)]
pub struct FnCleaner<F>(pub F);

impl<E, F: FnMut(&mut Vec<E>, PeerId)> BufferCleaner<E> for FnCleaner<F> {
    #[inline]
    fn clean(&mut self, buffer: &mut Vec<E>, destination: PeerId) {
        (self.0)(buffer, destination)
    }
}
