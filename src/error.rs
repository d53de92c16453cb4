//! QueueError: unified error type for the briefkasten public APIs.
//!
//! Recoverable backpressure is the only transient condition; everything else
//! is fatal to the queue instance and surfaces to the caller unchanged.

use thiserror::Error;

use crate::envelope::PeerId;

/// Unified error type for queue and communicator operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The underlying communication substrate reported a hard failure.
    #[error("transport failure involving peer {peer}: {reason}")]
    Transport {
        /// Peer the failing operation addressed.
        peer: PeerId,
        /// Backend-specific description.
        reason: String,
    },
    /// A received byte buffer does not describe a whole number of elements,
    /// or its length disagrees with the probed transfer size.
    #[error("buffer size mismatch from peer {peer}: expected {expected} bytes, got {got}")]
    BufferSizeMismatch {
        /// Originating peer.
        peer: PeerId,
        /// Byte length implied by the probe or the element type.
        expected: usize,
        /// Byte length actually delivered.
        got: usize,
    },
    /// A sentinel-coded buffer did not end with the sentinel value.
    #[error("sentinel-coded buffer from peer {origin} lacks a trailing sentinel")]
    MissingSentinel {
        /// Peer whose buffer failed validation.
        origin: PeerId,
    },
    /// A record header declared an extent past the end of the buffer.
    #[error("truncated record from peer {origin} at element offset {offset}")]
    TruncatedRecord {
        /// Peer whose buffer failed validation.
        origin: PeerId,
        /// Element offset of the record whose extent overruns the buffer.
        offset: usize,
    },
    /// A codec contract was violated (e.g. a payload element equal to the
    /// configured sentinel value).
    #[error("codec misuse: {0}")]
    CodecMisuse(String),
    /// The request pool has no free slot and the caller asked not to wait.
    /// Transient: drive progress and retry, or use the blocking post.
    #[error("request pool exhausted ({capacity} operations in flight)")]
    Backpressure {
        /// Configured pool capacity.
        capacity: usize,
    },
    /// A queue was configured with parameters that cannot work.
    #[error("invalid queue configuration: {0}")]
    InvalidConfig(&'static str),
    /// A peer identifier outside `[0, size)` was passed to the queue.
    #[error("peer {peer} out of range for group of size {size}")]
    PeerOutOfRange {
        /// Offending identifier.
        peer: PeerId,
        /// Size of the communication group.
        size: usize,
    },
}

impl QueueError {
    /// True for conditions the caller can resolve by driving progress.
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, QueueError::Backpressure { .. })
    }
}
