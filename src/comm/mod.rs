//! Communication abstraction for intra-process (threaded mailboxes) and
//! inter-process (MPI) message passing.
//!
//! The queue engine consumes exactly this surface: ranked peers,
//! nonblocking send/receive with pollable handles, an any-source probe, a
//! nonblocking summing all-reduce for termination detection, group
//! duplication, and (for synchronous mode only) a variable-length
//! all-to-all collective.
//!
//! Wire conventions: all transfers are byte buffers; the queue layer casts
//! its element buffers with [`crate::wire`]. Probes report exact byte
//! counts, so receives are sized exactly and never truncate.

use crate::envelope::PeerId;
use crate::error::QueueError;

pub mod local;
#[cfg(feature = "mpi-support")]
pub mod mpi;

pub use self::local::{LocalComm, LocalGroup};
#[cfg(feature = "mpi-support")]
pub use self::mpi::MpiComm;

/// Non-blocking completion test for point-to-point handles.
///
/// A completed receive yields the received bytes; a completed send yields
/// its buffer back (callers usually drop it).
pub trait PollWait {
    /// Return `Some(bytes)` once the operation has completed.
    fn try_wait(&mut self) -> Result<Option<Vec<u8>>, QueueError>;

    /// Spin until completion. Only safe when the matching remote operation
    /// is already in flight; the queue layer never calls this while it
    /// still has progress of its own to make.
    fn wait(mut self) -> Result<Vec<u8>, QueueError>
    where
        Self: Sized,
    {
        loop {
            if let Some(bytes) = self.try_wait()? {
                return Ok(bytes);
            }
            std::hint::spin_loop();
        }
    }
}

/// Non-blocking completion test for reduction handles.
pub trait PollReduce {
    /// Return the elementwise global sums once every rank has contributed.
    fn try_wait(&mut self) -> Result<Option<Vec<u64>>, QueueError>;
}

/// An unmatched incoming transfer reported by a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeInfo {
    /// Rank that initiated the transfer.
    pub source: PeerId,
    /// Exact payload size in bytes.
    pub bytes: usize,
}

/// Non-blocking communication interface (minimal by design).
pub trait Communicator: Send + Sync + Sized + 'static {
    /// Handle returned by [`Communicator::isend`].
    type SendHandle: PollWait;
    /// Handle returned by [`Communicator::irecv`].
    type RecvHandle: PollWait;
    /// Handle returned by [`Communicator::iallreduce_sum`].
    type ReduceHandle: PollReduce;

    /// Initiate a nonblocking send of `buf` to `peer` on `tag`.
    fn isend(&self, peer: PeerId, tag: CommTag, buf: &[u8]) -> Result<Self::SendHandle, QueueError>;

    /// Initiate a nonblocking receive of exactly `len` bytes from `peer` on
    /// `tag`. The queue layer sizes `len` from a preceding probe.
    fn irecv(&self, peer: PeerId, tag: CommTag, len: usize) -> Result<Self::RecvHandle, QueueError>;

    /// Report one unmatched incoming transfer on `tag` from any source, if
    /// any is pending. The transfer stays pending until received.
    fn iprobe(&self, tag: CommTag) -> Result<Option<ProbeInfo>, QueueError>;

    /// Initiate a nonblocking elementwise sum over the group. Collective:
    /// every rank must initiate reductions for a given `tag` in the same
    /// order.
    fn iallreduce_sum(
        &self,
        tag: CommTag,
        vals: &[u64],
    ) -> Result<Self::ReduceHandle, QueueError>;

    /// Blocking variable-length all-to-all: `segments[p]` goes to rank `p`,
    /// the result holds one segment per origin rank. Collective.
    fn alltoallv(&self, segments: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, QueueError>;

    /// Duplicate the communication group. Collective; every queue instance
    /// operates on its own duplicate so concurrent queues never share a
    /// matching context.
    fn duplicate(&self) -> Result<Self, QueueError>;

    /// Rank of this process (`0..size`).
    fn rank(&self) -> PeerId;

    /// Total number of ranks in the group.
    fn size(&self) -> usize;

    /// Synchronization barrier over the group.
    fn barrier(&self);
}

/// Tag newtype for safer tag arithmetic.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct CommTag(u16);

impl CommTag {
    /// Create a new tag from a raw `u16`.
    #[inline]
    pub const fn new(tag: u16) -> Self {
        Self(tag)
    }

    /// Return the underlying `u16` value.
    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Safely offset the tag by `dx`, wrapping on overflow.
    #[inline]
    pub const fn offset(self, dx: u16) -> Self {
        Self(self.0.wrapping_add(dx))
    }
}

impl From<u16> for CommTag {
    #[inline]
    fn from(x: u16) -> Self {
        CommTag::new(x)
    }
}

/// Transport tags reserved by one queue instance.
#[derive(Copy, Clone, Debug)]
pub struct QueueTags {
    /// Tag carrying aggregated message buffers.
    pub data: CommTag,
    /// Tag identifying the termination-detection reduction stream.
    pub control: CommTag,
}

impl QueueTags {
    /// Construct tags from a base, assigning deterministic offsets per
    /// channel.
    #[inline]
    pub const fn from_base(base: CommTag) -> Self {
        Self {
            data: base,
            control: base.offset(1),
        }
    }
}

impl Default for QueueTags {
    fn default() -> Self {
        Self::from_base(CommTag::new(0xB1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_offset_wraps() {
        let t = CommTag::new(u16::MAX);
        assert_eq!(t.offset(1).as_u16(), 0);
    }

    #[test]
    fn queue_tags_are_adjacent() {
        let tags = QueueTags::from_base(CommTag::new(40));
        assert_eq!(tags.data.as_u16(), 40);
        assert_eq!(tags.control.as_u16(), 41);
    }
}
