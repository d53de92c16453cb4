//! Header-framed codec: each record carries `[size, sender?, receiver?,
//! tag?]` followed by the flattened payload.
//!
//! The stored size is size-inclusive: payload element count (after
//! flattening) plus the number of header fields after the size slot, so a
//! chunker advances by `1 + stored` without knowing the header layout.
//!
//! This is the only codec that preserves the designated receiver across
//! forwarding hops, and therefore the one indirection requires.

use std::marker::PhantomData;

use super::{Merger, Splitter};
use crate::envelope::{Envelope, PeerId, Tag};
use crate::error::QueueError;
use crate::wire::{Flatten, HeaderElem};

/// Which metadata fields a record header carries after the mandatory size
/// slot, in wire order: sender, receiver, tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderLayout {
    /// Record the posting rank.
    pub sender: bool,
    /// Record the designated final receiver. Required for indirection.
    pub receiver: bool,
    /// Record the logical channel.
    pub tag: bool,
}

impl HeaderLayout {
    /// Size and receiver only — the layout indirection needs.
    pub const fn receiver_only() -> Self {
        Self {
            sender: false,
            receiver: true,
            tag: false,
        }
    }

    /// Every metadata field.
    pub const fn full() -> Self {
        Self {
            sender: true,
            receiver: true,
            tag: true,
        }
    }

    /// Number of header fields following the size slot.
    pub const fn fields_after_size(&self) -> usize {
        self.sender as usize + self.receiver as usize + self.tag as usize
    }
}

impl Default for HeaderLayout {
    fn default() -> Self {
        Self::receiver_only()
    }
}

/// Serializes envelopes as header-framed records.
#[derive(Debug, Clone, Copy)]
pub struct RecordMerger<M, E> {
    layout: HeaderLayout,
    _pd: PhantomData<(M, E)>,
}

impl<M, E> RecordMerger<M, E> {
    /// Merger with an explicit header layout.
    pub fn with_layout(layout: HeaderLayout) -> Self {
        Self {
            layout,
            _pd: PhantomData,
        }
    }

    /// Header layout this merger writes.
    pub fn layout(&self) -> HeaderLayout {
        self.layout
    }
}

impl<M, E> Default for RecordMerger<M, E> {
    fn default() -> Self {
        Self::with_layout(HeaderLayout::default())
    }
}

impl<M: Flatten<E>, E: HeaderElem> Merger<M, E> for RecordMerger<M, E> {
    fn append(
        &self,
        buffer: &mut Vec<E>,
        _destination: PeerId,
        _rank: PeerId,
        envelope: Envelope<'_, M>,
    ) -> Result<u64, QueueError> {
        let elems = envelope.payload.len() * M::WIDTH;
        let meta = self.layout.fields_after_size();
        buffer.reserve(1 + meta + elems);
        buffer.push(E::from_usize(elems + meta));
        if self.layout.sender {
            buffer.push(E::from_usize(envelope.sender));
        }
        if self.layout.receiver {
            buffer.push(E::from_usize(envelope.receiver));
        }
        if self.layout.tag {
            buffer.push(E::from_usize(envelope.tag as usize));
        }
        for &m in envelope.payload {
            m.flatten(buffer);
        }
        Ok(1)
    }

    fn estimate(&self, buffer: &[E], envelope: &Envelope<'_, M>) -> usize {
        buffer.len() + 1 + self.layout.fields_after_size() + envelope.payload.len() * M::WIDTH
    }
}

/// Reconstructs header-framed records.
///
/// Structured payloads are rebuilt into an internal scratch buffer reused
/// across envelopes; the delivered payload slice borrows from it.
#[derive(Debug, Clone)]
pub struct RecordSplitter<M, E> {
    layout: HeaderLayout,
    scratch: Vec<M>,
    _pd: PhantomData<E>,
}

impl<M, E> RecordSplitter<M, E> {
    /// Splitter with an explicit header layout; must match the merger's.
    pub fn with_layout(layout: HeaderLayout) -> Self {
        Self {
            layout,
            scratch: Vec::new(),
            _pd: PhantomData,
        }
    }

    /// Header layout this splitter expects.
    pub fn layout(&self) -> HeaderLayout {
        self.layout
    }
}

impl<M, E> Default for RecordSplitter<M, E> {
    fn default() -> Self {
        Self::with_layout(HeaderLayout::default())
    }
}

impl<M: Flatten<E>, E: HeaderElem> Splitter<M, E> for RecordSplitter<M, E> {
    fn split<F>(
        &mut self,
        buffer: &[E],
        origin: PeerId,
        rank: PeerId,
        mut deliver: F,
    ) -> Result<u64, QueueError>
    where
        F: FnMut(Envelope<'_, M>),
    {
        let meta = self.layout.fields_after_size();
        let mut offset = 0;
        let mut count = 0;
        while offset < buffer.len() {
            let stored = buffer[offset].to_usize();
            let avail = buffer.len() - offset - 1;
            if stored < meta || stored > avail {
                return Err(QueueError::TruncatedRecord { origin, offset });
            }
            let end = offset + 1 + stored;
            let mut idx = offset + 1;
            let mut sender = origin;
            let mut receiver = rank;
            let mut tag: Tag = 0;
            if self.layout.sender {
                sender = buffer[idx].to_usize();
                idx += 1;
            }
            if self.layout.receiver {
                receiver = buffer[idx].to_usize();
                idx += 1;
            }
            if self.layout.tag {
                tag = buffer[idx].to_usize() as Tag;
                idx += 1;
            }
            let body = &buffer[idx..end];
            if body.len() % M::WIDTH != 0 {
                return Err(QueueError::TruncatedRecord { origin, offset });
            }
            self.scratch.clear();
            self.scratch.reserve(body.len() / M::WIDTH);
            for chunk in body.chunks_exact(M::WIDTH) {
                self.scratch.push(M::unflatten(chunk));
            }
            deliver(Envelope {
                payload: &self.scratch,
                sender,
                receiver,
                tag,
            });
            count += 1;
            offset = end;
        }
        Ok(count)
    }
}
