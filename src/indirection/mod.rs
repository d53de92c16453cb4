//! Store-and-forward indirection over a buffered queue.
//!
//! An [`IndirectionScheme`] decides, per (sender, receiver) pair, whether
//! a message travels through an intermediate rank; the
//! [`IndirectionAdapter`] mirrors the queue API and performs the actual
//! redirection. Because the final receiver must survive the intermediate
//! hop on the wire, the adapter is defined over queues using the record
//! codec, whose header layout must carry the receiver field — checked at
//! construction.

use bytemuck::Pod;

use crate::aggregation::{BufferCleaner, RecordMerger, RecordSplitter};
use crate::comm::Communicator;
use crate::envelope::{Envelope, PeerId};
use crate::error::QueueError;
use crate::queue::{BufferedQueue, QueueStats};
use crate::wire::{Flatten, HeaderElem};

mod grid;

pub use grid::GridScheme;

/// Routing policy for store-and-forward message delivery.
pub trait IndirectionScheme {
    /// First hop for a message from `sender` to `receiver`. Returning
    /// `receiver` means the message travels directly. When the result is
    /// an intermediate `p`, `next_hop(p, receiver)` must eventually reach
    /// `receiver` (for the shipped schemes: in exactly one more step).
    fn next_hop(&self, sender: PeerId, receiver: PeerId) -> PeerId;

    /// Whether the message to `receiver` leaves `sender` through an
    /// intermediate.
    fn should_redirect(&self, sender: PeerId, receiver: PeerId) -> bool {
        self.next_hop(sender, receiver) != receiver
    }
}

/// Scheme that never redirects; useful as a baseline and in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectScheme;

impl IndirectionScheme for DirectScheme {
    fn next_hop(&self, _sender: PeerId, receiver: PeerId) -> PeerId {
        receiver
    }
}

/// The record-codec queue type an adapter wraps.
pub type RoutedQueue<M, E, C, Cl> =
    BufferedQueue<M, E, C, RecordMerger<M, E>, RecordSplitter<M, E>, Cl>;

/// Mirrors the buffered queue API, routing messages via an
/// [`IndirectionScheme`].
///
/// Envelopes arriving at an intermediate are re-posted toward their next
/// hop without invoking the user callback; a delivered envelope always
/// satisfies `envelope.receiver == rank`.
pub struct IndirectionAdapter<M, E: Pod, C: Communicator, S, Cl> {
    queue: RoutedQueue<M, E, C, Cl>,
    scheme: S,
}

impl<M, E, C, S, Cl> IndirectionAdapter<M, E, C, S, Cl>
where
    M: Copy + Flatten<E>,
    E: HeaderElem + Pod,
    C: Communicator,
    S: IndirectionScheme + Clone + Send + Sync + 'static,
    Cl: BufferCleaner<E>,
{
    /// Wrap `queue`, installing `scheme` as its forwarding route.
    ///
    /// Fails with [`QueueError::CodecMisuse`] when the queue's record
    /// layout does not carry the receiver field, without which forwarded
    /// envelopes could not find their destination.
    pub fn new(mut queue: RoutedQueue<M, E, C, Cl>, scheme: S) -> Result<Self, QueueError> {
        if !queue.merger().layout().receiver {
            return Err(QueueError::CodecMisuse(
                "indirection requires a record header layout carrying the receiver".into(),
            ));
        }
        let route = scheme.clone();
        queue.set_route(Box::new(move |sender, receiver| {
            route.next_hop(sender, receiver)
        }));
        Ok(Self { queue, scheme })
    }

    /// Rank of this process.
    pub fn rank(&self) -> PeerId {
        self.queue.rank()
    }

    /// Size of the group.
    pub fn size(&self) -> usize {
        self.queue.size()
    }

    /// Counter snapshot of the underlying queue; `forwarded` counts the
    /// envelopes this rank relayed as an intermediate.
    pub fn stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// See [`BufferedQueue::synchronous_mode`].
    pub fn synchronous_mode(&mut self, enable: bool) {
        self.queue.synchronous_mode(enable);
    }

    fn first_hop(&self, receiver: PeerId) -> PeerId {
        let rank = self.queue.rank();
        if self.scheme.should_redirect(rank, receiver) {
            self.scheme.next_hop(rank, receiver)
        } else {
            receiver
        }
    }

    /// Post toward `receiver`, possibly through an intermediate.
    pub fn post(&mut self, payload: &[M], receiver: PeerId) -> Result<(), QueueError> {
        let hop = self.first_hop(receiver);
        self.queue.post_via(payload, receiver, hop)
    }

    /// Blocking variant of [`IndirectionAdapter::post`].
    pub fn post_blocking<F>(
        &mut self,
        payload: &[M],
        receiver: PeerId,
        on_message: F,
    ) -> Result<(), QueueError>
    where
        F: FnMut(Envelope<'_, M>),
    {
        let hop = self.first_hop(receiver);
        self.queue.post_via_blocking(payload, receiver, hop, on_message)
    }

    /// See [`BufferedQueue::flush_all`].
    pub fn flush_all(&mut self) -> Result<(), QueueError> {
        self.queue.flush_all()
    }

    /// See [`BufferedQueue::progress`].
    pub fn progress<F>(&mut self, on_message: F) -> Result<(), QueueError>
    where
        F: FnMut(Envelope<'_, M>),
    {
        self.queue.progress(on_message)
    }

    /// See [`BufferedQueue::terminate`]. Forwarded envelopes keep the
    /// protocol running on their own: each relay counts as a receive at
    /// the intermediate and a send onward.
    pub fn terminate<F>(&mut self, on_message: F) -> Result<bool, QueueError>
    where
        F: FnMut(Envelope<'_, M>),
    {
        self.queue.terminate(on_message)
    }

    /// The wrapped queue.
    pub fn into_inner(self) -> RoutedQueue<M, E, C, Cl> {
        self.queue
    }
}
