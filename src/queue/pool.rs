//! Fixed-capacity pool of in-flight nonblocking operations.
//!
//! Each slot holds one send or receive handle; the handle owns its buffer
//! until completion, so nothing else can touch an in-flight buffer.
//! Completed slots are reaped by polling and immediately reusable.

use crate::comm::{Communicator, PollWait};
use crate::envelope::PeerId;
use crate::error::QueueError;

/// Direction of a pooled operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// Outbound transfer.
    Send,
    /// Inbound transfer.
    Recv,
}

/// A reaped operation: its peer, direction, and (for receives) the data.
#[derive(Debug)]
pub struct Completion {
    /// Remote rank of the operation.
    pub peer: PeerId,
    /// Direction.
    pub kind: OpKind,
    /// Received bytes; empty for sends.
    pub payload: Vec<u8>,
}

enum SlotOp<C: Communicator> {
    Send(C::SendHandle),
    Recv(C::RecvHandle),
}

struct RequestSlot<C: Communicator> {
    peer: PeerId,
    op: SlotOp<C>,
}

/// Bounded collection of outstanding nonblocking operations.
pub struct RequestPool<C: Communicator> {
    slots: Vec<Option<RequestSlot<C>>>,
    free: Vec<usize>,
}

impl<C: Communicator> RequestPool<C> {
    /// Pool with room for `capacity` concurrent operations.
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            free: (0..capacity).rev().collect(),
        }
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of outstanding operations.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// True when no operation is outstanding.
    pub fn is_empty(&self) -> bool {
        self.free.len() == self.slots.len()
    }

    /// True when no slot is available.
    pub fn is_full(&self) -> bool {
        self.free.is_empty()
    }

    /// Track an initiated send. Callers check [`RequestPool::is_full`]
    /// before initiating; a full pool is a backpressure error.
    pub fn insert_send(&mut self, peer: PeerId, handle: C::SendHandle) -> Result<(), QueueError> {
        self.insert(peer, SlotOp::Send(handle))
    }

    /// Track an initiated receive.
    pub fn insert_recv(&mut self, peer: PeerId, handle: C::RecvHandle) -> Result<(), QueueError> {
        self.insert(peer, SlotOp::Recv(handle))
    }

    fn insert(&mut self, peer: PeerId, op: SlotOp<C>) -> Result<(), QueueError> {
        let Some(idx) = self.free.pop() else {
            return Err(QueueError::Backpressure {
                capacity: self.capacity(),
            });
        };
        self.slots[idx] = Some(RequestSlot { peer, op });
        Ok(())
    }

    /// Test every outstanding operation once, moving completed ones into
    /// `out`. Returns the number reaped.
    pub fn poll_into(&mut self, out: &mut Vec<Completion>) -> Result<usize, QueueError> {
        let mut reaped = 0;
        for idx in 0..self.slots.len() {
            let Some(slot) = self.slots[idx].as_mut() else {
                continue;
            };
            let completed = match &mut slot.op {
                SlotOp::Send(h) => h.try_wait()?.map(|payload| (OpKind::Send, payload)),
                SlotOp::Recv(h) => h.try_wait()?.map(|payload| (OpKind::Recv, payload)),
            };
            if let Some((kind, payload)) = completed {
                let peer = slot.peer;
                self.slots[idx] = None;
                self.free.push(idx);
                out.push(Completion {
                    peer,
                    kind,
                    payload,
                });
                reaped += 1;
            }
        }
        Ok(reaped)
    }

    /// Poll until every outstanding operation has completed. The matching
    /// remote operations must already be in flight; the queue layer only
    /// drains once its own progress is done.
    pub fn drain_into(&mut self, out: &mut Vec<Completion>) -> Result<(), QueueError> {
        while !self.is_empty() {
            if self.poll_into(out)? == 0 {
                std::hint::spin_loop();
            }
        }
        Ok(())
    }
}
