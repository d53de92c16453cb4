//! Buffered message queue: per-peer outbound aggregation, probe-driven
//! delivery through a splitter, and distributed termination detection.
//!
//! Progress is cooperative and single-threaded: it happens inside
//! [`BufferedQueue::progress`], [`BufferedQueue::terminate`], the blocking
//! posts, and nowhere else. The non-blocking [`BufferedQueue::post`] never
//! drives the transport; when an implied flush cannot acquire a request
//! slot it reports [`QueueError::Backpressure`] instead.

use bytemuck::Pod;

use super::raw::RawQueue;
use super::termination::TerminationRounds;
use crate::aggregation::{BufferCleaner, Merger, Splitter};
use crate::comm::{Communicator, PollReduce, QueueTags};
use crate::envelope::{Envelope, PeerId};
use crate::error::QueueError;
use crate::wire;

/// Which peer buffers to flush when the aggregate exceeds the global
/// threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Flush the largest outbound buffer first.
    #[default]
    LargestFirst,
    /// Flush nonempty buffers in rotating rank order.
    RoundRobin,
}

/// Counter snapshot of one queue instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Wire records handed to the transport.
    pub sent: u64,
    /// Envelopes reconstructed from received buffers.
    pub received: u64,
    /// Envelopes delivered to the user callback.
    pub delivered: u64,
    /// Envelopes forwarded toward their final receiver without delivery.
    pub forwarded: u64,
}

struct OutSlot<E> {
    buf: Vec<E>,
    records: u64,
}

type Route = Box<dyn Fn(PeerId, PeerId) -> PeerId + Send + Sync>;

/// Asynchronous buffered message queue over a [`Communicator`].
///
/// Built via [`crate::queue::QueueBuilder`]; generic over the message
/// element type `M`, the buffer element type `E`, and the merger/splitter/
/// cleaner codecs, all monomorphized per instance.
pub struct BufferedQueue<M, E: Pod, C: Communicator, Mg, Sp, Cl> {
    raw: RawQueue<E, C>,
    merger: Mg,
    splitter: Sp,
    cleaner: Cl,
    out: Vec<OutSlot<E>>,
    total_buffered: usize,
    threshold: usize,
    global_threshold: usize,
    overflow: OverflowPolicy,
    next_victim: PeerId,
    synchronous: bool,
    route: Option<Route>,
    pending_forwards: Vec<(Vec<M>, PeerId)>,
    delivered: u64,
    delivered_epoch: u64,
    forwarded: u64,
}

impl<M, E, C, Mg, Sp, Cl> BufferedQueue<M, E, C, Mg, Sp, Cl>
where
    M: Copy,
    E: Pod,
    C: Communicator,
    Mg: Merger<M, E>,
    Sp: Splitter<M, E>,
    Cl: BufferCleaner<E>,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        comm: C,
        merger: Mg,
        splitter: Sp,
        cleaner: Cl,
        threshold: usize,
        global_threshold: usize,
        overflow: OverflowPolicy,
        pool_capacity: usize,
        tags: QueueTags,
        synchronous: bool,
    ) -> Self {
        let size = comm.size();
        let mut out = Vec::with_capacity(size);
        out.resize_with(size, || OutSlot {
            buf: Vec::new(),
            records: 0,
        });
        Self {
            raw: RawQueue::new(comm, tags, pool_capacity),
            merger,
            splitter,
            cleaner,
            out,
            total_buffered: 0,
            threshold,
            global_threshold,
            overflow,
            next_victim: 0,
            synchronous,
            route: None,
            pending_forwards: Vec::new(),
            delivered: 0,
            delivered_epoch: 0,
            forwarded: 0,
        }
    }

    /// Rank of this process in the queue's group.
    pub fn rank(&self) -> PeerId {
        self.raw.rank()
    }

    /// Size of the queue's group.
    pub fn size(&self) -> usize {
        self.raw.size()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> QueueStats {
        let counters = self.raw.counters();
        QueueStats {
            sent: counters.sent,
            received: counters.received,
            delivered: self.delivered,
            forwarded: self.forwarded,
        }
    }

    /// Switch between the nonblocking transport and the collective
    /// exchange path. Only toggle while the queue is quiescent (freshly
    /// built or right after a successful [`BufferedQueue::terminate`]).
    pub fn synchronous_mode(&mut self, enable: bool) {
        self.synchronous = enable;
    }

    pub(crate) fn merger(&self) -> &Mg {
        &self.merger
    }

    /// Install the forwarding route used for envelopes whose designated
    /// receiver is another rank: `(local_rank, final_receiver) -> next hop`.
    pub(crate) fn set_route(&mut self, route: Route) {
        self.route = Some(route);
    }

    fn check_peer(&self, peer: PeerId) -> Result<(), QueueError> {
        if peer >= self.size() {
            return Err(QueueError::PeerOutOfRange {
                peer,
                size: self.size(),
            });
        }
        Ok(())
    }

    /// Append one message to the receiver's outbound buffer without
    /// driving any progress. Reports [`QueueError::Backpressure`] when a
    /// threshold-implied flush cannot acquire a request slot.
    pub fn post(&mut self, payload: &[M], receiver: PeerId) -> Result<(), QueueError> {
        self.check_peer(receiver)?;
        self.post_impl(payload, receiver, receiver, false)
    }

    /// Like [`BufferedQueue::post`], but aggregate into `hop`'s buffer
    /// while the envelope keeps `receiver` as its designated receiver.
    /// Only meaningful with a codec that carries the receiver on the wire.
    pub fn post_via(
        &mut self,
        payload: &[M],
        receiver: PeerId,
        hop: PeerId,
    ) -> Result<(), QueueError> {
        self.check_peer(receiver)?;
        self.check_peer(hop)?;
        self.post_impl(payload, receiver, hop, false)
    }

    /// Post, driving progress rounds (and delivering envelopes to
    /// `on_message`) until local backpressure clears.
    pub fn post_blocking<F>(
        &mut self,
        payload: &[M],
        receiver: PeerId,
        on_message: F,
    ) -> Result<(), QueueError>
    where
        F: FnMut(Envelope<'_, M>),
    {
        self.post_via_blocking(payload, receiver, receiver, on_message)
    }

    /// Blocking variant of [`BufferedQueue::post_via`].
    pub fn post_via_blocking<F>(
        &mut self,
        payload: &[M],
        receiver: PeerId,
        hop: PeerId,
        mut on_message: F,
    ) -> Result<(), QueueError>
    where
        F: FnMut(Envelope<'_, M>),
    {
        self.check_peer(receiver)?;
        self.check_peer(hop)?;
        loop {
            match self.post_impl(payload, receiver, hop, false) {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() => self.progress_async(&mut on_message)?,
                Err(e) => return Err(e),
            }
        }
    }

    fn post_impl(
        &mut self,
        payload: &[M],
        env_receiver: PeerId,
        slot_peer: PeerId,
        spin: bool,
    ) -> Result<(), QueueError> {
        let rank = self.raw.rank();
        let env = Envelope {
            payload,
            sender: rank,
            receiver: env_receiver,
            tag: 0,
        };
        if !self.synchronous {
            let projected = self.merger.estimate(&self.out[slot_peer].buf, &env);
            if projected > self.threshold && !self.out[slot_peer].buf.is_empty() {
                if !spin && self.raw.send_would_block() {
                    return Err(QueueError::Backpressure {
                        capacity: self.raw.pool_capacity(),
                    });
                }
                self.flush(slot_peer)?;
            }
            if self.global_threshold != usize::MAX {
                let projected = self.merger.estimate(&self.out[slot_peer].buf, &env);
                let delta = projected.saturating_sub(self.out[slot_peer].buf.len());
                self.relieve_overflow(delta, spin)?;
            }
        }
        let slot = &mut self.out[slot_peer];
        let before = slot.buf.len();
        let records = self.merger.append(&mut slot.buf, slot_peer, rank, env)?;
        slot.records += records;
        self.total_buffered += self.out[slot_peer].buf.len() - before;
        Ok(())
    }

    /// Flush peers according to the overflow policy until the aggregate
    /// plus `incoming` fits under the global threshold.
    fn relieve_overflow(&mut self, incoming: usize, spin: bool) -> Result<(), QueueError> {
        while self.total_buffered + incoming > self.global_threshold {
            let victim = match self.overflow {
                OverflowPolicy::LargestFirst => self
                    .out
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| !s.buf.is_empty())
                    .max_by_key(|(_, s)| s.buf.len())
                    .map(|(peer, _)| peer),
                OverflowPolicy::RoundRobin => {
                    let size = self.out.len();
                    (0..size)
                        .map(|i| (self.next_victim + i) % size)
                        .find(|&peer| !self.out[peer].buf.is_empty())
                }
            };
            let Some(victim) = victim else {
                break;
            };
            if !spin && self.raw.send_would_block() {
                return Err(QueueError::Backpressure {
                    capacity: self.raw.pool_capacity(),
                });
            }
            self.flush(victim)?;
            if self.overflow == OverflowPolicy::RoundRobin {
                self.next_victim = (victim + 1) % self.out.len();
            }
        }
        Ok(())
    }

    /// Hand `peer`'s outbound buffer to the transport if it is nonempty.
    /// Runs the buffer cleaner first. Spins on transport progress while
    /// the request pool is full.
    pub fn flush(&mut self, peer: PeerId) -> Result<(), QueueError> {
        self.check_peer(peer)?;
        if self.synchronous {
            return Err(QueueError::InvalidConfig(
                "per-peer flush is unavailable in synchronous mode",
            ));
        }
        if self.out[peer].buf.is_empty() {
            return Ok(());
        }
        let pre = self.out[peer].buf.len();
        self.cleaner.clean(&mut self.out[peer].buf, peer);
        let slot = &mut self.out[peer];
        let records = std::mem::replace(&mut slot.records, 0);
        let buf = std::mem::take(&mut slot.buf);
        self.total_buffered -= pre;
        if buf.is_empty() {
            return Ok(());
        }
        self.raw.post(buf, peer, records)
    }

    /// Flush every nonempty outbound buffer.
    pub fn flush_all(&mut self) -> Result<(), QueueError> {
        if self.synchronous {
            return Err(QueueError::InvalidConfig(
                "synchronous mode flushes collectively in progress/terminate",
            ));
        }
        for peer in 0..self.size() {
            self.flush(peer)?;
        }
        Ok(())
    }

    /// One progress round: poll the request pool, probe and initiate
    /// receives, run received buffers through the splitter, deliver
    /// envelopes to `on_message`, and re-post pending forwards.
    ///
    /// In synchronous mode this instead performs one collective exchange
    /// round and must be entered by every rank of the group together.
    pub fn progress<F>(&mut self, mut on_message: F) -> Result<(), QueueError>
    where
        F: FnMut(Envelope<'_, M>),
    {
        if self.synchronous {
            self.exchange_round(&mut on_message)?;
            return Ok(());
        }
        self.progress_async(&mut on_message)
    }

    fn progress_async<F>(&mut self, on_message: &mut F) -> Result<(), QueueError>
    where
        F: FnMut(Envelope<'_, M>),
    {
        self.raw.progress_transport()?;
        self.dispatch_received(on_message)?;
        self.repost_forwards()
    }

    fn dispatch_received<F>(&mut self, on_message: &mut F) -> Result<(), QueueError>
    where
        F: FnMut(Envelope<'_, M>),
    {
        let rank = self.raw.rank();
        while let Some((origin, buf)) = self.raw.take_received() {
            self.dispatch_buffer(origin, &buf, rank, on_message)?;
        }
        Ok(())
    }

    fn dispatch_buffer<F>(
        &mut self,
        origin: PeerId,
        buf: &[E],
        rank: PeerId,
        on_message: &mut F,
    ) -> Result<(), QueueError>
    where
        F: FnMut(Envelope<'_, M>),
    {
        let splitter = &mut self.splitter;
        let routed = self.route.is_some();
        let forwards = &mut self.pending_forwards;
        let mut delivered_now = 0u64;
        let mut forwarded_now = 0u64;
        let n = splitter.split(buf, origin, rank, |env| {
            if routed && env.receiver != rank {
                forwards.push((env.payload.to_vec(), env.receiver));
                forwarded_now += 1;
            } else {
                delivered_now += 1;
                on_message(env);
            }
        })?;
        self.raw.note_received(n);
        self.delivered += delivered_now;
        self.delivered_epoch += delivered_now;
        self.forwarded += forwarded_now;
        Ok(())
    }

    /// Re-post stashed store-and-forward envelopes toward their next hop.
    /// Forwards use the spinning post path; dropping one would break the
    /// conservation invariant.
    fn repost_forwards(&mut self) -> Result<(), QueueError> {
        if self.pending_forwards.is_empty() {
            return Ok(());
        }
        let rank = self.raw.rank();
        let batch = std::mem::take(&mut self.pending_forwards);
        for (payload, receiver) in &batch {
            let hop = match &self.route {
                Some(route) => route(rank, *receiver),
                None => *receiver,
            };
            self.post_impl(payload, *receiver, hop, true)?;
        }
        Ok(())
    }

    fn outbound_empty(&self) -> bool {
        self.out.iter().all(|s| s.buf.is_empty())
    }

    /// Drive termination detection to completion.
    ///
    /// Returns `Ok(true)` in the global quiescent state: every posted
    /// record has been received, every envelope delivered, and no rank
    /// delivered anything to its callback during this call. Returns
    /// `Ok(false)` when quiescence was reached but envelopes were
    /// delivered along the way — the caller owns work its callback
    /// enqueued and is expected to drain and call again, as in
    /// `while !queue.terminate(&mut cb) { drain_local(); }`.
    ///
    /// Collective: every rank of the group must call `terminate` together.
    pub fn terminate<F>(&mut self, mut on_message: F) -> Result<bool, QueueError>
    where
        F: FnMut(Envelope<'_, M>),
    {
        self.delivered_epoch = 0;
        if self.synchronous {
            return self.terminate_collective(&mut on_message);
        }
        let control = self.raw.tags().control;
        let mut rounds = TerminationRounds::new();
        loop {
            loop {
                self.flush_all()?;
                self.progress_async(&mut on_message)?;
                if self.raw.idle() && self.outbound_empty() && self.pending_forwards.is_empty() {
                    break;
                }
            }
            let counters = self.raw.counters();
            let snapshot = [counters.sent, counters.received, self.delivered_epoch];
            let mut reduction = self.raw.comm().iallreduce_sum(control, &snapshot)?;
            let totals = loop {
                if let Some(totals) = reduction.try_wait()? {
                    break totals;
                }
                self.progress_async(&mut on_message)?;
                std::thread::yield_now();
            };
            let totals: [u64; 3] = totals.try_into().map_err(|_| QueueError::Transport {
                peer: self.raw.rank(),
                reason: "termination reduction arity mismatch".into(),
            })?;
            log::trace!(
                "termination round on rank {}: sent {} received {} delivered {}",
                self.raw.rank(),
                totals[0],
                totals[1],
                totals[2],
            );
            if let Some(verdict) = rounds.decide(totals) {
                debug_assert!(self.raw.idle() && self.outbound_empty());
                return Ok(verdict);
            }
        }
    }

    fn terminate_collective<F>(&mut self, on_message: &mut F) -> Result<bool, QueueError>
    where
        F: FnMut(Envelope<'_, M>),
    {
        let control = self.raw.tags().control;
        loop {
            let moved = self.exchange_round(on_message)?;
            let snapshot = [moved, self.delivered_epoch];
            let mut reduction = self.raw.comm().iallreduce_sum(control, &snapshot)?;
            let totals = loop {
                if let Some(totals) = reduction.try_wait()? {
                    break totals;
                }
                std::thread::yield_now();
            };
            log::trace!(
                "collective round on rank {}: moved {} delivered {}",
                self.raw.rank(),
                totals[0],
                totals[1],
            );
            if totals[0] == 0 {
                return Ok(totals[1] == 0);
            }
        }
    }

    /// One collective exchange: contribute every outbound buffer to an
    /// all-to-all round, split what arrives, deliver, and queue forwards
    /// for the next round. Returns the number of records this rank moved.
    fn exchange_round<F>(&mut self, on_message: &mut F) -> Result<u64, QueueError>
    where
        F: FnMut(Envelope<'_, M>),
    {
        let size = self.raw.size();
        let rank = self.raw.rank();
        let mut moved = 0u64;
        let mut segments = Vec::with_capacity(size);
        for peer in 0..size {
            if !self.out[peer].buf.is_empty() {
                self.cleaner.clean(&mut self.out[peer].buf, peer);
            }
            let slot = &mut self.out[peer];
            moved += std::mem::replace(&mut slot.records, 0);
            let buf = std::mem::take(&mut slot.buf);
            segments.push(wire::cast_slice(&buf).to_vec());
        }
        self.total_buffered = 0;
        self.raw.note_sent(moved);
        let incoming = self.raw.comm().alltoallv(segments)?;
        for (origin, bytes) in incoming.into_iter().enumerate() {
            if bytes.is_empty() {
                continue;
            }
            let elems: Vec<E> = wire::bytes_to_elems(&bytes, origin)?;
            self.dispatch_buffer(origin, &elems, rank, on_message)?;
        }
        self.repost_forwards()?;
        Ok(moved)
    }
}
