//! MPI backend over rsmpi (feature `mpi-support`).
//!
//! Nonblocking operations run in the static scope over boxed buffers whose
//! ownership is reclaimed at completion, so in-flight buffers stay pinned
//! without borrowing from the caller.

use core::ptr::NonNull;
use std::sync::Arc;

use mpi::collective::{CommunicatorCollectives, SystemOperation};
use mpi::datatype::{Partition, PartitionMut};
use mpi::environment::Universe;
use mpi::point_to_point::{Destination, Source};
use mpi::request::StaticScope;
use mpi::topology::{Communicator as _, SimpleCommunicator};
use mpi::traits::Equivalence;
use mpi::Count;

use super::{CommTag, Communicator, PollReduce, PollWait, ProbeInfo};
use crate::envelope::PeerId;
use crate::error::QueueError;

type ByteRequest = mpi::request::Request<'static, [u8], StaticScope>;
type WordRequest = mpi::request::Request<'static, [u64], StaticScope>;

/// MPI-backed communicator.
pub struct MpiComm {
    /// Kept alive for the lifetime of the root communicator and all of its
    /// duplicates; finalizes MPI when the last clone drops.
    _universe: Option<Arc<Universe>>,
    comm: SimpleCommunicator,
    rank: PeerId,
    size: usize,
}

unsafe impl Send for MpiComm {}
unsafe impl Sync for MpiComm {}

impl MpiComm {
    /// Initialize MPI and wrap the world communicator.
    pub fn world() -> Result<Self, QueueError> {
        let universe = mpi::initialize().ok_or_else(|| QueueError::Transport {
            peer: 0,
            reason: "MPI initialization failed (already initialized?)".into(),
        })?;
        let comm = universe.world();
        let rank = comm.rank() as PeerId;
        let size = comm.size() as usize;
        Ok(Self {
            _universe: Some(Arc::new(universe)),
            comm,
            rank,
            size,
        })
    }
}

impl Communicator for MpiComm {
    type SendHandle = MpiSendHandle;
    type RecvHandle = MpiRecvHandle;
    type ReduceHandle = MpiReduceHandle;

    fn isend(&self, peer: PeerId, tag: CommTag, buf: &[u8]) -> Result<MpiSendHandle, QueueError> {
        let boxed = buf.to_vec().into_boxed_slice();
        let raw: *mut [u8] = Box::into_raw(boxed);
        let slice: &'static [u8] = unsafe { &*raw };
        let req = self
            .comm
            .process_at_rank(peer as i32)
            .immediate_send_with_tag(StaticScope, slice, tag.as_u16() as i32);
        Ok(MpiSendHandle {
            req: Some(req),
            buf: Some(unsafe { NonNull::new_unchecked(raw) }),
        })
    }

    fn irecv(&self, peer: PeerId, tag: CommTag, len: usize) -> Result<MpiRecvHandle, QueueError> {
        let boxed = vec![0u8; len].into_boxed_slice();
        let raw: *mut [u8] = Box::into_raw(boxed);
        let slice: &'static mut [u8] = unsafe { &mut *raw };
        let req = self
            .comm
            .process_at_rank(peer as i32)
            .immediate_receive_into_with_tag(StaticScope, slice, tag.as_u16() as i32);
        Ok(MpiRecvHandle {
            req: Some(req),
            buf: Some(unsafe { NonNull::new_unchecked(raw) }),
            len,
        })
    }

    fn iprobe(&self, tag: CommTag) -> Result<Option<ProbeInfo>, QueueError> {
        let status = self
            .comm
            .any_process()
            .immediate_probe_with_tag(tag.as_u16() as i32);
        Ok(status.map(|st| ProbeInfo {
            source: st.source_rank() as PeerId,
            bytes: st.count(u8::equivalent_datatype()) as usize,
        }))
    }

    fn iallreduce_sum(
        &self,
        _tag: CommTag,
        vals: &[u64],
    ) -> Result<MpiReduceHandle, QueueError> {
        let send_raw: *mut [u64] = Box::into_raw(vals.to_vec().into_boxed_slice());
        let recv_raw: *mut [u64] = Box::into_raw(vec![0u64; vals.len()].into_boxed_slice());
        let send: &'static [u64] = unsafe { &*send_raw };
        let recv: &'static mut [u64] = unsafe { &mut *recv_raw };
        let req =
            self.comm
                .immediate_all_reduce_into(StaticScope, send, recv, SystemOperation::sum());
        Ok(MpiReduceHandle {
            req: Some(req),
            send: Some(unsafe { NonNull::new_unchecked(send_raw) }),
            recv: Some(unsafe { NonNull::new_unchecked(recv_raw) }),
        })
    }

    fn alltoallv(&self, segments: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, QueueError> {
        if segments.len() != self.size {
            return Err(QueueError::Transport {
                peer: self.rank,
                reason: format!(
                    "alltoallv expects {} segments, got {}",
                    self.size,
                    segments.len()
                ),
            });
        }
        let send_counts: Vec<Count> = segments.iter().map(|s| s.len() as Count).collect();
        let mut recv_counts = vec![0 as Count; self.size];
        self.comm
            .all_to_all_into(&send_counts[..], &mut recv_counts[..]);

        let displs = |counts: &[Count]| {
            let mut d = Vec::with_capacity(counts.len());
            let mut acc: Count = 0;
            for &c in counts {
                d.push(acc);
                acc += c;
            }
            d
        };
        let send_displs = displs(&send_counts);
        let recv_displs = displs(&recv_counts);

        let sendbuf: Vec<u8> = segments.concat();
        let total_in: usize = recv_counts.iter().map(|&c| c as usize).sum();
        let mut recvbuf = vec![0u8; total_in];
        {
            let send_part = Partition::new(&sendbuf[..], &send_counts[..], &send_displs[..]);
            let mut recv_part =
                PartitionMut::new(&mut recvbuf[..], &recv_counts[..], &recv_displs[..]);
            self.comm.all_to_all_varcount_into(&send_part, &mut recv_part);
        }

        let mut incoming = Vec::with_capacity(self.size);
        for src in 0..self.size {
            let start = recv_displs[src] as usize;
            let end = start + recv_counts[src] as usize;
            incoming.push(recvbuf[start..end].to_vec());
        }
        Ok(incoming)
    }

    fn duplicate(&self) -> Result<Self, QueueError> {
        let dup = self.comm.duplicate();
        Ok(Self {
            _universe: self._universe.clone(),
            comm: dup,
            rank: self.rank,
            size: self.size,
        })
    }

    fn rank(&self) -> PeerId {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) {
        self.comm.barrier();
    }
}

/// In-flight nonblocking send; owns its staging buffer until completion.
pub struct MpiSendHandle {
    req: Option<ByteRequest>,
    buf: Option<NonNull<[u8]>>,
}

unsafe impl Send for MpiSendHandle {}

impl PollWait for MpiSendHandle {
    fn try_wait(&mut self) -> Result<Option<Vec<u8>>, QueueError> {
        let Some(req) = self.req.take() else {
            return Ok(None);
        };
        match req.test() {
            Ok(_status) => {
                if let Some(ptr) = self.buf.take() {
                    unsafe { drop(Box::from_raw(ptr.as_ptr())) };
                }
                Ok(Some(Vec::new()))
            }
            Err(req) => {
                self.req = Some(req);
                Ok(None)
            }
        }
    }
}

impl Drop for MpiSendHandle {
    fn drop(&mut self) {
        if let Some(req) = self.req.take() {
            log::warn!("dropping an unfinished send; waiting for completion");
            let _ = req.wait();
        }
        if let Some(ptr) = self.buf.take() {
            unsafe { drop(Box::from_raw(ptr.as_ptr())) };
        }
    }
}

/// In-flight nonblocking receive; owns the landing buffer until completion.
pub struct MpiRecvHandle {
    req: Option<ByteRequest>,
    buf: Option<NonNull<[u8]>>,
    len: usize,
}

unsafe impl Send for MpiRecvHandle {}

impl PollWait for MpiRecvHandle {
    fn try_wait(&mut self) -> Result<Option<Vec<u8>>, QueueError> {
        let Some(req) = self.req.take() else {
            return Ok(None);
        };
        match req.test() {
            Ok(_status) => {
                let ptr = self.buf.take().expect("receive buffer missing");
                let boxed: Box<[u8]> = unsafe { Box::from_raw(ptr.as_ptr()) };
                let mut v = Vec::from(boxed);
                v.truncate(self.len);
                Ok(Some(v))
            }
            Err(req) => {
                self.req = Some(req);
                Ok(None)
            }
        }
    }
}

impl Drop for MpiRecvHandle {
    fn drop(&mut self) {
        if let Some(req) = self.req.take() {
            log::warn!("dropping an unfinished receive; waiting for completion");
            let _ = req.wait();
        }
        if let Some(ptr) = self.buf.take() {
            unsafe { drop(Box::from_raw(ptr.as_ptr())) };
        }
    }
}

/// In-flight nonblocking reduction.
pub struct MpiReduceHandle {
    req: Option<WordRequest>,
    send: Option<NonNull<[u64]>>,
    recv: Option<NonNull<[u64]>>,
}

unsafe impl Send for MpiReduceHandle {}

impl MpiReduceHandle {
    fn release(&mut self) -> Option<Vec<u64>> {
        if let Some(ptr) = self.send.take() {
            unsafe { drop(Box::from_raw(ptr.as_ptr())) };
        }
        self.recv.take().map(|ptr| {
            let boxed: Box<[u64]> = unsafe { Box::from_raw(ptr.as_ptr()) };
            Vec::from(boxed)
        })
    }
}

impl PollReduce for MpiReduceHandle {
    fn try_wait(&mut self) -> Result<Option<Vec<u64>>, QueueError> {
        let Some(req) = self.req.take() else {
            return Ok(None);
        };
        match req.test() {
            Ok(_status) => Ok(self.release()),
            Err(req) => {
                self.req = Some(req);
                Ok(None)
            }
        }
    }
}

impl Drop for MpiReduceHandle {
    fn drop(&mut self) {
        if let Some(req) = self.req.take() {
            log::warn!("dropping an unfinished reduction; waiting for completion");
            let _ = req.wait();
        }
        let _ = self.release();
    }
}
