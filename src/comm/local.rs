//! In-process communication backend: one endpoint per simulated rank,
//! backed by shared mailbox state.
//!
//! Mailboxes are FIFO queues keyed by `(src, dst, tag)` behind a mutex and
//! condvar. Collectives (barrier, summing reduction, all-to-all) run over
//! shared round-keyed accumulators; as with MPI, every rank must enter
//! collectives for a given group in the same order.
//!
//! Unlike a process-global mailbox, all state hangs off a [`LocalGroup`],
//! so independent groups (and group duplicates) in one process never
//! interfere.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use super::{CommTag, Communicator, PollReduce, PollWait, ProbeInfo};
use crate::envelope::PeerId;
use crate::error::QueueError;

type Key = (PeerId, PeerId, u16); // (src, dst, tag)

type MailCell = (Mutex<VecDeque<Vec<u8>>>, Condvar);

#[derive(Default)]
struct ReduceRound {
    acc: Vec<u64>,
    contributed: usize,
    taken: usize,
}

struct ExchangeRound {
    /// Per-source deposit: that source's per-destination segments.
    deposits: Vec<Option<Vec<Vec<u8>>>>,
    taken: usize,
}

#[derive(Default)]
struct EpochBarrier {
    arrived: usize,
    epoch: u64,
}

struct GroupState {
    size: usize,
    mailboxes: Mutex<HashMap<Key, Arc<MailCell>>>,
    barrier: Mutex<EpochBarrier>,
    barrier_cv: Condvar,
    reduces: Mutex<HashMap<(u16, u64), ReduceRound>>,
    exchanges: Mutex<HashMap<u64, ExchangeRound>>,
    exchange_cv: Condvar,
    /// Duplicated groups, indexed by duplication round.
    children: Mutex<Vec<Arc<GroupState>>>,
}

impl GroupState {
    fn new(size: usize) -> Arc<Self> {
        Arc::new(Self {
            size,
            mailboxes: Mutex::new(HashMap::new()),
            barrier: Mutex::new(EpochBarrier::default()),
            barrier_cv: Condvar::new(),
            reduces: Mutex::new(HashMap::new()),
            exchanges: Mutex::new(HashMap::new()),
            exchange_cv: Condvar::new(),
            children: Mutex::new(Vec::new()),
        })
    }

    fn mailbox(&self, key: Key) -> Arc<MailCell> {
        let mut map = self.mailboxes.lock().expect("mailbox map poisoned");
        map.entry(key)
            .or_insert_with(|| Arc::new((Mutex::new(VecDeque::new()), Condvar::new())))
            .clone()
    }

    /// Mailbox lookup that does not create empty cells (probe path).
    fn peek_mailbox(&self, key: Key) -> Option<Arc<MailCell>> {
        let map = self.mailboxes.lock().expect("mailbox map poisoned");
        map.get(&key).cloned()
    }
}

/// Factory for the endpoints of one in-process group.
pub struct LocalGroup {
    state: Arc<GroupState>,
}

impl LocalGroup {
    /// Create a group of `size` simulated ranks.
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "group must have at least one rank");
        Self {
            state: GroupState::new(size),
        }
    }

    /// Endpoint for `rank`. Endpoints are meant to be moved into one thread
    /// each; handing the same rank out twice aliases its mailboxes.
    pub fn comm(&self, rank: PeerId) -> LocalComm {
        assert!(rank < self.state.size, "rank out of range");
        LocalComm {
            state: Arc::clone(&self.state),
            rank,
            reduce_rounds: Mutex::new(HashMap::new()),
            exchange_round: AtomicU64::new(0),
            dup_round: AtomicU64::new(0),
        }
    }

    /// All endpoints in rank order.
    pub fn comms(&self) -> Vec<LocalComm> {
        (0..self.state.size).map(|r| self.comm(r)).collect()
    }
}

/// One rank's endpoint of a [`LocalGroup`].
pub struct LocalComm {
    state: Arc<GroupState>,
    rank: PeerId,
    /// Next reduction round per control tag (collective-order bookkeeping).
    reduce_rounds: Mutex<HashMap<u16, u64>>,
    exchange_round: AtomicU64,
    dup_round: AtomicU64,
}

impl std::fmt::Debug for LocalComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalComm")
            .field("rank", &self.rank)
            .field("size", &self.state.size)
            .finish()
    }
}

impl LocalComm {
    fn check_peer(&self, peer: PeerId) -> Result<(), QueueError> {
        if peer >= self.state.size {
            return Err(QueueError::PeerOutOfRange {
                peer,
                size: self.state.size,
            });
        }
        Ok(())
    }
}

/// Send handle; local deposits complete at initiation.
#[derive(Debug)]
pub struct LocalSendHandle {
    done: bool,
}

impl PollWait for LocalSendHandle {
    fn try_wait(&mut self) -> Result<Option<Vec<u8>>, QueueError> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        Ok(Some(Vec::new()))
    }
}

/// Receive handle polling one mailbox cell.
pub struct LocalRecvHandle {
    cell: Arc<MailCell>,
    want: usize,
    source: PeerId,
    done: bool,
}

impl PollWait for LocalRecvHandle {
    fn try_wait(&mut self) -> Result<Option<Vec<u8>>, QueueError> {
        if self.done {
            return Ok(None);
        }
        let (lock, _cv) = &*self.cell;
        let mut q = lock.lock().expect("mailbox cell poisoned");
        match q.pop_front() {
            None => Ok(None),
            Some(msg) => {
                if msg.len() != self.want {
                    return Err(QueueError::BufferSizeMismatch {
                        peer: self.source,
                        expected: self.want,
                        got: msg.len(),
                    });
                }
                self.done = true;
                Ok(Some(msg))
            }
        }
    }
}

/// Reduction handle polling a shared round accumulator.
pub struct LocalReduceHandle {
    state: Arc<GroupState>,
    key: (u16, u64),
    done: bool,
}

impl PollReduce for LocalReduceHandle {
    fn try_wait(&mut self) -> Result<Option<Vec<u64>>, QueueError> {
        if self.done {
            return Ok(None);
        }
        let mut rounds = self.state.reduces.lock().expect("reduce map poisoned");
        let size = self.state.size;
        let Some(round) = rounds.get_mut(&self.key) else {
            return Ok(None);
        };
        if round.contributed < size {
            return Ok(None);
        }
        let result = round.acc.clone();
        round.taken += 1;
        if round.taken == size {
            rounds.remove(&self.key);
        }
        self.done = true;
        Ok(Some(result))
    }
}

impl Communicator for LocalComm {
    type SendHandle = LocalSendHandle;
    type RecvHandle = LocalRecvHandle;
    type ReduceHandle = LocalReduceHandle;

    fn isend(&self, peer: PeerId, tag: CommTag, buf: &[u8]) -> Result<LocalSendHandle, QueueError> {
        self.check_peer(peer)?;
        let cell = self.state.mailbox((self.rank, peer, tag.as_u16()));
        let (lock, cv) = &*cell;
        {
            let mut q = lock.lock().expect("mailbox cell poisoned");
            q.push_back(buf.to_vec());
        }
        cv.notify_all();
        Ok(LocalSendHandle { done: false })
    }

    fn irecv(&self, peer: PeerId, tag: CommTag, len: usize) -> Result<LocalRecvHandle, QueueError> {
        self.check_peer(peer)?;
        Ok(LocalRecvHandle {
            cell: self.state.mailbox((peer, self.rank, tag.as_u16())),
            want: len,
            source: peer,
            done: false,
        })
    }

    fn iprobe(&self, tag: CommTag) -> Result<Option<ProbeInfo>, QueueError> {
        for src in 0..self.state.size {
            let Some(cell) = self.state.peek_mailbox((src, self.rank, tag.as_u16())) else {
                continue;
            };
            let (lock, _cv) = &*cell;
            let q = lock.lock().expect("mailbox cell poisoned");
            if let Some(front) = q.front() {
                return Ok(Some(ProbeInfo {
                    source: src,
                    bytes: front.len(),
                }));
            }
        }
        Ok(None)
    }

    fn iallreduce_sum(
        &self,
        tag: CommTag,
        vals: &[u64],
    ) -> Result<LocalReduceHandle, QueueError> {
        let round = {
            let mut rounds = self.reduce_rounds.lock().expect("round map poisoned");
            let ctr = rounds.entry(tag.as_u16()).or_insert(0);
            let r = *ctr;
            *ctr += 1;
            r
        };
        let key = (tag.as_u16(), round);
        let mut rounds = self.state.reduces.lock().expect("reduce map poisoned");
        let entry = rounds.entry(key).or_default();
        if entry.acc.is_empty() {
            entry.acc = vec![0; vals.len()];
        }
        if entry.acc.len() != vals.len() {
            return Err(QueueError::Transport {
                peer: self.rank,
                reason: format!(
                    "reduction length mismatch: {} vs {}",
                    entry.acc.len(),
                    vals.len()
                ),
            });
        }
        for (a, v) in entry.acc.iter_mut().zip(vals) {
            *a += v;
        }
        entry.contributed += 1;
        drop(rounds);
        Ok(LocalReduceHandle {
            state: Arc::clone(&self.state),
            key,
            done: false,
        })
    }

    fn alltoallv(&self, segments: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, QueueError> {
        let size = self.state.size;
        if segments.len() != size {
            return Err(QueueError::Transport {
                peer: self.rank,
                reason: format!("alltoallv expects {size} segments, got {}", segments.len()),
            });
        }
        let round = self.exchange_round.fetch_add(1, Ordering::Relaxed);
        let mut exchanges = self.state.exchanges.lock().expect("exchange map poisoned");
        {
            let entry = exchanges.entry(round).or_insert_with(|| ExchangeRound {
                deposits: (0..size).map(|_| None).collect(),
                taken: 0,
            });
            entry.deposits[self.rank] = Some(segments);
        }
        self.state.exchange_cv.notify_all();
        loop {
            let ready = exchanges
                .get(&round)
                .map(|e| e.deposits.iter().all(Option::is_some))
                .unwrap_or(false);
            if ready {
                break;
            }
            exchanges = self
                .state
                .exchange_cv
                .wait(exchanges)
                .expect("exchange map poisoned");
        }
        let mut incoming = Vec::with_capacity(size);
        let remove = {
            let entry = exchanges.get_mut(&round).expect("exchange round vanished");
            for src in 0..size {
                let deposit = entry.deposits[src].as_ref().expect("deposit missing");
                incoming.push(deposit[self.rank].clone());
            }
            entry.taken += 1;
            entry.taken == size
        };
        if remove {
            exchanges.remove(&round);
        }
        Ok(incoming)
    }

    fn duplicate(&self) -> Result<Self, QueueError> {
        let idx = self.dup_round.fetch_add(1, Ordering::Relaxed) as usize;
        let child = {
            let mut children = self.state.children.lock().expect("children poisoned");
            while children.len() <= idx {
                children.push(GroupState::new(self.state.size));
            }
            Arc::clone(&children[idx])
        };
        Ok(LocalComm {
            state: child,
            rank: self.rank,
            reduce_rounds: Mutex::new(HashMap::new()),
            exchange_round: AtomicU64::new(0),
            dup_round: AtomicU64::new(0),
        })
    }

    fn rank(&self) -> PeerId {
        self.rank
    }

    fn size(&self) -> usize {
        self.state.size
    }

    fn barrier(&self) {
        let mut b = self.state.barrier.lock().expect("barrier poisoned");
        let epoch = b.epoch;
        b.arrived += 1;
        if b.arrived == self.state.size {
            b.arrived = 0;
            b.epoch += 1;
            self.state.barrier_cv.notify_all();
        } else {
            while b.epoch == epoch {
                b = self.state.barrier_cv.wait(b).expect("barrier poisoned");
            }
        }
    }
}
