//! Decision logic for distributed termination detection.
//!
//! Each attempt reduces `[sent, received, delivered_this_call]` over the
//! group with a nonblocking sum. Quiescence is declared only when two
//! consecutive rounds return identical sums with `sent == received`:
//! the counters are monotone, so equal sums across two rounds mean no rank
//! sent or received anything between its two snapshots, and a message
//! still in flight would have raised some later `sent` or `received`
//! reading. Basing the verdict purely on the global sums keeps every rank
//! on the same branch, so the collective reduction stream never splits.
//!
//! The third counter distinguishes "quiescent and silent" from "quiescent
//! but envelopes were delivered during this call": in the latter case the
//! caller gets `false` so it can drain work its callback enqueued locally
//! and try again, which is what the
//! `while !queue.terminate(..) { drain_local() }` idiom relies on.

/// Per-call round state for the reduction-based termination protocol.
#[derive(Debug, Default)]
pub(crate) struct TerminationRounds {
    prev: Option<[u64; 3]>,
}

impl TerminationRounds {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Feed one round's global sums. Returns `Some(verdict)` when the
    /// protocol has converged: `true` if no envelope was delivered to any
    /// user callback during this call, `false` otherwise. `None` means
    /// another drain-and-reduce round is required.
    pub(crate) fn decide(&mut self, totals: [u64; 3]) -> Option<bool> {
        let stable = self.prev == Some(totals);
        self.prev = Some(totals);
        if stable && totals[0] == totals[1] {
            Some(totals[2] == 0)
        } else {
            None
        }
    }
}
