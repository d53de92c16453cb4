//! # briefkasten
//!
//! briefkasten is an asynchronous, buffered, user-level message-passing
//! library for distributed algorithms that exchange very many small
//! messages with arbitrary peers. Posts are coalesced into per-peer
//! buffers by a configurable merger codec, transmitted with nonblocking
//! point-to-point operations through a bounded request pool, reconstructed
//! by the matching splitter codec on the receiving side, and handed to a
//! user callback — together with a distributed termination protocol that
//! detects the global state in which every posted message has been
//! delivered.
//!
//! ## Features
//! - Per-peer aggregation with pluggable merger/splitter codecs
//!   (raw append, sentinel-delimited, header-framed records)
//! - Probe-driven receives sized exactly, no credit scheme needed
//! - Nonblocking request pool with configurable capacity and overflow
//!   policies for bounded outbound memory
//! - Counter-reconciliation termination detection over a nonblocking
//!   reduction
//! - Store-and-forward indirection (2-D grid scheme) to cut the number of
//!   distinct communication partners
//! - Synchronous mode exchanging buffers in collective all-to-all rounds,
//!   for deterministic debugging
//! - Pluggable communication backends: in-process threaded mailboxes for
//!   tests, MPI (via `rsmpi`) behind the `mpi-support` feature
//!
//! ## Usage
//! Add `briefkasten` as a dependency and enable features as needed:
//!
//! ```toml
//! [dependencies]
//! briefkasten = "0.3"
//! # features = ["mpi-support"]
//! ```
//!
//! A queue posts messages without stalling the sender and drains them in
//! the caller-driven termination loop:
//!
//! ```
//! use briefkasten::prelude::*;
//!
//! let group = LocalGroup::new(1);
//! let mut queue = QueueBuilder::<i64, i64, _>::new(group.comm(0)).build()?;
//! queue.post(&[1, 2, 3], 0)?;
//! let mut received = Vec::new();
//! while !queue.terminate(|env| received.extend_from_slice(env.payload))? {}
//! assert_eq!(received, vec![1, 2, 3]);
//! # Ok::<(), briefkasten::QueueError>(())
//! ```
//!
//! Progress is cooperative and single-threaded per rank: the engine only
//! advances inside `post_blocking`, `progress`, `flush`, and `terminate`.
//! Delivered payloads are borrowed views and must be copied out if they
//! are to outlive the callback.

pub mod aggregation;
pub mod comm;
pub mod envelope;
pub mod error;
pub mod indirection;
pub mod queue;
pub mod wire;

pub use error::QueueError;

/// A convenient prelude importing the most-used traits and types.
pub mod prelude {
    pub use crate::aggregation::{
        chunk_by_embedded_size, AppendMerger, BufferCleaner, HeaderLayout, Merger, NoSplitter,
        NoopCleaner, RecordMerger, RecordSplitter, SentinelMerger, SentinelSplitter, Splitter,
    };
    #[cfg(feature = "mpi-support")]
    pub use crate::comm::MpiComm;
    pub use crate::comm::{CommTag, Communicator, LocalComm, LocalGroup, PollWait, QueueTags};
    pub use crate::envelope::{CounterPair, Envelope, PeerId, Tag};
    pub use crate::error::QueueError;
    pub use crate::indirection::{DirectScheme, GridScheme, IndirectionAdapter, IndirectionScheme};
    pub use crate::queue::{BufferedQueue, OverflowPolicy, QueueBuilder, QueueStats};
}
