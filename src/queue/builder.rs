//! Fluent configuration for [`BufferedQueue`].
//!
//! `QueueBuilder::new` starts from the append codec with the message
//! element type equal to the buffer element type; the codec setters are
//! type-changing, so the final queue type reflects exactly the configured
//! merger/splitter/cleaner. `build` duplicates the supplied group handle,
//! giving the queue a private matching context.

use std::marker::PhantomData;

use bytemuck::Pod;

use super::buffered::{BufferedQueue, OverflowPolicy};
use crate::aggregation::{
    AppendMerger, BufferCleaner, FnCleaner, Merger, NoSplitter, NoopCleaner, Splitter,
};
use crate::comm::{Communicator, QueueTags};
use crate::envelope::PeerId;
use crate::error::QueueError;

/// Per-peer buffer threshold applied when none is configured, in buffer
/// elements.
pub const DEFAULT_THRESHOLD: usize = 16 * 1024;

/// Configuration for one queue instance.
pub struct QueueBuilder<M, E, C, Mg = AppendMerger, Sp = NoSplitter, Cl = NoopCleaner> {
    comm: C,
    merger: Mg,
    splitter: Sp,
    cleaner: Cl,
    threshold: usize,
    global_threshold: usize,
    overflow: OverflowPolicy,
    pool_capacity: Option<usize>,
    tags: QueueTags,
    synchronous: bool,
    _pd: PhantomData<fn() -> (M, E)>,
}

impl<E: Pod, C: Communicator> QueueBuilder<E, E, C> {
    /// Builder over `comm` with the append codec and default limits.
    pub fn new(comm: C) -> Self {
        Self {
            comm,
            merger: AppendMerger,
            splitter: NoSplitter,
            cleaner: NoopCleaner,
            threshold: DEFAULT_THRESHOLD,
            global_threshold: usize::MAX,
            overflow: OverflowPolicy::default(),
            pool_capacity: None,
            tags: QueueTags::default(),
            synchronous: false,
            _pd: PhantomData,
        }
    }
}

impl<M, E, C, Mg, Sp> QueueBuilder<M, E, C, Mg, Sp, NoopCleaner> {
    /// Builder with an explicit codec pair, for message element types that
    /// differ from the buffer element type.
    pub fn with_codec(comm: C, merger: Mg, splitter: Sp) -> Self {
        Self {
            comm,
            merger,
            splitter,
            cleaner: NoopCleaner,
            threshold: DEFAULT_THRESHOLD,
            global_threshold: usize::MAX,
            overflow: OverflowPolicy::default(),
            pool_capacity: None,
            tags: QueueTags::default(),
            synchronous: false,
            _pd: PhantomData,
        }
    }
}

impl<M, E, C, Mg, Sp, Cl> QueueBuilder<M, E, C, Mg, Sp, Cl> {
    /// Replace the merger; fixes the message element type of the queue.
    pub fn merger<M2, Mg2>(self, merger: Mg2) -> QueueBuilder<M2, E, C, Mg2, Sp, Cl> {
        QueueBuilder {
            comm: self.comm,
            merger,
            splitter: self.splitter,
            cleaner: self.cleaner,
            threshold: self.threshold,
            global_threshold: self.global_threshold,
            overflow: self.overflow,
            pool_capacity: self.pool_capacity,
            tags: self.tags,
            synchronous: self.synchronous,
            _pd: PhantomData,
        }
    }

    /// Replace the splitter. Must agree with the merger on the wire
    /// format; the mismatch is caught by the `build` bounds.
    pub fn splitter<Sp2>(self, splitter: Sp2) -> QueueBuilder<M, E, C, Mg, Sp2, Cl> {
        QueueBuilder {
            comm: self.comm,
            merger: self.merger,
            splitter,
            cleaner: self.cleaner,
            threshold: self.threshold,
            global_threshold: self.global_threshold,
            overflow: self.overflow,
            pool_capacity: self.pool_capacity,
            tags: self.tags,
            synchronous: self.synchronous,
            _pd: PhantomData,
        }
    }

    /// Replace the buffer cleaner.
    pub fn cleaner<Cl2>(self, cleaner: Cl2) -> QueueBuilder<M, E, C, Mg, Sp, Cl2> {
        QueueBuilder {
            comm: self.comm,
            merger: self.merger,
            splitter: self.splitter,
            cleaner,
            threshold: self.threshold,
            global_threshold: self.global_threshold,
            overflow: self.overflow,
            pool_capacity: self.pool_capacity,
            tags: self.tags,
            synchronous: self.synchronous,
            _pd: PhantomData,
        }
    }

    /// Use a closure as the buffer cleaner.
    pub fn cleaner_fn<F>(
        self,
        f: F,
    ) -> QueueBuilder<M, E, C, Mg, Sp, FnCleaner<F>>
    where
        F: FnMut(&mut Vec<E>, PeerId),
    {
        self.cleaner(FnCleaner(f))
    }

    /// Per-peer outbound buffer threshold in buffer elements; exceeding it
    /// flushes that peer before the post is appended.
    pub fn threshold(mut self, elements: usize) -> Self {
        self.threshold = elements;
        self
    }

    /// Aggregate outbound threshold across all peers; exceeding it engages
    /// the overflow policy.
    pub fn global_threshold(mut self, elements: usize) -> Self {
        self.global_threshold = elements;
        self
    }

    /// Which buffers the overflow relief flushes first.
    pub fn overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow = policy;
        self
    }

    /// Request pool capacity. Defaults to eight slots per rank.
    pub fn pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = Some(capacity);
        self
    }

    /// Transport tags this queue reserves.
    pub fn tags(mut self, tags: QueueTags) -> Self {
        self.tags = tags;
        self
    }

    /// Start in synchronous (collective exchange) mode.
    pub fn synchronous(mut self, enable: bool) -> Self {
        self.synchronous = enable;
        self
    }
}

impl<M, E, C, Mg, Sp, Cl> QueueBuilder<M, E, C, Mg, Sp, Cl>
where
    M: Copy,
    E: Pod,
    C: Communicator,
    Mg: Merger<M, E>,
    Sp: Splitter<M, E>,
    Cl: BufferCleaner<E>,
{
    /// Validate the configuration, duplicate the group, and construct the
    /// queue.
    pub fn build(self) -> Result<BufferedQueue<M, E, C, Mg, Sp, Cl>, QueueError> {
        if self.threshold == 0 {
            return Err(QueueError::InvalidConfig("threshold must be positive"));
        }
        let capacity = self
            .pool_capacity
            .unwrap_or_else(|| 8 * self.comm.size().max(1));
        if capacity < 2 {
            return Err(QueueError::InvalidConfig(
                "pool capacity must be at least 2 (one receive plus one send slot)",
            ));
        }
        let comm = self.comm.duplicate()?;
        Ok(BufferedQueue::from_parts(
            comm,
            self.merger,
            self.splitter,
            self.cleaner,
            self.threshold,
            self.global_threshold,
            self.overflow,
            capacity,
            self.tags,
            self.synchronous,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::LocalGroup;

    #[test]
    fn zero_capacity_is_rejected() {
        let group = LocalGroup::new(1);
        let err = match QueueBuilder::<i32, i32, _>::new(group.comm(0))
            .pool_capacity(1)
            .build()
        {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert!(matches!(err, QueueError::InvalidConfig(_)));
    }

    #[test]
    fn build_duplicates_the_group() {
        let group = LocalGroup::new(1);
        let comm = group.comm(0);
        let queue = QueueBuilder::<i32, i32, _>::new(comm).build().unwrap();
        assert_eq!(queue.rank(), 0);
        assert_eq!(queue.size(), 1);
    }
}
