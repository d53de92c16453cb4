//! Raw concatenation codec: the message element type is the buffer element
//! type and the whole received buffer is delivered as a single envelope.

use super::{Merger, Splitter};
use crate::envelope::{Envelope, PeerId};
use crate::error::QueueError;

/// Concatenates payload elements with no framing. Every transmitted buffer
/// therefore holds exactly one wire record, however many posts fed it.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppendMerger;

impl<E: Copy> Merger<E, E> for AppendMerger {
    fn append(
        &self,
        buffer: &mut Vec<E>,
        _destination: PeerId,
        _rank: PeerId,
        envelope: Envelope<'_, E>,
    ) -> Result<u64, QueueError> {
        let opens_record = buffer.is_empty() && !envelope.payload.is_empty();
        buffer.extend_from_slice(envelope.payload);
        Ok(opens_record as u64)
    }

    fn estimate(&self, buffer: &[E], envelope: &Envelope<'_, E>) -> usize {
        buffer.len() + envelope.payload.len()
    }
}

/// Yields one envelope spanning the entire received buffer.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSplitter;

impl<E> Splitter<E, E> for NoSplitter {
    fn split<F>(
        &mut self,
        buffer: &[E],
        origin: PeerId,
        rank: PeerId,
        mut deliver: F,
    ) -> Result<u64, QueueError>
    where
        F: FnMut(Envelope<'_, E>),
    {
        if buffer.is_empty() {
            return Ok(0);
        }
        deliver(Envelope::new(buffer, origin, rank));
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coalesces_posts_into_one_record() {
        let merger = AppendMerger;
        let mut buf: Vec<i32> = Vec::new();
        let r1 = merger
            .append(&mut buf, 1, 0, Envelope::new(&[1, 2], 0, 1))
            .unwrap();
        let r2 = merger
            .append(&mut buf, 1, 0, Envelope::new(&[3], 0, 1))
            .unwrap();
        assert_eq!((r1, r2), (1, 0));
        assert_eq!(buf, vec![1, 2, 3]);

        let mut seen = Vec::new();
        let n = NoSplitter
            .split(&buf, 0, 1, |env| seen.push(env.payload.to_vec()))
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(seen, vec![vec![1, 2, 3]]);
    }

    #[test]
    fn empty_payload_does_not_open_a_record() {
        let merger = AppendMerger;
        let mut buf: Vec<i32> = Vec::new();
        let r = merger
            .append(&mut buf, 0, 0, Envelope::new(&[], 0, 0))
            .unwrap();
        assert_eq!(r, 0);
        assert!(buf.is_empty());
    }
}
