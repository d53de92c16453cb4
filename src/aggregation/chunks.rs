//! Chunking a buffer by an embedded size field.
//!
//! A record stores its own extent at a fixed offset; the iterator advances
//! by `size_offset + 1 + stored` elements per record, so it never needs to
//! know how many header fields follow the size slot (the stored value is
//! size-inclusive, see [`super::RecordMerger`]).

use crate::wire::HeaderElem;

/// Iterator over records of a size-prefixed buffer. Yields whole records,
/// header included. A trailing fragment too short for its declared extent
/// (or too short to hold the size field at all) is yielded as-is; callers
/// that care validate lengths downstream.
#[derive(Debug, Clone)]
pub struct ChunkBySize<'a, E> {
    rest: &'a [E],
    size_offset: usize,
}

/// Chunk `buffer` into records whose extent is stored `size_offset`
/// elements into each record.
pub fn chunk_by_embedded_size<E: HeaderElem>(
    buffer: &[E],
    size_offset: usize,
) -> ChunkBySize<'_, E> {
    ChunkBySize {
        rest: buffer,
        size_offset,
    }
}

impl<'a, E: HeaderElem> Iterator for ChunkBySize<'a, E> {
    type Item = &'a [E];

    fn next(&mut self) -> Option<&'a [E]> {
        if self.rest.is_empty() {
            return None;
        }
        if self.rest.len() <= self.size_offset {
            let fragment = self.rest;
            self.rest = &[];
            return Some(fragment);
        }
        let stored = self.rest[self.size_offset].to_usize();
        let end = (self.size_offset + 1 + stored).min(self.rest.len());
        let (chunk, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(chunk)
    }
}
