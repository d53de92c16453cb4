//! Property tests: merge-then-split is the identity on envelope payloads
//! for every codec family.

use briefkasten::prelude::*;
use proptest::collection::vec;
use proptest::prelude::*;

const SENTINEL: i32 = i32::MIN;

fn payloads() -> impl Strategy<Value = Vec<Vec<i32>>> {
    vec(vec(-1_000_000i32..1_000_000, 0..12), 1..24)
}

proptest! {
    #[test]
    fn sentinel_round_trip(inputs in payloads()) {
        let merger = SentinelMerger::new(SENTINEL);
        let mut buf: Vec<i32> = Vec::new();
        for payload in &inputs {
            merger
                .append(&mut buf, 1, 0, Envelope::new(payload, 0, 1))
                .unwrap();
        }
        let mut splitter = SentinelSplitter::new(SENTINEL);
        let mut out: Vec<Vec<i32>> = Vec::new();
        let n = splitter
            .split(&buf, 0, 1, |env| out.push(env.payload.to_vec()))
            .unwrap();
        prop_assert_eq!(n as usize, inputs.len());
        prop_assert_eq!(out, inputs);
    }

    #[test]
    fn record_round_trip_scalars(
        inputs in payloads(),
        sender_field in any::<bool>(),
        tag_field in any::<bool>(),
    ) {
        let layout = HeaderLayout { sender: sender_field, receiver: true, tag: tag_field };
        let merger = RecordMerger::<i32, i64>::with_layout(layout);
        let mut buf: Vec<i64> = Vec::new();
        for (i, payload) in inputs.iter().enumerate() {
            merger
                .append(
                    &mut buf,
                    i % 3,
                    5,
                    Envelope { payload, sender: 5, receiver: i % 3, tag: i as Tag },
                )
                .unwrap();
        }
        let mut splitter = RecordSplitter::<i32, i64>::with_layout(layout);
        let mut out: Vec<(Vec<i32>, PeerId, PeerId, Tag)> = Vec::new();
        splitter
            .split(&buf, 5, 0, |env| {
                out.push((env.payload.to_vec(), env.sender, env.receiver, env.tag))
            })
            .unwrap();
        prop_assert_eq!(out.len(), inputs.len());
        for (i, (payload, sender, receiver, tag)) in out.iter().enumerate() {
            prop_assert_eq!(payload, &inputs[i]);
            prop_assert_eq!(*receiver, i % 3);
            prop_assert_eq!(*sender, 5); // encoded or defaulted to origin
            if tag_field {
                prop_assert_eq!(*tag, i as Tag);
            } else {
                prop_assert_eq!(*tag, 0);
            }
        }
    }

    #[test]
    fn record_round_trip_pairs(inputs in vec(vec((any::<i16>(), any::<i16>()), 0..8), 1..16)) {
        let merger = RecordMerger::<(i16, i16), i32>::default();
        let mut buf: Vec<i32> = Vec::new();
        for (i, payload) in inputs.iter().enumerate() {
            merger
                .append(&mut buf, i % 2, 0, Envelope::new(payload, 0, i % 2))
                .unwrap();
        }
        let mut splitter = RecordSplitter::<(i16, i16), i32>::default();
        let mut out: Vec<Vec<(i16, i16)>> = Vec::new();
        splitter
            .split(&buf, 0, 0, |env| out.push(env.payload.to_vec()))
            .unwrap();
        prop_assert_eq!(out, inputs);
    }

    #[test]
    fn chunker_walks_record_merged_buffers(inputs in payloads()) {
        // record buffers chunk uniformly by 1 + stored size regardless of
        // the header layout
        let merger = RecordMerger::<i32, i32>::with_layout(HeaderLayout::full());
        let mut buf: Vec<i32> = Vec::new();
        for payload in &inputs {
            merger
                .append(&mut buf, 0, 0, Envelope::new(payload, 0, 0))
                .unwrap();
        }
        let chunks: Vec<&[i32]> = chunk_by_embedded_size(&buf, 0).collect();
        prop_assert_eq!(chunks.len(), inputs.len());
        for (chunk, payload) in chunks.iter().zip(&inputs) {
            // header = size + sender + receiver + tag
            prop_assert_eq!(&chunk[4..], &payload[..]);
        }
    }
}
