//! Synchronous mode: collective all-to-all rounds instead of nonblocking
//! transport.

mod util;

use briefkasten::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use util::run_ranks;

const NUM_LOCAL_ELEMENTS: usize = 200_000;
const RANKS: usize = 4;

#[test]
fn alltoall_synchronous() {
    let results = run_ranks(RANKS, |comm| {
        let rank = comm.rank();
        let size = comm.size();
        let mut rng = ChaCha8Rng::seed_from_u64(21 + rank as u64);
        let data: Vec<i32> = (0..NUM_LOCAL_ELEMENTS)
            .map(|_| rng.gen_range(0..size as i32))
            .collect();

        let mut queue = QueueBuilder::<i32, i32, _>::new(comm)
            .synchronous(true)
            .build()
            .unwrap();

        let mut received: u64 = 0;
        let mut on_message = |env: Envelope<'_, i32>| {
            assert!(env.payload.iter().all(|&v| v == rank as i32));
            received += env.payload.len() as u64;
        };
        for &value in &data {
            // posts only aggregate; the exchange happens in terminate
            queue
                .post_blocking(&[value], value as usize, &mut on_message)
                .unwrap();
        }
        while !queue.terminate(&mut on_message).unwrap() {}
        received
    });

    let total: u64 = results.into_iter().sum();
    assert_eq!(total, (NUM_LOCAL_ELEMENTS * RANKS) as u64);
}

#[test]
fn synchronous_indirect_round_trip() {
    let results = run_ranks(RANKS, |comm| {
        let rank = comm.rank();
        let size = comm.size();
        let queue = QueueBuilder::<i32, i32, _, _, _>::with_codec(
            comm,
            RecordMerger::<i32, i32>::default(),
            RecordSplitter::<i32, i32>::default(),
        )
        .synchronous(true)
        .build()
        .unwrap();
        let mut adapter = IndirectionAdapter::new(queue, GridScheme::new(size)).unwrap();

        let mut seen = vec![0u32; size];
        let mut on_message = |env: Envelope<'_, i32>| {
            assert_eq!(env.receiver, rank);
            seen[env.payload[0] as usize] += 1;
        };
        for receiver in 0..size {
            adapter
                .post_blocking(&[rank as i32], receiver, &mut on_message)
                .unwrap();
        }
        while !adapter.terminate(&mut on_message).unwrap() {}
        seen
    });

    for seen in results {
        assert_eq!(seen, vec![1; RANKS]);
    }
}

#[test]
fn per_peer_flush_is_rejected_in_synchronous_mode() {
    let group = LocalGroup::new(1);
    let mut queue = QueueBuilder::<i32, i32, _>::new(group.comm(0))
        .synchronous(true)
        .build()
        .unwrap();
    queue.post(&[1], 0).unwrap();
    assert!(matches!(
        queue.flush(0),
        Err(QueueError::InvalidConfig(_))
    ));
    assert!(matches!(
        queue.flush_all(),
        Err(QueueError::InvalidConfig(_))
    ));
    // the collective path still drains the post
    let mut got = Vec::new();
    while !queue
        .terminate(|env| got.extend_from_slice(env.payload))
        .unwrap()
    {}
    assert_eq!(got, vec![1]);
}
