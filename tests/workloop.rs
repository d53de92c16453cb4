//! Cascading-post work loop: tasks hop between ranks until their
//! time-to-live runs out, with the outer loop re-draining local work until
//! termination detection succeeds.

mod util;

use std::collections::VecDeque;

use briefkasten::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use util::run_ranks;

const INITIAL_TASKS: usize = 1_000;
const RANKS: usize = 4;

// task layout: [ttl, hops, visited ranks...]
#[test]
fn workloop() {
    let finished = run_ranks(RANKS, |comm| {
        let rank = comm.rank();
        let size = comm.size();
        let mut rng = ChaCha8Rng::seed_from_u64(rank as u64);

        let mut tasks: VecDeque<Vec<i32>> = (0..INITIAL_TASKS)
            .map(|_| vec![rng.gen_range(5..=10), 0])
            .collect();

        let mut queue = QueueBuilder::<i32, i32, _>::new(comm)
            .merger(SentinelMerger::new(-1))
            .splitter(SentinelSplitter::new(-1))
            .threshold(256)
            .build()
            .unwrap();

        let mut finished = 0u64;
        loop {
            while let Some(task) = tasks.pop_front() {
                let ttl = task[0];
                if ttl > 0 {
                    let mut hopped = task;
                    hopped[0] -= 1;
                    hopped[1] += 1;
                    hopped.push(rank as i32);
                    let receiver = rng.gen_range(0..size);
                    queue
                        .post_blocking(&hopped, receiver, |env| {
                            tasks.push_back(env.payload.to_vec())
                        })
                        .unwrap();
                } else {
                    // the hop counter must match the recorded trace
                    assert_eq!(task[1] as usize, task.len() - 2);
                    finished += 1;
                }
            }
            if queue
                .terminate(|env| tasks.push_back(env.payload.to_vec()))
                .unwrap()
            {
                break;
            }
        }
        assert!(tasks.is_empty());
        finished
    });

    // every seeded task eventually expires somewhere
    let total: u64 = finished.into_iter().sum();
    assert_eq!(total, (INITIAL_TASKS * RANKS) as u64);
}
