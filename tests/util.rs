//! Shared harness for multi-rank tests: one OS thread per simulated rank.

#![allow(dead_code)]

use std::sync::Arc;

use briefkasten::prelude::*;

/// Run `f` once per rank of a fresh local group, each on its own thread,
/// and collect the per-rank results in rank order.
pub fn run_ranks<T, F>(size: usize, f: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(LocalComm) -> T + Send + Sync + 'static,
{
    let group = LocalGroup::new(size);
    let f = Arc::new(f);
    let handles: Vec<_> = group
        .comms()
        .into_iter()
        .map(|comm| {
            let f = Arc::clone(&f);
            std::thread::spawn(move || f(comm))
        })
        .collect();
    handles
        .into_iter()
        .map(|h| h.join().expect("rank thread panicked"))
        .collect()
}
