//! Both backends agree on every outcome of the same operation script.
//!
//! Scripts are single-threaded sequences of non-blocking writes and reads,
//! so they are deterministic; a `VecDeque` bounded at the capacity is the
//! reference model.

mod support;

use std::collections::VecDeque;

use ringbench::{BackendKind, Channel};
use support::{read_stamp, spec, stamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Write,
    Read,
}

#[derive(Debug, PartialEq, Eq)]
struct Trace {
    /// Per op: `Some(seq)` on success, `None` when the ring said no.
    results: Vec<Option<u64>>,
    final_ready: u32,
}

/// Small xorshift so scripts are reproducible without a rand dependency.
fn script(mut seed: u64, len: usize, write_bias: u64) -> Vec<Op> {
    (0..len)
        .map(|_| {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            if seed % 100 < write_bias {
                Op::Write
            } else {
                Op::Read
            }
        })
        .collect()
}

fn run(backend: BackendKind, capacity: u32, ops: &[Op]) -> Trace {
    let channel = Channel::create_heap(spec(backend, capacity, 0)).unwrap();
    let mut next = 0u64;
    let results = ops
        .iter()
        .map(|op| match op {
            Op::Write => {
                let seq = next;
                let wrote = channel.try_produce_with(|slot| stamp(slot, seq)).unwrap();
                wrote.then(|| {
                    next += 1;
                    seq
                })
            }
            Op::Read => channel.try_consume_with(read_stamp).unwrap(),
        })
        .collect();
    let final_ready = channel.status().ready_count;
    channel.close().unwrap();
    Trace {
        results,
        final_ready,
    }
}

fn model(capacity: u32, ops: &[Op]) -> Trace {
    let mut queue = VecDeque::new();
    let mut next = 0u64;
    let results = ops
        .iter()
        .map(|op| match op {
            Op::Write if queue.len() < capacity as usize => {
                queue.push_back(next);
                next += 1;
                Some(next - 1)
            }
            Op::Write => None,
            Op::Read => queue.pop_front(),
        })
        .collect();
    Trace {
        results,
        final_ready: queue.len() as u32,
    }
}

#[test]
fn backends_match_the_model() {
    for capacity in [1, 2, 8, 64] {
        for (seed, bias) in [(1, 50), (0x9e37_79b9, 70), (42, 30), (7, 95)] {
            let ops = script(seed, 2_000, bias);
            let expected = model(capacity, &ops);
            for backend in BackendKind::ALL {
                assert_eq!(
                    run(backend, capacity, &ops),
                    expected,
                    "{backend}, capacity {capacity}, seed {seed}"
                );
            }
        }
    }
}

#[test]
fn full_and_empty_edges() {
    for backend in BackendKind::ALL {
        let mut ops = vec![Op::Read; 3];
        ops.extend([Op::Write; 5]);
        ops.extend([Op::Read; 6]);
        let trace = run(backend, 4, &ops);
        assert_eq!(trace, model(4, &ops), "{backend}");
        assert_eq!(trace.final_ready, 0);
        assert_eq!(trace.results.iter().flatten().count(), 8);
    }
}
