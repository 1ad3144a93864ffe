//! End-to-end runs through the timing harness.

mod support;

use std::path::PathBuf;

use ringbench::harness::{ConsumerLaunch, RunConfig, run_process_driver, run_threads};
use ringbench::{BackendKind, BenchError, ChannelSpec, Workload};
use support::{DEADLINE, within};

fn config(backend: BackendKind, capacity: u32, iterations: u64) -> RunConfig {
    RunConfig {
        channel: ChannelSpec {
            backend,
            capacity,
            message_len: 1024,
            iterations,
        },
        producer_core: None,
        consumer_core: None,
    }
}

#[test]
fn kilobyte_messages_check_out_at_66495() {
    assert_eq!(Workload::template(1024).checksum(), 66495);
    for backend in BackendKind::ALL {
        let outcome = within("checksum run", DEADLINE, move || {
            run_threads(&config(backend, 4, 5_000)).unwrap()
        });
        assert_eq!(outcome.record.consumed, 5_000);
        assert_eq!(outcome.record.checksum, 66495);
        assert_eq!(outcome.expected_checksum, 66495);
        outcome.verify().unwrap();
    }
}

/// Neither participant starts its loop before the driver took `comm_start`.
#[test]
fn loops_start_after_the_gun() {
    for backend in BackendKind::ALL {
        for _ in 0..50 {
            let outcome = within("rendezvous run", DEADLINE, move || {
                run_threads(&config(backend, 1, 100)).unwrap()
            });
            let comm_start = outcome.marks.comm_start.unwrap();
            for side in [outcome.producer, outcome.consumer] {
                let side = side.unwrap();
                let first = side.first_op_at.unwrap();
                assert!(first >= comm_start, "{backend}: {} started early", side.role);
                assert_eq!(side.completed, 100);
            }
            assert!(outcome.marks.comm_end.unwrap() >= comm_start);
        }
    }
}

#[test]
fn report_line_has_two_nine_decimal_fields() {
    let outcome = within("report run", DEADLINE, || {
        run_threads(&config(BackendKind::Condvar, 1, 1_000)).unwrap()
    });
    let line = outcome.report.to_string();
    let fields: Vec<&str> = line.split(',').collect();
    assert_eq!(fields.len(), 2, "{line}");
    for field in fields {
        let (secs, frac) = field.split_once('.').unwrap();
        assert!(secs.chars().all(|c| c.is_ascii_digit()), "{line}");
        assert_eq!(frac.len(), 9, "{line}");
    }
}

#[test]
fn zero_iterations_still_completes() {
    let outcome = within("empty run", DEADLINE, || {
        run_threads(&config(BackendKind::Semaphore, 1, 0)).unwrap()
    });
    assert_eq!(outcome.record.consumed, 0);
    outcome.verify().unwrap();
}

/// A consumer process that dies before the rendezvous must not leave the
/// driver parked in the ready wait.
#[test]
fn consumer_dying_before_rendezvous_aborts_the_run() {
    let dir = tempfile::tempdir().unwrap();
    for backend in BackendKind::ALL {
        let segment = dir.path().join(format!("dead-{backend}"));
        let result = within("dead consumer", DEADLINE, move || {
            run_process_driver(
                &config(backend, 2, 1_000),
                &segment,
                ConsumerLaunch::Spawn(PathBuf::from("false")),
            )
        });
        assert!(
            matches!(result, Err(BenchError::Aborted)),
            "{backend}: {result:?}"
        );
    }
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
