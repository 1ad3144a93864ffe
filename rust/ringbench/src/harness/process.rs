//! Producer and consumer as two processes sharing a segment.
//!
//! The driver is the producer. It creates the segment, optionally spawns the
//! consumer (`ringbench consumer --segment <path>`), and owns teardown. A
//! spawned consumer is watched from a helper thread: if it dies before
//! completing, the watcher raises the abort flag and posts on its behalf so
//! the driver's blocking waits return.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use ringbench_primitives::{spawn_dying_with_parent, wait_for_exit};

use super::{
    LoopOutcome, Role, RunConfig, RunOutcome, consume_loop, participate, pin, produce_loop,
};
use crate::channel::Channel;
use crate::completion::CompletionRecord;
use crate::error::{BenchError, SetupError};
use crate::timing::TimingMarks;
use crate::workload::Workload;

/// Attach retry interval for a consumer started before its producer.
const ATTACH_POLL: Duration = Duration::from_millis(1);

/// Who starts the consumer process.
#[derive(Debug, Clone)]
pub enum ConsumerLaunch {
    /// Spawn this executable's `consumer` subcommand as a child.
    Spawn(PathBuf),
    /// Somebody else runs `ringbench consumer --segment <path>`.
    External,
}

/// One process-transport run, driven from the producer side.
pub fn run_process_driver(
    config: &RunConfig,
    segment: &Path,
    launch: ConsumerLaunch,
) -> Result<RunOutcome, BenchError> {
    let mut marks = TimingMarks::start();
    let spec = config.channel;
    let workload = Workload::template(spec.message_len as usize);
    let channel = Channel::create_segment(segment, spec)?;

    let child = match &launch {
        ConsumerLaunch::Spawn(exe) => Some(spawn_consumer(exe, segment, config.consumer_core)?),
        ConsumerLaunch::External => {
            tracing::info!(segment = %segment.display(), "waiting for an external consumer");
            None
        }
    };
    let child = child.map(Mutex::new);

    let driven = thread::scope(|s| {
        let shared = &channel;
        let watcher = child
            .as_ref()
            .map(|child| s.spawn(move || watch_consumer(child, shared)));

        let driven = drive(shared, &workload, config, &mut marks);
        if driven.is_err() {
            shared.completion().abort();
            if let Some(child) = &child {
                kill(child);
            }
        }

        let status = match watcher.map(|w| w.join()) {
            None => None,
            Some(Ok(status)) => status,
            Some(Err(_)) => {
                tracing::warn!("consumer watcher panicked");
                None
            }
        };
        driven.map(|(producer, record)| (producer, record, status))
    });

    let (producer, record, consumer_status) = match driven {
        Ok(done) => done,
        Err(e) => {
            if let Err(teardown) = channel.close() {
                tracing::warn!(error = %teardown, "teardown after failed run failed");
            }
            return Err(e);
        }
    };
    let teardown = channel.close().err();

    let report = marks.report().ok_or(BenchError::Aborted)?;
    Ok(RunOutcome {
        report,
        marks,
        record,
        expected_count: spec.iterations,
        expected_checksum: workload.checksum(),
        producer: Some(producer),
        consumer: None,
        consumer_status,
        teardown,
    })
}

/// Producer side of the timed phase, up to and including the completion wait.
fn drive(
    channel: &Channel,
    workload: &Workload,
    config: &RunConfig,
    marks: &mut TimingMarks,
) -> Result<(LoopOutcome, CompletionRecord), BenchError> {
    pin(Role::Producer, config.producer_core);
    marks.mark_comm_start(channel.rendezvous().open(1)?);
    if channel.completion().is_aborted() {
        return Err(BenchError::Aborted);
    }

    let producer = produce_loop(channel, workload)?;
    let record = channel.completion().wait()?;
    marks.mark_comm_end();

    if record.aborted {
        return Err(BenchError::Aborted);
    }
    Ok((producer, record))
}

fn spawn_consumer(exe: &Path, segment: &Path, core: Option<usize>) -> Result<Child, SetupError> {
    let mut command = Command::new(exe);
    command
        .arg("consumer")
        .arg("--segment")
        .arg(segment)
        .stdin(Stdio::null())
        .stdout(Stdio::null());
    if let Some(core) = core {
        command.arg("--core").arg(core.to_string());
    }
    let child = spawn_dying_with_parent(command).map_err(SetupError::Spawn)?;
    tracing::debug!(pid = child.id(), "spawned consumer process");
    Ok(child)
}

/// Reap the consumer. An unsuccessful exit before the consumer finished is
/// turned into an abort so the driver does not block forever; a failure after
/// finishing is left to [`RunOutcome::verify`].
///
/// The child is only reaped under its lock, so [`kill`] never signals a
/// recycled pid.
fn watch_consumer(child: &Mutex<Child>, channel: &Channel) -> Option<ExitStatus> {
    let pid = lock(child).id();
    if let Err(error) = wait_for_exit(pid) {
        tracing::warn!(pid, %error, "waiting for consumer process failed");
        return None;
    }
    let status = match lock(child).wait() {
        Ok(status) => status,
        Err(error) => {
            tracing::warn!(pid, %error, "reaping consumer process failed");
            return None;
        }
    };
    if status.success() {
        return Some(status);
    }
    if channel.completion().is_finished() {
        // The run itself is complete; the status still fails verification.
        tracing::warn!(%status, "consumer process failed after finishing its loop");
    } else {
        tracing::error!(%status, "consumer process exited early");
        channel.completion().abort();
        channel.rendezvous().stand_in();
    }
    Some(status)
}

fn kill(child: &Mutex<Child>) {
    let mut child = lock(child);
    // A reaped child is not signalled again.
    if let Err(error) = child.kill() {
        tracing::debug!(pid = child.id(), %error, "killing consumer failed");
    }
}

fn lock(child: &Mutex<Child>) -> MutexGuard<'_, Child> {
    child.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Body of the `consumer` subcommand.
pub fn run_consumer_process(segment: &Path, core: Option<usize>) -> Result<(), BenchError> {
    let channel = Channel::attach_segment_waiting(segment, ATTACH_POLL)?;
    let outcome = participate(&channel, Role::Consumer, core, consume_loop);
    let teardown = channel.close();
    let outcome = outcome?;
    tracing::debug!(consumed = outcome.completed, "consumer finished");
    teardown?;
    Ok(())
}
