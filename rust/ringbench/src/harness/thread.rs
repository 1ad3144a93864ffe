//! Producer and consumer as two threads sharing a heap channel.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::{
    LoopOutcome, Role, RunConfig, RunOutcome, consume_loop, participate, produce_loop,
};
use crate::channel::Channel;
use crate::error::{BenchError, SetupError, SyncError};
use crate::timing::TimingMarks;
use crate::workload::Workload;

type Participant = JoinHandle<Result<LoopOutcome, SyncError>>;

/// One thread-transport run. The calling thread is the driver.
pub fn run_threads(config: &RunConfig) -> Result<RunOutcome, BenchError> {
    let mut marks = TimingMarks::start();
    let spec = config.channel;
    spec.validate()?;

    let workload = Arc::new(Workload::template(spec.message_len as usize));
    let channel = Arc::new(Channel::create_heap(spec)?);

    let producer = spawn(&channel, &workload, Role::Producer, config.producer_core)?;
    let consumer = spawn(&channel, &workload, Role::Consumer, config.consumer_core)?;

    marks.mark_comm_start(channel.rendezvous().open(2)?);
    let record = channel.completion().wait()?;
    marks.mark_comm_end();

    if record.aborted {
        return Err(abandon(channel, producer, consumer));
    }

    let producer = join(producer, Role::Producer)?;
    let consumer = join(consumer, Role::Consumer)?;

    let teardown = match Arc::try_unwrap(channel) {
        Ok(channel) => channel.close().err(),
        Err(_) => {
            tracing::warn!("channel still shared after both participants joined");
            None
        }
    };

    let report = marks.report().ok_or(BenchError::Aborted)?;
    Ok(RunOutcome {
        report,
        marks,
        record,
        expected_count: spec.iterations,
        expected_checksum: workload.checksum(),
        producer: Some(producer),
        consumer: Some(consumer),
        consumer_status: None,
        teardown,
    })
}

fn spawn(
    channel: &Arc<Channel>,
    workload: &Arc<Workload>,
    role: Role,
    core: Option<usize>,
) -> Result<Participant, SetupError> {
    let channel = Arc::clone(channel);
    let workload = Arc::clone(workload);
    thread::Builder::new()
        .name(role.to_string())
        .spawn(move || {
            participate(&channel, role, core, |channel| match role {
                Role::Producer => produce_loop(channel, &workload),
                Role::Consumer => consume_loop(channel),
            })
        })
        .map_err(SetupError::Spawn)
}

fn join(handle: Participant, role: Role) -> Result<LoopOutcome, BenchError> {
    match handle.join() {
        Ok(result) => Ok(result?),
        Err(_) => Err(BenchError::Panicked(role)),
    }
}

/// An abort releases both participants from the ring, so both can be
/// joined. The reported error is the root cause rather than the peer that
/// was merely stopped.
fn abandon(channel: Arc<Channel>, producer: Participant, consumer: Participant) -> BenchError {
    let mut error = BenchError::Aborted;
    for (handle, role) in [(producer, Role::Producer), (consumer, Role::Consumer)] {
        if let Err(e) = join(handle, role)
            && !matches!(e, BenchError::Aborted)
        {
            error = e;
        }
    }
    match Arc::try_unwrap(channel) {
        Ok(channel) => {
            if let Err(e) = channel.close() {
                tracing::warn!(error = %e, "teardown after abort failed");
            }
        }
        Err(_) => tracing::warn!("channel still shared after both participants joined"),
    }
    error
}
