//! Command line and environment configuration.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::backend::BackendKind;
use crate::channel::ChannelSpec;
use crate::error::ConfigError;
use crate::harness::RunConfig;

#[derive(Parser, Debug)]
#[command(name = "ringbench", version)]
#[command(about = "Bounded-buffer producer/consumer benchmark across threads or processes")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run producer and consumer end to end and print `init_time,comm_time`.
    Run {
        #[command(flatten)]
        bench: BenchArgs,

        #[arg(
            long,
            value_enum,
            default_value_t = TransportKind::Thread,
            env = "RINGBENCH_TRANSPORT"
        )]
        transport: TransportKind,

        /// Repeat the whole run, one result line each.
        #[arg(long, default_value_t = 1, env = "RINGBENCH_RUNS")]
        runs: u32,

        /// Where process-transport segments are created (default: /dev/shm).
        #[arg(long)]
        segment_dir: Option<PathBuf>,
    },

    /// Create a segment and drive it as the producer, waiting for a consumer
    /// started separately.
    Producer {
        #[command(flatten)]
        bench: BenchArgs,

        #[arg(long)]
        segment: PathBuf,
    },

    /// Attach to a segment as the consumer, waiting until it is published.
    Consumer {
        #[arg(long)]
        segment: PathBuf,

        /// Logical core to pin the consumer to.
        #[arg(long, env = "RINGBENCH_CONSUMER_CORE")]
        core: Option<usize>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum TransportKind {
    /// Two threads, one heap allocation.
    Thread,
    /// Two processes, one shared segment.
    Process,
}

#[derive(Args, Debug, Clone)]
pub struct BenchArgs {
    /// Messages to send.
    #[arg(short = 'n', long, default_value_t = 100_000, env = "RINGBENCH_ITERATIONS")]
    pub iterations: u64,

    /// Ring slots.
    #[arg(short, long, default_value_t = 1, env = "RINGBENCH_CAPACITY")]
    pub capacity: u32,

    /// Bytes per message.
    #[arg(short, long, default_value_t = 1024, env = "RINGBENCH_MESSAGE_LEN")]
    pub message_len: u32,

    #[arg(
        short,
        long,
        value_enum,
        default_value_t = BackendKind::Condvar,
        env = "RINGBENCH_BACKEND"
    )]
    pub backend: BackendKind,

    #[arg(long, env = "RINGBENCH_PRODUCER_CORE")]
    pub producer_core: Option<usize>,

    #[arg(long, env = "RINGBENCH_CONSUMER_CORE")]
    pub consumer_core: Option<usize>,
}

impl BenchArgs {
    pub fn into_config(self) -> Result<RunConfig, ConfigError> {
        let channel = ChannelSpec {
            backend: self.backend,
            capacity: self.capacity,
            message_len: self.message_len,
            iterations: self.iterations,
        };
        channel.validate()?;
        Ok(RunConfig {
            channel,
            producer_core: self.producer_core,
            consumer_core: self.consumer_core,
        })
    }
}
