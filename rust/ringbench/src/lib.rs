//! Producer/consumer bounded-buffer benchmark.
//!
//! A producer and a consumer exchange `iterations` fixed-size messages
//! through a ring of `capacity` slots, guarded by one of two interchangeable
//! [backends](backend). The two sides are either threads sharing a heap
//! region or processes sharing a file-backed segment; everything else is the
//! same code. A driver times setup and steady-state communication separately:
//!
//! ```text
//! start ── create channel, spawn participants ── comm_start ── N messages ── comm_end
//!          └──────────── init_time ────────────┘             └──── comm_time ────┘
//! ```
#![cfg(unix)]

pub mod backend;
pub mod channel;
pub mod completion;
pub mod config;
pub mod error;
pub mod harness;
pub mod layout;
pub mod rendezvous;
pub mod ring;
pub mod signals;
pub mod timing;
pub mod workload;

pub use backend::{Backend, BackendKind, SyncBackend};
pub use channel::{Channel, ChannelSpec};
pub use error::{BenchError, ConfigError, SetupError, SyncError, TeardownError};
pub use harness::{RunConfig, RunOutcome};
pub use timing::Report;
pub use workload::Workload;
