//! # rh-worker
//!
//! A search worker: pops job envelopes off the shared search queue, runs each
//! as one search round and reports liveness through heartbeats.

mod config;
mod dispatch;
mod error_log;

pub use config::{WorkerConfig, CONFIG_ENV};
pub use dispatch::{host_name, worker_identity, DispatchLoop, PollOutcome, WorkerEvent};
pub use error_log::{ErrorEntry, ErrorLog};
