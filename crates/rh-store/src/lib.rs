//! Store layer for Roundhouse.
//!
//! A [`KeyValueStore`] backend (Redis or local files) plus the bookkeeping
//! built on top of it: the job queues, per-dataset round ledger and status,
//! worker heartbeats and the prediction artifacts of completed rounds.

pub mod control;
pub mod file;
pub mod heartbeat;
pub mod keys;
pub mod layout;
pub mod ledger;
pub mod predictions;
pub mod queue;
pub mod redis_store;
pub mod store;

pub use control::{DatasetControl, DatasetStatus};
pub use file::FileStore;
pub use heartbeat::{Heartbeat, HeartbeatMonitor};
pub use layout::DataLayout;
pub use ledger::{RoundLedger, RoundTable};
pub use predictions::PredictionStore;
pub use queue::JobQueue;
pub use redis_store::RedisStore;
pub use store::{connect, BackendKind, KeyValueStore, StoreConfig, StoreHandle};
