//! Store key namespace.

/// FIFO of pending job envelopes.
pub const SEARCH_QUEUE: &str = "controller:search_queue";

/// Default FIFO of completed round records.
pub const RESULTS_QUEUE: &str = "controller:results_queue";

pub fn dataset_status(dataset_id: &str) -> String {
    format!("dataset:{dataset_id}:status")
}

pub fn dataset_rounds(dataset_id: &str) -> String {
    format!("dataset:{dataset_id}:rounds")
}

pub fn dataset_round_counter(dataset_id: &str) -> String {
    format!("dataset:{dataset_id}:round_counter")
}

/// Set of identities that have reported for a role.
pub fn heartbeat_role(role: &str) -> String {
    format!("heartbeat:{role}")
}

pub fn heartbeat(role: &str, identity: &str) -> String {
    format!("heartbeat:{role}:{identity}")
}
