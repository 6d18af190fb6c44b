//! The worker's job dispatch loop.
//!
//! Each poll waits for one entry on the search queue, beeps the heartbeat
//! with whatever arrived, and runs the job to completion before polling
//! again. Failed rounds are written to the dataset's error log and never
//! retried; the loop itself only stops on shutdown.

use crossbeam_channel::Sender;
use rh_search::{RoundOutcome, SearchExecutor};
use rh_store::{HeartbeatMonitor, JobQueue, StoreHandle};
use rh_types::{DispatchedJob, JobEnvelope, Score, StoreResult};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::error_log::{ErrorEntry, ErrorLog};

/// Events emitted by the loop for external consumption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkerEvent {
    Idle,
    Malformed {
        payload: String,
        error: String,
    },
    RoundStarted {
        dataset_id: String,
        round_id: u64,
        solution: String,
    },
    RoundCompleted {
        dataset_id: String,
        round_id: u64,
        score_eval: Score,
    },
    RoundSkipped {
        dataset_id: String,
        round_id: u64,
    },
    RoundFailed {
        dataset_id: String,
        round_id: u64,
        error: String,
    },
}

/// What one poll did.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Nothing arrived before the wait ended.
    Idle,
    /// The entry was not a job envelope and was dropped.
    Malformed,
    Completed { dataset_id: String, round_id: u64 },
    Outlier { dataset_id: String, round_id: u64 },
    Failed { dataset_id: String, round_id: u64, error: String },
}

/// Host name from `HOSTNAME` or `/etc/hostname`.
pub fn host_name() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// `<host>-<8 hex chars>`, distinct for every worker on a host.
pub fn worker_identity(host_name: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{host_name}-{}", &suffix[..8])
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

pub struct DispatchLoop {
    queue: JobQueue,
    heartbeat: HeartbeatMonitor,
    executor: Arc<SearchExecutor>,
    error_log: ErrorLog,
    role: String,
    host_name: String,
    timeout: Duration,
    retry_delay: Duration,
    events: Option<Sender<WorkerEvent>>,
}

impl DispatchLoop {
    pub fn new(store: StoreHandle, executor: Arc<SearchExecutor>, config: &WorkerConfig) -> Self {
        let host = host_name();
        let identity = worker_identity(&host);
        Self {
            queue: JobQueue::new(Arc::clone(&store))
                .with_search_queue(&config.search_queue)
                .with_results_queue(&config.results_queue),
            heartbeat: HeartbeatMonitor::new(store, identity, host.clone()),
            executor,
            error_log: ErrorLog::new(config.layout()),
            role: config.role.clone(),
            host_name: host,
            timeout: config.blocking_timeout(),
            retry_delay: config.poll_interval(),
            events: None,
        }
    }

    pub fn with_events(mut self, events: Sender<WorkerEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn identity(&self) -> &str {
        self.heartbeat.identity()
    }

    pub fn host(&self) -> &str {
        &self.host_name
    }

    fn emit(&self, event: WorkerEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.try_send(event);
        }
    }

    /// Wait for one queue entry and handle it.
    ///
    /// Only store failures of the queue itself are returned; every failure of
    /// the round is handled here and reported as [`PollOutcome::Failed`].
    pub async fn poll_once(&self) -> StoreResult<PollOutcome> {
        let raw = self.queue.next(self.timeout).await?;

        if let Err(e) = self.heartbeat.beep(&self.role, raw.clone()).await {
            warn!(role = %self.role, error = %e, "heartbeat failed");
        }

        let Some(raw) = raw else {
            self.emit(WorkerEvent::Idle);
            return Ok(PollOutcome::Idle);
        };

        let envelope: JobEnvelope = match serde_json::from_value(raw.clone()) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, payload = %raw, "dropping malformed job envelope");
                self.emit(WorkerEvent::Malformed {
                    payload: raw.to_string(),
                    error: e.to_string(),
                });
                return Ok(PollOutcome::Malformed);
            }
        };

        Ok(self.run(envelope).await)
    }

    async fn run(&self, envelope: JobEnvelope) -> PollOutcome {
        let dataset_id = envelope.dataset_id.clone();
        let round_id = envelope.round_id;
        info!(
            dataset = %dataset_id,
            round = round_id,
            solution = %envelope.solution,
            level = envelope.level.as_u8(),
            "round started"
        );
        self.emit(WorkerEvent::RoundStarted {
            dataset_id: dataset_id.clone(),
            round_id,
            solution: envelope.solution.clone(),
        });

        let job = DispatchedJob::new(envelope.clone(), &self.host_name);
        let executor = Arc::clone(&self.executor);
        let handle = tokio::spawn(async move { executor.execute(job).await });

        let error = match handle.await {
            Ok(Ok(RoundOutcome::Completed(record))) => {
                self.emit(WorkerEvent::RoundCompleted {
                    dataset_id: dataset_id.clone(),
                    round_id,
                    score_eval: record.score_eval,
                });
                return PollOutcome::Completed { dataset_id, round_id };
            }
            Ok(Ok(RoundOutcome::Outlier { .. })) => {
                self.emit(WorkerEvent::RoundSkipped {
                    dataset_id: dataset_id.clone(),
                    round_id,
                });
                return PollOutcome::Outlier { dataset_id, round_id };
            }
            Ok(Err(e)) => e.to_string(),
            Err(e) if e.is_panic() => format!("round panicked: {}", panic_message(e.into_panic())),
            Err(e) => format!("round task failed: {e}"),
        };

        error!(
            dataset = %dataset_id,
            round = round_id,
            solution = %envelope.solution,
            error = %error,
            "round failed"
        );
        if let Err(e) = self
            .error_log
            .append(&ErrorEntry::new(&envelope, &self.host_name, error.clone()))
            .await
        {
            warn!(dataset = %dataset_id, error = %e, "cannot write error log");
        }
        self.emit(WorkerEvent::RoundFailed {
            dataset_id: dataset_id.clone(),
            round_id,
            error: error.clone(),
        });
        PollOutcome::Failed {
            dataset_id,
            round_id,
            error,
        }
    }

    /// Poll until `shutdown` resolves. A round in flight at shutdown is
    /// abandoned.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(
            identity = %self.identity(),
            role = %self.role,
            queue = %self.queue.search_queue(),
            "worker started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                polled = self.poll_once() => match polled {
                    Ok(outcome) => debug!(?outcome, "poll finished"),
                    Err(e) => {
                        error!(error = %e, "search queue unavailable");
                        tokio::time::sleep(self.retry_delay).await;
                    }
                },
            }
        }

        info!(identity = %self.identity(), "worker stopped");
    }

    pub async fn run_forever(&self) {
        self.run_until(std::future::pending()).await
    }
}
