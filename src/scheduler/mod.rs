//! Recurring-job contract and a Tokio-backed reference harness.
//!
//! All deposit-confirmation and swap-polling work is driven by short-lived recurring job
//! invocations, never by long-running loops inside the engine. A handler reports one of
//! three outcomes per invocation:
//!
//! - [`JobOutcome::Done`]: the work reached a terminal state; stop scheduling.
//! - [`JobOutcome::Retry`]: a recoverable condition (no match yet, confirmations still
//!   accumulating, order still pending, transient provider failure); re-invoke later.
//! - [`JobOutcome::Fatal`]: a terminal failure; stop scheduling and leave the persisted
//!   state as the record of what happened.
//!
//! The [`Scheduler`] port lets a durable job queue drive the same handlers. The shipped
//! [`TokioScheduler`] runs each job as a spawned task with exponential backoff between
//! retries and deregisters the job on any terminal outcome.

use backoff::ExponentialBackoffBuilder;
use backoff::backoff::Backoff;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Why a handler asked to be re-invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryReason {
	/// No qualifying transfer observed yet.
	NoMatchYet,
	/// A transfer is bound but lacks confirmation depth.
	AwaitingConfirmations,
	/// The swap provider still reports the order in flight.
	StillPending,
	/// A transient collaborator failure (network, provider, storage).
	Transient(String),
}

impl fmt::Display for RetryReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			RetryReason::NoMatchYet => write!(f, "no matching transfer yet"),
			RetryReason::AwaitingConfirmations => write!(f, "awaiting confirmations"),
			RetryReason::StillPending => write!(f, "order still pending"),
			RetryReason::Transient(cause) => write!(f, "transient failure: {}", cause),
		}
	}
}

/// Result of one job invocation.
#[derive(Debug)]
pub enum JobOutcome {
	/// Terminal success; the scheduler must not re-invoke.
	Done,
	/// Recoverable; re-invoke after a backoff delay.
	Retry(RetryReason),
	/// Terminal failure; the scheduler must not re-invoke.
	Fatal(String),
}

/// A re-entrant unit of work. Invoked repeatedly until it reports a terminal outcome.
pub type JobHandler = Arc<dyn Fn() -> BoxFuture<'static, JobOutcome> + Send + Sync>;

/// Port for the recurring-job queue driving the engine's polling work.
#[async_trait::async_trait]
pub trait Scheduler: Send + Sync {
	/// Register a recurring job. Registering a key that is already live is a no-op, so
	/// duplicate scheduling (manual trigger racing a timer) is safe.
	async fn schedule_recurring(
		&self,
		job_key: &str,
		interval: Duration,
		max_attempts: u32,
		handler: JobHandler,
	);

	/// Remove a recurring job, if present.
	async fn cancel_recurring(&self, job_key: &str);
}

/// In-process scheduler backed by Tokio tasks.
pub struct TokioScheduler {
	jobs: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl TokioScheduler {
	pub fn new() -> Self {
		Self {
			jobs: Arc::new(Mutex::new(HashMap::new())),
		}
	}

	/// Whether a job with this key is currently live.
	pub fn is_scheduled(&self, job_key: &str) -> bool {
		let jobs = self.jobs.lock().unwrap();
		jobs.get(job_key).is_some_and(|handle| !handle.is_finished())
	}
}

impl Default for TokioScheduler {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait::async_trait]
impl Scheduler for TokioScheduler {
	async fn schedule_recurring(
		&self,
		job_key: &str,
		interval: Duration,
		max_attempts: u32,
		handler: JobHandler,
	) {
		let key = job_key.to_string();
		{
			let jobs = self.jobs.lock().unwrap();
			if jobs.get(&key).is_some_and(|handle| !handle.is_finished()) {
				debug!("Job {} already scheduled, ignoring duplicate registration", key);
				return;
			}
		}

		let jobs = self.jobs.clone();
		let task_key = key.clone();
		let task = tokio::spawn(async move {
			// Backoff between retries starts at the job interval and grows with jitter.
			let mut policy = ExponentialBackoffBuilder::new()
				.with_initial_interval(interval)
				.with_max_interval(interval * 8)
				.with_max_elapsed_time(None)
				.build();
			let mut delay = interval;
			let mut attempts = 0u32;

			loop {
				tokio::time::sleep(delay).await;
				attempts += 1;

				match handler().await {
					JobOutcome::Done => {
						debug!("Job {} completed after {} attempts", task_key, attempts);
						break;
					}
					JobOutcome::Fatal(reason) => {
						warn!("Job {} stopped: {}", task_key, reason);
						break;
					}
					JobOutcome::Retry(reason) => {
						if attempts >= max_attempts {
							warn!(
								"Job {} abandoned after {} attempts (last signal: {}); \
								 persisted state is left for reconciliation",
								task_key, attempts, reason
							);
							break;
						}
						debug!("Job {} will retry: {}", task_key, reason);
						delay = policy.next_backoff().unwrap_or(interval);
					}
				}
			}

			jobs.lock().unwrap().remove(&task_key);
		});

		self.jobs.lock().unwrap().insert(key, task);
	}

	async fn cancel_recurring(&self, job_key: &str) {
		if let Some(handle) = self.jobs.lock().unwrap().remove(job_key) {
			handle.abort();
			debug!("Cancelled job {}", job_key);
		}
	}
}

/// Scheduler double for tests: records registrations, never runs handlers.
#[cfg(test)]
pub(crate) mod testing {
	use super::*;

	#[derive(Default)]
	pub struct RecordingScheduler {
		pub scheduled: Mutex<Vec<String>>,
		pub cancelled: Mutex<Vec<String>>,
	}

	#[async_trait::async_trait]
	impl Scheduler for RecordingScheduler {
		async fn schedule_recurring(
			&self,
			job_key: &str,
			_interval: Duration,
			_max_attempts: u32,
			_handler: JobHandler,
		) {
			self.scheduled.lock().unwrap().push(job_key.to_string());
		}

		async fn cancel_recurring(&self, job_key: &str) {
			self.cancelled.lock().unwrap().push(job_key.to_string());
		}
	}
}
