//! §4.E "Transfer engine": a producer task feeding a bounded pool of worker
//! tasks through a shared queue, gated by a binary throttle signal and
//! tallied by a single inflight counter. The spec describes this in terms of
//! OS threads; since every backend here is built on `tokio`, the producer,
//! dispatcher, and workers are async tasks on the same runtime instead —
//! the same shape, the teacher's own concurrency primitives (`tokio::sync`),
//! just without a dedicated thread per role.

use std::{
	sync::{
		atomic::{AtomicBool, AtomicI64, Ordering},
		Arc,
	},
	time::Duration,
};

use backends::{DestinationBackend, SourceBackend};
use common::{CancelSignal, Outcome, ProgressSink, Task};
use futures::StreamExt;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct EngineConfig {
	/// Bounded worker pool size ("`--workers`").
	pub workers: usize,
	/// Dispatcher pacing / empty-queue poll timeout ("`--interval`").
	pub interval: Duration,
	/// Chunk size handed to `Task::iter_data` ("`--chunk-size`").
	pub chunk_size: usize,
	/// A task is dead-lettered once `Task::attempt()` reaches this after a
	/// `Fail` (§11); `0` disables the cap and restores the literal
	/// unbounded-retry behavior spec.md describes (and warns against in §9).
	pub max_attempts: u32,
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self { workers: 8, interval: Duration::from_millis(100), chunk_size: 8 * 1024 * 1024, max_attempts: 10 }
	}
}

#[derive(Debug, Default, Clone)]
pub struct RunSummary {
	pub success: u64,
	pub exists: u64,
	pub dead_lettered: u64,
	/// Directories/subtrees a source backend gave up enumerating after
	/// exhausting its listing retry budget (§9 decision 2); no `Task` was
	/// ever created for these, so they're counted separately from
	/// `dead_lettered`.
	pub enumeration_errors: u64,
}

/// The binary throttle signal (§4.E): "arm if not already armed" (§12
/// decision 1), consumed once per dispatcher iteration.
#[derive(Default)]
struct SleepGate {
	pending: Mutex<Option<u64>>,
}

impl SleepGate {
	async fn arm_if_disarmed(&self, seconds: u64) {
		let mut pending = self.pending.lock().await;
		if pending.is_none() {
			*pending = Some(seconds);
		}
	}

	async fn take(&self) -> Option<u64> {
		self.pending.lock().await.take()
	}
}

/// State shared between the producer, the dispatcher, and every spawned
/// worker. `inflight == queued + executing - finalized_terminal` (§9): `+1`
/// on enqueue, `-1` only on `Success`/`Exists`/dead-letter.
struct Shared {
	inflight: AtomicI64,
	producer_finished: AtomicBool,
	sleep_gate: SleepGate,
}

pub struct Engine {
	destination: Arc<dyn DestinationBackend>,
	progress: Arc<dyn ProgressSink>,
	config: EngineConfig,
	cancel: CancelSignal,
}

impl Engine {
	pub fn new(
		destination: Arc<dyn DestinationBackend>,
		progress: Arc<dyn ProgressSink>,
		config: EngineConfig,
		cancel: CancelSignal,
	) -> Self {
		Self { destination, progress, config, cancel }
	}

	/// Runs the producer + dispatcher + worker pool to completion: until the
	/// source is exhausted and every task it produced has reached a terminal
	/// outcome.
	pub async fn run(&self, source: Arc<dyn SourceBackend>) -> RunSummary {
		let (tx, mut rx) = mpsc::unbounded_channel::<Arc<dyn Task>>();
		let shared =
			Arc::new(Shared { inflight: AtomicI64::new(0), producer_finished: AtomicBool::new(false), sleep_gate: SleepGate::default() });
		let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));
		let summary = Arc::new(Mutex::new(RunSummary::default()));

		let producer_cancel = self.cancel.child();
		let producer_shared = shared.clone();
		let producer_tx = tx.clone();
		let producer_summary = summary.clone();
		let producer_handle = tokio::spawn(async move {
			let mut stream = match source.iter_tasks().await {
				Ok(stream) => stream,
				Err(e) => {
					warn!(error = %e, "source enumeration failed to start");
					producer_shared.producer_finished.store(true, Ordering::SeqCst);
					return;
				}
			};
			while let Some(item) = stream.next().await {
				if producer_cancel.is_cancelled() {
					break;
				}
				match item {
					Ok(task) => {
						producer_shared.inflight.fetch_add(1, Ordering::SeqCst);
						if producer_tx.send(task).is_err() {
							break;
						}
					}
					Err(e) => {
						debug!(error = %e, "enumeration error for a subtree, skipping it");
						producer_summary.lock().await.enumeration_errors += 1;
					}
				}
			}
			producer_shared.producer_finished.store(true, Ordering::SeqCst);
		});

		loop {
			if self.cancel.is_cancelled() {
				break;
			}
			let finished = shared.producer_finished.load(Ordering::SeqCst);
			let inflight = shared.inflight.load(Ordering::SeqCst);
			if finished && inflight <= 0 {
				break;
			}

			if let Some(seconds) = shared.sleep_gate.take().await {
				debug!(seconds, "sleep gate armed, dispatcher pausing");
				tokio::time::sleep(Duration::from_secs(seconds)).await;
				continue;
			}

			let task = match tokio::time::timeout(self.config.interval, rx.recv()).await {
				Ok(Some(task)) => task,
				Ok(None) | Err(_) => continue,
			};

			let permit = match semaphore.clone().acquire_owned().await {
				Ok(permit) => permit,
				Err(_) => break,
			};
			self.spawn_worker(task, permit, shared.clone(), summary.clone(), tx.clone());
			tokio::time::sleep(self.config.interval).await;
		}

		producer_handle.abort();
		let final_summary = summary.lock().await.clone();
		final_summary
	}

	/// Builds the destination worker for `task` and runs it on a fresh
	/// tokio task, routing the outcome per §4.E/§7: `Success`/`Exists`
	/// finalize (decrement `inflight`), `Sleep` arms the gate and
	/// re-enqueues, `Fail` re-enqueues unless the attempt cap is reached
	/// (§11 dead-letter).
	fn spawn_worker(
		&self,
		task: Arc<dyn Task>,
		permit: tokio::sync::OwnedSemaphorePermit,
		shared: Arc<Shared>,
		summary: Arc<Mutex<RunSummary>>,
		requeue: mpsc::UnboundedSender<Arc<dyn Task>>,
	) {
		let destination = self.destination.clone();
		let progress_sink = self.progress.clone();
		let max_attempts = self.config.max_attempts;
		tokio::spawn(async move {
			let _permit = permit;
			let worker = destination.get_worker(task.clone(), progress_sink.as_ref()).await;
			let progress = progress_sink.start(task.relative_path(), task.total_size());
			let outcome = worker(progress).await;

			match outcome {
				Outcome::Success => {
					summary.lock().await.success += 1;
					shared.inflight.fetch_sub(1, Ordering::SeqCst);
				}
				Outcome::Exists => {
					summary.lock().await.exists += 1;
					shared.inflight.fetch_sub(1, Ordering::SeqCst);
				}
				Outcome::Sleep(seconds) => {
					shared.sleep_gate.arm_if_disarmed(seconds).await;
					task.bump_attempt();
					let _ = requeue.send(task);
				}
				Outcome::Fail(e) => {
					task.bump_attempt();
					if max_attempts > 0 && task.attempt() >= max_attempts {
						warn!(path = task.relative_path(), attempts = task.attempt(), error = %e, "dead-lettering task");
						progress_sink.start(task.relative_path(), task.total_size()).on_dead_letter(&e.to_string());
						summary.lock().await.dead_lettered += 1;
						shared.inflight.fetch_sub(1, Ordering::SeqCst);
					} else {
						debug!(path = task.relative_path(), attempts = task.attempt(), error = %e, "re-enqueueing failed task");
						let _ = requeue.send(task);
					}
				}
			}
		});
	}
}

#[cfg(test)]
mod tests {
	use std::sync::{
		atomic::{AtomicU32, Ordering as AtomicOrdering},
		Arc,
	};

	use async_trait::async_trait;
	use backends::{TaskStream, Worker};
	use common::{AttemptCounter, BackendResult, ByteStream, Chunk, NullProgressSink};

	use super::*;

	#[derive(Debug)]
	struct MockTask {
		relative_path: String,
		size: u64,
		attempt: AttemptCounter,
	}

	impl Task for MockTask {
		fn relative_path(&self) -> &str {
			&self.relative_path
		}

		fn total_size(&self) -> u64 {
			self.size
		}

		fn attempt(&self) -> u32 {
			self.attempt.get()
		}

		fn bump_attempt(&self) {
			self.attempt.bump();
		}

		fn iter_data(&self, _chunk_size: usize) -> ByteStream {
			let size = self.size;
			Box::pin(futures::stream::once(async move {
				Ok(Chunk::Bytes(bytes::Bytes::from(vec![0u8; size as usize])))
			}))
		}
	}

	#[derive(Debug)]
	struct FixedSource {
		names: Vec<&'static str>,
	}

	#[async_trait]
	impl SourceBackend for FixedSource {
		async fn iter_tasks(&self) -> BackendResult<TaskStream> {
			let tasks: Vec<BackendResult<Arc<dyn Task>>> = self
				.names
				.iter()
				.map(|name| {
					Ok(Arc::new(MockTask { relative_path: name.to_string(), size: 1, attempt: AttemptCounter::default() })
						as Arc<dyn Task>)
				})
				.collect();
			Ok(Box::pin(futures::stream::iter(tasks)))
		}
	}

	/// Always succeeds, the first time any task runs, but fails the first
	/// `fail_times` attempts of every *other* task — used to exercise
	/// re-enqueue-then-succeed without needing real backoff.
	#[derive(Debug)]
	struct AlwaysSucceeds;

	#[async_trait]
	impl DestinationBackend for AlwaysSucceeds {
		fn kind(&self) -> &'static str {
			"mock"
		}

		async fn get_worker(&self, _task: Arc<dyn Task>, _progress: &dyn ProgressSink) -> Worker {
			Box::new(|progress| {
				Box::pin(async move {
					progress.on_success();
					Outcome::Success
				})
			})
		}
	}

	#[derive(Debug)]
	struct AlwaysExists;

	#[async_trait]
	impl DestinationBackend for AlwaysExists {
		fn kind(&self) -> &'static str {
			"mock"
		}

		async fn get_worker(&self, _task: Arc<dyn Task>, _progress: &dyn ProgressSink) -> Worker {
			Box::new(|progress| {
				Box::pin(async move {
					progress.on_exists();
					Outcome::Exists
				})
			})
		}
	}

	/// Fails every attempt; used to verify the dead-letter cap (§11).
	#[derive(Debug)]
	struct AlwaysFails;

	#[async_trait]
	impl DestinationBackend for AlwaysFails {
		fn kind(&self) -> &'static str {
			"mock"
		}

		async fn get_worker(&self, _task: Arc<dyn Task>, _progress: &dyn ProgressSink) -> Worker {
			Box::new(|progress| {
				Box::pin(async move {
					let message = "always fails";
					progress.on_fail(message);
					Outcome::Fail(anyhow::anyhow!(message))
				})
			})
		}
	}

	/// Sleeps on the first attempt of every task, succeeds thereafter —
	/// verifies the re-enqueue + gate-arm path (P6/P7) without needing real
	/// time to elapse for the gate itself (the dispatcher's sleep is real,
	/// but kept at 0 seconds here).
	#[derive(Debug, Default)]
	struct SleepsOnce {
		seen: Arc<AtomicU32>,
	}

	#[async_trait]
	impl DestinationBackend for SleepsOnce {
		fn kind(&self) -> &'static str {
			"mock"
		}

		async fn get_worker(&self, _task: Arc<dyn Task>, _progress: &dyn ProgressSink) -> Worker {
			let seen = self.seen.clone();
			Box::new(move |progress| {
				Box::pin(async move {
					if seen.fetch_add(1, AtomicOrdering::SeqCst) == 0 {
						progress.on_sleep(0);
						Outcome::Sleep(0)
					} else {
						progress.on_success();
						Outcome::Success
					}
				})
			})
		}
	}

	fn fast_config() -> EngineConfig {
		EngineConfig { workers: 4, interval: Duration::from_millis(5), chunk_size: 1024, max_attempts: 10 }
	}

	#[tokio::test]
	async fn successful_tasks_are_counted_and_inflight_converges_to_zero() {
		let engine = Engine::new(Arc::new(AlwaysSucceeds), Arc::new(NullProgressSink), fast_config(), CancelSignal::default());
		let source = Arc::new(FixedSource { names: vec!["a", "b", "c"] });
		let summary = engine.run(source).await;
		assert_eq!(summary.success, 3);
		assert_eq!(summary.exists, 0);
		assert_eq!(summary.dead_lettered, 0);
	}

	#[tokio::test]
	async fn exists_outcome_is_not_retried() {
		let engine = Engine::new(Arc::new(AlwaysExists), Arc::new(NullProgressSink), fast_config(), CancelSignal::default());
		let source = Arc::new(FixedSource { names: vec!["a"] });
		let summary = engine.run(source).await;
		assert_eq!(summary.exists, 1);
		assert_eq!(summary.success, 0);
	}

	#[tokio::test]
	async fn sleep_outcome_re_enqueues_and_eventually_succeeds() {
		let engine = Engine::new(Arc::new(SleepsOnce::default()), Arc::new(NullProgressSink), fast_config(), CancelSignal::default());
		let source = Arc::new(FixedSource { names: vec!["a"] });
		let summary = engine.run(source).await;
		assert_eq!(summary.success, 1);
	}

	#[tokio::test]
	async fn persistent_failure_is_dead_lettered_after_max_attempts() {
		let config = EngineConfig { max_attempts: 3, ..fast_config() };
		let engine = Engine::new(Arc::new(AlwaysFails), Arc::new(NullProgressSink), config, CancelSignal::default());
		let source = Arc::new(FixedSource { names: vec!["a"] });
		let summary = engine.run(source).await;
		assert_eq!(summary.dead_lettered, 1);
		assert_eq!(summary.success, 0);
	}
}
