//! §4.C: the contract every source/destination implements.

use std::{fmt, future::Future, pin::Pin, sync::Arc};

use async_trait::async_trait;
use common::{BackendResult, Outcome, ProgressSink, Task};
use futures::Stream;

pub type TaskStream = Pin<Box<dyn Stream<Item = BackendResult<Arc<dyn Task>>> + Send>>;

/// A worker is a one-shot future factory bound to a specific task; the
/// engine calls it exactly once per attempt, passing a fresh progress
/// handle obtained from the active `ProgressSink`.
pub type Worker =
	Box<dyn FnOnce(Box<dyn common::TaskProgress>) -> Pin<Box<dyn Future<Output = Outcome> + Send>> + Send>;

#[async_trait]
pub trait SourceBackend: fmt::Debug + Send + Sync {
	/// Lazily enumerates every task under this backend's configured root.
	/// Implementations should express this as a channel/stream-fed
	/// producer, not an eagerly collected `Vec`, since remote enumeration
	/// is unbounded.
	async fn iter_tasks(&self) -> BackendResult<TaskStream>;
}

#[async_trait]
pub trait DestinationBackend: fmt::Debug + Send + Sync {
	/// Builds the worker for `task`. Any failure that would normally only
	/// surface at run time (e.g. cannot resolve/create the destination
	/// parent folder) is still captured here and wrapped into a
	/// `Fail`-returning worker (§7), so the engine routes it identically
	/// to a runtime failure rather than aborting the dispatch loop.
	async fn get_worker(&self, task: Arc<dyn Task>, progress: &dyn ProgressSink) -> Worker;

	/// Whether this destination can service a server-side copy from
	/// `source_kind` without transferring bytes through this process. Only
	/// Google-Drive-to-Google-Drive supports this; everything else returns
	/// `false` and the engine falls back to streaming bytes.
	fn supports_copy_from(&self, _source_kind: &str) -> bool {
		false
	}

	fn kind(&self) -> &'static str;
}

/// Helper for wrapping a worker-construction failure so it surfaces as a
/// `Fail` outcome the first time the engine actually runs the worker,
/// instead of as a panic or as an error that aborts the dispatch loop.
pub fn failed_worker(err: anyhow::Error) -> Worker {
	Box::new(move |progress| {
		Box::pin(async move {
			progress.on_fail(&err.to_string());
			Outcome::Fail(err)
		})
	})
}
