//! The `Task` abstraction (§3): an addressable file unit whose bytes the
//! engine streams from a source backend's worker into a destination
//! backend's worker, without either side knowing the other's concrete type.

use std::{
	fmt, pin::Pin,
	sync::atomic::{AtomicU32, Ordering},
};

use bytes::Bytes;
use futures::Stream;

use crate::error::BackendError;

pub type DataResult<T> = Result<T, BackendError>;
pub type ByteStream = Pin<Box<dyn Stream<Item = DataResult<Chunk>> + Send>>;

/// One element of a task's data stream. Ordinary tasks yield `Bytes`
/// chunks; a "copy" task (source and destination are the same provider, and
/// a server-side copy is possible) yields exactly one `CopyRef` naming the
/// source's remote id instead of any bytes.
#[derive(Debug, Clone)]
pub enum Chunk {
	Bytes(Bytes),
	CopyRef(String),
}

/// A handle to one file being transferred. Created by source-backend
/// enumeration, consumed at most once per successful attempt, and may be
/// re-enqueued by the engine on a retryable failure.
pub trait Task: fmt::Debug + Send + Sync {
	/// Forward-slash relative path, no leading slash.
	fn relative_path(&self) -> &str;

	/// Total size in bytes. Zero for a copy task whose size is unknown
	/// ahead of the server-side copy completing.
	fn total_size(&self) -> u64;

	/// Number of times this task has been hitherto re-enqueued after a
	/// `Sleep` or `Fail` outcome. Used by the engine's dead-letter policy.
	fn attempt(&self) -> u32;

	/// Called by the engine immediately before re-enqueueing.
	fn bump_attempt(&self);

	/// Whether this task represents a server-side copy rather than a byte
	/// transfer: `iter_data` yields exactly one `Chunk::CopyRef` instead of
	/// any `Chunk::Bytes`. Only same-provider destinations recognize this;
	/// every other `Task` leaves the default of `false`.
	fn is_copy(&self) -> bool {
		false
	}

	/// A lazy, finite sequence of chunks whose concatenation (for
	/// non-copy tasks) equals the file's content. `chunk_size` bounds the
	/// size of each `Chunk::Bytes` yielded; the last chunk may be smaller.
	fn iter_data(&self, chunk_size: usize) -> ByteStream;
}

/// Shared attempt counter, reused by every concrete `Task` implementation
/// instead of hand-rolling the bookkeeping in each backend.
#[derive(Debug, Default)]
pub struct AttemptCounter(AtomicU32);

impl AttemptCounter {
	pub fn get(&self) -> u32 {
		self.0.load(Ordering::Relaxed)
	}

	pub fn bump(&self) {
		self.0.fetch_add(1, Ordering::Relaxed);
	}
}

#[cfg(test)]
mod tests {
	use super::AttemptCounter;

	#[test]
	fn counter_starts_at_zero_and_increments() {
		let counter = AttemptCounter::default();
		assert_eq!(counter.get(), 0);
		counter.bump();
		counter.bump();
		assert_eq!(counter.get(), 2);
	}
}
