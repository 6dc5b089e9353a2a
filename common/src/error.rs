//! The error taxonomy that binds the backend protocol to the engine (§7).

use std::{fmt, sync::Arc};

use thiserror::Error;

/// Classification of a lower-level backend error, independent of which
/// provider raised it. Mirrors the kind enum every backend's error type
/// converts into at its boundary.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
	Connection,
	Polling,
	NotSupported,
	Io,
	NotFound,
	Unauthorized,
	RateLimited,
	Service,
	Internal,
}

#[derive(Clone, Debug, Error)]
#[error("backend error(kind={kind:?}): {source}")]
pub struct BackendError {
	pub kind: ErrorKind,
	#[source]
	pub source: Arc<anyhow::Error>,
}

pub type BackendResult<T> = Result<T, BackendError>;

impl BackendError {
	pub fn new(kind: ErrorKind, source: anyhow::Error) -> Self {
		BackendError { kind, source: Arc::new(source) }
	}

	pub fn add_context<C: fmt::Display + Send + Sync + 'static>(self, ctx: C) -> Self {
		BackendError { kind: self.kind, source: Arc::new(anyhow::anyhow!("{ctx}").context(self.source)) }
	}
}

impl From<std::io::Error> for BackendError {
	fn from(err: std::io::Error) -> Self {
		let kind = match err.kind() {
			std::io::ErrorKind::NotFound => ErrorKind::NotFound,
			std::io::ErrorKind::AlreadyExists => ErrorKind::Internal,
			_ => ErrorKind::Io,
		};
		BackendError::new(kind, err.into())
	}
}

impl From<reqwest::Error> for BackendError {
	fn from(err: reqwest::Error) -> Self {
		let kind = match err.status().map(|s| s.as_u16()) {
			Some(429) => ErrorKind::RateLimited,
			Some(401) | Some(403) => ErrorKind::Unauthorized,
			Some(404) => ErrorKind::NotFound,
			_ if err.is_timeout() || err.is_connect() => ErrorKind::Connection,
			_ => ErrorKind::Service,
		};
		BackendError::new(kind, err.into())
	}
}

impl crate::retry::Retryable for BackendError {
	fn is_retryable(&self) -> bool {
		matches!(self.kind, ErrorKind::Connection | ErrorKind::Polling | ErrorKind::RateLimited)
	}
}

/// The four outcome categories of a single worker attempt (§7).
#[derive(Debug)]
pub enum Outcome {
	/// The task completed; all bytes (or the copy call) reached the
	/// destination.
	Success,
	/// The destination already holds a file with the same parent + name.
	/// Not re-enqueued, not a failure.
	Exists,
	/// The backend has been throttled. The task is re-enqueued and the
	/// global sleep gate is armed for `seconds`.
	Sleep(u64),
	/// Any other error. The task is re-enqueued, unless its attempt count
	/// has exceeded the dead-letter threshold (§11).
	Fail(anyhow::Error),
}

impl fmt::Display for Outcome {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Outcome::Success => write!(f, "success"),
			Outcome::Exists => write!(f, "exists"),
			Outcome::Sleep(secs) => write!(f, "sleep({secs}s)"),
			Outcome::Fail(err) => write!(f, "fail({err})"),
		}
	}
}
