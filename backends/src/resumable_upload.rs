//! §4.C upload algorithm / §4.D "chunked bytes": the PUT loop shared by the
//! Google Drive and OneDrive destinations. Provider differences — which
//! status codes mean "more to come" vs. "done", and whether an intermediate
//! response carries a `Range` header to cross-check — are captured by
//! `UploadProtocol`; everything else (building `Content-Range`, stepping a
//! chunk for progress, routing 429/`LimitExceeded` into a rate-limit signal)
//! is shared.

use std::sync::Arc;

use bytes::Bytes;
use common::{BackendError, BackendResult, Chunk, ErrorKind, SteppedBytes, Task, TaskProgress};
use futures::StreamExt;
use reqwest::header;

#[derive(Clone, Copy)]
pub struct UploadProtocol {
	/// Status codes meaning "chunk accepted, upload not yet complete".
	pub intermediate_codes: &'static [u16],
	/// Status codes meaning "upload complete".
	pub final_codes: &'static [u16],
	/// Whether an intermediate response's `Range` header upper bound must be
	/// cross-checked against the byte range just sent (Drive does this;
	/// Graph's upload sessions don't expose it the same way).
	pub verify_range_header: bool,
	/// Sub-slice size for progress reporting; 0 means "same as chunk size".
	pub step_size: usize,
}

#[derive(Debug)]
pub enum UploadOutcome {
	Done,
	RateLimited(u64),
}

/// Drives `task.iter_data(chunk_size)` through sequential `PUT`s against
/// `upload_url`, following `Content-Range` monotonicity. A zero-byte task
/// yields no chunks at all — completion is whatever created the upload
/// session in the first place (§8 P8).
pub async fn run(
	http: &reqwest::Client,
	upload_url: &str,
	task: &Arc<dyn Task>,
	chunk_size: usize,
	protocol: &UploadProtocol,
	progress: &dyn TaskProgress,
	default_sleep_seconds: u64,
) -> BackendResult<UploadOutcome> {
	let total = task.total_size();
	let step_size = if protocol.step_size == 0 { chunk_size } else { protocol.step_size };
	let mut stream = task.iter_data(chunk_size);
	let mut sent: u64 = 0;

	while let Some(chunk) = stream.next().await {
		let bytes = match chunk? {
			Chunk::Bytes(bytes) => bytes,
			Chunk::CopyRef(_) => {
				return Err(BackendError::new(
					ErrorKind::NotSupported,
					anyhow::anyhow!("resumable upload cannot accept a server-side copy ref"),
				));
			}
		};
		let start = sent;
		let end = start + bytes.len() as u64 - 1;
		sent += bytes.len() as u64;

		let response = put_chunk(http, upload_url, bytes, start, end, total, step_size, progress).await?;
		let status = response.status();

		if status.as_u16() == 429 {
			return Ok(UploadOutcome::RateLimited(retry_after_seconds(&response, default_sleep_seconds)));
		}
		if status.as_u16() == 400 {
			let body = response.text().await.unwrap_or_default();
			if body.contains("LimitExceeded") {
				return Ok(UploadOutcome::RateLimited(default_sleep_seconds));
			}
			return Err(BackendError::new(ErrorKind::Service, anyhow::anyhow!("chunk PUT rejected: {body}")));
		}
		if protocol.final_codes.contains(&status.as_u16()) {
			return Ok(UploadOutcome::Done);
		}
		if protocol.intermediate_codes.contains(&status.as_u16()) {
			if protocol.verify_range_header && !range_upper_bound_matches(&response, end) {
				return Err(BackendError::new(ErrorKind::Service, anyhow::anyhow!("range missing")));
			}
			continue;
		}
		let body = response.text().await.unwrap_or_default();
		return Err(BackendError::new(
			ErrorKind::Service,
			anyhow::anyhow!("unexpected chunk PUT status {status}: {body}"),
		));
	}
	Ok(UploadOutcome::Done)
}

fn retry_after_seconds(response: &reqwest::Response, default_sleep_seconds: u64) -> u64 {
	response
		.headers()
		.get(header::RETRY_AFTER)
		.and_then(|v| v.to_str().ok())
		.and_then(|s| s.parse().ok())
		.unwrap_or(default_sleep_seconds)
}

fn range_upper_bound_matches(response: &reqwest::Response, end: u64) -> bool {
	response
		.headers()
		.get(header::RANGE)
		.and_then(|v| v.to_str().ok())
		.and_then(|range| range.rsplit('-').next())
		.and_then(|upper| upper.parse::<u64>().ok())
		== Some(end)
}

async fn put_chunk(
	http: &reqwest::Client,
	upload_url: &str,
	bytes: Bytes,
	start: u64,
	end: u64,
	total: u64,
	step_size: usize,
	progress: &dyn TaskProgress,
) -> BackendResult<reqwest::Response> {
	let len = bytes.len() as u64;
	let response = http
		.put(upload_url)
		.header(header::CONTENT_LENGTH, len)
		.header(header::CONTENT_RANGE, format!("bytes {start}-{end}/{total}"))
		.body(bytes.clone())
		.send()
		.await
		.map_err(BackendError::from)?;
	for step in SteppedBytes::new(bytes, step_size) {
		progress.on_bytes(step.len() as u64);
	}
	Ok(response)
}
