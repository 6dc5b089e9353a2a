//! §4.C "Google Drive source/destination" over the client in
//! [`client`]: enumeration via `PathIndex` + paginated `list_children`, and
//! the resumable-upload destination built on [`crate::resumable_upload`].

pub mod client;

use std::{collections::VecDeque, sync::Arc};

use async_stream::stream;
use async_trait::async_trait;
use common::{
	retry, split_parent, AttemptCounter, BackendError, BackendResult, Chunk, ErrorKind, Outcome, ProgressSink,
	RetryParams, Task,
};
use futures::StreamExt;
use tracing::debug;

use self::client::{CopyResult, DriveClient, StartUpload};
use crate::{
	backend::{failed_worker, DestinationBackend, SourceBackend, TaskStream, Worker},
	client_pool::ClientPool,
	path_index::PathIndex,
	resumable_upload::{self, UploadOutcome, UploadProtocol},
};

const DRIVE_UPLOAD_PROTOCOL: UploadProtocol =
	UploadProtocol { intermediate_codes: &[308], final_codes: &[200, 201], verify_range_header: true, step_size: 0 };

#[derive(Debug)]
pub struct DriveTask {
	file_id: String,
	relative_path: String,
	size: u64,
	client: DriveClient,
	attempt: AttemptCounter,
	/// Set when both source and destination were configured as `gd` and the
	/// transfer was started with `--copy`: `iter_data` yields a single
	/// `Chunk::CopyRef` instead of downloading any bytes.
	copy_mode: bool,
}

impl Task for DriveTask {
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

	fn is_copy(&self) -> bool {
		self.copy_mode
	}

	fn iter_data(&self, chunk_size: usize) -> common::ByteStream {
		if self.copy_mode {
			let file_id = self.file_id.clone();
			return Box::pin(futures::stream::once(async move { Ok(Chunk::CopyRef(file_id)) }));
		}
		let client = self.client.clone();
		let file_id = self.file_id.clone();
		let stream = stream! {
			let mut response = match client.download_stream(&file_id).await {
				Ok(response) => response,
				Err(e) => {
					yield Err(e);
					return;
				}
			};
			let mut pending = Vec::with_capacity(chunk_size);
			loop {
				match response.chunk().await {
					Ok(Some(bytes)) => {
						pending.extend_from_slice(&bytes);
						while pending.len() >= chunk_size {
							let rest = pending.split_off(chunk_size);
							yield Ok(Chunk::Bytes(bytes::Bytes::from(std::mem::replace(&mut pending, rest))));
						}
					}
					Ok(None) => {
						if !pending.is_empty() {
							yield Ok(Chunk::Bytes(bytes::Bytes::from(pending)));
						}
						break;
					}
					Err(e) => {
						yield Err(BackendError::from(e));
						break;
					}
				}
			}
		};
		Box::pin(stream)
	}
}

/// One directory page awaiting a `list_children` call; `relative_prefix` is
/// the path already accumulated above it (empty at the root). `page_token`
/// is `None` for a directory's first page; a later page of the same
/// directory is pushed back onto the queue as its own item so that a
/// subfolder discovered on an earlier page is walked before a later page of
/// its parent is fetched (true FIFO order).
struct PendingDir {
	folder_id: String,
	relative_prefix: String,
	page_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GoogleDriveSource {
	client_pool: Arc<ClientPool<DriveClient>>,
	path_index: Arc<PathIndex>,
	path: String,
	max_page_size: u32,
	copy_mode: bool,
}

impl GoogleDriveSource {
	pub fn new(
		clients: Vec<DriveClient>,
		root_id: impl Into<String>,
		path: impl Into<String>,
		max_page_size: u32,
		copy_mode: bool,
	) -> Self {
		Self {
			client_pool: Arc::new(ClientPool::new(clients)),
			path_index: Arc::new(PathIndex::new(root_id)),
			path: path.into(),
			max_page_size,
			copy_mode,
		}
	}

	async fn resolve_dir_readonly(&self, dir_path: &str, client: &DriveClient) -> BackendResult<String> {
		self.path_index
			.resolve(
				dir_path,
				|parent, name| async move {
					let (matches, _) = client.list_children(&parent, Some(&name), None, 1).await?;
					Ok(matches.into_iter().find(|f| f.is_folder()).map(|f| f.id))
				},
				None::<fn(String, String) -> std::future::Ready<BackendResult<String>>>,
			)
			.await
	}
}

#[async_trait]
impl SourceBackend for GoogleDriveSource {
	async fn iter_tasks(&self) -> BackendResult<TaskStream> {
		let client = self.client_pool.acquire().await;
		let normalized = common::norm_path([self.path.as_str()]);
		let (parent_path, leaf) = split_parent(&normalized);

		// Single-file mode (§4.C rule 1): does `path` name an existing file
		// directly under its parent?
		if !leaf.is_empty() {
			let parent_id = self.resolve_dir_readonly(parent_path, &client).await?;
			let (matches, _) = client.list_children(&parent_id, Some(leaf), None, 1).await?;
			if let Some(file) = matches.into_iter().find(|f| !f.is_folder()) {
				let task: Arc<dyn Task> = Arc::new(DriveTask {
					file_id: file.id,
					relative_path: leaf.to_string(),
					size: file.size_bytes(),
					client: client.clone(),
					attempt: AttemptCounter::default(),
					copy_mode: self.copy_mode,
				});
				return Ok(Box::pin(futures::stream::once(async move { Ok(task) })));
			}
		}

		// Folder mode: resolve the full path to a folder id, then walk it
		// breadth-first. A folder whose listing keeps failing after the
		// directory-listing retry budget surfaces as one `Err` item for
		// that directory rather than aborting the whole stream (§9).
		let root_id = self.resolve_dir_readonly(&normalized, &client).await?;
		let this = self.clone();
		let stream = stream! {
			let mut queue = VecDeque::new();
			queue.push_back(PendingDir { folder_id: root_id, relative_prefix: String::new(), page_token: None });
			while let Some(dir) = queue.pop_front() {
				let retry_params = RetryParams::directory_listing();
				let page = retry(&retry_params, || {
					let dir_folder_id = dir.folder_id.clone();
					let page_token = dir.page_token.clone();
					async {
						client.list_children(&dir_folder_id, None, page_token.as_deref(), this.max_page_size).await
					}
				})
				.await;
				let (files, next_page_token) = match page {
					Ok(page) => page,
					Err(e) => {
						debug!(error = %e, folder_id = %dir.folder_id, "directory listing failed, giving up on this directory");
						yield Err(e);
						continue;
					}
				};
				for file in files {
					let relative_path = if dir.relative_prefix.is_empty() {
						file.name.clone()
					} else {
						format!("{}/{}", dir.relative_prefix, file.name)
					};
					if file.is_folder() {
						queue.push_back(PendingDir { folder_id: file.id, relative_prefix: relative_path, page_token: None });
					} else if file.mime_type.starts_with("application/vnd.google-apps.") {
						// Native Docs/Sheets/Slides have no fixed byte size; skip rather
						// than attempt a binary download.
						debug!(name = %file.name, mime_type = %file.mime_type, "skipping native Google Docs file");
					} else {
						let task: Arc<dyn Task> = Arc::new(DriveTask {
							file_id: file.id,
							relative_path,
							size: file.size_bytes(),
							client: client.clone(),
							attempt: AttemptCounter::default(),
							copy_mode: this.copy_mode,
						});
						yield Ok(task);
					}
				}
				if let Some(token) = next_page_token {
					queue.push_back(PendingDir {
						folder_id: dir.folder_id,
						relative_prefix: dir.relative_prefix,
						page_token: Some(token),
					});
				}
			}
		};
		Ok(Box::pin(stream))
	}
}

#[derive(Debug, Clone)]
pub struct GoogleDriveDestination {
	client_pool: Arc<ClientPool<DriveClient>>,
	path_index: Arc<PathIndex>,
	chunk_size: usize,
	step_size: usize,
	/// `--client-sleep`: fallback throttle duration used when a 429 response
	/// carries no `Retry-After` header.
	client_sleep: u64,
}

impl GoogleDriveDestination {
	pub fn new(
		clients: Vec<DriveClient>,
		root_id: impl Into<String>,
		chunk_size: usize,
		step_size: usize,
		client_sleep: u64,
	) -> Self {
		Self {
			client_pool: Arc::new(ClientPool::new(clients)),
			path_index: Arc::new(PathIndex::new(root_id)),
			chunk_size,
			step_size,
			client_sleep,
		}
	}

	/// Like [`Self::new`], but `dest_path` (the `PATH` half of the
	/// destination's `ALIAS:/PATH` argument) is resolved — creating
	/// intermediate folders as needed — to an effective root before any
	/// task runs, so every task's `relative_path` lands under it rather
	/// than directly under `root_id`.
	pub async fn new_at_path(
		clients: Vec<DriveClient>,
		root_id: impl Into<String>,
		dest_path: &str,
		chunk_size: usize,
		step_size: usize,
		client_sleep: u64,
	) -> BackendResult<Self> {
		let destination = Self::new(clients, root_id, chunk_size, step_size, client_sleep);
		let normalized = common::norm_path([dest_path]);
		if normalized.is_empty() {
			return Ok(destination);
		}
		let client = destination.client_pool.acquire().await;
		let effective_root = destination.resolve_dir_creating(&normalized, &client).await?;
		Ok(Self {
			client_pool: destination.client_pool,
			path_index: Arc::new(PathIndex::new(effective_root)),
			chunk_size,
			step_size,
			client_sleep,
		})
	}

	async fn resolve_dir_creating(&self, dir_path: &str, client: &DriveClient) -> BackendResult<String> {
		self.path_index
			.resolve(
				dir_path,
				|parent, name| async move {
					let (matches, _) = client.list_children(&parent, Some(&name), None, 1).await?;
					Ok(matches.into_iter().find(|f| f.is_folder()).map(|f| f.id))
				},
				Some(|parent: String, name: String| async move { client.create_folder(&parent, &name).await }),
			)
			.await
	}
}

#[async_trait]
impl DestinationBackend for GoogleDriveDestination {
	fn kind(&self) -> &'static str {
		"gd"
	}

	fn supports_copy_from(&self, source_kind: &str) -> bool {
		source_kind == "gd"
	}

	async fn get_worker(&self, task: Arc<dyn Task>, _progress: &dyn ProgressSink) -> Worker {
		let client = self.client_pool.acquire().await;
		let (parent_path, name) = split_parent(task.relative_path());
		let name = name.to_string();
		let total_size = task.total_size();
		let is_copy = task.is_copy();
		let chunk_size = self.chunk_size;
		let client_sleep = self.client_sleep;
		let protocol = UploadProtocol { step_size: self.step_size, ..DRIVE_UPLOAD_PROTOCOL };
		let parent_id = match self.resolve_dir_creating(parent_path, &client).await {
			Ok(id) => id,
			Err(e) => return failed_worker(e.into()),
		};

		Box::new(move |progress| {
			Box::pin(async move {
				let outcome: BackendResult<Outcome> = async {
					if is_copy {
						let source_id = match task.iter_data(0).next().await {
							Some(Ok(Chunk::CopyRef(id))) => id,
							Some(Ok(Chunk::Bytes(_))) | None => {
								return Err(BackendError::new(
									ErrorKind::Internal,
									anyhow::anyhow!("copy task produced no copy reference"),
								))
							}
							Some(Err(e)) => return Err(e),
						};
						return match client.copy(&source_id, &parent_id, &name).await? {
							CopyResult::Ok => Ok(Outcome::Success),
							CopyResult::AlreadyExists => Ok(Outcome::Exists),
						};
					}
					match client.start_resumable_upload(&parent_id, &name).await? {
						StartUpload::AlreadyExists => Ok(Outcome::Exists),
						StartUpload::UploadUrl(upload_url) if total_size == 0 => {
							let _ = upload_url;
							Ok(Outcome::Success)
						}
						StartUpload::UploadUrl(upload_url) => {
							match resumable_upload::run(
								client_http(&client),
								&upload_url,
								&task,
								chunk_size,
								&protocol,
								progress.as_ref(),
								client_sleep,
							)
							.await?
							{
								UploadOutcome::Done => Ok(Outcome::Success),
								UploadOutcome::RateLimited(seconds) => {
									client.sleep(seconds);
									Ok(Outcome::Sleep(seconds))
								}
							}
						}
					}
				}
				.await;
				match outcome {
					Ok(Outcome::Success) => {
						progress.on_success();
						Outcome::Success
					}
					Ok(Outcome::Exists) => {
						progress.on_exists();
						Outcome::Exists
					}
					Ok(Outcome::Sleep(seconds)) => {
						progress.on_sleep(seconds);
						Outcome::Sleep(seconds)
					}
					Ok(other) => other,
					Err(e) => {
						progress.on_fail(&e.to_string());
						Outcome::Fail(e.into())
					}
				}
			})
		})
	}
}

/// `resumable_upload::run` only needs the raw HTTP client, not the rest of
/// `DriveClient`'s token/pool plumbing — the upload URL is already
/// pre-authorized by the session the caller started.
fn client_http(client: &DriveClient) -> &reqwest::Client {
	client.http()
}
