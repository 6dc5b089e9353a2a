//! §4.C "Filesystem source/destination": the trivial backend — walk the
//! tree, read/write in `chunk_size` blocks, `Exists` if the destination
//! path is already there.

use std::{path::PathBuf, sync::Arc};

use async_stream::stream;
use async_trait::async_trait;
use common::{
	norm_path, AttemptCounter, BackendError, BackendResult, Chunk, ErrorKind, Outcome, ProgressSink, Task,
};
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use crate::backend::{DestinationBackend, SourceBackend, TaskStream, Worker};

#[derive(Debug)]
pub struct FsTask {
	absolute_path: PathBuf,
	relative_path: String,
	size: u64,
	attempt: AttemptCounter,
}

impl Task for FsTask {
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

	fn iter_data(&self, chunk_size: usize) -> common::ByteStream {
		let path = self.absolute_path.clone();
		let stream = stream! {
			let mut file = match tokio::fs::File::open(&path).await {
				Ok(file) => file,
				Err(e) => {
					yield Err(BackendError::from(e));
					return;
				}
			};
			let mut buf = vec![0u8; chunk_size];
			loop {
				match file.read(&mut buf).await {
					Ok(0) => break,
					Ok(n) => yield Ok(Chunk::Bytes(bytes::Bytes::copy_from_slice(&buf[..n]))),
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

#[derive(Debug, Clone)]
pub struct LocalFilesystemSource {
	root: PathBuf,
}

impl LocalFilesystemSource {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	async fn walk(root: PathBuf) -> BackendResult<Vec<(PathBuf, String, u64)>> {
		let mut out = Vec::new();
		let mut stack = vec![root.clone()];
		while let Some(dir) = stack.pop() {
			let mut entries = tokio::fs::read_dir(&dir).await.map_err(BackendError::from)?;
			while let Some(entry) = entries.next_entry().await.map_err(BackendError::from)? {
				let metadata = entry.metadata().await.map_err(BackendError::from)?;
				if metadata.is_dir() {
					stack.push(entry.path());
				} else if metadata.is_file() {
					let relative = entry
						.path()
						.strip_prefix(&root)
						.unwrap_or(&entry.path())
						.components()
						.map(|c| c.as_os_str().to_string_lossy().to_string())
						.collect::<Vec<_>>();
					out.push((entry.path(), norm_path(relative), metadata.len()));
				}
			}
		}
		Ok(out)
	}
}

#[async_trait]
impl SourceBackend for LocalFilesystemSource {
	async fn iter_tasks(&self) -> BackendResult<TaskStream> {
		let entries = Self::walk(self.root.clone()).await?;
		let stream = futures::stream::iter(entries.into_iter().map(|(absolute_path, relative_path, size)| {
			Ok(Arc::new(FsTask { absolute_path, relative_path, size, attempt: AttemptCounter::default() }) as Arc<dyn Task>)
		}));
		Ok(Box::pin(stream))
	}
}

#[derive(Debug, Clone)]
pub struct LocalFilesystemDestination {
	root: PathBuf,
}

impl LocalFilesystemDestination {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	fn target_path(&self, relative_path: &str) -> PathBuf {
		self.root.join(relative_path)
	}
}

#[async_trait]
impl DestinationBackend for LocalFilesystemDestination {
	fn kind(&self) -> &'static str {
		"filesystem"
	}

	async fn get_worker(&self, task: Arc<dyn Task>, _progress: &dyn ProgressSink) -> Worker {
		let target = self.target_path(task.relative_path());
		if target.exists() {
			return Box::new(move |progress| {
				Box::pin(async move {
					progress.on_exists();
					Outcome::Exists
				})
			});
		}
		Box::new(move |progress| {
			Box::pin(async move {
				let result: BackendResult<()> = async {
					if let Some(parent) = target.parent() {
						tokio::fs::create_dir_all(parent).await.map_err(BackendError::from)?;
					}
					let mut file = tokio::fs::File::create(&target).await.map_err(BackendError::from)?;
					let mut stream = task.iter_data(256 * 1024);
					while let Some(chunk) = stream.next().await {
						match chunk? {
							Chunk::Bytes(bytes) => {
								file.write_all(&bytes).await.map_err(BackendError::from)?;
								progress.on_bytes(bytes.len() as u64);
							}
							Chunk::CopyRef(_) => {
								return Err(BackendError::new(
									ErrorKind::NotSupported,
									anyhow::anyhow!("filesystem destination cannot accept a server-side copy ref"),
								));
							}
						}
					}
					file.flush().await.map_err(BackendError::from)?;
					Ok(())
				}
				.await;
				match result {
					Ok(()) => {
						progress.on_success();
						Outcome::Success
					}
					Err(e) => {
						debug!(error = %e, "filesystem write failed");
						progress.on_fail(&e.to_string());
						Outcome::Fail(e.into())
					}
				}
			})
		})
	}
}

#[cfg(test)]
mod tests {
	use common::{NullProgressSink, ProgressSink as _};
	use tempfile::TempDir;

	use super::*;

	#[tokio::test]
	async fn source_walks_nested_files() {
		let dir = TempDir::new().unwrap();
		tokio::fs::write(dir.path().join("a.txt"), b"ABC").await.unwrap();
		tokio::fs::create_dir(dir.path().join("sub")).await.unwrap();
		tokio::fs::write(dir.path().join("sub/b.txt"), b"X").await.unwrap();

		let source = LocalFilesystemSource::new(dir.path());
		let mut stream = source.iter_tasks().await.unwrap();
		let mut found = Vec::new();
		while let Some(task) = stream.next().await {
			let task = task.unwrap();
			found.push((task.relative_path().to_string(), task.total_size()));
		}
		found.sort();
		assert_eq!(found, vec![("a.txt".to_string(), 3), ("sub/b.txt".to_string(), 1)]);
	}

	#[tokio::test]
	async fn destination_writes_file_and_reports_success() {
		let src_dir = TempDir::new().unwrap();
		tokio::fs::write(src_dir.path().join("a.txt"), b"ABC").await.unwrap();
		let dst_dir = TempDir::new().unwrap();

		let source = LocalFilesystemSource::new(src_dir.path());
		let destination = LocalFilesystemDestination::new(dst_dir.path());
		let sink = NullProgressSink;

		let mut stream = source.iter_tasks().await.unwrap();
		let task = stream.next().await.unwrap().unwrap();
		let worker = destination.get_worker(task, &sink).await;
		let outcome = worker(sink.start("a.txt", 3)).await;
		assert!(matches!(outcome, Outcome::Success));
		let written = tokio::fs::read(dst_dir.path().join("a.txt")).await.unwrap();
		assert_eq!(written, b"ABC");
	}

	#[tokio::test]
	async fn destination_reports_exists_without_overwriting() {
		let src_dir = TempDir::new().unwrap();
		tokio::fs::write(src_dir.path().join("a.txt"), b"ABC").await.unwrap();
		let dst_dir = TempDir::new().unwrap();
		tokio::fs::write(dst_dir.path().join("a.txt"), b"OLD").await.unwrap();

		let source = LocalFilesystemSource::new(src_dir.path());
		let destination = LocalFilesystemDestination::new(dst_dir.path());
		let sink = NullProgressSink;

		let mut stream = source.iter_tasks().await.unwrap();
		let task = stream.next().await.unwrap().unwrap();
		let worker = destination.get_worker(task, &sink).await;
		let outcome = worker(sink.start("a.txt", 3)).await;
		assert!(matches!(outcome, Outcome::Exists));
		let contents = tokio::fs::read(dst_dir.path().join("a.txt")).await.unwrap();
		assert_eq!(contents, b"OLD");
	}
}
