//! §3 `PathIndex` / §4.C `_get_dir_id`: caches normalized remote directory
//! path → remote folder id, seeded with `"" -> root_id`. §9 open question 4:
//! folder creation is serialized per `(parent, name)` by keying a
//! `tokio::sync::OnceCell` off the full normalized path in a `DashMap`, so
//! two workers racing to resolve the same missing folder share one
//! in-flight creation instead of both calling `create_folder`.

use std::future::Future;

use common::{norm_path, BackendError, BackendResult, ErrorKind};
use dashmap::DashMap;
use tokio::sync::OnceCell;

pub struct PathIndex {
	root_id: String,
	entries: DashMap<String, std::sync::Arc<OnceCell<String>>>,
}

impl PathIndex {
	pub fn new(root_id: impl Into<String>) -> Self {
		Self { root_id: root_id.into(), entries: DashMap::new() }
	}

	/// Walks the prefixes of `path`, resolving each via `find` (list the
	/// parent's children filtered by name). If a segment is missing and
	/// `create` is `Some`, the folder is created and recorded; if `create`
	/// is `None` (source-backend role), a missing segment is a `NotFound`
	/// error.
	pub async fn resolve<F, Fut, G, FutG>(
		&self,
		path: &str,
		find: F,
		create: Option<G>,
	) -> BackendResult<String>
	where
		F: Fn(String, String) -> Fut,
		Fut: Future<Output = BackendResult<Option<String>>>,
		G: Fn(String, String) -> FutG,
		FutG: Future<Output = BackendResult<String>>,
	{
		let normalized = norm_path([path]);
		if normalized.is_empty() {
			return Ok(self.root_id.clone());
		}
		let mut parent_id = self.root_id.clone();
		let mut acc = String::new();
		for segment in normalized.split('/') {
			acc = if acc.is_empty() { segment.to_string() } else { format!("{acc}/{segment}") };
			let cell = self.entries.entry(acc.clone()).or_insert_with(|| std::sync::Arc::new(OnceCell::new())).clone();
			let current_parent = parent_id.clone();
			let segment_owned = segment.to_string();
			let id = cell
				.get_or_try_init(|| async {
					if let Some(existing) = find(current_parent.clone(), segment_owned.clone()).await? {
						return Ok(existing);
					}
					match &create {
						Some(create) => create(current_parent.clone(), segment_owned.clone()).await,
						None => Err(BackendError::new(
							ErrorKind::NotFound,
							anyhow::anyhow!("remote directory '{acc}' does not exist"),
						)),
					}
				})
				.await?
				.clone();
			parent_id = id;
		}
		Ok(parent_id)
	}
}

#[cfg(test)]
mod tests {
	use std::sync::{
		atomic::{AtomicUsize, Ordering},
		Arc,
	};

	use super::*;

	#[tokio::test]
	async fn resolves_nested_path_one_segment_at_a_time() {
		let index = PathIndex::new("root");
		let find_calls = Arc::new(AtomicUsize::new(0));
		let calls = find_calls.clone();
		let id = index
			.resolve(
				"/a/b",
				move |parent, name| {
					calls.fetch_add(1, Ordering::SeqCst);
					async move { Ok(Some(format!("{parent}/{name}"))) }
				},
				None::<fn(String, String) -> std::future::Ready<BackendResult<String>>>,
			)
			.await
			.unwrap();
		assert_eq!(id, "root/a/b");
		assert_eq!(find_calls.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn creates_missing_folder_when_allowed() {
		let index = PathIndex::new("root");
		let id = index
			.resolve(
				"/missing",
				|_parent, _name| async { Ok(None) },
				Some(|parent: String, name: String| async move { Ok(format!("{parent}/{name}/created")) }),
			)
			.await
			.unwrap();
		assert_eq!(id, "root/missing/created");
	}

	#[tokio::test]
	async fn missing_folder_without_create_is_not_found() {
		let index = PathIndex::new("root");
		let result = index
			.resolve(
				"/missing",
				|_parent, _name| async { Ok(None) },
				None::<fn(String, String) -> std::future::Ready<BackendResult<String>>>,
			)
			.await;
		assert!(matches!(result, Err(e) if e.kind == ErrorKind::NotFound));
	}

	#[tokio::test]
	async fn concurrent_resolution_of_same_missing_folder_creates_exactly_once() {
		let index = Arc::new(PathIndex::new("root"));
		let create_calls = Arc::new(AtomicUsize::new(0));
		let mut handles = Vec::new();
		for _ in 0..8 {
			let index = index.clone();
			let create_calls = create_calls.clone();
			handles.push(tokio::spawn(async move {
				index
					.resolve(
						"/shared",
						|_parent, _name| async { Ok(None) },
						Some(move |parent: String, name: String| {
							let create_calls = create_calls.clone();
							async move {
								create_calls.fetch_add(1, Ordering::SeqCst);
								tokio::task::yield_now().await;
								Ok(format!("{parent}/{name}"))
							}
						}),
					)
					.await
					.unwrap()
			}));
		}
		let mut results = Vec::new();
		for handle in handles {
			results.push(handle.await.unwrap());
		}
		assert!(results.iter().all(|id| id == "root/shared"));
		assert_eq!(create_calls.load(Ordering::SeqCst), 1);
	}
}
