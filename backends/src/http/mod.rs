//! §4.C "HTTP source": either a single URL, or a text file listing one URL
//! per line. There is no HTTP destination — uploading to an arbitrary URL is
//! out of scope.

use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use common::{AttemptCounter, BackendError, BackendResult, Chunk, ErrorKind, Task};
use futures::StreamExt;
use url::Url;

use crate::backend::{SourceBackend, TaskStream};

#[derive(Debug)]
pub struct HttpTask {
	url: Url,
	relative_path: String,
	size: u64,
	http: reqwest::Client,
	attempt: AttemptCounter,
}

impl Task for HttpTask {
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
		let url = self.url.clone();
		let http = self.http.clone();
		let stream = stream! {
			let response = http.get(url).send().await.map_err(BackendError::from)?;
			if !response.status().is_success() {
				let status = response.status();
				yield Err(BackendError::new(
					ErrorKind::Service,
					anyhow::anyhow!("GET returned {status}"),
				));
				return;
			}
			let mut response = response;
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

/// `unquote(basename(url))`: the last path segment of the URL, percent-decoded.
fn filename_of(url: &Url) -> String {
	let last = url.path_segments().and_then(|mut segments| segments.next_back()).unwrap_or("");
	percent_encoding::percent_decode_str(last).decode_utf8_lossy().into_owned()
}

#[derive(Debug, Clone)]
pub struct HttpSource {
	urls: Vec<Url>,
	http: reqwest::Client,
}

impl HttpSource {
	/// `path` is either an `http(s)` URL (single-file mode) or a filesystem
	/// path to a text file listing one URL per line.
	pub async fn new(path: &str, http: reqwest::Client) -> BackendResult<Self> {
		let urls = if let Ok(url) = Url::parse(path) {
			if matches!(url.scheme(), "http" | "https") {
				vec![url]
			} else {
				Self::read_url_list(path).await?
			}
		} else {
			Self::read_url_list(path).await?
		};
		Ok(Self { urls, http })
	}

	async fn read_url_list(path: &str) -> BackendResult<Vec<Url>> {
		let contents = tokio::fs::read_to_string(path).await.map_err(BackendError::from)?;
		contents
			.lines()
			.map(str::trim)
			.filter(|line| !line.is_empty())
			.map(|line| Url::parse(line).map_err(|e| BackendError::new(ErrorKind::Internal, e.into())))
			.collect()
	}

	/// Size is `Content-Length` off a plain GET's response headers; the body
	/// itself is dropped unread here and re-fetched by `iter_data` when the
	/// task actually runs.
	async fn head_size(&self, url: &Url) -> u64 {
		self.http
			.get(url.clone())
			.send()
			.await
			.ok()
			.and_then(|resp| resp.headers().get(reqwest::header::CONTENT_LENGTH).cloned())
			.and_then(|value| value.to_str().ok().and_then(|s| s.parse().ok()))
			.unwrap_or(0)
	}
}

#[async_trait]
impl SourceBackend for HttpSource {
	async fn iter_tasks(&self) -> BackendResult<TaskStream> {
		let sized = futures::stream::iter(self.urls.clone())
			.then(|url| {
				let this = self.clone();
				async move {
					let size = this.head_size(&url).await;
					let relative_path = filename_of(&url);
					Ok(Arc::new(HttpTask {
						url,
						relative_path,
						size,
						http: this.http.clone(),
						attempt: AttemptCounter::default(),
					}) as Arc<dyn Task>)
				}
			})
			.boxed();
		Ok(sized)
	}
}

#[cfg(test)]
mod tests {
	use wiremock::{
		matchers::{method, path},
		Mock, MockServer, ResponseTemplate,
	};

	use super::*;

	#[test]
	fn filename_of_decodes_percent_encoded_basename() {
		let url = Url::parse("https://example.invalid/a/b/hello%20world.txt").unwrap();
		assert_eq!(filename_of(&url), "hello world.txt");
	}

	#[tokio::test]
	async fn single_url_yields_one_task_sized_from_content_length() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/file.bin"))
			.respond_with(ResponseTemplate::new(200).insert_header("content-length", "10").set_body_bytes(vec![0u8; 10]))
			.mount(&server)
			.await;

		let source = HttpSource::new(&format!("{}/file.bin", server.uri()), reqwest::Client::new()).await.unwrap();
		let mut stream = source.iter_tasks().await.unwrap();
		let task = stream.next().await.unwrap().unwrap();
		assert_eq!(task.relative_path(), "file.bin");
		assert_eq!(task.total_size(), 10);
		assert!(stream.next().await.is_none());
	}

	#[tokio::test]
	async fn url_list_file_yields_one_task_per_line() {
		let server = MockServer::start().await;
		Mock::given(method("GET")).respond_with(ResponseTemplate::new(200).insert_header("content-length", "1")).mount(&server).await;

		let list_path = std::env::temp_dir().join(format!("http-source-test-{}.txt", std::process::id()));
		let contents = format!("{}/a.bin\n{}/b.bin\n", server.uri(), server.uri());
		tokio::fs::write(&list_path, contents).await.unwrap();

		let source = HttpSource::new(list_path.to_str().unwrap(), reqwest::Client::new()).await.unwrap();
		let mut stream = source.iter_tasks().await.unwrap();
		let mut names = Vec::new();
		while let Some(task) = stream.next().await {
			names.push(task.unwrap().relative_path().to_string());
		}
		names.sort();
		assert_eq!(names, vec!["a.bin", "b.bin"]);

		tokio::fs::remove_file(&list_path).await.unwrap();
	}
}
