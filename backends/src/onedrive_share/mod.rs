//! §4.C "OneDrive Share source" (read-only): walks a SharePoint `personal`
//! sharing link via the `RenderListDataAsStream` JSON API rather than the
//! Graph API the other OneDrive backend uses — shared document libraries are
//! only reachable this way without provisioning an app registration for the
//! sharing tenant.

use std::collections::{HashMap, VecDeque};

use async_stream::stream;
use async_trait::async_trait;
use common::{retry, AttemptCounter, BackendError, BackendResult, Chunk, ErrorKind, RetryParams, Task};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::backend::{SourceBackend, TaskStream};

#[derive(Debug)]
pub struct ShareTask {
	url: String,
	relative_path: String,
	size: u64,
	http: reqwest::Client,
	attempt: AttemptCounter,
}

impl Task for ShareTask {
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
			let response = http.get(&url).send().await.map_err(BackendError::from)?;
			if !response.status().is_success() {
				let status = response.status();
				yield Err(BackendError::new(ErrorKind::Service, anyhow::anyhow!("download GET returned {status}")));
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

#[derive(Deserialize)]
struct RenderListResponse {
	#[serde(rename = "ListData")]
	list_data: ListData,
}

#[derive(Deserialize)]
struct ListData {
	#[serde(rename = "Row", default)]
	row: Vec<Value>,
	#[serde(rename = "NextHref", default)]
	next_href: Option<String>,
}

/// One directory page awaiting a `RenderListDataAsStream` call. A later page
/// of the same directory is pushed back onto the queue as its own item (with
/// `render_options` already advanced to `RENDER_OPTIONS_FOLLOWUP` and `query`
/// carrying the parsed `NextHref`) so that a subfolder discovered on an
/// earlier page is walked before a later page of its parent is fetched.
struct PendingShareDir {
	ref_path: String,
	render_options: u32,
	query: HashMap<String, String>,
}

/// `RenderOptions` value to send with the *first* listing request against a
/// directory; the first follow-up page (driven by `NextHref`) within that
/// same directory switches to `167943` regardless of mode.
const RENDER_OPTIONS_FOLDER_FIRST: u32 = 464647;
const RENDER_OPTIONS_FILE_FIRST: u32 = 12295;
const RENDER_OPTIONS_FOLLOWUP: u32 = 167943;

#[derive(Debug, Clone)]
pub struct OneDriveShareSource {
	http: reqwest::Client,
	is_folder: bool,
	list_url: String,
	download_url_template: String,
	base_document_path: String,
	a1_param: String,
	ref_path: String,
}

impl OneDriveShareSource {
	pub async fn new(share_url: &str, is_folder: bool, http: reqwest::Client) -> BackendResult<Self> {
		let without_scheme =
			share_url.strip_prefix("https://").or_else(|| share_url.strip_prefix("http://")).unwrap_or(share_url);
		let segments: Vec<&str> = without_scheme.split('/').collect();
		let (tenant_name, account_name) = match (segments.first(), segments.get(4)) {
			(Some(tenant), Some(account)) => (*tenant, *account),
			_ => {
				return Err(BackendError::new(
					ErrorKind::Internal,
					anyhow::anyhow!("'{share_url}' does not look like a SharePoint personal sharing link"),
				))
			}
		};
		let base_url = format!("https://{tenant_name}/personal/{account_name}");
		let list_func =
			if is_folder { "GetListUsingPath(DecodedUrl=@a1)" } else { "GetList(@a1)" };
		let list_url = format!("{base_url}/_api/web/{list_func}/RenderListDataAsStream");
		let download_url_template = format!("{base_url}/_layouts/15/download.aspx?UniqueId={{unique_id}}");
		let base_document_path = format!("/personal/{account_name}/Documents");
		let a1_param = format!("'{base_document_path}'");

		let location = no_redirect_client()
			.get(share_url)
			.send()
			.await
			.map_err(BackendError::from)?
			.headers()
			.get(reqwest::header::LOCATION)
			.and_then(|v| v.to_str().ok())
			.map(str::to_string)
			.ok_or_else(|| {
				BackendError::new(ErrorKind::Service, anyhow::anyhow!("sharing link did not redirect as expected"))
			})?;
		let id_segment = location
			.split('/')
			.nth(7)
			.ok_or_else(|| BackendError::new(ErrorKind::Service, anyhow::anyhow!("unexpected redirect shape: {location}")))?
			.split('&')
			.next()
			.unwrap_or("");
		let raw_ref_path = id_segment.strip_prefix("onedrive.aspx?id=").unwrap_or(id_segment);

		let ref_path = if is_folder {
			let tail: Vec<&str> = raw_ref_path.split("%2F").skip(4).collect();
			format!("/{}", tail.join("/"))
		} else {
			percent_encoding::percent_decode_str(raw_ref_path).decode_utf8_lossy().into_owned()
		};

		Ok(Self { http, is_folder, list_url, download_url_template, base_document_path, a1_param, ref_path })
	}

	fn view_xml_for(&self, ref_path: &str) -> String {
		format!(
			r#"<View Scope="RecursiveAll"><Query><Where><Eq><FieldRef Name="FileRef" /><Value Type="Text"><![CDATA[{ref_path}]]></Value></Eq></Where></Query><RowLimit Paged="True">1</RowLimit></View>"#
		)
	}

	/// The query params for the first page of a directory listing
	/// (`RootFolder`/`View=` plus the shared `@a1` parameter).
	fn initial_query(&self, ref_path: &str) -> HashMap<String, String> {
		let mut query = HashMap::new();
		query.insert("@a1".to_string(), self.a1_param.clone());
		if self.is_folder {
			query.insert("RootFolder".to_string(), format!("{}{}", self.base_document_path, ref_path));
		} else {
			query.insert("View=".to_string(), String::new());
		}
		query
	}

	async fn list_page(&self, ref_path: &str, render_options: u32, query: &HashMap<String, String>) -> BackendResult<ListData> {
		let mut parameters = json!({
			"__metadata": { "type": "SP.RenderListDataParameters" },
			"AddRequiredFields": true,
			"RenderOptions": render_options,
		});
		if self.is_folder {
			parameters["AllowMultipleValueFilterForTaxonomyFields"] = json!(true);
		} else {
			parameters["ViewXml"] = json!(self.view_xml_for(ref_path));
		}
		let body = json!({ "parameters": parameters });

		let response = self
			.http
			.post(&self.list_url)
			.header(reqwest::header::CONTENT_TYPE, "application/json;odata=verbose")
			.query(query)
			.json(&body)
			.send()
			.await
			.map_err(BackendError::from)?;
		if !response.status().is_success() {
			let status = response.status();
			return Err(BackendError::new(ErrorKind::Service, anyhow::anyhow!("list request returned {status}")));
		}
		let parsed: RenderListResponse = response.json().await.map_err(BackendError::from)?;
		Ok(parsed.list_data)
	}
}

#[async_trait]
impl SourceBackend for OneDriveShareSource {
	async fn iter_tasks(&self) -> BackendResult<TaskStream> {
		let this = self.clone();
		let stream = stream! {
			let mut queue = VecDeque::new();
			let initial_render_options =
				if this.is_folder { RENDER_OPTIONS_FOLDER_FIRST } else { RENDER_OPTIONS_FILE_FIRST };
			queue.push_back(PendingShareDir {
				ref_path: this.ref_path.clone(),
				render_options: initial_render_options,
				query: this.initial_query(&this.ref_path),
			});
			while let Some(dir) = queue.pop_front() {
				let retry_params = RetryParams::directory_listing();
				let page = retry(&retry_params, || {
					let this = this.clone();
					let ref_path = dir.ref_path.clone();
					let render_options = dir.render_options;
					let query = dir.query.clone();
					async move { this.list_page(&ref_path, render_options, &query).await }
				})
				.await;
				let list_data = match page {
					Ok(list_data) => list_data,
					Err(e) => {
						debug!(error = %e, ref_path = %dir.ref_path, "share listing failed, giving up on this directory");
						yield Err(e);
						continue;
					}
				};
				for row in &list_data.row {
					let file_type = row.get(".fileType").and_then(Value::as_str).unwrap_or("");
					let has_pdf = row.get(".hasPdf").and_then(Value::as_str).unwrap_or("");
					let file_ref = row.get("FileRef").and_then(Value::as_str).unwrap_or("");
					let relative_path = file_ref.split('/').skip(4).collect::<Vec<_>>().join("/");
					if file_type.is_empty() && has_pdf.is_empty() {
						queue.push_back(PendingShareDir {
							ref_path: format!("/{relative_path}"),
							render_options: if this.is_folder { RENDER_OPTIONS_FOLDER_FIRST } else { RENDER_OPTIONS_FILE_FIRST },
							query: this.initial_query(&format!("/{relative_path}")),
						});
					} else {
						let unique_id = row
							.get("UniqueId")
							.and_then(Value::as_str)
							.unwrap_or("")
							.trim_start_matches('{')
							.trim_end_matches('}')
							.to_string();
						let size = row
							.get("FileSizeDisplay")
							.and_then(Value::as_str)
							.and_then(|s| s.parse().ok())
							.unwrap_or(0);
						let download_url = this.download_url_template.replace("{unique_id}", &unique_id);
						let task: std::sync::Arc<dyn Task> = std::sync::Arc::new(ShareTask {
							url: download_url,
							relative_path,
							size,
							http: this.http.clone(),
							attempt: AttemptCounter::default(),
						});
						yield Ok(task);
					}
				}
				if let Some(next_href) = list_data.next_href {
					let mut next_query = parse_next_href(&next_href);
					next_query.insert("@a1".to_string(), this.a1_param.clone());
					queue.push_back(PendingShareDir {
						ref_path: dir.ref_path.clone(),
						render_options: RENDER_OPTIONS_FOLLOWUP,
						query: next_query,
					});
				}
			}
		};
		Ok(Box::pin(stream))
	}
}

/// `NextHref` is a query string (`&Page=TRUE&PageFirstRow=31&...`); parses it
/// into the param map used for the next page's POST.
fn parse_next_href(next_href: &str) -> HashMap<String, String> {
	url::form_urlencoded::parse(next_href.trim_start_matches(['&', '?']).as_bytes())
		.into_owned()
		.collect()
}

/// A client that never follows redirects, used only for the one request that
/// needs to observe the `Location` header of the first redirect rather than
/// the final destination.
fn no_redirect_client() -> reqwest::Client {
	reqwest::Client::builder()
		.redirect(reqwest::redirect::Policy::none())
		.build()
		.expect("building a reqwest client never fails for a no-op config")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parse_next_href_extracts_pagination_params() {
		let params = parse_next_href("&Page=TRUE&PageFirstRow=31");
		assert_eq!(params.get("Page").map(String::as_str), Some("TRUE"));
		assert_eq!(params.get("PageFirstRow").map(String::as_str), Some("31"));
	}
}
