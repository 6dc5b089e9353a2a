//! §4.B "Remote client" (Google Drive variant): a thin `reqwest` wrapper
//! around the Drive v3 REST API, plus the idempotent `sleep` throttle flag
//! every client in a `ClientPool` must expose.

use std::sync::Arc;

use common::{retry, BackendError, BackendResult, ErrorKind, RetryParams};
use serde::Deserialize;
use serde_json::json;

use crate::{
	client_pool::{SleepAware, SleepState},
	token::TokenBackend,
};

pub const FIELDS: &str = "id,name,mimeType,size,parents,trashed";
const FILES_ENDPOINT: &str = "https://www.googleapis.com/drive/v3/files";
const UPLOAD_ENDPOINT: &str = "https://www.googleapis.com/upload/drive/v3/files";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
	pub id: String,
	pub name: String,
	#[serde(default)]
	pub mime_type: String,
	/// Drive returns this as a decimal string, not a JSON number.
	#[serde(default)]
	pub size: Option<String>,
}

impl DriveFile {
	pub fn is_folder(&self) -> bool {
		self.mime_type == "application/vnd.google-apps.folder"
	}

	pub fn size_bytes(&self) -> u64 {
		self.size.as_deref().and_then(|s| s.parse().ok()).unwrap_or(0)
	}
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListFilesResponse {
	#[serde(default)]
	files: Vec<DriveFile>,
	#[serde(default)]
	next_page_token: Option<String>,
}

pub enum StartUpload {
	UploadUrl(String),
	AlreadyExists,
}

pub enum CopyResult {
	Ok,
	AlreadyExists,
}

#[derive(Clone)]
pub struct DriveClient {
	http: reqwest::Client,
	token: Arc<dyn TokenBackend>,
	sleep_state: Arc<SleepState>,
	drive_id: Option<String>,
	retry_params: RetryParams,
}

impl std::fmt::Debug for DriveClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DriveClient").field("drive_id", &self.drive_id).finish()
	}
}

impl SleepAware for DriveClient {
	fn sleep_state(&self) -> &SleepState {
		&self.sleep_state
	}
}

impl DriveClient {
	pub fn new(http: reqwest::Client, token: Arc<dyn TokenBackend>, drive_id: Option<String>) -> Self {
		Self { http, token, sleep_state: Arc::new(SleepState::default()), drive_id, retry_params: RetryParams::default() }
	}

	async fn bearer(&self) -> BackendResult<String> {
		self.token.get_token().await
	}

	/// Escape hatch for the resumable-upload driver, which PUTs straight to
	/// a pre-authorized session URL and doesn't need the rest of this
	/// client's token/pool plumbing.
	pub fn http(&self) -> &reqwest::Client {
		&self.http
	}

	/// `list_children`: one page of `parent_id`'s children, optionally
	/// filtered to a single `name`. Paginated; caller iterates via
	/// `page_token`.
	pub async fn list_children(
		&self,
		parent_id: &str,
		name: Option<&str>,
		page_token: Option<&str>,
		page_size: u32,
	) -> BackendResult<(Vec<DriveFile>, Option<String>)> {
		let mut query = format!("'{parent_id}' in parents and trashed=false");
		if let Some(name) = name {
			query.push_str(&format!(" and name = '{}'", name.replace('\'', "\\'")));
		}
		let fields = format!("nextPageToken,files({FIELDS})");
		let this = self.clone();
		let response: ListFilesResponse = retry(&self.retry_params, || {
			let this = this.clone();
			let query = query.clone();
			let fields = fields.clone();
			async move {
				let token = this.bearer().await?;
				let mut request = this
					.http
					.get(FILES_ENDPOINT)
					.bearer_auth(token)
					.query(&[
						("q", query.as_str()),
						("fields", fields.as_str()),
						("pageSize", &page_size.to_string()),
						("supportsAllDrives", "true"),
						("includeItemsFromAllDrives", "true"),
					]);
				if let Some(drive_id) = &this.drive_id {
					request = request.query(&[("corpora", "drive"), ("driveId", drive_id.as_str())]);
				}
				if let Some(page_token) = page_token {
					request = request.query(&[("pageToken", page_token)]);
				}
				let response = request.send().await.map_err(BackendError::from)?;
				parse_json_response(response).await
			}
		})
		.await?;
		Ok((response.files, response.next_page_token))
	}

	pub async fn create_folder(&self, parent_id: &str, name: &str) -> BackendResult<String> {
		let body = json!({
			"name": name,
			"parents": [parent_id],
			"mimeType": "application/vnd.google-apps.folder",
		});
		let this = self.clone();
		let created: DriveFile = retry(&self.retry_params, || {
			let this = this.clone();
			let body = body.clone();
			async move {
				let token = this.bearer().await?;
				let response = this
					.http
					.post(FILES_ENDPOINT)
					.bearer_auth(token)
					.query(&[("supportsAllDrives", "true"), ("fields", "id,name,mimeType")])
					.json(&body)
					.send()
					.await
					.map_err(BackendError::from)?;
				parse_json_response(response).await
			}
		})
		.await?;
		Ok(created.id)
	}

	/// Pre-checks for an existing file with the same name under `parent`;
	/// `AlreadyExists` short-circuits before the resumable session is opened.
	pub async fn start_resumable_upload(&self, parent_id: &str, name: &str) -> BackendResult<StartUpload> {
		let (existing, _) = self.list_children(parent_id, Some(name), None, 1).await?;
		if !existing.is_empty() {
			return Ok(StartUpload::AlreadyExists);
		}
		let body = json!({ "name": name, "parents": [parent_id] });
		let token = self.bearer().await?;
		let response = self
			.http
			.post(UPLOAD_ENDPOINT)
			.bearer_auth(token)
			.query(&[("uploadType", "resumable"), ("supportsAllDrives", "true")])
			.json(&body)
			.send()
			.await
			.map_err(BackendError::from)?;
		if !response.status().is_success() {
			return Err(status_error(response).await);
		}
		let upload_url = response
			.headers()
			.get(reqwest::header::LOCATION)
			.and_then(|v| v.to_str().ok())
			.map(str::to_string)
			.ok_or_else(|| {
				BackendError::new(ErrorKind::Service, anyhow::anyhow!("resumable session response has no Location header"))
			})?;
		Ok(StartUpload::UploadUrl(upload_url))
	}

	/// Server-side copy, valid only Drive-to-Drive.
	pub async fn copy(&self, source_id: &str, dest_parent_id: &str, name: &str) -> BackendResult<CopyResult> {
		let (existing, _) = self.list_children(dest_parent_id, Some(name), None, 1).await?;
		if !existing.is_empty() {
			return Ok(CopyResult::AlreadyExists);
		}
		let body = json!({ "name": name, "parents": [dest_parent_id] });
		let token = self.bearer().await?;
		let response = self
			.http
			.post(format!("{FILES_ENDPOINT}/{source_id}/copy"))
			.bearer_auth(token)
			.query(&[("supportsAllDrives", "true")])
			.json(&body)
			.send()
			.await
			.map_err(BackendError::from)?;
		if response.status().is_success() {
			Ok(CopyResult::Ok)
		} else {
			Err(status_error(response).await)
		}
	}

	pub async fn download_stream(&self, file_id: &str) -> BackendResult<reqwest::Response> {
		let token = self.bearer().await?;
		let response = self
			.http
			.get(format!("{FILES_ENDPOINT}/{file_id}"))
			.bearer_auth(token)
			.query(&[("alt", "media"), ("supportsAllDrives", "true")])
			.send()
			.await
			.map_err(BackendError::from)?;
		if response.status().is_success() {
			Ok(response)
		} else {
			Err(status_error(response).await)
		}
	}

	pub async fn get_meta(&self, file_id: &str) -> BackendResult<DriveFile> {
		let token = self.bearer().await?;
		let response = self
			.http
			.get(format!("{FILES_ENDPOINT}/{file_id}"))
			.bearer_auth(token)
			.query(&[("fields", FIELDS), ("supportsAllDrives", "true")])
			.send()
			.await
			.map_err(BackendError::from)?;
		parse_json_response(response).await
	}
}

async fn parse_json_response<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> BackendResult<T> {
	if !response.status().is_success() {
		return Err(status_error(response).await);
	}
	response.json().await.map_err(BackendError::from)
}

async fn status_error(response: reqwest::Response) -> BackendError {
	let kind = match response.status().as_u16() {
		429 => ErrorKind::RateLimited,
		401 | 403 => ErrorKind::Unauthorized,
		404 => ErrorKind::NotFound,
		_ => ErrorKind::Service,
	};
	let status = response.status();
	let body = response.text().await.unwrap_or_default();
	BackendError::new(kind, anyhow::anyhow!("drive API returned {status}: {body}"))
}
