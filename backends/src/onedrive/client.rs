//! §4.B "Remote client" (OneDrive variant): a thin `reqwest` wrapper around
//! the Microsoft Graph drive API. Unlike Drive, Graph addresses items by
//! path directly (`/me/drive/root:/<path>`), so this client never needs a
//! `PathIndex` — intermediate folders are created implicitly by the upload
//! session itself.

use std::sync::Arc;

use common::{BackendError, BackendResult, ErrorKind};
use percent_encoding::{AsciiSet, CONTROLS};
use serde::Deserialize;
use serde_json::json;

/// Everything outside RFC 3986 unreserved characters, plus `:` itself (Graph
/// uses it as the path/item delimiter in this URL form).
const PATH_SEGMENT: &AsciiSet = &CONTROLS
	.add(b' ')
	.add(b'"')
	.add(b'#')
	.add(b'%')
	.add(b'/')
	.add(b'<')
	.add(b'>')
	.add(b'?')
	.add(b'[')
	.add(b'\\')
	.add(b']')
	.add(b'^')
	.add(b'`')
	.add(b'{')
	.add(b'|')
	.add(b'}')
	.add(b':');

use crate::{
	client_pool::{SleepAware, SleepState},
	token::TokenBackend,
};

const GRAPH_ROOT: &str = "https://graph.microsoft.com/v1.0/me/drive/root:";

pub enum StartUpload {
	UploadUrl(String),
	AlreadyExists,
}

#[derive(Debug, Deserialize)]
struct UploadSessionResponse {
	#[serde(rename = "uploadUrl")]
	upload_url: String,
}

#[derive(Clone)]
pub struct OneDriveClient {
	http: reqwest::Client,
	token: Arc<dyn TokenBackend>,
	sleep_state: Arc<SleepState>,
}

impl std::fmt::Debug for OneDriveClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("OneDriveClient").finish()
	}
}

impl SleepAware for OneDriveClient {
	fn sleep_state(&self) -> &SleepState {
		&self.sleep_state
	}
}

impl OneDriveClient {
	pub fn new(http: reqwest::Client, token: Arc<dyn TokenBackend>) -> Self {
		Self { http, token, sleep_state: Arc::new(SleepState::default()) }
	}

	async fn bearer(&self) -> BackendResult<String> {
		self.token.get_token().await
	}

	/// Escape hatch for the resumable-upload driver, which PUTs straight to a
	/// pre-authorized session URL.
	pub fn http(&self) -> &reqwest::Client {
		&self.http
	}

	/// `create_upload_session`: `remote_path` is the full forward-slash path
	/// under the drive root, e.g. `"reports/q1/summary.pdf"`. `conflictBehavior:
	/// "fail"` means Graph itself rejects an existing item with 409 rather
	/// than silently renaming or overwriting it.
	pub async fn create_upload_session(&self, remote_path: &str) -> BackendResult<StartUpload> {
		let token = self.bearer().await?;
		let url = format!("{GRAPH_ROOT}/{}:/createUploadSession", encode_path(remote_path));
		let body = json!({ "item": { "@microsoft.graph.conflictBehavior": "fail" } });
		let response = self.http.post(&url).bearer_auth(token).json(&body).send().await.map_err(BackendError::from)?;
		if response.status().as_u16() == 409 {
			return Ok(StartUpload::AlreadyExists);
		}
		if !response.status().is_success() {
			return Err(status_error(response).await);
		}
		let parsed: UploadSessionResponse = response.json().await.map_err(BackendError::from)?;
		Ok(StartUpload::UploadUrl(parsed.upload_url))
	}
}

/// Graph path segments are joined by `:` delimiters in the URL, so each
/// segment's own `/` characters (there are none, since a path segment is a
/// single file/folder name) are otherwise untouched; only percent-encode
/// characters that would otherwise break the URL.
fn encode_path(remote_path: &str) -> String {
	remote_path.split('/').map(|seg| percent_encoding::utf8_percent_encode(seg, PATH_SEGMENT).to_string()).collect::<Vec<_>>().join("/")
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
	BackendError::new(kind, anyhow::anyhow!("OneDrive API returned {status}: {body}"))
}
