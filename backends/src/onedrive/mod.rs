//! §4.C "OneDrive destination" over the client in [`client`]: Graph addresses
//! items by path directly, so unlike Drive there is no folder-id resolution
//! step — `create_upload_session` creates any missing intermediate folders
//! implicitly.

pub mod client;

use std::sync::Arc;

use async_trait::async_trait;
use common::{BackendResult, Outcome, ProgressSink, Task};

use self::client::{OneDriveClient, StartUpload};
use crate::{
	backend::{failed_worker, DestinationBackend, Worker},
	client_pool::ClientPool,
	resumable_upload::{self, UploadOutcome, UploadProtocol},
};

const ONEDRIVE_UPLOAD_PROTOCOL: UploadProtocol =
	UploadProtocol { intermediate_codes: &[202], final_codes: &[200, 201], verify_range_header: false, step_size: 0 };

#[derive(Debug, Clone)]
pub struct OneDriveDestination {
	client_pool: Arc<ClientPool<OneDriveClient>>,
	/// The `PATH` half of the destination's `ALIAS:/PATH` argument. Graph
	/// has no folder-id indirection to fold this into (unlike Drive's
	/// `PathIndex`), so it's prepended to every task's `relative_path`
	/// directly.
	base_path: String,
	chunk_size: usize,
	step_size: usize,
	client_sleep: u64,
}

impl OneDriveDestination {
	pub fn new(
		clients: Vec<OneDriveClient>,
		base_path: impl Into<String>,
		chunk_size: usize,
		step_size: usize,
		client_sleep: u64,
	) -> Self {
		Self {
			client_pool: Arc::new(ClientPool::new(clients)),
			base_path: base_path.into(),
			chunk_size,
			step_size,
			client_sleep,
		}
	}
}

#[async_trait]
impl DestinationBackend for OneDriveDestination {
	fn kind(&self) -> &'static str {
		"od"
	}

	async fn get_worker(&self, task: Arc<dyn Task>, _progress: &dyn ProgressSink) -> Worker {
		if task.is_copy() {
			return failed_worker(anyhow::anyhow!("OneDrive destination does not support server-side copy"));
		}
		let client = self.client_pool.acquire().await;
		let remote_path = common::norm_path([self.base_path.as_str(), task.relative_path()]);
		let total_size = task.total_size();
		let chunk_size = self.chunk_size;
		let client_sleep = self.client_sleep;
		let protocol = UploadProtocol { step_size: self.step_size, ..ONEDRIVE_UPLOAD_PROTOCOL };

		Box::new(move |progress| {
			Box::pin(async move {
				let outcome: BackendResult<Outcome> = async {
					match client.create_upload_session(&remote_path).await? {
						StartUpload::AlreadyExists => Ok(Outcome::Exists),
						StartUpload::UploadUrl(upload_url) if total_size == 0 => {
							let _ = upload_url;
							Ok(Outcome::Success)
						}
						StartUpload::UploadUrl(upload_url) => {
							match resumable_upload::run(
								client.http(),
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
