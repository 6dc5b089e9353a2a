//! §6 "The CLI resolves alias → config → transfer descriptor → concrete
//! backend class": turns one `configs.<alias>` entry plus the `PATH` half
//! of its `ALIAS:/PATH` argument into a concrete source or destination
//! backend.

use std::{path::PathBuf, sync::Arc};

use backends::{
	drive::{client::DriveClient, GoogleDriveDestination, GoogleDriveSource},
	filesystem::{LocalFilesystemDestination, LocalFilesystemSource},
	http::HttpSource,
	onedrive::{client::OneDriveClient, OneDriveDestination},
	onedrive_share::OneDriveShareSource,
	DestinationBackend, RefreshTokenBackend, ServiceAccountBackend, ServiceAccountKey, SourceBackend, TokenBackend,
};

use crate::config::AliasConfig;

const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GRAPH_TOKEN_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/token";

pub async fn build_source(
	alias: &AliasConfig,
	path: &str,
	max_page_size: u32,
	copy_mode: bool,
) -> anyhow::Result<Arc<dyn SourceBackend>> {
	let http = crate::http_client::build(&alias.http)?;
	match alias.transfer.as_str() {
		"filesystem" | "fs" => Ok(Arc::new(LocalFilesystemSource::new(path))),
		"gd" => {
			let client = drive_client(alias, http)?;
			let (root_id, path) = resolve_root_in_path(alias, path);
			Ok(Arc::new(GoogleDriveSource::new(vec![client], root_id, path, max_page_size, copy_mode)))
		}
		"ods" => Ok(Arc::new(OneDriveShareSource::new(path, alias.is_folder, http).await?)),
		"http" => Ok(Arc::new(HttpSource::new(path, http).await?)),
		"od" => Err(anyhow::anyhow!(
			"'od' is a OneDrive destination-only backend; use 'ods' to read a OneDrive Share link as a source"
		)),
		other => Err(anyhow::anyhow!("unknown transfer kind '{other}'")),
	}
}

pub async fn build_destination(
	alias: &AliasConfig,
	path: &str,
	chunk_size: usize,
	step_size: usize,
	client_sleep: u64,
) -> anyhow::Result<Arc<dyn DestinationBackend>> {
	let http = crate::http_client::build(&alias.http)?;
	match alias.transfer.as_str() {
		"filesystem" | "fs" => Ok(Arc::new(LocalFilesystemDestination::new(path))),
		"gd" => {
			let client = drive_client(alias, http)?;
			let (root_id, dest_path) = resolve_root_in_path(alias, path);
			let destination =
				GoogleDriveDestination::new_at_path(vec![client], root_id, &dest_path, chunk_size, step_size, client_sleep)
					.await?;
			Ok(Arc::new(destination))
		}
		"od" => {
			let client = onedrive_client(alias, http)?;
			Ok(Arc::new(OneDriveDestination::new(vec![client], path, chunk_size, step_size, client_sleep)))
		}
		"ods" => Err(anyhow::anyhow!("'ods' (OneDrive Share) is a read-only source backend, not a destination")),
		"http" => Err(anyhow::anyhow!("HTTP has no destination backend; uploading to an arbitrary URL is out of scope")),
		other => Err(anyhow::anyhow!("unknown transfer kind '{other}'")),
	}
}

/// §11 `use_root_in_path`: when set, the first segment of the CLI path is
/// itself the Drive root folder id rather than a path to resolve under
/// `alias.root`, and the remaining segments are the real relative path.
fn resolve_root_in_path(alias: &AliasConfig, path: &str) -> (String, String) {
	if alias.use_root_in_path {
		let trimmed = path.trim_start_matches('/');
		match trimmed.split_once('/') {
			Some((root, rest)) => (root.to_string(), rest.to_string()),
			None => (trimmed.to_string(), String::new()),
		}
	} else {
		(alias.root.clone().unwrap_or_else(|| "root".to_string()), path.to_string())
	}
}

fn drive_token(alias: &AliasConfig, http: reqwest::Client) -> anyhow::Result<Arc<dyn TokenBackend>> {
	let token_path =
		alias.token_path.clone().ok_or_else(|| anyhow::anyhow!("'gd' config is missing `token_path`"))?;
	if alias.service_account {
		let contents = std::fs::read_to_string(&token_path)?;
		let key: ServiceAccountKey = serde_json::from_str(&contents)?;
		Ok(Arc::new(ServiceAccountBackend::new(key, http)))
	} else {
		let creds = alias
			.client
			.clone()
			.ok_or_else(|| anyhow::anyhow!("'gd' refresh-token config is missing `client`"))?;
		let backend = RefreshTokenBackend::load(
			PathBuf::from(token_path),
			GOOGLE_TOKEN_URL,
			creds.client_id,
			creds.client_secret,
			http,
		)?;
		Ok(Arc::new(backend))
	}
}

fn drive_client(alias: &AliasConfig, http: reqwest::Client) -> anyhow::Result<DriveClient> {
	let token = drive_token(alias, http.clone())?;
	Ok(DriveClient::new(http, token, alias.drive_id.clone()))
}

fn onedrive_client(alias: &AliasConfig, http: reqwest::Client) -> anyhow::Result<OneDriveClient> {
	let token_path =
		alias.token_path.clone().ok_or_else(|| anyhow::anyhow!("'od' config is missing `token_path`"))?;
	let creds = alias.client.clone().ok_or_else(|| anyhow::anyhow!("'od' config is missing `client`"))?;
	let token: Arc<dyn TokenBackend> = Arc::new(RefreshTokenBackend::load(
		PathBuf::from(token_path),
		GRAPH_TOKEN_URL,
		creds.client_id,
		creds.client_secret,
		http.clone(),
	)?);
	Ok(OneDriveClient::new(http, token))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn alias(transfer: &str) -> AliasConfig {
		AliasConfig {
			transfer: transfer.to_string(),
			token_path: None,
			service_account: false,
			client: None,
			root: None,
			drive_id: None,
			use_root_in_path: false,
			is_folder: false,
			http: Default::default(),
		}
	}

	#[test]
	fn root_in_path_disabled_uses_configured_root() {
		let mut a = alias("gd");
		a.root = Some("root123".to_string());
		let (root, rest) = resolve_root_in_path(&a, "a/b.txt");
		assert_eq!(root, "root123");
		assert_eq!(rest, "a/b.txt");
	}

	#[test]
	fn root_in_path_enabled_splits_first_segment() {
		let mut a = alias("gd");
		a.use_root_in_path = true;
		let (root, rest) = resolve_root_in_path(&a, "/folderid123/a/b.txt");
		assert_eq!(root, "folderid123");
		assert_eq!(rest, "a/b.txt");
	}
}
