//! §4.A: OAuth token persistence and refresh. Two variants, both exposing
//! `get_token`; refresh is serialized per backend instance via a single
//! mutex guarding the cached `TokenState`, which gives the required
//! double-checked-locking behavior for free: a thread that loses the race
//! to acquire the lock re-checks expiry once it gets in, and finds the
//! token already refreshed by whoever got there first.

use std::path::PathBuf;

use common::{retry, BackendError, BackendResult, ErrorKind, RetryParams};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

fn now_unix() -> i64 {
	chrono::Utc::now().timestamp()
}

/// `{access_token, refresh_token?, scope?, expires_in, acquired_at}` (§3).
/// Persisted to `token_path` on every successful refresh-token-mode
/// refresh; service-account tokens never touch disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenState {
	pub access_token: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub refresh_token: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub scope: Option<String>,
	pub expires_in: u64,
	pub acquired_at: i64,
}

impl TokenState {
	fn is_expired(&self, now: i64) -> bool {
		self.acquired_at + self.expires_in as i64 <= now
	}
}

#[async_trait::async_trait]
pub trait TokenBackend: std::fmt::Debug + Send + Sync {
	async fn get_token(&self) -> BackendResult<String>;
}

#[derive(Debug, Deserialize, Clone)]
struct RefreshResponse {
	access_token: String,
	#[serde(default)]
	refresh_token: Option<String>,
	#[serde(default)]
	scope: Option<String>,
	expires_in: u64,
}

/// Variant 1 (§4.A): POSTs `{grant_type: "refresh_token", refresh_token,
/// client_id, client_secret}` to the provider's token endpoint on expiry.
pub struct RefreshTokenBackend {
	token_path: PathBuf,
	token_url: String,
	client_id: String,
	client_secret: String,
	http: reqwest::Client,
	retry_params: RetryParams,
	state: Mutex<TokenState>,
}

impl std::fmt::Debug for RefreshTokenBackend {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RefreshTokenBackend").field("token_path", &self.token_path).finish()
	}
}

impl RefreshTokenBackend {
	pub fn new(
		token_path: PathBuf,
		token_url: impl Into<String>,
		client_id: impl Into<String>,
		client_secret: impl Into<String>,
		initial: TokenState,
		http: reqwest::Client,
	) -> Self {
		Self {
			token_path,
			token_url: token_url.into(),
			client_id: client_id.into(),
			client_secret: client_secret.into(),
			http,
			retry_params: RetryParams::token_refresh(),
			state: Mutex::new(initial),
		}
	}

	pub fn load(
		token_path: PathBuf,
		token_url: impl Into<String>,
		client_id: impl Into<String>,
		client_secret: impl Into<String>,
		http: reqwest::Client,
	) -> BackendResult<Self> {
		let contents = std::fs::read_to_string(&token_path)
			.map_err(|e| BackendError::from(e).add_context(format!("reading {}", token_path.display())))?;
		let initial: TokenState = serde_json::from_str(&contents)
			.map_err(|e| BackendError::new(ErrorKind::Io, e.into()))?;
		Ok(Self::new(token_path, token_url, client_id, client_secret, initial, http))
	}

	fn persist(&self, state: &TokenState) -> BackendResult<()> {
		let serialized =
			serde_json::to_string_pretty(state).map_err(|e| BackendError::new(ErrorKind::Internal, e.into()))?;
		std::fs::write(&self.token_path, serialized).map_err(BackendError::from)
	}

	#[instrument(level = "debug", skip(self))]
	async fn refresh(&self, state: &mut TokenState) -> BackendResult<()> {
		let Some(refresh_token) = state.refresh_token.clone() else {
			return Err(BackendError::new(
				ErrorKind::Unauthorized,
				anyhow::anyhow!("token file has no refresh_token, cannot refresh"),
			));
		};
		let body = serde_json::json!({
			"grant_type": "refresh_token",
			"refresh_token": refresh_token,
			"client_id": self.client_id,
			"client_secret": self.client_secret,
		});
		let url = self.token_url.clone();
		let http = self.http.clone();
		let response = retry(&self.retry_params, || {
			let http = http.clone();
			let url = url.clone();
			let body = body.clone();
			async move {
				let resp = http.post(&url).json(&body).send().await.map_err(BackendError::from)?;
				if !resp.status().is_success() {
					let status = resp.status();
					let text = resp.text().await.unwrap_or_default();
					return Err(BackendError::new(
						ErrorKind::Unauthorized,
						anyhow::anyhow!("token refresh failed: {status} {text}"),
					));
				}
				resp.json::<RefreshResponse>().await.map_err(BackendError::from)
			}
		})
		.await?;
		debug!("token refreshed");
		state.access_token = response.access_token;
		state.refresh_token = response.refresh_token.or_else(|| state.refresh_token.clone());
		state.scope = response.scope;
		state.expires_in = response.expires_in;
		state.acquired_at = now_unix();
		self.persist(state)
	}
}

#[async_trait::async_trait]
impl TokenBackend for RefreshTokenBackend {
	async fn get_token(&self) -> BackendResult<String> {
		let mut state = self.state.lock().await;
		if state.is_expired(now_unix()) {
			self.refresh(&mut state).await?;
		}
		Ok(state.access_token.clone())
	}
}

/// Google service-account JSON: `{client_email, private_key, ...}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
	pub client_email: String,
	pub private_key: String,
	#[serde(default = "default_token_uri")]
	pub token_uri: String,
}

fn default_token_uri() -> String {
	"https://oauth2.googleapis.com/token".to_string()
}

#[derive(Serialize)]
struct JwtClaims {
	iss: String,
	scope: String,
	aud: String,
	iat: i64,
	exp: i64,
}

/// Variant 2 (§4.A, Google only): signs a JWT RS256 assertion and exchanges
/// it for an access token. Never persists to disk — service-account tokens
/// stay in memory for the process lifetime.
pub struct ServiceAccountBackend {
	key: ServiceAccountKey,
	scope: String,
	http: reqwest::Client,
	retry_params: RetryParams,
	cached: Mutex<Option<TokenState>>,
}

impl std::fmt::Debug for ServiceAccountBackend {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ServiceAccountBackend").field("client_email", &self.key.client_email).finish()
	}
}

impl ServiceAccountBackend {
	pub fn new(key: ServiceAccountKey, http: reqwest::Client) -> Self {
		Self {
			key,
			scope: "https://www.googleapis.com/auth/drive".to_string(),
			http,
			retry_params: RetryParams::token_refresh(),
			cached: Mutex::new(None),
		}
	}

	fn build_assertion(&self) -> BackendResult<String> {
		let now = now_unix();
		let claims = JwtClaims {
			iss: self.key.client_email.clone(),
			scope: self.scope.clone(),
			aud: self.key.token_uri.clone(),
			iat: now,
			exp: now + 3600,
		};
		let key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())
			.map_err(|e| BackendError::new(ErrorKind::Internal, e.into()))?;
		encode(&Header::new(Algorithm::RS256), &claims, &key)
			.map_err(|e| BackendError::new(ErrorKind::Internal, e.into()))
	}

	async fn exchange(&self) -> BackendResult<TokenState> {
		let assertion = self.build_assertion()?;
		let body = serde_json::json!({
			"grant_type": "urn:ietf:params:oauth:grant-type:jwt-bearer",
			"assertion": assertion,
		});
		let url = self.key.token_uri.clone();
		let http = self.http.clone();
		let response = retry(&self.retry_params, || {
			let http = http.clone();
			let url = url.clone();
			let body = body.clone();
			async move {
				let resp = http.post(&url).json(&body).send().await.map_err(BackendError::from)?;
				if !resp.status().is_success() {
					let status = resp.status();
					let text = resp.text().await.unwrap_or_default();
					return Err(BackendError::new(
						ErrorKind::Unauthorized,
						anyhow::anyhow!("service account token exchange failed: {status} {text}"),
					));
				}
				resp.json::<RefreshResponse>().await.map_err(BackendError::from)
			}
		})
		.await?;
		Ok(TokenState {
			access_token: response.access_token,
			refresh_token: None,
			scope: response.scope,
			expires_in: response.expires_in,
			acquired_at: now_unix(),
		})
	}
}

#[async_trait::async_trait]
impl TokenBackend for ServiceAccountBackend {
	async fn get_token(&self) -> BackendResult<String> {
		let mut cached = self.cached.lock().await;
		let needs_refresh = match cached.as_ref() {
			Some(state) => state.is_expired(now_unix()),
			None => true,
		};
		if needs_refresh {
			*cached = Some(self.exchange().await?);
		}
		Ok(cached.as_ref().unwrap().access_token.clone())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn fresh_state() -> TokenState {
		TokenState {
			access_token: "fresh".into(),
			refresh_token: Some("rt".into()),
			scope: None,
			expires_in: 3600,
			acquired_at: now_unix(),
		}
	}

	fn expired_state() -> TokenState {
		TokenState {
			access_token: "stale".into(),
			refresh_token: Some("rt".into()),
			scope: None,
			expires_in: 1,
			acquired_at: now_unix() - 10_000,
		}
	}

	#[test]
	fn fresh_token_is_not_expired() {
		assert!(!fresh_state().is_expired(now_unix()));
	}

	#[test]
	fn expired_token_is_expired() {
		assert!(expired_state().is_expired(now_unix()));
	}

	#[tokio::test]
	async fn get_token_returns_cached_value_without_refresh_when_fresh() {
		let backend = RefreshTokenBackend::new(
			std::env::temp_dir().join("unused-token-test.json"),
			"https://example.invalid/token",
			"client",
			"secret",
			fresh_state(),
			reqwest::Client::new(),
		);
		let token = backend.get_token().await.unwrap();
		assert_eq!(token, "fresh");
	}
}
