//! Exponential backoff with full jitter, shared by every component that
//! issues outbound HTTP calls: directory listings, token refreshes, and the
//! chunk-upload driver.

use std::{fmt::Debug, time::Duration};

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, warn};

const DEFAULT_MAX_ATTEMPTS: usize = 8;
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(250);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(20);

/// Implemented by any error that knows whether retrying the operation that
/// produced it is worth attempting again.
pub trait Retryable {
	fn is_retryable(&self) -> bool {
		false
	}
}

#[derive(Debug, Clone, Copy)]
pub struct RetryParams {
	pub base_delay: Duration,
	pub max_delay: Duration,
	pub max_attempts: usize,
}

impl Default for RetryParams {
	fn default() -> Self {
		Self {
			base_delay: DEFAULT_BASE_DELAY,
			max_delay: DEFAULT_MAX_DELAY,
			max_attempts: DEFAULT_MAX_ATTEMPTS,
		}
	}
}

impl RetryParams {
	/// Computes the delay before the next attempt. Exponential backoff with
	/// full jitter; see <https://aws.amazon.com/blogs/architecture/exponential-backoff-and-jitter/>.
	///
	/// `num_attempts` is the number of attempts made so far, not retries.
	///
	/// # Panics
	/// Panics if `num_attempts` is zero.
	pub fn compute_delay(&self, num_attempts: usize) -> Duration {
		assert!(num_attempts > 0, "num_attempts should be greater than zero");
		let delay_ms = self.base_delay.as_millis() as u64 * 2u64.saturating_pow(num_attempts as u32 - 1);
		let ceil_delay_ms = delay_ms.min(self.max_delay.as_millis() as u64);
		let jittered_delay_ms = rand::thread_rng().gen_range(0..=ceil_delay_ms.max(1));
		Duration::from_millis(jittered_delay_ms)
	}

	#[cfg(any(test, feature = "testsuite"))]
	pub fn for_test() -> Self {
		Self { base_delay: Duration::from_millis(1), max_delay: Duration::from_millis(4), max_attempts: 4 }
	}

	/// Directory-listing retries: §9 decides this replaces the
	/// retry-the-whole-subtree-forever behavior of the original.
	pub fn directory_listing() -> Self {
		Self { base_delay: Duration::from_millis(500), max_delay: Duration::from_secs(30), max_attempts: 6 }
	}

	/// Token refresh calls: a handful of attempts, short ceiling.
	pub fn token_refresh() -> Self {
		Self { base_delay: Duration::from_millis(200), max_delay: Duration::from_secs(5), max_attempts: 3 }
	}
}

#[async_trait]
pub trait MockableSleep: Send + Sync {
	async fn sleep(&self, duration: Duration);
}

pub struct TokioSleep;

#[async_trait]
impl MockableSleep for TokioSleep {
	async fn sleep(&self, duration: Duration) {
		tokio::time::sleep(duration).await;
	}
}

pub async fn retry_with_mockable_sleep<U, E, Fut>(
	retry_params: &RetryParams,
	f: impl Fn() -> Fut,
	mockable_sleep: impl MockableSleep,
) -> Result<U, E>
where
	Fut: std::future::Future<Output = Result<U, E>>,
	E: Retryable + Debug + 'static,
{
	let mut num_attempts = 0;
	loop {
		let response = f().await;
		let error = match response {
			Ok(response) => return Ok(response),
			Err(error) => error,
		};
		if !error.is_retryable() {
			return Err(error);
		}
		num_attempts += 1;
		if num_attempts >= retry_params.max_attempts {
			warn!(num_attempts, "request failed, giving up");
			return Err(error);
		}
		let delay = retry_params.compute_delay(num_attempts);
		debug!(num_attempts, delay_ms = %delay.as_millis(), error = ?error, "request failed, retrying");
		mockable_sleep.sleep(delay).await;
	}
}

pub async fn retry<U, E, Fut>(retry_params: &RetryParams, f: impl Fn() -> Fut) -> Result<U, E>
where
	Fut: std::future::Future<Output = Result<U, E>>,
	E: Retryable + Debug + 'static,
{
	retry_with_mockable_sleep(retry_params, f, TokioSleep).await
}

#[cfg(test)]
mod tests {
	use std::sync::RwLock;

	use futures::future::ready;

	use super::*;

	struct NoopSleep;

	#[async_trait]
	impl MockableSleep for NoopSleep {
		async fn sleep(&self, _duration: Duration) {}
	}

	#[derive(Debug, Eq, PartialEq)]
	enum MockError {
		Transient(u32),
		Permanent(u32),
	}

	impl Retryable for MockError {
		fn is_retryable(&self) -> bool {
			matches!(self, MockError::Transient(_))
		}
	}

	async fn simulate(values: Vec<Result<(), MockError>>) -> Result<(), MockError> {
		let it = RwLock::new(values.into_iter());
		retry_with_mockable_sleep(&RetryParams::for_test(), || ready(it.write().unwrap().next().unwrap()), NoopSleep)
			.await
	}

	#[tokio::test]
	async fn accepts_ok_immediately() {
		assert_eq!(simulate(vec![Ok(())]).await, Ok(()));
	}

	#[tokio::test]
	async fn retries_transient_then_succeeds() {
		assert_eq!(simulate(vec![Err(MockError::Transient(1)), Ok(())]).await, Ok(()));
	}

	#[tokio::test]
	async fn stops_immediately_on_permanent_error() {
		assert_eq!(simulate(vec![Err(MockError::Permanent(1)), Ok(())]).await, Err(MockError::Permanent(1)));
	}

	#[tokio::test]
	async fn gives_up_after_max_attempts() {
		let params = RetryParams::for_test();
		let sequence: Vec<_> =
			(0..params.max_attempts as u32).map(MockError::Transient).map(Err).chain(Some(Ok(()))).collect();
		let last_error = sequence.len() - 2;
		let result = simulate(sequence).await;
		assert_eq!(result, Err(MockError::Transient(last_error as u32)));
	}
}
