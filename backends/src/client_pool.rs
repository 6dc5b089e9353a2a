//! §3 `ClientPool` / §9 "client rotation": a cyclic, multi-thread-safe
//! selector over remote clients, skipping any client that's currently
//! sleeping off a rate-limit signal.

use std::{
	sync::{
		atomic::{AtomicUsize, Ordering},
		Mutex,
	},
	time::{Duration, Instant},
};

/// Per-client sleeping-until flag (§4.B `sleep(seconds?)`). Idempotent:
/// calling `sleep` while already sleeping only extends the deadline, never
/// shortens it.
#[derive(Default)]
pub struct SleepState {
	until: Mutex<Option<Instant>>,
}

impl SleepState {
	pub fn sleep(&self, seconds: u64) {
		let candidate = Instant::now() + Duration::from_secs(seconds);
		let mut guard = self.until.lock().unwrap();
		if guard.map_or(true, |until| candidate > until) {
			*guard = Some(candidate);
		}
	}

	pub fn is_sleeping(&self) -> bool {
		match *self.until.lock().unwrap() {
			Some(until) => Instant::now() < until,
			None => false,
		}
	}
}

pub trait SleepAware {
	fn sleep_state(&self) -> &SleepState;

	fn sleep(&self, seconds: u64) {
		self.sleep_state().sleep(seconds);
	}

	fn is_sleeping(&self) -> bool {
		self.sleep_state().is_sleeping()
	}
}

/// Ordered collection of clients over which load is balanced; selection is
/// round-robin over non-sleeping clients. If every client is sleeping,
/// `acquire` polls until one wakes rather than returning an error — the
/// caller is expected to be a background worker, not a latency-sensitive
/// request path.
pub struct ClientPool<C> {
	clients: Vec<C>,
	next: AtomicUsize,
}

impl<C: SleepAware + Clone> ClientPool<C> {
	pub fn new(clients: Vec<C>) -> Self {
		assert!(!clients.is_empty(), "ClientPool requires at least one client");
		Self { clients, next: AtomicUsize::new(0) }
	}

	pub fn len(&self) -> usize {
		self.clients.len()
	}

	pub fn is_empty(&self) -> bool {
		self.clients.is_empty()
	}

	pub async fn acquire(&self) -> C {
		loop {
			for _ in 0..self.clients.len() {
				let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.clients.len();
				let client = &self.clients[idx];
				if !client.is_sleeping() {
					return client.clone();
				}
			}
			tokio::time::sleep(Duration::from_millis(200)).await;
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use super::*;

	#[derive(Clone)]
	struct MockClient {
		id: u32,
		sleep_state: Arc<SleepState>,
	}

	impl SleepAware for MockClient {
		fn sleep_state(&self) -> &SleepState {
			&self.sleep_state
		}
	}

	fn mock(id: u32) -> MockClient {
		MockClient { id, sleep_state: Arc::new(SleepState::default()) }
	}

	#[tokio::test]
	async fn round_robins_over_clients() {
		let pool = ClientPool::new(vec![mock(0), mock(1), mock(2)]);
		let mut seen = Vec::new();
		for _ in 0..6 {
			seen.push(pool.acquire().await.id);
		}
		assert_eq!(seen, vec![0, 1, 2, 0, 1, 2]);
	}

	#[tokio::test]
	async fn skips_sleeping_clients() {
		let sleepy = mock(0);
		sleepy.sleep(60);
		let awake = mock(1);
		let pool = ClientPool::new(vec![sleepy, awake]);
		for _ in 0..4 {
			assert_eq!(pool.acquire().await.id, 1);
		}
	}

	#[test]
	fn sleep_extends_but_never_shortens_deadline() {
		let state = SleepState::default();
		state.sleep(60);
		assert!(state.is_sleeping());
		state.sleep(1);
		// Still sleeping ~60s later wouldn't be testable without mocking
		// the clock; this asserts the state machine doesn't panic and
		// stays sleeping immediately after a shorter call.
		assert!(state.is_sleeping());
	}
}
