//! A hierarchical cancellation flag. The engine holds the root; the
//! producer thread, dispatcher, and every spawned worker hold a child so
//! that killing the root tears down the whole pipeline without needing a
//! broadcast channel per consumer.

use std::sync::{
	atomic::{AtomicBool, Ordering},
	Arc, Mutex, Weak,
};

use tracing::debug;

#[derive(Clone, Default)]
pub struct CancelSignal {
	inner: Arc<Inner>,
}

struct Inner {
	alive: AtomicBool,
	children: Mutex<Vec<Weak<Inner>>>,
}

impl Default for Inner {
	fn default() -> Self {
		Self { alive: AtomicBool::new(true), children: Mutex::default() }
	}
}

fn garbage_collect(children: &mut Vec<Weak<Inner>>) {
	children.retain(|child| child.strong_count() > 0);
}

impl CancelSignal {
	pub fn is_alive(&self) -> bool {
		self.inner.alive.load(Ordering::Relaxed)
	}

	pub fn is_cancelled(&self) -> bool {
		!self.is_alive()
	}

	pub fn cancel(&self) {
		self.inner.cancel();
	}

	/// Creates a child signal. If the parent is already cancelled, the
	/// child is born cancelled too.
	pub fn child(&self) -> CancelSignal {
		let mut lock = self.inner.children.lock().unwrap();
		let child_inner = Arc::new(Inner { alive: AtomicBool::new(self.is_alive()), ..Default::default() });
		garbage_collect(&mut lock);
		lock.push(Arc::downgrade(&child_inner));
		CancelSignal { inner: child_inner }
	}
}

impl Inner {
	fn cancel(&self) {
		debug!("cancel-signal-tripped");
		self.alive.store(false, Ordering::Relaxed);
		let mut lock = self.children.lock().unwrap();
		for weak in lock.drain(..) {
			if let Some(inner) = weak.upgrade() {
				inner.cancel();
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::CancelSignal;

	#[test]
	fn starts_alive() {
		let sig = CancelSignal::default();
		assert!(sig.is_alive());
		assert!(!sig.is_cancelled());
	}

	#[test]
	fn cancel_is_idempotent() {
		let sig = CancelSignal::default();
		sig.cancel();
		sig.cancel();
		assert!(sig.is_cancelled());
	}

	#[test]
	fn cancel_propagates_to_children_and_grandchildren() {
		let root = CancelSignal::default();
		let child = root.child();
		let grandchild = child.child();
		root.cancel();
		assert!(child.is_cancelled());
		assert!(grandchild.is_cancelled());
	}

	#[test]
	fn child_cancellation_does_not_affect_parent() {
		let root = CancelSignal::default();
		let child = root.child();
		child.cancel();
		assert!(root.is_alive());
		assert!(child.is_cancelled());
	}
}
