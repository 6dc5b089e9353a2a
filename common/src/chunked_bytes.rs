//! §4.D: wraps one large chunk into a lazy sequence of `step_size`
//! sub-slices, for progress reporting and for bounding the size of a single
//! write syscall / network send. Concatenating every yielded step
//! reproduces the original buffer exactly.

use bytes::Bytes;

pub struct SteppedBytes {
	buffer: Bytes,
	step_size: usize,
	offset: usize,
}

impl SteppedBytes {
	pub fn new(buffer: Bytes, step_size: usize) -> Self {
		assert!(step_size > 0, "step_size must be positive");
		Self { buffer, step_size, offset: 0 }
	}

	/// Total length of the wrapped buffer, so callers (e.g. the HTTP
	/// client layer) can set `Content-Length` without buffering.
	pub fn total_len(&self) -> usize {
		self.buffer.len()
	}
}

impl Iterator for SteppedBytes {
	type Item = Bytes;

	fn next(&mut self) -> Option<Bytes> {
		if self.offset >= self.buffer.len() {
			return None;
		}
		let end = (self.offset + self.step_size).min(self.buffer.len());
		let step = self.buffer.slice(self.offset..end);
		self.offset = end;
		Some(step)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn concatenation_of_steps_equals_original_buffer() {
		let original = Bytes::from_static(b"the quick brown fox jumps over the lazy dog");
		let stepped = SteppedBytes::new(original.clone(), 7);
		let mut rebuilt = Vec::new();
		for step in stepped {
			rebuilt.extend_from_slice(&step);
		}
		assert_eq!(Bytes::from(rebuilt), original);
	}

	#[test]
	fn reports_total_len_up_front() {
		let original = Bytes::from_static(b"0123456789");
		let stepped = SteppedBytes::new(original, 3);
		assert_eq!(stepped.total_len(), 10);
	}

	#[test]
	fn single_step_when_step_size_exceeds_buffer() {
		let original = Bytes::from_static(b"short");
		let stepped = SteppedBytes::new(original.clone(), 4096);
		let steps: Vec<_> = stepped.collect();
		assert_eq!(steps.len(), 1);
		assert_eq!(steps[0], original);
	}

	#[test]
	fn empty_buffer_yields_no_steps() {
		let stepped = SteppedBytes::new(Bytes::new(), 10);
		assert_eq!(stepped.count(), 0);
	}
}
