//! Remote-path normalization. Every backend that addresses remote
//! directories by string path (Drive's `PathIndex`, the filesystem
//! destination, OneDrive's item-path lookups) goes through this so that
//! `a/b`, `/a/b/`, and `a\\b` all collapse to the same key.

/// Joins `parts` as forward-slash path segments, stripping empty
/// components and mapping backslashes to forward slashes. The result never
/// has a leading slash or duplicated separators.
pub fn norm_path<I, S>(parts: I) -> String
where
	I: IntoIterator<Item = S>,
	S: AsRef<str>,
{
	let mut segments = Vec::new();
	for part in parts {
		for raw in part.as_ref().replace('\\', "/").split('/') {
			let trimmed = raw.trim();
			if !trimmed.is_empty() {
				segments.push(trimmed.to_string());
			}
		}
	}
	segments.join("/")
}

/// Splits an already-normalized path into `(parent, leaf)`. Used by the
/// remote backends to separate a task's containing directory from its file
/// name: `split_parent("a/b/c.txt") == ("a/b", "c.txt")`, `split_parent("c.txt")
/// == ("", "c.txt")`.
pub fn split_parent(normalized: &str) -> (&str, &str) {
	match normalized.rsplit_once('/') {
		Some((parent, leaf)) => (parent, leaf),
		None => ("", normalized),
	}
}

#[cfg(test)]
mod tests {
	use super::{norm_path, split_parent};

	#[test]
	fn strips_leading_and_trailing_slashes() {
		assert_eq!(norm_path(["/a/b/"]), "a/b");
	}

	#[test]
	fn collapses_duplicate_separators() {
		assert_eq!(norm_path(["a//b///c"]), "a/b/c");
	}

	#[test]
	fn maps_backslashes_to_forward_slashes() {
		assert_eq!(norm_path(["a\\b\\c"]), "a/b/c");
	}

	#[test]
	fn joins_multiple_arguments() {
		assert_eq!(norm_path(["a", "b", "c"]), "a/b/c");
	}

	#[test]
	fn skips_empty_components() {
		assert_eq!(norm_path(["", "a", "", "b", ""]), "a/b");
	}

	// P3: norm_path is idempotent.
	#[test]
	fn is_idempotent() {
		for input in ["/a/b/", "a\\b//c", "", "x"] {
			let once = norm_path([input]);
			let twice = norm_path([once.as_str()]);
			assert_eq!(once, twice);
		}
	}

	// P4: norm_path is associative under concatenation.
	#[test]
	fn is_associative() {
		let a = "foo/";
		let b = "/bar\\baz";
		let c = "qux";
		let direct = norm_path([a, b, c]);
		let nested = norm_path([norm_path([a, b]).as_str(), c]);
		assert_eq!(direct, nested);
	}

	#[test]
	fn split_parent_separates_leaf_from_directory() {
		assert_eq!(split_parent("a/b/c.txt"), ("a/b", "c.txt"));
		assert_eq!(split_parent("c.txt"), ("", "c.txt"));
	}
}
