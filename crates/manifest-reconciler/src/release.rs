//! Upstream release bookkeeping.

use std::{
	fmt,
	hash::{Hash, Hasher},
	path::PathBuf,
	sync::LazyLock,
};

use regex::Regex;
use serde::Serialize;

/// Matches `image: <ref>` lines of a manifest file.
static IMAGE_RE: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^\s+(?:-\s+)?image:\s+(\S+)").expect("valid regex"));

/// A versioned manifest bundle available in storage.
///
/// Equality and hashing use the name only, the size is metadata. Two
/// descriptions of the same release (e.g. one local, one remote) collapse
/// into one set entry.
#[derive(Debug, Clone, Serialize)]
pub struct Release {
	pub name: String,
	pub source_path: PathBuf,
	pub size_bytes: u64,
}

impl Release {
	pub fn new(name: impl Into<String>, source_path: impl Into<PathBuf>, size_bytes: u64) -> Self {
		Self {
			name: name.into(),
			source_path: source_path.into(),
			size_bytes,
		}
	}
}

impl PartialEq for Release {
	fn eq(&self, other: &Self) -> bool {
		self.name == other.name
	}
}

impl Eq for Release {}

impl Hash for Release {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.name.hash(state);
	}
}

impl fmt::Display for Release {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.name)
	}
}

/// Extract every container image reference from manifest text.
pub fn image_references(content: &str) -> impl Iterator<Item = &str> {
	content.lines().filter_map(|line| {
		IMAGE_RE
			.captures(line)
			.and_then(|caps| caps.get(1))
			.map(|m| m.as_str().trim_matches(|c| c == '"' || c == '\''))
	})
}
