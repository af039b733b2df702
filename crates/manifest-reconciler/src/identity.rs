//! Resource identity and grouping keys.
//!
//! Everything the reconciler compares is compared through these keys, never
//! through the full resource body.

use std::fmt;

use serde::Serialize;

/// Canonical identity of a cluster resource.
///
/// Two resources are the same resource iff their identities are equal,
/// regardless of spec, status or labels. Cluster-scoped resources have no
/// namespace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ResourceIdentity {
	kind: String,
	namespace: Option<String>,
	name: String,
}

impl ResourceIdentity {
	pub fn new(
		kind: impl Into<String>,
		namespace: Option<impl Into<String>>,
		name: impl Into<String>,
	) -> Self {
		Self {
			kind: kind.into(),
			namespace: namespace.map(Into::into),
			name: name.into(),
		}
	}

	pub fn kind(&self) -> &str {
		&self.kind
	}

	pub fn namespace(&self) -> Option<&str> {
		self.namespace.as_deref()
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// The `(kind, namespace)` bucket this identity belongs to.
	pub fn group(&self) -> NamespaceKind {
		NamespaceKind::new(self.kind.clone(), self.namespace.clone())
	}
}

impl fmt::Display for ResourceIdentity {
	/// `kind/namespace/name`, with the namespace segment omitted for
	/// cluster-scoped resources.
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.namespace {
			Some(ns) => write!(f, "{}/{}/{}", self.kind, ns, self.name),
			None => write!(f, "{}/{}", self.kind, self.name),
		}
	}
}

/// Grouping key used to bucket resources for bulk diffing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NamespaceKind {
	pub kind: String,
	pub namespace: Option<String>,
}

impl NamespaceKind {
	pub fn new(kind: impl Into<String>, namespace: Option<String>) -> Self {
		Self {
			kind: kind.into(),
			namespace,
		}
	}

	/// Case-insensitive kind match, as used by resource filters.
	pub fn matches_kind(&self, filter: &str) -> bool {
		self.kind.eq_ignore_ascii_case(filter)
	}
}

impl fmt::Display for NamespaceKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.namespace {
			Some(ns) => write!(f, "{}/{}", self.kind, ns),
			None => write!(f, "{}", self.kind),
		}
	}
}
