//! In-memory representation of a declared or live cluster object.

use std::{
	cmp::Ordering,
	collections::BTreeMap,
	hash::{Hash, Hasher},
};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::identity::{NamespaceKind, ResourceIdentity};

/// Object metadata fields the reconciler reads or writes.
///
/// Everything else (annotations, uid, managedFields, ...) is carried
/// through untouched in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
	#[serde(default)]
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub namespace: Option<String>,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub labels: BTreeMap<String, String>,
	#[serde(flatten)]
	pub extra: Map<String, Value>,
}

/// A single entry of `status.conditions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
	#[serde(rename = "type")]
	pub type_: String,
	pub status: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
}

impl Condition {
	pub fn is_true(&self) -> bool {
		self.status == "True"
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceStatus {
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub conditions: Vec<Condition>,
	#[serde(flatten)]
	pub extra: Map<String, Value>,
}

/// One Kubernetes object.
///
/// Equality, ordering and hashing go through [`ResourceIdentity`] only, so
/// sets of resources behave as sets of identities.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestResource {
	#[serde(default)]
	pub api_version: String,
	pub kind: String,
	#[serde(default)]
	pub metadata: ObjectMeta,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub spec: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub status: Option<ResourceStatus>,
	/// Remaining top-level fields (`data`, `rules`, `subjects`, `roleRef`, ...).
	#[serde(flatten)]
	pub extra: Map<String, Value>,
}

impl ManifestResource {
	/// Convert a parsed document into a resource.
	pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
		serde_json::from_value(value)
	}

	/// Convert back into the document sent to the cluster.
	pub fn to_value(&self) -> Value {
		// Serializing plain maps and strings can't fail.
		serde_json::to_value(self).unwrap_or(Value::Null)
	}

	pub fn identity(&self) -> ResourceIdentity {
		ResourceIdentity::new(
			self.kind.clone(),
			self.metadata.namespace.clone(),
			self.metadata.name.clone(),
		)
	}

	pub fn group(&self) -> NamespaceKind {
		NamespaceKind::new(self.kind.clone(), self.metadata.namespace.clone())
	}

	/// Conditions reported by the cluster, empty if there is no status.
	pub fn conditions(&self) -> &[Condition] {
		self.status.as_ref().map_or(&[], |s| s.conditions.as_slice())
	}

	/// A resource is ready iff every reported condition is `True`.
	pub fn is_ready(&self) -> bool {
		self.conditions().iter().all(Condition::is_true)
	}

	pub fn has_label(&self, key: &str, value: &str) -> bool {
		self.metadata.labels.get(key).is_some_and(|v| v == value)
	}
}

impl PartialEq for ManifestResource {
	fn eq(&self, other: &Self) -> bool {
		self.identity() == other.identity()
	}
}

impl Eq for ManifestResource {}

impl Hash for ManifestResource {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.identity().hash(state);
	}
}

impl PartialOrd for ManifestResource {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for ManifestResource {
	fn cmp(&self, other: &Self) -> Ordering {
		self.identity().cmp(&other.identity())
	}
}
