//! The remote cluster API, as a capability.
//!
//! The reconciler never talks to Kubernetes directly; it is handed something
//! implementing [`ClusterApi`]. Calls are blocking and independent, there is
//! no cross-object transaction.

use std::{collections::BTreeMap, fmt};

use thiserror::Error;

use crate::resource::ManifestResource;

/// Failure returned by the remote API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
	#[error("{}", describe(.message.as_deref(), "not found"))]
	NotFound { message: Option<String> },

	#[error("{}", describe(.message.as_deref(), "unauthorized"))]
	Unauthorized { message: Option<String> },

	#[error("{}", describe(.message.as_deref(), "remote API call failed"))]
	Other {
		code: Option<u16>,
		message: Option<String>,
	},
}

fn describe(message: Option<&str>, fallback: &str) -> String {
	message.unwrap_or(fallback).to_string()
}

impl ApiError {
	/// Classify an HTTP status code the way the API server reports it.
	pub fn from_status(code: u16, message: Option<String>) -> Self {
		match code {
			404 => Self::NotFound { message },
			401 | 403 => Self::Unauthorized { message },
			code => Self::Other {
				code: Some(code),
				message,
			},
		}
	}

	/// Message text reported by the server, if any.
	pub fn message(&self) -> Option<&str> {
		match self {
			Self::NotFound { message }
			| Self::Unauthorized { message }
			| Self::Other { message, .. } => message.as_deref(),
		}
	}
}

/// Equality-based label selector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
	labels: BTreeMap<String, String>,
}

impl LabelSelector {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.labels.insert(key.into(), value.into());
		self
	}

	pub fn matches(&self, resource: &ManifestResource) -> bool {
		self.labels
			.iter()
			.all(|(key, value)| resource.has_label(key, value))
	}

	pub fn is_empty(&self) -> bool {
		self.labels.is_empty()
	}
}

impl fmt::Display for LabelSelector {
	/// `key=value,key=value`, the form the API server accepts.
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut first = true;
		for (key, value) in &self.labels {
			if !first {
				f.write_str(",")?;
			}
			first = false;
			write!(f, "{key}={value}")?;
		}
		Ok(())
	}
}

/// Operations the reconciler needs from a cluster.
pub trait ClusterApi {
	/// Point lookup. Absence is `Ok(None)`, not an error.
	fn get(
		&self,
		kind: &str,
		name: &str,
		namespace: Option<&str>,
	) -> Result<Option<ManifestResource>, ApiError>;

	/// List resources of `kind`, optionally scoped to a namespace and
	/// filtered by labels.
	fn list(
		&self,
		kind: &str,
		namespace: Option<&str>,
		selector: &LabelSelector,
	) -> Result<Vec<ManifestResource>, ApiError>;

	/// Create-or-update.
	fn apply(
		&self,
		resource: &ManifestResource,
		field_manager: &str,
		force: bool,
	) -> Result<ManifestResource, ApiError>;

	fn create(&self, resource: &ManifestResource) -> Result<ManifestResource, ApiError>;

	fn delete(&self, kind: &str, name: &str, namespace: Option<&str>) -> Result<(), ApiError>;

	/// Namespace the cluster places a `kind` object in when it names none.
	/// `None` for cluster-scoped or unknown kinds.
	fn default_namespace(&self, _kind: &str) -> Option<String> {
		None
	}
}

impl<T: ClusterApi + ?Sized> ClusterApi for &T {
	fn get(
		&self,
		kind: &str,
		name: &str,
		namespace: Option<&str>,
	) -> Result<Option<ManifestResource>, ApiError> {
		(**self).get(kind, name, namespace)
	}

	fn list(
		&self,
		kind: &str,
		namespace: Option<&str>,
		selector: &LabelSelector,
	) -> Result<Vec<ManifestResource>, ApiError> {
		(**self).list(kind, namespace, selector)
	}

	fn apply(
		&self,
		resource: &ManifestResource,
		field_manager: &str,
		force: bool,
	) -> Result<ManifestResource, ApiError> {
		(**self).apply(resource, field_manager, force)
	}

	fn create(&self, resource: &ManifestResource) -> Result<ManifestResource, ApiError> {
		(**self).create(resource)
	}

	fn delete(&self, kind: &str, name: &str, namespace: Option<&str>) -> Result<(), ApiError> {
		(**self).delete(kind, name, namespace)
	}

	fn default_namespace(&self, kind: &str) -> Option<String> {
		(**self).default_namespace(kind)
	}
}
