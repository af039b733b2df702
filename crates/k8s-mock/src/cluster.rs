//! In-memory cluster implementing [`ClusterApi`].

use std::{
	collections::BTreeMap,
	sync::{Mutex, RwLock},
};

use bon::bon;
use manifest_reconciler::{
	ApiError, ClusterApi, LabelSelector, ManifestResource, ResourceIdentity,
};
use serde_json::Value;
use tracing::trace;

use crate::{
	discovery::MockDiscovery,
	helpers::{merge_json, not_found_message},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
	Get,
	List,
	Apply,
	Create,
	Delete,
}

/// A recorded call against the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
	pub verb: Verb,
	pub kind: String,
	pub namespace: Option<String>,
	/// Unset for lists.
	pub name: Option<String>,
}

/// A failure returned for every matching call.
#[derive(Debug, Clone)]
pub struct Failure {
	verb: Verb,
	kind: String,
	name: Option<String>,
	error: ApiError,
}

impl Failure {
	/// Fail every `verb` call on `kind`.
	pub fn new(verb: Verb, kind: impl Into<String>, error: ApiError) -> Self {
		Self {
			verb,
			kind: kind.into(),
			name: None,
			error,
		}
	}

	/// Restrict the failure to one object name.
	#[must_use]
	pub fn named(mut self, name: impl Into<String>) -> Self {
		self.name = Some(name.into());
		self
	}

	fn matches(&self, call: &Call) -> bool {
		self.verb == call.verb
			&& self.kind == call.kind
			&& self
				.name
				.as_ref()
				.is_none_or(|name| call.name.as_ref() == Some(name))
	}
}

type Store = BTreeMap<ResourceIdentity, Value>;

/// Cluster state kept in memory, keyed by resource identity.
#[derive(Debug)]
pub struct MockCluster {
	namespace: Option<String>,
	discovery: MockDiscovery,
	resources: RwLock<Store>,
	failures: RwLock<Vec<Failure>>,
	calls: Mutex<Vec<Call>>,
}

#[bon]
impl MockCluster {
	#[builder]
	pub fn new(
		/// Raw manifests present in the cluster at start.
		#[builder(default)]
		resources: Vec<Value>,
		#[builder(default)] failures: Vec<Failure>,
		/// Namespace given to namespaced objects that name none. Unset, such
		/// objects are stored without a namespace.
		#[builder(into)]
		namespace: Option<String>,
	) -> Self {
		let mut store = Store::new();
		for manifest in resources {
			if let Some(identity) = identity_of(&manifest) {
				trace!(%identity, "registered resource");
				store.insert(identity, manifest);
			}
		}
		Self {
			namespace,
			discovery: MockDiscovery::default(),
			resources: RwLock::new(store),
			failures: RwLock::new(failures),
			calls: Mutex::new(Vec::new()),
		}
	}
}

fn identity_of(manifest: &Value) -> Option<ResourceIdentity> {
	let kind = manifest.get("kind")?.as_str()?;
	let name = manifest.pointer("/metadata/name")?.as_str()?;
	let namespace = manifest.pointer("/metadata/namespace").and_then(Value::as_str);
	Some(ResourceIdentity::new(kind, namespace, name))
}

fn to_resource(manifest: &Value) -> Result<ManifestResource, ApiError> {
	ManifestResource::from_value(manifest.clone()).map_err(|e| ApiError::Other {
		code: Some(500),
		message: Some(e.to_string()),
	})
}

impl MockCluster {
	/// Add or replace a resource.
	pub fn insert(&self, manifest: Value) {
		if let Some(identity) = identity_of(&manifest) {
			self.resources.write().unwrap().insert(identity, manifest);
		}
	}

	/// Raw stored manifest.
	pub fn manifest(&self, kind: &str, name: &str, namespace: Option<&str>) -> Option<Value> {
		self.resources
			.read()
			.unwrap()
			.get(&ResourceIdentity::new(kind, namespace, name))
			.cloned()
	}

	pub fn contains(&self, kind: &str, name: &str, namespace: Option<&str>) -> bool {
		self.manifest(kind, name, namespace).is_some()
	}

	pub fn identities(&self) -> Vec<ResourceIdentity> {
		self.resources.read().unwrap().keys().cloned().collect()
	}

	pub fn len(&self) -> usize {
		self.resources.read().unwrap().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn fail(&self, failure: Failure) {
		self.failures.write().unwrap().push(failure);
	}

	pub fn clear_failures(&self) {
		self.failures.write().unwrap().clear();
	}

	/// Every call made so far, in order.
	pub fn calls(&self) -> Vec<Call> {
		self.calls.lock().unwrap().clone()
	}

	/// Calls of one verb, in order.
	pub fn calls_of(&self, verb: Verb) -> Vec<Call> {
		self.calls()
			.into_iter()
			.filter(|call| call.verb == verb)
			.collect()
	}

	/// The namespace a call on `kind` lands in.
	fn scoped(&self, kind: &str, namespace: Option<&str>) -> Option<String> {
		namespace
			.map(str::to_string)
			.or_else(|| self.default_namespace(kind))
	}

	/// `resource` as the server stores it, with its namespace filled in.
	fn stored(&self, resource: &ManifestResource) -> (ResourceIdentity, Value) {
		let mut resource = resource.clone();
		resource.metadata.namespace =
			self.scoped(&resource.kind, resource.metadata.namespace.as_deref());
		(resource.identity(), resource.to_value())
	}

	fn record(
		&self,
		verb: Verb,
		kind: &str,
		namespace: Option<&str>,
		name: Option<&str>,
	) -> Result<(), ApiError> {
		let call = Call {
			verb,
			kind: kind.to_string(),
			namespace: namespace.map(str::to_string),
			name: name.map(str::to_string),
		};
		let failure = self
			.failures
			.read()
			.unwrap()
			.iter()
			.find(|f| f.matches(&call))
			.map(|f| f.error.clone());
		self.calls.lock().unwrap().push(call);
		failure.map_or(Ok(()), Err)
	}
}

impl ClusterApi for MockCluster {
	fn get(
		&self,
		kind: &str,
		name: &str,
		namespace: Option<&str>,
	) -> Result<Option<ManifestResource>, ApiError> {
		let namespace = self.scoped(kind, namespace);
		self.record(Verb::Get, kind, namespace.as_deref(), Some(name))?;
		self.manifest(kind, name, namespace.as_deref())
			.as_ref()
			.map(to_resource)
			.transpose()
	}

	fn list(
		&self,
		kind: &str,
		namespace: Option<&str>,
		selector: &LabelSelector,
	) -> Result<Vec<ManifestResource>, ApiError> {
		let namespace = self.scoped(kind, namespace);
		let namespace = namespace.as_deref();
		self.record(Verb::List, kind, namespace, None)?;
		let resources = self.resources.read().unwrap();
		let mut found = Vec::new();
		for (identity, manifest) in resources.iter() {
			if identity.kind() != kind || (namespace.is_some() && identity.namespace() != namespace) {
				continue;
			}
			let resource = to_resource(manifest)?;
			if selector.matches(&resource) {
				found.push(resource);
			}
		}
		Ok(found)
	}

	fn apply(
		&self,
		resource: &ManifestResource,
		field_manager: &str,
		_force: bool,
	) -> Result<ManifestResource, ApiError> {
		let (identity, patch) = self.stored(resource);
		self.record(
			Verb::Apply,
			identity.kind(),
			identity.namespace(),
			Some(identity.name()),
		)?;
		trace!(%identity, field_manager, "apply");

		let mut resources = self.resources.write().unwrap();
		let merged = match resources.remove(&identity) {
			Some(existing) => merge_json(existing, patch),
			None => patch,
		};
		resources.insert(identity, merged.clone());
		to_resource(&merged)
	}

	fn create(&self, resource: &ManifestResource) -> Result<ManifestResource, ApiError> {
		let (identity, manifest) = self.stored(resource);
		self.record(
			Verb::Create,
			identity.kind(),
			identity.namespace(),
			Some(identity.name()),
		)?;

		let mut resources = self.resources.write().unwrap();
		if resources.contains_key(&identity) {
			return Err(ApiError::Other {
				code: Some(409),
				message: Some(format!(
					"{} \"{}\" already exists",
					identity.kind(),
					identity.name()
				)),
			});
		}
		resources.insert(identity, manifest.clone());
		to_resource(&manifest)
	}

	fn delete(&self, kind: &str, name: &str, namespace: Option<&str>) -> Result<(), ApiError> {
		let namespace = self.scoped(kind, namespace);
		self.record(Verb::Delete, kind, namespace.as_deref(), Some(name))?;
		let removed = self
			.resources
			.write()
			.unwrap()
			.remove(&ResourceIdentity::new(kind, namespace, name));
		match removed {
			Some(_) => Ok(()),
			None => Err(ApiError::NotFound {
				message: Some(not_found_message(kind, name)),
			}),
		}
	}

	fn default_namespace(&self, kind: &str) -> Option<String> {
		match self.discovery.is_namespaced(kind) {
			Some(true) => self.namespace.clone(),
			_ => None,
		}
	}
}
