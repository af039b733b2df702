//! [`ClusterApi`] backed by a live Kubernetes API server.
//!
//! Reconciliation is synchronous; every call is driven to completion on a
//! runtime owned by the cluster handle.

use kube::{
	api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams},
	config::Kubeconfig,
};
use manifest_reconciler::{ApiError, ClusterApi, LabelSelector, ManifestResource};
use serde_json::Value;
use thiserror::Error;
use tokio::runtime::Runtime;
use tracing::instrument;

use super::{
	client::{ClusterConnection, ConnectOptions, ConnectionError},
	discovery::{gvk_from_api_version, ApiResourceCache, DiscoveredResource, DiscoveryError},
	ResourceScope,
};

#[derive(Debug, Error)]
pub enum KubeClusterError {
	#[error("creating tokio runtime")]
	Runtime(#[source] std::io::Error),

	#[error("connecting to cluster")]
	Connection(#[from] ConnectionError),

	#[error("building API resource cache")]
	Discovery(#[from] DiscoveryError),
}

/// Map a kube client failure onto the reconciler's error taxonomy.
pub fn api_error(err: kube::Error) -> ApiError {
	match err {
		kube::Error::Api(ref status) => {
			let message = Some(status.message.clone()).filter(|m| !m.is_empty());
			ApiError::from_status(status.code, message)
		}
		other => ApiError::Other {
			code: None,
			message: Some(other.to_string()),
		},
	}
}

fn conversion_error(err: serde_json::Error) -> ApiError {
	ApiError::Other {
		code: None,
		message: Some(format!("converting object: {err}")),
	}
}

pub struct KubeCluster {
	runtime: Runtime,
	connection: ClusterConnection,
	resources: ApiResourceCache,
}

impl std::fmt::Debug for KubeCluster {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("KubeCluster")
			.field("connection", &self.connection)
			.field("resources", &self.resources.len())
			.finish_non_exhaustive()
	}
}

fn runtime() -> Result<Runtime, KubeClusterError> {
	tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()
		.map_err(KubeClusterError::Runtime)
}

impl KubeCluster {
	/// Connect to the cluster described by the default kubeconfig or the
	/// in-cluster environment.
	pub fn connect(options: &ConnectOptions) -> Result<Self, KubeClusterError> {
		let runtime = runtime()?;
		let connection = runtime.block_on(ClusterConnection::connect(options))?;
		Self::with_connection(runtime, connection)
	}

	pub fn from_kubeconfig(
		kubeconfig: Kubeconfig,
		options: &ConnectOptions,
	) -> Result<Self, KubeClusterError> {
		let runtime = runtime()?;
		let connection =
			runtime.block_on(ClusterConnection::from_kubeconfig(kubeconfig, options))?;
		Self::with_connection(runtime, connection)
	}

	fn with_connection(
		runtime: Runtime,
		connection: ClusterConnection,
	) -> Result<Self, KubeClusterError> {
		let resources = runtime.block_on(ApiResourceCache::build(connection.client()))?;
		Ok(Self {
			runtime,
			connection,
			resources,
		})
	}

	pub fn connection(&self) -> &ClusterConnection {
		&self.connection
	}

	fn resolve_kind(&self, kind: &str) -> Result<&DiscoveredResource, ApiError> {
		self.resources
			.lookup_kind(kind)
			.ok_or_else(|| unknown_kind(kind))
	}

	fn resolve_resource(&self, resource: &ManifestResource) -> Result<&DiscoveredResource, ApiError> {
		if resource.api_version.is_empty() {
			return self.resolve_kind(&resource.kind);
		}
		self.resources
			.lookup(&gvk_from_api_version(&resource.api_version, &resource.kind))
			.ok_or_else(|| unknown_kind(&resource.kind))
	}

	/// Dynamic API for a resource type. Namespaced types without a namespace
	/// use the default one.
	fn dynamic_api(
		&self,
		discovered: &DiscoveredResource,
		namespace: Option<&str>,
	) -> Api<DynamicObject> {
		let client = self.connection.client().clone();
		match discovered.scope {
			ResourceScope::Namespaced => Api::namespaced_with(
				client,
				namespace.unwrap_or_else(|| self.connection.default_namespace()),
				&discovered.api_resource,
			),
			ResourceScope::ClusterWide => Api::all_with(client, &discovered.api_resource),
		}
	}
}

fn unknown_kind(kind: &str) -> ApiError {
	ApiError::NotFound {
		message: Some(format!("resource kind {kind} not found in API discovery")),
	}
}

/// Convert a served object, filling in the type that list items omit.
fn to_manifest(object: DynamicObject, discovered: &DiscoveredResource) -> Result<ManifestResource, ApiError> {
	let mut value = serde_json::to_value(object).map_err(conversion_error)?;
	if let Value::Object(map) = &mut value {
		let ar = &discovered.api_resource;
		map.entry("apiVersion")
			.or_insert_with(|| Value::String(ar.api_version.clone()));
		map.entry("kind")
			.or_insert_with(|| Value::String(ar.kind.clone()));
	}
	ManifestResource::from_value(value).map_err(conversion_error)
}

fn to_dynamic(resource: &ManifestResource) -> Result<DynamicObject, ApiError> {
	serde_json::from_value(resource.to_value()).map_err(conversion_error)
}

impl ClusterApi for KubeCluster {
	#[instrument(skip(self))]
	fn get(
		&self,
		kind: &str,
		name: &str,
		namespace: Option<&str>,
	) -> Result<Option<ManifestResource>, ApiError> {
		let discovered = self.resolve_kind(kind)?;
		let api = self.dynamic_api(discovered, namespace);
		let found = self
			.runtime
			.block_on(api.get_opt(name))
			.map_err(api_error)?;
		found.map(|o| to_manifest(o, discovered)).transpose()
	}

	#[instrument(skip(self), fields(selector = %selector))]
	fn list(
		&self,
		kind: &str,
		namespace: Option<&str>,
		selector: &LabelSelector,
	) -> Result<Vec<ManifestResource>, ApiError> {
		let discovered = self.resolve_kind(kind)?;
		let api = self.dynamic_api(discovered, namespace);
		let params = if selector.is_empty() {
			ListParams::default()
		} else {
			ListParams::default().labels(&selector.to_string())
		};
		let list = self
			.runtime
			.block_on(api.list(&params))
			.map_err(api_error)?;
		list.items
			.into_iter()
			.map(|o| to_manifest(o, discovered))
			.collect()
	}

	#[instrument(skip(self, resource), fields(resource = %resource.identity()))]
	fn apply(
		&self,
		resource: &ManifestResource,
		field_manager: &str,
		force: bool,
	) -> Result<ManifestResource, ApiError> {
		let discovered = self.resolve_resource(resource)?;
		let api = self.dynamic_api(discovered, resource.metadata.namespace.as_deref());
		let params = PatchParams {
			field_manager: Some(field_manager.to_string()),
			force,
			..Default::default()
		};
		let applied = self
			.runtime
			.block_on(api.patch(
				&resource.metadata.name,
				&params,
				&Patch::Apply(resource.to_value()),
			))
			.map_err(api_error)?;
		to_manifest(applied, discovered)
	}

	#[instrument(skip(self, resource), fields(resource = %resource.identity()))]
	fn create(&self, resource: &ManifestResource) -> Result<ManifestResource, ApiError> {
		let discovered = self.resolve_resource(resource)?;
		let api = self.dynamic_api(discovered, resource.metadata.namespace.as_deref());
		let created = self
			.runtime
			.block_on(api.create(&PostParams::default(), &to_dynamic(resource)?))
			.map_err(api_error)?;
		to_manifest(created, discovered)
	}

	#[instrument(skip(self))]
	fn delete(&self, kind: &str, name: &str, namespace: Option<&str>) -> Result<(), ApiError> {
		let discovered = self.resolve_kind(kind)?;
		let api = self.dynamic_api(discovered, namespace);
		self.runtime
			.block_on(api.delete(name, &DeleteParams::default()))
			.map_err(api_error)?;
		Ok(())
	}

	fn default_namespace(&self, kind: &str) -> Option<String> {
		let discovered = self.resources.lookup_kind(kind)?;
		match discovered.scope {
			ResourceScope::Namespaced => Some(self.connection.default_namespace().to_string()),
			ResourceScope::ClusterWide => None,
		}
	}
}
