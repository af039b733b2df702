//! Mock Kubernetes API discovery types.

use std::collections::HashMap;

const VERBS: [&str; 7] = ["create", "delete", "get", "list", "patch", "update", "watch"];

/// Discovery mode for the mock server.
#[derive(Debug, Clone, Copy, Default)]
pub enum DiscoveryMode {
	/// Support aggregated discovery (APIGroupDiscoveryList).
	#[default]
	Aggregated,
	/// Return 406 for aggregated discovery, forcing fallback to legacy endpoints.
	Legacy,
}

/// Pre-configured discovery responses.
///
/// Covers the kinds a metrics-server bundle is made of, plus a few common
/// core kinds.
#[derive(Debug)]
pub struct MockDiscovery {
	pub core_resources: Vec<MockApiResource>,
	/// Keyed by group version, e.g. `apps/v1`.
	pub group_resources: HashMap<String, Vec<MockApiResource>>,
}

impl Default for MockDiscovery {
	fn default() -> Self {
		use MockApiResource as R;
		Self {
			core_resources: vec![
				R::namespaced("configmaps", "ConfigMap"),
				R::namespaced("secrets", "Secret"),
				R::namespaced("services", "Service"),
				R::namespaced("serviceaccounts", "ServiceAccount"),
				R::namespaced("pods", "Pod"),
				R::cluster_scoped("namespaces", "Namespace"),
				R::cluster_scoped("nodes", "Node"),
			],
			group_resources: HashMap::from([
				(
					"apps/v1".to_string(),
					vec![
						R::namespaced("deployments", "Deployment"),
						R::namespaced("daemonsets", "DaemonSet"),
					],
				),
				(
					"rbac.authorization.k8s.io/v1".to_string(),
					vec![
						R::cluster_scoped("clusterroles", "ClusterRole"),
						R::cluster_scoped("clusterrolebindings", "ClusterRoleBinding"),
						R::namespaced("roles", "Role"),
						R::namespaced("rolebindings", "RoleBinding"),
					],
				),
				(
					"apiregistration.k8s.io/v1".to_string(),
					vec![R::cluster_scoped("apiservices", "APIService")],
				),
			]),
		}
	}
}

impl MockDiscovery {
	/// Find the resource serving `kind` under `api_version`.
	pub fn resource(&self, api_version: &str, kind: &str) -> Option<&MockApiResource> {
		if api_version.contains('/') {
			self.group_resources
				.get(api_version)?
				.iter()
				.find(|r| r.kind == kind)
		} else {
			self.core_resources.iter().find(|r| r.kind == kind)
		}
	}

	/// Whether `kind` is namespaced, looking in the core group first.
	pub fn is_namespaced(&self, kind: &str) -> Option<bool> {
		self.core_resources
			.iter()
			.chain(self.group_resources.values().flatten())
			.find(|r| r.kind == kind)
			.map(|r| r.namespaced)
	}
}

/// A mock API resource definition.
#[derive(Debug, Clone)]
pub struct MockApiResource {
	/// Plural name, as used in URLs.
	pub name: String,
	pub kind: String,
	pub namespaced: bool,
	pub verbs: Vec<String>,
}

impl MockApiResource {
	fn new(name: &str, kind: &str, namespaced: bool) -> Self {
		Self {
			name: name.to_string(),
			kind: kind.to_string(),
			namespaced,
			verbs: VERBS.iter().map(|v| (*v).to_string()).collect(),
		}
	}

	pub fn namespaced(name: &str, kind: &str) -> Self {
		Self::new(name, kind, true)
	}

	pub fn cluster_scoped(name: &str, kind: &str) -> Self {
		Self::new(name, kind, false)
	}

	pub fn scope(&self) -> &'static str {
		if self.namespaced {
			"Namespaced"
		} else {
			"Cluster"
		}
	}
}
