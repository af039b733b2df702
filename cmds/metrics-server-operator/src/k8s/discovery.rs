//! Kubernetes API resource discovery and caching.
//!
//! Manifests name their `apiVersion`, but reconciliation lookups only carry a
//! kind, so the cache answers both: exact `apiVersion`/`kind` lookups over all
//! served versions, and kind-only lookups resolved to the recommended version.

use std::collections::HashMap;

use kube::{
	core::GroupVersionKind,
	discovery::{ApiResource, Scope},
	Client, Discovery,
};
use thiserror::Error;
use tracing::instrument;

use super::ResourceScope;

#[derive(Debug, Error)]
pub enum DiscoveryError {
	#[error("full API discovery failed")]
	FullDiscovery(#[source] kube::Error),
}

/// Create a GroupVersionKind from an apiVersion string and kind.
pub fn gvk_from_api_version(api_version: &str, kind: &str) -> GroupVersionKind {
	let (group, version) = api_version.split_once('/').unwrap_or(("", api_version));
	GroupVersionKind::gvk(group, version, kind)
}

/// Discovered API resource with its scope.
#[derive(Debug, Clone)]
pub struct DiscoveredResource {
	/// The kube ApiResource for making API calls.
	pub api_resource: ApiResource,
	pub scope: ResourceScope,
}

/// Cached API resource discovery results.
#[derive(Debug, Clone, Default)]
pub struct ApiResourceCache {
	resources: HashMap<GroupVersionKind, DiscoveredResource>,
	/// Kind to its recommended group version.
	kinds: HashMap<String, GroupVersionKind>,
}

impl ApiResourceCache {
	/// Build the cache by querying the cluster's discovery API.
	///
	/// Uses the Aggregated Discovery API (K8s 1.26+) which requires only 2 API
	/// calls, falling back to full discovery on older clusters.
	#[instrument(skip(client))]
	pub async fn build(client: &Client) -> Result<Self, DiscoveryError> {
		match Discovery::new(client.clone()).run_aggregated().await {
			Ok(discovery) => {
				tracing::debug!("using aggregated discovery");
				Ok(Self::from_discovery(&discovery))
			}
			Err(e) => {
				tracing::debug!(error = %e, "aggregated discovery not available, using full discovery");
				let discovery = Discovery::new(client.clone())
					.run()
					.await
					.map_err(DiscoveryError::FullDiscovery)?;
				Ok(Self::from_discovery(&discovery))
			}
		}
	}

	fn from_discovery(discovery: &Discovery) -> Self {
		let mut cache = Self::default();
		for group in discovery.groups() {
			for version in group.versions() {
				for (ar, caps) in group.versioned_resources(version) {
					let scope = match caps.scope {
						Scope::Namespaced => ResourceScope::Namespaced,
						Scope::Cluster => ResourceScope::ClusterWide,
					};
					cache.insert(ar, scope, false);
				}
			}
			for (ar, _) in group.recommended_resources() {
				let gvk = GroupVersionKind::gvk(&ar.group, &ar.version, &ar.kind);
				// Core kinds shadow same-named kinds of other groups (e.g. Event).
				let core = ar.group.is_empty();
				cache
					.kinds
					.entry(ar.kind.clone())
					.and_modify(|existing| {
						if core {
							*existing = gvk.clone();
						}
					})
					.or_insert(gvk);
			}
		}
		cache
	}

	/// Register a resource. `recommended` also makes it the kind's default.
	pub fn insert(&mut self, api_resource: ApiResource, scope: ResourceScope, recommended: bool) {
		let gvk = GroupVersionKind::gvk(
			&api_resource.group,
			&api_resource.version,
			&api_resource.kind,
		);
		if recommended {
			self.kinds.insert(api_resource.kind.clone(), gvk.clone());
		}
		self.resources.insert(
			gvk,
			DiscoveredResource {
				api_resource,
				scope,
			},
		);
	}

	pub fn lookup(&self, gvk: &GroupVersionKind) -> Option<&DiscoveredResource> {
		self.resources.get(gvk)
	}

	/// Look up a kind in its recommended version.
	pub fn lookup_kind(&self, kind: &str) -> Option<&DiscoveredResource> {
		self.resources.get(self.kinds.get(kind)?)
	}

	pub fn len(&self) -> usize {
		self.resources.len()
	}

	pub fn is_empty(&self) -> bool {
		self.resources.is_empty()
	}
}
