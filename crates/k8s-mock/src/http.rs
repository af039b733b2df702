//! HTTP-based mock Kubernetes server using wiremock.
//!
//! This provides a real HTTP server that can be used with actual kubeconfig-based
//! connections. It serves discovery, get, list (with equality label selectors),
//! server-side apply patches, create and delete.

use std::{
	collections::HashMap,
	sync::{Arc, RwLock},
};

use bon::Builder;
use kube::config::{
	AuthInfo, Cluster, Context, Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext,
};
use serde_json::{json, Value};
use tracing::{debug, trace};
use wiremock::{
	matchers::{header_regex, method, path, path_regex},
	Mock, MockServer, Request, ResponseTemplate,
};

use super::{
	discovery::{DiscoveryMode, MockApiResource, MockDiscovery},
	helpers::{labels_match, merge_json, not_found_message, parse_label_selector},
};

/// Stored objects keyed by `(collection path, name)`.
pub type SharedResources = Arc<RwLock<HashMap<(String, String), Value>>>;

const AGGREGATED_DISCOVERY_CONTENT_TYPE: &str =
	"application/json;g=apidiscovery.k8s.io;v=v2;as=APIGroupDiscoveryList";

/// A mock Kubernetes server exposed over HTTP.
#[derive(Builder)]
pub struct HttpMockK8sServer {
	#[builder(default)]
	discovery_mode: DiscoveryMode,
	/// Resources to serve as raw manifests. The server derives API paths from
	/// apiVersion/kind using the discovery data.
	#[builder(default)]
	resources: Vec<Value>,
}

/// A running HTTP mock server instance.
pub struct RunningHttpMockK8sServer {
	server: MockServer,
	discovery: Arc<MockDiscovery>,
	resources: SharedResources,
}

impl HttpMockK8sServer {
	/// Start the mock server with all configured resources.
	pub async fn start(self) -> RunningHttpMockK8sServer {
		let server = MockServer::start().await;
		let discovery = Arc::new(MockDiscovery::default());

		debug!(uri = %server.uri(), "started mock K8s server");

		let mut resources = HashMap::new();
		for manifest in self.resources {
			if let Some(key) = key_for_manifest(&manifest, &discovery) {
				trace!(collection = %key.0, name = %key.1, "registered resource");
				resources.insert(key, manifest);
			}
		}
		resources
			.entry(("/api/v1/namespaces".to_string(), "default".to_string()))
			.or_insert_with(|| {
				json!({
					"apiVersion": "v1",
					"kind": "Namespace",
					"metadata": {"name": "default"}
				})
			});
		let resources = Arc::new(RwLock::new(resources));

		mount_version(&server).await;
		mount_discovery(&server, &discovery, self.discovery_mode).await;
		mount_resources(&server, &resources).await;

		RunningHttpMockK8sServer {
			server,
			discovery,
			resources,
		}
	}
}

/// Collection path of a kind, e.g. `/apis/apps/v1/namespaces/x/deployments`.
fn collection_path(
	api_version: &str,
	resource: &MockApiResource,
	namespace: Option<&str>,
) -> String {
	let root = if api_version.contains('/') {
		format!("/apis/{api_version}")
	} else {
		format!("/api/{api_version}")
	};
	if resource.namespaced {
		let ns = namespace.unwrap_or("default");
		format!("{root}/namespaces/{ns}/{}", resource.name)
	} else {
		format!("{root}/{}", resource.name)
	}
}

fn key_for_manifest(manifest: &Value, discovery: &MockDiscovery) -> Option<(String, String)> {
	let api_version = manifest.get("apiVersion")?.as_str()?;
	let kind = manifest.get("kind")?.as_str()?;
	let name = manifest.pointer("/metadata/name")?.as_str()?;
	let namespace = manifest.pointer("/metadata/namespace").and_then(Value::as_str);

	let resource = discovery.resource(api_version, kind)?;
	Some((
		collection_path(api_version, resource, namespace),
		name.to_string(),
	))
}

impl RunningHttpMockK8sServer {
	/// Get the server's URI (e.g., "http://127.0.0.1:12345").
	pub fn uri(&self) -> String {
		self.server.uri()
	}

	/// Current state of one object.
	pub fn object(
		&self,
		api_version: &str,
		kind: &str,
		namespace: Option<&str>,
		name: &str,
	) -> Option<Value> {
		let resource = self.discovery.resource(api_version, kind)?;
		let key = (
			collection_path(api_version, resource, namespace),
			name.to_string(),
		);
		self.resources.read().unwrap().get(&key).cloned()
	}

	/// Number of stored objects, including the `default` namespace.
	pub fn len(&self) -> usize {
		self.resources.read().unwrap().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Create a Kubeconfig pointing to this mock server.
	pub fn kubeconfig(&self) -> Kubeconfig {
		self.kubeconfig_with_context("mock-context")
	}

	/// Create a Kubeconfig pointing to this mock server with a custom context name.
	pub fn kubeconfig_with_context(&self, context_name: &str) -> Kubeconfig {
		let cluster_name = "mock-cluster";
		let user_name = "mock-user";

		Kubeconfig {
			clusters: vec![NamedCluster {
				name: cluster_name.to_string(),
				cluster: Some(Cluster {
					server: Some(self.uri()),
					insecure_skip_tls_verify: Some(true),
					..Default::default()
				}),
			}],
			contexts: vec![NamedContext {
				name: context_name.to_string(),
				context: Some(Context {
					cluster: cluster_name.to_string(),
					user: Some(user_name.to_string()),
					namespace: Some("default".to_string()),
					..Default::default()
				}),
			}],
			auth_infos: vec![NamedAuthInfo {
				name: user_name.to_string(),
				auth_info: Some(AuthInfo::default()),
			}],
			current_context: Some(context_name.to_string()),
			..Default::default()
		}
	}
}

async fn mount_version(server: &MockServer) {
	Mock::given(method("GET"))
		.and(path("/version"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"major": "1",
			"minor": "31",
			"gitVersion": "v1.31.0",
			"gitCommit": "fake",
			"gitTreeState": "clean",
			"buildDate": "2024-08-13T00:00:00Z",
			"goVersion": "go1.22.5",
			"compiler": "gc",
			"platform": "linux/amd64"
		})))
		.mount(server)
		.await;
}

fn aggregated_resource(r: &MockApiResource, group: &str, version: &str) -> Value {
	json!({
		"resource": r.name,
		"responseKind": {"group": group, "version": version, "kind": r.kind},
		"scope": r.scope(),
		"verbs": r.verbs,
	})
}

fn legacy_resource(r: &MockApiResource) -> Value {
	json!({
		"name": r.name,
		"singularName": "",
		"namespaced": r.namespaced,
		"kind": r.kind,
		"verbs": r.verbs,
	})
}

fn aggregated_group(group: &str, version: &str, resources: &[MockApiResource]) -> Value {
	json!({
		"metadata": {"name": group},
		"versions": [{
			"version": version,
			"resources": resources
				.iter()
				.map(|r| aggregated_resource(r, group, version))
				.collect::<Vec<_>>(),
			"freshness": "Current"
		}]
	})
}

fn aggregated_list(items: Vec<Value>) -> Vec<u8> {
	serde_json::to_vec(&json!({
		"kind": "APIGroupDiscoveryList",
		"apiVersion": "apidiscovery.k8s.io/v2",
		"items": items
	}))
	.expect("serializing discovery JSON should never fail")
}

async fn mount_aggregated(server: &MockServer, at: &str, response: ResponseTemplate) {
	Mock::given(method("GET"))
		.and(path(at))
		.and(header_regex("accept", "apidiscovery"))
		.respond_with(response)
		.mount(server)
		.await;
}

async fn mount_discovery(server: &MockServer, discovery: &MockDiscovery, mode: DiscoveryMode) {
	// Aggregated endpoints are mounted first so they win when the client asks
	// for apidiscovery; kubectl needs the exact content type to parse them.
	match mode {
		DiscoveryMode::Aggregated => {
			let core = aggregated_list(vec![aggregated_group(
				"",
				"v1",
				&discovery.core_resources,
			)]);
			let groups = aggregated_list(
				discovery
					.group_resources
					.iter()
					.map(|(gv, rs)| {
						let (group, version) = gv.split_once('/').unwrap_or(("", gv));
						aggregated_group(group, version, rs)
					})
					.collect(),
			);
			mount_aggregated(
				server,
				"/api",
				ResponseTemplate::new(200).set_body_raw(core, AGGREGATED_DISCOVERY_CONTENT_TYPE),
			)
			.await;
			mount_aggregated(
				server,
				"/apis",
				ResponseTemplate::new(200).set_body_raw(groups, AGGREGATED_DISCOVERY_CONTENT_TYPE),
			)
			.await;
		}
		DiscoveryMode::Legacy => {
			mount_aggregated(server, "/api", ResponseTemplate::new(406)).await;
			mount_aggregated(server, "/apis", ResponseTemplate::new(406)).await;
		}
	}

	Mock::given(method("GET"))
		.and(path("/api"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"kind": "APIVersions",
			"versions": ["v1"],
			"serverAddressByClientCIDRs": []
		})))
		.mount(server)
		.await;

	let groups: Vec<_> = discovery
		.group_resources
		.keys()
		.map(|gv| {
			let (group, version) = gv.split_once('/').unwrap_or(("", gv));
			json!({
				"name": group,
				"versions": [{"groupVersion": gv, "version": version}],
				"preferredVersion": {"groupVersion": gv, "version": version}
			})
		})
		.collect();
	Mock::given(method("GET"))
		.and(path("/apis"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"kind": "APIGroupList",
			"apiVersion": "v1",
			"groups": groups
		})))
		.mount(server)
		.await;

	let resource_lists = std::iter::once(("v1".to_string(), "/api/v1".to_string(), &discovery.core_resources))
		.chain(
			discovery
				.group_resources
				.iter()
				.map(|(gv, rs)| (gv.clone(), format!("/apis/{gv}"), rs)),
		);
	for (group_version, at, resources) in resource_lists {
		Mock::given(method("GET"))
			.and(path(at))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({
				"kind": "APIResourceList",
				"apiVersion": "v1",
				"groupVersion": group_version,
				"resources": resources.iter().map(legacy_resource).collect::<Vec<_>>()
			})))
			.mount(server)
			.await;
	}
}

/// What a resource URL points at.
#[derive(Debug, PartialEq, Eq)]
enum Target {
	Collection(String),
	Object { collection: String, name: String },
}

/// Classify a resource URL path. Discovery paths yield `None`.
///
/// After the `/api/<v>` or `/apis/<g>/<v>` prefix, an odd number of segments
/// addresses a collection (`deployments`, `namespaces/x/deployments`) and an
/// even number a single object.
fn classify_path(path: &str) -> Option<Target> {
	let path = path.trim_end_matches('/');
	let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
	let prefix = match *segments.first()? {
		"api" => 2,
		"apis" => 3,
		_ => return None,
	};
	let rest = segments.len().checked_sub(prefix)?;
	if rest == 0 {
		return None;
	}
	if rest % 2 == 1 {
		return Some(Target::Collection(path.to_string()));
	}
	let (collection, name) = path.rsplit_once('/')?;
	Some(Target::Object {
		collection: collection.to_string(),
		name: name.to_string(),
	})
}

/// `plural[.group]` as used in API server messages.
fn resource_label(collection: &str) -> String {
	let plural = collection.rsplit('/').next().unwrap_or_default();
	match collection.strip_prefix("/apis/") {
		Some(rest) => {
			let group = rest.split('/').next().unwrap_or_default();
			format!("{plural}.{group}")
		}
		None => plural.to_string(),
	}
}

/// Extract a cluster-wide path from a namespaced API path.
///
/// Examples:
/// - `/api/v1/namespaces/default/configmaps` -> Some(`/api/v1/configmaps`)
/// - `/apis/apps/v1/namespaces/default/deployments` -> Some(`/apis/apps/v1/deployments`)
/// - `/api/v1/namespaces` -> None (already cluster-wide for namespaces)
fn extract_cluster_wide_path(path: &str) -> Option<String> {
	let ns_idx = path.find("/namespaces/")?;
	let before_ns = &path[..ns_idx];
	let after_ns = &path[ns_idx + "/namespaces/".len()..];
	let slash_idx = after_ns.find('/')?;
	Some(format!("{}{}", before_ns, &after_ns[slash_idx..]))
}

fn status_response(code: u16, reason: &str, message: String) -> ResponseTemplate {
	ResponseTemplate::new(code).set_body_json(json!({
		"kind": "Status",
		"apiVersion": "v1",
		"metadata": {},
		"status": "Failure",
		"message": message,
		"reason": reason,
		"code": code
	}))
}

fn not_found(collection: &str, name: &str) -> ResponseTemplate {
	status_response(
		404,
		"NotFound",
		not_found_message(&resource_label(collection), name),
	)
}

/// Set `metadata.namespace` from a namespaced collection path, as the API
/// server does for objects that name none.
fn stamp_namespace(object: &mut Value, collection: &str) {
	let Some(after) = collection.split_once("/namespaces/").map(|(_, after)| after) else {
		return;
	};
	let Some((namespace, _)) = after.split_once('/') else {
		return;
	};
	if let Some(metadata) = object.get_mut("metadata").and_then(Value::as_object_mut) {
		metadata.insert("namespace".to_string(), Value::String(namespace.to_string()));
	}
}

fn is_dry_run(req: &Request) -> bool {
	req.url.query_pairs().any(|(key, _)| key == "dryRun")
}

async fn mount_resources(server: &MockServer, resources: &SharedResources) {
	let patch_resources = Arc::clone(resources);
	let post_resources = Arc::clone(resources);
	let delete_resources = Arc::clone(resources);
	let get_resources = Arc::clone(resources);

	// PATCH merges the body into the stored object, creating it if absent,
	// which is what a server-side apply does for our purposes.
	Mock::given(method("PATCH"))
		.and(path_regex(r"^/api(s)?/.*"))
		.respond_with(move |req: &Request| {
			let Some(Target::Object { collection, name }) = classify_path(req.url.path()) else {
				return status_response(405, "MethodNotAllowed", "cannot patch a collection".into());
			};
			let patch: Value = serde_json::from_slice(&req.body).unwrap_or(Value::Null);
			let key = (collection, name);

			let mut merged = match patch_resources.read().unwrap().get(&key) {
				Some(existing) => merge_json(existing.clone(), patch),
				None => patch,
			};
			stamp_namespace(&mut merged, &key.0);
			if !is_dry_run(req) {
				patch_resources.write().unwrap().insert(key, merged.clone());
			}
			ResponseTemplate::new(200).set_body_json(merged)
		})
		.mount(server)
		.await;

	Mock::given(method("POST"))
		.and(path_regex(r"^/api(s)?/.*"))
		.respond_with(move |req: &Request| {
			let Some(Target::Collection(collection)) = classify_path(req.url.path()) else {
				return status_response(405, "MethodNotAllowed", "cannot post to an object".into());
			};
			let mut body: Value = serde_json::from_slice(&req.body).unwrap_or(Value::Null);
			stamp_namespace(&mut body, &collection);
			let name = body
				.pointer("/metadata/name")
				.and_then(Value::as_str)
				.unwrap_or_default()
				.to_string();
			let key = (collection, name);

			if post_resources.read().unwrap().contains_key(&key) {
				let message = format!("{} \"{}\" already exists", resource_label(&key.0), key.1);
				return status_response(409, "AlreadyExists", message);
			}
			if !is_dry_run(req) && !key.1.is_empty() {
				post_resources.write().unwrap().insert(key, body.clone());
			}
			ResponseTemplate::new(201).set_body_json(body)
		})
		.mount(server)
		.await;

	Mock::given(method("DELETE"))
		.and(path_regex(r"^/api(s)?/.*"))
		.respond_with(move |req: &Request| {
			let Some(Target::Object { collection, name }) = classify_path(req.url.path()) else {
				return status_response(405, "MethodNotAllowed", "cannot delete a collection".into());
			};
			let removed = delete_resources
				.write()
				.unwrap()
				.remove(&(collection.clone(), name.clone()));
			match removed {
				Some(object) => ResponseTemplate::new(200).set_body_json(object),
				None => not_found(&collection, &name),
			}
		})
		.mount(server)
		.await;

	Mock::given(method("GET"))
		.and(path_regex(r"^/api(s)?/.*"))
		.respond_with(move |req: &Request| {
			let resources = get_resources.read().unwrap();
			match classify_path(req.url.path()) {
				Some(Target::Object { collection, name }) => {
					match resources.get(&(collection.clone(), name.clone())) {
						Some(object) => ResponseTemplate::new(200).set_body_json(object),
						None => not_found(&collection, &name),
					}
				}
				Some(Target::Collection(collection)) => {
					let selector = req
						.url
						.query_pairs()
						.find(|(key, _)| key == "labelSelector")
						.map(|(_, value)| parse_label_selector(&value))
						.unwrap_or_default();
					// A cluster-wide list also matches namespaced collections.
					let items: Vec<_> = resources
						.iter()
						.filter(|((stored, _), _)| {
							stored == &collection
								|| extract_cluster_wide_path(stored).as_ref() == Some(&collection)
						})
						.filter(|(_, object)| labels_match(object, &selector))
						.map(|(_, object)| object.clone())
						.collect();
					ResponseTemplate::new(200).set_body_json(json!({
						"kind": "List",
						"apiVersion": "v1",
						"metadata": {"resourceVersion": "1"},
						"items": items
					}))
				}
				None => status_response(404, "NotFound", "the server could not find the requested resource".into()),
			}
		})
		.mount(server)
		.await;
}
