//! Structural transforms applied to every parsed document before apply.
//!
//! The pipeline order is fixed: ownership label, image registry, extra
//! arguments. Every transform is idempotent, so running the pipeline over
//! already-transformed documents is a no-op.

use std::fmt;

use serde_json::{Map, Value};
use tracing::info;

/// Deployment and container receiving extra command line flags.
pub const METRICS_SERVER: &str = "metrics-server";

/// A single in-place document transform.
pub trait Transform: fmt::Debug + Send + Sync {
	/// Short name used in logs.
	fn name(&self) -> &'static str;

	/// Mutate `doc` in place, or leave it untouched if it doesn't apply.
	fn apply(&self, doc: &mut Value);
}

/// Marks every document as owned by the deploying application.
#[derive(Debug, Clone)]
pub struct OwnerLabel {
	key: String,
}

impl OwnerLabel {
	pub fn new(key: impl Into<String>) -> Self {
		Self { key: key.into() }
	}
}

impl Transform for OwnerLabel {
	fn name(&self) -> &'static str {
		"owner-label"
	}

	fn apply(&self, doc: &mut Value) {
		let Value::Object(obj) = doc else {
			return;
		};
		let metadata = obj
			.entry("metadata")
			.or_insert_with(|| Value::Object(Map::new()));
		let Value::Object(metadata) = metadata else {
			return;
		};
		metadata
			.entry("name")
			.or_insert_with(|| Value::String(String::new()));
		let labels = metadata
			.entry("labels")
			.or_insert_with(|| Value::Object(Map::new()));
		if let Value::Object(labels) = labels {
			labels.insert(self.key.clone(), Value::String("true".to_string()));
		}
	}
}

/// Points container images at a mirror registry.
///
/// `<host>/<rest>` becomes `<registry>/<rest>`. References without a `/`
/// and references already under the registry are left alone.
#[derive(Debug, Clone, Default)]
pub struct RegistryRewrite {
	registry: Option<String>,
}

impl RegistryRewrite {
	pub fn new(registry: Option<String>) -> Self {
		Self {
			registry: registry
				.map(|r| r.trim_end_matches('/').to_string())
				.filter(|r| !r.is_empty()),
		}
	}

	/// Rewrite a single image reference.
	pub fn rewrite(&self, image: &str) -> Option<String> {
		let registry = self.registry.as_deref()?;
		if image
			.strip_prefix(registry)
			.is_some_and(|rest| rest.starts_with('/'))
		{
			return None;
		}
		let (_, rest) = image.split_once('/')?;
		Some(format!("{registry}/{rest}"))
	}
}

impl Transform for RegistryRewrite {
	fn name(&self) -> &'static str {
		"registry-rewrite"
	}

	fn apply(&self, doc: &mut Value) {
		if self.registry.is_none() {
			return;
		}
		let Some(Value::Array(containers)) = doc.pointer_mut("/spec/template/spec/containers")
		else {
			return;
		};
		for container in containers {
			let Some(Value::String(image)) = container.get_mut("image") else {
				continue;
			};
			if let Some(rewritten) = self.rewrite(image) {
				info!(from = %image, to = %rewritten, "replacing image");
				*image = rewritten;
			}
		}
	}
}

/// Ordered `flag -> optional value` mapping with dictionary update semantics.
///
/// Re-inserting an existing flag overwrites its value in place, new flags
/// are appended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgMap {
	entries: Vec<(String, Option<String>)>,
}

impl ArgMap {
	pub fn parse<'a>(args: impl IntoIterator<Item = &'a str>) -> Self {
		let mut map = Self::default();
		for arg in args {
			match arg.split_once('=') {
				Some((flag, value)) => map.insert(flag, Some(value.to_string())),
				None => map.insert(arg, None),
			}
		}
		map
	}

	pub fn insert(&mut self, flag: &str, value: Option<String>) {
		match self.entries.iter_mut().find(|(f, _)| f == flag) {
			Some(entry) => entry.1 = value,
			None => self.entries.push((flag.to_string(), value)),
		}
	}

	pub fn merge(&mut self, other: ArgMap) {
		for (flag, value) in other.entries {
			self.insert(&flag, value);
		}
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Serialize back into `flag` / `flag=value` entries.
	pub fn to_args(&self) -> Vec<String> {
		self.entries
			.iter()
			.map(|(flag, value)| match value {
				Some(value) => format!("{flag}={value}"),
				None => flag.clone(),
			})
			.collect()
	}
}

/// Merges operator-supplied flags into the metrics-server container.
#[derive(Debug, Clone)]
pub struct ExtraArgs {
	extra: ArgMap,
	deployment: String,
	container: String,
}

impl ExtraArgs {
	/// `extra_args` is a whitespace separated flag list.
	pub fn new(extra_args: Option<&str>) -> Self {
		Self {
			extra: ArgMap::parse(extra_args.unwrap_or_default().split_whitespace()),
			deployment: METRICS_SERVER.to_string(),
			container: METRICS_SERVER.to_string(),
		}
	}

	fn is_target(&self, doc: &Value) -> bool {
		doc.get("kind").and_then(Value::as_str) == Some("Deployment")
			&& doc.pointer("/metadata/name").and_then(Value::as_str) == Some(self.deployment.as_str())
	}
}

impl Transform for ExtraArgs {
	fn name(&self) -> &'static str {
		"extra-args"
	}

	fn apply(&self, doc: &mut Value) {
		if self.extra.is_empty() || !self.is_target(doc) {
			return;
		}
		let Some(Value::Array(containers)) = doc.pointer_mut("/spec/template/spec/containers")
		else {
			return;
		};
		for container in containers {
			if container.get("name").and_then(Value::as_str) != Some(self.container.as_str()) {
				continue;
			}
			let existing: Vec<&str> = container
				.get("args")
				.and_then(Value::as_array)
				.map(|args| args.iter().filter_map(Value::as_str).collect())
				.unwrap_or_default();
			let mut merged = ArgMap::parse(existing);
			merged.merge(self.extra.clone());
			let new_args = merged.to_args();
			info!(args = ?new_args, "replacing args");

			if let Value::Object(container) = container {
				container.insert(
					"args".to_string(),
					Value::Array(new_args.into_iter().map(Value::String).collect()),
				);
			}
		}
	}
}

/// Ordered list of transforms run over every document.
#[derive(Debug, Default)]
pub struct MutationPipeline {
	transforms: Vec<Box<dyn Transform>>,
}

impl MutationPipeline {
	pub fn new(transforms: Vec<Box<dyn Transform>>) -> Self {
		Self { transforms }
	}

	/// The fixed operator pipeline: ownership label, registry, extra args.
	pub fn standard(owner: &str, registry: Option<String>, extra_args: Option<&str>) -> Self {
		Self::new(vec![
			Box::new(OwnerLabel::new(owner)),
			Box::new(RegistryRewrite::new(registry)),
			Box::new(ExtraArgs::new(extra_args)),
		])
	}

	pub fn transform_names(&self) -> Vec<&'static str> {
		self.transforms.iter().map(|t| t.name()).collect()
	}

	/// Run every transform over `doc`. For a `List`, every item is
	/// transformed instead of the list itself.
	pub fn apply(&self, doc: &mut Value) {
		if doc.get("kind").and_then(Value::as_str) == Some("List") {
			if let Some(Value::Array(items)) = doc.get_mut("items") {
				for item in items {
					self.apply_one(item);
				}
			}
			return;
		}
		self.apply_one(doc);
	}

	fn apply_one(&self, doc: &mut Value) {
		for transform in &self.transforms {
			transform.apply(doc);
		}
	}
}

#[cfg(test)]
mod tests {
	use rstest::rstest;
	use serde_json::json;

	use super::*;

	fn metrics_server_deployment(args: &[&str]) -> Value {
		json!({
			"apiVersion": "apps/v1",
			"kind": "Deployment",
			"metadata": {"name": "metrics-server", "namespace": "kube-system"},
			"spec": {"template": {"spec": {"containers": [
				{
					"name": "metrics-server",
					"image": "k8s.gcr.io/metrics-server/metrics-server:v0.6.0",
					"args": args,
				},
				{
					"name": "sidecar",
					"image": "docker.io/library/busybox:1.36",
					"args": ["--untouched"],
				}
			]}}}
		})
	}

	fn args_of(doc: &Value, container: usize) -> Vec<String> {
		serde_json::from_value(doc["spec"]["template"]["spec"]["containers"][container]["args"].clone())
			.unwrap()
	}

	#[test]
	fn test_owner_label_defaults_metadata() {
		let mut doc = json!({"apiVersion": "v1", "kind": "Service"});
		OwnerLabel::new("myapp").apply(&mut doc);

		assert_eq!(doc["metadata"]["labels"]["myapp"], "true");
		assert_eq!(doc["metadata"]["name"], "");
	}

	#[test]
	fn test_owner_label_keeps_existing_labels() {
		let mut doc = json!({
			"kind": "Service",
			"metadata": {"name": "metrics-server", "labels": {"k8s-app": "metrics-server"}}
		});
		OwnerLabel::new("myapp").apply(&mut doc);

		assert_eq!(
			doc["metadata"]["labels"],
			json!({"k8s-app": "metrics-server", "myapp": "true"})
		);
	}

	#[rstest]
	#[case("docker.io/foo/bar:v1", "my.server", Some("my.server/foo/bar:v1"))]
	#[case("docker.io/foo/bar:v1", "my.server:443/library", Some("my.server:443/library/foo/bar:v1"))]
	#[case("docker.io/foo/bar:v1", "my.server/", Some("my.server/foo/bar:v1"))]
	#[case("busybox", "my.server", None)]
	#[case("my.server/foo/bar:v1", "my.server", None)]
	#[case("my.server:443/library/foo/bar:v1", "my.server:443/library", None)]
	fn test_registry_rewrite(#[case] image: &str, #[case] registry: &str, #[case] expected: Option<&str>) {
		let rewrite = RegistryRewrite::new(Some(registry.to_string()));
		assert_eq!(rewrite.rewrite(image).as_deref(), expected);
	}

	#[test]
	fn test_registry_rewrite_unconfigured_is_noop() {
		let original = metrics_server_deployment(&["--a=1"]);
		let mut doc = original.clone();
		RegistryRewrite::new(None).apply(&mut doc);
		RegistryRewrite::new(Some(String::new())).apply(&mut doc);
		assert_eq!(doc, original);
	}

	#[test]
	fn test_registry_rewrite_touches_every_container() {
		let mut doc = metrics_server_deployment(&[]);
		RegistryRewrite::new(Some("my.server".into())).apply(&mut doc);

		let containers = &doc["spec"]["template"]["spec"]["containers"];
		assert_eq!(containers[0]["image"], "my.server/metrics-server/metrics-server:v0.6.0");
		assert_eq!(containers[1]["image"], "my.server/library/busybox:1.36");
	}

	#[test]
	fn test_extra_args_merge() {
		let mut doc = metrics_server_deployment(&["--a=1", "--b"]);
		ExtraArgs::new(Some("--b=2 --c")).apply(&mut doc);

		assert_eq!(args_of(&doc, 0), ["--a=1", "--b=2", "--c"]);
		assert_eq!(args_of(&doc, 1), ["--untouched"]);
	}

	#[test]
	fn test_extra_args_value_containing_equals() {
		let mut doc = metrics_server_deployment(&["--kubelet-preferred-address-types=Hostname"]);
		ExtraArgs::new(Some(
			"--kubelet-preferred-address-types=InternalIP,Hostname --tls-cipher-suites=a=b",
		))
		.apply(&mut doc);

		assert_eq!(
			args_of(&doc, 0),
			[
				"--kubelet-preferred-address-types=InternalIP,Hostname",
				"--tls-cipher-suites=a=b",
			]
		);
	}

	#[rstest]
	#[case(json!({"kind": "Deployment", "metadata": {"name": "other"}}))]
	#[case(json!({"kind": "DaemonSet", "metadata": {"name": "metrics-server"}}))]
	fn test_extra_args_only_targets_metrics_server(#[case] mut doc: Value) {
		doc["spec"] = metrics_server_deployment(&["--a=1"])["spec"].clone();
		let original = doc.clone();
		ExtraArgs::new(Some("--b")).apply(&mut doc);
		assert_eq!(doc, original);
	}

	#[test]
	fn test_extra_args_without_existing_args() {
		let mut doc = metrics_server_deployment(&[]);
		doc["spec"]["template"]["spec"]["containers"][0]
			.as_object_mut()
			.unwrap()
			.remove("args");
		ExtraArgs::new(Some("--kubelet-insecure-tls")).apply(&mut doc);
		assert_eq!(args_of(&doc, 0), ["--kubelet-insecure-tls"]);
	}

	#[test]
	fn test_arg_map_collapses_duplicates() {
		let map = ArgMap::parse(["--a=1", "--b", "--a=2"]);
		assert_eq!(map.to_args(), ["--a=2", "--b"]);
	}

	#[test]
	fn test_pipeline_expands_lists() {
		let mut doc = json!({
			"apiVersion": "v1",
			"kind": "List",
			"items": [
				{"kind": "ServiceAccount", "metadata": {"name": "a"}},
				{"kind": "ConfigMap", "metadata": {"name": "b"}}
			]
		});
		MutationPipeline::standard("myapp", None, None).apply(&mut doc);

		assert!(doc.pointer("/metadata").is_none());
		for item in doc["items"].as_array().unwrap() {
			assert_eq!(item["metadata"]["labels"]["myapp"], "true");
		}
	}

	#[test]
	fn test_pipeline_order() {
		let pipeline = MutationPipeline::standard("myapp", None, None);
		assert_eq!(
			pipeline.transform_names(),
			["owner-label", "registry-rewrite", "extra-args"]
		);
	}

	fn idempotence_inputs() -> Vec<Value> {
		vec![
			metrics_server_deployment(&["--a=1", "--b", "--a=3"]),
			metrics_server_deployment(&[]),
			json!({"apiVersion": "v1", "kind": "Service"}),
			json!({"apiVersion": "v1", "kind": "List", "items": [
				metrics_server_deployment(&["--cert-dir=/tmp"]),
				{"kind": "ServiceAccount", "metadata": {"name": "metrics-server"}}
			]}),
			json!({"kind": "Deployment", "metadata": {"name": "metrics-server"}, "spec": {
				"template": {"spec": {"containers": [{"name": "metrics-server", "image": "busybox"}]}}
			}}),
		]
	}

	#[rstest]
	fn test_pipeline_is_idempotent(
		#[values(None, Some("my.server"), Some("my.server:443/library"))] registry: Option<&str>,
		#[values(None, Some(""), Some("--b=2 --c"), Some("--a --a=5 --kubelet-insecure-tls"))]
		extra_args: Option<&str>,
	) {
		let pipeline = MutationPipeline::standard("myapp", registry.map(String::from), extra_args);
		for input in idempotence_inputs() {
			let mut once = input.clone();
			pipeline.apply(&mut once);
			let mut twice = once.clone();
			pipeline.apply(&mut twice);
			assert_eq!(once, twice, "pipeline is not idempotent for {input}");
		}
	}
}
