//! Reconciliation passes against an in-memory cluster.
//!
//! The fixture bundle in `testdata/upstream` declares five resources for
//! `v0.6.0`: a ServiceAccount, a ClusterRole, a ClusterRoleBinding, a Service
//! and the metrics-server Deployment.

use std::path::{Path, PathBuf};

use assert_matches::assert_matches;
use indoc::indoc;
use k8s_mock::{Failure, MockCluster, Verb};
use manifest_reconciler::{
	declared_manifests, ApiError, ManifestSource, MutationPipeline, OperatorConfig, PassState,
	ReconcileError, ReconciliationEngine, ResourceIdentity, SourceError, WorkloadStatus,
};
use serde_json::{json, Value};

const APP: &str = "myapp";

fn fixture() -> PathBuf {
	Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/testdata/upstream")
}

fn engine(cluster: &MockCluster, config: OperatorConfig) -> ReconciliationEngine<&MockCluster> {
	ReconciliationEngine::new(cluster, ManifestSource::new(fixture()), config, APP)
}

fn labels(owned: bool) -> Value {
	if owned {
		json!({"k8s-app": "metrics-server", APP: "true"})
	} else {
		json!({"k8s-app": "metrics-server"})
	}
}

fn object(api_version: &str, kind: &str, namespace: Option<&str>, name: &str, owned: bool) -> Value {
	let mut metadata = json!({"name": name, "labels": labels(owned)});
	if let Some(ns) = namespace {
		metadata["namespace"] = json!(ns);
	}
	json!({"apiVersion": api_version, "kind": kind, "metadata": metadata})
}

/// Every declared resource present, three of them labeled, plus two labeled
/// leftovers the bundle no longer declares.
fn drifted_cluster() -> MockCluster {
	MockCluster::builder()
		.resources(vec![
			object("v1", "ServiceAccount", Some("kube-system"), "metrics-server", true),
			object("rbac.authorization.k8s.io/v1", "ClusterRole", None, "system:metrics-server", true),
			object("v1", "Service", Some("kube-system"), "metrics-server", true),
			object("rbac.authorization.k8s.io/v1", "ClusterRoleBinding", None, "system:metrics-server", false),
			object("apps/v1", "Deployment", Some("kube-system"), "metrics-server", false),
			object("v1", "ServiceAccount", Some("kube-system"), "metrics-server-legacy", true),
			object("rbac.authorization.k8s.io/v1", "ClusterRole", None, "system:aggregated-metrics-reader", true),
		])
		.build()
}

fn id(kind: &str, namespace: Option<&str>, name: &str) -> ResourceIdentity {
	ResourceIdentity::new(kind, namespace, name)
}

#[test]
fn test_declared_documents_carry_owner_label() {
	let cluster = MockCluster::builder().build();
	let manifests = engine(&cluster, OperatorConfig::default()).manifests().unwrap();

	assert_eq!(manifests.len(), 5);
	for manifest in &manifests {
		assert_eq!(
			manifest.metadata.labels.get(APP).map(String::as_str),
			Some("true"),
			"{} is missing the owner label",
			manifest.identity()
		);
		assert_ne!(manifest.metadata.namespace.as_deref(), Some(APP));
	}
}

#[test]
fn test_declared_resources_grouped() {
	let cluster = MockCluster::builder().build();
	let declared = engine(&cluster, OperatorConfig::default())
		.declared_resources()
		.unwrap();

	assert_eq!(declared.len(), 5);
	assert_eq!(declared.values().map(|ids| ids.len()).sum::<usize>(), 5);
	assert!(cluster.calls().is_empty());
}

#[test]
fn test_diff_end_to_end() {
	let cluster = drifted_cluster();
	let diff = engine(&cluster, OperatorConfig::default()).diff(None).unwrap();

	assert_eq!(diff.correct.len(), 3);
	assert_eq!(diff.extra.len(), 2);
	assert_eq!(diff.missing.len(), 2);

	assert!(diff
		.extra
		.contains(&id("ServiceAccount", Some("kube-system"), "metrics-server-legacy")));
	assert!(diff
		.missing
		.contains(&id("Deployment", Some("kube-system"), "metrics-server")));
	assert!(!diff.is_converged());
}

#[test]
fn test_diff_kind_filter_is_case_insensitive() {
	let cluster = drifted_cluster();
	let diff = engine(&cluster, OperatorConfig::default())
		.diff(Some("clusterrole"))
		.unwrap();

	assert_eq!(diff.correct.len(), 1);
	assert_eq!(diff.extra.len(), 1);
	assert!(diff.missing.is_empty());
	assert!(cluster
		.calls_of(Verb::List)
		.iter()
		.all(|call| call.kind == "ClusterRole"));
}

#[test]
fn test_live_and_expected_sets() {
	let cluster = drifted_cluster();
	let engine = engine(&cluster, OperatorConfig::default());

	let live = engine.live_resources().unwrap();
	let expected = engine.expected_resources().unwrap();
	assert_eq!(live.values().map(|ids| ids.len()).sum::<usize>(), 5);
	assert_eq!(expected.values().map(|ids| ids.len()).sum::<usize>(), 5);

	// Namespaced groups are listed in the namespace of their declared resources.
	let service_list = cluster
		.calls_of(Verb::List)
		.into_iter()
		.find(|call| call.kind == "Service")
		.unwrap();
	assert_eq!(service_list.namespace.as_deref(), Some("kube-system"));
}

#[test]
fn test_expected_excludes_absent_resources() {
	let cluster = MockCluster::builder()
		.resources(vec![object("v1", "Service", Some("kube-system"), "metrics-server", true)])
		.build();
	let engine = engine(&cluster, OperatorConfig::default());

	let expected = engine.expected_resources().unwrap();
	assert_eq!(expected.values().map(|ids| ids.len()).sum::<usize>(), 1);

	let diff = engine.diff(None).unwrap();
	assert_eq!(diff.correct.len(), 1);
	assert!(diff.is_converged());
}

#[test]
fn test_reconcile_settles_and_is_idempotent() {
	let cluster = MockCluster::builder().build();
	let mut engine = engine(&cluster, OperatorConfig::default());

	engine.reconcile().unwrap();
	assert_eq!(engine.state(), &PassState::Settled);
	assert_eq!(cluster.len(), 5);
	let after_first: Vec<Value> = cluster
		.identities()
		.iter()
		.map(|i| cluster.manifest(i.kind(), i.name(), i.namespace()).unwrap())
		.collect();

	engine.reconcile().unwrap();
	let after_second: Vec<Value> = cluster
		.identities()
		.iter()
		.map(|i| cluster.manifest(i.kind(), i.name(), i.namespace()).unwrap())
		.collect();
	assert_eq!(after_first, after_second);

	let diff = engine.diff(None).unwrap();
	assert_eq!(diff.correct.len(), 5);
	assert!(diff.is_converged());
}

#[test]
fn test_reconcile_applies_in_document_order() {
	let cluster = MockCluster::builder().build();
	engine(&cluster, OperatorConfig::default()).reconcile().unwrap();

	let kinds: Vec<String> = cluster
		.calls_of(Verb::Apply)
		.into_iter()
		.map(|call| call.kind)
		.collect();
	assert_eq!(
		kinds,
		["ServiceAccount", "ClusterRole", "ClusterRoleBinding", "Service", "Deployment"]
	);
}

#[test]
fn test_reconcile_blocks_on_fatal_apply_failure() {
	let cluster = MockCluster::builder()
		.failures(vec![Failure::new(
			Verb::Apply,
			"Service",
			ApiError::Other {
				code: Some(500),
				message: Some("etcdserver: request timed out".into()),
			},
		)])
		.build();
	let mut engine = engine(&cluster, OperatorConfig::default());

	assert_matches!(
		engine.reconcile(),
		Err(ReconcileError::Apply { resource, .. }) if resource.kind() == "Service"
	);
	assert_matches!(engine.state(), PassState::Blocked(reason) if reason.contains("request timed out"));
	assert_matches!(engine.workload_status(), WorkloadStatus::Blocked(_));

	// Resources before the failure stay applied, nothing after it is tried.
	assert_eq!(cluster.calls_of(Verb::Apply).len(), 4);
	assert!(!cluster.contains("Deployment", "metrics-server", Some("kube-system")));

	// The next pass heals.
	cluster.clear_failures();
	engine.reconcile().unwrap();
	assert_eq!(engine.state(), &PassState::Settled);
	assert_eq!(cluster.len(), 5);
}

#[test]
fn test_apply_does_not_tolerate_not_found() {
	let cluster = MockCluster::builder()
		.failures(vec![Failure::new(
			Verb::Apply,
			"ServiceAccount",
			ApiError::NotFound {
				message: Some("namespaces \"kube-system\" not found".into()),
			},
		)])
		.build();

	assert_matches!(
		engine(&cluster, OperatorConfig::default()).apply(),
		Err(ReconcileError::Apply { .. })
	);
}

#[test]
fn test_reconcile_blocks_on_unknown_release() {
	let cluster = MockCluster::builder().build();
	let mut engine = engine(
		&cluster,
		OperatorConfig {
			release: Some("v9.9.9".into()),
			..Default::default()
		},
	);

	assert_matches!(engine.reconcile(), Err(ReconcileError::Config(_)));
	assert_matches!(engine.state(), PassState::Blocked(reason) if reason.contains("v9.9.9"));
	assert!(cluster.calls().is_empty());
}

#[test]
fn test_reconcile_blocks_on_malformed_bundle() {
	let dir = tempfile::tempdir().unwrap();
	let release = dir.path().join("manifests/v0.6.0");
	std::fs::create_dir_all(&release).unwrap();
	std::fs::write(dir.path().join("version"), "v0.6.0\n").unwrap();
	std::fs::write(
		release.join("components.yaml"),
		"apiVersion: v1\nkind: ServiceAccount\nmetadata:\n  name: ok\n---\nkind: [broken\n",
	)
	.unwrap();

	let cluster = MockCluster::builder().build();
	let mut engine = ReconciliationEngine::new(
		&cluster,
		ManifestSource::new(dir.path()),
		OperatorConfig::default(),
		APP,
	);

	assert_matches!(
		engine.reconcile(),
		Err(ReconcileError::Source(SourceError::Parse { .. }))
	);
	assert_matches!(engine.state(), PassState::Blocked(_));
	assert!(cluster.calls_of(Verb::Apply).is_empty());
}

#[test]
fn test_remove_tolerates_missing_and_unauthorized() {
	let cluster = MockCluster::builder()
		.resources(vec![
			object("v1", "Service", Some("kube-system"), "metrics-server", true),
			object("apps/v1", "Deployment", Some("kube-system"), "metrics-server", true),
		])
		.failures(vec![Failure::new(
			Verb::Delete,
			"ClusterRole",
			ApiError::Unauthorized {
				message: Some("Unauthorized".into()),
			},
		)])
		.build();
	let mut engine = engine(&cluster, OperatorConfig::default());

	engine.remove().unwrap();
	assert_eq!(engine.state(), &PassState::Removed);
	assert!(cluster.is_empty());
	assert_eq!(
		engine.workload_status(),
		WorkloadStatus::Maintenance("Shutting down".into())
	);

	// Teardown goes in reverse document order.
	let kinds: Vec<String> = cluster
		.calls_of(Verb::Delete)
		.into_iter()
		.map(|call| call.kind)
		.collect();
	assert_eq!(kinds.first().map(String::as_str), Some("Deployment"));
	assert_eq!(kinds.last().map(String::as_str), Some("ServiceAccount"));
}

#[test]
fn test_remove_blocks_on_fatal_delete_failure() {
	let cluster = MockCluster::builder()
		.failures(vec![Failure::new(
			Verb::Delete,
			"Service",
			ApiError::Other {
				code: Some(500),
				message: None,
			},
		)])
		.build();
	let mut engine = engine(&cluster, OperatorConfig::default());

	assert_matches!(engine.remove(), Err(ReconcileError::Delete { .. }));
	assert_matches!(engine.state(), PassState::Blocked(_));
}

#[test]
fn test_delete_not_found_tolerance() {
	let cluster = MockCluster::builder().build();
	let engine = engine(&cluster, OperatorConfig::default());
	let gone = [id("ConfigMap", Some("kube-system"), "gone")];

	engine.delete(&gone, true, false).unwrap();
	assert_matches!(
		engine.delete(&gone, false, false),
		Err(ReconcileError::Delete { source: ApiError::NotFound { .. }, .. })
	);
}

#[test]
fn test_scrub_deletes_extra() {
	let cluster = drifted_cluster();
	let engine = engine(&cluster, OperatorConfig::default());

	let diff = engine.scrub(None).unwrap();
	assert!(diff.extra.is_empty());
	assert_eq!(diff.correct.len(), 3);
	assert_eq!(diff.missing.len(), 2);
	assert!(!cluster.contains("ServiceAccount", "metrics-server-legacy", Some("kube-system")));
	assert!(!cluster.contains("ClusterRole", "system:aggregated-metrics-reader", None));
}

#[test]
fn test_sync_applies_missing() {
	let cluster = drifted_cluster();
	let engine = engine(&cluster, OperatorConfig::default());

	let diff = engine.sync(Some("Deployment")).unwrap();
	assert!(diff.missing.is_empty());
	assert_eq!(diff.correct.len(), 1);

	let diff = engine.sync(None).unwrap();
	assert!(diff.missing.is_empty());
	assert_eq!(diff.correct.len(), 5);
	assert_eq!(diff.extra.len(), 2);
	assert_eq!(cluster.calls_of(Verb::Apply).len(), 2);
}

#[test]
fn test_workload_status() {
	let cluster = MockCluster::builder().build();
	let mut engine = engine(&cluster, OperatorConfig::default());
	engine.reconcile().unwrap();

	assert_eq!(engine.workload_status(), WorkloadStatus::Active("Ready".into()));
	assert!(engine.status_summary().unwrap().is_empty());

	let mut deployment = cluster
		.manifest("Deployment", "metrics-server", Some("kube-system"))
		.unwrap();
	deployment["status"] = json!({"conditions": [
		{"type": "Available", "status": "False", "message": "Deployment does not have minimum availability."},
		{"type": "Progressing", "status": "True"},
	]});
	cluster.insert(deployment.clone());

	let tracked = engine.status_summary().unwrap();
	assert_eq!(tracked.len(), 1);
	assert!(!tracked[0].is_ready());
	assert_eq!(
		engine.workload_status(),
		WorkloadStatus::Waiting("Not ready: Deployment/kube-system/metrics-server".into())
	);

	deployment["status"]["conditions"][0]["status"] = json!("True");
	cluster.insert(deployment);
	assert_eq!(engine.workload_status(), WorkloadStatus::Active("Ready".into()));

	cluster.fail(Failure::new(
		Verb::Get,
		"Deployment",
		ApiError::Other {
			code: None,
			message: Some("connection refused".into()),
		},
	));
	assert_eq!(
		engine.workload_status(),
		WorkloadStatus::Waiting("Waiting for API server".into())
	);
}

#[test]
fn test_current_version() {
	let cluster = MockCluster::builder().build();
	assert_eq!(
		engine(&cluster, OperatorConfig::default())
			.current_version()
			.unwrap(),
		"v0.6.0"
	);

	let pinned = OperatorConfig {
		release: Some("v0.5.2".into()),
		..Default::default()
	};
	let engine = engine(&cluster, pinned);
	assert_eq!(engine.current_version().unwrap(), "v0.5.2");
	// Older bundle ships its resources as a List.
	assert_eq!(engine.manifests().unwrap().len(), 2);
}

#[test]
fn test_configuration_flows_into_manifests() {
	let cluster = MockCluster::builder().build();
	let config = OperatorConfig {
		registry_server: Some("my.server:443/library".into()),
		extra_args: Some("--kubelet-insecure-tls --metric-resolution=30s".into()),
		..Default::default()
	};
	let manifests = engine(&cluster, config).manifests().unwrap();
	let deployment = manifests
		.iter()
		.find(|m| m.kind == "Deployment")
		.unwrap()
		.to_value();
	let container = &deployment["spec"]["template"]["spec"]["containers"][0];

	assert_eq!(
		container["image"],
		"my.server:443/library/metrics-server/metrics-server:v0.6.0"
	);
	assert_eq!(
		container["args"],
		json!([
			"--cert-dir=/tmp",
			"--secure-port=4443",
			"--kubelet-preferred-address-types=InternalIP,ExternalIP,Hostname",
			"--kubelet-use-node-status-port",
			"--metric-resolution=30s",
			"--kubelet-insecure-tls",
		])
	);
}

#[test]
fn test_declared_manifests_without_cluster() {
	let config = OperatorConfig::default();
	let pipeline = MutationPipeline::standard(APP, None, None);
	let manifests =
		declared_manifests(&ManifestSource::new(fixture()), &config, &pipeline, &[]).unwrap();

	let cluster = MockCluster::builder().build();
	let from_engine = engine(&cluster, config).manifests().unwrap();
	assert_eq!(manifests, from_engine);
	assert!(cluster.calls().is_empty());

	let selected = declared_manifests(
		&ManifestSource::new(fixture()),
		&OperatorConfig::default(),
		&pipeline,
		&["missing".to_string()],
	)
	.unwrap();
	assert!(selected.is_empty());
}

/// Storage whose only release declares its namespaced objects without a
/// namespace.
fn namespaceless_storage() -> tempfile::TempDir {
	let dir = tempfile::tempdir().unwrap();
	let release = dir.path().join("manifests/v0.6.0");
	std::fs::create_dir_all(&release).unwrap();
	std::fs::write(dir.path().join("version"), "v0.6.0\n").unwrap();
	std::fs::write(
		release.join("components.yaml"),
		indoc! {"
			apiVersion: v1
			kind: ServiceAccount
			metadata:
			  name: metrics-server
			---
			apiVersion: rbac.authorization.k8s.io/v1
			kind: ClusterRole
			metadata:
			  name: system:metrics-server
		"},
	)
	.unwrap();
	dir
}

#[test]
fn test_namespaceless_resources_use_cluster_default_namespace() {
	let dir = namespaceless_storage();
	let cluster = MockCluster::builder()
		.namespace("kube-system")
		.resources(vec![
			object("v1", "ServiceAccount", Some("kube-system"), "metrics-server", true),
			object("rbac.authorization.k8s.io/v1", "ClusterRole", None, "system:metrics-server", true),
		])
		.build();
	let engine = ReconciliationEngine::new(
		&cluster,
		ManifestSource::new(dir.path()),
		OperatorConfig::default(),
		APP,
	);

	let manifests = engine.manifests().unwrap();
	assert_eq!(manifests[0].metadata.namespace.as_deref(), Some("kube-system"));
	assert_eq!(manifests[1].metadata.namespace, None);

	let diff = engine.diff(None).unwrap();
	assert_eq!(
		diff.correct.into_iter().collect::<Vec<_>>(),
		vec![
			id("ClusterRole", None, "system:metrics-server"),
			id("ServiceAccount", Some("kube-system"), "metrics-server"),
		]
	);
	assert!(diff.extra.is_empty());
	assert!(diff.missing.is_empty());

	let diff = engine.scrub(None).unwrap();
	assert!(diff.is_converged());
	assert!(cluster.contains("ServiceAccount", "metrics-server", Some("kube-system")));
	assert!(cluster.calls_of(Verb::Delete).is_empty());
}
