//! Operator actions exposed on the command line.
//!
//! Every command takes the shared [`GlobalArgs`] and writes its result to a
//! caller-supplied writer. Commands that need a cluster connect through
//! [`GlobalArgs::connect`]; the rest only read the manifest storage.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use manifest_reconciler::{
	ClusterApi, ManifestSource, OperatorConfig, ReconciliationEngine, DEFAULT_APP_NAME,
};
use tracing::Level;

use crate::k8s::{ConnectOptions, KubeCluster};

pub mod list_images;
pub mod list_versions;
pub mod reconcile;
pub mod remove;
pub mod resources;
pub mod show;
pub mod status;
pub mod util;
pub mod version;

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
	/// Operator configuration file (YAML); command-line values override it
	#[arg(long, global = true, env = "METRICS_SERVER_OPERATOR_CONFIG")]
	pub config: Option<PathBuf>,

	/// Directory holding `version` and `manifests/<release>/`
	#[arg(
		long,
		global = true,
		env = "METRICS_SERVER_MANIFESTS_DIR",
		default_value = "upstream"
	)]
	pub manifests_dir: PathBuf,

	/// Kubeconfig context to use
	#[arg(long, global = true)]
	pub context: Option<String>,

	/// Namespace for namespaced objects that don't name one
	#[arg(short = 'n', long, global = true)]
	pub namespace: Option<String>,

	/// Ownership label key and server-side apply field manager
	#[arg(long, global = true, default_value = DEFAULT_APP_NAME)]
	pub app_name: String,

	/// Log level (trace, debug, info, warn, error); defaults to RUST_LOG or info
	#[arg(long, global = true)]
	pub log_level: Option<String>,

	/// Manifest release to deploy, the latest one if unset
	#[arg(long, global = true)]
	pub release: Option<String>,

	/// Image registry replacing the upstream one
	#[arg(long, global = true)]
	pub registry_server: Option<String>,

	/// Flags merged into the metrics-server container args
	#[arg(long, global = true, allow_hyphen_values = true)]
	pub extra_args: Option<String>,

	#[arg(long, global = true)]
	pub base_metrics_server_cpu: Option<String>,

	#[arg(long, global = true)]
	pub base_metrics_server_memory: Option<String>,

	#[arg(long, global = true)]
	pub metrics_server_memory_per_node: Option<String>,

	#[arg(long, global = true)]
	pub metrics_server_min_cluster_size: Option<String>,
}

impl Default for GlobalArgs {
	fn default() -> Self {
		Self {
			config: None,
			manifests_dir: PathBuf::from("upstream"),
			context: None,
			namespace: None,
			app_name: DEFAULT_APP_NAME.to_string(),
			log_level: None,
			release: None,
			registry_server: None,
			extra_args: None,
			base_metrics_server_cpu: None,
			base_metrics_server_memory: None,
			metrics_server_memory_per_node: None,
			metrics_server_min_cluster_size: None,
		}
	}
}

impl GlobalArgs {
	/// Parsed `--log-level`, if given.
	pub fn log_level(&self) -> Result<Option<Level>> {
		self.log_level
			.as_deref()
			.map(str::parse::<Level>)
			.transpose()
			.context("invalid --log-level")
	}

	/// Config file overlaid with command-line values.
	pub fn operator_config(&self) -> Result<OperatorConfig> {
		let mut config = match &self.config {
			Some(path) => OperatorConfig::load_from_file(path)?,
			None => OperatorConfig::default(),
		};
		config.merge_from(&OperatorConfig {
			release: self.release.clone(),
			registry_server: self.registry_server.clone(),
			extra_args: self.extra_args.clone(),
			base_metrics_server_cpu: self.base_metrics_server_cpu.clone(),
			base_metrics_server_memory: self.base_metrics_server_memory.clone(),
			metrics_server_memory_per_node: self.metrics_server_memory_per_node.clone(),
			metrics_server_min_cluster_size: self.metrics_server_min_cluster_size.clone(),
		});
		Ok(config)
	}

	pub fn source(&self) -> ManifestSource {
		ManifestSource::new(&self.manifests_dir)
	}

	pub fn connect(&self) -> Result<KubeCluster> {
		let cluster = KubeCluster::connect(&ConnectOptions {
			context: self.context.clone(),
			namespace: self.namespace.clone(),
		})
		.context("connecting to Kubernetes")?;
		tracing::debug!(cluster = ?cluster, "connected");
		Ok(cluster)
	}

	/// Engine over `cluster` for the configured release.
	pub fn engine<C: ClusterApi>(&self, cluster: C) -> Result<ReconciliationEngine<C>> {
		Ok(ReconciliationEngine::new(
			cluster,
			self.source(),
			self.operator_config()?,
			self.app_name.clone(),
		))
	}
}

/// Selection and output options of the resource commands.
#[derive(Args, Debug, Clone, Default)]
pub struct ResourceArgs {
	/// Only consider this manifest file of the release (by name, e.g. `components`)
	#[arg(long)]
	pub manifest: Option<String>,

	/// Only consider resources of this kind (case-insensitive)
	#[arg(long)]
	pub resources: Option<String>,

	/// Print JSON instead of a table
	#[arg(long)]
	pub json: bool,
}

impl ResourceArgs {
	pub fn components(&self) -> Vec<String> {
		self.manifest.iter().cloned().collect()
	}

	pub fn kind_filter(&self) -> Option<&str> {
		self.resources.as_deref().filter(|r| !r.is_empty())
	}
}
