//! Kubernetes cluster connection management.

use std::time::Duration;

use k8s_openapi::apimachinery::pkg::version::Info;
use kube::{
	config::{InferConfigError, KubeConfigOptions, Kubeconfig, KubeconfigError},
	Client, Config,
};
use thiserror::Error;
use tracing::instrument;

/// Default timeout for Kubernetes API requests.
const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur when connecting to a Kubernetes cluster.
#[derive(Debug, Error)]
pub enum ConnectionError {
	#[error("no context named `{0}` was found. Please check your $KUBECONFIG")]
	ContextNotFound(String),

	#[error(transparent)]
	Kubeconfig(#[from] KubeconfigError),

	#[error("no kubeconfig or in-cluster configuration available")]
	Infer(#[from] InferConfigError),

	#[error(transparent)]
	Kube(#[from] kube::Error),
}

/// How to reach the cluster.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
	/// Kubeconfig context; the current one (or in-cluster config) if unset.
	pub context: Option<String>,
	/// Namespace for namespaced objects that don't name one.
	pub namespace: Option<String>,
}

/// Represents a connection to a Kubernetes cluster.
#[derive(Clone)]
pub struct ClusterConnection {
	client: Client,
	server_version: Info,
	/// Human-readable identifier for the cluster (context name or API server URL).
	cluster_identifier: String,
}

impl std::fmt::Debug for ClusterConnection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ClusterConnection")
			.field("cluster_identifier", &self.cluster_identifier)
			.field("server_version", &self.server_version)
			.finish_non_exhaustive()
	}
}

impl ClusterConnection {
	/// Connect using the default kubeconfig, or the in-cluster service account
	/// when there is none and no context is requested.
	#[instrument(skip_all)]
	pub async fn connect(options: &ConnectOptions) -> Result<Self, ConnectionError> {
		if options.context.is_some() {
			let kubeconfig = Kubeconfig::read()?;
			return Self::from_kubeconfig(kubeconfig, options).await;
		}
		let config = Config::infer().await?;
		let identifier = config.cluster_url.to_string();
		Self::from_config(config, options, identifier).await
	}

	/// Connect using a provided kubeconfig.
	#[instrument(skip_all)]
	pub async fn from_kubeconfig(
		kubeconfig: Kubeconfig,
		options: &ConnectOptions,
	) -> Result<Self, ConnectionError> {
		if let Some(context) = &options.context {
			if !kubeconfig.contexts.iter().any(|c| &c.name == context) {
				return Err(ConnectionError::ContextNotFound(context.clone()));
			}
		}
		let identifier = options
			.context
			.clone()
			.or_else(|| kubeconfig.current_context.clone())
			.map_or_else(String::new, |c| format!("context:{c}"));

		let config = Config::from_custom_kubeconfig(
			kubeconfig,
			&KubeConfigOptions {
				context: options.context.clone(),
				..Default::default()
			},
		)
		.await?;
		Self::from_config(config, options, identifier).await
	}

	async fn from_config(
		mut config: Config,
		options: &ConnectOptions,
		cluster_identifier: String,
	) -> Result<Self, ConnectionError> {
		config.read_timeout = Some(DEFAULT_API_TIMEOUT);
		if let Some(namespace) = &options.namespace {
			config.default_namespace.clone_from(namespace);
		}
		let client = Client::try_from(config)?;
		let server_version = client.apiserver_version().await?;
		tracing::debug!(
			cluster = %cluster_identifier,
			version = %server_version.git_version,
			"connected"
		);

		Ok(Self {
			client,
			server_version,
			cluster_identifier,
		})
	}

	/// Get a reference to the underlying kube client.
	pub fn client(&self) -> &Client {
		&self.client
	}

	pub fn server_version(&self) -> &Info {
		&self.server_version
	}

	/// Namespace used for namespaced objects that don't name one.
	pub fn default_namespace(&self) -> &str {
		self.client.default_namespace()
	}

	pub fn cluster_identifier(&self) -> &str {
		&self.cluster_identifier
	}
}
