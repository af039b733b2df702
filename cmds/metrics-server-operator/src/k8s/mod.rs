//! Kubernetes client, discovery and the cluster API used by the engine.

pub mod api;
pub mod client;
pub mod discovery;

pub use api::{KubeCluster, KubeClusterError};
pub use client::{ClusterConnection, ConnectOptions, ConnectionError};

/// Whether a resource type lives in a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceScope {
	Namespaced,
	ClusterWide,
}
