//! Reconciliation of a metrics-server deployment against versioned upstream
//! manifest bundles.
//!
//! [`ManifestSource`] loads a release, [`MutationPipeline`] adapts every
//! document to the operator's configuration and [`ReconciliationEngine`]
//! diffs and applies the result through a [`ClusterApi`].

pub mod cluster;
pub mod config;
pub mod engine;
pub mod identity;
pub mod mutation;
pub mod policy;
pub mod release;
pub mod resource;
pub mod source;
pub mod template;

pub use cluster::{ApiError, ClusterApi, LabelSelector};
pub use config::{ConfigError, OperatorConfig};
pub use engine::{
	declared_manifests, PassState, ReconcileError, ReconciliationEngine, ResourceDiff,
	WorkloadStatus, DEFAULT_APP_NAME,
};
pub use identity::{NamespaceKind, ResourceIdentity};
pub use mutation::MutationPipeline;
pub use policy::DeletionPolicy;
pub use release::Release;
pub use resource::ManifestResource;
pub use source::{ManifestSource, SourceError};
pub use template::TemplateContext;
