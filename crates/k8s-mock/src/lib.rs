//! Mock Kubernetes clusters for testing.
//!
//! [`MockCluster`] implements the reconciler's cluster capability in memory.
//! [`HttpMockK8sServer`] serves a subset of the Kubernetes REST API over HTTP
//! so kubeconfig-based clients can be exercised end to end.

pub mod cluster;
pub mod discovery;
mod helpers;
pub mod http;

pub use cluster::{Call, Failure, MockCluster, Verb};
pub use discovery::{DiscoveryMode, MockApiResource, MockDiscovery};
pub use http::{HttpMockK8sServer, RunningHttpMockK8sServer};
