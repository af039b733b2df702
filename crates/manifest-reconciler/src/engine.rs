//! Diff-and-apply orchestration.
//!
//! A pass loads the declared resources of the current release, runs them
//! through the mutation pipeline and then talks to the cluster. Nothing is
//! cached between passes: the declared set is recomputed and live state is
//! queried fresh every time.

use std::{
	collections::{BTreeMap, BTreeSet},
	error::Error as StdError,
	fmt,
};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::{
	cluster::{ApiError, ClusterApi, LabelSelector},
	config::{ConfigError, OperatorConfig},
	identity::{NamespaceKind, ResourceIdentity},
	mutation::MutationPipeline,
	policy::DeletionPolicy,
	resource::ManifestResource,
	source::{self, GroupedResources, ManifestSource, SourceDocument, SourceError},
};

/// Field manager and ownership label used when none is configured.
pub const DEFAULT_APP_NAME: &str = "metrics-server-operator";

/// Identities bucketed by `(kind, namespace)`.
pub type IdentityGroups = BTreeMap<NamespaceKind, BTreeSet<ResourceIdentity>>;

#[derive(Debug, Error)]
pub enum ReconcileError {
	#[error("invalid configuration")]
	Config(#[from] ConfigError),

	#[error("loading manifests")]
	Source(#[from] SourceError),

	#[error("listing {group}")]
	List {
		group: NamespaceKind,
		#[source]
		source: ApiError,
	},

	#[error("looking up {resource}")]
	Lookup {
		resource: ResourceIdentity,
		#[source]
		source: ApiError,
	},

	#[error("applying {resource}")]
	Apply {
		resource: ResourceIdentity,
		#[source]
		source: ApiError,
	},

	#[error("deleting {resource}")]
	Delete {
		resource: ResourceIdentity,
		#[source]
		source: ApiError,
	},
}

/// Where the engine is in its lifecycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "kebab-case")]
pub enum PassState {
	#[default]
	Idle,
	Evaluating,
	Applying,
	Settled,
	/// A pass stopped on a failure; the next pass starts over.
	Blocked(String),
	Cleaning,
	Removed,
}

impl fmt::Display for PassState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Idle => f.write_str("idle"),
			Self::Evaluating => f.write_str("evaluating"),
			Self::Applying => f.write_str("applying"),
			Self::Settled => f.write_str("settled"),
			Self::Blocked(reason) => write!(f, "blocked: {reason}"),
			Self::Cleaning => f.write_str("cleaning"),
			Self::Removed => f.write_str("removed"),
		}
	}
}

/// Operator-facing summary of the workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "message", rename_all = "kebab-case")]
pub enum WorkloadStatus {
	Active(String),
	Waiting(String),
	Blocked(String),
	Maintenance(String),
}

impl fmt::Display for WorkloadStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let (status, message) = match self {
			Self::Active(m) => ("active", m),
			Self::Waiting(m) => ("waiting", m),
			Self::Blocked(m) => ("blocked", m),
			Self::Maintenance(m) => ("maintenance", m),
		};
		write!(f, "{status}: {message}")
	}
}

/// Classification of resources after comparing live against expected state.
///
/// `correct` are labeled and declared, `extra` are labeled but no longer
/// declared (or gone), `missing` are declared and present but not labeled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResourceDiff {
	pub correct: BTreeSet<ResourceIdentity>,
	pub extra: BTreeSet<ResourceIdentity>,
	pub missing: BTreeSet<ResourceIdentity>,
}

impl ResourceDiff {
	/// Fold one group into the diff.
	pub fn add_group(
		&mut self,
		live: &BTreeSet<ResourceIdentity>,
		expected: &BTreeSet<ResourceIdentity>,
	) {
		self.correct.extend(live.intersection(expected).cloned());
		self.extra.extend(live.difference(expected).cloned());
		self.missing.extend(expected.difference(live).cloned());
	}

	pub fn is_converged(&self) -> bool {
		self.extra.is_empty() && self.missing.is_empty()
	}
}

/// Render an error with its causes, outermost first.
pub fn error_chain(err: &dyn StdError) -> String {
	let mut message = err.to_string();
	let mut source = err.source();
	while let Some(cause) = source {
		message.push_str(": ");
		message.push_str(&cause.to_string());
		source = cause.source();
	}
	message
}

/// Render the configured release of `source` and run every document through
/// `pipeline`. Needs no cluster.
pub fn declared_manifests(
	source: &ManifestSource,
	config: &OperatorConfig,
	pipeline: &MutationPipeline,
	components: &[String],
) -> Result<Vec<ManifestResource>, ReconcileError> {
	let release = source.current_release(config)?;
	let mut documents =
		source.load_documents(&release, components, &config.template_context())?;
	for SourceDocument { value, .. } in &mut documents {
		pipeline.apply(value);
	}
	let ordered = source::expand(documents)?;
	debug!(%release, resources = ordered.len(), "computed declared resources");
	Ok(ordered)
}

/// Declared resources of a pass, in document order and grouped.
#[derive(Debug, Default)]
struct Declared {
	ordered: Vec<ManifestResource>,
	grouped: GroupedResources,
}

pub struct ReconciliationEngine<C> {
	cluster: C,
	source: ManifestSource,
	config: OperatorConfig,
	app_name: String,
	components: Vec<String>,
	pipeline: MutationPipeline,
	state: PassState,
}

impl<C: ClusterApi> ReconciliationEngine<C> {
	/// Engine running the standard pipeline for `config`.
	pub fn new(
		cluster: C,
		source: ManifestSource,
		config: OperatorConfig,
		app_name: impl Into<String>,
	) -> Self {
		let app_name = app_name.into();
		let pipeline = MutationPipeline::standard(
			&app_name,
			config.registry().map(str::to_string),
			config.extra_args(),
		);
		Self::with_pipeline(cluster, source, config, app_name, pipeline)
	}

	pub fn with_pipeline(
		cluster: C,
		source: ManifestSource,
		config: OperatorConfig,
		app_name: impl Into<String>,
		pipeline: MutationPipeline,
	) -> Self {
		Self {
			cluster,
			source,
			config,
			app_name: app_name.into(),
			components: Vec::new(),
			pipeline,
			state: PassState::Idle,
		}
	}

	/// Restrict the engine to some manifest files of the release, by stem.
	#[must_use]
	pub fn with_components(mut self, components: Vec<String>) -> Self {
		self.components = components;
		self
	}

	pub fn state(&self) -> &PassState {
		&self.state
	}

	pub fn app_name(&self) -> &str {
		&self.app_name
	}

	pub fn config(&self) -> &OperatorConfig {
		&self.config
	}

	pub fn source(&self) -> &ManifestSource {
		&self.source
	}

	pub fn cluster(&self) -> &C {
		&self.cluster
	}

	/// The active release identifier.
	pub fn current_version(&self) -> Result<String, ReconcileError> {
		Ok(self.source.current_release(&self.config)?)
	}

	fn owner_selector(&self) -> LabelSelector {
		LabelSelector::new().with(self.app_name.clone(), "true")
	}

	/// Declared resources, with namespaced objects that name no namespace
	/// placed where the cluster would put them.
	fn declared(&self) -> Result<Declared, ReconcileError> {
		let mut ordered =
			declared_manifests(&self.source, &self.config, &self.pipeline, &self.components)?;
		for resource in &mut ordered {
			if resource.metadata.namespace.is_none() {
				resource.metadata.namespace = self.cluster.default_namespace(&resource.kind);
			}
		}
		let grouped = source::group(ordered.iter().cloned());
		Ok(Declared { ordered, grouped })
	}

	/// Mutated resources of the current release, in document order.
	pub fn manifests(&self) -> Result<Vec<ManifestResource>, ReconcileError> {
		Ok(self.declared()?.ordered)
	}

	#[instrument(skip(self))]
	pub fn declared_resources(&self) -> Result<IdentityGroups, ReconcileError> {
		Ok(identities(&self.declared()?.grouped))
	}

	/// Labeled resources per declared group. A group is queried in the
	/// namespace of its first declared resource; empty groups are skipped.
	#[instrument(skip(self))]
	pub fn live_resources(&self) -> Result<IdentityGroups, ReconcileError> {
		let declared = self.declared()?;
		let mut live = IdentityGroups::new();
		for (group, resources) in &declared.grouped {
			if let Some(found) = self.live_group(group, resources)? {
				live.insert(group.clone(), found);
			}
		}
		Ok(live)
	}

	fn live_group(
		&self,
		group: &NamespaceKind,
		resources: &BTreeSet<ManifestResource>,
	) -> Result<Option<BTreeSet<ResourceIdentity>>, ReconcileError> {
		let Some(first) = resources.first() else {
			return Ok(None);
		};
		let found = self
			.cluster
			.list(
				&group.kind,
				first.metadata.namespace.as_deref(),
				&self.owner_selector(),
			)
			.map_err(|source| ReconcileError::List {
				group: group.clone(),
				source,
			})?;
		Ok(Some(found.iter().map(ManifestResource::identity).collect()))
	}

	fn lookup(&self, resource: &ManifestResource) -> Result<Option<ManifestResource>, ReconcileError> {
		self.cluster
			.get(
				&resource.kind,
				&resource.metadata.name,
				resource.metadata.namespace.as_deref(),
			)
			.map_err(|source| ReconcileError::Lookup {
				resource: resource.identity(),
				source,
			})
	}

	fn expected_group(
		&self,
		resources: &BTreeSet<ManifestResource>,
	) -> Result<BTreeSet<ResourceIdentity>, ReconcileError> {
		let mut expected = BTreeSet::new();
		for resource in resources {
			if self.lookup(resource)?.is_some() {
				expected.insert(resource.identity());
			}
		}
		Ok(expected)
	}

	/// Declared identities that currently exist in the cluster.
	#[instrument(skip(self))]
	pub fn expected_resources(&self) -> Result<IdentityGroups, ReconcileError> {
		let declared = self.declared()?;
		let mut expected = IdentityGroups::new();
		for (group, resources) in &declared.grouped {
			expected.insert(group.clone(), self.expected_group(resources)?);
		}
		Ok(expected)
	}

	/// Compare live and expected state, optionally only for groups whose
	/// kind matches `kind_filter` (case-insensitive).
	#[instrument(skip(self))]
	pub fn diff(&self, kind_filter: Option<&str>) -> Result<ResourceDiff, ReconcileError> {
		let declared = self.declared()?;
		let mut diff = ResourceDiff::default();
		for (group, resources) in &declared.grouped {
			if kind_filter.is_some_and(|kind| !group.matches_kind(kind)) {
				continue;
			}
			let Some(live) = self.live_group(group, resources)? else {
				continue;
			};
			let expected = self.expected_group(resources)?;
			diff.add_group(&live, &expected);
		}
		info!(
			correct = diff.correct.len(),
			extra = diff.extra.len(),
			missing = diff.missing.len(),
			"computed resource diff"
		);
		Ok(diff)
	}

	fn apply_resource(&self, resource: &ManifestResource) -> Result<(), ReconcileError> {
		info!(resource = %resource.identity(), "applying");
		let result = self.cluster.apply(resource, &self.app_name, false);
		DeletionPolicy::STRICT
			.check(result)
			.map_err(|source| ReconcileError::Apply {
				resource: resource.identity(),
				source,
			})?;
		Ok(())
	}

	/// Apply every declared resource, stopping at the first failure.
	#[instrument(skip(self))]
	pub fn apply(&self) -> Result<(), ReconcileError> {
		for resource in &self.declared()?.ordered {
			self.apply_resource(resource)?;
		}
		Ok(())
	}

	/// Delete `resources`, tolerating the failures the flags allow.
	#[instrument(skip(self, resources))]
	pub fn delete<'a>(
		&self,
		resources: impl IntoIterator<Item = &'a ResourceIdentity>,
		ignore_not_found: bool,
		ignore_unauthorized: bool,
	) -> Result<(), ReconcileError> {
		let policy = DeletionPolicy::new(ignore_not_found, ignore_unauthorized);
		for resource in resources {
			info!(%resource, "deleting");
			let result =
				self.cluster
					.delete(resource.kind(), resource.name(), resource.namespace());
			policy
				.check(result)
				.map_err(|source| ReconcileError::Delete {
					resource: resource.clone(),
					source,
				})?;
		}
		Ok(())
	}

	/// Live objects of declared resources that report conditions.
	#[instrument(skip(self))]
	pub fn status_summary(&self) -> Result<Vec<ManifestResource>, ReconcileError> {
		let mut tracked = Vec::new();
		for resource in &self.declared()?.ordered {
			if let Some(live) = self.lookup(resource)? {
				if !live.conditions().is_empty() {
					tracked.push(live);
				}
			}
		}
		Ok(tracked)
	}

	fn block<T>(&mut self, result: Result<T, ReconcileError>) -> Result<T, ReconcileError> {
		if let Err(err) = &result {
			let reason = error_chain(err);
			warn!(%reason, "pass blocked");
			self.state = PassState::Blocked(reason);
		}
		result
	}

	fn evaluate(&self) -> Result<Declared, ReconcileError> {
		self.config.validate(&self.source.list_releases()?)?;
		self.declared()
	}

	/// One full pass: validate, compute the declared set and apply it.
	#[instrument(skip(self), fields(app = %self.app_name))]
	pub fn reconcile(&mut self) -> Result<(), ReconcileError> {
		self.state = PassState::Evaluating;
		let declared = self.evaluate();
		let declared = self.block(declared)?;

		self.state = PassState::Applying;
		let applied = declared
			.ordered
			.iter()
			.try_for_each(|resource| self.apply_resource(resource));
		self.block(applied)?;

		self.state = PassState::Settled;
		info!(resources = declared.ordered.len(), "pass settled");
		Ok(())
	}

	/// Tear down every declared resource, in reverse document order.
	#[instrument(skip(self), fields(app = %self.app_name))]
	pub fn remove(&mut self) -> Result<(), ReconcileError> {
		self.state = PassState::Cleaning;
		let declared = self.declared();
		let declared = self.block(declared)?;

		let identities: Vec<ResourceIdentity> = declared
			.ordered
			.iter()
			.rev()
			.map(ManifestResource::identity)
			.collect();
		let deleted = self.delete(&identities, true, true);
		self.block(deleted)?;

		self.state = PassState::Removed;
		Ok(())
	}

	/// Delete labeled resources that are no longer expected, then re-diff.
	#[instrument(skip(self))]
	pub fn scrub(&self, kind_filter: Option<&str>) -> Result<ResourceDiff, ReconcileError> {
		let diff = self.diff(kind_filter)?;
		self.delete(&diff.extra, true, false)?;
		self.diff(kind_filter)
	}

	/// Apply declared resources that exist without the ownership label, then
	/// re-diff.
	#[instrument(skip(self))]
	pub fn sync(&self, kind_filter: Option<&str>) -> Result<ResourceDiff, ReconcileError> {
		let diff = self.diff(kind_filter)?;
		if !diff.missing.is_empty() {
			for resource in &self.declared()?.ordered {
				if diff.missing.contains(&resource.identity()) {
					self.apply_resource(resource)?;
				}
			}
		}
		self.diff(kind_filter)
	}

	/// Status to report for the workload.
	pub fn workload_status(&self) -> WorkloadStatus {
		match &self.state {
			PassState::Cleaning | PassState::Removed => {
				return WorkloadStatus::Maintenance("Shutting down".to_string())
			}
			PassState::Blocked(reason) => return WorkloadStatus::Blocked(reason.clone()),
			_ => {}
		}

		let tracked = match self.status_summary() {
			Ok(tracked) => tracked,
			Err(err) => {
				warn!(error = %error_chain(&err), "failed to read workload status");
				return WorkloadStatus::Waiting("Waiting for API server".to_string());
			}
		};
		let not_ready: Vec<String> = tracked
			.iter()
			.filter(|r| !r.is_ready())
			.map(|r| r.identity().to_string())
			.collect();
		if not_ready.is_empty() {
			WorkloadStatus::Active("Ready".to_string())
		} else {
			WorkloadStatus::Waiting(format!("Not ready: {}", not_ready.join(", ")))
		}
	}
}

fn identities(grouped: &GroupedResources) -> IdentityGroups {
	grouped
		.iter()
		.map(|(group, resources)| {
			(
				group.clone(),
				resources.iter().map(ManifestResource::identity).collect(),
			)
		})
		.collect()
}
