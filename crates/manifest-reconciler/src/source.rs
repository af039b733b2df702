//! Versioned manifest bundles on disk.
//!
//! Layout:
//!
//! ```text
//! <root>/version                      latest release, single line
//! <root>/manifests/<release>/*.yaml   multi-document YAML streams
//! ```

use std::{
	collections::{BTreeMap, BTreeSet, HashSet},
	fs,
	path::{Path, PathBuf},
};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::{
	config::OperatorConfig,
	identity::NamespaceKind,
	release::{image_references, Release},
	resource::ManifestResource,
	template::{self, TemplateContext, TemplateError},
};

/// Declared resources bucketed by `(kind, namespace)`.
pub type GroupedResources = BTreeMap<NamespaceKind, BTreeSet<ManifestResource>>;

#[derive(Debug, Error)]
pub enum SourceError {
	#[error("reading {}", path.display())]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("version file {} is empty", path.display())]
	EmptyVersion { path: PathBuf },

	#[error("release `{0}` not found in manifest storage")]
	UnknownRelease(String),

	#[error("rendering {}", path.display())]
	Template {
		path: PathBuf,
		#[source]
		source: TemplateError,
	},

	/// Malformed YAML stream.
	#[error("parsing {}: {message}", path.display())]
	Parse { path: PathBuf, message: String },

	/// Well-formed YAML that isn't a Kubernetes object.
	#[error("document {index} of {}: {message}", path.display())]
	InvalidDocument {
		path: PathBuf,
		index: usize,
		message: String,
	},
}

/// A document together with where it came from.
#[derive(Debug, Clone)]
pub struct SourceDocument {
	pub path: PathBuf,
	pub index: usize,
	pub value: Value,
}

#[derive(Debug, Clone)]
pub struct ManifestSource {
	root: PathBuf,
}

impl ManifestSource {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	fn manifests_dir(&self) -> PathBuf {
		self.root.join("manifests")
	}

	fn release_dir(&self, release: &str) -> PathBuf {
		self.manifests_dir().join(release)
	}

	/// Latest release, as recorded in the `version` file.
	pub fn latest_version(&self) -> Result<String, SourceError> {
		let path = self.root.join("version");
		let content = read(&path)?;
		let version = content.trim();
		if version.is_empty() {
			return Err(SourceError::EmptyVersion { path });
		}
		Ok(version.to_string())
	}

	/// All release identifiers in storage, sorted lexically.
	pub fn list_releases(&self) -> Result<Vec<String>, SourceError> {
		let dir = self.manifests_dir();
		let entries = fs::read_dir(&dir).map_err(|source| SourceError::Io {
			path: dir.clone(),
			source,
		})?;

		let mut releases = Vec::new();
		for entry in entries {
			let entry = entry.map_err(|source| SourceError::Io {
				path: dir.clone(),
				source,
			})?;
			if entry.path().is_dir() {
				releases.push(entry.file_name().to_string_lossy().into_owned());
			}
		}
		releases.sort();
		Ok(releases)
	}

	/// Releases in storage with the summed size of their manifest files.
	pub fn local_releases(&self) -> Result<HashSet<Release>, SourceError> {
		let mut releases = HashSet::new();
		for name in self.list_releases()? {
			let mut size = 0;
			for file in self.manifest_files(&name, &[])? {
				size += fs::metadata(&file)
					.map_err(|source| SourceError::Io {
						path: file.clone(),
						source,
					})?
					.len();
			}
			releases.insert(Release::new(name.clone(), self.release_dir(&name), size));
		}
		Ok(releases)
	}

	/// The configured release, or the latest one if none is configured.
	pub fn current_release(&self, config: &OperatorConfig) -> Result<String, SourceError> {
		match config.release() {
			Some(release) => Ok(release.to_string()),
			None => self.latest_version(),
		}
	}

	/// YAML files of a release, sorted by path. `components` selects files by
	/// stem (`components` for `components.yaml`); empty selects every file.
	pub fn manifest_files(
		&self,
		release: &str,
		components: &[String],
	) -> Result<Vec<PathBuf>, SourceError> {
		let dir = self.release_dir(release);
		if !dir.is_dir() {
			return Err(SourceError::UnknownRelease(release.to_string()));
		}
		let entries = fs::read_dir(&dir).map_err(|source| SourceError::Io {
			path: dir.clone(),
			source,
		})?;

		let mut files = Vec::new();
		for entry in entries {
			let path = entry
				.map_err(|source| SourceError::Io {
					path: dir.clone(),
					source,
				})?
				.path();
			let is_yaml = path
				.extension()
				.is_some_and(|ext| ext == "yaml" || ext == "yml");
			let selected = components.is_empty()
				|| path
					.file_stem()
					.is_some_and(|stem| components.iter().any(|c| stem == c.as_str()));
			if is_yaml && selected {
				files.push(path);
			}
		}
		files.sort();
		Ok(files)
	}

	/// Render and parse every document of the selected files.
	///
	/// A malformed document fails the whole load; nothing partial is returned.
	#[instrument(skip(self, context))]
	pub fn load_documents(
		&self,
		release: &str,
		components: &[String],
		context: &TemplateContext,
	) -> Result<Vec<SourceDocument>, SourceError> {
		let mut documents = Vec::new();
		for path in self.manifest_files(release, components)? {
			let content = read(&path)?;
			let rendered =
				template::render(&content, context).map_err(|source| SourceError::Template {
					path: path.clone(),
					source,
				})?;
			let values = parse_documents(&rendered, &path)?;
			debug!(path = %path.display(), documents = values.len(), "parsed manifest file");
			documents.extend(
				values
					.into_iter()
					.enumerate()
					.map(|(index, value)| SourceDocument {
						path: path.clone(),
						index,
						value,
					}),
			);
		}
		Ok(documents)
	}

	/// Parsed resources of a release, grouped by `(kind, namespace)`.
	pub fn load_resources(
		&self,
		release: &str,
		components: &[String],
		context: &TemplateContext,
	) -> Result<GroupedResources, SourceError> {
		let documents = self.load_documents(release, components, context)?;
		Ok(group(expand(documents)?))
	}

	/// Container images referenced by a release.
	pub fn images(&self, release: &str) -> Result<Vec<String>, SourceError> {
		let mut images = BTreeSet::new();
		for path in self.manifest_files(release, &[])? {
			let content = read(&path)?;
			images.extend(image_references(&content).map(str::to_string));
		}
		Ok(images.into_iter().collect())
	}
}

fn read(path: &Path) -> Result<String, SourceError> {
	fs::read_to_string(path).map_err(|source| SourceError::Io {
		path: path.to_path_buf(),
		source,
	})
}

/// Parse a multi-document YAML stream, dropping empty documents.
pub fn parse_documents(content: &str, path: &Path) -> Result<Vec<Value>, SourceError> {
	let options = serde_saphyr::Options {
		legacy_octal_numbers: true,
		budget: None, // Bundles are trusted input
		..Default::default()
	};
	let documents: Vec<Value> = serde_saphyr::from_multiple_with_options(content, options)
		.map_err(|e| SourceError::Parse {
			path: path.to_path_buf(),
			message: e.to_string(),
		})?;
	Ok(documents.into_iter().filter(|v| !v.is_null()).collect())
}

/// Turn documents into resources, replacing every `List` by its items.
pub fn expand(documents: Vec<SourceDocument>) -> Result<Vec<ManifestResource>, SourceError> {
	let mut resources = Vec::with_capacity(documents.len());
	for SourceDocument { path, index, value } in documents {
		let invalid = |message: String| SourceError::InvalidDocument {
			path: path.clone(),
			index,
			message,
		};
		if !value.is_object() {
			return Err(invalid("not a mapping".to_string()));
		}
		if value.get("kind").and_then(Value::as_str) == Some("List") {
			let Some(Value::Array(items)) = value.get("items") else {
				return Err(invalid("List without items".to_string()));
			};
			for item in items {
				resources.push(
					ManifestResource::from_value(item.clone())
						.map_err(|e| invalid(e.to_string()))?,
				);
			}
		} else {
			resources.push(ManifestResource::from_value(value).map_err(|e| invalid(e.to_string()))?);
		}
	}
	Ok(resources)
}

/// Bucket resources by `(kind, namespace)`.
pub fn group(resources: impl IntoIterator<Item = ManifestResource>) -> GroupedResources {
	let mut grouped = GroupedResources::new();
	for resource in resources {
		grouped.entry(resource.group()).or_default().insert(resource);
	}
	grouped
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;
	use indoc::indoc;

	use super::*;

	const COMPONENTS: &str = indoc! {r#"
		apiVersion: v1
		kind: ServiceAccount
		metadata:
		  name: metrics-server
		  namespace: kube-system
		---
		apiVersion: v1
		kind: List
		items:
		- apiVersion: v1
		  kind: Service
		  metadata:
		    name: metrics-server
		    namespace: kube-system
		- apiVersion: rbac.authorization.k8s.io/v1
		  kind: ClusterRole
		  metadata:
		    name: system:metrics-server
		---
		---
		apiVersion: v1
		kind: ServiceAccount
		metadata:
		  name: other
		  namespace: kube-system
	"#};

	fn storage() -> tempfile::TempDir {
		let dir = tempfile::tempdir().unwrap();
		for (release, content) in [("v0.5.2", "kind: Namespace\nmetadata:\n  name: x\n"), ("v0.6.0", COMPONENTS)] {
			let release_dir = dir.path().join("manifests").join(release);
			fs::create_dir_all(&release_dir).unwrap();
			fs::write(release_dir.join("components.yaml"), content).unwrap();
		}
		fs::write(dir.path().join("manifests/v0.6.0/README.md"), "not a manifest").unwrap();
		fs::write(dir.path().join("version"), "v0.6.0\n").unwrap();
		dir
	}

	#[test]
	fn test_releases_and_version() {
		let dir = storage();
		let source = ManifestSource::new(dir.path());

		assert_eq!(source.list_releases().unwrap(), ["v0.5.2", "v0.6.0"]);
		assert_eq!(source.latest_version().unwrap(), "v0.6.0");
		assert_eq!(source.local_releases().unwrap().len(), 2);

		assert_eq!(
			source.current_release(&OperatorConfig::default()).unwrap(),
			"v0.6.0"
		);
		let pinned = OperatorConfig {
			release: Some("v0.5.2".into()),
			..Default::default()
		};
		assert_eq!(source.current_release(&pinned).unwrap(), "v0.5.2");
	}

	#[test]
	fn test_load_expands_lists_and_groups() {
		let dir = storage();
		let source = ManifestSource::new(dir.path());
		let grouped = source
			.load_resources("v0.6.0", &[], &TemplateContext::new())
			.unwrap();

		let sa = NamespaceKind::new("ServiceAccount", Some("kube-system".into()));
		let role = NamespaceKind::new("ClusterRole", None);
		assert_eq!(grouped.len(), 3);
		assert_eq!(grouped[&sa].len(), 2);
		assert_eq!(grouped[&role].len(), 1);
		assert!(!grouped.keys().any(|k| k.kind == "List"));
	}

	#[test]
	fn test_component_selection() {
		let dir = storage();
		let source = ManifestSource::new(dir.path());
		assert_eq!(
			source
				.manifest_files("v0.6.0", &["components".to_string()])
				.unwrap()
				.len(),
			1
		);
		assert!(source
			.manifest_files("v0.6.0", &["aggregated".to_string()])
			.unwrap()
			.is_empty());
		assert_matches!(
			source.manifest_files("v9.9.9", &[]),
			Err(SourceError::UnknownRelease(r)) if r == "v9.9.9"
		);
	}

	#[test]
	fn test_malformed_document_fails_load() {
		let dir = storage();
		fs::write(
			dir.path().join("manifests/v0.6.0/broken.yaml"),
			"kind: Service\nmetadata: [unclosed\n",
		)
		.unwrap();
		let source = ManifestSource::new(dir.path());

		assert_matches!(
			source.load_resources("v0.6.0", &[], &TemplateContext::new()),
			Err(SourceError::Parse { path, .. }) if path.ends_with("broken.yaml")
		);
	}

	#[cfg(unix)]
	#[test]
	fn test_unreadable_file_fails_load() {
		let dir = storage();
		let dangling = dir.path().join("manifests/v0.6.0/aggregated.yaml");
		std::os::unix::fs::symlink(dir.path().join("gone.yaml"), &dangling).unwrap();
		let source = ManifestSource::new(dir.path());

		assert_eq!(source.manifest_files("v0.6.0", &[]).unwrap().len(), 2);
		assert_matches!(
			source.load_resources("v0.6.0", &[], &TemplateContext::new()),
			Err(SourceError::Io { path, .. }) if path == dangling
		);
	}

	#[test]
	fn test_document_without_kind_is_invalid() {
		let dir = storage();
		fs::write(
			dir.path().join("manifests/v0.6.0/z.yaml"),
			"metadata:\n  name: nameless\n",
		)
		.unwrap();
		let source = ManifestSource::new(dir.path());

		assert_matches!(
			source.load_resources("v0.6.0", &[], &TemplateContext::new()),
			Err(SourceError::InvalidDocument { index: 0, .. })
		);
	}

	#[test]
	fn test_empty_version_file() {
		let dir = storage();
		fs::write(dir.path().join("version"), "\n").unwrap();
		assert_matches!(
			ManifestSource::new(dir.path()).latest_version(),
			Err(SourceError::EmptyVersion { .. })
		);
	}
}
