//! Operator configuration.
//!
//! Options are read from an optional YAML file and overlaid with values given
//! on the command line. Unset or empty options fall back to documented
//! defaults (latest release, no registry override, no extra flags).

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::template::TemplateContext;

/// Keys forwarded to bundle templates.
pub const TEMPLATE_PARAMETERS: [&str; 4] = [
	"base-metrics-server-cpu",
	"base-metrics-server-memory",
	"metrics-server-memory-per-node",
	"metrics-server-min-cluster-size",
];

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read config file {path}")]
	Read {
		path: String,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to parse config file {path}")]
	Parse {
		path: String,
		#[source]
		source: serde_yaml_with_quirks::Error,
	},

	#[error("release `{release}` is not available, expected one of: {}", .available.join(", "))]
	UnknownRelease {
		release: String,
		available: Vec<String>,
	},

	#[error("registry-server `{0}` must be a bare registry host with an optional path")]
	InvalidRegistry(String),

	#[error("extra-args entry `{0}` is not a flag")]
	InvalidExtraArg(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct OperatorConfig {
	/// Manifest release to deploy, empty for the latest one.
	#[serde(default)]
	pub release: Option<String>,

	/// Image registry replacing the upstream one.
	#[serde(default)]
	pub registry_server: Option<String>,

	/// Whitespace separated flags merged into the metrics-server container.
	#[serde(default)]
	pub extra_args: Option<String>,

	#[serde(default)]
	pub base_metrics_server_cpu: Option<String>,
	#[serde(default)]
	pub base_metrics_server_memory: Option<String>,
	#[serde(default)]
	pub metrics_server_memory_per_node: Option<String>,
	#[serde(default)]
	pub metrics_server_min_cluster_size: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
	value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl OperatorConfig {
	pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
		let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
			path: path.display().to_string(),
			source,
		})?;
		serde_yaml_with_quirks::from_str(&content).map_err(|source| ConfigError::Parse {
			path: path.display().to_string(),
			source,
		})
	}

	/// Overlay `other` on top of this config; set, non-empty values win.
	pub fn merge_from(&mut self, other: &OperatorConfig) {
		fn overlay(target: &mut Option<String>, value: &Option<String>) {
			if non_empty(value).is_some() {
				target.clone_from(value);
			}
		}
		overlay(&mut self.release, &other.release);
		overlay(&mut self.registry_server, &other.registry_server);
		overlay(&mut self.extra_args, &other.extra_args);
		overlay(&mut self.base_metrics_server_cpu, &other.base_metrics_server_cpu);
		overlay(
			&mut self.base_metrics_server_memory,
			&other.base_metrics_server_memory,
		);
		overlay(
			&mut self.metrics_server_memory_per_node,
			&other.metrics_server_memory_per_node,
		);
		overlay(
			&mut self.metrics_server_min_cluster_size,
			&other.metrics_server_min_cluster_size,
		);
	}

	pub fn release(&self) -> Option<&str> {
		non_empty(&self.release)
	}

	pub fn registry(&self) -> Option<&str> {
		non_empty(&self.registry_server)
	}

	pub fn extra_args(&self) -> Option<&str> {
		non_empty(&self.extra_args)
	}

	fn template_value(&self, key: &str) -> Option<&str> {
		let value = match key {
			"base-metrics-server-cpu" => &self.base_metrics_server_cpu,
			"base-metrics-server-memory" => &self.base_metrics_server_memory,
			"metrics-server-memory-per-node" => &self.metrics_server_memory_per_node,
			"metrics-server-min-cluster-size" => &self.metrics_server_min_cluster_size,
			_ => return None,
		};
		non_empty(value)
	}

	/// Parameters handed to bundle templates.
	pub fn template_context(&self) -> TemplateContext {
		let mut ctx = TemplateContext::new();
		for key in TEMPLATE_PARAMETERS {
			if let Some(value) = self.template_value(key) {
				ctx.insert(key, value);
			}
		}
		ctx
	}

	/// Check the config against the releases present in storage.
	pub fn validate(&self, available_releases: &[String]) -> Result<(), ConfigError> {
		if let Some(release) = self.release() {
			if !available_releases.iter().any(|r| r == release) {
				return Err(ConfigError::UnknownRelease {
					release: release.to_string(),
					available: available_releases.to_vec(),
				});
			}
		}
		if let Some(registry) = self.registry() {
			if registry.contains("://") || registry.chars().any(char::is_whitespace) {
				return Err(ConfigError::InvalidRegistry(registry.to_string()));
			}
		}
		if let Some(extra_args) = self.extra_args() {
			if let Some(arg) = extra_args.split_whitespace().find(|a| !a.starts_with('-')) {
				return Err(ConfigError::InvalidExtraArg(arg.to_string()));
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use assert_matches::assert_matches;
	use indoc::indoc;

	use super::*;

	fn releases() -> Vec<String> {
		vec!["v0.5.2".to_string(), "v0.6.0".to_string()]
	}

	#[test]
	fn test_load_from_file() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		file.write_all(
			indoc! {r#"
				release: v0.6.0
				registry-server: my.server:443/library
				extra-args: --kubelet-insecure-tls
				base-metrics-server-cpu: 40m
			"#}
			.as_bytes(),
		)
		.unwrap();

		let config = OperatorConfig::load_from_file(file.path()).unwrap();
		assert_eq!(config.release(), Some("v0.6.0"));
		assert_eq!(config.registry(), Some("my.server:443/library"));
		assert_eq!(config.extra_args(), Some("--kubelet-insecure-tls"));
		assert_eq!(
			config.template_context(),
			TemplateContext::new().with("base-metrics-server-cpu", "40m")
		);
	}

	#[test]
	fn test_load_rejects_unknown_keys() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		file.write_all(b"relase: v0.6.0\n").unwrap();
		assert_matches!(
			OperatorConfig::load_from_file(file.path()),
			Err(ConfigError::Parse { .. })
		);
	}

	#[test]
	fn test_merge_prefers_non_empty_overrides() {
		let mut base = OperatorConfig {
			release: Some("v0.5.2".into()),
			registry_server: Some("my.server".into()),
			..Default::default()
		};
		base.merge_from(&OperatorConfig {
			release: Some("v0.6.0".into()),
			registry_server: Some(String::new()),
			extra_args: Some("--a".into()),
			..Default::default()
		});

		assert_eq!(base.release(), Some("v0.6.0"));
		assert_eq!(base.registry(), Some("my.server"));
		assert_eq!(base.extra_args(), Some("--a"));
	}

	#[test]
	fn test_empty_values_mean_unset() {
		let config = OperatorConfig {
			release: Some("  ".into()),
			extra_args: Some(String::new()),
			..Default::default()
		};
		assert_eq!(config.release(), None);
		assert_eq!(config.extra_args(), None);
		assert!(config.validate(&releases()).is_ok());
	}

	#[test]
	fn test_validate() {
		let unknown = OperatorConfig {
			release: Some("v9.9.9".into()),
			..Default::default()
		};
		assert_matches!(
			unknown.validate(&releases()),
			Err(ConfigError::UnknownRelease { release, .. }) if release == "v9.9.9"
		);

		let registry = OperatorConfig {
			registry_server: Some("https://my.server".into()),
			..Default::default()
		};
		assert_matches!(
			registry.validate(&releases()),
			Err(ConfigError::InvalidRegistry(_))
		);

		let args = OperatorConfig {
			extra_args: Some("--a=1 oops".into()),
			..Default::default()
		};
		assert_matches!(
			args.validate(&releases()),
			Err(ConfigError::InvalidExtraArg(arg)) if arg == "oops"
		);
	}
}
