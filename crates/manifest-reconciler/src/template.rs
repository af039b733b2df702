//! Placeholder rendering of bundle files.
//!
//! Bundle files may reference operator parameters with Go text/template
//! syntax (`{{ .base_metrics_server_cpu }}`). Files without template markers
//! are passed through untouched.

use std::collections::{BTreeMap, HashMap};

use gtmpl::{Context, Template, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
	#[error("parsing template: {0}")]
	Parse(String),
	#[error("rendering template: {0}")]
	Render(String),
}

/// Values substituted into bundle files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateContext {
	values: BTreeMap<String, String>,
}

impl TemplateContext {
	pub fn new() -> Self {
		Self::default()
	}

	/// Insert a parameter. Dashes in the key become underscores so that
	/// `base-metrics-server-cpu` is addressable as `.base_metrics_server_cpu`.
	pub fn insert(&mut self, key: &str, value: impl Into<String>) {
		self.values.insert(key.replace('-', "_"), value.into());
	}

	pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
		self.insert(key, value);
		self
	}

	pub fn is_empty(&self) -> bool {
		self.values.is_empty()
	}

	fn to_gtmpl(&self) -> Value {
		let map: HashMap<String, Value> = self
			.values
			.iter()
			.map(|(k, v)| (k.clone(), Value::String(v.clone())))
			.collect();
		Value::Map(map)
	}
}

/// Render `content` against `context`.
pub fn render(content: &str, context: &TemplateContext) -> Result<String, TemplateError> {
	if !content.contains("{{") {
		return Ok(content.to_string());
	}

	let mut tmpl = Template::default();
	tmpl.parse(content)
		.map_err(|e| TemplateError::Parse(format!("{e:?}")))?;
	tmpl.render(&Context::from(context.to_gtmpl()))
		.map_err(|e| TemplateError::Render(format!("{e:?}")))
}
