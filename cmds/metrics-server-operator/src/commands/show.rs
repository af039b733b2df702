//! Show command handler.

use std::io::Write;

use anyhow::{Context, Result};
use clap::Args;
use manifest_reconciler::{declared_manifests, ManifestResource, MutationPipeline};
use serde_json::Value;
use tracing::instrument;

use super::GlobalArgs;
use crate::output::{manifests_to_yaml, write_json};

#[derive(Args, Debug, Default)]
pub struct ShowArgs {
	/// Only show this manifest file of the release (by name, e.g. `components`)
	#[arg(long)]
	pub manifest: Option<String>,

	/// Print a JSON array instead of a YAML stream
	#[arg(long)]
	pub json: bool,
}

/// Print the manifests the operator would apply, after every mutation.
#[instrument(skip_all)]
pub fn run<W: Write>(global: &GlobalArgs, args: ShowArgs, mut writer: W) -> Result<()> {
	let config = global.operator_config()?;
	let source = global.source();
	config
		.validate(&source.list_releases().context("reading manifest storage")?)
		.context("invalid configuration")?;

	let pipeline = MutationPipeline::standard(
		&global.app_name,
		config.registry().map(str::to_string),
		config.extra_args(),
	);
	let components: Vec<String> = args.manifest.into_iter().collect();
	let manifests = declared_manifests(&source, &config, &pipeline, &components)
		.context("rendering manifests")?;

	if args.json {
		let values: Vec<Value> = manifests.iter().map(ManifestResource::to_value).collect();
		write_json(&mut writer, &values)?;
	} else {
		let stream = manifests_to_yaml(&manifests).context("serializing manifests")?;
		writer.write_all(stream.as_bytes())?;
	}
	Ok(())
}
