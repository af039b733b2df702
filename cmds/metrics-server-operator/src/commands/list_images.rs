//! List-images command handler.

use std::io::Write;

use anyhow::{Context, Result};
use clap::Args;

use super::GlobalArgs;
use crate::output::write_json;

#[derive(Args, Debug, Default)]
pub struct ListImagesArgs {
	/// Print JSON instead of one image per line
	#[arg(long)]
	pub json: bool,
}

/// List the upstream images of the current release, e.g. to mirror them
/// into the registry given by `--registry-server`.
pub fn run<W: Write>(global: &GlobalArgs, args: ListImagesArgs, mut writer: W) -> Result<()> {
	let config = global.operator_config()?;
	let source = global.source();
	let release = source
		.current_release(&config)
		.context("resolving current release")?;
	let images = source
		.images(&release)
		.with_context(|| format!("reading images of release {release}"))?;

	if args.json {
		write_json(&mut writer, &images)?;
	} else {
		for image in images {
			writeln!(writer, "{image}")?;
		}
	}
	Ok(())
}
