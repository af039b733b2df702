//! List-versions command handler.

use std::io::Write;

use anyhow::{Context, Result};
use clap::Args;
use manifest_reconciler::Release;
use serde::Serialize;

use super::GlobalArgs;
use crate::output::{write_json, write_releases};

#[derive(Args, Debug, Default)]
pub struct ListVersionsArgs {
	/// Print JSON instead of a table
	#[arg(long)]
	pub json: bool,
}

#[derive(Serialize)]
struct ReleaseEntry<'a> {
	#[serde(flatten)]
	release: &'a Release,
	current: bool,
}

/// List the releases available in manifest storage.
pub fn run<W: Write>(global: &GlobalArgs, args: ListVersionsArgs, mut writer: W) -> Result<()> {
	let config = global.operator_config()?;
	let source = global.source();
	let current = source
		.current_release(&config)
		.context("resolving current release")?;
	let mut releases: Vec<Release> = source
		.local_releases()
		.context("reading manifest storage")?
		.into_iter()
		.collect();
	releases.sort_by(|a, b| a.name.cmp(&b.name));

	if args.json {
		let entries: Vec<ReleaseEntry<'_>> = releases
			.iter()
			.map(|release| ReleaseEntry {
				release,
				current: release.name == current,
			})
			.collect();
		write_json(&mut writer, &entries)?;
	} else {
		write_releases(&mut writer, &releases, &current)?;
	}
	Ok(())
}
