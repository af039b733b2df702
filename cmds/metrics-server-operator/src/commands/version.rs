//! Version command handler.

use std::io::Write;

use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;

use super::GlobalArgs;
use crate::output::write_json;

#[derive(Args, Debug, Default)]
pub struct VersionArgs {
	/// Print JSON instead of plain text
	#[arg(long)]
	pub json: bool,
}

/// Print the release that would be deployed.
pub fn run<W: Write>(global: &GlobalArgs, args: VersionArgs, mut writer: W) -> Result<()> {
	let config = global.operator_config()?;
	let release = global
		.source()
		.current_release(&config)
		.context("resolving current release")?;

	if args.json {
		write_json(&mut writer, &json!({ "release": release }))?;
	} else {
		writeln!(writer, "{release}")?;
	}
	Ok(())
}
