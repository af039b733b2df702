//! Status command handler.

use std::io::Write;

use anyhow::Result;
use clap::Args;
use manifest_reconciler::{ClusterApi, ReconciliationEngine};
use serde_json::json;

use super::GlobalArgs;
use crate::output::{write_conditions, write_json};

#[derive(Args, Debug, Default)]
pub struct StatusArgs {
	/// Print JSON instead of text
	#[arg(long)]
	pub json: bool,
}

/// Report the workload status and the conditions of tracked resources.
pub fn run<W: Write>(global: &GlobalArgs, args: StatusArgs, writer: W) -> Result<()> {
	let cluster = global.connect()?;
	let engine = global.engine(cluster)?;
	execute(&engine, &args, writer)
}

pub fn execute<C: ClusterApi, W: Write>(
	engine: &ReconciliationEngine<C>,
	args: &StatusArgs,
	mut writer: W,
) -> Result<()> {
	let status = engine.workload_status();
	// A failed lookup already shows up in the workload status.
	let tracked = engine.status_summary().unwrap_or_default();

	if args.json {
		let resources: Vec<_> = tracked
			.iter()
			.map(|r| {
				json!({
					"resource": r.identity().to_string(),
					"ready": r.is_ready(),
					"conditions": r.conditions(),
				})
			})
			.collect();
		write_json(
			&mut writer,
			&json!({ "workload": status, "resources": resources }),
		)?;
		return Ok(());
	}

	writeln!(writer, "{status}")?;
	if !tracked.is_empty() {
		writeln!(writer)?;
		write_conditions(&mut writer, &tracked)?;
	}
	Ok(())
}
