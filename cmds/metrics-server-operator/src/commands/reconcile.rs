//! Reconcile command handler.

use std::io::Write;

use anyhow::{Context, Result};
use clap::Args;
use manifest_reconciler::{ClusterApi, ReconciliationEngine};
use tracing::instrument;

use super::GlobalArgs;

#[derive(Args, Debug, Default)]
pub struct ReconcileArgs {
	/// Only apply this manifest file of the release (by name, e.g. `components`)
	#[arg(long)]
	pub manifest: Option<String>,
}

/// Run one reconciliation pass against the cluster.
pub fn run<W: Write>(global: &GlobalArgs, args: ReconcileArgs, writer: W) -> Result<()> {
	let cluster = global.connect()?;
	let mut engine = global
		.engine(cluster)?
		.with_components(args.manifest.into_iter().collect());
	execute(&mut engine, writer)
}

/// Reconcile and report the resulting state. A blocked pass is an error.
#[instrument(skip_all, fields(app = %engine.app_name()))]
pub fn execute<C: ClusterApi, W: Write>(
	engine: &mut ReconciliationEngine<C>,
	mut writer: W,
) -> Result<()> {
	let result = engine.reconcile();
	writeln!(writer, "{}", engine.state())?;
	result.context("reconciliation pass failed")?;
	writeln!(writer, "{}", engine.workload_status())?;
	Ok(())
}
