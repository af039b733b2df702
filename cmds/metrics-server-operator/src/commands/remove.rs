//! Remove command handler.

use std::io::Write;

use anyhow::{Context, Result};
use clap::Args;
use manifest_reconciler::{ClusterApi, ReconciliationEngine};
use tracing::instrument;

use super::GlobalArgs;

#[derive(Args, Debug, Default)]
pub struct RemoveArgs {
	/// Only remove this manifest file of the release (by name, e.g. `components`)
	#[arg(long)]
	pub manifest: Option<String>,
}

/// Tear down every declared resource of the current release.
pub fn run<W: Write>(global: &GlobalArgs, args: RemoveArgs, writer: W) -> Result<()> {
	let cluster = global.connect()?;
	let mut engine = global
		.engine(cluster)?
		.with_components(args.manifest.into_iter().collect());
	execute(&mut engine, writer)
}

#[instrument(skip_all, fields(app = %engine.app_name()))]
pub fn execute<C: ClusterApi, W: Write>(
	engine: &mut ReconciliationEngine<C>,
	mut writer: W,
) -> Result<()> {
	let result = engine.remove();
	writeln!(writer, "{}", engine.state())?;
	result.context("removing resources")?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use k8s_mock::{MockCluster, Verb};

	use super::*;
	use crate::commands::{
		reconcile,
		test_support::{args, storage},
	};

	#[test]
	fn test_remove_after_reconcile() {
		let dir = storage();
		let mock = MockCluster::builder().build();
		let mut engine = args(&dir).engine(&mock).unwrap();
		reconcile::execute(&mut engine, Vec::new()).unwrap();
		assert_eq!(mock.len(), 3);

		let mut out = Vec::new();
		execute(&mut engine, &mut out).unwrap();
		assert_eq!(String::from_utf8(out).unwrap(), "removed\n");
		assert!(mock.is_empty());
	}

	#[test]
	fn test_remove_tolerates_absent_resources() {
		let dir = storage();
		let mock = MockCluster::builder().build();
		let mut engine = args(&dir).engine(&mock).unwrap();

		execute(&mut engine, Vec::new()).unwrap();
		assert_eq!(mock.calls_of(Verb::Delete).len(), 3);
	}
}
