//! Handlers of the resource drift commands: list, scrub and sync.
//!
//! All three classify the labeled resources of the cluster against the
//! declared ones (correct, extra, missing) and print the classification.
//! Scrub and sync act on it first and print the classification that
//! remains afterwards.

use std::io::Write;

use anyhow::{Context, Result};
use clap::Args;
use manifest_reconciler::{ClusterApi, ReconciliationEngine, ResourceDiff};
use tracing::instrument;

use super::{GlobalArgs, ResourceArgs};
use crate::{
	k8s::KubeCluster,
	output::{write_diff, write_json},
};

#[derive(Args, Debug, Default)]
pub struct ListResourcesArgs {
	#[command(flatten)]
	pub resources: ResourceArgs,
}

#[derive(Args, Debug, Default)]
pub struct ScrubResourcesArgs {
	#[command(flatten)]
	pub resources: ResourceArgs,
}

#[derive(Args, Debug, Default)]
pub struct SyncResourcesArgs {
	#[command(flatten)]
	pub resources: ResourceArgs,
}

fn engine(global: &GlobalArgs, args: &ResourceArgs) -> Result<ReconciliationEngine<KubeCluster>> {
	let cluster = global.connect()?;
	Ok(global.engine(cluster)?.with_components(args.components()))
}

fn print<W: Write>(mut writer: W, diff: &ResourceDiff, json: bool) -> Result<()> {
	if json {
		write_json(&mut writer, diff)?;
	} else {
		write_diff(&mut writer, diff)?;
	}
	Ok(())
}

pub fn list<W: Write>(global: &GlobalArgs, args: ListResourcesArgs, writer: W) -> Result<()> {
	execute_list(&engine(global, &args.resources)?, &args.resources, writer)
}

pub fn scrub<W: Write>(global: &GlobalArgs, args: ScrubResourcesArgs, writer: W) -> Result<()> {
	execute_scrub(&engine(global, &args.resources)?, &args.resources, writer)
}

pub fn sync<W: Write>(global: &GlobalArgs, args: SyncResourcesArgs, writer: W) -> Result<()> {
	execute_sync(&engine(global, &args.resources)?, &args.resources, writer)
}

#[instrument(skip_all, fields(filter = ?args.kind_filter()))]
pub fn execute_list<C: ClusterApi, W: Write>(
	engine: &ReconciliationEngine<C>,
	args: &ResourceArgs,
	writer: W,
) -> Result<()> {
	let diff = engine
		.diff(args.kind_filter())
		.context("comparing cluster resources")?;
	print(writer, &diff, args.json)
}

/// Delete labeled resources that are no longer declared.
#[instrument(skip_all, fields(filter = ?args.kind_filter()))]
pub fn execute_scrub<C: ClusterApi, W: Write>(
	engine: &ReconciliationEngine<C>,
	args: &ResourceArgs,
	writer: W,
) -> Result<()> {
	let diff = engine
		.scrub(args.kind_filter())
		.context("scrubbing extra resources")?;
	print(writer, &diff, args.json)
}

/// Apply declared resources that exist without the ownership label.
#[instrument(skip_all, fields(filter = ?args.kind_filter()))]
pub fn execute_sync<C: ClusterApi, W: Write>(
	engine: &ReconciliationEngine<C>,
	args: &ResourceArgs,
	writer: W,
) -> Result<()> {
	let diff = engine
		.sync(args.kind_filter())
		.context("syncing missing resources")?;
	print(writer, &diff, args.json)
}
