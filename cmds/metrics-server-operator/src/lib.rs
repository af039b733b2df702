//! Operator for a metrics-server deployment.
//!
//! Reconciles the cluster against the upstream manifest release kept in
//! manifest storage, using [`manifest_reconciler`] for the diff and apply
//! logic and kube-rs to reach the API server.

use std::io::Write;

use anyhow::Result;
use clap::{Parser, Subcommand};

pub mod commands;
pub mod k8s;
pub mod output;
pub mod telemetry;

use commands::GlobalArgs;

#[derive(Parser, Debug)]
#[command(name = "metrics-server-operator")]
#[command(about = "Keep metrics-server reconciled with its upstream manifests", long_about = None)]
#[command(version)]
pub struct Cli {
	#[command(flatten)]
	pub global: GlobalArgs,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Apply the current release to the cluster
	Reconcile(commands::reconcile::ReconcileArgs),

	/// Delete every resource of the current release from the cluster
	Remove(commands::remove::RemoveArgs),

	/// Workload status and conditions of tracked resources
	Status(commands::status::StatusArgs),

	/// Release that would be deployed
	Version(commands::version::VersionArgs),

	/// Releases available in manifest storage
	ListVersions(commands::list_versions::ListVersionsArgs),

	/// Container images of the current release
	ListImages(commands::list_images::ListImagesArgs),

	/// Compare labeled cluster resources with the declared ones
	ListResources(commands::resources::ListResourcesArgs),

	/// Delete labeled resources that are no longer declared
	ScrubResources(commands::resources::ScrubResourcesArgs),

	/// Label declared resources that exist without the ownership label
	SyncResources(commands::resources::SyncResourcesArgs),

	/// Manifests as they would be applied, as YAML
	Show(commands::show::ShowArgs),
}

impl Cli {
	pub fn run<W: Write>(self, writer: W) -> Result<()> {
		let global = &self.global;
		match self.command {
			Commands::Reconcile(args) => commands::reconcile::run(global, args, writer),
			Commands::Remove(args) => commands::remove::run(global, args, writer),
			Commands::Status(args) => commands::status::run(global, args, writer),
			Commands::Version(args) => commands::version::run(global, args, writer),
			Commands::ListVersions(args) => commands::list_versions::run(global, args, writer),
			Commands::ListImages(args) => commands::list_images::run(global, args, writer),
			Commands::ListResources(args) => commands::resources::list(global, args, writer),
			Commands::ScrubResources(args) => commands::resources::scrub(global, args, writer),
			Commands::SyncResources(args) => commands::resources::sync(global, args, writer),
			Commands::Show(args) => commands::show::run(global, args, writer),
		}
	}
}
