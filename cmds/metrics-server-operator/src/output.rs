//! Rendering of command results: YAML documents, aligned tables and JSON.

use std::io::{self, Write};

use manifest_reconciler::{ManifestResource, Release, ResourceDiff, ResourceIdentity};
use serde::Serialize;
use serde_json::Value;
use tabwriter::TabWriter;
use tracing::instrument;

/// Serialize a document as block-style YAML, keeping key order.
pub fn to_yaml(value: &Value) -> Result<String, serde_saphyr::ser_error::Error> {
	let options = serde_saphyr::SerializerOptions {
		indent_step: 2,
		indent_array: Some(0),
		prefer_block_scalars: true,
		empty_map_as_braces: true,
		empty_array_as_brackets: true,
		line_width: Some(80),
		quote_ambiguous_keys: true,
		quote_numeric_strings: true,
		..Default::default()
	};

	let mut output = String::new();
	serde_saphyr::to_fmt_writer_with_options(&mut output, value, options)?;
	Ok(output)
}

/// A multi-document YAML stream, one document per resource.
#[instrument(skip_all, fields(resources = resources.len()))]
pub fn manifests_to_yaml(
	resources: &[ManifestResource],
) -> Result<String, serde_saphyr::ser_error::Error> {
	let mut stream = String::new();
	for resource in resources {
		stream.push_str("---\n");
		stream.push_str(&to_yaml(&resource.to_value())?);
	}
	Ok(stream)
}

pub fn write_json<W: Write, T: Serialize + ?Sized>(mut writer: W, value: &T) -> io::Result<()> {
	serde_json::to_writer_pretty(&mut writer, value)?;
	writeln!(writer)
}

fn namespace_cell(identity: &ResourceIdentity) -> &str {
	identity.namespace().unwrap_or("-")
}

/// One row per classified resource: correct, then extra, then missing.
pub fn write_diff<W: Write>(writer: W, diff: &ResourceDiff) -> io::Result<()> {
	let mut tw = TabWriter::new(writer).padding(2);
	writeln!(tw, "STATUS\tKIND\tNAMESPACE\tNAME")?;
	for (status, identities) in [
		("correct", &diff.correct),
		("extra", &diff.extra),
		("missing", &diff.missing),
	] {
		for identity in identities {
			writeln!(
				tw,
				"{status}\t{}\t{}\t{}",
				identity.kind(),
				namespace_cell(identity),
				identity.name()
			)?;
		}
	}
	tw.flush()
}

/// Releases in storage, sorted by name; `current` is marked.
pub fn write_releases<W: Write>(writer: W, releases: &[Release], current: &str) -> io::Result<()> {
	let mut sorted: Vec<&Release> = releases.iter().collect();
	sorted.sort_by(|a, b| a.name.cmp(&b.name));

	let mut tw = TabWriter::new(writer).padding(2);
	writeln!(tw, "RELEASE\tSIZE\tCURRENT")?;
	for release in sorted {
		let marker = if release.name == current { "*" } else { "" };
		writeln!(tw, "{}\t{}\t{marker}", release.name, release.size_bytes)?;
	}
	tw.flush()
}

/// Status lines of tracked live resources.
pub fn write_conditions<W: Write>(writer: W, resources: &[ManifestResource]) -> io::Result<()> {
	let mut tw = TabWriter::new(writer).padding(2);
	writeln!(tw, "RESOURCE\tCONDITION\tSTATUS\tMESSAGE")?;
	for resource in resources {
		for condition in resource.conditions() {
			writeln!(
				tw,
				"{}\t{}\t{}\t{}",
				resource.identity(),
				condition.type_,
				condition.status,
				condition.message.as_deref().unwrap_or("")
			)?;
		}
	}
	tw.flush()
}
