//! Tracing setup: formatted logs on stderr plus optional OTLP span export.
//!
//! Logs are pretty-printed on a terminal and emitted as JSON lines otherwise,
//! so stdout stays reserved for command output. Spans are exported when
//! `OTEL_EXPORTER_OTLP_ENDPOINT` or `OTEL_EXPORTER_OTLP_TRACES_ENDPOINT` is
//! set; the usual `OTEL_*` variables configure the exporter.

use std::io::IsTerminal;

use anyhow::{Context, Result};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::SpanExporter;
use opentelemetry_sdk::{trace::SdkTracerProvider, Resource};
use tracing::{Level, Subscriber};
use tracing_subscriber::{
	layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt, EnvFilter, Layer,
};

const SERVICE_NAME: &str = "metrics-server-operator";

/// Flushes and shuts down span export when dropped.
pub struct TelemetryGuard {
	tracer_provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
	fn drop(&mut self) {
		if let Some(provider) = self.tracer_provider.take() {
			if let Err(e) = provider.shutdown() {
				eprintln!("Failed to shutdown tracer provider: {e}");
			}
		}
	}
}

/// `--log-level` wins over `RUST_LOG`, which wins over `info`.
pub fn filter(log_level: Option<Level>) -> EnvFilter {
	match log_level {
		Some(level) => EnvFilter::new(level.as_str()),
		None => EnvFilter::builder()
			.with_default_directive(Level::INFO.into())
			.from_env_lossy(),
	}
}

fn fmt_layer<S>() -> Box<dyn Layer<S> + Send + Sync>
where
	S: Subscriber + for<'span> LookupSpan<'span>,
{
	let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
	if std::io::stderr().is_terminal() {
		layer.pretty().boxed()
	} else {
		layer.json().boxed()
	}
}

fn export_requested() -> bool {
	[
		opentelemetry_otlp::OTEL_EXPORTER_OTLP_ENDPOINT,
		opentelemetry_otlp::OTEL_EXPORTER_OTLP_TRACES_ENDPOINT,
	]
	.iter()
	.any(|var| std::env::var_os(var).is_some())
}

/// Install the global subscriber. Keep the guard alive until exit.
pub fn init(log_level: Option<Level>) -> Result<TelemetryGuard> {
	let registry = tracing_subscriber::registry()
		.with(filter(log_level))
		.with(fmt_layer());

	if !export_requested() {
		registry.init();
		return Ok(TelemetryGuard {
			tracer_provider: None,
		});
	}

	let tracer_provider = tracer_provider()?;
	let otel_layer = tracing_opentelemetry::layer()
		.with_error_records_to_exceptions(true)
		.with_tracer(tracer_provider.tracer(SERVICE_NAME));
	opentelemetry::global::set_tracer_provider(tracer_provider.clone());
	registry.with(otel_layer).init();

	Ok(TelemetryGuard {
		tracer_provider: Some(tracer_provider),
	})
}

fn tracer_provider() -> Result<SdkTracerProvider> {
	// The builder reads OTEL_SERVICE_NAME and OTEL_RESOURCE_ATTRIBUTES itself.
	let mut resource = Resource::builder();
	if std::env::var_os("OTEL_SERVICE_NAME").is_none() {
		resource = resource.with_service_name(SERVICE_NAME);
	}

	let protocol = std::env::var(opentelemetry_otlp::OTEL_EXPORTER_OTLP_PROTOCOL)
		.unwrap_or_else(|_| opentelemetry_otlp::OTEL_EXPORTER_OTLP_PROTOCOL_DEFAULT.to_string());
	let exporter = match protocol.as_str() {
		"grpc" => SpanExporter::builder().with_tonic().build(),
		_ => SpanExporter::builder().with_http().build(),
	}
	.context("building OTLP span exporter")?;

	Ok(SdkTracerProvider::builder()
		.with_resource(resource.build())
		.with_batch_exporter(exporter)
		.build())
}
