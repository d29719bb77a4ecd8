use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
	#[default]
	Compact,
	Json,
}

/// Installs the process-wide tracing subscriber. Call once, before anything else logs.
pub fn init_tracing(format: LogFormat) {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	let registry = tracing_subscriber::registry().with(filter);
	match format {
		LogFormat::Compact => {
			let layer = tracing_subscriber::fmt::layer()
				.with_span_events(FmtSpan::CLOSE)
				.with_target(true);
			registry.with(layer).init();
		},
		LogFormat::Json => {
			let layer = tracing_subscriber::fmt::layer()
				.json()
				.with_span_events(FmtSpan::CLOSE);
			registry.with(layer).init();
		},
	}
}
