//! `aip-gateway`: CLI entry point. Installs tracing, loads config, wires the
//! Session Core / Fan-out Engine / A2A Task Engine together behind one
//! `GatewayState`, binds the transport listener, and drains live sessions on
//! SIGTERM/SIGINT (spec §5 graceful shutdown).

use clap::Parser;
use gwcore::prelude::{BuildInfo, init_tracing};
use gwcore::telemetry::LogFormat;
use gwproto::config::{Config, StaticConfig};
use gwproto::session::{Capability, CapabilityRegistry, PingCapability, RootsCapability};
use gwproto::transport::{self, GatewayState};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "aip-gateway", version, about = "AI-protocol gateway: MCP/A2A/REST-over-JSON-RPC fan-out front door")]
struct Cli {
	/// Path to the YAML config file (spec §6).
	#[arg(long)]
	config: String,

	/// Overrides the `listen` address from the config file.
	#[arg(long)]
	listen: Option<String>,

	/// Log output format.
	#[arg(long, value_enum, default_value = "compact")]
	log_format: CliLogFormat,
}

#[derive(Copy, Clone, Debug, clap::ValueEnum)]
enum CliLogFormat {
	Compact,
	Json,
}

impl From<CliLogFormat> for LogFormat {
	fn from(f: CliLogFormat) -> Self {
		match f {
			CliLogFormat::Compact => LogFormat::Compact,
			CliLogFormat::Json => LogFormat::Json,
		}
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();
	init_tracing(cli.log_format.into());

	let build = BuildInfo::new();
	info!(version = build.version, name = build.name, "starting");

	let config = StaticConfig::from_file(&cli.config)?;
	let listen_addr = cli.listen.clone().unwrap_or_else(|| config.listen_addr());
	let tls = config.tls();

	let config: Arc<dyn Config> = Arc::new(config);

	let mut registry = CapabilityRegistry::default();
	registry.register(Capability::new(Arc::new(PingCapability)));
	registry.register(Capability::new(Arc::new(RootsCapability)));

	let state = GatewayState::new(config, registry);
	let app = transport::router(state.clone());

	let acceptor = transport::tls::bind(&listen_addr, &tls).await?;
	info!(addr = %listen_addr, tls = ?tls.mode, "listening");

	axum::serve(acceptor, app)
		.with_graceful_shutdown(shutdown_signal(state))
		.await?;

	info!("shut down cleanly");
	Ok(())
}

/// Resolves once SIGTERM or SIGINT (Ctrl-C) arrives, draining live sessions
/// before returning so `axum::serve` stops accepting new connections and lets
/// in-flight frames finish (spec §5 "graceful shutdown ... drains pending
/// requests per Cancellation").
async fn shutdown_signal(state: Arc<GatewayState>) {
	let ctrl_c = async {
		tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
	};

	#[cfg(unix)]
	let terminate = async {
		tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
			.expect("failed to install SIGTERM handler")
			.recv()
			.await;
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}

	info!("shutdown signal received, draining sessions");
	state.sessions.close_all();
}
