//! Conduit server binary: wires storage, the script engine, a transport, and
//! the HTTP surface, then serves until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use conduit_core::{ExpressionEngine, ScriptLimits};
use conduit_server::pipeline::{NetworkTransport, SimulatedTransport};
use conduit_server::storage::{open_store, StorageBackend};
use conduit_server::{
    logging, ChannelPipeline, ChannelService, NetworkConfig, NetworkModule, ServerConfig,
    Transport,
};
use tracing::info;

/// How processed messages leave the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TransportKind {
    /// Log and record deliveries without touching the network.
    Simulated,
    /// Real HTTP requests and TCP connections.
    Network,
}

#[derive(Debug, Parser)]
#[command(name = "conduit-server", version, about = "Healthcare integration channel server")]
struct Cli {
    /// Address to bind.
    #[arg(long, env = "CONDUIT_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(short, long, env = "CONDUIT_PORT", default_value_t = 8000)]
    port: u16,

    /// Path of the channel database file. In-memory storage when unset.
    #[arg(long, env = "CONDUIT_DATA")]
    data: Option<PathBuf>,

    /// Destination transport.
    #[arg(long, env = "CONDUIT_TRANSPORT", value_enum, default_value_t = TransportKind::Simulated)]
    transport: TransportKind,

    /// Allowed CORS origins, comma separated.
    #[arg(long, env = "CONDUIT_CORS_ORIGINS", value_delimiter = ',', default_value = "*")]
    cors_origins: Vec<String>,

    /// Per-script wall-clock limit in milliseconds.
    #[arg(long, env = "CONDUIT_SCRIPT_TIMEOUT_MS", default_value_t = 5_000)]
    script_timeout_ms: u64,

    /// Per-destination delivery limit in milliseconds.
    #[arg(long, env = "CONDUIT_DISPATCH_TIMEOUT_MS", default_value_t = 10_000)]
    dispatch_timeout_ms: u64,

    /// Destinations delivered concurrently per message.
    #[arg(long, env = "CONDUIT_MAX_CONCURRENT_DELIVERIES", default_value_t = 8)]
    max_concurrent_deliveries: usize,

    /// Emit logs as JSON lines.
    #[arg(long, env = "CONDUIT_LOG_JSON")]
    log_json: bool,
}

impl Cli {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            script_timeout_ms: self.script_timeout_ms,
            dispatch_timeout_ms: self.dispatch_timeout_ms,
            max_concurrent_deliveries: self.max_concurrent_deliveries,
            script_limits: ScriptLimits {
                timeout: Duration::from_millis(self.script_timeout_ms),
                ..ScriptLimits::default()
            },
        }
    }

    fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            cors_origins: self.cors_origins.clone(),
            ..NetworkConfig::default()
        }
    }

    fn transport(&self) -> Arc<dyn Transport> {
        match self.transport {
            TransportKind::Simulated => Arc::new(SimulatedTransport::new()),
            TransportKind::Network => Arc::new(NetworkTransport::new()),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_json)?;

    let backend = StorageBackend::from_data_path(cli.data.clone());
    info!(?backend, "opening channel store");
    let store = open_store(&backend)?;

    let pipeline = ChannelPipeline::new(
        store,
        Arc::new(ExpressionEngine::new()),
        cli.transport(),
        &cli.server_config(),
    );
    let channels = ChannelService::new(Arc::new(pipeline));

    let mut network = NetworkModule::new(cli.network_config(), channels);
    let port = network.start().await?;
    info!(port, transport = ?cli.transport, "conduit server starting");

    network
        .serve(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(%err, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    info!("conduit server stopped");
    Ok(())
}
