use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use turnlink::config::Config;
use turnlink::domain::{ChannelAddress, SocketAddress};
use turnlink::infrastructure::metrics::describe_metrics;
use turnlink::{ClientEventHandler, TurnClient, TurnError};

/// Logs every client event
struct HeadlessService;

#[async_trait::async_trait]
impl ClientEventHandler for HeadlessService {
    async fn on_allocated(&self, address: &ChannelAddress) {
        info!("Allocated: {}", address);
    }

    async fn on_error(&self, error: &TurnError) {
        warn!("Client error: {}", error);
    }

    async fn on_permission_granted(&self, peers: &[SocketAddress]) {
        info!("Permission granted for {} peer(s)", peers.len());
    }

    async fn on_data(&self, from: Option<SocketAddress>, data: &[u8]) {
        info!(
            "Received {} bytes from {}",
            data.len(),
            from.map(|a| a.to_string()).unwrap_or_else(|| "unknown peer".to_string())
        );
    }

    async fn on_closed(&self) {
        info!("Channel closed");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref())?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting turnlink");
    info!("Configuration loaded: {:?}", config);

    // Start metrics exporter
    if let Some(listen) = &config.metrics.listen {
        let addr: SocketAddr = listen.parse()?;
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        describe_metrics();
        info!("Metrics exporter listening on {}", addr);
    }

    let mut client = TurnClient::connect(&config, Arc::new(HeadlessService)).await?;
    client.open().await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    if let Err(e) = client.close().await {
        error!("Failed to close client: {}", e);
    }

    Ok(())
}
