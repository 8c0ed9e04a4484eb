//! socket-conn echo driver.
//!
//! Accepts TCP clients, wraps each one in a `Connection`, and echoes every
//! read back to the peer until it disconnects.
//!
//! ```text
//!   client ──TCP──▶ Listener ──▶ Connection ──read──▶ write ──▶ client
//!                                    │
//!                                    └─ events ─▶ TracingSink (+ MetricsSink)
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use socket_conn::config::{self, AppConfig, LogFormat};
use socket_conn::lifecycle::{signals, Shutdown};
use socket_conn::net::echo::EchoServer;
use socket_conn::net::listener::Listener;
use socket_conn::observability::{self, EventSink, FanoutSink, MetricsSink, TracingSink};

#[derive(Parser)]
#[command(name = "socket-conn")]
#[command(about = "Echo server built on per-connection transport primitives", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,

    /// Override `observability.log_format`.
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

fn load(cli: &Cli) -> Result<AppConfig, config::ConfigError> {
    let mut config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => AppConfig::default(),
    };

    if let Some(bind) = &cli.bind {
        config.listener.bind_address = bind.clone();
    }
    if let Some(format) = cli.log_format {
        config.observability.log_format = format;
    }

    config::validation::validate_config(&config).map_err(config::ConfigError::Validation)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load(&cli)?;

    observability::logging::init_logging(&config.observability)?;

    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        read_size = config.connection.read_size,
        "socket-conn v0.1.0 starting"
    );

    let sink: Arc<dyn EventSink> = if config.observability.metrics_enabled {
        observability::metrics::init_metrics(config.observability.metrics_address.parse()?)?;
        Arc::new(
            FanoutSink::new()
                .with(Arc::new(TracingSink))
                .with(Arc::new(MetricsSink)),
        )
    } else {
        Arc::new(TracingSink)
    };

    let listener = Listener::bind(&config.listener).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server = EchoServer::new(config.connection, sink);
    let stopped = shutdown.subscribe();
    signals::spawn_signal_listener(shutdown.clone());

    server.run(listener, stopped).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
