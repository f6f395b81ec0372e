//! Prometheus exporter for consumer modem statistics.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

use modem_exporter::config::LogFormat;
use modem_exporter::{
    ExporterConfig, Exposition, HttpServer, MetricRegistry, ModemClient, Poller, RenderOptions,
    StartupError,
};

/// Prometheus exporter for consumer modem statistics.
#[derive(Parser, Debug)]
#[command(name = "modem-exporter")]
#[command(about = "Export modem link statistics as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<String>,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error). Overrides config.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        ExporterConfig::load_from_file(config_path).map_err(StartupError::from)?
    } else {
        ExporterConfig::default()
    };

    // Override listen address from CLI
    if let Some(listen) = args.listen {
        config.prometheus.listen = listen;
        config.validate().map_err(StartupError::from)?;
    }

    // Initialize logging
    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.logging.level)
        .parse()
        .unwrap_or(Level::INFO);
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("modem_exporter={}", log_level).parse()?)
        .add_directive(format!("reqwest={}", Level::WARN).parse()?);

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }

    info!(
        family = %config.modem.family,
        base_url = %config.modem.base_url,
        "Starting modem exporter"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let registry = Arc::new(MetricRegistry::new());
    let client = ModemClient::new(&config.modem, &config.poll).map_err(StartupError::from)?;
    let poller = Poller::new(client, registry.clone(), &config.poll);

    // Parse listen address
    let listen_addr = config
        .prometheus
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

    // Bind before polling so a taken port fails the start
    let exposition = Exposition::new(
        registry.clone(),
        RenderOptions::from_config(&config.prometheus),
    );
    let http_server = HttpServer::new(exposition, listen_addr, config.prometheus.path.clone())
        .bind()
        .await?;

    // Start poller
    let poller_task = tokio::spawn(poller.run(shutdown_rx.clone()));

    // Start HTTP server
    let http_shutdown = shutdown_rx.clone();
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run(http_shutdown).await {
            error!("HTTP server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        error!("Cannot listen for SIGTERM: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, shutting down...");
        }
    }

    // Signal shutdown
    shutdown_tx.send(true)?;

    // Wait for tasks to complete
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = poller_task.await;
        let _ = http_task.await;
    })
    .await;

    // Print final health
    let state = registry.read();
    let health = state.health();
    info!(
        up = state.is_up(),
        polls_succeeded = health.successes_total,
        polls_failed = health.failures_total,
        consecutive_failures = health.consecutive_failures,
        last_success = ?health.last_success,
        "Final health"
    );

    info!("Exporter stopped");
    Ok(())
}
