//! flowmeta - Main Entry Point
//!
//! Installs the rss-meta rule on every port, lets traffic settle, then counts
//! flows in the software loop until Ctrl-C.

mod config;
mod traffic;

use std::time::Instant;

use anyhow::{anyhow, Context};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use flowmeta_dataplane::{Engine, RingIo, RunningFlag};
use flowmeta_offload::{install_rss_meta, SoftwareOffload};

use crate::config::{ConfigError, SampleConfig, CONFIG_ENV, DEFAULT_CONFIG_PATH, NB_QUEUES_ENV};
use crate::traffic::TrafficWire;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("flowmeta v{}", env!("CARGO_PKG_VERSION"));

    // Load config
    let config_path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    let config = match SampleConfig::load(&config_path) {
        Ok(config) => config,
        Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %config_path, "Config not found, using defaults");
            SampleConfig::default()
        }
        Err(e) => return Err(e).with_context(|| format!("failed to load {config_path}")),
    };
    let config = config.with_nb_queues_override(std::env::var(NB_QUEUES_ENV).ok().as_deref())?;
    config.validate()?;

    tracing::info!(
        ports = config.nb_ports,
        queues = config.nb_queues,
        ring_size = config.ring_size,
        "Configuration loaded"
    );

    if let Some(addr) = config.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install metrics exporter")?;
        tracing::info!(%addr, "Metrics exporter listening");
    }

    // Offload rules
    let mut offload = SoftwareOffload::new(config.nb_queues);
    install_rss_meta(&mut offload, config.nb_ports)
        .context("failed to install rss-meta rules")?;

    let (io, wires) = RingIo::new(config.nb_ports, config.nb_queues, config.ring_size);
    let mut engine = Engine::new(config.engine_config(), io).context("failed to create engine")?;
    let shutdown = engine.shutdown_handle();

    let wire_running = RunningFlag::new();
    let wire = TrafficWire::new(config.traffic.clone(), offload, wires)
        .spawn(wire_running.clone())
        .context("failed to start traffic wire")?;

    tracing::info!("waiting for packets to arrive");
    tokio::select! {
        _ = tokio::time::sleep(config.settle()) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted before the software loop started");
            wire_running.stop();
            tokio::task::spawn_blocking(move || wire.join())
                .await
                .context("traffic wire join failed")?
                .map_err(|_| anyhow!("traffic wire panicked"))?;
            return Ok(());
        }
    }

    engine.reset_counts();

    let engine_task = tokio::task::spawn_blocking(move || {
        let started = Instant::now();
        let total = engine.run();
        (total, engine.count_active_flows(), started.elapsed())
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {e}");
    }
    shutdown.shutdown();

    let (total, active_flows, elapsed) = engine_task.await.context("software loop panicked")?;

    wire_running.stop();
    let wire_report = tokio::task::spawn_blocking(move || wire.join())
        .await
        .context("traffic wire join failed")?
        .map_err(|_| anyhow!("traffic wire panicked"))?;

    tracing::info!(
        rx = total.rx_packets,
        tx = total.tx_packets,
        tx_dropped = total.tx_dropped,
        active_flows,
        rate_mpps = total.packet_rate_mpps(elapsed.as_secs_f64()),
        offered = wire_report.offered,
        filtered = wire_report.filtered,
        "flowmeta finished"
    );

    Ok(())
}
