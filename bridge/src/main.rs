use anyhow::{Context, Result};
use ctrlq_bridge::{DeviceQueues, DeviceRelay, QueueKind};
use ctrlq_shared::load_config;
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const STATUS_INTERVAL_SECS: u64 = 60;

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting ctrlq bridge...");

    let config = load_config().context("Failed to load configuration")?;
    info!(
        "Server {} relaying {} devices via MQTT broker {} (client id {})",
        config.server.name,
        config.device_type,
        config.mqtt.endpoint(),
        config.mqtt.client_id
    );

    // 队列由消费方共享
    let queues = Arc::new(DeviceQueues::new());
    let relay = Arc::new(DeviceRelay::from_config(&config, queues.clone()));

    relay.start().await;

    // 定期输出状态
    let status_relay = relay.clone();
    let status_task = tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(STATUS_INTERVAL_SECS));
        loop {
            ticker.tick().await;

            let stats = status_relay.stats();
            let queues = status_relay.queues();
            info!(
                "Relay status: state={:?} reconnect_attempts={} control={} reply={} dropped={} queued_control={} queued_reply={}",
                status_relay.state(),
                status_relay.session().reconnect_attempts(),
                stats.control,
                stats.reply,
                stats.dropped,
                queues.total(QueueKind::Control),
                queues.total(QueueKind::Reply)
            );
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal, stopping ctrlq bridge...");

    status_task.abort();
    relay.shutdown().await;

    Ok(())
}
