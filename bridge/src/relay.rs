use ctrlq_shared::AppConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::mqtt_client::MqttBrokerConnection;
use crate::queue_store::DeviceQueues;
use crate::router::{DeviceMessageRouter, RouterStatsSnapshot};
use crate::session::{BrokerConnection, SessionState, SubscriptionSession};

/// 设备消息中继：订阅会话 + 路由器 + 设备队列
///
/// 队列由调用方持有并注入，消费方通过同一个 `Arc<DeviceQueues>` 取消息。
pub struct DeviceRelay<C: BrokerConnection> {
    queues: Arc<DeviceQueues>,
    router: Arc<DeviceMessageRouter>,
    session: SubscriptionSession<C>,
}

impl DeviceRelay<MqttBrokerConnection> {
    pub fn from_config(config: &AppConfig, queues: Arc<DeviceQueues>) -> Self {
        let router = Arc::new(DeviceMessageRouter::new(queues.clone()));
        let connection = Arc::new(MqttBrokerConnection::new(config.mqtt.clone(), router.clone()));
        let session = SubscriptionSession::new(
            connection,
            config.subscription_topic(),
            Duration::from_millis(config.mqtt.reconnect_interval_ms),
        );

        Self {
            queues,
            router,
            session,
        }
    }
}

impl<C: BrokerConnection> DeviceRelay<C> {
    pub fn new(
        queues: Arc<DeviceQueues>,
        router: Arc<DeviceMessageRouter>,
        session: SubscriptionSession<C>,
    ) -> Self {
        Self {
            queues,
            router,
            session,
        }
    }

    pub async fn start(&self) {
        info!(
            "Starting device relay on topic {} ({})",
            self.session.topic().topic_pattern,
            self.session.connection().endpoint()
        );
        self.session.connect_and_subscribe().await;
    }

    pub async fn shutdown(&self) {
        self.session.shutdown().await;
    }

    pub fn queues(&self) -> &Arc<DeviceQueues> {
        &self.queues
    }

    pub fn session(&self) -> &SubscriptionSession<C> {
        &self.session
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn stats(&self) -> RouterStatsSnapshot {
        self.router.stats()
    }
}
