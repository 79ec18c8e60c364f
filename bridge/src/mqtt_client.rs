use async_trait::async_trait;
use ctrlq_shared::{MqttConfig, MqttError, QoS, TopicFilter};
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, Incoming, MqttOptions, Publish,
    QoS as RumqttQoS, SubscribeReasonCode,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::session::{BrokerConnection, MessageHandler};

// Bridge MQTT 连接
//
// 每次连接都新建 AsyncClient 与 EventLoop；事件循环出错后不自动重连，
// 由订阅会话决定何时重试。
pub struct MqttBrokerConnection {
    config: MqttConfig,
    handler: Arc<dyn MessageHandler>,
    client: Mutex<Option<AsyncClient>>,
    event_loop_task: Mutex<Option<JoinHandle<()>>>,
    connected: Arc<watch::Sender<bool>>,
    // 由 disconnect 主动关闭
    closing: Arc<AtomicBool>,
}

impl MqttBrokerConnection {
    pub fn new(config: MqttConfig, handler: Arc<dyn MessageHandler>) -> Self {
        let (connected, _) = watch::channel(false);

        Self {
            config,
            handler,
            client: Mutex::new(None),
            event_loop_task: Mutex::new(None),
            connected: Arc::new(connected),
            closing: Arc::new(AtomicBool::new(false)),
        }
    }

    fn mqtt_options(&self) -> MqttOptions {
        let mut mqtt_options = MqttOptions::new(
            self.config.client_id.clone(),
            &self.config.broker_host,
            self.config.broker_port,
        );

        // 设置认证信息
        if let (Some(username), Some(password)) = (&self.config.username, &self.config.password) {
            mqtt_options.set_credentials(username, password);
        }

        // 设置保持连接
        mqtt_options.set_keep_alive(StdDuration::from_secs(self.config.keep_alive));
        mqtt_options.set_clean_session(self.config.clean_session);

        mqtt_options
    }

    fn rumqtt_qos(qos: QoS) -> RumqttQoS {
        match qos {
            QoS::AtMostOnce => RumqttQoS::AtMostOnce,
            QoS::AtLeastOnce => RumqttQoS::AtLeastOnce,
            QoS::ExactlyOnce => RumqttQoS::ExactlyOnce,
        }
    }

    fn deliver(handler: &Arc<dyn MessageHandler>, publish: &Publish) {
        debug!("Received MQTT message on topic: {}", publish.topic);
        let payload = String::from_utf8_lossy(&publish.payload);
        handler.on_message(&publish.topic, &payload);
    }

    // 等待 CONNACK 与 SUBACK
    async fn handshake(
        &self,
        client: &AsyncClient,
        event_loop: &mut EventLoop,
        filter: &TopicFilter,
    ) -> Result<(), MqttError> {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(connack))) => {
                    if connack.code != ConnectReturnCode::Success {
                        return Err(MqttError::Connection(format!(
                            "Broker refused connection: {:?}",
                            connack.code
                        )));
                    }

                    info!("MQTT connection established to {}", self.config.endpoint());

                    client
                        .subscribe(&filter.topic_pattern, Self::rumqtt_qos(filter.qos))
                        .await
                        .map_err(|e| MqttError::Subscribe(e.to_string()))?;
                }
                Ok(Event::Incoming(Incoming::SubAck(suback))) => {
                    if suback
                        .return_codes
                        .iter()
                        .any(|code| matches!(code, SubscribeReasonCode::Failure))
                    {
                        return Err(MqttError::Subscribe(format!(
                            "Broker rejected subscription to {}",
                            filter.topic_pattern
                        )));
                    }

                    debug!("Subscription acknowledged: {:?}", suback);
                    return Ok(());
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    Self::deliver(&self.handler, &publish);
                }
                Ok(_) => {}
                Err(e) => return Err(MqttError::Connection(e.to_string())),
            }
        }
    }

    // 运行事件循环，直到连接出错或 broker 断开
    async fn run_event_loop(
        mut event_loop: EventLoop,
        handler: Arc<dyn MessageHandler>,
        connected: Arc<watch::Sender<bool>>,
        closing: Arc<AtomicBool>,
    ) {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    Self::deliver(&handler, &publish);
                }
                Ok(Event::Incoming(Incoming::Disconnect)) => {
                    warn!("MQTT broker initiated disconnect");
                    break;
                }
                Ok(Event::Incoming(Incoming::PingResp)) => {}
                Ok(Event::Incoming(incoming)) => {
                    debug!("Received MQTT packet: {:?}", incoming);
                }
                Ok(Event::Outgoing(outgoing)) => {
                    debug!("Sending MQTT packet: {:?}", outgoing);
                }
                Err(e) => {
                    if closing.load(Ordering::Acquire) {
                        debug!("MQTT event loop stopped after disconnect: {}", e);
                    } else {
                        error!("MQTT connection error: {}", e);
                    }
                    break;
                }
            }
        }

        connected.send_replace(false);
    }

    // 被中止的任务不会再更新连接状态，这里统一置为断开
    async fn stop_event_loop(&self) {
        if let Some(task) = self.event_loop_task.lock().await.take() {
            task.abort();
        }
        self.client.lock().await.take();
        self.connected.send_replace(false);
    }
}

#[async_trait]
impl BrokerConnection for MqttBrokerConnection {
    async fn connect_and_subscribe(&self, filter: &TopicFilter) -> Result<(), MqttError> {
        // 丢弃上一次连接遗留的事件循环
        self.stop_event_loop().await;
        self.closing.store(false, Ordering::Release);

        let (client, mut event_loop) = AsyncClient::new(self.mqtt_options(), 10);

        let timeout_ms = self.config.connect_timeout_ms;
        tokio::time::timeout(
            StdDuration::from_millis(timeout_ms),
            self.handshake(&client, &mut event_loop, filter),
        )
        .await
        .map_err(|_| MqttError::Timeout(timeout_ms))??;

        *self.client.lock().await = Some(client);
        self.connected.send_replace(true);

        let task = tokio::spawn(Self::run_event_loop(
            event_loop,
            self.handler.clone(),
            self.connected.clone(),
            self.closing.clone(),
        ));
        *self.event_loop_task.lock().await = Some(task);

        Ok(())
    }

    fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    async fn closed(&self) {
        let mut rx = self.connected.subscribe();
        let _ = rx.wait_for(|connected| !*connected).await;
    }

    async fn disconnect(&self) {
        self.closing.store(true, Ordering::Release);

        if let Some(client) = self.client.lock().await.take() {
            if let Err(e) = client.try_disconnect() {
                debug!("Failed to send MQTT disconnect: {}", e);
            }
        }

        // 给事件循环一点时间把 DISCONNECT 发出去
        if let Some(mut task) = self.event_loop_task.lock().await.take() {
            if tokio::time::timeout(StdDuration::from_secs(1), &mut task).await.is_err() {
                task.abort();
            }
        }

        self.connected.send_replace(false);
        info!("Disconnected from MQTT broker at {}", self.config.endpoint());
    }

    fn endpoint(&self) -> String {
        self.config.endpoint()
    }
}
