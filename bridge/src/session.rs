use async_trait::async_trait;
use ctrlq_shared::{MqttError, TopicFilter};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 消息到达回调，在 MQTT 客户端的事件循环任务上执行
pub trait MessageHandler: Send + Sync {
    fn on_message(&self, topic: &str, payload: &str);
}

/// 与 broker 之间的连接管理
#[async_trait]
pub trait BrokerConnection: Send + Sync + 'static {
    /// 建立连接并订阅，失败时连接保持断开
    async fn connect_and_subscribe(&self, filter: &TopicFilter) -> Result<(), MqttError>;

    fn is_connected(&self) -> bool;

    /// 在已建立的连接断开时返回
    async fn closed(&self);

    async fn disconnect(&self);

    fn endpoint(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Subscribed,
    Reconnecting,
}

/// 订阅会话
///
/// 首次连接失败或已建立的连接断开后进入 `Reconnecting`，并在后台启动唯一
/// 的重连任务，按固定间隔重试直到成功或会话被关闭。
pub struct SubscriptionSession<C: BrokerConnection> {
    connection: Arc<C>,
    topic: TopicFilter,
    retry_interval: Duration,
    state: Arc<watch::Sender<SessionState>>,
    retrying: Arc<AtomicBool>,
    connecting: Arc<AtomicBool>,
    reconnect_attempts: Arc<AtomicU64>,
    shutdown: CancellationToken,
}

/// 持有期间独占一次 broker 连接，释放时清除标记
struct ConnectClaim<'a>(&'a AtomicBool);

impl<'a> ConnectClaim<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ConnectClaim<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<C: BrokerConnection> Clone for SubscriptionSession<C> {
    fn clone(&self) -> Self {
        Self {
            connection: self.connection.clone(),
            topic: self.topic.clone(),
            retry_interval: self.retry_interval,
            state: self.state.clone(),
            retrying: self.retrying.clone(),
            connecting: self.connecting.clone(),
            reconnect_attempts: self.reconnect_attempts.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<C: BrokerConnection> SubscriptionSession<C> {
    pub fn new(connection: Arc<C>, topic: TopicFilter, retry_interval: Duration) -> Self {
        Self {
            connection,
            topic,
            retry_interval,
            state: Arc::new(watch::channel(SessionState::Disconnected).0),
            retrying: Arc::new(AtomicBool::new(false)),
            connecting: Arc::new(AtomicBool::new(false)),
            reconnect_attempts: Arc::new(AtomicU64::new(0)),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// 订阅状态变化
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// 重连任务累计的尝试次数（不含首次连接）
    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    pub fn topic(&self) -> &TopicFilter {
        &self.topic
    }

    pub fn connection(&self) -> &Arc<C> {
        &self.connection
    }

    /// 连接并订阅；失败时转入后台重连，不向调用方返回错误
    pub async fn connect_and_subscribe(&self) {
        if self.shutdown.is_cancelled() {
            warn!("Subscription session is shut down, ignoring connect request");
            return;
        }

        if self.retrying.load(Ordering::Acquire) {
            debug!("Reconnect loop already running for {}", self.connection.endpoint());
            return;
        }

        if self.connection.is_connected() {
            debug!("Already connected to MQTT broker at {}", self.connection.endpoint());
            return;
        }

        let Some(claim) = ConnectClaim::acquire(&self.connecting) else {
            debug!("Connect to {} already in progress", self.connection.endpoint());
            return;
        };

        self.set_state(SessionState::Connecting);

        let result = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                info!("Connect to {} cancelled by shutdown", self.connection.endpoint());
                self.set_state(SessionState::Disconnected);
                return;
            }
            result = self.connection.connect_and_subscribe(&self.topic) => result,
        };
        drop(claim);

        match result {
            Ok(()) => {
                info!(
                    "Subscribed to MQTT topic {} at {}",
                    self.topic.topic_pattern,
                    self.connection.endpoint()
                );
                self.on_subscribed();
            }
            Err(e) => {
                error!(
                    "Subscription to MQTT broker at {} failed: {}",
                    self.connection.endpoint(),
                    e
                );
                self.start_retry_loop();
            }
        }
    }

    /// 停止重连任务与连接监视，并断开连接
    pub async fn shutdown(&self) {
        info!("Shutting down subscription session for {}", self.topic.topic_pattern);
        self.shutdown.cancel();
        self.connection.disconnect().await;
        self.set_state(SessionState::Disconnected);
    }

    fn set_state(&self, state: SessionState) {
        self.state.send_replace(state);
    }

    /// 启动重连任务；已有任务在运行时返回 false
    fn start_retry_loop(&self) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }

        if self
            .retrying
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Reconnect loop already running, not starting another");
            return false;
        }

        self.set_state(SessionState::Reconnecting);

        let session = self.clone();
        tokio::spawn(async move {
            session.run_retry_loop().await;
        });

        true
    }

    async fn run_retry_loop(&self) {
        let endpoint = self.connection.endpoint();

        let reconnected = loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!("Reconnect loop for {} cancelled", endpoint);
                    break false;
                }
                _ = tokio::time::sleep(self.retry_interval) => {}
            }

            if self.connection.is_connected() {
                break true;
            }

            // 其他调用方正在连接时跳过本轮
            let Some(claim) = ConnectClaim::acquire(&self.connecting) else {
                debug!("Connect to {} already in progress, skipping retry", endpoint);
                continue;
            };

            debug!("Subscriber re-trying to reach MQTT broker at {}", endpoint);
            let attempt = self.reconnect_attempts.fetch_add(1, Ordering::Relaxed) + 1;

            let result = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!("Reconnect loop for {} cancelled", endpoint);
                    break false;
                }
                result = self.connection.connect_and_subscribe(&self.topic) => result,
            };
            drop(claim);

            match result {
                Ok(()) => {
                    info!("Re-subscribed to MQTT broker at {} after {} attempts", endpoint, attempt);
                    break true;
                }
                Err(e) => {
                    debug!("Attempt {} to re-connect to MQTT broker failed: {}", attempt, e);
                }
            }
        };

        self.retrying.store(false, Ordering::Release);

        if reconnected {
            self.on_subscribed();
        }
    }

    /// 会话已关闭时断开刚建立的连接
    fn abandon_if_shut_down(&self) -> bool {
        if !self.shutdown.is_cancelled() {
            return false;
        }

        debug!("Session shut down, dropping connection to {}", self.connection.endpoint());
        self.set_state(SessionState::Disconnected);

        let connection = self.connection.clone();
        tokio::spawn(async move {
            connection.disconnect().await;
        });

        true
    }

    /// 进入 `Subscribed` 并监视连接断开
    fn on_subscribed(&self) {
        if self.abandon_if_shut_down() {
            return;
        }

        self.set_state(SessionState::Subscribed);

        // 与 shutdown 并发时，shutdown 可能已在连接建立前执行完
        if self.abandon_if_shut_down() {
            return;
        }

        let session = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = session.shutdown.cancelled() => {}
                _ = session.connection.closed() => {
                    warn!("Connection to MQTT broker at {} lost", session.connection.endpoint());
                    session.start_retry_loop();
                }
            }
        });
    }
}
