use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::queue_store::{DeviceQueues, QueueKind};
use crate::session::MessageHandler;

/// 控制命令的分类标记
pub const CONTROL_TOKENS: [&str; 3] = ["IN", "ON", "OFF"];
/// 设备回复的分类标记
pub const REPLY_TOKEN: &str = "OUT";

/// 主题最后一段即设备 ID；没有 `/` 时返回整个主题
pub fn extract_device_id(topic: &str) -> &str {
    topic.rsplit_once('/').map_or(topic, |(_, device_id)| device_id)
}

/// 负载最后一个 `:` 之后的分类标记；没有 `:` 时返回整个负载
pub fn extract_classification(payload: &str) -> &str {
    payload.rsplit_once(':').map_or(payload, |(_, token)| token)
}

pub fn classify(payload: &str) -> Option<QueueKind> {
    let token = extract_classification(payload);

    if CONTROL_TOKENS.contains(&token) {
        Some(QueueKind::Control)
    } else if token == REPLY_TOKEN {
        Some(QueueKind::Reply)
    } else {
        None
    }
}

/// 路由结果：目标队列与设备 ID
pub fn route<'a>(topic: &'a str, payload: &str) -> Option<(QueueKind, &'a str)> {
    classify(payload).map(|kind| (kind, extract_device_id(topic)))
}

#[derive(Debug, Default)]
struct RouterStats {
    control: AtomicU64,
    reply: AtomicU64,
    dropped: AtomicU64,
}

/// 路由统计快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RouterStatsSnapshot {
    pub control: u64,
    pub reply: u64,
    pub dropped: u64,
}

/// 设备消息路由器：分类后写入对应设备的队列
pub struct DeviceMessageRouter {
    queues: Arc<DeviceQueues>,
    stats: RouterStats,
}

impl DeviceMessageRouter {
    pub fn new(queues: Arc<DeviceQueues>) -> Self {
        Self {
            queues,
            stats: RouterStats::default(),
        }
    }

    pub fn queues(&self) -> &Arc<DeviceQueues> {
        &self.queues
    }

    /// 处理一条消息，返回它被写入的队列
    pub fn dispatch(&self, topic: &str, payload: &str) -> Option<QueueKind> {
        let Some((kind, device_id)) = route(topic, payload) else {
            // 未识别的标记直接丢弃
            debug!("Dropping message with unrecognized classification on topic: {}", topic);
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        match kind {
            QueueKind::Control => {
                debug!("Received control message for device {} on topic {}: {}", device_id, topic, payload);
                self.stats.control.fetch_add(1, Ordering::Relaxed);
            }
            QueueKind::Reply => {
                debug!("Received reply from device {} on topic {}: {}", device_id, topic, payload);
                self.stats.reply.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.queues.append(kind, device_id, payload.to_string());
        Some(kind)
    }

    pub fn stats(&self) -> RouterStatsSnapshot {
        RouterStatsSnapshot {
            control: self.stats.control.load(Ordering::Relaxed),
            reply: self.stats.reply.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
        }
    }
}

impl MessageHandler for DeviceMessageRouter {
    fn on_message(&self, topic: &str, payload: &str) {
        self.dispatch(topic, payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> DeviceMessageRouter {
        DeviceMessageRouter::new(Arc::new(DeviceQueues::new()))
    }

    #[test]
    fn test_extract_device_id() {
        assert_eq!(extract_device_id("A/B/C/D"), "D");
        assert_eq!(extract_device_id("server1/arduino/dev42"), "dev42");
        assert_eq!(extract_device_id("no-separator"), "no-separator");
        assert_eq!(extract_device_id("trailing/"), "");
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("cmd:IN"), Some(QueueKind::Control));
        assert_eq!(classify("cmd:ON"), Some(QueueKind::Control));
        assert_eq!(classify("a:b:OFF"), Some(QueueKind::Control));
        assert_eq!(classify("reading:OUT"), Some(QueueKind::Reply));
        assert_eq!(classify("ping:PONG"), None);
        assert_eq!(classify("cmd:on"), None);
        assert_eq!(classify("OUT:"), None);
    }

    #[test]
    fn test_payload_without_delimiter_uses_whole_payload() {
        assert_eq!(extract_classification("ON"), "ON");
        assert_eq!(classify("ON"), Some(QueueKind::Control));
        assert_eq!(classify("hello"), None);
    }

    #[test]
    fn test_dispatch_control_and_reply() {
        let router = router();
        let topic = "server1/arduino/dev42";

        assert_eq!(router.dispatch(topic, "cmd:ON"), Some(QueueKind::Control));
        assert_eq!(router.dispatch(topic, "reading:OUT"), Some(QueueKind::Reply));

        let queues = router.queues();
        assert_eq!(
            queues.snapshot(QueueKind::Control, "dev42"),
            Some(vec!["cmd:ON".to_string()])
        );
        assert_eq!(
            queues.snapshot(QueueKind::Reply, "dev42"),
            Some(vec!["reading:OUT".to_string()])
        );
    }

    #[test]
    fn test_unrecognized_token_leaves_queues_untouched() {
        let router = router();
        assert_eq!(router.dispatch("server1/arduino/dev42", "ping:PONG"), None);

        assert!(router.queues().devices(QueueKind::Control).is_empty());
        assert!(router.queues().devices(QueueKind::Reply).is_empty());
        assert_eq!(router.stats().dropped, 1);
    }

    #[test]
    fn test_arrival_order_and_stats() {
        let router = router();
        for payload in ["1:IN", "2:OFF", "3:OUT", "4:ON", "5:X"] {
            router.on_message("s/t/dev1", payload);
        }

        assert_eq!(
            router.queues().snapshot(QueueKind::Control, "dev1"),
            Some(vec!["1:IN".to_string(), "2:OFF".to_string(), "4:ON".to_string()])
        );
        assert_eq!(
            router.stats(),
            RouterStatsSnapshot { control: 3, reply: 1, dropped: 1 }
        );
    }
}
