use dashmap::DashMap;
use std::collections::VecDeque;

/// 消息所属的队列
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    /// 发往设备的控制命令
    Control,
    /// 设备回复 / 确认
    Reply,
}

/// 按设备划分的控制队列与回复队列
///
/// 订阅端只追加；取出和删除由消费方负责。每种队列各自一张并发表，
/// 设备列表在该设备第一条消息到达时创建，且只创建一次。
#[derive(Debug, Default)]
pub struct DeviceQueues {
    control: DashMap<String, VecDeque<String>>,
    reply: DashMap<String, VecDeque<String>>,
}

impl DeviceQueues {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self, kind: QueueKind) -> &DashMap<String, VecDeque<String>> {
        match kind {
            QueueKind::Control => &self.control,
            QueueKind::Reply => &self.reply,
        }
    }

    /// 追加一条消息到设备队列末尾
    pub fn append(&self, kind: QueueKind, device_id: &str, message: String) {
        let queue = self.queue(kind);

        if let Some(mut list) = queue.get_mut(device_id) {
            list.push_back(message);
            return;
        }

        // entry 持有分片写锁，并发首条消息只会创建一个列表
        queue
            .entry(device_id.to_string())
            .or_default()
            .push_back(message);
    }

    /// 取出设备的全部消息（按到达顺序），设备键保留
    pub fn drain(&self, kind: QueueKind, device_id: &str) -> Vec<String> {
        self.queue(kind)
            .get_mut(device_id)
            .map(|mut list| list.drain(..).collect())
            .unwrap_or_default()
    }

    /// 取出最早的一条消息
    pub fn pop_front(&self, kind: QueueKind, device_id: &str) -> Option<String> {
        self.queue(kind)
            .get_mut(device_id)
            .and_then(|mut list| list.pop_front())
    }

    /// 复制设备当前的消息；`None` 表示从未收到过该类消息
    pub fn snapshot(&self, kind: QueueKind, device_id: &str) -> Option<Vec<String>> {
        self.queue(kind)
            .get(device_id)
            .map(|list| list.iter().cloned().collect())
    }

    /// 删除设备的整个列表，返回其中剩余的消息
    pub fn remove_device(&self, kind: QueueKind, device_id: &str) -> Option<Vec<String>> {
        self.queue(kind)
            .remove(device_id)
            .map(|(_, list)| list.into_iter().collect())
    }

    pub fn devices(&self, kind: QueueKind) -> Vec<String> {
        self.queue(kind).iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self, kind: QueueKind, device_id: &str) -> usize {
        self.queue(kind).get(device_id).map(|list| list.len()).unwrap_or(0)
    }

    pub fn contains_device(&self, kind: QueueKind, device_id: &str) -> bool {
        self.queue(kind).contains_key(device_id)
    }

    /// 该类队列中所有设备的消息总数
    pub fn total(&self, kind: QueueKind) -> usize {
        self.queue(kind).iter().map(|entry| entry.value().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_append_creates_device_lazily() {
        let queues = DeviceQueues::new();
        assert!(!queues.contains_device(QueueKind::Control, "dev1"));
        assert_eq!(queues.snapshot(QueueKind::Control, "dev1"), None);

        queues.append(QueueKind::Control, "dev1", "a:ON".to_string());
        queues.append(QueueKind::Control, "dev1", "b:OFF".to_string());

        assert_eq!(
            queues.snapshot(QueueKind::Control, "dev1"),
            Some(vec!["a:ON".to_string(), "b:OFF".to_string()])
        );
        assert!(!queues.contains_device(QueueKind::Reply, "dev1"));
    }

    #[test]
    fn test_empty_message_and_duplicates_pass_through() {
        let queues = DeviceQueues::new();
        queues.append(QueueKind::Reply, "dev1", String::new());
        queues.append(QueueKind::Reply, "dev1", "x:OUT".to_string());
        queues.append(QueueKind::Reply, "dev1", "x:OUT".to_string());

        assert_eq!(queues.len(QueueKind::Reply, "dev1"), 3);
        assert_eq!(queues.pop_front(QueueKind::Reply, "dev1"), Some(String::new()));
    }

    #[test]
    fn test_drain_keeps_device_key() {
        let queues = DeviceQueues::new();
        queues.append(QueueKind::Control, "dev1", "1:IN".to_string());
        queues.append(QueueKind::Control, "dev1", "2:IN".to_string());

        let drained = queues.drain(QueueKind::Control, "dev1");
        assert_eq!(drained, vec!["1:IN".to_string(), "2:IN".to_string()]);
        assert!(queues.contains_device(QueueKind::Control, "dev1"));
        assert_eq!(queues.len(QueueKind::Control, "dev1"), 0);
        assert!(queues.drain(QueueKind::Control, "unknown").is_empty());
    }

    #[test]
    fn test_remove_device() {
        let queues = DeviceQueues::new();
        queues.append(QueueKind::Reply, "dev1", "r:OUT".to_string());
        queues.append(QueueKind::Reply, "dev2", "s:OUT".to_string());

        assert_eq!(
            queues.remove_device(QueueKind::Reply, "dev1"),
            Some(vec!["r:OUT".to_string()])
        );
        assert_eq!(queues.remove_device(QueueKind::Reply, "dev1"), None);
        assert_eq!(queues.devices(QueueKind::Reply), vec!["dev2".to_string()]);
        assert_eq!(queues.total(QueueKind::Reply), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_arrival() {
        let queues = Arc::new(DeviceQueues::new());
        let mut handles = Vec::new();

        for i in 0..64 {
            let queues = queues.clone();
            handles.push(tokio::spawn(async move {
                queues.append(QueueKind::Control, "new-device", format!("msg-{}:ON", i));
                queues.append(QueueKind::Reply, "new-device", format!("msg-{}:OUT", i));
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(queues.devices(QueueKind::Control).len(), 1);
        assert_eq!(queues.devices(QueueKind::Reply).len(), 1);

        let control: HashSet<String> = queues
            .snapshot(QueueKind::Control, "new-device")
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(control.len(), 64);
        assert_eq!(queues.total(QueueKind::Reply), 64);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_append_order_survives_concurrent_drain() {
        let queues = Arc::new(DeviceQueues::new());

        let producer = {
            let queues = queues.clone();
            tokio::spawn(async move {
                for i in 0..500 {
                    queues.append(QueueKind::Control, "dev1", format!("{}:IN", i));
                    if i % 50 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        };

        let consumer = {
            let queues = queues.clone();
            tokio::spawn(async move {
                let mut seen = Vec::new();
                while seen.len() < 500 {
                    seen.extend(queues.drain(QueueKind::Control, "dev1"));
                    tokio::task::yield_now().await;
                }
                seen
            })
        };

        producer.await.unwrap();
        let seen = consumer.await.unwrap();

        let expected: Vec<String> = (0..500).map(|i| format!("{}:IN", i)).collect();
        assert_eq!(seen, expected);
    }
}
