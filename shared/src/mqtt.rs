use serde::{Deserialize, Serialize};

use crate::utils::short_client_id;

mod qos_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use super::QoS;

    pub fn serialize<S>(qos: &QoS, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(*qos as u8)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<QoS, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = u8::deserialize(deserializer)?;
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err(serde::de::Error::custom(format!("Invalid QoS value: {}", value))),
        }
    }
}

// MQTT 消息质量等级
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

// MQTT 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// 保持连接（秒）
    pub keep_alive: u64,
    pub clean_session: bool,
    #[serde(with = "qos_serde")]
    pub subscribe_qos: QoS,
    /// 重连间隔（毫秒）
    pub reconnect_interval_ms: u64,
    /// 单次连接等待 CONNACK 的超时（毫秒）
    pub connect_timeout_ms: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            client_id: short_client_id(),
            username: None,
            password: None,
            keep_alive: 60,
            clean_session: true,
            subscribe_qos: QoS::AtMostOnce,
            reconnect_interval_ms: 5000,
            connect_timeout_ms: 10_000,
        }
    }
}

impl MqttConfig {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.broker_host, self.broker_port)
    }
}

// MQTT 错误类型
#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Subscribe error: {0}")]
    Subscribe(String),

    #[error("Timed out waiting for broker acknowledgement after {0}ms")]
    Timeout(u64),

    #[error("Connection lost")]
    ConnectionLost,
}

// 主题过滤器
#[derive(Debug, Clone)]
pub struct TopicFilter {
    pub topic_pattern: String,
    pub qos: QoS,
}

impl TopicFilter {
    pub fn new(topic_pattern: String, qos: QoS) -> Self {
        Self {
            topic_pattern,
            qos,
        }
    }

    /// 某服务器下某设备类型的全部设备: `<server>/+/<device_type>/#`
    pub fn all_devices_of_type(server_name: &str, device_type: &str, qos: QoS) -> Self {
        Self::new(format!("{}/+/{}/#", server_name, device_type), qos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_type_filter() {
        let filter = TopicFilter::all_devices_of_type("server1", "arduino", QoS::AtLeastOnce);
        assert_eq!(filter.topic_pattern, "server1/+/arduino/#");
        assert_eq!(filter.qos, QoS::AtLeastOnce);
    }

    #[test]
    fn test_default_config() {
        let config = MqttConfig::default();
        assert_eq!(config.reconnect_interval_ms, 5000);
        assert_eq!(config.client_id.len(), 5);
        assert_eq!(config.endpoint(), "localhost:1883");
    }

    #[test]
    fn test_qos_deserialize() {
        let config: MqttConfig = serde_json::from_str(r#"{"subscribe_qos": 2}"#).unwrap();
        assert_eq!(config.subscribe_qos, QoS::ExactlyOnce);
        assert_eq!(config.broker_port, 1883);

        let invalid = serde_json::from_str::<MqttConfig>(r#"{"subscribe_qos": 3}"#);
        assert!(invalid.is_err());
    }
}
