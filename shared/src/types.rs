use serde::{Deserialize, Serialize};

use crate::mqtt::{MqttConfig, TopicFilter};

// 服务器信息
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerInfo {
    pub name: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: "iot-server".to_string(),
        }
    }
}

// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerInfo,
    pub device_type: String,
    pub mqtt: MqttConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerInfo::default(),
            device_type: "arduino".to_string(),
            mqtt: MqttConfig::default(),
        }
    }
}

impl AppConfig {
    /// 本服务器下本设备类型所有设备的订阅主题
    pub fn subscription_topic(&self) -> TopicFilter {
        TopicFilter::all_devices_of_type(&self.server.name, &self.device_type, self.mqtt.subscribe_qos)
    }
}

// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
