pub mod config;
pub mod mqtt;
pub mod types;
pub mod utils;

pub use crate::config::{load_config, validate_config};
pub use mqtt::{MqttConfig, MqttError, QoS, TopicFilter};
pub use types::{AppConfig, ConfigError, ServerInfo};
pub use utils::{generate_uuid, short_client_id};
