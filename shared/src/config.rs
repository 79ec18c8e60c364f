use crate::types::{AppConfig, ConfigError};
use ::config::{Config, Environment, File};
use dotenvy::dotenv;
use std::env;

pub fn load_config() -> Result<AppConfig, ConfigError> {
    // 加载 .env 文件
    dotenv().ok();

    let settings = Config::builder()
        // 添加默认配置文件
        .add_source(File::with_name("config/default").required(false))
        // 添加环境特定配置文件
        .add_source(
            File::with_name(&format!("config/{}", env::var("ENV").unwrap_or_else(|_| "development".to_string())))
                .required(false)
        )
        // 添加环境变量，使用 CTRLQ_ 前缀，例如 CTRLQ_MQTT__BROKER_HOST
        .add_source(
            Environment::with_prefix("CTRLQ")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
        )
        .build()?;

    // 未提供的字段使用默认值
    let config: AppConfig = settings.try_deserialize()?;

    // 验证必要配置
    validate_config(&config)?;

    Ok(config)
}

pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.server.name.trim().is_empty() {
        return Err(ConfigError::Invalid("Server name cannot be empty".to_string()));
    }

    if config.device_type.trim().is_empty() {
        return Err(ConfigError::Invalid("Device type cannot be empty".to_string()));
    }

    // 名称会被拼进订阅主题，不能含有主题分隔符或通配符
    for (field, value) in [("server.name", &config.server.name), ("device_type", &config.device_type)] {
        if value.contains(['/', '+', '#']) {
            return Err(ConfigError::Invalid(format!("{} must not contain '/', '+' or '#': {}", field, value)));
        }
    }

    if config.mqtt.broker_host.is_empty() {
        return Err(ConfigError::Invalid("MQTT broker host cannot be empty".to_string()));
    }

    if config.mqtt.broker_port == 0 {
        return Err(ConfigError::Invalid("MQTT broker port cannot be 0".to_string()));
    }

    if config.mqtt.reconnect_interval_ms == 0 {
        return Err(ConfigError::Invalid("MQTT reconnect interval must be positive".to_string()));
    }

    if config.mqtt.keep_alive < 5 {
        return Err(ConfigError::Invalid("MQTT keep alive must be at least 5 seconds".to_string()));
    }

    if config.mqtt.client_id.is_empty() {
        return Err(ConfigError::Invalid("MQTT client id cannot be empty".to_string()));
    }

    Ok(())
}
