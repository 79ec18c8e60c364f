pub mod mqtt_client;
pub mod queue_store;
pub mod relay;
pub mod router;
pub mod session;

pub use mqtt_client::MqttBrokerConnection;
pub use queue_store::{DeviceQueues, QueueKind};
pub use relay::DeviceRelay;
pub use router::{classify, extract_device_id, route, DeviceMessageRouter, RouterStatsSnapshot};
pub use session::{BrokerConnection, MessageHandler, SessionState, SubscriptionSession};
