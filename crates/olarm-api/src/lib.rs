// olarm-api: Async Rust client for the Olarm cloud (OAuth2 token endpoint, device REST API, MQTT push)

pub mod auth;
pub mod devices;
pub mod error;
pub mod mqtt;
pub mod transport;

pub use auth::{TokenClient, TokenResponse};
pub use devices::{DeviceClient, DeviceProfile, DeviceRecord};
pub use error::Error;
pub use mqtt::{MqttConfig, MqttConnection, MqttEvent};
pub use transport::{TlsMode, TransportConfig};
