mod settings;

pub use settings::{DispatchConfig, GatewayConfig, ServerConfig, Settings, StorageConfig};
