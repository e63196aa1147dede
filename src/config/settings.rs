use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Push provider identifier ("log" acknowledges every send)
    #[serde(default = "default_gateway_provider")]
    pub provider: String,
    /// Per-call timeout; elapsed calls count as transient failures
    #[serde(default = "default_send_timeout")]
    pub send_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Bounded worker-pool size for campaign fan-out
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Gateway attempts per token, counting the first send
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First retry delay in milliseconds
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,
    /// Cap applied to the exponential retry delay
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_ms: u64,
    /// Multiplier for exponential growth
    #[serde(default = "default_retry_multiplier")]
    pub retry_multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    #[serde(default = "default_retry_jitter")]
    pub retry_jitter: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Storage backend: "memory" or "postgres"
    #[serde(default = "default_storage_backend")]
    pub backend: String,
    /// PostgreSQL connection URL (required for the postgres backend)
    #[serde(default)]
    pub postgres_url: Option<String>,
    /// PostgreSQL pool size
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8082
}

fn default_gateway_provider() -> String {
    "log".to_string()
}

fn default_send_timeout() -> u64 {
    10
}

fn default_concurrency() -> usize {
    16
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    1_000
}

fn default_retry_max_delay() -> u64 {
    30_000
}

fn default_retry_multiplier() -> f64 {
    2.0
}

fn default_retry_jitter() -> f64 {
    0.1
}

fn default_storage_backend() -> String {
    "memory".to_string()
}

fn default_max_connections() -> u32 {
    5
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8082)?
            .set_default("gateway.provider", "log")?
            .set_default("gateway.send_timeout_seconds", 10)?
            .set_default("dispatch.concurrency", 16)?
            .set_default("dispatch.max_attempts", 3)?
            .set_default("storage.backend", "memory")?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // SERVER_HOST, SERVER_PORT, GATEWAY_PROVIDER, STORAGE_POSTGRES_URL, etc.
            .add_source(
                Environment::default()
                    .separator("_")
                    .try_parsing(true)
                    .list_separator(","),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            provider: default_gateway_provider(),
            send_timeout_seconds: default_send_timeout(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay(),
            retry_max_delay_ms: default_retry_max_delay(),
            retry_multiplier: default_retry_multiplier(),
            retry_jitter: default_retry_jitter(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            postgres_url: None,
            max_connections: default_max_connections(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let server = ServerConfig::default();
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 8082);

        let dispatch = DispatchConfig::default();
        assert_eq!(dispatch.concurrency, 16);
        assert_eq!(dispatch.max_attempts, 3);
        assert_eq!(dispatch.retry_base_delay_ms, 1_000);
    }
}
