//! 配置绑定
//!
//! 所有可调参数都有默认值，TOML 中缺省的段落按默认构造

use crate::error::{Result, SharpError};
use crate::types::Scheme;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub service_registry: RegistryConfig,
    #[serde(default)]
    pub rpc_client: RpcClientConfig,
    #[serde(default)]
    pub registration: RegistrationConfig,
}

/// 本进程对外服务地址，缺省字段由注册代理推断
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServerConfig {
    pub address: Option<String>,
    pub port: Option<u16>,
    pub scheme: Option<Scheme>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    /// redis | etcd | memory（大小写不敏感）
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    pub redis: Option<RedisConfig>,
    pub etcd: Option<EtcdConfig>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            key_prefix: default_key_prefix(),
            redis: None,
            etcd: None,
        }
    }
}

fn default_provider() -> String {
    "redis".to_string()
}

fn default_key_prefix() -> String {
    "sharpserver".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    pub connection_string: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EtcdConfig {
    pub endpoint: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RpcClientConfig {
    #[serde(default)]
    pub service_name: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_max_connections")]
    pub max_connections_per_service: usize,
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
    #[serde(default)]
    pub enable_tls: bool,
    #[serde(default)]
    pub retry_backoff: RetryBackoffConfig,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            service_name: String::new(),
            max_retries: default_max_retries(),
            max_connections_per_service: default_max_connections(),
            connection_timeout_ms: default_connection_timeout_ms(),
            operation_timeout_ms: default_operation_timeout_ms(),
            enable_tls: false,
            retry_backoff: RetryBackoffConfig::default(),
        }
    }
}

impl RpcClientConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

fn default_max_retries() -> usize {
    3
}

fn default_max_connections() -> usize {
    10
}

fn default_connection_timeout_ms() -> u64 {
    5_000
}

fn default_operation_timeout_ms() -> u64 {
    30_000
}

/// 指数退避参数：delay = min(base * multiplier^min(k, max_exponent), max)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryBackoffConfig {
    #[serde(default = "default_backoff_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_backoff_max_exponent")]
    pub max_exponent: u32,
    #[serde(default = "default_backoff_max_ms")]
    pub max_ms: u64,
}

impl Default for RetryBackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: default_backoff_base_ms(),
            multiplier: default_backoff_multiplier(),
            max_exponent: default_backoff_max_exponent(),
            max_ms: default_backoff_max_ms(),
        }
    }
}

fn default_backoff_base_ms() -> u64 {
    100
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_backoff_max_exponent() -> u32 {
    5
}

fn default_backoff_max_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistrationConfig {
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_registration_ttl_secs")]
    pub registration_ttl_secs: u64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            registration_ttl_secs: default_registration_ttl_secs(),
            metadata: HashMap::new(),
        }
    }
}

impl RegistrationConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn registration_ttl(&self) -> Duration {
        Duration::from_secs(self.registration_ttl_secs)
    }
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_registration_ttl_secs() -> u64 {
    120
}

impl Config {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SharpError::config(format!("failed to read config file: {}", e)))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| SharpError::config(format!("failed to parse config file: {}", e)))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.service_registry.provider, "redis");
        assert_eq!(config.service_registry.key_prefix, "sharpserver");
        assert_eq!(config.rpc_client.max_retries, 3);
        assert_eq!(config.rpc_client.max_connections_per_service, 10);
        assert_eq!(config.rpc_client.retry_backoff.base_ms, 100);
        assert_eq!(config.registration.heartbeat_interval_secs, 30);
        assert_eq!(config.registration.registration_ttl_secs, 120);
        // 心跳间隔必须小于 TTL 的一半
        assert!(config.registration.heartbeat_interval() * 2 < config.registration.registration_ttl());
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml_text = r#"
            [service_registry]
            provider = "Etcd"
            key_prefix = "gamefleet"

            [service_registry.etcd]
            endpoint = "http://127.0.0.1:2379"

            [rpc_client]
            service_name = "GameServer"
            max_retries = 5

            [rpc_client.retry_backoff]
            base_ms = 50

            [registration]
            heartbeat_interval_secs = 10
        "#;

        let config: Config = toml::from_str(toml_text).unwrap();
        assert_eq!(config.service_registry.provider, "Etcd");
        assert_eq!(config.service_registry.key_prefix, "gamefleet");
        assert_eq!(
            config.service_registry.etcd.as_ref().unwrap().endpoint,
            "http://127.0.0.1:2379"
        );
        assert_eq!(config.rpc_client.service_name, "GameServer");
        assert_eq!(config.rpc_client.max_retries, 5);
        assert_eq!(config.rpc_client.retry_backoff.base_ms, 50);
        // 未给出的字段取默认值
        assert_eq!(config.rpc_client.retry_backoff.multiplier, 2.0);
        assert_eq!(config.registration.heartbeat_interval_secs, 10);
        assert_eq!(config.registration.registration_ttl_secs, 120);
        assert!(config.server.address.is_none());
    }
}
