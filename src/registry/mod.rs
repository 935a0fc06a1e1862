//! 服务注册发现模块
//!
//! 支持 Redis 与 etcd 后端，另提供进程内实现用于测试与单进程部署

pub mod etcd;
pub mod memory;
pub mod redis;
pub mod trait_def;

use crate::config::RegistryConfig;
use crate::error::{Result, SharpError};
use std::sync::Arc;

pub use etcd::EtcdRegistry;
pub use memory::MemoryRegistry;
pub use redis::RedisRegistry;
pub use trait_def::{ServiceRegistry, ServiceRegistryTrait};

/// 注册中心后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryProvider {
    Redis,
    Etcd,
    Memory,
}

impl RegistryProvider {
    /// 大小写不敏感解析
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "redis" => Ok(RegistryProvider::Redis),
            "etcd" => Ok(RegistryProvider::Etcd),
            "memory" => Ok(RegistryProvider::Memory),
            other => Err(SharpError::config(format!(
                "unknown registry provider: {}",
                other
            ))),
        }
    }
}

/// 根据配置创建注册中心实例
pub async fn create_registry(config: &RegistryConfig) -> Result<ServiceRegistry> {
    match RegistryProvider::parse(&config.provider)? {
        RegistryProvider::Redis => {
            let redis = config
                .redis
                .as_ref()
                .ok_or_else(|| SharpError::config("redis connection string not configured"))?;
            let registry =
                RedisRegistry::new(&redis.connection_string, config.key_prefix.clone()).await?;
            Ok(Arc::new(registry))
        }
        RegistryProvider::Etcd => {
            let etcd = config
                .etcd
                .as_ref()
                .ok_or_else(|| SharpError::config("etcd endpoint not configured"))?;
            let registry = EtcdRegistry::new(&etcd.endpoint, config.key_prefix.clone()).await?;
            Ok(Arc::new(registry))
        }
        RegistryProvider::Memory => Ok(Arc::new(MemoryRegistry::new())),
    }
}
