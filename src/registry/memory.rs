//! 进程内服务注册发现实现
//!
//! 用于测试与单进程部署，TTL 以本地时钟模拟，到期的记录对所有读操作不可见

use super::trait_def::ServiceRegistryTrait;
use crate::error::{Result, SharpError};
use crate::types::ServiceInstance;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::info;

struct Entry {
    instance: ServiceInstance,
    expires_at: Instant,
}

impl Entry {
    fn expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// 进程内服务注册发现
///
/// 按 service_id 有序存储，发现结果顺序确定
#[derive(Default)]
pub struct MemoryRegistry {
    entries: RwLock<BTreeMap<String, Entry>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ServiceRegistryTrait for MemoryRegistry {
    async fn register(&self, instance: &ServiceInstance, ttl: Duration) -> Result<()> {
        let mut record = instance.clone();
        record.touch();

        let mut entries = self.entries.write().await;
        entries.insert(
            record.service_id.clone(),
            Entry {
                expires_at: Instant::now() + ttl,
                instance: record,
            },
        );
        Ok(())
    }

    async fn unregister(&self, service_id: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        if entries.remove(service_id).is_some() {
            info!("service unregistered: {}", service_id);
        }
        Ok(())
    }

    async fn discover(&self, service_name: &str) -> Result<Vec<ServiceInstance>> {
        let entries = self.entries.read().await;
        Ok(entries
            .values()
            .filter(|e| !e.expired())
            .filter(|e| e.instance.service_name == service_name && e.instance.is_up())
            .map(|e| e.instance.clone())
            .collect())
    }

    async fn get_service(&self, service_id: &str) -> Result<Option<ServiceInstance>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(service_id)
            .filter(|e| !e.expired())
            .map(|e| e.instance.clone()))
    }

    async fn refresh(&self, service_id: &str, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.write().await;
        match entries.get_mut(service_id) {
            Some(entry) if !entry.expired() => {
                entry.instance.touch();
                entry.expires_at = Instant::now() + ttl;
                Ok(())
            }
            _ => Err(SharpError::registry(format!(
                "unknown service id: {}",
                service_id
            ))),
        }
    }
}
