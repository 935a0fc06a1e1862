//! etcd 服务注册发现实现
//!
//! 名称记录与反向索引挂在同一个 lease 下，lease 到期两者同时失效

use super::trait_def::ServiceRegistryTrait;
use crate::error::{Result, SharpError};
use crate::types::ServiceInstance;
use async_trait::async_trait;
use etcd_client::{Client, GetOptions, PutOptions};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// etcd 服务注册发现
pub struct EtcdRegistry {
    client: Arc<tokio::sync::Mutex<Client>>,
    prefix: String,
    /// service_id -> 当前 lease，续期时旧 lease 惰性撤销
    leases: Arc<tokio::sync::Mutex<HashMap<String, i64>>>,
}

impl EtcdRegistry {
    pub async fn new(endpoint: impl Into<String>, prefix: impl Into<String>) -> Result<Self> {
        let endpoint = endpoint.into();
        let client = Client::connect([endpoint.as_str()], None)
            .await
            .map_err(|e| SharpError::registry(format!("failed to connect to etcd: {}", e)))?;

        Ok(Self {
            client: Arc::new(tokio::sync::Mutex::new(client)),
            prefix: prefix.into(),
            leases: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
        })
    }

    fn service_key(&self, service_name: &str, service_id: &str) -> String {
        format!("{}/service/{}/{}", self.prefix, service_name, service_id)
    }

    fn service_prefix(&self, service_name: &str) -> String {
        format!("{}/service/{}/", self.prefix, service_name)
    }

    fn index_key(&self, service_id: &str) -> String {
        format!("{}/index/{}", self.prefix, service_id)
    }

    /// 撤销旧 lease，lease 不存在时静默忽略
    async fn revoke_lease(&self, client: &mut Client, lease_id: i64) {
        if let Err(e) = client.lease_revoke(lease_id).await {
            debug!("lease {} already gone: {}", lease_id, e);
        }
    }
}

#[async_trait]
impl ServiceRegistryTrait for EtcdRegistry {
    async fn register(&self, instance: &ServiceInstance, ttl: Duration) -> Result<()> {
        let mut record = instance.clone();
        record.touch();
        let value = serde_json::to_string(&record)?;

        let mut client = self.client.lock().await;

        let ttl_secs = ttl.as_secs().max(1) as i64;
        let lease = client
            .lease_grant(ttl_secs, None)
            .await
            .map_err(|e| SharpError::registry(format!("failed to grant lease: {}", e)))?;
        let lease_id = lease.id();

        let opts = PutOptions::new().with_lease(lease_id);
        client
            .put(
                self.service_key(&record.service_name, &record.service_id),
                value,
                Some(opts.clone()),
            )
            .await
            .map_err(|e| SharpError::registry(format!("failed to put service record: {}", e)))?;
        client
            .put(
                self.index_key(&record.service_id),
                record.service_name.clone(),
                Some(opts),
            )
            .await
            .map_err(|e| SharpError::registry(format!("failed to put index record: {}", e)))?;

        let prior = {
            let mut leases = self.leases.lock().await;
            leases.insert(record.service_id.clone(), lease_id)
        };
        if let Some(old_lease) = prior {
            self.revoke_lease(&mut client, old_lease).await;
        }

        info!(
            "service registered: {} ({}) at {}",
            record.service_name,
            record.service_id,
            record.uri()
        );
        Ok(())
    }

    async fn unregister(&self, service_id: &str) -> Result<()> {
        let mut client = self.client.lock().await;

        let resp = client
            .get(self.index_key(service_id), None)
            .await
            .map_err(|e| SharpError::registry(format!("failed to read index record: {}", e)))?;
        let service_name = match resp.kvs().first() {
            Some(kv) => String::from_utf8_lossy(kv.value()).to_string(),
            None => return Ok(()),
        };

        client
            .delete(self.service_key(&service_name, service_id), None)
            .await
            .map_err(|e| SharpError::registry(format!("failed to delete service record: {}", e)))?;
        client
            .delete(self.index_key(service_id), None)
            .await
            .map_err(|e| SharpError::registry(format!("failed to delete index record: {}", e)))?;

        let lease = {
            let mut leases = self.leases.lock().await;
            leases.remove(service_id)
        };
        if let Some(lease_id) = lease {
            self.revoke_lease(&mut client, lease_id).await;
        }

        info!("service unregistered: {}", service_id);
        Ok(())
    }

    async fn discover(&self, service_name: &str) -> Result<Vec<ServiceInstance>> {
        let mut client = self.client.lock().await;
        let resp = client
            .get(
                self.service_prefix(service_name),
                Some(GetOptions::new().with_prefix()),
            )
            .await
            .map_err(|e| SharpError::registry(format!("failed to discover services: {}", e)))?;

        let mut instances = Vec::new();
        for kv in resp.kvs() {
            match serde_json::from_slice::<ServiceInstance>(kv.value()) {
                Ok(instance) if instance.is_up() => instances.push(instance),
                Ok(_) => {}
                Err(e) => warn!(
                    "skipping undecodable record {}: {}",
                    String::from_utf8_lossy(kv.key()),
                    e
                ),
            }
        }
        Ok(instances)
    }

    async fn get_service(&self, service_id: &str) -> Result<Option<ServiceInstance>> {
        let mut client = self.client.lock().await;

        let resp = client
            .get(self.index_key(service_id), None)
            .await
            .map_err(|e| SharpError::registry(format!("failed to read index record: {}", e)))?;
        let service_name = match resp.kvs().first() {
            Some(kv) => String::from_utf8_lossy(kv.value()).to_string(),
            None => return Ok(None),
        };

        let resp = client
            .get(self.service_key(&service_name, service_id), None)
            .await
            .map_err(|e| SharpError::registry(format!("failed to read service record: {}", e)))?;
        match resp.kvs().first() {
            Some(kv) => Ok(Some(serde_json::from_slice(kv.value())?)),
            None => Ok(None),
        }
    }

    async fn refresh(&self, service_id: &str, ttl: Duration) -> Result<()> {
        let instance = self
            .get_service(service_id)
            .await?
            .ok_or_else(|| SharpError::registry(format!("unknown service id: {}", service_id)))?;
        // 重新注册：新 lease 覆盖两个 key，旧 lease 在 register 中惰性撤销
        self.register(&instance, ttl).await
    }
}
