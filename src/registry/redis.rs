//! Redis 服务注册发现实现
//!
//! 名称记录、反向索引与名称集合共享同一个 TTL，注册走 MULTI/EXEC 管道；
//! 集合成员没有独立 TTL，发现时对失效成员做机会式清理

use super::trait_def::ServiceRegistryTrait;
use crate::error::{Result, SharpError};
use crate::types::ServiceInstance;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Redis 服务注册发现
pub struct RedisRegistry {
    conn: MultiplexedConnection,
    prefix: String,
}

impl RedisRegistry {
    pub async fn new(connection_string: &str, prefix: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(connection_string)
            .map_err(|e| SharpError::registry(format!("failed to open redis client: {}", e)))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| SharpError::registry(format!("failed to connect to redis: {}", e)))?;

        Ok(Self {
            conn,
            prefix: prefix.into(),
        })
    }

    fn service_key(&self, service_name: &str, service_id: &str) -> String {
        format!("{}/service/{}/{}", self.prefix, service_name, service_id)
    }

    fn index_key(&self, service_id: &str) -> String {
        format!("{}/index/{}", self.prefix, service_id)
    }

    fn list_key(&self, service_name: &str) -> String {
        format!("{}/list/{}", self.prefix, service_name)
    }
}

#[async_trait]
impl ServiceRegistryTrait for RedisRegistry {
    async fn register(&self, instance: &ServiceInstance, ttl: Duration) -> Result<()> {
        let mut record = instance.clone();
        record.touch();
        let value = serde_json::to_string(&record)?;
        let ttl_secs = ttl.as_secs().max(1);

        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .set_ex(
                self.service_key(&record.service_name, &record.service_id),
                value,
                ttl_secs,
            )
            .ignore()
            .set_ex(
                self.index_key(&record.service_id),
                &record.service_name,
                ttl_secs,
            )
            .ignore()
            .sadd(self.list_key(&record.service_name), &record.service_id)
            .ignore()
            .expire(self.list_key(&record.service_name), ttl_secs as i64)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| SharpError::registry(format!("failed to register service: {}", e)))?;

        info!(
            "service registered: {} ({}) at {}",
            record.service_name,
            record.service_id,
            record.uri()
        );
        Ok(())
    }

    async fn unregister(&self, service_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();

        let service_name: Option<String> = conn
            .get(self.index_key(service_id))
            .await
            .map_err(|e| SharpError::registry(format!("failed to read index record: {}", e)))?;
        let service_name = match service_name {
            Some(name) => name,
            None => return Ok(()),
        };

        let _: () = redis::pipe()
            .atomic()
            .del(self.service_key(&service_name, service_id))
            .ignore()
            .del(self.index_key(service_id))
            .ignore()
            .srem(self.list_key(&service_name), service_id)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| SharpError::registry(format!("failed to unregister service: {}", e)))?;

        info!("service unregistered: {}", service_id);
        Ok(())
    }

    async fn discover(&self, service_name: &str) -> Result<Vec<ServiceInstance>> {
        let mut conn = self.conn.clone();

        let ids: Vec<String> = conn
            .smembers(self.list_key(service_name))
            .await
            .map_err(|e| SharpError::registry(format!("failed to read service set: {}", e)))?;

        let mut instances = Vec::new();
        for service_id in ids {
            let value: Option<String> = conn
                .get(self.service_key(service_name, &service_id))
                .await
                .map_err(|e| SharpError::registry(format!("failed to read service record: {}", e)))?;

            match value {
                Some(json) => match serde_json::from_str::<ServiceInstance>(&json) {
                    Ok(instance) if instance.is_up() => instances.push(instance),
                    Ok(_) => {}
                    Err(e) => warn!("skipping undecodable record for {}: {}", service_id, e),
                },
                None => {
                    // 值记录已过期，清理残留的集合成员
                    debug!("pruning stale set member: {}", service_id);
                    let _: () = conn
                        .srem(self.list_key(service_name), &service_id)
                        .await
                        .unwrap_or(());
                }
            }
        }
        Ok(instances)
    }

    async fn get_service(&self, service_id: &str) -> Result<Option<ServiceInstance>> {
        let mut conn = self.conn.clone();

        let service_name: Option<String> = conn
            .get(self.index_key(service_id))
            .await
            .map_err(|e| SharpError::registry(format!("failed to read index record: {}", e)))?;
        let service_name = match service_name {
            Some(name) => name,
            None => return Ok(None),
        };

        let value: Option<String> = conn
            .get(self.service_key(&service_name, service_id))
            .await
            .map_err(|e| SharpError::registry(format!("failed to read service record: {}", e)))?;
        match value {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn refresh(&self, service_id: &str, ttl: Duration) -> Result<()> {
        let instance = self
            .get_service(service_id)
            .await?
            .ok_or_else(|| SharpError::registry(format!("unknown service id: {}", service_id)))?;
        self.register(&instance, ttl).await
    }
}
