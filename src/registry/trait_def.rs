//! 服务注册发现 Trait 定义

use crate::error::Result;
use crate::types::ServiceInstance;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// 服务注册发现 Trait
///
/// 注册代理与 RPC 客户端管理器共享同一个注册中心句柄，
/// 因此所有方法都以 `&self` 接收
#[async_trait]
pub trait ServiceRegistryTrait: Send + Sync {
    /// 注册服务实例，记录在 `ttl` 内有效
    ///
    /// 同一 service_id 重复注册会替换旧记录并延长 TTL；
    /// 写入时将 last_heartbeat 置为当前时间
    async fn register(&self, instance: &ServiceInstance, ttl: Duration) -> Result<()>;

    /// 注销服务实例，实例不存在不算错误
    async fn unregister(&self, service_id: &str) -> Result<()>;

    /// 发现指定服务名下所有状态为 Up 的实例
    async fn discover(&self, service_name: &str) -> Result<Vec<ServiceInstance>>;

    /// 通过反向索引获取服务实例
    async fn get_service(&self, service_id: &str) -> Result<Option<ServiceInstance>>;

    /// 以新的 TTL 续期已有记录并刷新 last_heartbeat
    ///
    /// 记录已过期时返回错误，调用方通过重新注册恢复
    async fn refresh(&self, service_id: &str, ttl: Duration) -> Result<()>;
}

/// 服务注册发现句柄
pub type ServiceRegistry = Arc<dyn ServiceRegistryTrait>;
