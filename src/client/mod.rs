//! RPC 客户端模块
//!
//! 按后端实例维护连接池，提供 发现 -> 选择 -> 租借 -> 调用 -> 反馈 的
//! 统一执行入口，并在后台与注册中心对账

pub mod manager;
pub mod pool;

pub use manager::RpcClientManager;
pub use pool::{ClientLease, ClientPool};

use crate::config::{RetryBackoffConfig, RpcClientConfig};
use crate::types::ServiceInstance;
use std::time::Duration;
use tonic::transport::Channel;

/// RPC 客户端选项
#[derive(Debug, Clone)]
pub struct RpcClientOptions {
    pub service_name: String,
    pub max_retries: usize,
    pub max_connections_per_service: usize,
    pub connection_timeout: Duration,
    pub operation_timeout: Duration,
    pub enable_tls: bool,
    pub backoff: RetryBackoffConfig,
    pub reconcile_interval: Duration,
}

impl RpcClientOptions {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            max_retries: 3,
            max_connections_per_service: 10,
            connection_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(30),
            enable_tls: false,
            backoff: RetryBackoffConfig::default(),
            reconcile_interval: Duration::from_secs(30),
        }
    }

    pub fn from_config(config: &RpcClientConfig) -> Self {
        Self {
            service_name: config.service_name.clone(),
            max_retries: config.max_retries,
            max_connections_per_service: config.max_connections_per_service,
            connection_timeout: config.connection_timeout(),
            operation_timeout: config.operation_timeout(),
            enable_tls: config.enable_tls,
            backoff: config.retry_backoff.clone(),
            reconcile_interval: Duration::from_secs(30),
        }
    }
}

/// 单次调用的目标：gRPC 通道加上本次实际选中的实例
///
/// 实例随目标一起交给调用方，反馈与日志始终使用真正被选中的 service_id
#[derive(Clone)]
pub struct RpcTarget {
    pub channel: Channel,
    pub instance: ServiceInstance,
}
