//! Sharp Server Core Library
//!
//! 网关与游戏服务共用的 RPC fabric：基于租约的服务注册与发现、
//! 客户端负载均衡（轮询熔断 / 一致性哈希）、按实例的连接池与
//! 带退避重试的统一调用入口。

pub mod balancer;
pub mod client;
pub mod config;
pub mod error;
pub mod registration;
pub mod registry;
pub mod retry;
pub mod types;

// Re-exports
pub use balancer::{
    ConsistentHashBalancer, HealthOptions, LoadBalanceStrategy, LoadBalancer, LoadBalancerTrait,
    RoundRobinBalancer, create_load_balancer,
};
pub use client::{ClientLease, ClientPool, RpcClientManager, RpcClientOptions, RpcTarget};
pub use config::{
    Config, EtcdConfig, RedisConfig, RegistrationConfig, RegistryConfig, RetryBackoffConfig,
    RpcClientConfig, ServerConfig,
};
pub use error::{Result, SharpError};
pub use registration::{RegistrationAgent, RegistrationOptions};
pub use registry::{
    EtcdRegistry, MemoryRegistry, RedisRegistry, RegistryProvider, ServiceRegistry,
    ServiceRegistryTrait, create_registry,
};
pub use retry::{ExponentialBackoffPolicy, FixedRetryPolicy, RetryPolicy};
pub use types::{Scheme, ServiceInstance, ServiceStatus};
