//! 负载均衡模块
//!
//! 两种策略：带健康度与熔断的轮询、带虚拟节点的一致性哈希。
//! 策略在装配时选定一次，调用方只面向统一接口

pub mod consistent_hash;
pub mod round_robin;

use crate::types::ServiceInstance;
use std::sync::Arc;

pub use consistent_hash::ConsistentHashBalancer;
pub use round_robin::{HealthOptions, RoundRobinBalancer};

/// 负载均衡策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadBalanceStrategy {
    /// 轮询（健康过滤 + 熔断）
    RoundRobin,
    /// 一致性哈希（虚拟节点 + 环缓存）
    ConsistentHash,
}

/// 负载均衡器统一接口
///
/// `select` 仅在过滤后无候选时返回 None；
/// 成功/失败反馈必须携带本次实际选中实例的 service_id
pub trait LoadBalancerTrait: Send + Sync {
    fn select(
        &self,
        service_name: &str,
        instances: &[ServiceInstance],
        affinity_key: Option<&str>,
    ) -> Option<ServiceInstance>;

    fn record_success(&self, service_id: &str);

    fn record_failure(&self, service_id: &str);
}

/// 负载均衡器句柄
pub type LoadBalancer = Arc<dyn LoadBalancerTrait>;

/// 根据策略创建负载均衡器
pub fn create_load_balancer(strategy: LoadBalanceStrategy) -> LoadBalancer {
    match strategy {
        LoadBalanceStrategy::RoundRobin => Arc::new(RoundRobinBalancer::new()),
        LoadBalanceStrategy::ConsistentHash => Arc::new(ConsistentHashBalancer::new()),
    }
}
