//! 一致性哈希负载均衡（虚拟节点 + 环缓存）

use super::LoadBalancerTrait;
use crate::types::ServiceInstance;
use sha1::{Digest, Sha1};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tracing::debug;

/// 每个实例的虚拟节点数，以内存换均衡度
pub const DEFAULT_VIRTUAL_NODES: usize = 160;

/// 取 SHA-1 摘要的低 32 位作为环位置；选 SHA-1 取其分布均匀，与密码学强度无关
fn hash32(key: &str) -> u32 {
    let digest = Sha1::digest(key.as_bytes());
    u32::from_be_bytes([digest[16], digest[17], digest[18], digest[19]])
}

/// 单个服务名的环缓存
struct RingState {
    /// 实例集的规范指纹，集合变化时惰性重建
    signature: String,
    /// 按哈希排序的虚拟节点
    nodes: Vec<(u32, ServiceInstance)>,
}

/// 一致性哈希负载均衡器
///
/// 同一亲和键在同一环快照上总是落到同一实例；
/// 无亲和键时退化为随机选择
pub struct ConsistentHashBalancer {
    rings: Mutex<HashMap<String, RingState>>,
    virtual_nodes: usize,
}

impl ConsistentHashBalancer {
    pub fn new() -> Self {
        Self::with_virtual_nodes(DEFAULT_VIRTUAL_NODES)
    }

    pub fn with_virtual_nodes(virtual_nodes: usize) -> Self {
        Self {
            rings: Mutex::new(HashMap::new()),
            virtual_nodes: virtual_nodes.max(1),
        }
    }

    fn signature(up: &[&ServiceInstance]) -> String {
        let mut parts: Vec<String> = up
            .iter()
            .map(|i| {
                format!(
                    "{}:{}:{}:{}:{}",
                    i.service_id, i.address, i.port, i.scheme, i.version
                )
            })
            .collect();
        parts.sort();
        parts.join("|")
    }

    fn build_ring(up: &[&ServiceInstance], virtual_nodes: usize) -> Vec<(u32, ServiceInstance)> {
        let mut ring = BTreeMap::new();
        for instance in up {
            for i in 0..virtual_nodes {
                let mut h = hash32(&format!(
                    "{}:{}:{}:{}",
                    instance.service_id, instance.address, instance.port, i
                ));
                // 哈希冲突线性探测，+1 回绕
                while ring.contains_key(&h) {
                    h = h.wrapping_add(1);
                }
                ring.insert(h, (*instance).clone());
            }
        }
        ring.into_iter().collect()
    }
}

impl Default for ConsistentHashBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancerTrait for ConsistentHashBalancer {
    fn select(
        &self,
        service_name: &str,
        instances: &[ServiceInstance],
        affinity_key: Option<&str>,
    ) -> Option<ServiceInstance> {
        let up: Vec<&ServiceInstance> = instances.iter().filter(|i| i.is_up()).collect();
        if up.is_empty() {
            return None;
        }

        let signature = Self::signature(&up);
        let mut rings = self.rings.lock().unwrap();
        let state = rings
            .entry(service_name.to_string())
            .or_insert_with(|| RingState {
                signature: String::new(),
                nodes: Vec::new(),
            });
        if state.signature != signature {
            state.nodes = Self::build_ring(&up, self.virtual_nodes);
            state.signature = signature;
            debug!(
                "hash ring rebuilt for {} ({} virtual nodes)",
                service_name,
                state.nodes.len()
            );
        }

        let key = match affinity_key {
            Some(k) => k.to_string(),
            None => format!("{:032x}", rand::random::<u128>()),
        };
        let h = hash32(&key);
        let idx = state.nodes.partition_point(|(node_hash, _)| *node_hash < h);
        let (_, instance) = &state.nodes[if idx == state.nodes.len() { 0 } else { idx }];
        Some(instance.clone())
    }

    // 反馈接口保留为将来动态加权的挂点
    fn record_success(&self, _service_id: &str) {}

    fn record_failure(&self, _service_id: &str) {}
}
