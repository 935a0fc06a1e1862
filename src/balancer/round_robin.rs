//! 轮询负载均衡（健康过滤 + 熔断）

use super::LoadBalancerTrait;
use crate::types::ServiceInstance;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// 健康度评估参数
#[derive(Debug, Clone)]
pub struct HealthOptions {
    /// 指数衰减时间常数，同时是样本的有效观察窗口
    pub evaluation_window: Duration,
    /// 失败率阈值，超过即判定不健康
    pub failure_threshold: f64,
    /// 低于此样本数不做失败率判定
    pub minimum_sample_size: f64,
    /// 熔断后拒绝流量的时长
    pub open_circuit_duration: Duration,
}

impl Default for HealthOptions {
    fn default() -> Self {
        Self {
            evaluation_window: Duration::from_secs(60),
            failure_threshold: 0.5,
            minimum_sample_size: 5.0,
            open_circuit_duration: Duration::from_secs(30),
        }
    }
}

/// 单实例健康记录，锁内完成衰减、记录与读取
struct HealthRecord {
    successes: f64,
    failures: f64,
    last_sample: Instant,
    circuit_open_until: Option<Instant>,
}

impl HealthRecord {
    fn new(now: Instant) -> Self {
        Self {
            successes: 0.0,
            failures: 0.0,
            last_sample: now,
            circuit_open_until: None,
        }
    }

    /// 把两个计数衰减到当前时刻；衰减同比作用于成功与失败，失败率不变，
    /// 只有样本总量随时间跌破 minimum_sample_size 后实例才会被重新放行
    fn decay(&mut self, now: Instant, window: Duration) {
        let dt = now.duration_since(self.last_sample);
        let factor = (-dt.as_secs_f64() / window.as_secs_f64()).exp();
        self.successes *= factor;
        self.failures *= factor;
        self.last_sample = now;
    }

    fn unhealthy(&self, now: Instant, opts: &HealthOptions) -> bool {
        if let Some(until) = self.circuit_open_until {
            if now < until {
                return true;
            }
        }
        let total = self.successes + self.failures;
        total >= opts.minimum_sample_size && self.failures / total > opts.failure_threshold
    }
}

/// 轮询负载均衡器
///
/// 每个服务名维护独立的单调计数器，候选集取 Up 与健康实例的交集；
/// 全部不健康时退化为所有 Up 实例（fail-open）
pub struct RoundRobinBalancer {
    counters: DashMap<String, AtomicU32>,
    health: DashMap<String, Mutex<HealthRecord>>,
    opts: HealthOptions,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self::with_options(HealthOptions::default())
    }

    pub fn with_options(opts: HealthOptions) -> Self {
        Self {
            counters: DashMap::new(),
            health: DashMap::new(),
            opts,
        }
    }

    fn is_healthy(&self, service_id: &str, now: Instant) -> bool {
        match self.health.get(service_id) {
            Some(entry) => {
                let mut record = entry.lock().unwrap();
                record.decay(now, self.opts.evaluation_window);
                !record.unhealthy(now, &self.opts)
            }
            None => true,
        }
    }

    fn record(&self, service_id: &str, success: bool) {
        let now = Instant::now();
        let entry = self
            .health
            .entry(service_id.to_string())
            .or_insert_with(|| Mutex::new(HealthRecord::new(now)));
        let mut record = entry.lock().unwrap();
        record.decay(now, self.opts.evaluation_window);

        if success {
            record.successes += 1.0;
            record.circuit_open_until = None;
        } else {
            record.failures += 1.0;
            let total = record.successes + record.failures;
            let crossed = total >= self.opts.minimum_sample_size
                && record.failures / total > self.opts.failure_threshold;
            if crossed && record.circuit_open_until.map_or(true, |until| now >= until) {
                record.circuit_open_until = Some(now + self.opts.open_circuit_duration);
                warn!(
                    "circuit opened for {} ({:.0}% failures over {:.1} samples)",
                    service_id,
                    record.failures / total * 100.0,
                    total
                );
            }
        }
    }
}

impl Default for RoundRobinBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancerTrait for RoundRobinBalancer {
    fn select(
        &self,
        service_name: &str,
        instances: &[ServiceInstance],
        _affinity_key: Option<&str>,
    ) -> Option<ServiceInstance> {
        let now = Instant::now();
        let up: Vec<&ServiceInstance> = instances.iter().filter(|i| i.is_up()).collect();
        if up.is_empty() {
            return None;
        }

        let healthy: Vec<&ServiceInstance> = up
            .iter()
            .copied()
            .filter(|i| self.is_healthy(&i.service_id, now))
            .collect();
        let candidates = if healthy.is_empty() {
            debug!("no healthy instance for {}, failing open", service_name);
            &up
        } else {
            &healthy
        };

        let counter = self
            .counters
            .entry(service_name.to_string())
            .or_insert_with(|| AtomicU32::new(0));
        let n = counter.fetch_add(1, Ordering::Relaxed);
        let picked = candidates[n as usize % candidates.len()];
        Some(picked.clone())
    }

    fn record_success(&self, service_id: &str) {
        self.record(service_id, true);
    }

    fn record_failure(&self, service_id: &str) {
        self.record(service_id, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ServiceStatus;

    fn fleet(count: usize) -> Vec<ServiceInstance> {
        (0..count)
            .map(|i| {
                ServiceInstance::new("GameServer", format!("10.0.0.{}", i + 1), 7144)
                    .with_id(format!("g{}", i + 1))
            })
            .collect()
    }

    #[test]
    fn test_round_robin_fairness() {
        let balancer = RoundRobinBalancer::new();
        let instances = fleet(3);

        let mut counts = std::collections::HashMap::new();
        for _ in 0..300 {
            let picked = balancer.select("GameServer", &instances, None).unwrap();
            *counts.entry(picked.service_id).or_insert(0u32) += 1;
        }

        for id in ["g1", "g2", "g3"] {
            assert_eq!(counts[id], 100, "uneven selection for {}", id);
        }
    }

    #[test]
    fn test_counters_independent_per_name() {
        let balancer = RoundRobinBalancer::new();
        let game = fleet(3);
        let lobby: Vec<ServiceInstance> = fleet(3)
            .into_iter()
            .map(|i| {
                let id = format!("l{}", &i.service_id[1..]);
                ServiceInstance::new("Lobby", i.address.clone(), i.port).with_id(id)
            })
            .collect();

        balancer.select("GameServer", &game, None).unwrap();
        balancer.select("GameServer", &game, None).unwrap();
        // Lobby 的计数器不受 GameServer 影响，从头开始
        let picked = balancer.select("Lobby", &lobby, None).unwrap();
        assert_eq!(picked.service_id, "l1");
    }

    #[test]
    fn test_skips_non_up_instances() {
        let balancer = RoundRobinBalancer::new();
        let mut instances = fleet(3);
        instances[1].status = ServiceStatus::Maintenance;

        for _ in 0..10 {
            let picked = balancer.select("GameServer", &instances, None).unwrap();
            assert_ne!(picked.service_id, "g2");
        }

        let all_down: Vec<ServiceInstance> = fleet(2)
            .into_iter()
            .map(|i| i.with_status(ServiceStatus::Down))
            .collect();
        assert!(balancer.select("GameServer", &all_down, None).is_none());
    }

    #[test]
    fn test_circuit_opens_and_excludes() {
        let balancer = RoundRobinBalancer::with_options(HealthOptions {
            evaluation_window: Duration::from_secs(60),
            open_circuit_duration: Duration::from_secs(30),
            ..HealthOptions::default()
        });
        let instances = fleet(2);

        for _ in 0..5 {
            balancer.record_failure("g1");
        }

        // g1 熔断期间所有选择都落在 g2
        for _ in 0..20 {
            let picked = balancer.select("GameServer", &instances, None).unwrap();
            assert_eq!(picked.service_id, "g2");
        }
    }

    #[test]
    fn test_circuit_reopens_after_decay() {
        // 短窗口：熔断到期后样本总量衰减到阈值以下，实例重新放行
        let balancer = RoundRobinBalancer::with_options(HealthOptions {
            evaluation_window: Duration::from_millis(50),
            open_circuit_duration: Duration::from_millis(100),
            ..HealthOptions::default()
        });
        let instances = fleet(2);

        for _ in 0..5 {
            balancer.record_failure("g1");
        }
        assert!(!balancer.is_healthy("g1", Instant::now()));

        std::thread::sleep(Duration::from_millis(300));
        assert!(balancer.is_healthy("g1", Instant::now()));
        let picked_ids: std::collections::HashSet<String> = (0..10)
            .map(|_| {
                balancer
                    .select("GameServer", &instances, None)
                    .unwrap()
                    .service_id
            })
            .collect();
        assert!(picked_ids.contains("g1"));
    }

    #[test]
    fn test_success_recovers_instance() {
        let balancer = RoundRobinBalancer::new();

        for _ in 0..5 {
            balancer.record_failure("g1");
        }
        assert!(!balancer.is_healthy("g1", Instant::now()));

        // 成功清除熔断；失败率降到阈值以下后恢复健康
        for _ in 0..6 {
            balancer.record_success("g1");
        }
        assert!(balancer.is_healthy("g1", Instant::now()));
    }

    #[test]
    fn test_fail_open_when_all_unhealthy() {
        let balancer = RoundRobinBalancer::new();
        let instances = fleet(2);

        for id in ["g1", "g2"] {
            for _ in 0..5 {
                balancer.record_failure(id);
            }
        }

        // 全部不健康时退化为所有 Up 实例，而不是返回 None
        assert!(balancer.select("GameServer", &instances, None).is_some());
    }
}
