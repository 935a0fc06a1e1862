//! RPC 客户端管理器
//!
//! 每次调用执行 发现 -> 选择 -> 租借 -> 调用 -> 反馈，可重试错误按指数退避
//! 重试；后台对账任务清理注册中心已不存在实例的连接池

use super::pool::ClientPool;
use super::{RpcClientOptions, RpcTarget};
use crate::balancer::LoadBalancer;
use crate::error::{Result, SharpError};
use crate::registry::ServiceRegistry;
use crate::retry::{ExponentialBackoffPolicy, RetryPolicy};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::Status;
use tracing::{debug, info, warn};

/// RPC 客户端管理器
pub struct RpcClientManager {
    registry: ServiceRegistry,
    balancer: LoadBalancer,
    pools: Arc<DashMap<String, Arc<ClientPool>>>,
    options: RpcClientOptions,
    shutdown: CancellationToken,
    reconcile_handle: Mutex<Option<JoinHandle<()>>>,
}

impl RpcClientManager {
    /// 创建管理器并启动后台对账任务
    pub fn new(registry: ServiceRegistry, balancer: LoadBalancer, options: RpcClientOptions) -> Self {
        let manager = Self {
            registry,
            balancer,
            pools: Arc::new(DashMap::new()),
            options,
            shutdown: CancellationToken::new(),
            reconcile_handle: Mutex::new(None),
        };
        manager.spawn_reconciler();
        manager
    }

    /// 执行一次 RPC 调用
    ///
    /// `op` 收到本次选中的目标（通道 + 实例）；可重试的传输错误按退避策略
    /// 重试至多 `max_retries`（缺省取选项值）次，其余错误立即透传
    pub async fn execute<F, Fut, R>(
        &self,
        op: F,
        affinity_key: Option<&str>,
        max_retries: Option<usize>,
        cancel: &CancellationToken,
    ) -> Result<R>
    where
        F: Fn(RpcTarget) -> Fut,
        Fut: Future<Output = std::result::Result<R, Status>>,
    {
        let retries = max_retries.unwrap_or(self.options.max_retries);
        let policy = ExponentialBackoffPolicy::from_config(&self.options.backoff, retries);

        let mut attempt = 0usize;
        loop {
            if cancel.is_cancelled() {
                return Err(SharpError::Cancelled);
            }

            let err = match self.attempt_once(&op, affinity_key, cancel).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if matches!(err, SharpError::Cancelled) || !policy.should_retry(attempt, &err) {
                return Err(err);
            }

            let delay = policy.backoff_duration(attempt);
            debug!(
                "attempt {} against {} failed ({}), retrying in {:?}",
                attempt, self.options.service_name, err, delay
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SharpError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    /// 不带亲和键与取消的便捷调用
    pub async fn call<F, Fut, R>(&self, op: F) -> Result<R>
    where
        F: Fn(RpcTarget) -> Fut,
        Fut: Future<Output = std::result::Result<R, Status>>,
    {
        self.execute(op, None, None, &CancellationToken::new()).await
    }

    async fn attempt_once<F, Fut, R>(
        &self,
        op: &F,
        affinity_key: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<R>
    where
        F: Fn(RpcTarget) -> Fut,
        Fut: Future<Output = std::result::Result<R, Status>>,
    {
        let instances = self.registry.discover(&self.options.service_name).await?;
        let picked = self
            .balancer
            .select(&self.options.service_name, &instances, affinity_key)
            .ok_or_else(|| SharpError::NoAvailableInstance(self.options.service_name.clone()))?;

        let pool = match self.pools.entry(picked.service_id.clone()) {
            Entry::Occupied(entry) => {
                let pool = entry.get().clone();
                pool.update_instance(&picked);
                pool
            }
            Entry::Vacant(entry) => entry
                .insert(Arc::new(ClientPool::new(picked.clone(), &self.options)))
                .clone(),
        };

        let lease = match pool.rent(cancel).await {
            Ok(lease) => lease,
            Err(SharpError::Cancelled) => return Err(SharpError::Cancelled),
            Err(e) => {
                self.balancer.record_failure(&picked.service_id);
                return Err(e);
            }
        };

        let target = lease.target();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                pool.discard(lease);
                return Err(SharpError::Cancelled);
            }
            outcome = tokio::time::timeout(self.options.operation_timeout, op(target)) => outcome,
        };

        match outcome {
            Ok(Ok(value)) => {
                self.balancer.record_success(&picked.service_id);
                pool.put_back(lease);
                Ok(value)
            }
            Ok(Err(status)) => {
                self.balancer.record_failure(&picked.service_id);
                pool.discard(lease);
                Err(SharpError::Transport(status))
            }
            Err(_elapsed) => {
                self.balancer.record_failure(&picked.service_id);
                pool.discard(lease);
                Err(SharpError::Transport(Status::deadline_exceeded(
                    "operation timed out",
                )))
            }
        }
    }

    /// 当前连接池数量
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// 关闭管理器：停止对账、关闭所有连接池
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        if let Some(handle) = self.reconcile_handle.lock().unwrap().take() {
            handle.abort();
        }
        for entry in self.pools.iter() {
            entry.value().dispose();
        }
        self.pools.clear();
    }

    /// 后台对账：丢弃注册中心已不存在实例的连接池，从不新建
    fn spawn_reconciler(&self) {
        let registry = self.registry.clone();
        let pools = self.pools.clone();
        let service_name = self.options.service_name.clone();
        let interval = self.options.reconcile_interval;
        let shutdown = self.shutdown.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // interval 的首个 tick 立即完成，跳过
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                match registry.discover(&service_name).await {
                    Ok(instances) => {
                        let live: HashSet<String> =
                            instances.into_iter().map(|i| i.service_id).collect();
                        pools.retain(|service_id, pool| {
                            if live.contains(service_id) {
                                true
                            } else {
                                info!("dropping pool for departed instance {}", service_id);
                                pool.dispose();
                                false
                            }
                        });
                    }
                    Err(e) => warn!("reconciliation discovery failed: {}", e),
                }
            }
        });
        *self.reconcile_handle.lock().unwrap() = Some(handle);
    }
}

impl Drop for RpcClientManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.reconcile_handle.lock().unwrap().take() {
            handle.abort();
        }
    }
}
