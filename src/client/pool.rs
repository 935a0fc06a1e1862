//! 按实例的连接池
//!
//! 空闲包装器排成 FIFO，在途租借由信号量许可约束；
//! 每个许可恰好在归还或废弃时释放一次

use super::{RpcClientOptions, RpcTarget};
use crate::error::{Result, SharpError};
use crate::types::{Scheme, ServiceInstance};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tracing::debug;

/// 空闲超过此时长的包装器视为不健康，租借时丢弃
const IDLE_EXPIRY: Duration = Duration::from_secs(300);

/// 持有一条底层通道的客户端包装器
struct ClientWrapper {
    channel: Channel,
    last_used: Instant,
}

/// 一次租借：包装器 + 许可
///
/// 许可只随 lease 的销毁释放，put_back 与 discard 之外没有第三条路径
pub struct ClientLease {
    wrapper: ClientWrapper,
    instance: ServiceInstance,
    _permit: OwnedSemaphorePermit,
}

impl ClientLease {
    pub fn target(&self) -> RpcTarget {
        RpcTarget {
            channel: self.wrapper.channel.clone(),
            instance: self.instance.clone(),
        }
    }
}

/// 单实例连接池
pub struct ClientPool {
    instance: Mutex<ServiceInstance>,
    idle: Mutex<VecDeque<ClientWrapper>>,
    permits: Arc<Semaphore>,
    connection_timeout: Duration,
    operation_timeout: Duration,
    enable_tls: bool,
    idle_expiry: Duration,
}

impl ClientPool {
    pub fn new(instance: ServiceInstance, options: &RpcClientOptions) -> Self {
        Self {
            instance: Mutex::new(instance),
            idle: Mutex::new(VecDeque::new()),
            permits: Arc::new(Semaphore::new(options.max_connections_per_service)),
            connection_timeout: options.connection_timeout,
            operation_timeout: options.operation_timeout,
            enable_tls: options.enable_tls,
            idle_expiry: IDLE_EXPIRY,
        }
    }

    /// 同步注册中心下发的最新实例记录
    ///
    /// 端点变化时指向旧地址的空闲包装器全部作废
    pub fn update_instance(&self, latest: &ServiceInstance) {
        let mut instance = self.instance.lock().unwrap();
        if instance.uri() != latest.uri() {
            debug!(
                "endpoint for {} moved: {} -> {}",
                latest.service_id,
                instance.uri(),
                latest.uri()
            );
            self.idle.lock().unwrap().clear();
        }
        *instance = latest.clone();
    }

    /// 租借一个包装器
    ///
    /// 先等待许可，再复用未过期的空闲包装器，队列为空时新建通道
    pub async fn rent(&self, cancel: &CancellationToken) -> Result<ClientLease> {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SharpError::Cancelled),
            permit = self.permits.clone().acquire_owned() => {
                permit.map_err(|_| SharpError::connection("pool disposed"))?
            }
        };

        let instance = self.instance.lock().unwrap().clone();
        let wrapper = loop {
            let candidate = self.idle.lock().unwrap().pop_front();
            match candidate {
                Some(w) if w.last_used.elapsed() < self.idle_expiry => break Some(w),
                Some(_stale) => {
                    debug!("dropping stale idle connection to {}", instance.service_id);
                }
                None => break None,
            }
        };
        let wrapper = match wrapper {
            Some(w) => w,
            None => self.build_wrapper(&instance)?,
        };

        Ok(ClientLease {
            wrapper,
            instance,
            _permit: permit,
        })
    }

    /// 归还包装器：刷新 last_used、入队、释放许可
    pub fn put_back(&self, lease: ClientLease) {
        let ClientLease {
            mut wrapper,
            instance: _,
            _permit,
        } = lease;
        wrapper.last_used = Instant::now();
        self.idle.lock().unwrap().push_back(wrapper);
        // _permit 在此释放
    }

    /// 废弃包装器：连同底层通道与许可一并释放
    pub fn discard(&self, lease: ClientLease) {
        drop(lease);
    }

    /// 关闭池：清空空闲队列并让后续 rent 失败
    pub fn dispose(&self) {
        self.permits.close();
        self.idle.lock().unwrap().clear();
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn idle_len(&self) -> usize {
        self.idle.lock().unwrap().len()
    }

    fn build_wrapper(&self, instance: &ServiceInstance) -> Result<ClientWrapper> {
        let secure = instance.scheme == Scheme::Https && self.enable_tls;
        let uri = if instance.scheme == Scheme::Https && !secure {
            // 未启用 TLS 时降级为明文
            format!("http://{}:{}", instance.address, instance.port)
        } else {
            instance.uri()
        };

        let mut endpoint = Endpoint::from_shared(uri)
            .map_err(|e| SharpError::connection(format!("invalid endpoint uri: {}", e)))?
            .connect_timeout(self.connection_timeout)
            .timeout(self.operation_timeout);
        if secure {
            endpoint = endpoint
                .tls_config(ClientTlsConfig::new().with_native_roots())
                .map_err(|e| SharpError::connection(format!("tls config rejected: {}", e)))?;
        }

        // 惰性建连：建立失败以传输层状态从首次调用返回
        Ok(ClientWrapper {
            channel: endpoint.connect_lazy(),
            last_used: Instant::now(),
        })
    }
}
