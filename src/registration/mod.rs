//! 注册代理
//!
//! 随服务进程常驻的后台工作者：启动时注册自身，按心跳间隔续期租约，
//! 优雅退出时注销。续期失败只记日志，由下一个心跳周期自愈

use crate::config::{RegistrationConfig, ServerConfig};
use crate::error::{Result, SharpError};
use crate::registry::ServiceRegistry;
use crate::types::{Scheme, ServiceInstance};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 注册代理选项
#[derive(Debug, Clone)]
pub struct RegistrationOptions {
    pub service_name: String,
    /// 显式地址优先；为空时从监听地址或本机出口地址推断
    pub address: Option<String>,
    pub port: Option<u16>,
    pub scheme: Option<Scheme>,
    pub version: Option<String>,
    pub metadata: HashMap<String, String>,
    pub heartbeat_interval: Duration,
    pub registration_ttl: Duration,
}

impl RegistrationOptions {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            address: None,
            port: None,
            scheme: None,
            version: None,
            metadata: HashMap::new(),
            heartbeat_interval: Duration::from_secs(30),
            registration_ttl: Duration::from_secs(120),
        }
    }

    pub fn from_config(
        service_name: impl Into<String>,
        server: &ServerConfig,
        registration: &RegistrationConfig,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            address: server.address.clone(),
            port: server.port,
            scheme: server.scheme,
            version: None,
            metadata: registration.metadata.clone(),
            heartbeat_interval: registration.heartbeat_interval(),
            registration_ttl: registration.registration_ttl(),
        }
    }
}

/// 注册代理
pub struct RegistrationAgent {
    registry: ServiceRegistry,
    instance: ServiceInstance,
    heartbeat_interval: Duration,
    registration_ttl: Duration,
    cancel: CancellationToken,
    heartbeat_handle: Option<JoinHandle<()>>,
}

impl RegistrationAgent {
    /// 构建注册代理
    ///
    /// `listener` 为宿主传输层实际绑定的监听地址，用于补全未显式配置的
    /// 地址与端口；显式配置的值从不被覆盖
    pub fn new(
        registry: ServiceRegistry,
        options: RegistrationOptions,
        listener: Option<SocketAddr>,
    ) -> Result<Self> {
        let address = resolve_address(options.address.as_deref(), listener);
        let port = options
            .port
            .or_else(|| listener.map(|addr| addr.port()))
            .ok_or_else(|| {
                SharpError::config("service port not configured and no listener address available")
            })?;

        if options.heartbeat_interval * 2 >= options.registration_ttl {
            warn!(
                "heartbeat interval {:?} is not below half the registration ttl {:?}; \
                 a single missed refresh may expire the lease",
                options.heartbeat_interval, options.registration_ttl
            );
        }

        let mut instance = ServiceInstance::new(options.service_name, address, port)
            .with_scheme(options.scheme.unwrap_or_default());
        if let Some(version) = options.version {
            instance = instance.with_version(version);
        }
        for (key, value) in options.metadata {
            instance = instance.with_metadata(key, value);
        }

        Ok(Self {
            registry,
            instance,
            heartbeat_interval: options.heartbeat_interval,
            registration_ttl: options.registration_ttl,
            cancel: CancellationToken::new(),
            heartbeat_handle: None,
        })
    }

    /// 本进程注册的实例
    pub fn instance(&self) -> &ServiceInstance {
        &self.instance
    }

    /// 注册自身并启动心跳循环
    ///
    /// 首次注册失败不致命，心跳循环会在下个周期重新注册
    pub async fn start(&mut self) {
        match self
            .registry
            .register(&self.instance, self.registration_ttl)
            .await
        {
            Ok(()) => info!(
                "registration agent started for {} ({})",
                self.instance.service_name, self.instance.service_id
            ),
            Err(e) => error!(
                "initial registration failed for {}: {}",
                self.instance.service_id, e
            ),
        }

        let registry = self.registry.clone();
        let instance = self.instance.clone();
        let ttl = self.registration_ttl;
        let interval = self.heartbeat_interval;
        let cancel = self.cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // interval 的首个 tick 立即完成，跳过
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                match registry.refresh(&instance.service_id, ttl).await {
                    Ok(()) => debug!("heartbeat refreshed for {}", instance.service_id),
                    Err(e) => {
                        // 记录已丢失（例如租约过期）时重新注册恢复
                        warn!(
                            "heartbeat refresh failed for {}: {}, re-registering",
                            instance.service_id, e
                        );
                        if let Err(e) = registry.register(&instance, ttl).await {
                            error!(
                                "re-registration failed for {}: {}",
                                instance.service_id, e
                            );
                        }
                    }
                }
            }
        });
        self.heartbeat_handle = Some(handle);
    }

    /// 停止心跳并注销自身
    pub async fn stop(&mut self) -> Result<()> {
        self.cancel.cancel();
        if let Some(handle) = self.heartbeat_handle.take() {
            handle.abort();
        }
        self.registry.unregister(&self.instance.service_id).await?;
        info!(
            "registration agent stopped for {} ({})",
            self.instance.service_name, self.instance.service_id
        );
        Ok(())
    }
}

impl Drop for RegistrationAgent {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.heartbeat_handle.take() {
            handle.abort();
        }
    }
}

fn resolve_address(explicit: Option<&str>, listener: Option<SocketAddr>) -> String {
    if let Some(addr) = explicit {
        if !addr.is_empty() {
            return addr.to_string();
        }
    }
    if let Some(addr) = listener {
        if !addr.ip().is_unspecified() {
            return addr.ip().to_string();
        }
    }
    infer_local_ip()
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "127.0.0.1".to_string())
}

/// 通过 UDP 路由探测本机出口地址，不产生实际流量
fn infer_local_ip() -> Option<IpAddr> {
    let socket = std::net::UdpSocket::bind(("0.0.0.0", 0)).ok()?;
    socket.connect(("8.8.8.8", 80)).ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryRegistry;
    use std::sync::Arc;

    #[test]
    fn test_explicit_address_wins() {
        let listener: SocketAddr = "192.168.1.5:9000".parse().unwrap();
        assert_eq!(
            resolve_address(Some("game.example.com"), Some(listener)),
            "game.example.com"
        );
        assert_eq!(resolve_address(None, Some(listener)), "192.168.1.5");
    }

    #[test]
    fn test_unspecified_listener_falls_back_to_inference() {
        let listener: SocketAddr = "0.0.0.0:9000".parse().unwrap();
        let resolved = resolve_address(None, Some(listener));
        assert_ne!(resolved, "0.0.0.0");
        assert!(!resolved.is_empty());
    }

    #[tokio::test]
    async fn test_port_required() {
        let registry: ServiceRegistry = Arc::new(MemoryRegistry::new());
        let options = RegistrationOptions::new("GameServer");
        assert!(RegistrationAgent::new(registry, options, None).is_err());
    }

    #[tokio::test]
    async fn test_listener_fills_endpoint_gaps() {
        let registry: ServiceRegistry = Arc::new(MemoryRegistry::new());
        let options = RegistrationOptions::new("GameServer");
        let listener: SocketAddr = "10.1.2.3:7144".parse().unwrap();

        let agent = RegistrationAgent::new(registry, options, Some(listener)).unwrap();
        assert_eq!(agent.instance().address, "10.1.2.3");
        assert_eq!(agent.instance().port, 7144);
        assert_eq!(agent.instance().scheme, Scheme::Http);
        assert_eq!(agent.instance().version, "1.0");
    }
}
