//! 服务实例定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// 服务实例状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceStatus {
    Up,
    Down,
    Maintenance,
}

/// 传输协议
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    #[default]
    Http,
    Https,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Http => write!(f, "http"),
            Scheme::Https => write!(f, "https"),
        }
    }
}

fn default_version() -> String {
    "1.0".to_string()
}

/// 服务实例
///
/// 注册与选择的基本单元，`service_id` 在实例整个生命周期内全局唯一
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub service_id: String,
    pub service_name: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub scheme: Scheme,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub status: ServiceStatus,
    pub last_heartbeat: DateTime<Utc>,
}

impl ServiceInstance {
    /// 创建新的服务实例（自动生成 UUID 作为 service_id）
    pub fn new(
        service_name: impl Into<String>,
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            service_id: uuid::Uuid::new_v4().to_string(),
            service_name: service_name.into(),
            address: address.into(),
            port,
            scheme: Scheme::Http,
            version: default_version(),
            metadata: HashMap::new(),
            status: ServiceStatus::Up,
            last_heartbeat: Utc::now(),
        }
    }

    /// 指定 service_id
    pub fn with_id(mut self, service_id: impl Into<String>) -> Self {
        self.service_id = service_id.into();
        self
    }

    /// 设置协议
    pub fn with_scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// 设置版本
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// 添加元数据（对 fabric 透明）
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// 设置状态
    pub fn with_status(mut self, status: ServiceStatus) -> Self {
        self.status = status;
        self
    }

    /// 服务 URI（`scheme://address:port`）
    pub fn uri(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.address, self.port)
    }

    pub fn is_up(&self) -> bool {
        self.status == ServiceStatus::Up
    }

    /// 刷新心跳时间
    pub fn touch(&mut self) {
        self.last_heartbeat = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_format() {
        let instance = ServiceInstance::new("GameServer", "10.0.0.1", 7144);
        assert_eq!(instance.uri(), "http://10.0.0.1:7144");

        let tls = instance.with_scheme(Scheme::Https);
        assert_eq!(tls.uri(), "https://10.0.0.1:7144");
    }

    #[test]
    fn test_json_field_names() {
        let instance = ServiceInstance::new("GameServer", "10.0.0.1", 7144).with_id("g1");
        let json = serde_json::to_value(&instance).unwrap();

        assert_eq!(json["service_id"], "g1");
        assert_eq!(json["service_name"], "GameServer");
        assert_eq!(json["address"], "10.0.0.1");
        assert_eq!(json["port"], 7144);
        assert_eq!(json["scheme"], "http");
        assert_eq!(json["version"], "1.0");
        assert_eq!(json["status"], "Up");
        assert!(json["last_heartbeat"].is_string());
        assert!(json["metadata"].is_object());
    }

    #[test]
    fn test_unknown_fields_ignored() {
        // 读取时忽略未知字段，缺省字段回退默认值
        let json = r#"{
            "service_id": "g1",
            "service_name": "GameServer",
            "address": "10.0.0.1",
            "port": 7144,
            "status": "Maintenance",
            "last_heartbeat": "2025-01-01T00:00:00Z",
            "future_field": 42
        }"#;

        let instance: ServiceInstance = serde_json::from_str(json).unwrap();
        assert_eq!(instance.service_id, "g1");
        assert_eq!(instance.scheme, Scheme::Http);
        assert_eq!(instance.version, "1.0");
        assert_eq!(instance.status, ServiceStatus::Maintenance);
        assert!(!instance.is_up());
    }
}
