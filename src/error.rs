//! Sharp Server Core 错误类型
//!
//! 统一的错误类型加可重试分类：重试与否是 fabric 唯一关心的语义区分，
//! 其余错误只做透传

use thiserror::Error;
use tonic::Code;

/// Sharp Server 统一错误类型
#[derive(Error, Debug)]
pub enum SharpError {
    /// 发现结果为空或负载均衡器未选出实例，不在内部重试
    #[error("no available instance for service '{0}'")]
    NoAvailableInstance(String),

    /// 传输层错误，按 gRPC 状态码分类是否可重试
    #[error("transport error: {0}")]
    Transport(#[from] tonic::Status),

    /// 注册中心后端错误，在 Execute 的发现阶段按可重试处理
    #[error("registry error: {0}")]
    Registry(String),

    /// 通道建立失败
    #[error("connection failed: {0}")]
    Connection(String),

    /// 注册记录序列化/反序列化失败
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 调用方主动取消
    #[error("operation cancelled")]
    Cancelled,

    /// 配置错误
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SharpError {
    pub fn registry(msg: impl Into<String>) -> Self {
        SharpError::Registry(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        SharpError::Connection(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        SharpError::Config(msg.into())
    }

    /// 判断是否为可重试的错误
    ///
    /// 传输层白名单：unavailable、deadline-exceeded、resource-exhausted、
    /// aborted、internal；注册中心 IO 与通道建立失败同样可重试
    pub fn is_retryable(&self) -> bool {
        match self {
            SharpError::Transport(status) => matches!(
                status.code(),
                Code::Unavailable
                    | Code::DeadlineExceeded
                    | Code::ResourceExhausted
                    | Code::Aborted
                    | Code::Internal
            ),
            SharpError::Registry(_) | SharpError::Connection(_) => true,
            _ => false,
        }
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, SharpError>;

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Status;

    #[test]
    fn test_retryable_transport_codes() {
        let retryable = [
            Status::unavailable("down"),
            Status::deadline_exceeded("slow"),
            Status::resource_exhausted("full"),
            Status::aborted("conflict"),
            Status::internal("boom"),
        ];
        for status in retryable {
            assert!(SharpError::Transport(status).is_retryable());
        }

        let terminal = [
            Status::unauthenticated("who are you"),
            Status::invalid_argument("bad"),
            Status::not_found("missing"),
            Status::permission_denied("no"),
            Status::failed_precondition("nope"),
        ];
        for status in terminal {
            assert!(!SharpError::Transport(status).is_retryable());
        }
    }

    #[test]
    fn test_non_transport_classification() {
        assert!(SharpError::registry("etcd down").is_retryable());
        assert!(SharpError::connection("refused").is_retryable());
        assert!(!SharpError::NoAvailableInstance("GameServer".into()).is_retryable());
        assert!(!SharpError::Cancelled.is_retryable());
        assert!(!SharpError::config("bad provider").is_retryable());
    }
}
