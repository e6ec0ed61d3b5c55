use std::borrow::Cow;
use std::fmt;

use thiserror::Error;

/// 传输层错误分类。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 让 TCP、TLS 等实现共享同一组失败语义，调用方据此区分“调用方 bug”“会话终结”“配置问题”；
/// - 每个分类都对应稳定错误码，日志与测试无需解析文案即可定位问题。
///
/// ## 契约（What）
/// - `InvalidState`：在禁止的状态下调用操作，属于调用方 bug，同步返回且不会在内部重试；
/// - `AllocationFailure`：接收缓冲无法继续增长，会话随即进入 Error；
/// - `TransportFailure`：底层传输报告错误，会话终结；
/// - `HandshakeFailure`：TLS 引擎拒绝握手；
/// - `CredentialFailure`：证书或私钥无法装载，`open` 在任何传输 I/O 之前同步失败；
/// - `UnsupportedOption`：未知选项且没有可转发的下层处理者；
/// - `InvalidOptionValue`：选项名已识别，但取值类型不符合要求；
/// - `SendFailed`：引擎未能完整接收待发送缓冲；
/// - `NotInitialized`：进程级加密后端尚未初始化。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum IoErrorKind {
    InvalidState,
    AllocationFailure,
    TransportFailure,
    HandshakeFailure,
    CredentialFailure,
    UnsupportedOption,
    InvalidOptionValue,
    SendFailed,
    NotInitialized,
}

impl IoErrorKind {
    /// 返回稳定错误码，供日志与断言使用。
    pub const fn code(self) -> &'static str {
        match self {
            IoErrorKind::InvalidState => "spark.transport.invalid_state",
            IoErrorKind::AllocationFailure => "spark.transport.allocation_failure",
            IoErrorKind::TransportFailure => "spark.transport.transport_failure",
            IoErrorKind::HandshakeFailure => "spark.transport.handshake_failure",
            IoErrorKind::CredentialFailure => "spark.transport.credential_failure",
            IoErrorKind::UnsupportedOption => "spark.transport.unsupported_option",
            IoErrorKind::InvalidOptionValue => "spark.transport.invalid_option_value",
            IoErrorKind::SendFailed => "spark.transport.send_failed",
            IoErrorKind::NotInitialized => "spark.transport.not_initialized",
        }
    }

    /// 返回默认文案。
    pub const fn message(self) -> &'static str {
        match self {
            IoErrorKind::InvalidState => "operation not permitted in current state",
            IoErrorKind::AllocationFailure => "receive buffer could not grow",
            IoErrorKind::TransportFailure => "underlying transport failed",
            IoErrorKind::HandshakeFailure => "tls handshake failed",
            IoErrorKind::CredentialFailure => "credentials could not be loaded",
            IoErrorKind::UnsupportedOption => "option not supported",
            IoErrorKind::InvalidOptionValue => "option value has the wrong type",
            IoErrorKind::SendFailed => "send was not fully accepted",
            IoErrorKind::NotInitialized => "crypto backend not initialized",
        }
    }
}

impl fmt::Display for IoErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// 传输层统一错误：分类 + 细节文案。
///
/// 需要 `Clone`，因为同一个错误既会作为同步返回值，也会交给 `on_error` 回调。
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{kind}: {detail}")]
pub struct IoError {
    kind: IoErrorKind,
    detail: Cow<'static, str>,
}

impl IoError {
    /// 以分类与细节文案构造错误。
    pub fn new(kind: IoErrorKind, detail: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> IoErrorKind {
        self.kind
    }

    /// 稳定错误码，等价于 `self.kind().code()`。
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }

    pub fn invalid_state(detail: impl Into<Cow<'static, str>>) -> Self {
        Self::new(IoErrorKind::InvalidState, detail)
    }

    pub fn transport(detail: impl Into<Cow<'static, str>>) -> Self {
        Self::new(IoErrorKind::TransportFailure, detail)
    }

    /// 未识别选项；细节中保留选项名以便排查。
    pub fn unsupported_option(name: &str) -> Self {
        Self::new(
            IoErrorKind::UnsupportedOption,
            format!("option `{name}` is not supported"),
        )
    }

    pub fn invalid_option_value(name: &str, expected: &'static str) -> Self {
        Self::new(
            IoErrorKind::InvalidOptionValue,
            format!("option `{name}` expects a {expected} value"),
        )
    }
}

impl From<std::io::Error> for IoError {
    fn from(source: std::io::Error) -> Self {
        let kind = match source.kind() {
            std::io::ErrorKind::OutOfMemory => IoErrorKind::AllocationFailure,
            _ => IoErrorKind::TransportFailure,
        };
        Self::new(kind, source.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_combines_kind_message_and_detail() {
        let err = IoError::invalid_state("send called while not open");
        assert_eq!(
            err.to_string(),
            "operation not permitted in current state: send called while not open"
        );
        assert_eq!(err.code(), "spark.transport.invalid_state");
    }

    #[test]
    fn io_errors_map_to_transport_failure_except_oom() {
        let refused = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        assert_eq!(IoError::from(refused).kind(), IoErrorKind::TransportFailure);

        let oom = std::io::Error::from(std::io::ErrorKind::OutOfMemory);
        assert_eq!(IoError::from(oom).kind(), IoErrorKind::AllocationFailure);
    }

    #[test]
    fn unsupported_option_keeps_the_name() {
        let err = IoError::unsupported_option("proxy_data");
        assert_eq!(err.kind(), IoErrorKind::UnsupportedOption);
        assert!(err.detail().contains("proxy_data"));
    }
}
