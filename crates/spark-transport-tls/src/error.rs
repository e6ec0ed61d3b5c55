use std::fmt::Display;

use rustls::{AlertDescription, Error as RustlsError};
use spark_transport::{IoError, IoErrorKind};

use crate::engine::EngineError;

/// TLS 层操作的稳定标识，用于日志字段与错误细节前缀。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 所有日志都携带 `operation = kind.code`，排查时按操作过滤而不必解析文案；
/// - 错误细节统一以 `message` 开头，调用方拿到的 `IoError` 直接说明是哪一步失败。
#[derive(Clone, Copy, Debug)]
pub(crate) struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub(crate) const HANDSHAKE: OperationKind = OperationKind {
    code: "spark.transport.tls.handshake",
    message: "tls handshake failed",
};

pub(crate) const READ: OperationKind = OperationKind {
    code: "spark.transport.tls.read",
    message: "tls read failed",
};

pub(crate) const WRITE: OperationKind = OperationKind {
    code: "spark.transport.tls.write",
    message: "tls write failed",
};

pub(crate) const CREDENTIALS: OperationKind = OperationKind {
    code: "spark.transport.tls.credentials",
    message: "tls credentials rejected",
};

/// 把引擎错误映射为对外的 `IoError`。
pub(crate) fn map_engine_error(
    operation: OperationKind,
    kind: IoErrorKind,
    error: &EngineError,
) -> IoError {
    IoError::new(kind, format!("{}: {error}", operation.message))
}

/// 凭据装载失败；`what` 指出是哪一份材料。
pub(crate) fn credential_error(what: &str, error: impl Display) -> IoError {
    IoError::new(
        IoErrorKind::CredentialFailure,
        format!("{}: {what}: {error}", CREDENTIALS.message),
    )
}

/// 将 rustls 错误归类为可读原因，供 [`EngineError::Failed`] 携带。
pub(crate) fn describe_rustls_error(error: &RustlsError) -> String {
    use RustlsError::*;
    let class = match error {
        NoCertificatesPresented | InvalidCertificate(_) | InvalidCertRevocationList(_) => {
            "peer authentication"
        }
        InappropriateMessage { .. }
        | InappropriateHandshakeMessage { .. }
        | InvalidMessage(_)
        | PeerMisbehaved(_)
        | DecryptError
        | PeerSentOversizedRecord => "protocol integrity",
        PeerIncompatible(_) => "peer incompatible",
        AlertReceived(alert) => return describe_alert(alert),
        _ => "local failure",
    };
    format!("{class}: {error}")
}

fn describe_alert(alert: &AlertDescription) -> String {
    use AlertDescription::*;
    let class = match alert {
        BadCertificate
        | UnsupportedCertificate
        | CertificateRevoked
        | CertificateExpired
        | CertificateUnknown
        | UnknownCA
        | CertificateRequired => "peer rejected our credentials",
        AccessDenied => "peer denied access",
        CloseNotify | UserCanceled => "peer closed the session",
        _ => "peer aborted",
    };
    format!("{class}: alert {alert:?}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls::CertificateError;

    #[test]
    fn certificate_errors_are_classified_as_authentication() {
        let reason = describe_rustls_error(&RustlsError::InvalidCertificate(
            CertificateError::UnknownIssuer,
        ));
        assert!(reason.starts_with("peer authentication"), "{reason}");
    }

    #[test]
    fn alerts_name_the_description() {
        let reason = describe_rustls_error(&RustlsError::AlertReceived(AlertDescription::UnknownCA));
        assert!(reason.contains("UnknownCA"), "{reason}");
        assert!(reason.starts_with("peer rejected our credentials"));
    }

    #[test]
    fn engine_errors_carry_the_operation_prefix() {
        let err = map_engine_error(
            HANDSHAKE,
            IoErrorKind::HandshakeFailure,
            &EngineError::Failed("bad record".into()),
        );
        assert_eq!(err.kind(), IoErrorKind::HandshakeFailure);
        assert_eq!(err.detail(), "tls handshake failed: bad record");
    }
}
