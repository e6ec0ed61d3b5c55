use std::{
    fmt,
    io::{self, Read, Write},
    sync::Arc,
};

use rustls::{ClientConfig, ClientConnection, RootCertStore, crypto::CryptoProvider};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName, pem::PemObject};
use spark_transport::{IoError, IoErrorKind};
use tracing::{debug, trace};

use crate::{
    engine::{BridgeRead, Credentials, EngineError, EngineIo, EngineSession, TlsEngine},
    error::{self, describe_rustls_error},
};

/// 基于 rustls 的客户端 TLS 引擎。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 提供纯 Rust 的默认引擎，不依赖任何系统 TLS 库；
/// - 每次 `new_session` 都按当前凭据重新构建 `ClientConfig`，会话之间互不影响。
///
/// ## 契约（What）
/// - 基础信任库默认为空，`TrustedCerts` 中的证书追加其上；可用 [`with_root_store`](Self::with_root_store)
///   预置系统或业务自有的根证书；
/// - 凭据装载原子：任一 PEM 无法解析、证书链为空或私钥不匹配时返回 `CredentialFailure`；
/// - 主机名同时作为 SNI 与证书校验目标。
///
/// ## 风险提示（Trade-offs）
/// - 每次打开都重新解析 PEM，连接频繁重建时有额外开销，但避免了凭据变更后的缓存失效问题。
#[derive(Clone)]
pub struct RustlsEngine {
    provider: Arc<CryptoProvider>,
    roots: Arc<RootCertStore>,
}

impl RustlsEngine {
    pub fn new(provider: Arc<CryptoProvider>) -> Self {
        Self {
            provider,
            roots: Arc::new(RootCertStore::empty()),
        }
    }

    /// 使用进程默认加密后端；尚未初始化时返回 `NotInitialized`。
    pub fn from_process_default() -> spark_transport::Result<Self> {
        CryptoProvider::get_default()
            .cloned()
            .map(Self::new)
            .ok_or_else(|| {
                IoError::new(
                    IoErrorKind::NotInitialized,
                    "no process-wide crypto provider installed, call platform::init first",
                )
            })
    }

    pub fn with_root_store(mut self, roots: RootCertStore) -> Self {
        self.roots = Arc::new(roots);
        self
    }

    fn client_config(&self, credentials: &Credentials<'_>) -> spark_transport::Result<ClientConfig> {
        let mut roots = (*self.roots).clone();
        if let Some(pem) = credentials.trusted_certificates {
            let mut added = 0usize;
            for certificate in CertificateDer::pem_slice_iter(pem.as_bytes()) {
                let certificate = certificate
                    .map_err(|err| error::credential_error("trusted certificates", err))?;
                roots
                    .add(certificate)
                    .map_err(|err| error::credential_error("trusted certificates", err))?;
                added += 1;
            }
            if added == 0 {
                return Err(error::credential_error(
                    "trusted certificates",
                    "no PEM certificate found",
                ));
            }
            debug!(added, "trusted certificates loaded");
        }

        let builder = ClientConfig::builder_with_provider(Arc::clone(&self.provider))
            .with_safe_default_protocol_versions()
            .map_err(|err| error::credential_error("protocol versions", err))?
            .with_root_certificates(roots);

        let Some(identity) = credentials.client_identity else {
            return Ok(builder.with_no_client_auth());
        };
        let chain = CertificateDer::pem_slice_iter(identity.certificate_chain.as_bytes())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| error::credential_error("client certificate", err))?;
        if chain.is_empty() {
            return Err(error::credential_error(
                "client certificate",
                "no PEM certificate found",
            ));
        }
        let key = PrivateKeyDer::from_pem_slice(identity.private_key.as_bytes())
            .map_err(|err| error::credential_error("client private key", err))?;
        builder
            .with_client_auth_cert(chain, key)
            .map_err(|err| error::credential_error("client identity", err))
    }
}

impl TlsEngine for RustlsEngine {
    fn new_session(
        &self,
        server_name: &str,
        credentials: &Credentials<'_>,
    ) -> spark_transport::Result<Box<dyn EngineSession>> {
        let config = self.client_config(credentials)?;
        let name = ServerName::try_from(server_name.to_owned())
            .map_err(|err| error::credential_error("server name", err))?;
        let conn = ClientConnection::new(Arc::new(config), name)
            .map_err(|err| error::credential_error("client connection", err))?;
        Ok(Box::new(RustlsSession {
            conn,
            handshake_reported: false,
        }))
    }
}

impl fmt::Debug for RustlsEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RustlsEngine")
            .field("roots", &self.roots.len())
            .finish_non_exhaustive()
    }
}

struct RustlsSession {
    conn: ClientConnection,
    handshake_reported: bool,
}

impl RustlsSession {
    /// 把 rustls 待发的密文全部交给桥接层。
    fn flush(&mut self, io: &mut dyn EngineIo) -> Result<(), EngineError> {
        while self.conn.wants_write() {
            let written = self.conn.write_tls(&mut IoWriter(&mut *io));
            match written {
                Ok(0) => return Err(EngineError::Failed("transport accepted no bytes".into())),
                Ok(written) => trace!(written, "tls records handed to transport"),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    return Err(EngineError::WouldBlock);
                }
                Err(err) => return Err(EngineError::Failed(err.to_string())),
            }
        }
        Ok(())
    }

    /// 从桥接层读入一批密文并交给 rustls 处理。
    fn fill(&mut self, io: &mut dyn EngineIo) -> Result<(), EngineError> {
        let read = self.conn.read_tls(&mut IoReader(&mut *io));
        match read {
            Ok(0) => Err(EngineError::Closed),
            Ok(read) => {
                trace!(read, "tls records received");
                if let Err(err) = self.conn.process_new_packets() {
                    // rustls 已排好告警记录，尽力送达对端。
                    let _ = self.flush(io);
                    return Err(EngineError::Failed(describe_rustls_error(&err)));
                }
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Err(EngineError::WouldBlock),
            Err(err) => Err(EngineError::Failed(err.to_string())),
        }
    }

    fn report_handshake(&mut self, io: &mut dyn EngineIo) {
        if !self.handshake_reported && !self.conn.is_handshaking() {
            self.handshake_reported = true;
            debug!(
                version = ?self.conn.protocol_version(),
                suite = ?self.conn.negotiated_cipher_suite().map(|suite| suite.suite()),
                "rustls handshake complete"
            );
            io.handshake_done();
        }
    }
}

impl EngineSession for RustlsSession {
    fn connect(&mut self, io: &mut dyn EngineIo) -> Result<(), EngineError> {
        loop {
            self.flush(io)?;
            if !self.conn.is_handshaking() {
                self.report_handshake(io);
                return Ok(());
            }
            self.fill(io)?;
        }
    }

    fn read(&mut self, io: &mut dyn EngineIo, buf: &mut [u8]) -> Result<usize, EngineError> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            match self.conn.reader().read(buf) {
                Ok(0) => return Err(EngineError::Closed),
                Ok(read) => return Ok(read),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                    return Err(EngineError::Closed);
                }
                Err(err) => return Err(EngineError::Failed(err.to_string())),
            }
            let filled = self.fill(io);
            // 处理入站记录可能产生需要回应的记录（例如密钥更新）。
            self.flush(io)?;
            filled?;
            self.report_handshake(io);
        }
    }

    /// rustls 对待发密文有缓冲上限（默认 64 KiB），单次 `writer().write` 可能只接收一部分；
    /// 每轮先清空待发缓冲再继续写入，直到整段明文被接收。只有在清空后仍无进展时才返回短计数。
    fn write(&mut self, io: &mut dyn EngineIo, data: &[u8]) -> Result<usize, EngineError> {
        let mut accepted = 0;
        while accepted < data.len() {
            self.flush(io)?;
            let written = self
                .conn
                .writer()
                .write(&data[accepted..])
                .map_err(|err| EngineError::Failed(err.to_string()))?;
            if written == 0 {
                break;
            }
            accepted += written;
        }
        self.flush(io)?;
        Ok(accepted)
    }
}

/// 以 `std::io::Read` 的形态暴露桥接层，供 `read_tls` 使用。
struct IoReader<'a>(&'a mut dyn EngineIo);

impl Read for IoReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.0.recv(buf) {
            BridgeRead::Data(read) => Ok(read),
            BridgeRead::WouldBlock => Err(io::ErrorKind::WouldBlock.into()),
            BridgeRead::Closed => Ok(0),
            BridgeRead::Fatal => Err(io::Error::other("tls session is not readable")),
        }
    }
}

struct IoWriter<'a>(&'a mut dyn EngineIo);

impl Write for IoWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.send(buf).map_err(io::Error::other)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ClientIdentity;

    fn engine() -> RustlsEngine {
        RustlsEngine::new(Arc::new(rustls::crypto::ring::default_provider()))
    }

    #[test]
    fn garbage_trusted_certificates_are_rejected() {
        let credentials = Credentials {
            trusted_certificates: Some("not a pem document"),
            client_identity: None,
        };
        let err = engine()
            .new_session("broker.example", &credentials)
            .err()
            .expect("无证书的 PEM 文本必须被拒绝");
        assert_eq!(err.kind(), IoErrorKind::CredentialFailure);
    }

    #[test]
    fn empty_client_chain_is_rejected() {
        let credentials = Credentials {
            trusted_certificates: None,
            client_identity: Some(ClientIdentity {
                certificate_chain: "",
                private_key: "",
            }),
        };
        let err = engine()
            .new_session("broker.example", &credentials)
            .err()
            .expect("空证书链必须被拒绝");
        assert_eq!(err.kind(), IoErrorKind::CredentialFailure);
        assert!(err.detail().contains("client certificate"), "{}", err.detail());
    }

    #[test]
    fn invalid_server_name_is_rejected() {
        let err = engine()
            .new_session("not a host name!", &Credentials::default())
            .err()
            .expect("非法主机名必须被拒绝");
        assert_eq!(err.kind(), IoErrorKind::CredentialFailure);
    }

    #[test]
    fn session_without_credentials_can_be_created() {
        assert!(
            engine()
                .new_session("broker.example", &Credentials::default())
                .is_ok()
        );
    }
}
