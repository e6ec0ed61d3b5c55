use std::{fmt, sync::Arc};

use spark_transport::Transport;

use crate::{buffer::DEFAULT_MAX_BUFFERED_BYTES, engine::TlsEngine};

/// 握手阶段单次读取最多推进底层传输的次数。
pub const DEFAULT_HANDSHAKE_POLL_LIMIT: usize = 16;

/// [`TlsIo::create`](crate::TlsIo::create) 的输入。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - `hostname`：既是默认 TCP 传输的目标主机，也是 SNI 与证书校验所用的服务器名；
/// - `port`：默认 TCP 传输的目标端口；提供了自定义底层传输时仅作记录；
/// - `underlying`：调用方构造好的底层传输（已带上它自己的配置）；缺省时创建 [`spark_transport_tcp::TcpTransport`]；
/// - `engine`：TLS 引擎工厂；缺省时使用进程默认加密后端上的 rustls 引擎；
/// - `handshake_poll_limit`：见 [`DEFAULT_HANDSHAKE_POLL_LIMIT`]，0 按 1 处理；
/// - `max_buffered_bytes`：接收缓冲上限，超过即 `AllocationFailure`。
pub struct TlsIoConfig {
    pub(crate) hostname: String,
    pub(crate) port: u16,
    pub(crate) underlying: Option<Box<dyn Transport>>,
    pub(crate) engine: Option<Arc<dyn TlsEngine>>,
    pub(crate) handshake_poll_limit: usize,
    pub(crate) max_buffered_bytes: usize,
}

impl TlsIoConfig {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            underlying: None,
            engine: None,
            handshake_poll_limit: DEFAULT_HANDSHAKE_POLL_LIMIT,
            max_buffered_bytes: DEFAULT_MAX_BUFFERED_BYTES,
        }
    }

    /// 使用调用方提供的底层传输，而不是默认的 TCP。
    pub fn with_underlying(mut self, transport: Box<dyn Transport>) -> Self {
        self.underlying = Some(transport);
        self
    }

    pub fn with_engine(mut self, engine: Arc<dyn TlsEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_handshake_poll_limit(mut self, limit: usize) -> Self {
        self.handshake_poll_limit = limit;
        self
    }

    pub fn with_max_buffered_bytes(mut self, limit: usize) -> Self {
        self.max_buffered_bytes = limit;
        self
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn handshake_poll_limit(&self) -> usize {
        self.handshake_poll_limit
    }

    pub fn max_buffered_bytes(&self) -> usize {
        self.max_buffered_bytes
    }
}

impl fmt::Debug for TlsIoConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsIoConfig")
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("custom_underlying", &self.underlying.is_some())
            .field("custom_engine", &self.engine.is_some())
            .field("handshake_poll_limit", &self.handshake_poll_limit)
            .field("max_buffered_bytes", &self.max_buffered_bytes)
            .finish()
    }
}
