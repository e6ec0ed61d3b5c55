use spark_transport::IoError;
use thiserror::Error;

/// 桥接层一次读取的结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BridgeRead {
    /// 复制了 `n` 字节密文（`n > 0`）。
    Data(usize),
    /// 暂无数据，稍后再试。
    WouldBlock,
    /// 会话已关闭或正在关闭。
    Closed,
    /// 会话处于无法继续读取的状态。
    Fatal,
}

/// 引擎侧错误。
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum EngineError {
    /// 需要更多对端数据才能继续。
    #[error("engine needs more input")]
    WouldBlock,
    /// 对端或桥接层已经关闭。
    #[error("engine input closed")]
    Closed,
    /// 协议层面的失败，携带可读原因。
    #[error("{0}")]
    Failed(String),
}

/// 引擎看到的“密文 I/O 端口”。
///
/// 由 TLS 会话在每次调用引擎时临时构造，引擎只能在调用期间使用它。
pub trait EngineIo {
    /// 读取已缓冲的密文，必要时推进底层传输。
    fn recv(&mut self, buf: &mut [u8]) -> BridgeRead;

    /// 将密文交给底层传输；成功时返回全部长度。
    fn send(&mut self, data: &[u8]) -> Result<usize, IoError>;

    /// 引擎报告握手完成。
    fn handshake_done(&mut self);
}

/// 单条 TLS 连接的引擎会话。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - `connect`：推进客户端握手，可重复调用；缺数据时返回 `WouldBlock`，
///   握手完成时必须在返回前调用一次 [`EngineIo::handshake_done`]；
/// - `read`：解密出至多 `buf.len()` 字节明文，`Ok(0)` 仅在 `buf` 为空时出现；
/// - `write`：加密明文并经 [`EngineIo::send`] 发出，返回被接收的明文字节数，可能小于输入长度。
pub trait EngineSession {
    fn connect(&mut self, io: &mut dyn EngineIo) -> Result<(), EngineError>;

    fn read(&mut self, io: &mut dyn EngineIo, buf: &mut [u8]) -> Result<usize, EngineError>;

    fn write(&mut self, io: &mut dyn EngineIo, data: &[u8]) -> Result<usize, EngineError>;
}

/// 客户端身份：证书链与私钥，均为 PEM 文本。
#[derive(Clone, Copy)]
pub struct ClientIdentity<'a> {
    pub certificate_chain: &'a str,
    pub private_key: &'a str,
}

impl std::fmt::Debug for ClientIdentity<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("certificate_chain_len", &self.certificate_chain.len())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// 新建会话时交给引擎的凭据视图。
#[derive(Clone, Copy, Debug, Default)]
pub struct Credentials<'a> {
    /// 额外信任的 CA 证书（PEM，可含多张）。
    pub trusted_certificates: Option<&'a str>,
    pub client_identity: Option<ClientIdentity<'a>>,
}

/// TLS 引擎工厂：为每次 `open` 创建一条新的 [`EngineSession`]。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把“用哪个 TLS 库”与会话状态机解耦，测试可以注入可编排的替身引擎；
/// - 工厂在多个会话间共享（`Arc<dyn TlsEngine>`），因此要求 `Send + Sync`。
///
/// ## 契约（What）
/// - 凭据装载是原子的：任一证书或私钥解析失败都返回 `CredentialFailure`，且不产生任何会话；
/// - `server_name` 同时用于 SNI 与证书主机名校验。
pub trait TlsEngine: Send + Sync {
    fn new_session(
        &self,
        server_name: &str,
        credentials: &Credentials<'_>,
    ) -> Result<Box<dyn EngineSession>, IoError>;
}
