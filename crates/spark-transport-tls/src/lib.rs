#![deny(unsafe_code)]
#![doc = r#"
# spark-transport-tls

## 设计动机（Why）
- **透明加密**：为只认识 [`spark_transport::Transport`] 契约的上层协议提供客户端 TLS，
  上层无需感知握手、记录层与证书细节；
- **可叠加**：[`TlsIo`] 自身实现 `Transport`，底层既可以是默认的 TCP，也可以是调用方提供的
  任意传输（代理隧道、WebSocket、测试替身）；
- **可替换引擎**：TLS 算法由 [`TlsEngine`] 提供，默认实现是纯 Rust 的 [`RustlsEngine`]。

## 核心契约（What）
- 生命周期：`NotOpen → OpeningTransport → InHandshake → Open → Closing → NotOpen`，任何阶段的
  致命错误进入终态 `Error`；
- 打开结果只经 `on_open_complete` 通知；打开之后的致命错误只经 `on_error` 通知，且至多一次；
- 发送完成回调在本次明文对应的全部密文写出后恰好触发一次；
- 选项：`TrustedCerts`、`x509certificate`（别名 `x509EccCertificate`）、`x509privatekey`
  （别名 `x509EccAliasKey`），其余选项转发给底层传输；
- 进程级初始化：使用默认引擎前先调用 [`platform::init`]。

## 实现策略（How）
- 底层传输回调只向信箱投递事件，会话在调用返回后统一消化，避免回调重入；
- 引擎通过桥接层读写密文：读取消费接收缓冲（必要时推进底层传输），写入直接转交底层发送；
- 握手在底层打开后的第一次机会发起，缺数据时在后续 `poll` 中继续。

## 风险与考量（Trade-offs）
- 单线程、协作式，类型本身不是 `Send`；
- 握手阶段单次读取最多推进底层传输 `handshake_poll_limit` 次，而不是无限等待；
- 接收缓冲有上限，对端洪泛时会话以 `AllocationFailure` 终结。
"#]

mod bridge;
mod buffer;
mod config;
mod engine;
mod error;
mod options;
pub mod platform;
mod rustls_engine;
mod session;
mod state;

pub use buffer::{DEFAULT_MAX_BUFFERED_BYTES, ReceiveBuffer};
pub use config::{DEFAULT_HANDSHAKE_POLL_LIMIT, TlsIoConfig};
pub use engine::{
    BridgeRead, ClientIdentity, Credentials, EngineError, EngineIo, EngineSession, TlsEngine,
};
pub use options::{
    OPTION_TRUSTED_CERT, OPTION_X509_CERT, OPTION_X509_ECC_CERT, OPTION_X509_ECC_KEY,
    OPTION_X509_PRIVATE_KEY,
};
pub use rustls_engine::RustlsEngine;
pub use session::TlsIo;
pub use state::TlsIoState;
