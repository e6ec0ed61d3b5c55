#![deny(unsafe_code)]
#![doc = "spark-transport: 回调驱动、轮询推进的字节传输契约。"]
#![doc = ""]
#![doc = "== 使命概述 =="]
#![doc = "- **Why**：TCP、TLS 以及测试用的脚本化传输都需要同一套 open/send/close/poll 语义，上层才能在不感知具体实现的前提下叠加协议层。"]
#![doc = "- **What**：定义对象安全的 [`Transport`] trait、回调类型、[`IoOpenResult`]/[`SendResult`]、选项模型与统一错误 [`IoError`]。"]
#![doc = "- **How**：所有完成通知均以闭包回调异步交付；调用方通过反复调用 [`Transport::poll`] 推进挂起的工作，契约本身不创建线程或定时器。"]

pub mod connection;
pub mod error;
pub mod options;

pub use connection::{
    BytesReceivedFn, CloseCompleteFn, ErrorFn, IoOpenResult, OpenCallbacks, OpenCompleteFn,
    SendCompleteFn, SendResult, Transport,
};
pub use error::{IoError, IoErrorKind};
pub use options::{OptionSet, OptionValue};

/// `Result` 是传输契约内部使用的统一返回别名，错误类型固定为 [`IoError`]。
pub type Result<T, E = IoError> = core::result::Result<T, E>;
