use crate::{IoError, OptionSet, OptionValue};

/// 打开完成回调。每次 `open` 至多触发一次。
pub type OpenCompleteFn = Box<dyn FnOnce(IoOpenResult)>;
/// 数据到达回调，按到达顺序交付字节。
pub type BytesReceivedFn = Box<dyn FnMut(&[u8])>;
/// 错误回调，携带导致会话终结的错误。
pub type ErrorFn = Box<dyn FnMut(&IoError)>;
/// 关闭完成回调。
pub type CloseCompleteFn = Box<dyn FnOnce()>;
/// 单次发送完成回调。
pub type SendCompleteFn = Box<dyn FnOnce(SendResult)>;

/// 打开操作的异步结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoOpenResult {
    Opened,
    Failed,
    /// 打开过程被关闭操作打断。
    Cancelled,
}

/// 发送操作的异步结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendResult {
    Sent,
    Failed,
    Cancelled,
}

/// `open` 时一次性登记的三类回调。
///
/// 原始 C 接口中的“回调 + 不透明上下文指针”由闭包捕获取代，调用方需要的状态直接放进闭包。
pub struct OpenCallbacks {
    pub on_open_complete: OpenCompleteFn,
    pub on_bytes_received: BytesReceivedFn,
    pub on_error: ErrorFn,
}

impl OpenCallbacks {
    pub fn new(
        on_open_complete: impl FnOnce(IoOpenResult) + 'static,
        on_bytes_received: impl FnMut(&[u8]) + 'static,
        on_error: impl FnMut(&IoError) + 'static,
    ) -> Self {
        Self {
            on_open_complete: Box::new(on_open_complete),
            on_bytes_received: Box::new(on_bytes_received),
            on_error: Box::new(on_error),
        }
    }
}

impl core::fmt::Debug for OpenCallbacks {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OpenCallbacks").finish_non_exhaustive()
    }
}

/// 统一的非阻塞字节传输接口。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 为 TCP、TLS 以及测试替身提供一致的 open/send/close/poll 契约，使 TLS 适配层可以叠加在
///   任意字节传输之上，而自身又以同一契约对外暴露；
/// - 以 trait object（`Box<dyn Transport>`）替代函数指针表，保留“插拔任意传输”的灵活性。
///
/// ## 契约说明（What）
/// - `open`：开始异步打开；同步返回值只反映登记/启动失败，真正的完成只经由
///   `on_open_complete` 通知，可能在 `open` 内部同步触发，也可能在之后的 `poll` 中触发；
/// - `close`：开始异步关闭，完成时调用 `on_close_complete`；
/// - `send`：提交待发送字节，底层写出后调用 `on_send_complete`；完成顺序与调用顺序一致；
/// - `poll`：推进所有挂起工作，回调只会在调用方的执行流内被同步调用；
/// - `set_option`/`retrieve_options`：选项读写，默认实现分别返回 `UnsupportedOption` 与空集合；
/// - 销毁即 `Drop`。
///
/// ## 风险提示（Trade-offs）
/// - 契约是单线程、协作式的：没有内部锁，也不保证并发回调的安全性；
/// - 回调内部无法再借用同一个传输对象（借用规则使然），需要回灌的状态应通过闭包捕获的共享单元传递。
pub trait Transport {
    /// 开始打开传输。
    fn open(&mut self, callbacks: OpenCallbacks) -> crate::Result<()>;

    /// 开始关闭传输。
    fn close(&mut self, on_close_complete: CloseCompleteFn) -> crate::Result<()>;

    /// 提交一段待发送字节。
    fn send(&mut self, bytes: &[u8], on_send_complete: Option<SendCompleteFn>)
    -> crate::Result<()>;

    /// 推进挂起的异步工作。
    fn poll(&mut self);

    /// 设置命名选项。
    fn set_option(&mut self, name: &str, _value: &OptionValue) -> crate::Result<()> {
        Err(IoError::unsupported_option(name))
    }

    /// 导出可用于克隆配置的选项集合。
    fn retrieve_options(&self) -> OptionSet {
        OptionSet::new()
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn open(&mut self, callbacks: OpenCallbacks) -> crate::Result<()> {
        (**self).open(callbacks)
    }

    fn close(&mut self, on_close_complete: CloseCompleteFn) -> crate::Result<()> {
        (**self).close(on_close_complete)
    }

    fn send(
        &mut self,
        bytes: &[u8],
        on_send_complete: Option<SendCompleteFn>,
    ) -> crate::Result<()> {
        (**self).send(bytes, on_send_complete)
    }

    fn poll(&mut self) {
        (**self).poll()
    }

    fn set_option(&mut self, name: &str, value: &OptionValue) -> crate::Result<()> {
        (**self).set_option(name, value)
    }

    fn retrieve_options(&self) -> OptionSet {
        (**self).retrieve_options()
    }
}

#[allow(dead_code)]
fn _assert_transport_object_safe(_: &dyn Transport) {}
