use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use spark_transport::{
    BytesReceivedFn, CloseCompleteFn, ErrorFn, IoError, IoOpenResult, OpenCallbacks,
    OpenCompleteFn,
};
use tracing::{debug, warn};

use crate::buffer::ReceiveBuffer;

/// TLS 会话的生命周期状态。
///
/// ```text
/// NotOpen --open--> OpeningTransport --传输打开--> InHandshake --握手完成--> Open
///    ^                    |  \                          |                      |
///    |                    |   `------- 失败 ------------+-------> Error <------'
///    '--关闭完成-- Closing <-------------- close ------------------------------'
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TlsIoState {
    NotOpen,
    OpeningTransport,
    InHandshake,
    Open,
    Closing,
    Error,
}

impl TlsIoState {
    /// 该状态下是否持有引擎会话。
    pub(crate) fn holds_engine(self) -> bool {
        matches!(
            self,
            TlsIoState::OpeningTransport | TlsIoState::InHandshake | TlsIoState::Open
        )
    }
}

/// 底层传输回调投递到会话的事件。
#[derive(Debug)]
pub(crate) enum TransportEvent {
    OpenComplete(IoOpenResult),
    Received(Vec<u8>),
    Error(IoError),
    CloseComplete,
}

/// 底层传输回调与会话之间的信箱。
///
/// 回调发生在底层传输的调用栈内，此时会话本身正被可变借用，
/// 因此回调只记录事件，由会话在调用返回后统一消化。
pub(crate) type Inbox = Rc<RefCell<VecDeque<TransportEvent>>>;

/// 构造交给底层传输的回调三元组，全部写入 `inbox`。
pub(crate) fn transport_callbacks(inbox: &Inbox) -> OpenCallbacks {
    let on_open = Rc::clone(inbox);
    let on_bytes = Rc::clone(inbox);
    let on_error = Rc::clone(inbox);
    OpenCallbacks::new(
        move |result| {
            on_open
                .borrow_mut()
                .push_back(TransportEvent::OpenComplete(result))
        },
        move |bytes| {
            on_bytes
                .borrow_mut()
                .push_back(TransportEvent::Received(bytes.to_vec()))
        },
        move |error| {
            on_error
                .borrow_mut()
                .push_back(TransportEvent::Error(error.clone()))
        },
    )
}

pub(crate) fn close_callback(inbox: &Inbox) -> CloseCompleteFn {
    let inbox = Rc::clone(inbox);
    Box::new(move || inbox.borrow_mut().push_back(TransportEvent::CloseComplete))
}

/// 会话中与引擎无关的那部分状态：状态机、接收缓冲与用户回调。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 调用引擎时，引擎会话、底层传输与这里的状态需要同时被可变借用；
///   把它们拆成互不重叠的字段，桥接层就能在引擎调用期间修改状态与缓冲。
///
/// ## 契约（What）
/// - 用户回调只在这里触发，且每个会话“打开结果/致命错误”二者至多通知一次；
/// - 进入 `Error` 或 `NotOpen` 时接收缓冲必然清空；
/// - `handshake_pending` 表示底层传输已打开、握手尚待会话层发起。
pub(crate) struct SessionCore {
    pub(crate) state: TlsIoState,
    pub(crate) receive_buffer: ReceiveBuffer,
    pub(crate) handshake_pending: bool,
    on_open: Option<OpenCompleteFn>,
    on_bytes_received: Option<BytesReceivedFn>,
    on_error: Option<ErrorFn>,
    on_close: Option<CloseCompleteFn>,
}

impl SessionCore {
    pub(crate) fn new(max_buffered_bytes: usize) -> Self {
        Self {
            state: TlsIoState::NotOpen,
            receive_buffer: ReceiveBuffer::with_limit(max_buffered_bytes),
            handshake_pending: false,
            on_open: None,
            on_bytes_received: None,
            on_error: None,
            on_close: None,
        }
    }

    pub(crate) fn install(&mut self, callbacks: OpenCallbacks) {
        self.on_open = Some(callbacks.on_open_complete);
        self.on_bytes_received = Some(callbacks.on_bytes_received);
        self.on_error = Some(callbacks.on_error);
    }

    pub(crate) fn clear_callbacks(&mut self) {
        self.on_open = None;
        self.on_bytes_received = None;
        self.on_error = None;
        self.on_close = None;
    }

    /// 进入 `Closing`：挂起的打开通知被放弃，缓冲清空。
    pub(crate) fn begin_close(&mut self, on_close: CloseCompleteFn) {
        self.state = TlsIoState::Closing;
        self.on_open = None;
        self.on_close = Some(on_close);
        self.handshake_pending = false;
        self.receive_buffer.clear();
    }

    /// 依次消化信箱中的全部事件。
    pub(crate) fn drain(&mut self, inbox: &Inbox) {
        loop {
            let event = inbox.borrow_mut().pop_front();
            let Some(event) = event else {
                break;
            };
            self.apply(event);
        }
    }

    fn apply(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::OpenComplete(result) => self.on_transport_open(result),
            TransportEvent::Received(bytes) => self.on_transport_bytes(&bytes),
            TransportEvent::Error(error) => {
                if self.state == TlsIoState::Closing {
                    debug!(error = %error, "transport error while closing ignored");
                    return;
                }
                self.fail(IoError::transport(format!(
                    "underlying transport reported: {}",
                    error.detail()
                )));
            }
            TransportEvent::CloseComplete => self.on_transport_closed(),
        }
    }

    fn on_transport_open(&mut self, result: IoOpenResult) {
        if self.state != TlsIoState::OpeningTransport {
            debug!(?result, state = ?self.state, "transport open completion outside OpeningTransport ignored");
            return;
        }
        match result {
            IoOpenResult::Opened => {
                debug!("underlying transport open, starting tls handshake");
                self.state = TlsIoState::InHandshake;
                self.handshake_pending = true;
            }
            IoOpenResult::Failed | IoOpenResult::Cancelled => {
                self.fail(IoError::transport(format!(
                    "underlying transport open finished with {result:?}"
                )));
            }
        }
    }

    fn on_transport_bytes(&mut self, bytes: &[u8]) {
        if !self.state.holds_engine() {
            debug!(len = bytes.len(), state = ?self.state, "bytes arrived with no tls session, dropped");
            return;
        }
        if let Err(error) = self.receive_buffer.append(bytes) {
            self.fail(error);
        }
    }

    fn on_transport_closed(&mut self) {
        if self.state != TlsIoState::Closing {
            warn!(state = ?self.state, "close complete received while not closing");
            return;
        }
        self.state = TlsIoState::NotOpen;
        self.receive_buffer.clear();
        let on_close = self.on_close.take();
        self.clear_callbacks();
        if let Some(on_close) = on_close {
            on_close();
        }
    }

    /// 握手完成：`InHandshake -> Open`，并通知打开成功。
    pub(crate) fn handshake_completed(&mut self) {
        if self.state != TlsIoState::InHandshake {
            warn!(state = ?self.state, "handshake completion outside InHandshake ignored");
            return;
        }
        self.state = TlsIoState::Open;
        debug!("tls handshake complete");
        if let Some(on_open) = self.on_open.take() {
            on_open(IoOpenResult::Opened);
        }
    }

    /// 致命错误：进入 `Error` 并通知一次。
    ///
    /// 打开尚未完成时以 `on_open(Failed)` 通知，已打开时交给 `on_error`；
    /// 其他状态下错误只记录日志。
    pub(crate) fn fail(&mut self, error: IoError) {
        match self.state {
            TlsIoState::OpeningTransport | TlsIoState::InHandshake => {
                warn!(code = error.code(), error = %error, state = ?self.state, "tls open failed");
                self.enter_error();
                if let Some(on_open) = self.on_open.take() {
                    on_open(IoOpenResult::Failed);
                }
            }
            TlsIoState::Open => {
                warn!(code = error.code(), error = %error, "tls session failed");
                self.enter_error();
                if let Some(on_error) = self.on_error.as_mut() {
                    on_error(&error);
                }
            }
            TlsIoState::NotOpen | TlsIoState::Closing | TlsIoState::Error => {
                debug!(code = error.code(), error = %error, state = ?self.state, "error after session ended ignored");
            }
        }
    }

    fn enter_error(&mut self) {
        self.state = TlsIoState::Error;
        self.handshake_pending = false;
        self.receive_buffer.clear();
    }

    /// 把解密后的明文交给用户。
    pub(crate) fn deliver(&mut self, plaintext: &[u8]) {
        if let Some(on_bytes) = self.on_bytes_received.as_mut() {
            on_bytes(plaintext);
        }
    }
}
