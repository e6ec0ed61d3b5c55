use std::{cell::RefCell, rc::Rc};

use spark_transport::{IoError, SendCompleteFn, SendResult, Transport};
use tracing::{debug, error, trace};

use crate::{
    engine::{BridgeRead, EngineIo},
    state::{Inbox, SessionCore, TlsIoState},
};

/// 一次用户发送对应的完成聚合器。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 引擎加密一段明文时可能分多次调用 [`EngineIo::send`]，每次都对应一个底层发送；
///   用户只关心整段是否写出，因此需要把多个底层完成折叠成一个。
///
/// ## 契约（What）
/// - 每个底层发送通过 [`chunk_callback`](Self::chunk_callback) 领取一个完成闭包；
/// - [`seal`](Self::seal) 之后、所有底层完成都到达时，用户回调恰好触发一次：
///   全部 `Sent` 才报告 `Sent`，否则报告 `Failed`（或在有取消时报告 `Cancelled`）；
/// - [`abandon`](Self::abandon) 丢弃用户回调，之后的底层完成不再产生任何通知。
pub(crate) struct SendTracker {
    inner: RefCell<TrackerState>,
}

#[derive(Default)]
struct TrackerState {
    outstanding: usize,
    sealed: bool,
    failed: bool,
    cancelled: bool,
    callback: Option<SendCompleteFn>,
}

impl TrackerState {
    fn ready(&mut self) -> Option<(SendCompleteFn, SendResult)> {
        if !self.sealed || self.outstanding > 0 {
            return None;
        }
        let result = if self.failed {
            SendResult::Failed
        } else if self.cancelled {
            SendResult::Cancelled
        } else {
            SendResult::Sent
        };
        self.callback.take().map(|callback| (callback, result))
    }
}

impl SendTracker {
    pub(crate) fn new(callback: Option<SendCompleteFn>) -> Rc<Self> {
        Rc::new(Self {
            inner: RefCell::new(TrackerState {
                callback,
                ..TrackerState::default()
            }),
        })
    }

    pub(crate) fn chunk_callback(self: &Rc<Self>) -> SendCompleteFn {
        self.inner.borrow_mut().outstanding += 1;
        let tracker = Rc::clone(self);
        Box::new(move |result| tracker.chunk_completed(result))
    }

    fn chunk_completed(&self, result: SendResult) {
        let ready = {
            let mut inner = self.inner.borrow_mut();
            inner.outstanding = inner.outstanding.saturating_sub(1);
            match result {
                SendResult::Sent => {}
                SendResult::Failed => inner.failed = true,
                SendResult::Cancelled => inner.cancelled = true,
            }
            inner.ready()
        };
        if let Some((callback, result)) = ready {
            callback(result);
        }
    }

    /// 引擎已完整接收明文，不会再有新的底层发送。
    pub(crate) fn seal(&self) {
        let ready = {
            let mut inner = self.inner.borrow_mut();
            inner.sealed = true;
            inner.ready()
        };
        if let Some((callback, result)) = ready {
            callback(result);
        }
    }

    pub(crate) fn abandon(&self) {
        self.inner.borrow_mut().callback = None;
    }

    /// 用户回调已触发或已被放弃。
    pub(crate) fn is_finished(&self) -> bool {
        self.inner.borrow().callback.is_none()
    }
}

/// 引擎调用期间的密文 I/O 端口。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 引擎只认识“读密文/写密文/握手完成”三个动作；桥接层把它们翻译成
///   接收缓冲的消费、底层传输的发送以及状态机的迁移。
///
/// ## 契约（What）
/// - `recv`：缓冲为空时推进底层传输；握手阶段最多推进 `handshake_poll_limit` 次，
///   仍无数据则返回 `WouldBlock`，由会话在下一次 `poll` 继续握手；
///   无数据时按状态返回：`Open`/`InHandshake` 为 `WouldBlock`，`Closing`/`NotOpen` 为 `Closed`，其余为 `Fatal`；
/// - `send`：转交底层传输；失败时会话立即进入 `Error` 并通知一次；
/// - `handshake_done`：`InHandshake -> Open`。
///
/// ## 风险提示（Trade-offs）
/// - 握手阶段的有限次推进只是为了在一次调用里尽量走完握手，不会无限自旋。
pub(crate) struct TransportBridge<'a> {
    pub(crate) core: &'a mut SessionCore,
    pub(crate) transport: &'a mut dyn Transport,
    pub(crate) inbox: &'a Inbox,
    pub(crate) tracker: Option<&'a Rc<SendTracker>>,
    pub(crate) handshake_poll_limit: usize,
}

impl TransportBridge<'_> {
    fn pump_transport(&mut self) {
        let limit = self.handshake_poll_limit.max(1);
        let mut polls = 0;
        loop {
            self.transport.poll();
            self.core.drain(self.inbox);
            polls += 1;
            if !self.core.receive_buffer.is_empty()
                || self.core.state != TlsIoState::InHandshake
                || polls >= limit
            {
                break;
            }
        }
        trace!(polls, buffered = self.core.receive_buffer.len(), "transport pumped for tls input");
    }
}

impl EngineIo for TransportBridge<'_> {
    fn recv(&mut self, buf: &mut [u8]) -> BridgeRead {
        if buf.is_empty() {
            return BridgeRead::Data(0);
        }
        if self.core.receive_buffer.is_empty() && self.core.state.holds_engine() {
            self.pump_transport();
        }
        let copied = self.core.receive_buffer.take_into(buf);
        if copied > 0 {
            return BridgeRead::Data(copied);
        }
        match self.core.state {
            TlsIoState::Open | TlsIoState::InHandshake => BridgeRead::WouldBlock,
            TlsIoState::Closing | TlsIoState::NotOpen => BridgeRead::Closed,
            TlsIoState::OpeningTransport | TlsIoState::Error => BridgeRead::Fatal,
        }
    }

    fn send(&mut self, data: &[u8]) -> Result<usize, IoError> {
        let on_complete = self.tracker.map(SendTracker::chunk_callback);
        match self.transport.send(data, on_complete) {
            Ok(()) => {
                self.core.drain(self.inbox);
                Ok(data.len())
            }
            Err(err) => {
                error!(len = data.len(), error = %err, "send through underlying transport failed");
                let failure = IoError::transport(format!(
                    "send through underlying transport failed: {}",
                    err.detail()
                ));
                self.core.fail(failure.clone());
                Err(failure)
            }
        }
    }

    fn handshake_done(&mut self) {
        debug!(state = ?self.core.state, "engine reported handshake done");
        self.core.handshake_completed();
    }
}
