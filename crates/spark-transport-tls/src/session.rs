use std::{fmt, rc::Rc, sync::Arc};

use spark_transport::{
    CloseCompleteFn, IoError, IoErrorKind, OpenCallbacks, OptionSet, OptionValue, SendCompleteFn,
    Transport,
};
use spark_transport_tcp::TcpTransport;
use tracing::{debug, error, info, warn};

use crate::{
    bridge::{SendTracker, TransportBridge},
    config::TlsIoConfig,
    engine::{EngineError, EngineSession, TlsEngine},
    error::{self, HANDSHAKE, READ, WRITE},
    options::{CredentialSlot, OptionStore},
    rustls_engine::RustlsEngine,
    state::{self, Inbox, SessionCore, TlsIoState},
};

/// 每次从引擎取出的明文块大小。
const PLAINTEXT_CHUNK: usize = 1024;

/// 叠加在任意字节传输之上的客户端 TLS 会话。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 让只懂 [`Transport`] 契约的上层协议（MQTT、AMQP、HTTP 等）无感地获得 TLS：
///   `TlsIo` 自身也实现 [`Transport`]，可以继续被叠加；
/// - 单线程、协作式：所有进展都发生在调用方的 `open`/`send`/`poll`/`close` 之内。
///
/// ## 契约（What）
/// - `open`：仅 `NotOpen` 可用；按当前凭据创建引擎会话后打开底层传输，结果只经 `on_open_complete` 通知；
/// - `close`：`OpeningTransport`/`InHandshake`/`Open` 可用；立即丢弃引擎会话，
///   底层关闭完成后回到 `NotOpen` 并通知 `on_close_complete`；挂起的打开通知与发送通知都被放弃；
/// - `send`：仅 `Open` 可用；引擎必须一次性接收全部明文，否则整体失败且不触发完成回调；
/// - `poll`：握手阶段继续握手，`Open` 时把可解密的明文全部交付，随后推进底层传输一次；
/// - TLS 选项（`TrustedCerts`、`x509certificate`、`x509privatekey` 及别名）只能在 `NotOpen` 设置，
///   其余选项原样转发给底层传输。
///
/// ## 实现策略（How）
/// - 底层传输的回调只往 [`Inbox`] 投递事件，由会话在每次调用底层后统一消化；
/// - 调用引擎时以 [`TransportBridge`] 同时借出状态核心与底层传输，二者与引擎会话是互不重叠的字段；
/// - 握手只在会话层发起，不会在底层回调或引擎调用内部重入。
///
/// ## 风险提示（Trade-offs）
/// - 引擎会话在 `Closing`、`Error`、`NotOpen` 中一律不存在；
/// - 销毁时若仍有打开或关闭在途，相关回调被静默放弃，仅记录告警。
pub struct TlsIo {
    core: SessionCore,
    transport: Box<dyn Transport>,
    inbox: Inbox,
    engine: Arc<dyn TlsEngine>,
    engine_session: Option<Box<dyn EngineSession>>,
    options: OptionStore,
    hostname: String,
    port: u16,
    handshake_poll_limit: usize,
    outstanding_sends: Vec<Rc<SendTracker>>,
}

impl TlsIo {
    /// 按配置创建会话，初始状态为 `NotOpen`。
    ///
    /// 未指定引擎时使用进程默认加密后端上的 [`RustlsEngine`]，
    /// 尚未调用 [`crate::platform::init`] 则返回 `NotInitialized`。
    pub fn create(config: TlsIoConfig) -> spark_transport::Result<Self> {
        let TlsIoConfig {
            hostname,
            port,
            underlying,
            engine,
            handshake_poll_limit,
            max_buffered_bytes,
        } = config;
        if hostname.is_empty() {
            return Err(IoError::new(
                IoErrorKind::InvalidOptionValue,
                "tls hostname must not be empty",
            ));
        }
        let engine: Arc<dyn TlsEngine> = match engine {
            Some(engine) => engine,
            None => Arc::new(RustlsEngine::from_process_default()?),
        };
        let transport: Box<dyn Transport> = match underlying {
            Some(transport) => transport,
            None => Box::new(TcpTransport::new(hostname.clone(), port)),
        };
        debug!(host = %hostname, port, "tls session created");
        Ok(Self {
            core: SessionCore::new(max_buffered_bytes),
            transport,
            inbox: Inbox::default(),
            engine,
            engine_session: None,
            options: OptionStore::default(),
            hostname,
            port,
            handshake_poll_limit,
            outstanding_sends: Vec::new(),
        })
    }

    pub fn state(&self) -> TlsIoState {
        self.core.state
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// 开始打开：先创建引擎会话（凭据在此装载），再打开底层传输。
    pub fn open(&mut self, callbacks: OpenCallbacks) -> spark_transport::Result<()> {
        if self.core.state != TlsIoState::NotOpen {
            return Err(IoError::invalid_state(format!(
                "open requires NotOpen, session is {:?}",
                self.core.state
            )));
        }
        let credentials = self.options.credentials()?;
        let session = self
            .engine
            .new_session(&self.hostname, &credentials)
            .inspect_err(|err| {
                error!(host = %self.hostname, code = err.code(), error = %err, "tls engine session could not be created");
            })?;

        self.core.install(callbacks);
        self.engine_session = Some(session);
        self.core.state = TlsIoState::OpeningTransport;
        info!(host = %self.hostname, port = self.port, "opening tls session");

        if let Err(err) = self.transport.open(state::transport_callbacks(&self.inbox)) {
            error!(host = %self.hostname, error = %err, "underlying transport open failed");
            self.inbox.borrow_mut().clear();
            self.core.clear_callbacks();
            self.core.state = TlsIoState::NotOpen;
            self.engine_session = None;
            return Err(err);
        }
        self.settle();
        Ok(())
    }

    /// 开始关闭。
    pub fn close(&mut self, on_close_complete: CloseCompleteFn) -> spark_transport::Result<()> {
        if !self.core.state.holds_engine() {
            return Err(IoError::invalid_state(format!(
                "close requires an opening or open session, session is {:?}",
                self.core.state
            )));
        }
        info!(host = %self.hostname, state = ?self.core.state, "closing tls session");
        self.core.begin_close(on_close_complete);
        self.engine_session = None;
        for tracker in self.outstanding_sends.drain(..) {
            tracker.abandon();
        }

        if let Err(err) = self.transport.close(state::close_callback(&self.inbox)) {
            error!(host = %self.hostname, error = %err, "underlying transport close failed");
            self.inbox.borrow_mut().clear();
            self.core.clear_callbacks();
            self.core.state = TlsIoState::NotOpen;
            return Err(err);
        }
        self.settle();
        Ok(())
    }

    /// 加密并发送明文；完成回调在所有密文写出后恰好触发一次。
    pub fn send(
        &mut self,
        bytes: &[u8],
        on_send_complete: Option<SendCompleteFn>,
    ) -> spark_transport::Result<()> {
        if self.core.state != TlsIoState::Open {
            return Err(IoError::invalid_state(format!(
                "send requires Open, session is {:?}",
                self.core.state
            )));
        }
        let Some(engine) = self.engine_session.as_mut() else {
            return Err(IoError::invalid_state("open session has no tls engine"));
        };
        let tracker = SendTracker::new(on_send_complete);
        let written = {
            let mut bridge = TransportBridge {
                core: &mut self.core,
                transport: &mut *self.transport,
                inbox: &self.inbox,
                tracker: Some(&tracker),
                handshake_poll_limit: self.handshake_poll_limit,
            };
            engine.write(&mut bridge, bytes)
        };

        let outcome = match written {
            Ok(accepted) if accepted == bytes.len() => {
                tracker.seal();
                if !tracker.is_finished() {
                    self.outstanding_sends.push(tracker);
                }
                Ok(())
            }
            Ok(accepted) => {
                tracker.abandon();
                error!(operation = WRITE.code, accepted, len = bytes.len(), "tls engine accepted a partial write");
                Err(IoError::new(
                    IoErrorKind::SendFailed,
                    format!("tls engine accepted {accepted} of {} bytes", bytes.len()),
                ))
            }
            Err(err) => {
                tracker.abandon();
                error!(operation = WRITE.code, error = %err, len = bytes.len(), "tls engine write failed");
                Err(error::map_engine_error(WRITE, IoErrorKind::SendFailed, &err))
            }
        };
        self.outstanding_sends.retain(|tracker| !tracker.is_finished());
        self.settle();
        outcome
    }

    /// 推进会话：握手、交付明文、推进底层传输。
    pub fn poll(&mut self) {
        match self.core.state {
            TlsIoState::NotOpen | TlsIoState::Error => return,
            TlsIoState::InHandshake => self.drive_handshake(),
            TlsIoState::Open => self.deliver_plaintext(),
            TlsIoState::OpeningTransport | TlsIoState::Closing => {}
        }
        if !matches!(self.core.state, TlsIoState::NotOpen | TlsIoState::Error) {
            self.transport.poll();
        }
        self.settle();
    }

    /// 设置选项：TLS 凭据自行保存，其余转发给底层传输。
    pub fn set_option(&mut self, name: &str, value: &OptionValue) -> spark_transport::Result<()> {
        match CredentialSlot::from_option_name(name) {
            Some(slot) => {
                if self.core.state != TlsIoState::NotOpen {
                    return Err(IoError::invalid_state(format!(
                        "option `{name}` can only change while NotOpen, session is {:?}",
                        self.core.state
                    )));
                }
                self.options.set(name, slot, value)
            }
            None => self.transport.set_option(name, value),
        }
    }

    /// 导出 TLS 凭据与底层传输的全部选项，可回放到新会话以克隆配置。
    pub fn retrieve_options(&self) -> OptionSet {
        let mut options = self.options.export();
        options.extend(self.transport.retrieve_options());
        options
    }

    /// 销毁会话。与直接 `drop` 等价，仅为与 `create` 对称。
    pub fn destroy(self) {
        drop(self);
    }

    /// 消化信箱，并在底层刚打开时发起握手。
    fn settle(&mut self) {
        self.core.drain(&self.inbox);
        if self.core.handshake_pending {
            self.core.handshake_pending = false;
            self.drive_handshake();
            self.core.drain(&self.inbox);
        }
        if !self.core.state.holds_engine() {
            if self.engine_session.take().is_some() {
                debug!(state = ?self.core.state, "tls engine session released");
            }
            // Error 状态下底层仍可能回报失败的发送，这些通知照常交付。
            self.outstanding_sends.clear();
        }
    }

    fn drive_handshake(&mut self) {
        let Some(engine) = self.engine_session.as_mut() else {
            return;
        };
        let result = {
            let mut bridge = TransportBridge {
                core: &mut self.core,
                transport: &mut *self.transport,
                inbox: &self.inbox,
                tracker: None,
                handshake_poll_limit: self.handshake_poll_limit,
            };
            engine.connect(&mut bridge)
        };
        match result {
            Ok(()) => {
                if self.core.state == TlsIoState::InHandshake {
                    warn!(operation = HANDSHAKE.code, "engine finished connect without reporting handshake completion");
                    self.core.handshake_completed();
                }
            }
            Err(EngineError::WouldBlock) => {
                debug!(operation = HANDSHAKE.code, "tls handshake waiting for peer data");
            }
            Err(err) => {
                error!(operation = HANDSHAKE.code, host = %self.hostname, error = %err, "tls handshake failed");
                self.core.fail(error::map_engine_error(
                    HANDSHAKE,
                    IoErrorKind::HandshakeFailure,
                    &err,
                ));
            }
        }
    }

    fn deliver_plaintext(&mut self) {
        let mut plaintext = [0u8; PLAINTEXT_CHUNK];
        while self.core.state == TlsIoState::Open {
            let Some(engine) = self.engine_session.as_mut() else {
                break;
            };
            let result = {
                let mut bridge = TransportBridge {
                    core: &mut self.core,
                    transport: &mut *self.transport,
                    inbox: &self.inbox,
                    tracker: None,
                    handshake_poll_limit: self.handshake_poll_limit,
                };
                engine.read(&mut bridge, &mut plaintext)
            };
            match result {
                Ok(0) | Err(EngineError::WouldBlock) => break,
                Ok(count) => self.core.deliver(&plaintext[..count]),
                Err(err) => {
                    error!(operation = READ.code, host = %self.hostname, error = %err, "tls read failed");
                    self.core.fail(error::map_engine_error(
                        READ,
                        IoErrorKind::TransportFailure,
                        &err,
                    ));
                }
            }
        }
    }
}

impl Transport for TlsIo {
    fn open(&mut self, callbacks: OpenCallbacks) -> spark_transport::Result<()> {
        TlsIo::open(self, callbacks)
    }

    fn close(&mut self, on_close_complete: CloseCompleteFn) -> spark_transport::Result<()> {
        TlsIo::close(self, on_close_complete)
    }

    fn send(
        &mut self,
        bytes: &[u8],
        on_send_complete: Option<SendCompleteFn>,
    ) -> spark_transport::Result<()> {
        TlsIo::send(self, bytes, on_send_complete)
    }

    fn poll(&mut self) {
        TlsIo::poll(self)
    }

    fn set_option(&mut self, name: &str, value: &OptionValue) -> spark_transport::Result<()> {
        TlsIo::set_option(self, name, value)
    }

    fn retrieve_options(&self) -> OptionSet {
        TlsIo::retrieve_options(self)
    }
}

impl Drop for TlsIo {
    fn drop(&mut self) {
        match self.core.state {
            TlsIoState::OpeningTransport | TlsIoState::InHandshake | TlsIoState::Closing => {
                warn!(host = %self.hostname, state = ?self.core.state, "tls session destroyed mid-transition, pending callbacks abandoned");
            }
            TlsIoState::Open => {
                debug!(host = %self.hostname, "tls session destroyed while open");
            }
            TlsIoState::NotOpen | TlsIoState::Error => {}
        }
        for tracker in self.outstanding_sends.drain(..) {
            tracker.abandon();
        }
        self.core.clear_callbacks();
    }
}

impl fmt::Debug for TlsIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsIo")
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("state", &self.core.state)
            .field("buffered", &self.core.receive_buffer.len())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
