//! 集成测试共享的替身：可编排的底层传输与可编排的 TLS 引擎。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 会话的状态机、回调次数与选项转发都与真实加密无关，用“恒等加密”的替身引擎即可精确断言；
//! - 底层传输替身按脚本在每次 `poll` 交付一个事件，测试因此能控制事件到达的时机。
//!
//! ## 约定（What）
//! - 替身引擎握手时先发送 [`CLIENT_HELLO`]，累计收到 [`SERVER_HELLO`] 长度的字节后报告握手完成；
//! - 握手后明文与密文相同，写入按 `record_size` 切成多个底层发送。
#![allow(dead_code)]

use std::{
    cell::RefCell,
    collections::VecDeque,
    rc::Rc,
    sync::{Arc, Mutex},
};

use spark_transport::{
    CloseCompleteFn, IoError, IoErrorKind, IoOpenResult, OpenCallbacks, OptionSet, OptionValue,
    SendCompleteFn, SendResult, Transport,
};
use spark_transport_tls::{
    BridgeRead, Credentials, EngineError, EngineIo, EngineSession, TlsEngine, TlsIo, TlsIoConfig,
};

pub const CLIENT_HELLO: &[u8] = b"client-hello";
pub const SERVER_HELLO: &[u8] = b"server-hello";

/// 底层传输在某次 `poll` 中交付的事件。
#[derive(Debug)]
pub enum Step {
    Open(IoOpenResult),
    Bytes(Vec<u8>),
    Error,
    CloseComplete,
}

/// 替身传输的共享状态，测试通过 [`TransportHandle`] 观察与驱动。
#[derive(Default)]
pub struct TransportScript {
    callbacks: Option<OpenCallbacks>,
    steps: VecDeque<Step>,
    pending_sends: VecDeque<SendCompleteFn>,
    pending_close: Option<CloseCompleteFn>,
    pub open_calls: usize,
    pub close_calls: usize,
    pub poll_calls: usize,
    pub sent: Vec<Vec<u8>>,
    pub options: OptionSet,
    pub reject_options: bool,
    pub fail_sends: bool,
    pub open_synchronously: bool,
    pub close_synchronously: bool,
}

/// 被装进 `TlsIo` 的替身传输。
pub struct ScriptedTransport {
    script: Rc<RefCell<TransportScript>>,
}

/// 测试侧持有的句柄。
#[derive(Clone)]
pub struct TransportHandle {
    script: Rc<RefCell<TransportScript>>,
}

pub fn scripted_transport() -> (ScriptedTransport, TransportHandle) {
    let script = Rc::new(RefCell::new(TransportScript {
        close_synchronously: true,
        ..TransportScript::default()
    }));
    (
        ScriptedTransport {
            script: script.clone(),
        },
        TransportHandle { script },
    )
}

impl TransportHandle {
    /// 安排一个在后续某次 `poll` 中交付的事件。
    pub fn queue(&self, step: Step) {
        self.script.borrow_mut().steps.push_back(step);
    }

    /// 让全部挂起的底层发送以给定结果完成。
    pub fn complete_sends(&self, result: SendResult) {
        let pending: Vec<_> = self.script.borrow_mut().pending_sends.drain(..).collect();
        for on_complete in pending {
            on_complete(result);
        }
    }

    pub fn pending_sends(&self) -> usize {
        self.script.borrow().pending_sends.len()
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.script.borrow().sent.clone()
    }

    /// 握手之后写出的全部字节（拼接）。
    pub fn sent_after_hello(&self) -> Vec<u8> {
        self.script
            .borrow()
            .sent
            .iter()
            .skip(1)
            .flatten()
            .copied()
            .collect()
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut TransportScript) -> R) -> R {
        f(&mut self.script.borrow_mut())
    }

    /// 完成一次异步关闭。
    pub fn finish_close(&self) {
        let on_close = self.script.borrow_mut().pending_close.take();
        if let Some(on_close) = on_close {
            on_close();
        }
    }
}

impl Transport for ScriptedTransport {
    fn open(&mut self, callbacks: OpenCallbacks) -> spark_transport::Result<()> {
        let mut script = self.script.borrow_mut();
        script.open_calls += 1;
        script.callbacks = Some(callbacks);
        if script.open_synchronously {
            if let Some(callbacks) = script.callbacks.as_mut() {
                let on_open = std::mem::replace(
                    &mut callbacks.on_open_complete,
                    Box::new(|_: IoOpenResult| {}),
                );
                on_open(IoOpenResult::Opened);
            }
        }
        Ok(())
    }

    fn close(&mut self, on_close_complete: CloseCompleteFn) -> spark_transport::Result<()> {
        let mut script = self.script.borrow_mut();
        script.close_calls += 1;
        let cancelled: Vec<_> = script.pending_sends.drain(..).collect();
        let immediate = if script.close_synchronously {
            Some(on_close_complete)
        } else {
            script.pending_close = Some(on_close_complete);
            None
        };
        drop(script);
        for on_complete in cancelled {
            on_complete(SendResult::Cancelled);
        }
        if let Some(on_close) = immediate {
            on_close();
        }
        Ok(())
    }

    fn send(
        &mut self,
        bytes: &[u8],
        on_send_complete: Option<SendCompleteFn>,
    ) -> spark_transport::Result<()> {
        let mut script = self.script.borrow_mut();
        if script.fail_sends {
            return Err(IoError::transport("scripted send failure"));
        }
        script.sent.push(bytes.to_vec());
        if let Some(on_complete) = on_send_complete {
            script.pending_sends.push_back(on_complete);
        }
        Ok(())
    }

    fn poll(&mut self) {
        let mut script = self.script.borrow_mut();
        script.poll_calls += 1;
        let Some(step) = script.steps.pop_front() else {
            return;
        };
        let Some(callbacks) = script.callbacks.as_mut() else {
            return;
        };
        match step {
            Step::Open(result) => {
                let on_open = std::mem::replace(
                    &mut callbacks.on_open_complete,
                    Box::new(|_: IoOpenResult| {}),
                );
                on_open(result);
            }
            Step::Bytes(bytes) => (callbacks.on_bytes_received)(&bytes),
            Step::Error => (callbacks.on_error)(&IoError::transport("scripted transport error")),
            Step::CloseComplete => {
                let on_close = script.pending_close.take();
                drop(script);
                if let Some(on_close) = on_close {
                    on_close();
                }
            }
        }
    }

    fn set_option(&mut self, name: &str, value: &OptionValue) -> spark_transport::Result<()> {
        let mut script = self.script.borrow_mut();
        if script.reject_options {
            return Err(IoError::unsupported_option(name));
        }
        script.options.insert(name, value.clone());
        Ok(())
    }

    fn retrieve_options(&self) -> OptionSet {
        self.script.borrow().options.clone()
    }
}

/// 替身引擎的行为与观测记录。
#[derive(Debug, Default)]
pub struct EngineScript {
    pub fail_credentials: bool,
    pub fail_handshake: bool,
    /// 单次 `write` 最多接收的明文字节数。
    pub max_write: Option<usize>,
    /// 单个底层发送的最大长度，0 表示不切分。
    pub record_size: usize,
    pub sessions_created: usize,
    pub server_names: Vec<String>,
    pub trusted_seen: Option<String>,
    pub identity_seen: Option<(String, String)>,
}

#[derive(Clone, Default)]
pub struct ScriptedEngine {
    pub script: Arc<Mutex<EngineScript>>,
}

impl ScriptedEngine {
    pub fn with(&self, f: impl FnOnce(&mut EngineScript)) -> Self {
        f(&mut self.script.lock().expect("脚本锁不会中毒"));
        self.clone()
    }

    pub fn snapshot<R>(&self, f: impl FnOnce(&EngineScript) -> R) -> R {
        f(&self.script.lock().expect("脚本锁不会中毒"))
    }
}

impl TlsEngine for ScriptedEngine {
    fn new_session(
        &self,
        server_name: &str,
        credentials: &Credentials<'_>,
    ) -> spark_transport::Result<Box<dyn EngineSession>> {
        let mut script = self.script.lock().expect("脚本锁不会中毒");
        if script.fail_credentials {
            return Err(IoError::new(
                IoErrorKind::CredentialFailure,
                "scripted credential failure",
            ));
        }
        script.sessions_created += 1;
        script.server_names.push(server_name.to_owned());
        script.trusted_seen = credentials.trusted_certificates.map(str::to_owned);
        script.identity_seen = credentials
            .client_identity
            .map(|id| (id.certificate_chain.to_owned(), id.private_key.to_owned()));
        Ok(Box::new(ScriptedSession {
            script: self.script.clone(),
            hello_sent: false,
            hello_received: 0,
        }))
    }
}

struct ScriptedSession {
    script: Arc<Mutex<EngineScript>>,
    hello_sent: bool,
    hello_received: usize,
}

impl EngineSession for ScriptedSession {
    fn connect(&mut self, io: &mut dyn EngineIo) -> Result<(), EngineError> {
        if !self.hello_sent {
            io.send(CLIENT_HELLO)
                .map_err(|err| EngineError::Failed(err.to_string()))?;
            self.hello_sent = true;
        }
        while self.hello_received < SERVER_HELLO.len() {
            let mut buf = vec![0u8; SERVER_HELLO.len() - self.hello_received];
            match io.recv(&mut buf) {
                BridgeRead::Data(n) => self.hello_received += n,
                BridgeRead::WouldBlock => return Err(EngineError::WouldBlock),
                BridgeRead::Closed => return Err(EngineError::Closed),
                BridgeRead::Fatal => return Err(EngineError::Failed("bridge fatal".into())),
            }
        }
        if self.script.lock().expect("脚本锁不会中毒").fail_handshake {
            return Err(EngineError::Failed("scripted handshake rejection".into()));
        }
        io.handshake_done();
        Ok(())
    }

    fn read(&mut self, io: &mut dyn EngineIo, buf: &mut [u8]) -> Result<usize, EngineError> {
        match io.recv(buf) {
            BridgeRead::Data(n) => Ok(n),
            BridgeRead::WouldBlock => Err(EngineError::WouldBlock),
            BridgeRead::Closed => Err(EngineError::Closed),
            BridgeRead::Fatal => Err(EngineError::Failed("bridge fatal".into())),
        }
    }

    fn write(&mut self, io: &mut dyn EngineIo, data: &[u8]) -> Result<usize, EngineError> {
        let (max_write, record_size) = {
            let script = self.script.lock().expect("脚本锁不会中毒");
            (script.max_write, script.record_size)
        };
        let accepted = max_write.map_or(data.len(), |max| max.min(data.len()));
        let chunk = if record_size == 0 { accepted.max(1) } else { record_size };
        for record in data[..accepted].chunks(chunk) {
            io.send(record)
                .map_err(|err| EngineError::Failed(err.to_string()))?;
        }
        Ok(accepted)
    }
}

/// 收集用户回调的观测结果。
#[derive(Clone, Default)]
pub struct Observed {
    pub opens: Rc<RefCell<Vec<IoOpenResult>>>,
    pub received: Rc<RefCell<Vec<u8>>>,
    pub errors: Rc<RefCell<Vec<IoErrorKind>>>,
    pub closes: Rc<RefCell<usize>>,
}

impl Observed {
    pub fn callbacks(&self) -> OpenCallbacks {
        let (opens, received, errors) = (
            self.opens.clone(),
            self.received.clone(),
            self.errors.clone(),
        );
        OpenCallbacks::new(
            move |result| opens.borrow_mut().push(result),
            move |bytes| received.borrow_mut().extend_from_slice(bytes),
            move |error| errors.borrow_mut().push(error.kind()),
        )
    }

    pub fn on_close(&self) -> CloseCompleteFn {
        let closes = self.closes.clone();
        Box::new(move || *closes.borrow_mut() += 1)
    }

    pub fn opens(&self) -> Vec<IoOpenResult> {
        self.opens.borrow().clone()
    }

    pub fn errors(&self) -> Vec<IoErrorKind> {
        self.errors.borrow().clone()
    }

    pub fn closes(&self) -> usize {
        *self.closes.borrow()
    }
}

/// 以替身传输与替身引擎构造会话。
pub fn scripted_session(engine: &ScriptedEngine) -> (TlsIo, TransportHandle) {
    scripted_session_with(engine, |config| config)
}

pub fn scripted_session_with(
    engine: &ScriptedEngine,
    tweak: impl FnOnce(TlsIoConfig) -> TlsIoConfig,
) -> (TlsIo, TransportHandle) {
    let (transport, handle) = scripted_transport();
    let config = TlsIoConfig::new("broker.example", 8883)
        .with_underlying(Box::new(transport))
        .with_engine(Arc::new(engine.clone()));
    let io = TlsIo::create(tweak(config)).expect("替身配置必然可创建会话");
    (io, handle)
}

/// 把会话推进到 `Open`：底层打开、握手往返各一步。
pub fn open_session(io: &mut TlsIo, handle: &TransportHandle, observed: &Observed) {
    io.open(observed.callbacks()).expect("NotOpen 时允许 open");
    handle.queue(Step::Open(IoOpenResult::Opened));
    io.poll();
    handle.queue(Step::Bytes(SERVER_HELLO.to_vec()));
    io.poll();
    assert_eq!(observed.opens(), [IoOpenResult::Opened]);
}
