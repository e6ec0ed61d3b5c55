use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs},
};

use socket2::{Domain, Protocol, Socket, Type};
use spark_transport::{
    BytesReceivedFn, CloseCompleteFn, ErrorFn, IoError, IoOpenResult, OpenCallbacks,
    OpenCompleteFn, OptionSet, OptionValue, SendCompleteFn, SendResult, Transport,
};
use tracing::{debug, warn};

use crate::util::SocketSettings;

/// 单次 `poll` 最多执行的读取次数，避免对端持续写入时饿死调用方。
const MAX_READS_PER_POLL: usize = 64;
const READ_CHUNK: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TcpState {
    Closed,
    Connecting,
    Open,
    Error,
}

struct PendingSend {
    data: Vec<u8>,
    written: usize,
    on_complete: Option<SendCompleteFn>,
}

/// 由 `poll` 推进的非阻塞 TCP 传输。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 为 TLS 适配层提供“主机 + 端口”场景下的默认字节通道；
/// - 保持与 [`Transport`] 契约一致的回调语义，使上层不必区分 TCP 与其他传输。
///
/// ## 逻辑 (How)
/// - `open`：同步解析地址，使用 `socket2` 创建非阻塞套接字并发起连接；
///   立即成功时同步回调 `Opened`，否则进入 `Connecting`，由 `poll` 探测结果；
/// - `send`：写入排队并立即尝试刷新，剩余部分在后续 `poll` 中继续写出；
/// - `poll`：依次推进连接、刷新发送队列、读取可读字节；对端关闭或 I/O 失败时进入 `Error`
///   并调用 `on_error`。
///
/// ## 契约 (What)
/// - 同一时刻至多一次 `open`；`Closed` 以外的状态再次 `open` 返回 `InvalidState`；
/// - 发送完成回调按提交顺序触发；关闭时未完成的发送以 `Cancelled` 结束；
/// - 选项可在 `open` 之前或之后设置，之后设置会立即作用于现有套接字。
///
/// ## 注意事项 (Trade-offs)
/// - `Connecting` 期间依赖 `take_error`/`peer_addr` 轮询判断连接结果，没有注册 OS 事件；
/// - 读缓冲固定为 1 KiB，大流量下单次 `poll` 的读取次数受 `MAX_READS_PER_POLL` 限制。
pub struct TcpTransport {
    hostname: String,
    port: u16,
    state: TcpState,
    stream: Option<TcpStream>,
    on_open_complete: Option<OpenCompleteFn>,
    on_bytes_received: Option<BytesReceivedFn>,
    on_error: Option<ErrorFn>,
    pending: VecDeque<PendingSend>,
    settings: SocketSettings,
}

impl TcpTransport {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            state: TcpState::Closed,
            stream: None,
            on_open_complete: None,
            on_bytes_received: None,
            on_error: None,
            pending: VecDeque::new(),
            settings: SocketSettings::default(),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// 已连接时返回对端地址。
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream
            .as_ref()
            .filter(|_| self.state == TcpState::Open)
            .and_then(|stream| stream.peer_addr().ok())
    }

    fn resolve(&self) -> io::Result<SocketAddr> {
        (self.hostname.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no address found for {}:{}", self.hostname, self.port),
                )
            })
    }

    /// 创建非阻塞套接字并发起连接，返回连接是否已立即完成。
    fn start_connect(&mut self, addr: SocketAddr) -> io::Result<bool> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nonblocking(true)?;
        let connected = match socket.connect(&addr.into()) {
            Ok(()) => true,
            Err(err) if connect_in_progress(&err) => false,
            Err(err) => return Err(err),
        };
        let stream = TcpStream::from(socket);
        self.settings.apply(&stream)?;
        self.stream = Some(stream);
        Ok(connected)
    }

    fn complete_open(&mut self, result: IoOpenResult) {
        self.state = match result {
            IoOpenResult::Opened => TcpState::Open,
            IoOpenResult::Failed => TcpState::Error,
            IoOpenResult::Cancelled => TcpState::Closed,
        };
        if let Some(callback) = self.on_open_complete.take() {
            callback(result);
        }
    }

    /// 探测非阻塞连接是否已经完成。
    fn poll_connect(&mut self) {
        let Some(stream) = self.stream.as_ref() else {
            return;
        };
        let outcome = match stream.take_error() {
            Ok(Some(err)) | Err(err) => Some(Err(err)),
            Ok(None) => match stream.peer_addr() {
                Ok(_) => Some(Ok(())),
                Err(err) if err.kind() == io::ErrorKind::NotConnected => None,
                Err(err) => Some(Err(err)),
            },
        };
        match outcome {
            None => {}
            Some(Ok(())) => {
                debug!(host = %self.hostname, port = self.port, "tcp connection established");
                self.complete_open(IoOpenResult::Opened);
            }
            Some(Err(err)) => {
                warn!(host = %self.hostname, port = self.port, error = %err, "tcp connect failed");
                self.stream = None;
                self.complete_open(IoOpenResult::Failed);
            }
        }
    }

    /// 尽可能写出排队数据；遇到 `WouldBlock` 停止，I/O 错误原样返回且队列保持不变。
    fn flush_pending(&mut self) -> io::Result<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };
        while let Some(front) = self.pending.front_mut() {
            if front.written == front.data.len() {
                if let Some(done) = self.pending.pop_front()
                    && let Some(callback) = done.on_complete
                {
                    callback(SendResult::Sent);
                }
                continue;
            }
            match stream.write(&front.data[front.written..]) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(n) => front.written += n,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn poll_read(&mut self) -> io::Result<()> {
        let mut buf = [0u8; READ_CHUNK];
        for _ in 0..MAX_READS_PER_POLL {
            let Some(stream) = self.stream.as_mut() else {
                return Ok(());
            };
            match stream.read(&mut buf) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed by peer",
                    ));
                }
                Ok(n) => {
                    if let Some(callback) = self.on_bytes_received.as_mut() {
                        callback(&buf[..n]);
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// 进入 `Error`：排队的发送以 `Failed` 结束，并通知 `on_error`。
    fn fail(&mut self, err: IoError) {
        warn!(host = %self.hostname, port = self.port, error = %err, "tcp transport failed");
        self.state = TcpState::Error;
        for pending in self.pending.drain(..) {
            if let Some(callback) = pending.on_complete {
                callback(SendResult::Failed);
            }
        }
        if let Some(callback) = self.on_error.as_mut() {
            callback(&err);
        }
    }
}

/// 非阻塞 `connect` 尚未完成：Unix 上报告 `EINPROGRESS`，Windows 上报告 `WSAEWOULDBLOCK`。
#[cfg(unix)]
fn connect_in_progress(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EINPROGRESS) || err.kind() == io::ErrorKind::WouldBlock
}

#[cfg(not(unix))]
fn connect_in_progress(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
}

impl Transport for TcpTransport {
    fn open(&mut self, callbacks: OpenCallbacks) -> spark_transport::Result<()> {
        if self.state != TcpState::Closed {
            return Err(IoError::invalid_state("tcp transport is already open"));
        }
        let addr = self.resolve()?;
        self.on_open_complete = Some(callbacks.on_open_complete);
        self.on_bytes_received = Some(callbacks.on_bytes_received);
        self.on_error = Some(callbacks.on_error);
        self.state = TcpState::Connecting;

        match self.start_connect(addr) {
            Ok(true) => self.complete_open(IoOpenResult::Opened),
            Ok(false) => debug!(%addr, "tcp connect in progress"),
            Err(err) => {
                self.state = TcpState::Closed;
                self.stream = None;
                self.on_open_complete = None;
                return Err(err.into());
            }
        }
        Ok(())
    }

    fn close(&mut self, on_close_complete: CloseCompleteFn) -> spark_transport::Result<()> {
        if self.state == TcpState::Closed {
            return Err(IoError::invalid_state("tcp transport is not open"));
        }
        if self.state == TcpState::Connecting {
            self.complete_open(IoOpenResult::Cancelled);
        }
        for pending in self.pending.drain(..) {
            if let Some(callback) = pending.on_complete {
                callback(SendResult::Cancelled);
            }
        }
        if let Some(stream) = self.stream.take()
            && let Err(err) = stream.shutdown(Shutdown::Both)
            && err.kind() != io::ErrorKind::NotConnected
        {
            debug!(error = %err, "tcp shutdown reported an error");
        }
        self.state = TcpState::Closed;
        self.on_bytes_received = None;
        self.on_error = None;
        on_close_complete();
        Ok(())
    }

    fn send(
        &mut self,
        bytes: &[u8],
        on_send_complete: Option<SendCompleteFn>,
    ) -> spark_transport::Result<()> {
        if self.state != TcpState::Open {
            return Err(IoError::invalid_state("tcp send called while not open"));
        }
        self.pending.push_back(PendingSend {
            data: bytes.to_vec(),
            written: 0,
            on_complete: on_send_complete,
        });
        if let Err(err) = self.flush_pending() {
            // 当前这次提交同步失败，不再回调它。
            self.pending.pop_back();
            let err = IoError::from(err);
            self.fail(err.clone());
            return Err(err);
        }
        Ok(())
    }

    fn poll(&mut self) {
        match self.state {
            TcpState::Connecting => self.poll_connect(),
            TcpState::Open => {}
            TcpState::Closed | TcpState::Error => return,
        }
        if self.state != TcpState::Open {
            return;
        }
        if let Err(err) = self.flush_pending() {
            self.fail(err.into());
            return;
        }
        if let Err(err) = self.poll_read() {
            self.fail(err.into());
        }
    }

    fn set_option(&mut self, name: &str, value: &OptionValue) -> spark_transport::Result<()> {
        self.settings.set(name, value)?;
        if let Some(stream) = self.stream.as_ref() {
            self.settings.apply(stream)?;
        }
        Ok(())
    }

    fn retrieve_options(&self) -> OptionSet {
        self.settings.export()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if self.state == TcpState::Connecting || !self.pending.is_empty() {
            debug!(
                host = %self.hostname,
                pending = self.pending.len(),
                "tcp transport dropped with outstanding work"
            );
        }
    }
}

impl core::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("state", &self.state)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}
