#![doc = r#"
# spark-transport-tcp

## 设计动机（Why）
- **定位**：该 crate 提供 TLS 适配层在“仅给出主机与端口”时默认创建的底层传输：
  一个由 `poll()` 推进的非阻塞 TCP 套接字。
- **架构角色**：实现 [`spark_transport::Transport`] 契约，作为 `spark-transport-tls`
  的字节来源，同时也能被任何其他协议层直接使用。

## 核心契约（What）
- `open`：解析地址并发起非阻塞连接，连接结果经由 `on_open_complete` 异步通知；
- `send`：写入排队，完整写出后按提交顺序触发 `on_send_complete`；
- `poll`：推进连接建立、刷新发送队列并读取所有可读字节；
- `close`：关闭套接字，未完成的发送以 `Cancelled` 结束，随后同步触发 `on_close_complete`；
- 选项：`tcp_keepalive`、`tcp_keepalive_time`、`tcp_keepalive_interval`、`tcp_nodelay`。

## 实现策略（How）
- 借助 `socket2` 创建套接字、设置非阻塞并发起连接，连接发起后转换为标准库 `TcpStream`；
- 连接是否建立通过 `take_error` + `peer_addr` 在每次 `poll` 中探测，不依赖额外的事件循环。

## 风险与考量（Trade-offs）
- 域名解析使用标准库的同步解析，会在 `open` 内短暂阻塞；
- 单线程、协作式：回调只会在调用方的 `open`/`send`/`poll`/`close` 内同步触发。
"#]

mod channel;
mod util;

pub use channel::TcpTransport;
pub use util::{
    OPTION_TCP_KEEPALIVE, OPTION_TCP_KEEPALIVE_INTERVAL, OPTION_TCP_KEEPALIVE_TIME,
    OPTION_TCP_NODELAY,
};
