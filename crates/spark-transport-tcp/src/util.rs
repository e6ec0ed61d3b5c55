use std::{net::TcpStream, time::Duration};

use socket2::{SockRef, TcpKeepalive};
use spark_transport::{IoError, OptionSet, OptionValue};

pub const OPTION_TCP_KEEPALIVE: &str = "tcp_keepalive";
pub const OPTION_TCP_KEEPALIVE_TIME: &str = "tcp_keepalive_time";
pub const OPTION_TCP_KEEPALIVE_INTERVAL: &str = "tcp_keepalive_interval";
pub const OPTION_TCP_NODELAY: &str = "tcp_nodelay";

/// 套接字级选项的暂存区。
///
/// 选项可能在套接字创建之前设置，因此先记录下来，连接发起时统一应用；
/// 套接字已存在时 `set` 之后立即生效。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct SocketSettings {
    keepalive: Option<bool>,
    keepalive_time: Option<Duration>,
    keepalive_interval: Option<Duration>,
    nodelay: Option<bool>,
}

impl SocketSettings {
    /// 记录一个选项；未知名称返回 `UnsupportedOption`。
    pub(crate) fn set(&mut self, name: &str, value: &OptionValue) -> spark_transport::Result<()> {
        match name {
            OPTION_TCP_KEEPALIVE => {
                let enabled = match value {
                    OptionValue::Boolean(flag) => *flag,
                    OptionValue::Integer(flag) => *flag != 0,
                    _ => return Err(IoError::invalid_option_value(name, "boolean")),
                };
                self.keepalive = Some(enabled);
            }
            OPTION_TCP_KEEPALIVE_TIME => {
                self.keepalive_time = Some(seconds(name, value)?);
            }
            OPTION_TCP_KEEPALIVE_INTERVAL => {
                self.keepalive_interval = Some(seconds(name, value)?);
            }
            OPTION_TCP_NODELAY => {
                let enabled = value
                    .as_bool()
                    .ok_or_else(|| IoError::invalid_option_value(name, "boolean"))?;
                self.nodelay = Some(enabled);
            }
            _ => return Err(IoError::unsupported_option(name)),
        }
        Ok(())
    }

    pub(crate) fn apply(&self, stream: &TcpStream) -> std::io::Result<()> {
        let sock = SockRef::from(stream);
        if let Some(enabled) = self.keepalive {
            sock.set_keepalive(enabled)?;
        }
        if self.keepalive != Some(false)
            && (self.keepalive_time.is_some() || self.keepalive_interval.is_some())
        {
            let mut params = TcpKeepalive::new();
            if let Some(time) = self.keepalive_time {
                params = params.with_time(time);
            }
            params = with_interval(params, self.keepalive_interval);
            sock.set_tcp_keepalive(&params)?;
        }
        if let Some(enabled) = self.nodelay {
            stream.set_nodelay(enabled)?;
        }
        Ok(())
    }

    pub(crate) fn export(&self) -> OptionSet {
        let mut set = OptionSet::new();
        if let Some(enabled) = self.keepalive {
            set.insert(OPTION_TCP_KEEPALIVE, enabled);
        }
        if let Some(time) = self.keepalive_time {
            set.insert(OPTION_TCP_KEEPALIVE_TIME, whole_seconds(time));
        }
        if let Some(interval) = self.keepalive_interval {
            set.insert(OPTION_TCP_KEEPALIVE_INTERVAL, whole_seconds(interval));
        }
        if let Some(enabled) = self.nodelay {
            set.insert(OPTION_TCP_NODELAY, enabled);
        }
        set
    }
}

#[cfg(any(target_os = "linux", target_os = "macos", windows))]
fn with_interval(params: TcpKeepalive, interval: Option<Duration>) -> TcpKeepalive {
    match interval {
        Some(interval) => params.with_interval(interval),
        None => params,
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
fn with_interval(params: TcpKeepalive, _interval: Option<Duration>) -> TcpKeepalive {
    params
}

fn seconds(name: &str, value: &OptionValue) -> spark_transport::Result<Duration> {
    value
        .as_integer()
        .and_then(|secs| u64::try_from(secs).ok())
        .map(Duration::from_secs)
        .ok_or_else(|| IoError::invalid_option_value(name, "non-negative integer"))
}

/// 导出时饱和到 `i64::MAX`，不做截断。
fn whole_seconds(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}
