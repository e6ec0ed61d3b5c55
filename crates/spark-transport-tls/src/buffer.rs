use bytes::{Buf, BytesMut};
use spark_transport::{IoError, IoErrorKind};

/// 接收缓冲默认上限：4 MiB。
pub const DEFAULT_MAX_BUFFERED_BYTES: usize = 4 * 1024 * 1024;

/// 底层传输交付、尚未被 TLS 引擎消费的密文字节。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 底层传输以任意大小的块推送字节，而 TLS 引擎按自身节奏拉取，二者之间需要一个 FIFO；
/// - 以 `BytesMut` 承载，追加与头部消费都不需要整体搬移。
///
/// ## 契约（What）
/// - [`append`](Self::append)：追加到尾部；超过上限时返回 `AllocationFailure`，缓冲内容保持不变；
/// - [`take_into`](Self::take_into)：从头部复制 `min(len, dst.len())` 字节并丢弃之，
///   缓冲变空时释放底层存储；
/// - [`clear`](Self::clear)：丢弃全部内容并释放存储。
///
/// ## 风险提示（Trade-offs）
/// - 上限是唯一的背压手段：对端持续发送而引擎不消费时，会话会以 `AllocationFailure` 终结。
#[derive(Debug)]
pub struct ReceiveBuffer {
    bytes: BytesMut,
    limit: usize,
}

impl ReceiveBuffer {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_BUFFERED_BYTES)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            bytes: BytesMut::new(),
            limit,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// 当前占用的底层存储容量，空缓冲为 0。
    pub fn capacity(&self) -> usize {
        self.bytes.capacity()
    }

    /// 追加一段字节。
    pub fn append(&mut self, chunk: &[u8]) -> Result<(), IoError> {
        let wanted = self
            .bytes
            .len()
            .checked_add(chunk.len())
            .filter(|wanted| *wanted <= self.limit);
        if wanted.is_none() {
            return Err(IoError::new(
                IoErrorKind::AllocationFailure,
                format!(
                    "receive buffer holds {} bytes, cannot add {} more (limit {})",
                    self.bytes.len(),
                    chunk.len(),
                    self.limit
                ),
            ));
        }
        self.bytes.extend_from_slice(chunk);
        Ok(())
    }

    /// 将头部字节复制到 `dst`，返回复制的字节数。
    pub fn take_into(&mut self, dst: &mut [u8]) -> usize {
        let count = dst.len().min(self.bytes.len());
        if count == 0 {
            return 0;
        }
        dst[..count].copy_from_slice(&self.bytes[..count]);
        self.bytes.advance(count);
        if self.bytes.is_empty() {
            self.release();
        }
        count
    }

    pub fn clear(&mut self) {
        self.release();
    }

    fn release(&mut self) {
        self.bytes = BytesMut::new();
    }
}

impl Default for ReceiveBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_take_keeps_the_tail() {
        let mut buffer = ReceiveBuffer::new();
        buffer.append(b"hello ").unwrap();
        buffer.append(b"world").unwrap();

        let mut head = [0u8; 4];
        assert_eq!(buffer.take_into(&mut head), 4);
        assert_eq!(&head, b"hell");
        assert_eq!(buffer.len(), 7);

        let mut rest = [0u8; 32];
        assert_eq!(buffer.take_into(&mut rest), 7);
        assert_eq!(&rest[..7], b"o world");
        assert!(buffer.is_empty());
    }

    #[test]
    fn storage_is_released_once_drained() {
        let mut buffer = ReceiveBuffer::new();
        buffer.append(&[7u8; 512]).unwrap();
        assert!(buffer.capacity() >= 512);

        let mut sink = [0u8; 512];
        buffer.take_into(&mut sink);
        assert_eq!(buffer.capacity(), 0);
    }

    #[test]
    fn append_beyond_limit_is_an_allocation_failure() {
        let mut buffer = ReceiveBuffer::with_limit(8);
        buffer.append(b"12345").unwrap();

        let err = buffer.append(b"6789").unwrap_err();
        assert_eq!(err.kind(), IoErrorKind::AllocationFailure);
        assert_eq!(buffer.len(), 5, "失败的追加不得改变缓冲内容");

        buffer.append(b"678").unwrap();
        assert_eq!(buffer.len(), 8);
    }

    #[test]
    fn take_from_empty_buffer_copies_nothing() {
        let mut buffer = ReceiveBuffer::new();
        let mut sink = [0u8; 4];
        assert_eq!(buffer.take_into(&mut sink), 0);
        assert_eq!(buffer.take_into(&mut []), 0);
    }
}
