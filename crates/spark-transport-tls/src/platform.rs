//! 进程级加密后端的初始化与收尾。
//!
//! rustls 的加密原语由 [`CryptoProvider`] 提供；`init` 把 ring 后端安装为进程默认，
//! 之后 [`RustlsEngine::from_process_default`](crate::RustlsEngine::from_process_default)
//! 以及 `TlsIo::create` 的默认引擎才可用。

use rustls::crypto::CryptoProvider;
use tracing::debug;

/// 安装进程默认加密后端；重复调用或已有其他后端时什么也不做。
pub fn init() {
    if CryptoProvider::get_default().is_some() {
        return;
    }
    match rustls::crypto::ring::default_provider().install_default() {
        Ok(()) => debug!("ring crypto provider installed as process default"),
        Err(_) => debug!("another crypto provider was installed concurrently"),
    }
}

/// 进程收尾。默认后端一经安装便与进程同寿，这里无需释放任何资源。
pub fn deinit() {}

/// 进程默认后端是否已就绪。
pub fn is_initialized() -> bool {
    CryptoProvider::get_default().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init();
        init();
        assert!(is_initialized());
        deinit();
        assert!(is_initialized());
    }
}
