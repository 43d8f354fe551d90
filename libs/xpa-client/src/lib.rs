//! # xpa-client
//!
//! Client bindings for the XPA messaging system used by astronomical
//! image-display servers such as DS9.
//!
//! The XPA wire protocol, template addressing, and transport live entirely
//! in the external `libxpa` C library. This crate owns the connection
//! lifecycle (a single lazily-opened handle per client) and translates the
//! library's raw outcomes into Rust values.
//!
//! ## Usage
//!
//! ```ignore
//! use xpa_client::Reply;
//!
//! // Process-wide client, opened lazily on first use (`libxpa` feature).
//! match xpa_client::get("ds9", "file", "")? {
//!     Reply::Data(bytes) => println!("{}", String::from_utf8_lossy(&bytes)),
//!     Reply::ServerError(text) => eprintln!("ds9 rejected the request: {}", text),
//! }
//!
//! xpa_client::set("ds9", "zoom to fit", "", b"")?;
//! xpa_client::reset(); // drop the connection; the next request reopens it
//! ```
//!
//! Error text reported by a remote server comes back as
//! [`Reply::ServerError`] rather than as an [`Error`], so callers can
//! inspect it without a failure path. [`Error`] is reserved for environment
//! failures: the connection cannot be opened, no server matched the
//! template, or the library returned no payload.
//!
//! ## Mock Mode
//!
//! For tests without libxpa or a running server, enable the `mock` feature
//! and inject [`mock::MockBackend`] into [`XpaClient::new`]:
//!
//! ```toml
//! xpa-client = { version = "0.1", features = ["mock"] }
//! ```
//!
//! Transport-level configuration (timeouts, connection method, access
//! control) belongs to the library itself through its `XPA_*` environment
//! variables, e.g. `XPA_TIMEOUT` and `XPA_METHOD`.

pub mod backend;
pub mod client;
#[cfg(feature = "libxpa")]
pub mod ffi;
#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use backend::{Backend, GetOutcome, Handle, SetOutcome};
pub use client::{Reply, XpaClient};

/// Errors raised by the binding layer.
///
/// Error text reported by a remote server is not an `Error`; it is returned
/// as [`Reply::ServerError`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Opening the underlying connection failed.
    #[error("unable to open XPA connection: {0}")]
    ConnectionFailed(String),

    /// The request completed against zero servers.
    #[error("{0} returned 0")]
    NoServers(&'static str),

    /// The library reported success but returned no payload.
    #[error("{0} returned a null buffer")]
    NullReply(&'static str),
}

/// Result type for binding operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Opaque record reserved for structured reply support.
#[derive(Debug, Default, Clone, Copy)]
pub struct XpaRec;

#[cfg(feature = "libxpa")]
pub use default_client::{get, reset, set, set_fd, set_n};

/// Process-wide default client over the real transport.
///
/// One lazily-initialized [`XpaClient<FfiBackend>`] shared by the free
/// functions; a mutex serializes callers, so the single handle is never
/// driven from two threads at once.
#[cfg(feature = "libxpa")]
mod default_client {
    use std::os::unix::io::RawFd;
    use std::sync::{Mutex, OnceLock, PoisonError};

    use crate::client::Reply;
    use crate::ffi::FfiBackend;
    use crate::{Result, XpaClient};

    static CLIENT: OnceLock<Mutex<XpaClient<FfiBackend>>> = OnceLock::new();

    fn with_client<T>(f: impl FnOnce(&mut XpaClient<FfiBackend>) -> T) -> T {
        let client = CLIENT.get_or_init(|| Mutex::new(XpaClient::new(FfiBackend::new())));
        let mut guard = client.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Get from the process-wide client; see [`XpaClient::get`].
    pub fn get(template: &str, paramlist: &str, mode: &str) -> Result<Reply> {
        with_client(|client| client.get(template, paramlist, mode))
    }

    /// Set through the process-wide client; see [`XpaClient::set`].
    pub fn set(template: &str, paramlist: &str, mode: &str, data: &[u8]) -> Result<Reply> {
        with_client(|client| client.set(template, paramlist, mode, data))
    }

    /// Set with an explicit payload length; see [`XpaClient::set_n`].
    pub fn set_n(
        template: &str,
        paramlist: &str,
        mode: &str,
        data: &[u8],
        len: Option<usize>,
    ) -> Result<Reply> {
        with_client(|client| client.set_n(template, paramlist, mode, data, len))
    }

    /// Stream from a file descriptor through the process-wide client; see
    /// [`XpaClient::set_fd`].
    pub fn set_fd(template: &str, paramlist: &str, mode: &str, fd: RawFd) -> Result<Reply> {
        with_client(|client| client.set_fd(template, paramlist, mode, fd))
    }

    /// Drop the process-wide connection; the next request reopens it.
    pub fn reset() {
        with_client(|client| client.reset());
    }
}
