//! Connection lifecycle and request wrappers.

use std::os::unix::io::RawFd;

use tracing::{debug, warn};

use crate::backend::{Backend, Handle, SetOutcome};
use crate::{Error, Result};

/// Open mode passed to the library when a handle is created lazily.
const OPEN_MODE: &str = "w";

/// Outcome of a request that reached a server.
///
/// Error text reported by the remote peer is part of the success arm so
/// callers can inspect it without a failure path; only environment and
/// resource failures surface as [`Error`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Payload returned by the server; empty for a successful set.
    Data(Vec<u8>),
    /// Error text reported by the server.
    ServerError(String),
}

impl Reply {
    /// Whether the server answered with error text instead of a payload.
    pub fn is_server_error(&self) -> bool {
        matches!(self, Reply::ServerError(_))
    }

    /// The payload bytes, or the error text as bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Reply::Data(bytes) => bytes,
            Reply::ServerError(text) => text.into_bytes(),
        }
    }

    /// Lossy text view of the payload, or the error text.
    pub fn into_text(self) -> String {
        match self {
            Reply::Data(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Reply::ServerError(text) => text,
        }
    }
}

/// Client for the XPA messaging system.
///
/// Owns at most one connection handle, created lazily on the first request
/// and recreated after [`reset`](XpaClient::reset). The backend is injected
/// at construction so the request policy can be exercised without the C
/// library (see [`mock`](crate::mock)).
///
/// Methods take `&mut self`: a client is single-writer by construction. For
/// a connection shared across threads, wrap the client in a `Mutex` (the
/// process-wide default client does exactly that).
pub struct XpaClient<B: Backend> {
    backend: B,
    handle: Option<Handle>,
    mode: String,
}

impl<B: Backend> XpaClient<B> {
    /// Create a client with no open connection.
    ///
    /// The handle is opened in write mode on the first request.
    pub fn new(backend: B) -> Self {
        Self::with_mode(backend, OPEN_MODE)
    }

    /// Create a client with a custom open mode.
    pub fn with_mode(backend: B, mode: impl Into<String>) -> Self {
        Self {
            backend,
            handle: None,
            mode: mode.into(),
        }
    }

    /// Whether a connection handle is currently open.
    pub fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    /// Access the underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutable access to the underlying backend.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Return the current handle, opening one if none exists.
    ///
    /// With `force_reset` an existing handle is closed first and a fresh one
    /// is opened.
    pub fn acquire(&mut self, force_reset: bool) -> Result<Handle> {
        if force_reset {
            self.reset();
        }

        if let Some(handle) = self.handle {
            return Ok(handle);
        }

        let handle = self
            .backend
            .open(&self.mode)
            .ok_or_else(|| Error::ConnectionFailed("XPAOpen returned a null handle".into()))?;

        debug!("Opened XPA connection (mode {:?})", self.mode);
        self.handle = Some(handle);
        Ok(handle)
    }

    /// Close and drop the current handle, if any.
    ///
    /// The next request reopens lazily. A no-op when no handle is open.
    pub fn reset(&mut self) {
        if let Some(handle) = self.handle.take() {
            debug!("Closing XPA connection");
            self.backend.close(handle);
        }
    }

    /// Issue a get request against exactly one matching server.
    ///
    /// Returns the payload, or [`Reply::ServerError`] when the peer reports
    /// an error. Zero matching servers and a missing payload buffer are
    /// [`Error`]s.
    pub fn get(&mut self, template: &str, paramlist: &str, mode: &str) -> Result<Reply> {
        let handle = self.acquire(false)?;

        debug!("XPAGet {} {}", template, paramlist);
        let outcome = self.backend.get(handle, template, paramlist, mode);

        if outcome.servers == 0 {
            return Err(Error::NoServers("XPAGet"));
        }
        if let Some(message) = outcome.message {
            warn!("Server reported an error: {}", message);
            return Ok(Reply::ServerError(message));
        }
        match outcome.buf {
            Some(buf) => Ok(Reply::Data(buf)),
            None => Err(Error::NullReply("XPAGet")),
        }
    }

    /// Send an in-memory payload, using its NUL-terminated length.
    ///
    /// Returns the empty reply on success.
    pub fn set(&mut self, template: &str, paramlist: &str, mode: &str, data: &[u8]) -> Result<Reply> {
        self.set_n(template, paramlist, mode, data, None)
    }

    /// Send an in-memory payload with an explicit length.
    ///
    /// `None` falls back to the payload's NUL-terminated length; an explicit
    /// length is clamped to the slice.
    pub fn set_n(
        &mut self,
        template: &str,
        paramlist: &str,
        mode: &str,
        data: &[u8],
        len: Option<usize>,
    ) -> Result<Reply> {
        let len = match len {
            Some(len) => len.min(data.len()),
            None => nul_terminated_len(data),
        };

        let handle = self.acquire(false)?;

        debug!("XPASet {} {} ({} bytes)", template, paramlist, len);
        let outcome = self.backend.set(handle, template, paramlist, mode, &data[..len]);
        finish_set(outcome, "XPASet")
    }

    /// Send a payload streamed from an open file descriptor.
    ///
    /// The library reads from `fd` until end of file; the caller retains
    /// ownership of the descriptor. Returns the empty reply on success.
    pub fn set_fd(&mut self, template: &str, paramlist: &str, mode: &str, fd: RawFd) -> Result<Reply> {
        let handle = self.acquire(false)?;

        debug!("XPASetFd {} {} (fd {})", template, paramlist, fd);
        let outcome = self.backend.set_fd(handle, template, paramlist, mode, fd);
        finish_set(outcome, "XPASetFd")
    }
}

impl<B: Backend> Drop for XpaClient<B> {
    fn drop(&mut self) {
        self.reset();
    }
}

fn finish_set(outcome: SetOutcome, entry: &'static str) -> Result<Reply> {
    if outcome.servers == 0 {
        return Err(Error::NoServers(entry));
    }
    match outcome.message {
        Some(message) => {
            warn!("Server reported an error: {}", message);
            Ok(Reply::ServerError(message))
        }
        None => Ok(Reply::Data(Vec::new())),
    }
}

/// Length of `data` up to its first NUL byte, or the full slice when none.
///
/// Matches the C convention of computing an unspecified payload length with
/// `strlen`.
fn nul_terminated_len(data: &[u8]) -> usize {
    data.iter().position(|&b| b == 0).unwrap_or(data.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::GetOutcome;
    use crate::mock::{Call, MockBackend};

    use std::io::{Seek, Write};
    use std::os::unix::io::AsRawFd;

    fn client() -> (MockBackend, XpaClient<MockBackend>) {
        let backend = MockBackend::new();
        (backend.clone(), XpaClient::new(backend))
    }

    #[test]
    fn first_request_opens_exactly_one_handle() {
        let (backend, mut client) = client();

        client.get("ds9", "file", "").unwrap();
        client.get("ds9", "frame", "").unwrap();

        assert_eq!(backend.opened(), 1);
        assert!(client.is_connected());
    }

    #[test]
    fn reset_without_a_handle_is_a_noop() {
        let (backend, mut client) = client();

        client.reset();
        client.reset();

        assert_eq!(backend.closed(), 0);
        assert!(!client.is_connected());
    }

    #[test]
    fn reset_closes_and_next_request_reopens() {
        let (backend, mut client) = client();

        client.get("ds9", "file", "").unwrap();
        client.reset();

        assert!(!client.is_connected());
        assert_eq!(backend.closed(), 1);

        client.get("ds9", "file", "").unwrap();
        assert_eq!(backend.opened(), 2);
    }

    #[test]
    fn acquire_with_force_reset_replaces_the_handle() {
        let (backend, mut client) = client();

        let first = client.acquire(false).unwrap();
        let second = client.acquire(true).unwrap();

        assert_ne!(first, second);
        assert_eq!(backend.opened(), 2);
        assert_eq!(backend.closed(), 1);
    }

    #[test]
    fn failed_open_surfaces_as_connection_error() {
        let (backend, mut client) = client();
        backend.fail_open(true);

        let err = client.get("ds9", "file", "").unwrap_err();

        assert!(matches!(err, Error::ConnectionFailed(_)));
        assert!(!client.is_connected());
    }

    #[test]
    fn get_with_zero_servers_is_an_error() {
        let (backend, mut client) = client();
        backend.push_get(GetOutcome {
            servers: 0,
            buf: None,
            message: None,
        });

        let err = client.get("DS9:*", "file", "").unwrap_err();

        assert!(matches!(err, Error::NoServers("XPAGet")));
        assert!(err.to_string().contains("returned 0"));
    }

    #[test]
    fn get_returns_server_error_text_as_a_value() {
        let (backend, mut client) = client();
        backend.push_get(GetOutcome {
            servers: 1,
            buf: None,
            message: Some("XPA$ERROR unknown command (DS9:ds9)".into()),
        });

        let reply = client.get("ds9", "bogus", "").unwrap();

        assert_eq!(
            reply,
            Reply::ServerError("XPA$ERROR unknown command (DS9:ds9)".into())
        );
        assert!(reply.is_server_error());
    }

    #[test]
    fn get_with_a_missing_buffer_is_an_error() {
        let (backend, mut client) = client();
        backend.push_get(GetOutcome {
            servers: 1,
            buf: None,
            message: None,
        });

        let err = client.get("ds9", "file", "").unwrap_err();

        assert!(matches!(err, Error::NullReply("XPAGet")));
        assert!(err.to_string().contains("returned a null buffer"));
    }

    #[test]
    fn get_returns_the_payload() {
        let (backend, mut client) = client();
        backend.push_get(GetOutcome {
            servers: 1,
            buf: Some(b"/data/m31.fits\n".to_vec()),
            message: None,
        });

        let reply = client.get("ds9", "file", "").unwrap();

        assert_eq!(reply, Reply::Data(b"/data/m31.fits\n".to_vec()));
        assert_eq!(reply.into_text(), "/data/m31.fits\n");
    }

    #[test]
    fn set_computes_payload_length_up_to_the_first_nul() {
        let (backend, mut client) = client();

        client.set("ds9", "mode crosshair", "", b"hello").unwrap();
        client.set("ds9", "mode crosshair", "", b"hel\0lo").unwrap();

        let payloads: Vec<Vec<u8>> = backend
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Set { data, .. } => Some(data),
                _ => None,
            })
            .collect();
        assert_eq!(payloads[0], b"hello");
        assert_eq!(payloads[1], b"hel");
    }

    #[test]
    fn set_with_an_explicit_length_clamps_to_the_slice() {
        let (backend, mut client) = client();

        client
            .set_n("ds9", "regions", "", b"circle", Some(3))
            .unwrap();
        client
            .set_n("ds9", "regions", "", b"circle", Some(100))
            .unwrap();

        let payloads: Vec<Vec<u8>> = backend
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Set { data, .. } => Some(data),
                _ => None,
            })
            .collect();
        assert_eq!(payloads[0], b"cir");
        assert_eq!(payloads[1], b"circle");
    }

    #[test]
    fn set_success_is_the_empty_reply() {
        let (_backend, mut client) = client();

        let reply = client.set("ds9", "zoom to fit", "", b"").unwrap();

        assert_eq!(reply, Reply::Data(Vec::new()));
        assert!(reply.into_bytes().is_empty());
    }

    #[test]
    fn set_with_zero_servers_is_an_error() {
        let (backend, mut client) = client();
        backend.push_set(SetOutcome {
            servers: 0,
            message: None,
        });

        let err = client.set("DS9:*", "frame 2", "", b"").unwrap_err();

        assert!(matches!(err, Error::NoServers("XPASet")));
    }

    #[test]
    fn set_returns_server_error_text_as_a_value() {
        let (backend, mut client) = client();
        backend.push_set(SetOutcome {
            servers: 1,
            message: Some("XPA$ERROR bad region (DS9:ds9)".into()),
        });

        let reply = client.set("ds9", "regions", "", b"bogus").unwrap();

        assert_eq!(reply, Reply::ServerError("XPA$ERROR bad region (DS9:ds9)".into()));
    }

    #[test]
    fn set_fd_streams_from_the_caller_descriptor() {
        let (backend, mut client) = client();

        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"SIMPLE  =                    T").unwrap();
        file.rewind().unwrap();

        let reply = client.set_fd("ds9", "fits", "", file.as_raw_fd()).unwrap();
        assert_eq!(reply, Reply::Data(Vec::new()));

        let streamed: Vec<Vec<u8>> = backend
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::SetFd { data, .. } => Some(data),
                _ => None,
            })
            .collect();
        assert_eq!(streamed, vec![b"SIMPLE  =                    T".to_vec()]);
    }

    #[test]
    fn set_fd_with_zero_servers_is_an_error() {
        let (backend, mut client) = client();
        backend.push_set(SetOutcome {
            servers: 0,
            message: None,
        });

        let file = tempfile::tempfile().unwrap();
        let err = client.set_fd("ds9", "fits", "", file.as_raw_fd()).unwrap_err();

        assert!(matches!(err, Error::NoServers("XPASetFd")));
    }

    #[test]
    fn drop_closes_an_open_handle() {
        let backend = MockBackend::new();
        {
            let mut client = XpaClient::new(backend.clone());
            client.get("ds9", "file", "").unwrap();
        }
        assert_eq!(backend.closed(), 1);
    }

    #[test]
    fn custom_open_mode_reaches_the_backend() {
        let backend = MockBackend::new();
        let mut client = XpaClient::with_mode(backend.clone(), "rw");

        client.acquire(false).unwrap();

        assert_eq!(
            backend.calls(),
            vec![Call::Open { mode: "rw".into() }]
        );
    }

    #[test]
    fn nul_terminated_len_matches_strlen() {
        assert_eq!(nul_terminated_len(b"hello"), 5);
        assert_eq!(nul_terminated_len(b"hel\0lo"), 3);
        assert_eq!(nul_terminated_len(b"\0"), 0);
        assert_eq!(nul_terminated_len(b""), 0);
    }
}
