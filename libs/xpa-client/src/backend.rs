//! Transport seam between the request wrappers and the XPA client library.
//!
//! [`Backend`] mirrors the fixed C boundary one method per entry point and
//! reports raw outcomes; the policy that turns an outcome into a
//! [`Reply`](crate::Reply) or an [`Error`](crate::Error) lives in
//! [`XpaClient`](crate::XpaClient).

use std::os::unix::io::RawFd;

/// Opaque token for an open XPA session.
///
/// Pointer-width so the real transport can store the raw `XPA` pointer
/// behind it. The value is meaningless outside the backend that issued it;
/// callers only ever borrow handles from their client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handle(usize);

impl Handle {
    pub(crate) fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub(crate) fn as_raw(self) -> usize {
        self.0
    }
}

/// What the library reported for a get request, before policy is applied.
///
/// Mirrors the C out-parameters: number of servers that completed the
/// transfer, the payload buffer, and any error text from the remote peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetOutcome {
    /// Number of servers that completed the transfer.
    pub servers: i32,
    /// Payload buffer, if the library returned one.
    pub buf: Option<Vec<u8>>,
    /// Error text reported by the remote peer, if any.
    pub message: Option<String>,
}

/// What the library reported for a set or set-fd request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetOutcome {
    /// Number of servers that completed the transfer.
    pub servers: i32,
    /// Error text reported by the remote peer, if any.
    pub message: Option<String>,
}

/// Raw calls into the external XPA client library.
///
/// Requests always address exactly one server; the names array of the C
/// interface is never requested.
pub trait Backend {
    /// Open a session. `None` means the library returned a null handle.
    fn open(&mut self, mode: &str) -> Option<Handle>;

    /// Close a session previously returned by [`Backend::open`].
    fn close(&mut self, handle: Handle);

    /// Retrieve data from the server matching `template`.
    fn get(&mut self, handle: Handle, template: &str, paramlist: &str, mode: &str) -> GetOutcome;

    /// Send an in-memory payload to the server matching `template`.
    fn set(
        &mut self,
        handle: Handle,
        template: &str,
        paramlist: &str,
        mode: &str,
        data: &[u8],
    ) -> SetOutcome;

    /// Send a payload streamed from an open file descriptor.
    ///
    /// The library reads from `fd`; ownership of the descriptor stays with
    /// the caller.
    fn set_fd(
        &mut self,
        handle: Handle,
        template: &str,
        paramlist: &str,
        mode: &str,
        fd: RawFd,
    ) -> SetOutcome;
}
