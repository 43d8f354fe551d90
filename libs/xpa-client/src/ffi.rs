//! Raw bindings to the system XPA client library.
//!
//! The covered entry points are the fixed boundary used by the request
//! wrappers: `XPAOpen`, `XPAClose`, `XPAGet`, `XPASet`, `XPASetFd`. Buffers
//! and error messages returned by the library are copied into owned memory
//! and the C allocations are released here. The names array of the C
//! interface is never requested and every call addresses exactly one server.

use std::ffi::{CStr, CString};
use std::os::unix::io::RawFd;
use std::ptr;

use libc::{c_char, c_int, c_void, size_t};

use crate::backend::{Backend, GetOutcome, Handle, SetOutcome};

/// Opaque xparec record behind an `XPA` handle.
#[repr(C)]
struct XpaRecOpaque {
    _private: [u8; 0],
}

type RawXpa = *mut XpaRecOpaque;

#[link(name = "xpa")]
extern "C" {
    fn XPAOpen(mode: *const c_char) -> RawXpa;

    fn XPAClose(xpa: RawXpa);

    fn XPAGet(
        xpa: RawXpa,
        template: *const c_char,
        paramlist: *const c_char,
        mode: *const c_char,
        bufs: *mut *mut c_char,
        lens: *mut size_t,
        names: *mut *mut c_char,
        messages: *mut *mut c_char,
        n: c_int,
    ) -> c_int;

    fn XPASet(
        xpa: RawXpa,
        template: *const c_char,
        paramlist: *const c_char,
        mode: *const c_char,
        buf: *const c_char,
        len: size_t,
        names: *mut *mut c_char,
        messages: *mut *mut c_char,
        n: c_int,
    ) -> c_int;

    fn XPASetFd(
        xpa: RawXpa,
        template: *const c_char,
        paramlist: *const c_char,
        mode: *const c_char,
        fd: c_int,
        names: *mut *mut c_char,
        messages: *mut *mut c_char,
        n: c_int,
    ) -> c_int;
}

/// Backend that calls the system XPA client library.
///
/// Transport behavior (connection method, timeouts, access control) is
/// governed by the `XPA_*` environment variables the library reads itself.
#[derive(Debug, Default)]
pub struct FfiBackend;

impl FfiBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Backend for FfiBackend {
    fn open(&mut self, mode: &str) -> Option<Handle> {
        let mode = to_c(mode);
        let raw = unsafe { XPAOpen(mode.as_ptr()) };
        if raw.is_null() {
            None
        } else {
            Some(Handle::from_raw(raw as usize))
        }
    }

    fn close(&mut self, handle: Handle) {
        unsafe { XPAClose(handle.as_raw() as RawXpa) }
    }

    fn get(&mut self, handle: Handle, template: &str, paramlist: &str, mode: &str) -> GetOutcome {
        let template = to_c(template);
        let paramlist = to_c(paramlist);
        let mode = to_c(mode);

        let mut buf: *mut c_char = ptr::null_mut();
        let mut len: size_t = 0;
        let mut message: *mut c_char = ptr::null_mut();

        let servers = unsafe {
            XPAGet(
                handle.as_raw() as RawXpa,
                template.as_ptr(),
                paramlist.as_ptr(),
                mode.as_ptr(),
                &mut buf,
                &mut len,
                ptr::null_mut(),
                &mut message,
                1,
            )
        };

        GetOutcome {
            servers,
            buf: unsafe { take_buffer(buf, len) },
            message: unsafe { take_message(message) },
        }
    }

    fn set(
        &mut self,
        handle: Handle,
        template: &str,
        paramlist: &str,
        mode: &str,
        data: &[u8],
    ) -> SetOutcome {
        let template = to_c(template);
        let paramlist = to_c(paramlist);
        let mode = to_c(mode);

        let mut message: *mut c_char = ptr::null_mut();

        let servers = unsafe {
            XPASet(
                handle.as_raw() as RawXpa,
                template.as_ptr(),
                paramlist.as_ptr(),
                mode.as_ptr(),
                data.as_ptr() as *const c_char,
                data.len() as size_t,
                ptr::null_mut(),
                &mut message,
                1,
            )
        };

        SetOutcome {
            servers,
            message: unsafe { take_message(message) },
        }
    }

    fn set_fd(
        &mut self,
        handle: Handle,
        template: &str,
        paramlist: &str,
        mode: &str,
        fd: RawFd,
    ) -> SetOutcome {
        let template = to_c(template);
        let paramlist = to_c(paramlist);
        let mode = to_c(mode);

        let mut message: *mut c_char = ptr::null_mut();

        let servers = unsafe {
            XPASetFd(
                handle.as_raw() as RawXpa,
                template.as_ptr(),
                paramlist.as_ptr(),
                mode.as_ptr(),
                fd,
                ptr::null_mut(),
                &mut message,
                1,
            )
        };

        SetOutcome {
            servers,
            message: unsafe { take_message(message) },
        }
    }
}

/// C-string copy of `s`, truncated at the first NUL as the C call would be.
fn to_c(s: &str) -> CString {
    let end = s.find('\0').unwrap_or(s.len());
    CString::new(&s[..end]).unwrap_or_default()
}

/// Copy a library-allocated payload into owned memory and free the original.
unsafe fn take_buffer(buf: *mut c_char, len: size_t) -> Option<Vec<u8>> {
    if buf.is_null() {
        return None;
    }
    let owned = std::slice::from_raw_parts(buf as *const u8, len).to_vec();
    libc::free(buf as *mut c_void);
    Some(owned)
}

/// Copy a library-allocated error message and free the original.
unsafe fn take_message(message: *mut c_char) -> Option<String> {
    if message.is_null() {
        return None;
    }
    let owned = CStr::from_ptr(message).to_string_lossy().into_owned();
    libc::free(message as *mut c_void);
    Some(owned)
}
