//! Scripted backend for exercising the client without the C library.
//!
//! Used by this crate's own tests and available to downstream tests through
//! the `mock` feature.

use std::collections::VecDeque;
use std::fs::File;
use std::io::Read;
use std::os::fd::BorrowedFd;
use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex};

use crate::backend::{Backend, GetOutcome, Handle, SetOutcome};

/// A call recorded by the mock backend, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Open {
        mode: String,
    },
    Close {
        handle: usize,
    },
    Get {
        template: String,
        paramlist: String,
        mode: String,
    },
    Set {
        template: String,
        paramlist: String,
        mode: String,
        data: Vec<u8>,
    },
    SetFd {
        template: String,
        paramlist: String,
        mode: String,
        data: Vec<u8>,
    },
}

/// Scripted stand-in for the XPA client library.
///
/// Outcomes queued with [`push_get`](MockBackend::push_get) /
/// [`push_set`](MockBackend::push_set) are popped per request; an empty
/// queue yields a single-server success with an empty payload. State is
/// shared across clones so a test can keep a probe after handing the backend
/// to a client.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<State>>,
}

#[derive(Debug, Default)]
struct State {
    fail_open: bool,
    opened: usize,
    closed: usize,
    gets: VecDeque<GetOutcome>,
    sets: VecDeque<SetOutcome>,
    calls: Vec<Call>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent opens return a null handle.
    pub fn fail_open(&self, fail: bool) {
        self.state.lock().unwrap().fail_open = fail;
    }

    /// Queue the outcome for the next get request.
    pub fn push_get(&self, outcome: GetOutcome) {
        self.state.lock().unwrap().gets.push_back(outcome);
    }

    /// Queue the outcome for the next set or set-fd request.
    pub fn push_set(&self, outcome: SetOutcome) {
        self.state.lock().unwrap().sets.push_back(outcome);
    }

    /// Number of handles opened so far.
    pub fn opened(&self) -> usize {
        self.state.lock().unwrap().opened
    }

    /// Number of handles closed so far.
    pub fn closed(&self) -> usize {
        self.state.lock().unwrap().closed
    }

    /// Every call recorded so far.
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }
}

impl Backend for MockBackend {
    fn open(&mut self, mode: &str) -> Option<Handle> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Open { mode: mode.into() });
        if state.fail_open {
            return None;
        }
        state.opened += 1;
        Some(Handle::from_raw(state.opened))
    }

    fn close(&mut self, handle: Handle) {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Close {
            handle: handle.as_raw(),
        });
        state.closed += 1;
    }

    fn get(&mut self, _handle: Handle, template: &str, paramlist: &str, mode: &str) -> GetOutcome {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Get {
            template: template.into(),
            paramlist: paramlist.into(),
            mode: mode.into(),
        });
        state.gets.pop_front().unwrap_or(GetOutcome {
            servers: 1,
            buf: Some(Vec::new()),
            message: None,
        })
    }

    fn set(
        &mut self,
        _handle: Handle,
        template: &str,
        paramlist: &str,
        mode: &str,
        data: &[u8],
    ) -> SetOutcome {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Set {
            template: template.into(),
            paramlist: paramlist.into(),
            mode: mode.into(),
            data: data.to_vec(),
        });
        state.sets.pop_front().unwrap_or(SetOutcome {
            servers: 1,
            message: None,
        })
    }

    fn set_fd(
        &mut self,
        _handle: Handle,
        template: &str,
        paramlist: &str,
        mode: &str,
        fd: RawFd,
    ) -> SetOutcome {
        // Drain the descriptor the way the real library would, on a dup so
        // the caller's descriptor stays open.
        let mut data = Vec::new();
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        if let Ok(owned) = borrowed.try_clone_to_owned() {
            let _ = File::from(owned).read_to_end(&mut data);
        }

        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::SetFd {
            template: template.into(),
            paramlist: paramlist.into(),
            mode: mode.into(),
            data,
        });
        state.sets.pop_front().unwrap_or(SetOutcome {
            servers: 1,
            message: None,
        })
    }
}
