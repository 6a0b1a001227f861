//! Thin wrapper over epoll.
//!
//! Every registration carries a caller-chosen `u64` token that comes back
//! with each readiness event. Registration failures are reported as `false`
//! and logged; only creation and waiting surface errors.

use crate::error::{ServerError, ServerResult};
use log::debug;
use std::io::{self, ErrorKind};
use std::ops::BitOr;
use std::os::unix::io::RawFd;

/// Interest mask for a registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest(u32);

impl Interest {
    pub const READABLE: Interest = Interest(libc::EPOLLIN as u32);
    pub const WRITABLE: Interest = Interest(libc::EPOLLOUT as u32);
    /// Edge-triggered delivery; level-triggered when absent
    pub const EDGE: Interest = Interest(libc::EPOLLET as u32);
    /// Disarm after one delivery until re-armed with [`Poller::modify`]
    pub const ONESHOT: Interest = Interest(libc::EPOLLONESHOT as u32);
    /// Peer shut down its writing half
    pub const RDHUP: Interest = Interest(libc::EPOLLRDHUP as u32);

    /// The empty mask
    pub const fn empty() -> Self {
        Interest(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Interest) -> bool {
        self.0 & other.0 == other.0
    }

    /// Add [`Interest::EDGE`] when `edge` is set
    pub fn edge_if(self, edge: bool) -> Self {
        if edge {
            self | Interest::EDGE
        } else {
            self
        }
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        Interest(self.0 | rhs.0)
    }
}

/// A readiness event returned by [`Poller::wait`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    token: u64,
    events: u32,
}

impl Event {
    pub fn new(token: u64, events: u32) -> Self {
        Self { token, events }
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn bits(&self) -> u32 {
        self.events
    }

    pub fn is_readable(&self) -> bool {
        self.events & libc::EPOLLIN as u32 != 0
    }

    pub fn is_writable(&self) -> bool {
        self.events & libc::EPOLLOUT as u32 != 0
    }

    /// Peer hang-up or socket error; always observed, regardless of interest
    pub fn is_hangup(&self) -> bool {
        self.events & (libc::EPOLLRDHUP | libc::EPOLLHUP | libc::EPOLLERR) as u32 != 0
    }
}

/// Storage for events filled in by [`Poller::wait`]
pub struct Events {
    inner: Vec<libc::epoll_event>,
    len: usize,
}

impl Events {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: vec![libc::epoll_event { events: 0, u64: 0 }; capacity.max(1)],
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        self.inner[..self.len].iter().map(|event| {
            let token = event.u64;
            let events = event.events;
            Event::new(token, events)
        })
    }
}

/// The readiness-notification reactor
#[derive(Debug)]
pub struct Poller {
    epoll_fd: RawFd,
}

impl Poller {
    /// Create a new epoll instance
    pub fn new() -> ServerResult<Self> {
        let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epoll_fd < 0 {
            return Err(ServerError::Io(io::Error::last_os_error()));
        }

        Ok(Self { epoll_fd })
    }

    /// Register `fd` with the given interest
    #[must_use]
    pub fn add(&self, fd: RawFd, token: u64, interest: Interest) -> bool {
        self.ctl(libc::EPOLL_CTL_ADD, fd, token, interest)
    }

    /// Replace the interest of an already registered `fd`; re-arms one-shot
    /// registrations
    #[must_use]
    pub fn modify(&self, fd: RawFd, token: u64, interest: Interest) -> bool {
        self.ctl(libc::EPOLL_CTL_MOD, fd, token, interest)
    }

    /// Deregister `fd`
    #[must_use]
    pub fn remove(&self, fd: RawFd) -> bool {
        if fd < 0 {
            return false;
        }

        let ret = unsafe {
            libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut())
        };
        if ret < 0 {
            debug!("epoll_ctl(DEL, {}) failed: {}", fd, io::Error::last_os_error());
            return false;
        }

        true
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, token: u64, interest: Interest) -> bool {
        if fd < 0 {
            return false;
        }

        let mut event = libc::epoll_event {
            events: interest.bits(),
            u64: token,
        };

        let ret = unsafe { libc::epoll_ctl(self.epoll_fd, op, fd, &mut event as *mut _) };
        if ret < 0 {
            debug!("epoll_ctl({}, {}) failed: {}", op, fd, io::Error::last_os_error());
            return false;
        }

        true
    }

    /// Wait for events; `timeout_ms < 0` blocks indefinitely.
    ///
    /// Returns the number of events stored in `events`. An interrupted wait
    /// yields zero events.
    pub fn wait(&self, events: &mut Events, timeout_ms: i32) -> ServerResult<usize> {
        let num_events = unsafe {
            libc::epoll_wait(
                self.epoll_fd,
                events.inner.as_mut_ptr(),
                events.inner.len() as i32,
                timeout_ms,
            )
        };

        if num_events < 0 {
            events.len = 0;
            let err = io::Error::last_os_error();
            if err.kind() != ErrorKind::Interrupted {
                return Err(ServerError::Io(err));
            }
            return Ok(0);
        }

        events.len = num_events as usize;
        Ok(events.len)
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epoll_fd);
        }
    }
}
