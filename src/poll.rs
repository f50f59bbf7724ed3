//! Thin wrappers around `poll(2)`.
//!
//! Client sockets are switched to non-blocking mode once, at accept time.
//! Anything that needs to block on one of them waits here for readiness
//! instead of flipping `O_NONBLOCK` back and forth.

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

/// Readiness interest for one descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Read,
    Write,
    ReadWrite,
}

impl Interest {
    fn events(self) -> libc::c_short {
        match self {
            Interest::Read => libc::POLLIN,
            Interest::Write => libc::POLLOUT,
            Interest::ReadWrite => libc::POLLIN | libc::POLLOUT,
        }
    }
}

/// What `poll` reported for one registered descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    /// Error or hang-up; the owner should treat the descriptor as dead.
    pub failed: bool,
}

impl Readiness {
    fn from_revents(revents: libc::c_short) -> Self {
        Self {
            readable: revents & libc::POLLIN != 0,
            writable: revents & libc::POLLOUT != 0,
            failed: revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0,
        }
    }
}

/// A set of descriptors waited on together.
///
/// Rebuilt on every loop iteration by the dispatch loop, so registration is
/// just a push and tokens are plain indices.
#[derive(Debug, Default)]
pub struct PollSet {
    fds: Vec<libc::pollfd>,
}

impl PollSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.fds.clear();
    }

    /// Register `fd` and return the token used to look up its readiness.
    pub fn register(&mut self, fd: RawFd, interest: Interest) -> usize {
        self.fds.push(libc::pollfd {
            fd,
            events: interest.events(),
            revents: 0,
        });
        self.fds.len() - 1
    }

    /// Wait until at least one descriptor is ready or `timeout` elapses.
    ///
    /// Returns the number of ready descriptors; `EINTR` counts as zero.
    pub fn wait(&mut self, timeout: Option<Duration>) -> io::Result<usize> {
        let timeout_ms = timeout_to_ms(timeout);
        let rc = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as libc::nfds_t,
                timeout_ms,
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }
        Ok(rc as usize)
    }

    pub fn readiness(&self, token: usize) -> Readiness {
        self.fds
            .get(token)
            .map(|p| Readiness::from_revents(p.revents))
            .unwrap_or_default()
    }
}

/// Block until a single descriptor is ready for `interest`.
///
/// Returns `Ok(false)` on timeout. Error/hang-up conditions are reported as
/// ready so the following read or write surfaces the real error.
pub fn wait_fd(fd: RawFd, interest: Interest, timeout: Option<Duration>) -> io::Result<bool> {
    let mut set = PollSet::new();
    let token = set.register(fd, interest);
    loop {
        let n = set.wait(timeout)?;
        if n > 0 {
            let r = set.readiness(token);
            return Ok(r.readable || r.writable || r.failed);
        }
        if timeout.is_some() {
            return Ok(false);
        }
    }
}

fn timeout_to_ms(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(d) => d.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
    }
}
