//! Level-triggered kqueue backend.
//!
//! Each descriptor gets an `EVFILT_READ` filter for its whole registration
//! and an `EVFILT_WRITE` filter that is enabled or disabled on demand.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;
use std::time::Duration;

use hivenet_core::Token;
use tracing::trace;

use super::{PollEvent, Poller, EVENT_CAPACITY};

pub struct Kqueue {
    fd: OwnedFd,
    buf: Vec<libc::kevent>,
}

impl Kqueue {
    pub fn new() -> io::Result<Self> {
        // SAFETY: plain syscall, the returned descriptor is checked before use.
        let fd = unsafe { libc::kqueue() };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `fd` is a fresh descriptor owned by nobody else.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        // SAFETY: setting FD_CLOEXEC on a descriptor we own.
        unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) };
        Ok(Self {
            fd,
            buf: Vec::with_capacity(EVENT_CAPACITY),
        })
    }

    fn change(&self, fd: RawFd, filter: i16, flags: u16, token: Token) -> io::Result<()> {
        // SAFETY: kevent is plain old data; all-zero is a valid value.
        let mut change: libc::kevent = unsafe { std::mem::zeroed() };
        change.ident = fd as _;
        change.filter = filter as _;
        change.flags = flags as _;
        change.udata = token as usize as _;

        // SAFETY: one change record, no output buffer.
        let rc = unsafe {
            libc::kevent(self.fd.as_raw_fd(), &change, 1, ptr::null_mut(), 0, ptr::null())
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn write_flags(writable: bool) -> u16 {
        let toggle = if writable { libc::EV_ENABLE } else { libc::EV_DISABLE };
        (libc::EV_ADD | toggle) as u16
    }
}

impl Poller for Kqueue {
    fn register(&self, fd: RawFd, token: Token, writable: bool) -> io::Result<()> {
        self.change(fd, libc::EVFILT_READ as i16, (libc::EV_ADD | libc::EV_ENABLE) as u16, token)?;
        self.change(fd, libc::EVFILT_WRITE as i16, Self::write_flags(writable), token)
    }

    fn set_writable(&self, fd: RawFd, token: Token, writable: bool) -> io::Result<()> {
        self.change(fd, libc::EVFILT_WRITE as i16, Self::write_flags(writable), token)
    }

    fn deregister(&self, fd: RawFd) -> io::Result<()> {
        for filter in [libc::EVFILT_READ, libc::EVFILT_WRITE] {
            match self.change(fd, filter as i16, libc::EV_DELETE as u16, 0) {
                Err(e) if e.raw_os_error() != Some(libc::ENOENT) => return Err(e),
                _ => {}
            }
        }
        Ok(())
    }

    fn poll(&mut self, events: &mut Vec<PollEvent>, timeout: Option<Duration>) -> io::Result<usize> {
        let spec = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs() as libc::time_t,
            tv_nsec: d.subsec_nanos() as _,
        });
        let spec_ptr = spec.as_ref().map_or(ptr::null(), |s| s as *const libc::timespec);

        self.buf.clear();
        // SAFETY: the kernel writes at most `capacity` entries into `buf`.
        let n = unsafe {
            libc::kevent(
                self.fd.as_raw_fd(),
                ptr::null(),
                0,
                self.buf.as_mut_ptr(),
                self.buf.capacity() as _,
                spec_ptr,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }
        // SAFETY: kevent initialised the first `n` entries.
        unsafe { self.buf.set_len(n as usize) };

        for raw in &self.buf {
            let failed = raw.flags & (libc::EV_EOF | libc::EV_ERROR) as u16 != 0;
            let filter = raw.filter as i16;
            events.push(PollEvent {
                token: raw.udata as usize as Token,
                readable: failed || filter == libc::EVFILT_READ as i16,
                writable: failed || filter == libc::EVFILT_WRITE as i16,
            });
        }
        trace!("[POLL] kqueue returned {} events", n);
        Ok(n as usize)
    }
}
