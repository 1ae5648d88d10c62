//! OS readiness notification
//!
//! One small trait over the kernel facility, with one backend per platform
//! family selected at build time:
//!
//! | Platform | Backend | Module |
//! |----------|---------|--------|
//! | Linux, Android | epoll | `epoll.rs` |
//! | macOS, iOS, FreeBSD, OpenBSD, DragonFly | kqueue | `kqueue.rs` |
//!
//! Both backends are level-triggered. Read interest is permanent for the
//! lifetime of a registration; write interest is switched on only while a
//! stream has unsent bytes (or a connect in flight) and off again once the
//! send buffer drains. Hang-up and error conditions are reported as both
//! readable and writable so the owner observes them on its next syscall.

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

use hivenet_core::Token;

#[cfg(any(target_os = "linux", target_os = "android"))]
mod epoll;
#[cfg(any(target_os = "linux", target_os = "android"))]
pub use epoll::Epoll;

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
mod kqueue;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
pub use kqueue::Kqueue;

/// Backend used by [`Reactor`](crate::reactor::Reactor) on this platform.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub type SysPoller = Epoll;

/// Backend used by [`Reactor`](crate::reactor::Reactor) on this platform.
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
pub type SysPoller = Kqueue;

/// Maximum number of kernel events collected by one `poll` call.
pub const EVENT_CAPACITY: usize = 1024;

/// Readiness reported for one registered descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollEvent {
    pub token: Token,
    pub readable: bool,
    pub writable: bool,
}

/// Readiness notification facility.
///
/// Registration calls take `&self` so handlers can toggle write interest
/// while the reactor holds other parts of its state mutably.
pub trait Poller {
    /// Start watching `fd` for readability, and for writability if `writable`.
    fn register(&self, fd: RawFd, token: Token, writable: bool) -> io::Result<()>;

    /// Switch write interest for an already registered descriptor.
    fn set_writable(&self, fd: RawFd, token: Token, writable: bool) -> io::Result<()>;

    /// Stop watching `fd`. Must be called before the descriptor is closed.
    fn deregister(&self, fd: RawFd) -> io::Result<()>;

    /// Block up to `timeout` (forever if `None`) and append ready
    /// descriptors to `events`. An interrupted wait returns `Ok(0)`.
    fn poll(&mut self, events: &mut Vec<PollEvent>, timeout: Option<Duration>) -> io::Result<usize>;
}

/// Round a timeout up to whole milliseconds so a sub-millisecond wait does
/// not degrade into a busy loop.
pub(crate) fn timeout_millis(timeout: Option<Duration>) -> i32 {
    match timeout {
        None => -1,
        Some(d) => {
            let ms = d.as_nanos().div_ceil(1_000_000);
            i32::try_from(ms).unwrap_or(i32::MAX)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use socket2::{Domain, Socket, Type};
    use std::io::{Read, Write};
    use std::os::fd::AsRawFd;

    fn pair() -> (Socket, Socket) {
        let (a, b) = Socket::pair(Domain::UNIX, Type::STREAM, None).unwrap();
        a.set_nonblocking(true).unwrap();
        b.set_nonblocking(true).unwrap();
        (a, b)
    }

    #[test]
    fn test_timeout_rounding() {
        assert_eq!(timeout_millis(None), -1);
        assert_eq!(timeout_millis(Some(Duration::ZERO)), 0);
        assert_eq!(timeout_millis(Some(Duration::from_micros(10))), 1);
        assert_eq!(timeout_millis(Some(Duration::from_millis(20))), 20);
    }

    #[test]
    fn test_readable_after_peer_write() {
        let mut poller = SysPoller::new().unwrap();
        let (a, b) = pair();
        poller.register(a.as_raw_fd(), 7, false).unwrap();

        let mut events = Vec::new();
        poller.poll(&mut events, Some(Duration::ZERO)).unwrap();
        assert!(events.is_empty());

        (&b).write_all(b"x").unwrap();
        poller.poll(&mut events, Some(Duration::from_secs(1))).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].token, 7);
        assert!(events[0].readable);
        assert!(!events[0].writable);
    }

    #[test]
    fn test_write_interest_toggles() {
        let mut poller = SysPoller::new().unwrap();
        let (a, _b) = pair();
        poller.register(a.as_raw_fd(), 3, true).unwrap();

        let mut events = Vec::new();
        poller.poll(&mut events, Some(Duration::from_secs(1))).unwrap();
        assert!(events.iter().any(|e| e.token == 3 && e.writable));

        poller.set_writable(a.as_raw_fd(), 3, false).unwrap();
        events.clear();
        poller.poll(&mut events, Some(Duration::ZERO)).unwrap();
        assert!(events.iter().all(|e| !e.writable));

        poller.deregister(a.as_raw_fd()).unwrap();
    }

    #[test]
    fn test_hangup_reports_both() {
        let mut poller = SysPoller::new().unwrap();
        let (a, b) = pair();
        poller.register(a.as_raw_fd(), 9, false).unwrap();
        drop(b);

        let mut events = Vec::new();
        poller.poll(&mut events, Some(Duration::from_secs(1))).unwrap();
        assert!(events.iter().any(|e| e.token == 9 && e.readable && e.writable));
    }

    #[test]
    fn test_unread_input_stays_ready() {
        let mut poller = SysPoller::new().unwrap();
        let (a, b) = pair();
        poller.register(a.as_raw_fd(), 5, false).unwrap();
        (&b).write_all(b"pending").unwrap();

        // Level-triggered: every poll reports the bytes until they are read.
        let mut events = Vec::new();
        for _ in 0..3 {
            events.clear();
            poller.poll(&mut events, Some(Duration::from_secs(1))).unwrap();
            assert!(events.iter().any(|e| e.token == 5 && e.readable));
        }

        let mut sink = [0u8; 16];
        assert_eq!((&a).read(&mut sink).unwrap(), 7);
        events.clear();
        poller.poll(&mut events, Some(Duration::ZERO)).unwrap();
        assert!(events.is_empty());
    }
}
