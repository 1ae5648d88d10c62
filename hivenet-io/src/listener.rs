//! Listening socket.
//!
//! Accepts in a loop on each readiness notification, up to
//! `accept_per_wakeup` connections or until the backlog is empty. Accepted
//! sockets are configured (non-blocking, no-delay, close-on-exec) and queued
//! as admissions; the reactor applies the capacity check and creates the
//! stream once the handler returns.

use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};

use hivenet_core::options::ReactorOptions;
use hivenet_core::proto::ProtoType;
use hivenet_core::Token;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, trace, warn};

use crate::socket::{Admission, IoContext, LinkStatus, SocketObject};
use crate::stream::configure_stream_socket;

pub struct Listener {
    token: Token,
    proto: ProtoType,
    socket: Option<Socket>,
    status: LinkStatus,
    local: Option<SocketAddr>,
}

impl Listener {
    /// Bind and listen on `addr`. Nothing is registered with a poller yet.
    pub fn bind(
        token: Token,
        addr: SocketAddr,
        proto: ProtoType,
        options: &ReactorOptions,
    ) -> io::Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_cloexec(true)?;
        socket.bind(&addr.into())?;
        socket.listen(options.listen_backlog)?;
        socket.set_nonblocking(true)?;

        let local = socket.local_addr()?.as_socket();
        debug!("[LISTEN] token {} {} on {:?}", token, proto, local);
        Ok(Self {
            token,
            proto,
            socket: Some(socket),
            status: LinkStatus::Connected,
            local,
        })
    }

    /// Descriptor to register with the poller.
    pub fn fd(&self) -> Option<RawFd> {
        self.socket.as_ref().map(AsRawFd::as_raw_fd)
    }

    fn release(&mut self, ctx: &mut IoContext<'_>) {
        if let Some(socket) = self.socket.take() {
            if let Err(e) = ctx.poller.deregister(socket.as_raw_fd()) {
                trace!("[LISTEN] deregister token {}: {}", self.token, e);
            }
        }
        self.status = LinkStatus::Closed;
    }
}

impl SocketObject for Listener {
    fn token(&self) -> Token {
        self.token
    }

    fn status(&self) -> LinkStatus {
        self.status
    }

    fn proto(&self) -> ProtoType {
        self.proto
    }

    fn update(&mut self, _ctx: &mut IoContext<'_>) -> bool {
        !(self.status == LinkStatus::Closed && self.pending_ops() == 0)
    }

    fn on_readable(&mut self, ctx: &mut IoContext<'_>) {
        let Some(socket) = self.socket.as_ref() else {
            return;
        };

        let mut accepted = 0;
        while accepted < ctx.options.accept_per_wakeup {
            match socket.accept() {
                Ok((conn, addr)) => {
                    if let Err(e) = configure_stream_socket(&conn, ctx.options.nodelay) {
                        warn!("[ACCEPT] configure {:?} failed: {}", addr.as_socket(), e);
                        continue;
                    }
                    accepted += 1;
                    ctx.accepted.push(Admission {
                        listener: self.token,
                        socket: conn,
                        addr,
                        proto: self.proto,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("[ACCEPT] token {}: {}", self.token, e);
                    break;
                }
            }
        }
        if accepted > 0 {
            trace!("[ACCEPT] token {} accepted {}", self.token, accepted);
        }
    }

    fn on_writable(&mut self, _ctx: &mut IoContext<'_>) {}

    fn close(&mut self, ctx: &mut IoContext<'_>, _immediate: bool) {
        if self.status != LinkStatus::Closed {
            debug!("[LISTEN] token {} closed", self.token);
            self.release(ctx);
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }
}
