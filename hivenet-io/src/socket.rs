//! Socket object contract
//!
//! The reactor drives listeners and streams uniformly through
//! [`SocketObject`]. Handlers receive an [`IoContext`] holding everything
//! they may touch outside themselves: the poller (to toggle write
//! interest), the event queue, and two work queues the reactor processes
//! after the handler returns (admissions from listeners, forward requests
//! from RPC streams). No object holds a reference back to the reactor.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use hivenet_core::options::ReactorOptions;
use hivenet_core::proto::{PackHeader, ProtoType};
use hivenet_core::router::RouterHeader;
use hivenet_core::Token;
use socket2::{SockAddr, Socket};

use crate::event::Event;
use crate::poller::Poller;

/// Link state of a listener or stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkStatus {
    /// Dialing: resolving or connecting
    Init,
    Connected,
    /// Closed by the owner, flushing queued output
    Closing,
    /// Terminal. The token no longer accepts operations.
    Closed,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Connected => "connected",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }

    /// Whether the token still accepts sends.
    #[inline]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Init | Self::Connected)
    }
}

/// A connection accepted by a listener, waiting for the capacity check.
#[derive(Debug)]
pub struct Admission {
    pub listener: Token,
    pub socket: Socket,
    pub addr: SockAddr,
    pub proto: ProtoType,
}

/// An RPC message that asked to be forwarded.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub source: Token,
    pub header: RouterHeader,
    /// Routing selector followed by the payload.
    pub body: Bytes,
}

/// Reactor state lent to a handler for the duration of one call.
pub struct IoContext<'a> {
    pub poller: &'a dyn Poller,
    pub events: &'a mut VecDeque<Event>,
    pub options: &'a ReactorOptions,
    pub accepted: &'a mut Vec<Admission>,
    pub forwards: &'a mut Vec<ForwardRequest>,
    /// Tokens whose dispatch ran out of budget this tick.
    pub deferred: &'a mut Vec<Token>,
    pub now: Instant,
}

impl IoContext<'_> {
    #[inline]
    pub fn emit(&mut self, event: Event) {
        self.events.push_back(event);
    }

    pub fn defer(&mut self, token: Token) {
        if !self.deferred.contains(&token) {
            self.deferred.push(token);
        }
    }
}

/// Uniform interface over listeners and streams.
///
/// Stream-only operations have no-op defaults so listeners ignore them.
pub trait SocketObject {
    fn token(&self) -> Token;

    fn status(&self) -> LinkStatus;

    fn proto(&self) -> ProtoType;

    /// Periodic sweep. Returns `false` once the object may be deleted.
    fn update(&mut self, ctx: &mut IoContext<'_>) -> bool;

    fn on_readable(&mut self, ctx: &mut IoContext<'_>);

    fn on_writable(&mut self, ctx: &mut IoContext<'_>);

    /// Outstanding asynchronous OS operations still referencing this
    /// object's buffers. Deletion waits for zero. Readiness backends never
    /// have any.
    fn pending_ops(&self) -> usize {
        0
    }

    /// Owner-requested close. Queued output is flushed first unless `immediate`.
    fn close(&mut self, ctx: &mut IoContext<'_>, immediate: bool);

    fn local_addr(&self) -> Option<SocketAddr>;

    fn send_frags(&mut self, _ctx: &mut IoContext<'_>, _frags: &[&[u8]]) -> bool {
        false
    }

    /// Send a pack message, stamping the next outbound sequence number.
    fn send_pack(&mut self, _ctx: &mut IoContext<'_>, _header: PackHeader, _body: &[u8]) -> bool {
        false
    }

    fn set_timeout(&mut self, _timeout: Duration) -> bool {
        false
    }

    fn set_nodelay(&mut self, _nodelay: bool) -> bool {
        false
    }

    /// Limit pack traffic to `packages` messages and `bytes` bytes per second (0 = unlimited).
    fn set_flow_ctrl(&mut self, _packages: u32, _bytes: u32) -> bool {
        false
    }

    fn remote_ip(&self) -> Option<&str> {
        None
    }

    /// Run framing over buffered input. Returns `false` if the dispatch
    /// budget ran out and the token was deferred.
    fn dispatch(&mut self, _ctx: &mut IoContext<'_>) -> bool {
        true
    }
}
