//! Connection state machine
//!
//! ```text
//!  dial ──► Init ──connect ok──► Connected ──close (output queued)──► Closing
//!            │                     │  ▲                                  │
//!            │ timeout / exhausted │  └── accept                         │ drained
//!            ▼                     ▼                                     ▼
//!          Closed ◄──── error / EOF / protocol violation ───────────── Closed
//! ```
//!
//! - Dialing walks the resolved address list in order; each failed attempt
//!   moves on to the next candidate and only the last failure is reported.
//! - RPC dialers queue the handshake secret before anything else, so
//!   sends issued while still in `Init` follow it on the wire.
//! - Reads drain the socket until it would block, then run framing. When
//!   the receive buffer is at its maximum and framing cannot consume
//!   anything, the connection is closed.
//! - Writes go straight to the socket while nothing is queued; leftovers
//!   are buffered and write interest stays on until the buffer drains.
//! - Timeouts and pack flow control are checked in the periodic sweep.

use std::io::{self, IoSlice, Read};
use std::net::{SocketAddr, ToSocketAddrs};
use std::os::fd::AsRawFd;
use std::time::{Duration, Instant};
use std::vec;

use hivenet_core::buffer::IoBuffer;
use hivenet_core::error::NetError;
use hivenet_core::options::ReactorOptions;
use hivenet_core::proto::{PackHeader, ProtoType, PACK_HEADER_LEN};
use hivenet_core::varint::{encode_u64, MAX_VARINT_LEN};
use hivenet_core::Token;
use smallvec::SmallVec;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::{debug, trace, warn};

use crate::codec::{Decoded, Frame, FrameDecoder};
use crate::event::{Event, Package};
use crate::socket::{ForwardRequest, IoContext, LinkStatus, SocketObject};

/// Apply the per-stream socket options shared by accepted and dialed streams.
pub(crate) fn configure_stream_socket(socket: &Socket, nodelay: bool) -> io::Result<()> {
    socket.set_nonblocking(true)?;
    socket.set_cloexec(true)?;
    socket.set_nodelay(nodelay)?;
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    socket.set_nosigpipe(true)?;
    Ok(())
}

fn is_in_progress(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EINPROGRESS)
}

enum ReadOutcome {
    /// Socket would block; everything available was read
    Drained,
    /// Receive buffer is at its maximum
    Full,
    Eof,
    Failed(io::Error),
}

/// Rolling packages/sec and bytes/sec budget for pack streams.
#[derive(Debug)]
struct FlowControl {
    max_packages: u32,
    max_bytes: u32,
    window_start: Instant,
    packages: u64,
    bytes: u64,
}

impl FlowControl {
    fn new(now: Instant) -> Self {
        Self {
            max_packages: 0,
            max_bytes: 0,
            window_start: now,
            packages: 0,
            bytes: 0,
        }
    }

    fn configure(&mut self, packages: u32, bytes: u32, now: Instant) {
        self.max_packages = packages;
        self.max_bytes = bytes;
        self.reset(now);
    }

    fn reset(&mut self, now: Instant) {
        self.window_start = now;
        self.packages = 0;
        self.bytes = 0;
    }

    fn record(&mut self, len: usize) {
        self.packages += 1;
        self.bytes += len as u64;
    }

    /// Close the current window; returns a reason if it went over budget.
    fn check(&mut self, now: Instant) -> Option<String> {
        if self.max_packages == 0 && self.max_bytes == 0 {
            return None;
        }
        let secs = now
            .saturating_duration_since(self.window_start)
            .as_secs_f64()
            .max(1.0);
        let packages = self.packages as f64 / secs;
        let bytes = self.bytes as f64 / secs;
        self.reset(now);

        if self.max_packages > 0 && packages > f64::from(self.max_packages) {
            return Some(format!(
                "flow control: {packages:.0} packages/s over limit {}",
                self.max_packages
            ));
        }
        if self.max_bytes > 0 && bytes > f64::from(self.max_bytes) {
            return Some(format!(
                "flow control: {bytes:.0} bytes/s over limit {}",
                self.max_bytes
            ));
        }
        None
    }
}

pub struct Stream {
    token: Token,
    proto: ProtoType,
    status: LinkStatus,
    socket: Option<Socket>,
    write_armed: bool,
    remote_ip: String,
    local: Option<SocketAddr>,

    candidates: vec::IntoIter<SocketAddr>,
    last_error: Option<String>,
    connect_deadline: Option<Instant>,

    recv_buf: IoBuffer,
    send_buf: IoBuffer,
    decoder: FrameDecoder,
    send_seq: u8,

    idle_timeout: Option<Duration>,
    last_active: Instant,
    flow: FlowControl,
    budget: Duration,
    nodelay: bool,
}

impl Stream {
    fn build(token: Token, proto: ProtoType, status: LinkStatus, options: &ReactorOptions, now: Instant) -> Self {
        Self {
            token,
            proto,
            status,
            socket: None,
            write_armed: false,
            remote_ip: String::new(),
            local: None,
            candidates: Vec::new().into_iter(),
            last_error: None,
            connect_deadline: None,
            recv_buf: IoBuffer::new(options.recv_buffer_min, options.max_buffer_size),
            send_buf: IoBuffer::new(options.send_buffer_min, options.max_buffer_size),
            decoder: FrameDecoder::new(proto, options.max_package_size),
            send_seq: 0,
            idle_timeout: None,
            last_active: now,
            flow: FlowControl::new(now),
            budget: proto.dispatch_budget(options),
            nodelay: options.nodelay,
        }
    }

    /// Wrap a socket handed over by a listener. The caller registers it.
    pub fn accepted(
        token: Token,
        socket: Socket,
        addr: &SockAddr,
        proto: ProtoType,
        options: &ReactorOptions,
        now: Instant,
    ) -> Self {
        let mut stream = Self::build(token, proto, LinkStatus::Connected, options, now);
        stream.decoder = FrameDecoder::new(proto, options.max_package_size)
            .with_handshake(options.handshake_key.clone());
        stream.remote_ip = addr
            .as_socket()
            .map(|a| a.ip().to_string())
            .unwrap_or_default();
        stream.local = socket.local_addr().ok().and_then(|a| a.as_socket());
        stream.socket = Some(socket);
        stream
    }

    /// A stream that will dial out once [`start`](Stream::start) runs.
    pub fn dial(
        token: Token,
        proto: ProtoType,
        deadline: Instant,
        options: &ReactorOptions,
        now: Instant,
    ) -> Self {
        let mut stream = Self::build(token, proto, LinkStatus::Init, options, now);
        stream.connect_deadline = Some(deadline);
        if proto == ProtoType::Rpc
            && !options.handshake_key.is_empty()
            && !stream.send_buf.push_data(&options.handshake_key)
        {
            warn!("[CONNECT] token {} handshake key exceeds buffer limit", token);
        }
        stream
    }

    /// Descriptor to register with the poller, if a socket is open.
    pub fn fd(&self) -> Option<std::os::fd::RawFd> {
        self.socket.as_ref().map(AsRawFd::as_raw_fd)
    }

    /// Resolve `host` and attempt the first candidate address.
    ///
    /// Failures are reported as a `Connected` event with an error.
    pub fn start(&mut self, ctx: &mut IoContext<'_>, host: &str, port: u16) {
        match (host, port).to_socket_addrs() {
            Ok(addrs) => self.candidates = addrs.collect::<Vec<_>>().into_iter(),
            Err(e) => return self.fail(ctx, format!("resolve {host}: {e}")),
        }
        if self.candidates.len() == 0 {
            return self.fail(ctx, format!("resolve {host}: no address"));
        }
        debug!(
            "[CONNECT] token {} {}:{} ({} candidates)",
            self.token,
            host,
            port,
            self.candidates.len()
        );
        self.connect_next(ctx);
    }

    fn connect_next(&mut self, ctx: &mut IoContext<'_>) {
        while let Some(addr) = self.candidates.next() {
            match self.open(ctx, addr) {
                Ok(()) => return,
                Err(e) => {
                    debug!("[CONNECT] token {} {} failed: {}", self.token, addr, e);
                    self.last_error = Some(format!("{addr}: {e}"));
                }
            }
        }
        let reason = match self.last_error.take() {
            Some(e) => format!("connect failed: {e}"),
            None => "connect failed".to_owned(),
        };
        self.fail(ctx, reason);
    }

    fn open(&mut self, ctx: &mut IoContext<'_>, addr: SocketAddr) -> io::Result<()> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        configure_stream_socket(&socket, self.nodelay)?;
        match socket.connect(&addr.into()) {
            Ok(()) => {}
            Err(e) if is_in_progress(&e) => {}
            Err(e) => return Err(e),
        }
        ctx.poller.register(socket.as_raw_fd(), self.token, true)?;
        trace!("[CONNECT] token {} attempting {}", self.token, addr);
        self.socket = Some(socket);
        self.write_armed = true;
        self.remote_ip = addr.ip().to_string();
        Ok(())
    }

    fn finish_connect(&mut self, ctx: &mut IoContext<'_>) {
        let (outcome, local) = match self.socket.as_ref() {
            None => return,
            Some(socket) => {
                let outcome = match socket.take_error() {
                    Ok(None) => socket.peer_addr().map(|_| ()),
                    Ok(Some(e)) | Err(e) => Err(e),
                };
                (outcome, socket.local_addr().ok().and_then(|a| a.as_socket()))
            }
        };

        match outcome {
            Ok(()) => {
                self.status = LinkStatus::Connected;
                self.local = local;
                self.connect_deadline = None;
                self.candidates = Vec::new().into_iter();
                self.last_active = ctx.now;
                debug!("[CONNECT] token {} connected to {}", self.token, self.remote_ip);
                ctx.emit(Event::Connected {
                    token: self.token,
                    result: Ok(()),
                });
                self.flush_or_fail(ctx);
            }
            // Spurious wakeup, still in progress.
            Err(e) if e.kind() == io::ErrorKind::NotConnected => {}
            Err(e) => {
                debug!("[CONNECT] token {} {} failed: {}", self.token, self.remote_ip, e);
                self.last_error = Some(format!("{}: {e}", self.remote_ip));
                self.release(ctx);
                self.connect_next(ctx);
            }
        }
    }

    fn set_write_interest(&mut self, ctx: &mut IoContext<'_>, on: bool) -> io::Result<()> {
        if self.write_armed == on {
            return Ok(());
        }
        if let Some(socket) = self.socket.as_ref() {
            ctx.poller.set_writable(socket.as_raw_fd(), self.token, on)?;
        }
        self.write_armed = on;
        Ok(())
    }

    fn flush(&mut self, ctx: &mut IoContext<'_>) -> io::Result<()> {
        if let Some(socket) = self.socket.as_ref() {
            while !self.send_buf.is_empty() {
                match socket.send(self.send_buf.peek_data()) {
                    Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                    Ok(n) => self.send_buf.pop_data(n),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            }
        }
        self.set_write_interest(ctx, !self.send_buf.is_empty())
    }

    fn flush_or_fail(&mut self, ctx: &mut IoContext<'_>) {
        if let Err(e) = self.flush(ctx) {
            if self.status == LinkStatus::Closing {
                debug!("[CLOSE] token {} flush failed: {}", self.token, e);
                self.shutdown(ctx);
            } else {
                self.fail(ctx, e.to_string());
            }
            return;
        }
        if self.status == LinkStatus::Closing && self.send_buf.is_empty() {
            debug!("[CLOSE] token {} drained", self.token);
            self.shutdown(ctx);
        }
    }

    /// Read and drop input while queued output drains. A level-triggered
    /// poller keeps reporting unread bytes, so they cannot be left in the
    /// socket.
    fn discard_input(&mut self, ctx: &mut IoContext<'_>) {
        loop {
            let outcome = self.fill_recv();
            let dropped = self.recv_buf.data_len();
            self.recv_buf.pop_data(dropped);
            match outcome {
                ReadOutcome::Full => continue,
                ReadOutcome::Drained => {
                    if dropped > 0 {
                        trace!("[CLOSE] token {} dropped {} bytes", self.token, dropped);
                    }
                    return;
                }
                ReadOutcome::Eof => {
                    debug!("[CLOSE] token {} peer gone while closing", self.token);
                    self.shutdown(ctx);
                    return;
                }
                ReadOutcome::Failed(e) => {
                    debug!("[CLOSE] token {} read failed while closing: {}", self.token, e);
                    self.shutdown(ctx);
                    return;
                }
            }
        }
    }

    fn fill_recv(&mut self) -> ReadOutcome {
        let Some(socket) = self.socket.as_ref() else {
            return ReadOutcome::Eof;
        };
        let mut reader = socket;
        loop {
            let space = self.recv_buf.peek_space();
            if space.is_empty() {
                return ReadOutcome::Full;
            }
            match reader.read(space) {
                Ok(0) => return ReadOutcome::Eof,
                Ok(n) => self.recv_buf.pop_space(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return ReadOutcome::Drained,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return ReadOutcome::Failed(e),
            }
        }
    }

    /// Frame and deliver buffered input. Returns `false` if the budget ran
    /// out (the token is then deferred to the next tick).
    fn run_dispatch(&mut self, ctx: &mut IoContext<'_>, budgeted: bool) -> bool {
        let started = Instant::now();
        while self.status == LinkStatus::Connected {
            let decoded = match self.decoder.decode(self.recv_buf.peek_data()) {
                Ok(decoded) => decoded,
                Err(e) => {
                    self.fail(ctx, e.to_string());
                    return true;
                }
            };
            match decoded {
                Decoded::Incomplete => return true,
                Decoded::Skip(n) => {
                    self.recv_buf.pop_data(n);
                    if !self.decoder.handshake_pending() {
                        debug!("[HANDSHAKE] token {} verified", self.token);
                    }
                }
                Decoded::Frame { consumed, frame } => {
                    self.recv_buf.pop_data(consumed);
                    self.deliver(ctx, frame);
                }
            }
            if budgeted && started.elapsed() >= self.budget {
                trace!("[DISPATCH] token {} over budget, deferring", self.token);
                ctx.defer(self.token);
                return false;
            }
        }
        true
    }

    fn deliver(&mut self, ctx: &mut IoContext<'_>, frame: Frame) {
        let token = self.token;
        match frame {
            Frame::Call { header, payload } => ctx.emit(Event::Call {
                token,
                header,
                payload,
            }),
            Frame::Forward { header, body } => ctx.forwards.push(ForwardRequest {
                source: token,
                header,
                body,
            }),
            Frame::Pack { header, body } => {
                self.flow.record(header.len as usize);
                ctx.emit(Event::Package {
                    token,
                    package: Package::Pack { header, body },
                });
            }
            Frame::Common(body) => ctx.emit(Event::Package {
                token,
                package: Package::Common(body),
            }),
            Frame::Text(body) => ctx.emit(Event::Package {
                token,
                package: Package::Text(body),
            }),
        }
    }

    /// Report `reason` to the owner and close without flushing.
    fn fail(&mut self, ctx: &mut IoContext<'_>, reason: impl Into<String>) {
        let reason = reason.into();
        match self.status {
            LinkStatus::Closed => return,
            LinkStatus::Init => {
                debug!("[CONNECT] token {} failed: {}", self.token, reason);
                ctx.emit(Event::Connected {
                    token: self.token,
                    result: Err(reason),
                });
            }
            LinkStatus::Connected | LinkStatus::Closing => {
                debug!("[STREAM] token {} error: {}", self.token, reason);
                ctx.emit(Event::Error {
                    token: self.token,
                    reason,
                });
            }
        }
        self.shutdown(ctx);
    }

    fn shutdown(&mut self, ctx: &mut IoContext<'_>) {
        self.release(ctx);
        self.status = LinkStatus::Closed;
        self.send_buf.clear();
        self.recv_buf.clear();
    }

    fn release(&mut self, ctx: &mut IoContext<'_>) {
        if let Some(socket) = self.socket.take() {
            if let Err(e) = ctx.poller.deregister(socket.as_raw_fd()) {
                trace!("[STREAM] deregister token {}: {}", self.token, e);
            }
        }
        self.write_armed = false;
    }
}

impl SocketObject for Stream {
    fn token(&self) -> Token {
        self.token
    }

    fn status(&self) -> LinkStatus {
        self.status
    }

    fn proto(&self) -> ProtoType {
        self.proto
    }

    fn update(&mut self, ctx: &mut IoContext<'_>) -> bool {
        match self.status {
            LinkStatus::Init => {
                if self.connect_deadline.is_some_and(|deadline| ctx.now >= deadline) {
                    self.fail(ctx, "timeout");
                }
            }
            LinkStatus::Connected => {
                let idle = ctx.now.saturating_duration_since(self.last_active);
                if self.idle_timeout.is_some_and(|limit| idle > limit) {
                    self.fail(ctx, "idle timeout");
                } else if self.proto == ProtoType::Pack {
                    if let Some(reason) = self.flow.check(ctx.now) {
                        self.fail(ctx, reason);
                    }
                }
            }
            LinkStatus::Closing => self.flush_or_fail(ctx),
            LinkStatus::Closed => {}
        }
        !(self.status == LinkStatus::Closed && self.pending_ops() == 0)
    }

    fn on_readable(&mut self, ctx: &mut IoContext<'_>) {
        match self.status {
            LinkStatus::Connected => {}
            LinkStatus::Closing => return self.discard_input(ctx),
            LinkStatus::Init | LinkStatus::Closed => return,
        }
        loop {
            let before = self.recv_buf.data_len();
            let outcome = self.fill_recv();
            if self.recv_buf.data_len() > before {
                self.last_active = ctx.now;
            }

            match outcome {
                ReadOutcome::Drained => {
                    self.run_dispatch(ctx, true);
                    return;
                }
                ReadOutcome::Eof => {
                    self.run_dispatch(ctx, false);
                    self.fail(ctx, "connection-lost");
                    return;
                }
                ReadOutcome::Failed(e) => {
                    self.run_dispatch(ctx, false);
                    self.fail(ctx, e.to_string());
                    return;
                }
                ReadOutcome::Full => {
                    let held = self.recv_buf.data_len();
                    let done = self.run_dispatch(ctx, true);
                    if !done || self.status != LinkStatus::Connected {
                        return;
                    }
                    if self.recv_buf.data_len() == held {
                        let overflow = NetError::BufferOverflow {
                            size: held,
                            max: self.recv_buf.max_size(),
                        };
                        self.fail(ctx, overflow.to_string());
                        return;
                    }
                }
            }
        }
    }

    fn on_writable(&mut self, ctx: &mut IoContext<'_>) {
        match self.status {
            LinkStatus::Init => self.finish_connect(ctx),
            LinkStatus::Connected | LinkStatus::Closing => self.flush_or_fail(ctx),
            LinkStatus::Closed => {}
        }
    }

    fn close(&mut self, ctx: &mut IoContext<'_>, immediate: bool) {
        match self.status {
            LinkStatus::Closed => {}
            LinkStatus::Connected if !immediate && !self.send_buf.is_empty() => {
                debug!(
                    "[CLOSE] token {} closing, {} bytes queued",
                    self.token,
                    self.send_buf.data_len()
                );
                self.status = LinkStatus::Closing;
            }
            _ => {
                debug!("[CLOSE] token {} closed", self.token);
                self.shutdown(ctx);
            }
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }

    fn send_frags(&mut self, ctx: &mut IoContext<'_>, frags: &[&[u8]]) -> bool {
        if !self.status.is_open() {
            return false;
        }

        let total: usize = frags.iter().map(|f| f.len()).sum();
        let mut prefix = [0u8; MAX_VARINT_LEN];
        let prefix_len = if self.proto == ProtoType::Rpc {
            encode_u64(&mut prefix, total as u64)
        } else {
            0
        };
        let parts: SmallVec<[&[u8]; 8]> = std::iter::once(&prefix[..prefix_len])
            .chain(frags.iter().copied())
            .filter(|p| !p.is_empty())
            .collect();

        let mut written = 0;
        if self.status == LinkStatus::Connected && self.send_buf.is_empty() {
            if let Some(socket) = self.socket.as_ref() {
                let slices: SmallVec<[IoSlice<'_>; 8]> = parts.iter().map(|p| IoSlice::new(p)).collect();
                match socket.send_vectored(&slices) {
                    Ok(n) => written = n,
                    Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {}
                    Err(e) => {
                        self.fail(ctx, e.to_string());
                        return false;
                    }
                }
            }
        }

        let mut skip = written;
        for part in parts {
            if skip >= part.len() {
                skip -= part.len();
                continue;
            }
            if !self.send_buf.push_data(&part[skip..]) {
                let overflow = NetError::BufferOverflow {
                    size: self.send_buf.data_len() + part.len() - skip,
                    max: self.send_buf.max_size(),
                };
                self.fail(ctx, overflow.to_string());
                return false;
            }
            skip = 0;
        }

        if self.status == LinkStatus::Connected && !self.send_buf.is_empty() {
            if let Err(e) = self.set_write_interest(ctx, true) {
                self.fail(ctx, e.to_string());
                return false;
            }
        }
        true
    }

    fn send_pack(&mut self, ctx: &mut IoContext<'_>, mut header: PackHeader, body: &[u8]) -> bool {
        if self.proto != ProtoType::Pack {
            return false;
        }
        let Ok(len) = u32::try_from(PACK_HEADER_LEN + body.len()) else {
            return false;
        };
        header.len = len;
        header.seq_id = self.send_seq;
        if !self.send_frags(ctx, &[&header.encode(), body]) {
            return false;
        }
        self.send_seq = self.send_seq.wrapping_add(1);
        true
    }

    fn set_timeout(&mut self, timeout: Duration) -> bool {
        if self.status == LinkStatus::Closed {
            return false;
        }
        self.idle_timeout = (!timeout.is_zero()).then_some(timeout);
        true
    }

    fn set_nodelay(&mut self, nodelay: bool) -> bool {
        if self.status == LinkStatus::Closed {
            return false;
        }
        self.nodelay = nodelay;
        match self.socket.as_ref() {
            Some(socket) => socket.set_nodelay(nodelay).is_ok(),
            None => true,
        }
    }

    fn set_flow_ctrl(&mut self, packages: u32, bytes: u32) -> bool {
        if self.status == LinkStatus::Closed {
            return false;
        }
        self.flow.configure(packages, bytes, Instant::now());
        true
    }

    fn remote_ip(&self) -> Option<&str> {
        (!self.remote_ip.is_empty()).then_some(self.remote_ip.as_str())
    }

    fn dispatch(&mut self, ctx: &mut IoContext<'_>) -> bool {
        if self.status != LinkStatus::Connected {
            return true;
        }
        self.run_dispatch(ctx, true)
    }
}
