//! Single-threaded reactor
//!
//! Owns the poller, every listener and stream (keyed by token), the service
//! router and the event queue. One thread drives it by calling
//! [`Reactor::wait`] in a loop and draining events afterwards.
//!
//! One `wait` call:
//! 1. sweeps every object if the sweep interval has elapsed, deleting the
//!    ones that reached `Closed` with no outstanding OS operations
//! 2. resumes dispatch for streams that ran out of budget last tick
//! 3. polls, shortening the timeout by the time already spent (or to zero
//!    while deferred work remains)
//! 4. hands each readiness event to its object, then admits accepted
//!    connections and performs queued forwards
//!
//! Every token-indexed operation is a no-op (`false` / `None`) on an
//! unknown or closed token.

use std::collections::VecDeque;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::{Duration, Instant};

use bytes::Bytes;
use hashbrown::HashMap;
use hivenet_core::error::{NetError, Result};
use hivenet_core::options::ReactorOptions;
use hivenet_core::proto::{PackHeader, ProtoType};
use hivenet_core::router::{encode_call, ForwardSink, Route, Router, RouterHeader};
use hivenet_core::Token;
use tracing::{debug, trace, warn};

use crate::event::Event;
use crate::listener::Listener;
use crate::poller::{PollEvent, Poller, SysPoller};
use crate::socket::{Admission, ForwardRequest, IoContext, LinkStatus, SocketObject};
use crate::stream::Stream;

type ObjectMap = HashMap<Token, Box<dyn SocketObject>>;

/// Routes forwarded messages into the reactor's own streams.
struct StreamSink<'a> {
    objects: &'a mut ObjectMap,
    ctx: IoContext<'a>,
}

impl ForwardSink for StreamSink<'_> {
    fn sendv(&mut self, token: Token, frags: &[&[u8]]) -> bool {
        match self.objects.get_mut(&token) {
            Some(obj) if obj.status().is_open() => obj.send_frags(&mut self.ctx, frags),
            _ => false,
        }
    }
}

pub struct Reactor {
    options: ReactorOptions,
    poller: SysPoller,
    objects: ObjectMap,
    next_token: Token,
    router: Router,
    events: VecDeque<Event>,
    poll_events: Vec<PollEvent>,
    accepted: Vec<Admission>,
    forwards: Vec<ForwardRequest>,
    deferred: Vec<Token>,
    last_sweep: Instant,
}

impl Reactor {
    pub fn new(options: ReactorOptions) -> Result<Self> {
        Ok(Self {
            options,
            poller: SysPoller::new()?,
            objects: HashMap::new(),
            next_token: 0,
            router: Router::new(),
            events: VecDeque::new(),
            poll_events: Vec::new(),
            accepted: Vec::new(),
            forwards: Vec::new(),
            deferred: Vec::new(),
            last_sweep: Instant::now(),
        })
    }

    /// Set the global connection cap.
    pub fn setup(&mut self, max_connections: usize) {
        self.options.max_connections = max_connections;
    }

    /// Set the RPC handshake secret for streams created from now on.
    pub fn set_handshake_verify(&mut self, key: impl Into<Bytes>) {
        self.options.handshake_key = key.into();
    }

    pub fn options(&self) -> &ReactorOptions {
        &self.options
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.objects.len() >= self.options.max_connections
    }

    /// Live listeners and streams, including closed ones awaiting the next sweep.
    #[inline]
    pub fn connection_count(&self) -> usize {
        self.objects.len()
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn router_mut(&mut self) -> &mut Router {
        &mut self.router
    }

    /// Bind a listener on `ip:port`. Port 0 picks a free port, see [`local_addr`](Self::local_addr).
    ///
    /// `ip` should be an address literal. A host name goes through the
    /// system resolver, which blocks the reactor thread.
    pub fn listen(&mut self, ip: &str, port: u16, proto: ProtoType) -> Result<Token> {
        if self.is_full() {
            return Err(NetError::Capacity {
                max: self.options.max_connections,
            });
        }
        let addr = resolve_first(ip, port)?;
        let token = self.alloc_token();
        let listener = Listener::bind(token, addr, proto, &self.options)?;
        if let Some(fd) = listener.fd() {
            self.poller.register(fd, token, false)?;
        }
        self.objects.insert(token, Box::new(listener));
        Ok(token)
    }

    /// Start dialing `host:port`. A zero `timeout` uses the configured default.
    ///
    /// Only the capacity check fails synchronously; resolve and connect
    /// failures arrive as a `Connected` event with an error.
    ///
    /// # Blocking
    ///
    /// Host names are resolved with `ToSocketAddrs` on the calling thread,
    /// so a slow DNS server stalls every stream this reactor drives. Pass an
    /// IP literal, or resolve elsewhere first, when that matters.
    pub fn connect(&mut self, host: &str, port: u16, proto: ProtoType, timeout: Duration) -> Result<Token> {
        if self.is_full() {
            return Err(NetError::Capacity {
                max: self.options.max_connections,
            });
        }
        let now = Instant::now();
        let timeout = if timeout.is_zero() {
            self.options.connect_timeout
        } else {
            timeout
        };
        let token = self.alloc_token();
        let mut stream = Stream::dial(token, proto, now + timeout, &self.options, now);
        {
            let (_, _, mut ctx) = self.split(now);
            stream.start(&mut ctx, host, port);
        }
        self.objects.insert(token, Box::new(stream));
        Ok(token)
    }

    /// Queue `data` as one message (RPC streams add the length prefix).
    pub fn send(&mut self, token: Token, data: &[u8]) -> bool {
        self.sendv(token, &[data])
    }

    /// Queue the concatenation of `frags` as one message.
    pub fn sendv(&mut self, token: Token, frags: &[&[u8]]) -> bool {
        self.with_open(token, |obj, ctx| obj.send_frags(ctx, frags))
            .unwrap_or(false)
    }

    /// Send an RPC message along `route`.
    pub fn call(&mut self, token: Token, route: Route, header: RouterHeader, payload: &[u8]) -> bool {
        if self.proto(token) != Some(ProtoType::Rpc) {
            return false;
        }
        let prefix = encode_call(&header, route);
        self.sendv(token, &[&prefix, payload])
    }

    /// Send a pack message; the sequence number and length are filled in.
    pub fn send_pack(&mut self, token: Token, header: PackHeader, body: &[u8]) -> bool {
        self.with_open(token, |obj, ctx| obj.send_pack(ctx, header, body))
            .unwrap_or(false)
    }

    /// Send a common-mode message (`u32` little-endian length prefix).
    pub fn send_common(&mut self, token: Token, body: &[u8]) -> bool {
        if self.proto(token) != Some(ProtoType::Common) {
            return false;
        }
        let Ok(len) = u32::try_from(body.len()) else {
            return false;
        };
        self.sendv(token, &[&len.to_le_bytes(), body])
    }

    /// Close `token`. Queued output is flushed first; no error event is emitted.
    pub fn close(&mut self, token: Token) -> bool {
        self.with_live(token, |obj, ctx| obj.close(ctx, false)).is_some()
    }

    /// Idle timeout; `Duration::ZERO` disables it.
    pub fn set_timeout(&mut self, token: Token, timeout: Duration) -> bool {
        self.live_mut(token).is_some_and(|obj| obj.set_timeout(timeout))
    }

    pub fn set_nodelay(&mut self, token: Token, nodelay: bool) -> bool {
        self.live_mut(token).is_some_and(|obj| obj.set_nodelay(nodelay))
    }

    /// Pack flow-control limits per second; 0 disables a limit.
    pub fn set_flow_ctrl(&mut self, token: Token, packages: u32, bytes: u32) -> bool {
        self.live_mut(token)
            .is_some_and(|obj| obj.set_flow_ctrl(packages, bytes))
    }

    pub fn link_status(&self, token: Token) -> Option<LinkStatus> {
        self.objects.get(&token).map(|obj| obj.status())
    }

    pub fn proto(&self, token: Token) -> Option<ProtoType> {
        self.live(token).map(|obj| obj.proto())
    }

    pub fn remote_ip(&self, token: Token) -> Option<String> {
        self.live(token)
            .and_then(|obj| obj.remote_ip().map(str::to_owned))
    }

    pub fn local_addr(&self, token: Token) -> Option<SocketAddr> {
        self.live(token).and_then(|obj| obj.local_addr())
    }

    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = Event> + '_ {
        self.events.drain(..)
    }

    /// Run one reactor tick, blocking up to `timeout` for readiness.
    ///
    /// Returns the number of readiness events handled.
    pub fn wait(&mut self, timeout: Duration) -> Result<usize> {
        self.wait_at(Instant::now(), timeout)
    }

    /// [`wait`](Self::wait) with an explicit clock for the sweep.
    pub fn wait_at(&mut self, now: Instant, timeout: Duration) -> Result<usize> {
        let entered = Instant::now();
        if now.saturating_duration_since(self.last_sweep) >= self.options.sweep_interval {
            self.sweep(now);
            self.last_sweep = now;
        }

        self.run_deferred(now + entered.elapsed());

        let timeout = if self.deferred.is_empty() {
            timeout.saturating_sub(entered.elapsed())
        } else {
            Duration::ZERO
        };

        let mut ready = std::mem::take(&mut self.poll_events);
        ready.clear();
        let polled = self.poller.poll(&mut ready, Some(timeout));
        let tick = now + entered.elapsed();

        if let Ok(n) = polled {
            if n > 0 {
                trace!("[REACTOR] {} ready", n);
            }
            for event in &ready {
                if event.writable {
                    self.with_object(event.token, tick, |obj, ctx| obj.on_writable(ctx));
                }
                if event.readable {
                    self.with_object(event.token, tick, |obj, ctx| obj.on_readable(ctx));
                }
                self.admit(tick);
                self.run_forwards(tick);
            }
        }
        let handled = ready.len();
        self.poll_events = ready;
        polled.map(|_| handled).map_err(NetError::from)
    }

    fn sweep(&mut self, now: Instant) {
        let tokens: Vec<Token> = self.objects.keys().copied().collect();
        let mut removed = 0;
        for token in tokens {
            let keep = self
                .with_object(token, now, |obj, ctx| obj.update(ctx))
                .unwrap_or(false);
            if !keep {
                self.objects.remove(&token);
                self.deferred.retain(|&t| t != token);
                removed += 1;
            }
        }
        self.run_forwards(now);
        if removed > 0 {
            debug!("[SWEEP] removed {} objects, {} live", removed, self.objects.len());
        }
    }

    fn run_deferred(&mut self, now: Instant) {
        if self.deferred.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.deferred);
        for token in pending {
            self.with_object(token, now, |obj, ctx| obj.dispatch(ctx));
        }
        self.run_forwards(now);
    }

    /// Turn queued accepts into streams, or drop them at capacity.
    fn admit(&mut self, now: Instant) {
        if self.accepted.is_empty() {
            return;
        }
        for admission in std::mem::take(&mut self.accepted) {
            if self.is_full() {
                warn!(
                    "[ACCEPT] at capacity ({}), dropping {:?}",
                    self.options.max_connections,
                    admission.addr.as_socket()
                );
                continue;
            }
            let token = self.alloc_token();
            let stream = Stream::accepted(
                token,
                admission.socket,
                &admission.addr,
                admission.proto,
                &self.options,
                now,
            );
            if let Some(fd) = stream.fd() {
                if let Err(e) = self.poller.register(fd, token, false) {
                    warn!("[ACCEPT] register token {} failed: {}", token, e);
                    continue;
                }
            }
            let ip = stream.remote_ip().unwrap_or_default().to_owned();
            debug!("[ACCEPT] token {} from {} via {}", token, ip, admission.listener);
            self.objects.insert(token, Box::new(stream));
            self.events.push_back(Event::Accepted {
                listener: admission.listener,
                token,
                proto: admission.proto,
                ip,
            });
        }
    }

    fn run_forwards(&mut self, now: Instant) {
        if self.forwards.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.forwards);
        let mut failures = Vec::new();
        {
            let (objects, router, ctx) = self.split(now);
            let mut sink = StreamSink { objects, ctx };
            for request in pending {
                match router.forward(&mut sink, request.source, &request.header, &request.body) {
                    Ok(sent) => trace!("[FORWARD] {:?} from {} -> {} sends", request.header.kind, request.source, sent),
                    Err(e) => failures.push(Event::ForwardError {
                        token: request.source,
                        header: request.header,
                        reason: e.to_string(),
                    }),
                }
            }
        }
        for failure in failures {
            debug!("[FORWARD] {:?}", failure);
            self.events.push_back(failure);
        }
    }

    fn alloc_token(&mut self) -> Token {
        loop {
            self.next_token = self.next_token.wrapping_add(1);
            if self.next_token != 0 && !self.objects.contains_key(&self.next_token) {
                return self.next_token;
            }
        }
    }

    /// Borrow the object map, the router and a handler context at once.
    fn split(&mut self, now: Instant) -> (&mut ObjectMap, &Router, IoContext<'_>) {
        let ctx = IoContext {
            poller: &self.poller,
            events: &mut self.events,
            options: &self.options,
            accepted: &mut self.accepted,
            forwards: &mut self.forwards,
            deferred: &mut self.deferred,
            now,
        };
        (&mut self.objects, &self.router, ctx)
    }

    fn with_object<R>(
        &mut self,
        token: Token,
        now: Instant,
        f: impl FnOnce(&mut dyn SocketObject, &mut IoContext<'_>) -> R,
    ) -> Option<R> {
        let (objects, _, mut ctx) = self.split(now);
        let obj = objects.get_mut(&token)?;
        Some(f(obj.as_mut(), &mut ctx))
    }

    /// Run `f` on a non-closed object, then settle any work it queued.
    fn with_live<R>(
        &mut self,
        token: Token,
        f: impl FnOnce(&mut dyn SocketObject, &mut IoContext<'_>) -> R,
    ) -> Option<R> {
        if self.live(token).is_none() {
            return None;
        }
        let now = Instant::now();
        let out = self.with_object(token, now, f);
        self.run_forwards(now);
        out
    }

    /// Like [`with_live`](Self::with_live) but for sends, which also need
    /// the token to still accept output.
    fn with_open<R>(
        &mut self,
        token: Token,
        f: impl FnOnce(&mut dyn SocketObject, &mut IoContext<'_>) -> R,
    ) -> Option<R> {
        if !self.objects.get(&token).is_some_and(|obj| obj.status().is_open()) {
            return None;
        }
        self.with_live(token, f)
    }

    fn live(&self, token: Token) -> Option<&dyn SocketObject> {
        self.objects
            .get(&token)
            .map(|obj| &**obj)
            .filter(|obj| obj.status() != LinkStatus::Closed)
    }

    fn live_mut(&mut self, token: Token) -> Option<&mut Box<dyn SocketObject>> {
        self.objects
            .get_mut(&token)
            .filter(|obj| obj.status() != LinkStatus::Closed)
    }
}

fn resolve_first(host: &str, port: u16) -> Result<SocketAddr> {
    let host = if host.is_empty() { "0.0.0.0" } else { host };
    let mut addrs = (host, port).to_socket_addrs().map_err(|e| NetError::Resolve {
        host: host.to_owned(),
        reason: e.to_string(),
    })?;
    addrs.next().ok_or_else(|| NetError::Resolve {
        host: host.to_owned(),
        reason: "no address".to_owned(),
    })
}
