//! Shared loopback helpers: pump one or more reactors until an event shows up.

#![allow(dead_code)]

use std::time::{Duration, Instant};

use hivenet::prelude::*;

const PUMP_LIMIT: Duration = Duration::from_secs(5);
const TICK: Duration = Duration::from_millis(10);

/// Drive every reactor in turn until `pred` accepts an event.
///
/// Returns everything seen, tagged with the index of the reactor that
/// produced it. Panics after five seconds.
pub fn pump_all(
    reactors: &mut [&mut Reactor],
    mut pred: impl FnMut(usize, &Event) -> bool,
) -> Vec<(usize, Event)> {
    let deadline = Instant::now() + PUMP_LIMIT;
    let mut seen = Vec::new();
    while Instant::now() < deadline {
        let mut hit = false;
        for (idx, reactor) in reactors.iter_mut().enumerate() {
            reactor.wait(TICK).expect("reactor wait");
            for event in reactor.drain_events() {
                hit |= pred(idx, &event);
                seen.push((idx, event));
            }
        }
        if hit {
            return seen;
        }
    }
    panic!("timed out waiting for event; saw {seen:?}");
}

/// Single-reactor [`pump_all`].
pub fn pump(reactor: &mut Reactor, mut pred: impl FnMut(&Event) -> bool) -> Vec<Event> {
    pump_all(&mut [reactor], |_, e| pred(e))
        .into_iter()
        .map(|(_, e)| e)
        .collect()
}

/// Keep ticking for `span` and return whatever arrived.
pub fn settle(reactor: &mut Reactor, span: Duration) -> Vec<Event> {
    let deadline = Instant::now() + span;
    let mut seen = Vec::new();
    while Instant::now() < deadline {
        reactor.wait(TICK).expect("reactor wait");
        seen.extend(reactor.drain_events());
    }
    seen
}

/// Listen on an ephemeral loopback port and return `(listener, port)`.
pub fn listen(reactor: &mut Reactor, proto: ProtoType) -> (Token, u16) {
    let listener = reactor.listen("127.0.0.1", 0, proto).expect("listen");
    let port = reactor.local_addr(listener).expect("bound address").port();
    (listener, port)
}

/// Dial `port` from the same reactor and wait for both ends.
///
/// Returns `(client, server)` tokens.
pub fn connect_pair(reactor: &mut Reactor, port: u16, proto: ProtoType) -> (Token, Token) {
    let client = reactor
        .connect("127.0.0.1", port, proto, Duration::ZERO)
        .expect("connect");
    let mut connected = false;
    let mut server = None;
    pump(reactor, |event| {
        match event {
            Event::Connected { token, result } if *token == client => {
                assert!(result.is_ok(), "connect failed: {result:?}");
                connected = true;
            }
            Event::Accepted { token, .. } => server = Some(*token),
            _ => {}
        }
        connected && server.is_some()
    });
    (client, server.expect("accepted"))
}
