//! RPC streams over loopback: handshake, direct calls and forwarding.

mod common;

use std::time::Duration;

use common::{connect_pair, listen, pump, pump_all, settle};
use hivenet::prelude::*;
use hivenet::MsgKind;

#[test]
fn test_handshake_then_call() {
    hivenet::dev_tracing::init_tracing();
    let mut reactor = Reactor::new(ReactorOptions::default()).unwrap();
    let (_, port) = listen(&mut reactor, ProtoType::Rpc);
    let (client, server) = connect_pair(&mut reactor, port, ProtoType::Rpc);

    assert!(reactor.call(client, Route::Direct, RouterHeader::new(7, 1, 42), b"ping"));
    let events = pump(&mut reactor, |e| matches!(e, Event::Call { .. }));

    let Some(Event::Call { token, header, payload }) = events.into_iter().find(|e| matches!(e, Event::Call { .. }))
    else {
        unreachable!()
    };
    assert_eq!(token, server);
    assert_eq!(header.kind, MsgKind::RemoteCall);
    assert_eq!(header.session_id, 7);
    assert_eq!(header.rpc_flag, 1);
    assert_eq!(header.source_id, 42);
    assert_eq!(&payload[..], b"ping");
    assert_eq!(reactor.remote_ip(server).as_deref(), Some("127.0.0.1"));
}

#[test]
fn test_call_reply_both_directions() {
    let mut reactor = Reactor::new(ReactorOptions::default()).unwrap();
    let (_, port) = listen(&mut reactor, ProtoType::Rpc);
    let (client, server) = connect_pair(&mut reactor, port, ProtoType::Rpc);

    for i in 0..3u64 {
        assert!(reactor.call(client, Route::Direct, RouterHeader::new(i, 0, 1), b"req"));
        pump(&mut reactor, |e| matches!(e, Event::Call { token, .. } if *token == server));
        assert!(reactor.call(server, Route::Direct, RouterHeader::new(i, 0, 2), b"rep"));
        let events = pump(&mut reactor, |e| matches!(e, Event::Call { token, .. } if *token == client));
        assert!(events.iter().any(|e| matches!(
            e,
            Event::Call { header, payload, .. } if header.session_id == i && &payload[..] == b"rep"
        )));
    }
}

#[test]
fn test_handshake_mismatch_closes_acceptor() {
    let mut server_side = Reactor::new(ReactorOptions::default().with_handshake_key(&b"cluster-a"[..])).unwrap();
    let mut client_side = Reactor::new(ReactorOptions::default()).unwrap();
    client_side.set_handshake_verify(&b"cluster-b"[..]);

    let (_, port) = listen(&mut server_side, ProtoType::Rpc);
    let client = client_side
        .connect("127.0.0.1", port, ProtoType::Rpc, Duration::ZERO)
        .unwrap();
    client_side.call(client, Route::Direct, RouterHeader::new(1, 0, 0), b"never");

    let events = pump_all(&mut [&mut server_side, &mut client_side], |idx, e| {
        idx == 0 && matches!(e, Event::Error { .. })
    });
    let reason = events
        .iter()
        .find_map(|(idx, e)| match e {
            Event::Error { reason, .. } if *idx == 0 => Some(reason.clone()),
            _ => None,
        })
        .unwrap();
    assert!(reason.starts_with("handshake mismatch"), "{reason}");
    assert!(!events.iter().any(|(idx, e)| *idx == 0 && matches!(e, Event::Call { .. })));
}

#[test]
fn test_call_requires_rpc_stream() {
    let mut reactor = Reactor::new(ReactorOptions::default()).unwrap();
    let (_, port) = listen(&mut reactor, ProtoType::Common);
    let (client, _) = connect_pair(&mut reactor, port, ProtoType::Common);
    assert!(!reactor.call(client, Route::Direct, RouterHeader::new(1, 0, 0), b"x"));
}

/// Three dialers share one listener; dialer 1 reaches the others through
/// the router.
struct Cluster {
    reactor: Reactor,
    clients: [Token; 3],
    servers: [Token; 3],
}

impl Cluster {
    fn new() -> Self {
        let mut reactor = Reactor::new(ReactorOptions::default()).unwrap();
        let (_, port) = listen(&mut reactor, ProtoType::Rpc);
        let mut clients = [0; 3];
        let mut servers = [0; 3];
        for i in 0..3 {
            (clients[i], servers[i]) = connect_pair(&mut reactor, port, ProtoType::Rpc);
        }
        Self {
            reactor,
            clients,
            servers,
        }
    }

    /// Wait for a call on any dialer other than the sender.
    fn recv_forwarded(&mut self) -> (Token, RouterHeader, Bytes) {
        let clients = self.clients;
        let events = pump(&mut self.reactor, |e| {
            matches!(e, Event::Call { token, .. } if clients[1..].contains(token))
        });
        events
            .into_iter()
            .find_map(|e| match e {
                Event::Call { token, header, payload } if clients[1..].contains(&token) => {
                    Some((token, header, payload))
                }
                _ => None,
            })
            .unwrap()
    }

    fn recv_forward_error(&mut self) -> String {
        let events = pump(&mut self.reactor, |e| matches!(e, Event::ForwardError { .. }));
        events
            .into_iter()
            .find_map(|e| match e {
                Event::ForwardError { token, reason, .. } => {
                    assert_eq!(token, self.servers[0]);
                    Some(reason)
                }
                _ => None,
            })
            .unwrap()
    }
}

#[test]
fn test_forward_target() {
    let mut cluster = Cluster::new();
    let target = build_service_id(3, 2);
    cluster.reactor.router_mut().map_token(target, cluster.servers[2], 0);

    let header = RouterHeader::new(9, 0, 11);
    assert!(cluster
        .reactor
        .call(cluster.clients[0], Route::Target(target), header, b"hello"));

    let (token, header, payload) = cluster.recv_forwarded();
    assert_eq!(token, cluster.clients[2]);
    assert_eq!(header.kind, MsgKind::RemoteCall);
    assert_eq!(header.session_id, 9);
    assert_eq!(header.source_id, 11);
    assert_eq!(&payload[..], b"hello");
}

#[test]
fn test_forward_hash_is_sticky_per_key() {
    let mut cluster = Cluster::new();
    let router = cluster.reactor.router_mut();
    router.map_token(build_service_id(3, 1), cluster.servers[1], 4);
    router.map_token(build_service_id(3, 2), cluster.servers[2], 4);

    for key in [10, 14] {
        assert!(cluster
            .reactor
            .call(cluster.clients[0], Route::Hash(3, key), RouterHeader::new(key, 0, 1), b"h"));
        let (token, header, _) = cluster.recv_forwarded();
        assert_eq!(token, cluster.clients[2]);
        assert_eq!(header.session_id, key);
    }

    // Slot 0 was never mapped.
    assert!(cluster
        .reactor
        .call(cluster.clients[0], Route::Hash(3, 12), RouterHeader::new(12, 0, 1), b"h"));
    let reason = cluster.recv_forward_error();
    assert!(reason.contains("slot"), "{reason}");
    assert_eq!(cluster.reactor.link_status(cluster.servers[0]), Some(LinkStatus::Connected));
}

#[test]
fn test_forward_broadcast_skips_sender() {
    let mut cluster = Cluster::new();
    let router = cluster.reactor.router_mut();
    for (idx, &server) in cluster.servers.iter().enumerate() {
        router.map_token(build_service_id(5, idx as u32), server, 0);
    }

    assert!(cluster
        .reactor
        .call(cluster.clients[0], Route::Broadcast(5), RouterHeader::new(1, 0, 0), b"all"));

    let clients = cluster.clients;
    let mut got = Vec::new();
    pump(&mut cluster.reactor, |e| {
        if let Event::Call { token, .. } = e {
            got.push(*token);
        }
        got.len() == 2
    });
    got.sort_unstable();
    let mut expected = vec![clients[1], clients[2]];
    expected.sort_unstable();
    assert_eq!(got, expected);

    let late = settle(&mut cluster.reactor, Duration::from_millis(50));
    assert!(!late
        .iter()
        .any(|e| matches!(e, Event::Call { token, .. } if *token == clients[0])));
}

#[test]
fn test_forward_master_and_unknown_target() {
    let mut cluster = Cluster::new();
    let router = cluster.reactor.router_mut();
    router.map_token(build_service_id(2, 0), cluster.servers[1], 0);
    router.set_master(2, cluster.servers[1]);

    assert!(cluster
        .reactor
        .call(cluster.clients[0], Route::Master(2), RouterHeader::new(4, 0, 0), b"m"));
    let (token, _, payload) = cluster.recv_forwarded();
    assert_eq!(token, cluster.clients[1]);
    assert_eq!(&payload[..], b"m");

    assert!(cluster.reactor.call(
        cluster.clients[0],
        Route::Target(build_service_id(9, 9)),
        RouterHeader::new(5, 0, 0),
        b"lost"
    ));
    let reason = cluster.recv_forward_error();
    assert!(!reason.is_empty());
}
