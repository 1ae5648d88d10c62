//! Service-id routing: one gateway stream fans calls out by hash key.
//!
//! Three dialers connect to one listener. The accepted ends of dialers 1
//! and 2 are registered as hash slots 0 and 1 of service group 7; dialer 0
//! then sends `ForwardHash` calls and the gateway re-sends each one to the
//! slot picked by `key % 2`.
//!
//! ```bash
//! cargo run --example forward_hash
//! ```

use std::time::Duration;

use hivenet::prelude::*;
use tracing::info;

const GROUP: u8 = 7;

fn main() -> hivenet::Result<()> {
    hivenet::dev_tracing::init_tracing();

    let mut reactor = Reactor::new(ReactorOptions::default())?;
    let listener = reactor.listen("127.0.0.1", 0, ProtoType::Rpc)?;
    let port = reactor.local_addr(listener).map_or(0, |a| a.port());

    let mut dialers = Vec::new();
    let mut accepted = Vec::new();
    for _ in 0..3 {
        dialers.push(reactor.connect("127.0.0.1", port, ProtoType::Rpc, Duration::ZERO)?);
    }
    while accepted.len() < dialers.len() {
        reactor.wait(Duration::from_millis(50))?;
        for event in reactor.drain_events() {
            if let Event::Accepted { token, .. } = event {
                accepted.push(token);
            }
        }
    }
    // Accept order follows dial order on loopback; good enough for a demo.
    for (slot, &token) in accepted[1..].iter().enumerate() {
        reactor
            .router_mut()
            .map_token(build_service_id(GROUP, slot as u32), token, 2);
    }

    for key in 0..6u64 {
        let body = format!("job {key}");
        reactor.call(dialers[0], Route::Hash(GROUP, key), RouterHeader::new(key, 0, 0), body.as_bytes());
    }

    let mut delivered = 0;
    while delivered < 6 {
        reactor.wait(Duration::from_millis(100))?;
        for event in reactor.drain_events() {
            match event {
                Event::Call { token, header, payload } => {
                    delivered += 1;
                    info!(
                        "[ROUTE] key {} -> dialer {}: {}",
                        header.session_id,
                        token,
                        String::from_utf8_lossy(&payload)
                    );
                }
                Event::ForwardError { reason, .. } => {
                    info!("[ROUTE] forward failed: {}", reason);
                    delivered += 1;
                }
                _ => {}
            }
        }
    }
    Ok(())
}
