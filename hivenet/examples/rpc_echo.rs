//! RPC echo over loopback on a single reactor.
//!
//! Run this example:
//! ```bash
//! RUST_LOG=debug cargo run --example rpc_echo
//! ```

use std::time::Duration;

use hivenet::prelude::*;
use tracing::info;

const ROUNDS: u64 = 5;

fn main() -> hivenet::Result<()> {
    hivenet::dev_tracing::init_tracing();

    let mut reactor = Reactor::new(ReactorOptions::default())?;
    let listener = reactor.listen("127.0.0.1", 0, ProtoType::Rpc)?;
    let port = reactor.local_addr(listener).map_or(0, |a| a.port());
    info!("[ECHO] listening on 127.0.0.1:{}", port);

    let client = reactor.connect("127.0.0.1", port, ProtoType::Rpc, Duration::ZERO)?;
    reactor.call(client, Route::Direct, RouterHeader::new(0, 0, 1), b"echo 0");

    let mut replies = 0;
    while replies < ROUNDS {
        reactor.wait(Duration::from_millis(100))?;
        while let Some(event) = reactor.poll_event() {
            match event {
                Event::Accepted { token, ip, .. } => info!("[ECHO] accepted {} from {}", token, ip),
                Event::Connected { token, result } => info!("[ECHO] dialer {} connected: {:?}", token, result),
                Event::Call { token, header, payload } if token == client => {
                    info!(
                        "[ECHO] reply {} ({} bytes): {}",
                        header.session_id,
                        payload.len(),
                        String::from_utf8_lossy(&payload)
                    );
                    replies += 1;
                    let next = header.session_id + 1;
                    let body = format!("echo {next}");
                    reactor.call(client, Route::Direct, RouterHeader::new(next, 0, 1), body.as_bytes());
                }
                Event::Call { token, header, payload } => {
                    // Server side: send the payload straight back.
                    reactor.call(token, Route::Direct, header, &payload);
                }
                Event::Error { token, reason } => {
                    info!("[ECHO] token {} failed: {}", token, reason);
                    return Ok(());
                }
                other => info!("[ECHO] {:?}", other),
            }
        }
    }

    reactor.close(client);
    info!("[ECHO] done after {} round trips", replies);
    Ok(())
}
