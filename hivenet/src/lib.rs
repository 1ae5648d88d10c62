//! # Hivenet
//!
//! A single-threaded, non-blocking TCP reactor that frames messages in four
//! wire protocols and forwards RPC traffic between cluster nodes by logical
//! service id.
//!
//! ## Architecture
//!
//! - **`hivenet-core`**: varint codec, byte buffer, protocol types, service router
//! - **`hivenet-io`**: epoll/kqueue poller, listener and stream state machines, reactor
//! - **`hivenet`**: public API surface (this crate)
//!
//! One thread owns one [`Reactor`]. Nothing inside it is shared, so several
//! reactors (one per worker thread) run fully independently.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hivenet::prelude::*;
//! use std::time::Duration;
//!
//! # fn main() -> hivenet::Result<()> {
//! let mut reactor = Reactor::new(ReactorOptions::default())?;
//! let listener = reactor.listen("127.0.0.1", 0, ProtoType::Rpc)?;
//! let port = reactor.local_addr(listener).map_or(0, |a| a.port());
//!
//! let client = reactor.connect("127.0.0.1", port, ProtoType::Rpc, Duration::ZERO)?;
//! reactor.call(client, Route::Direct, RouterHeader::new(7, 1, 42), b"ping");
//!
//! loop {
//!     reactor.wait(Duration::from_millis(50))?;
//!     while let Some(event) = reactor.poll_event() {
//!         if let Event::Call { header, payload, .. } = event {
//!             assert_eq!(header.session_id, 7);
//!             assert_eq!(&payload[..], b"ping");
//!             return Ok(());
//!         }
//!     }
//! }
//! # }
//! ```
//!
//! ## Protocols
//!
//! - **rpc**: shared-secret handshake, varint length prefix, router header
//! - **pack**: 17-byte header with per-direction sequence check and flow control
//! - **common**: `u32` little-endian length prefix
//! - **text**: unframed bytes
//!
//! ## Routing
//!
//! Service ids are `u32`: the high byte selects a service group, the low 24
//! bits an index inside it. RPC messages whose header asks for forwarding
//! (target, master, random, broadcast, hash) are resolved through the
//! reactor's [`Router`] and re-sent as plain remote calls; unresolved routes
//! come back as [`Event::ForwardError`] without closing anything.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dev_tracing;

// Re-export core types
pub use bytes::Bytes;

pub use hivenet_core::error::{NetError, Result};
pub use hivenet_core::options::ReactorOptions;
pub use hivenet_core::proto::{PackHeader, ProtoType};
pub use hivenet_core::router::{
    build_service_id, service_group, service_index, MsgKind, Route, RouteError, Router, RouterHeader,
};
pub use hivenet_core::{buffer, varint, Token};

pub use hivenet_io::{Event, LinkStatus, Package, Reactor};

/// Wire-level building blocks for callers that frame or parse by hand.
pub mod wire {
    pub use hivenet_core::proto::{COMMON_HEADER_LEN, PACK_HEADER_LEN};
    pub use hivenet_core::router::encode_call;
    pub use hivenet_io::codec::{Decoded, Frame, FrameDecoder, FrameError};
}

/// Everything needed to drive a reactor.
pub mod prelude {
    pub use crate::{
        build_service_id, Bytes, Event, LinkStatus, NetError, PackHeader, Package, ProtoType, Reactor,
        ReactorOptions, Route, RouterHeader, Token,
    };
}
