//! Hivenet Core
//!
//! This crate contains the runtime-agnostic building blocks of the reactor:
//! - LEB128 varint codec used by every wire header field (`varint`)
//! - Growable byte buffer with read/write cursors (`buffer`)
//! - Framing protocol types and the pack-mode header (`proto`)
//! - Reactor configuration (`options`)
//! - Service routing table and RPC router header (`router`)
//! - Error types (`error`)
//!
//! Nothing in here touches a socket. The OS-facing half lives in `hivenet-io`.

#![deny(unsafe_code)]
// Allow some pedantic lints that are intentional in this crate
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::match_same_arms)]
pub mod buffer;
pub mod error;
pub mod options;
pub mod proto;
pub mod router;
pub mod varint;

/// Opaque handle identifying one listener or stream inside a reactor.
///
/// Zero is never allocated and means "no connection" in routing tables.
pub type Token = u32;

// Optional: a small prelude to make downstream crates ergonomic.
// Keep it minimal to avoid API lock-in.
pub mod prelude {
    pub use crate::buffer::IoBuffer;
    pub use crate::error::{NetError, Result};
    pub use crate::options::ReactorOptions;
    pub use crate::proto::{PackHeader, ProtoType};
    pub use crate::router::{ForwardSink, MsgKind, Route, RouteError, Router, RouterHeader};
    pub use crate::Token;
}
