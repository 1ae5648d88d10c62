//! # Hivenet IO
//!
//! The OS-facing half of hivenet: a single-threaded reactor multiplexing
//! TCP listeners and streams over epoll or kqueue.
//!
//! ## Overview
//!
//! - **poller**: level-triggered readiness backends behind one trait
//! - **socket**: the contract the reactor drives listeners and streams through
//! - **listener** / **stream**: accept loop and per-connection state machine
//! - **codec**: sans-IO framing for the rpc, pack, common and text protocols
//! - **reactor**: token registry, wait loop, sweep, admission and forwarding
//! - **event**: what the owner drains after each `wait()`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hivenet_core::options::ReactorOptions;
//! use hivenet_core::proto::ProtoType;
//! use hivenet_io::{Event, Reactor};
//! use std::time::Duration;
//!
//! # fn main() -> hivenet_core::error::Result<()> {
//! let mut reactor = Reactor::new(ReactorOptions::default())?;
//! reactor.listen("127.0.0.1", 7000, ProtoType::Text)?;
//! loop {
//!     reactor.wait(Duration::from_millis(100))?;
//!     while let Some(event) = reactor.poll_event() {
//!         if let Event::Package { token, package } = event {
//!             reactor.send(token, package.body());
//!         }
//!     }
//! }
//! # }
//! ```

// Allow some pedantic lints
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::match_same_arms)]

pub mod codec;
pub mod event;
pub mod listener;
pub mod poller;
pub mod reactor;
pub mod socket;
pub mod stream;

pub use codec::{Decoded, Frame, FrameDecoder, FrameError};
pub use event::{Event, Package};
pub use reactor::Reactor;
pub use socket::LinkStatus;
